// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — Constraint Engine
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Post-update regularizers for object, probe and scan positions.
//!
//! Order inside [`ConstraintEngine::apply`]: Gaussian smoothing, Butterworth
//! band-pass, positivity, probe Fourier-amplitude fix, probe support, probe
//! centre of mass, then the position constraints.

use std::sync::Arc;

use ndarray::{Array2, Array3, ArrayView2, ArrayViewMut2, Axis, Zip};
use num_complex::Complex64;
use ptycho_math::backend::ArrayBackend;
use ptycho_math::filter::{butterworth_envelope, frequency_magnitude};
use ptycho_math::linalg::lstsq;
use ptycho_math::shift::{center_of_mass, fourier_shift};
use ptycho_types::error::{PtychoError, PtychoResult};

/// Which optional constraints fire in the current iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConstraintFlags {
    pub gaussian_sigma: Option<f64>,
    pub butterworth: Option<(Option<f64>, Option<f64>)>,
    pub fix_probe_fourier_amplitude: bool,
    pub fix_probe_com: bool,
    pub fix_positions_com: bool,
    pub global_affine: bool,
}

/// Supergaussian window `exp(−((x/r)² + (y/r)²)^degree)` on `[−1, 1)`.
pub fn support_mask(shape: [usize; 2], relative_radius: f64, degree: f64) -> Array2<f64> {
    let coord = |i: usize, n: usize| -1.0 + 2.0 * i as f64 / n as f64;
    Array2::from_shape_fn((shape[0], shape[1]), |(i, j)| {
        let x = coord(i, shape[0]) / relative_radius;
        let y = coord(j, shape[1]) / relative_radius;
        (-(x * x + y * y).powf(degree)).exp()
    })
}

/// Fixed inputs of the regularizers, built once per reconstruction.
pub struct ConstraintEngine {
    backend: Arc<dyn ArrayBackend>,
    sampling: [f64; 2],
    support: Array2<f64>,
    initial_fft_amplitude: Array2<f64>,
}

impl ConstraintEngine {
    pub fn new(
        backend: Arc<dyn ArrayBackend>,
        sampling: [f64; 2],
        support: Array2<f64>,
        initial_fft_amplitude: Array2<f64>,
    ) -> Self {
        ConstraintEngine {
            backend,
            sampling,
            support,
            initial_fft_amplitude,
        }
    }

    pub fn support(&self) -> &Array2<f64> {
        &self.support
    }

    /// Floor the potential at zero.
    pub fn positivity(&self, object: &mut Array3<f64>) {
        object.mapv_inplace(|v| v.max(0.0));
    }

    pub fn gaussian(&self, object: &Array3<f64>, sigma: f64) -> Array3<f64> {
        self.backend.gaussian_filter(object, sigma)
    }

    /// Isotropic 3D band-pass in Å⁻¹. Either cutoff may be absent.
    pub fn butterworth(
        &self,
        object: &Array3<f64>,
        q_lowpass: Option<f64>,
        q_highpass: Option<f64>,
    ) -> Array3<f64> {
        let envelope = butterworth_envelope(
            &frequency_magnitude(object.dim(), self.sampling),
            q_lowpass,
            q_highpass,
        );
        let mut spectrum = object.mapv(|v| Complex64::new(v, 0.0));
        self.backend.fftn3(spectrum.view_mut());
        Zip::from(&mut spectrum)
            .and(&envelope)
            .for_each(|f, &e| *f *= e);
        self.backend.ifftn3(spectrum.view_mut());
        spectrum.mapv(|v| v.re)
    }

    /// Replace `|fft2(probe)|` by the initial probe's, keeping the phase.
    pub fn probe_fourier_amplitude(&self, probe: &Array2<Complex64>) -> Array2<Complex64> {
        let mut spectrum = self.backend.fft2_copy(probe);
        Zip::from(&mut spectrum)
            .and(&self.initial_fft_amplitude)
            .for_each(|f, &a| *f = Complex64::from_polar(a, f.arg()));
        self.backend.ifft2(spectrum.view_mut());
        spectrum
    }

    pub fn probe_support(&self, probe: &Array2<Complex64>) -> Array2<Complex64> {
        let mut out = probe.clone();
        Zip::from(&mut out)
            .and(&self.support)
            .for_each(|p, &m| *p *= m);
        out
    }

    /// Shift the probe so its intensity centroid sits at the field centre.
    pub fn probe_center_of_mass(&self, probe: &Array2<Complex64>) -> Array2<Complex64> {
        let intensity = probe.mapv(|p| p.norm_sqr());
        let Some(com) = center_of_mass(&intensity.view(), None) else {
            return probe.clone();
        };
        let (nx, ny) = probe.dim();
        let shift = [(nx / 2) as f64 - com[0], (ny / 2) as f64 - com[1]];
        fourier_shift(probe, shift, self.backend.as_ref())
    }

    /// Run every object and probe constraint selected by `flags`.
    pub fn apply(
        &self,
        object: &mut Array3<f64>,
        probe: &mut Array2<Complex64>,
        flags: &ConstraintFlags,
    ) {
        if let Some(sigma) = flags.gaussian_sigma {
            *object = self.gaussian(object, sigma);
        }
        if let Some((q_lowpass, q_highpass)) = flags.butterworth {
            *object = self.butterworth(object, q_lowpass, q_highpass);
        }
        self.positivity(object);

        if flags.fix_probe_fourier_amplitude {
            *probe = self.probe_fourier_amplitude(probe);
        }
        *probe = self.probe_support(probe);
        if flags.fix_probe_com {
            *probe = self.probe_center_of_mass(probe);
        }
    }
}

fn centroid(positions: &ArrayView2<'_, f64>) -> [f64; 2] {
    positions
        .mean_axis(Axis(0))
        .map(|m| [m[0], m[1]])
        .unwrap_or([0.0, 0.0])
}

/// Move `positions` so their centroid matches that of `initial`.
pub fn positions_center_of_mass(
    mut positions: ArrayViewMut2<'_, f64>,
    initial: &ArrayView2<'_, f64>,
) {
    let current = centroid(&positions.view());
    let target = centroid(initial);
    for mut row in positions.outer_iter_mut() {
        row[0] -= current[0] - target[0];
        row[1] -= current[1] - target[1];
    }
}

/// Replace `positions` by the least-squares affine image of `initial`.
pub fn positions_affine(
    mut positions: ArrayViewMut2<'_, f64>,
    initial: &ArrayView2<'_, f64>,
) -> PtychoResult<()> {
    let n = initial.nrows();
    if positions.nrows() != n {
        return Err(PtychoError::shape_mismatch(
            "positions",
            initial.shape(),
            positions.shape(),
        ));
    }
    if n < 3 {
        return Ok(());
    }
    let design =
        Array2::from_shape_fn((n, 3), |(k, c)| if c < 2 { initial[[k, c]] } else { 1.0 });
    match lstsq(&design, &positions.to_owned()) {
        Ok(transform) => positions.assign(&design.dot(&transform)),
        // collinear scans carry no affine information
        Err(PtychoError::LinAlg(msg)) => log::debug!("affine position fit skipped: {msg}"),
        Err(e) => return Err(e),
    }
    Ok(())
}
