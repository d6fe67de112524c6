// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — Fresnel Propagator
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Free-space propagation between slices.
//!
//! Kernel for a slice gap `dz`:
//!
//! ```text
//! K(kx, ky) = exp(−iπλ·dz·(kx² + ky²)) · M(|k|)
//! ```
//!
//! `M` is the antialias mask: 1 below `kcut − 0.1 Å⁻¹`, a cosine rolloff up
//! to `kcut`, 0 above, with `kcut = (2/3) · 1/(2·max(sampling))`.

use std::f64::consts::PI;

use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayViewMut3, Axis, Zip};
use num_complex::Complex64;
use ptycho_math::backend::ArrayBackend;
use ptycho_math::fft::fftfreq;
use ptycho_types::constants::electron_wavelength_angstrom;

/// Width of the antialias cosine edge in Å⁻¹.
const ANTIALIAS_ROLLOFF: f64 = 0.1;

/// Spatial frequencies in Å⁻¹ along both axes.
pub fn spatial_frequencies(gpts: [usize; 2], sampling: [f64; 2]) -> (Array1<f64>, Array1<f64>) {
    (fftfreq(gpts[0], sampling[0]), fftfreq(gpts[1], sampling[1]))
}

/// Band limit applied to every propagator.
pub fn antialias_mask(gpts: [usize; 2], sampling: [f64; 2]) -> Array2<f64> {
    let (kx, ky) = spatial_frequencies(gpts, sampling);
    let kcut = 1.0 / sampling[0].max(sampling[1]) / 2.0 * 2.0 / 3.0;
    Array2::from_shape_fn((gpts[0], gpts[1]), |(i, j)| {
        let k = (kx[i] * kx[i] + ky[j] * ky[j]).sqrt();
        if k > kcut {
            0.0
        } else if k > kcut - ANTIALIAS_ROLLOFF {
            0.5 * (1.0 + (PI * (k - kcut + ANTIALIAS_ROLLOFF) / ANTIALIAS_ROLLOFF).cos())
        } else {
            1.0
        }
    })
}

/// Unit-modulus Fresnel kernel without band limit.
pub fn fresnel_kernel(
    gpts: [usize; 2],
    sampling: [f64; 2],
    wavelength: f64,
    dz: f64,
) -> Array2<Complex64> {
    let (kx, ky) = spatial_frequencies(gpts, sampling);
    Array2::from_shape_fn((gpts[0], gpts[1]), |(i, j)| {
        let phase = -PI * wavelength * dz * (kx[i] * kx[i] + ky[j] * ky[j]);
        Complex64::from_polar(1.0, phase)
    })
}

/// Per-slice propagators, one per slice gap.
#[derive(Debug, Clone)]
pub struct Propagator {
    kernels: Array3<Complex64>,
}

impl Propagator {
    /// Kernel stack for `slice_thicknesses` (Å) at `energy` (eV).
    pub fn precompute(
        gpts: [usize; 2],
        sampling: [f64; 2],
        energy: f64,
        slice_thicknesses: &[f64],
    ) -> Self {
        let wavelength = electron_wavelength_angstrom(energy);
        let mask = antialias_mask(gpts, sampling);
        let mut kernels = Array3::zeros((slice_thicknesses.len(), gpts[0], gpts[1]));
        for (mut layer, &dz) in kernels.outer_iter_mut().zip(slice_thicknesses.iter()) {
            let fresnel = fresnel_kernel(gpts, sampling, wavelength, dz);
            Zip::from(&mut layer)
                .and(&fresnel)
                .and(&mask)
                .for_each(|k, &f, &m| *k = f * m);
        }
        Propagator { kernels }
    }

    pub fn num_kernels(&self) -> usize {
        self.kernels.len_of(Axis(0))
    }

    pub fn kernel(&self, index: usize) -> ArrayView2<'_, Complex64> {
        self.kernels.index_axis(Axis(0), index)
    }

    pub fn kernels(&self) -> &Array3<Complex64> {
        &self.kernels
    }

    /// Propagate every field of `stack` across gap `index`. With
    /// `conjugate` set the wave is propagated backwards.
    pub fn propagate_stack(
        &self,
        stack: ArrayViewMut3<'_, Complex64>,
        index: usize,
        conjugate: bool,
        backend: &dyn ArrayBackend,
    ) {
        propagate_stack(stack, &self.kernel(index), conjugate, backend);
    }
}

/// `ifft2(fft2(field) · kernel)`.
pub fn propagate(
    field: &Array2<Complex64>,
    kernel: &ArrayView2<'_, Complex64>,
    backend: &dyn ArrayBackend,
) -> Array2<Complex64> {
    let mut out = backend.fft2_copy(field);
    Zip::from(&mut out).and(kernel).for_each(|v, &k| *v *= k);
    backend.ifft2(out.view_mut());
    out
}

/// In-place propagation of a `(n, sx, sy)` stack by one kernel.
pub fn propagate_stack(
    mut stack: ArrayViewMut3<'_, Complex64>,
    kernel: &ArrayView2<'_, Complex64>,
    conjugate: bool,
    backend: &dyn ArrayBackend,
) {
    backend.fft2_batch(stack.view_mut());
    for mut layer in stack.outer_iter_mut() {
        if conjugate {
            Zip::from(&mut layer).and(kernel).for_each(|v, &k| *v *= k.conj());
        } else {
            Zip::from(&mut layer).and(kernel).for_each(|v, &k| *v *= k);
        }
    }
    backend.ifft2_batch(stack);
}
