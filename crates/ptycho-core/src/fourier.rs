// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — Fourier Projection
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Measurement-space projection of the last-slice overlap.
//!
//! Gradient descent returns residual exit waves for every slice; the
//! projection-set family returns the updated exit-wave memory.

use ndarray::{Array3, Array4, ArrayView3, Axis, Zip};
use num_complex::Complex64;
use ptycho_math::backend::ArrayBackend;
use ptycho_types::method::ProjectionCoefficients;

use crate::overlap::OverlapStack;

/// Exit waves produced by one Fourier projection, with the batch error.
#[derive(Debug, Clone)]
pub struct FourierProjection {
    pub exit_waves: Array4<Complex64>,
    pub error: f64,
}

/// Replace the modulus of `spectrum` by `amplitudes`, keeping its phase.
fn magnitude_projection(spectrum: &mut Array3<Complex64>, amplitudes: &ArrayView3<'_, f64>) {
    Zip::from(spectrum)
        .and(amplitudes)
        .for_each(|f, &a| *f = Complex64::from_polar(a, f.arg()));
}

/// Gradient-descent projection.
///
/// Every slice's exit wave starts as `−overlap`; the last slice then gains
/// `ifft(A · e^{i·arg F})`, so `exit[last] = modified − overlap[last]`.
/// Error is the mean of `|A − |F||²` over every pixel of the batch,
/// divided by `mean_intensity`.
pub fn gradient_descent_projection(
    amplitudes: &ArrayView3<'_, f64>,
    stack: &OverlapStack,
    mean_intensity: f64,
    backend: &dyn ArrayBackend,
) -> FourierProjection {
    let last = stack.num_slices() - 1;
    let mut spectrum = stack.last_overlap().to_owned();
    backend.fft2_batch(spectrum.view_mut());

    let mut sq = 0.0;
    Zip::from(&spectrum).and(amplitudes).for_each(|f, &a| {
        let d = a - f.norm();
        sq += d * d;
    });
    let error = sq / spectrum.len().max(1) as f64 / mean_intensity;

    magnitude_projection(&mut spectrum, amplitudes);
    backend.ifft2_batch(spectrum.view_mut());

    let mut exit_waves = stack.overlap.mapv(|v| -v);
    let mut tail = exit_waves.index_axis_mut(Axis(0), last);
    tail += &spectrum;

    FourierProjection { exit_waves, error }
}

/// Generalized projection with coefficients `(a, b, c)`.
///
/// `previous` is the exit-wave memory of this tilt; on first use it is a
/// copy of the overlap stack. Only the last slice is rewritten:
///
/// ```text
/// ψ' = x·ψ + a·O + b·ifft(A · phase(fft(c·O + y·ψ)))
/// ```
///
/// Error is the mean of `|A² − |F|²|` over every pixel of the batch,
/// divided by `mean_intensity`, with `F = fft(O)`.
pub fn projection_set_projection(
    amplitudes: &ArrayView3<'_, f64>,
    stack: &OverlapStack,
    previous: Option<Array4<Complex64>>,
    coefficients: ProjectionCoefficients,
    mean_intensity: f64,
    backend: &dyn ArrayBackend,
) -> FourierProjection {
    let last = stack.num_slices() - 1;
    let mut exit_waves = previous.unwrap_or_else(|| stack.overlap.clone());
    let overlap_last = stack.last_overlap();

    let mut spectrum = overlap_last.to_owned();
    backend.fft2_batch(spectrum.view_mut());
    let mut abs_sum = 0.0;
    Zip::from(&spectrum).and(amplitudes).for_each(|f, &a| {
        abs_sum += (a * a - f.norm_sqr()).abs();
    });
    let error = abs_sum / spectrum.len().max(1) as f64 / mean_intensity;

    let (a, b, c) = (coefficients.a, coefficients.b, coefficients.c);
    let (x, y) = (coefficients.x(), coefficients.y());

    let memory = exit_waves.index_axis(Axis(0), last).to_owned();
    let mut factor = Array3::zeros(memory.raw_dim());
    Zip::from(&mut factor)
        .and(&overlap_last)
        .and(&memory)
        .for_each(|f, &o, &m| *f = o * c + m * y);
    backend.fft2_batch(factor.view_mut());
    magnitude_projection(&mut factor, amplitudes);
    backend.ifft2_batch(factor.view_mut());

    Zip::from(exit_waves.index_axis_mut(Axis(0), last))
        .and(&memory)
        .and(&overlap_last)
        .and(&factor)
        .for_each(|e, &m, &o, &p| *e = m * x + o * a + p * b);

    FourierProjection { exit_waves, error }
}
