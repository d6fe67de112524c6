// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — Sub-pixel Shifts
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Sub-pixel translation of images and complex fields, and centre of mass.
//!
//! All shifts are periodic and follow `numpy.roll` direction: a positive
//! shift moves content towards higher indices.

use std::f64::consts::PI;

use ndarray::{Array2, Array3, ArrayView2, Axis};
use num_complex::Complex64;

use crate::backend::ArrayBackend;
use crate::fft::fftfreq;

/// Fourier phase ramp `exp(-2πi (kx·sx + ky·sy))` on an `(nx, ny)` grid.
pub fn phase_ramp(nx: usize, ny: usize, shift: [f64; 2]) -> Array2<Complex64> {
    let kx = fftfreq(nx, 1.0);
    let ky = fftfreq(ny, 1.0);
    Array2::from_shape_fn((nx, ny), |(i, j)| {
        Complex64::from_polar(1.0, -2.0 * PI * (kx[i] * shift[0] + ky[j] * shift[1]))
    })
}

/// Translate a complex field by `shift` pixels with a Fourier phase ramp.
pub fn fourier_shift(
    field: &Array2<Complex64>,
    shift: [f64; 2],
    backend: &dyn ArrayBackend,
) -> Array2<Complex64> {
    if shift == [0.0, 0.0] {
        return field.clone();
    }
    let (nx, ny) = field.dim();
    let mut spectrum = backend.fft2_copy(field);
    spectrum *= &phase_ramp(nx, ny, shift);
    backend.ifft2(spectrum.view_mut());
    spectrum
}

/// Translate every layer of a `(n, sx, sy)` stack by its row of `shifts`.
pub fn fourier_shift_stack(
    stack: &Array3<Complex64>,
    shifts: &ArrayView2<'_, f64>,
    backend: &dyn ArrayBackend,
) -> Array3<Complex64> {
    let (_, nx, ny) = stack.dim();
    let kx = fftfreq(nx, 1.0);
    let ky = fftfreq(ny, 1.0);
    let mut out = stack.clone();
    backend.fft2_batch(out.view_mut());
    for (mut layer, shift) in out.axis_iter_mut(Axis(0)).zip(shifts.outer_iter()) {
        let (sx, sy) = (shift[0], shift[1]);
        if sx == 0.0 && sy == 0.0 {
            continue;
        }
        for ((i, j), v) in layer.indexed_iter_mut() {
            *v *= Complex64::from_polar(1.0, -2.0 * PI * (kx[i] * sx + ky[j] * sy));
        }
    }
    backend.ifft2_batch(out.view_mut());
    out
}

/// Translate a real image by `shift` pixels with periodic bilinear
/// interpolation.
pub fn bilinear_shift(image: &Array2<f64>, shift: [f64; 2]) -> Array2<f64> {
    let (nx, ny) = image.dim();
    if nx == 0 || ny == 0 {
        return image.clone();
    }
    let fx = shift[0].floor();
    let fy = shift[1].floor();
    let tx = shift[0] - fx;
    let ty = shift[1] - fy;
    let ix = fx as isize;
    let iy = fy as isize;

    let wrap = |i: isize, n: usize| i.rem_euclid(n as isize) as usize;
    Array2::from_shape_fn((nx, ny), |(i, j)| {
        // source coordinate i - shift lies between i - ix - 1 and i - ix
        let x0 = wrap(i as isize - ix, nx);
        let x1 = wrap(i as isize - ix - 1, nx);
        let y0 = wrap(j as isize - iy, ny);
        let y1 = wrap(j as isize - iy - 1, ny);
        (1.0 - tx) * (1.0 - ty) * image[[x0, y0]]
            + (1.0 - tx) * ty * image[[x0, y1]]
            + tx * (1.0 - ty) * image[[x1, y0]]
            + tx * ty * image[[x1, y1]]
    })
}

/// Intensity-weighted centroid in pixels, optionally restricted to `mask`.
/// `None` when the weighted total is zero.
pub fn center_of_mass(image: &ArrayView2<'_, f64>, mask: Option<&Array2<bool>>) -> Option<[f64; 2]> {
    let mut total = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for ((i, j), &v) in image.indexed_iter() {
        if let Some(m) = mask {
            if !m[[i, j]] {
                continue;
            }
        }
        total += v;
        cx += v * i as f64;
        cy += v * j as f64;
    }
    if total == 0.0 || !total.is_finite() {
        return None;
    }
    Some([cx / total, cy / total])
}
