// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — Volume Filters
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Real-space and reciprocal-space smoothing of potential volumes.

use ndarray::{Array1, Array3, Axis};

use crate::fft::fftfreq;

/// Kernel half-width in standard deviations.
const TRUNCATE: f64 = 4.0;

/// Reflect an index into `[0, n)`, edge sample repeated (`d c b a | a b c d`).
fn reflect_index(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = i.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (TRUNCATE * sigma + 0.5) as usize;
    let mut weights: Vec<f64> = (0..=2 * radius)
        .map(|k| {
            let x = k as f64 - radius as f64;
            (-0.5 * x * x / (sigma * sigma)).exp()
        })
        .collect();
    let total: f64 = weights.iter().sum();
    for w in weights.iter_mut() {
        *w /= total;
    }
    weights
}

/// Separable Gaussian blur over all three axes with reflecting boundaries.
///
/// `sigma` is in voxels; `sigma <= 0` returns an unmodified copy.
pub fn gaussian_filter(volume: &Array3<f64>, sigma: f64) -> Array3<f64> {
    if sigma <= 0.0 || !sigma.is_finite() {
        return volume.clone();
    }
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;

    let mut current = volume.clone();
    for axis in 0..3 {
        let n = current.len_of(Axis(axis));
        if n == 0 {
            continue;
        }
        let mut next = Array3::zeros(current.raw_dim());
        for (src, mut dst) in current
            .lanes(Axis(axis))
            .into_iter()
            .zip(next.lanes_mut(Axis(axis)))
        {
            for i in 0..n {
                let mut acc = 0.0;
                for (k, w) in kernel.iter().enumerate() {
                    let idx = reflect_index(i as isize + k as isize - radius, n);
                    acc += w * src[idx];
                }
                dst[i] = acc;
            }
        }
        current = next;
    }
    current
}

/// Radial frequency magnitude `|q|` on a `(nz, nx, ny)` grid.
///
/// Axis 0 and axis 2 share the in-plane sampling `sampling[1]`; axis 1
/// uses `sampling[0]`.
pub fn frequency_magnitude(shape: (usize, usize, usize), sampling: [f64; 2]) -> Array3<f64> {
    let qz: Array1<f64> = fftfreq(shape.0, sampling[1]);
    let qx: Array1<f64> = fftfreq(shape.1, sampling[0]);
    let qy: Array1<f64> = fftfreq(shape.2, sampling[1]);
    Array3::from_shape_fn(shape, |(k, i, j)| {
        (qz[k] * qz[k] + qx[i] * qx[i] + qy[j] * qy[j]).sqrt()
    })
}

/// Order-2 Butterworth envelope. Either cutoff may be absent.
pub fn butterworth_envelope(
    q: &Array3<f64>,
    q_lowpass: Option<f64>,
    q_highpass: Option<f64>,
) -> Array3<f64> {
    q.mapv(|qv| {
        let mut env = 1.0;
        if let Some(qh) = q_highpass {
            env *= 1.0 - 1.0 / (1.0 + (qv / qh).powi(4));
        }
        if let Some(ql) = q_lowpass {
            env *= 1.0 / (1.0 + (qv / ql).powi(4));
        }
        env
    })
}
