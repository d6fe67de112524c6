//! FFT helpers around rustfft.
//!
//! Convention matches numpy:
//! - Forward FFT: unnormalized
//! - Inverse FFT: normalized by 1/N per transformed axis

use ndarray::{Array1, Array2, ArrayViewMut, Axis, Dimension};
use num_complex::Complex64;
use rustfft::Fft;
use std::sync::Arc;

/// Sample frequencies. Matches `numpy.fft.fftfreq(n, d)`.
pub fn fftfreq(n: usize, d: f64) -> Array1<f64> {
    let scale = 1.0 / (n as f64 * d);
    Array1::from_shape_fn(n, |i| {
        let k = if i < n.div_ceil(2) {
            i as f64
        } else {
            i as f64 - n as f64
        };
        k * scale
    })
}

/// Run a 1D transform along every lane of `axis`. No normalization.
pub fn fft_along_axis<D: Dimension>(
    mut data: ArrayViewMut<'_, Complex64, D>,
    axis: usize,
    fft: &Arc<dyn Fft<f64>>,
) {
    let n = data.len_of(Axis(axis));
    if n == 0 {
        return;
    }
    let mut buffer = vec![Complex64::default(); n];
    let mut scratch = vec![Complex64::default(); fft.get_inplace_scratch_len()];
    for mut lane in data.lanes_mut(Axis(axis)) {
        for (b, v) in buffer.iter_mut().zip(lane.iter()) {
            *b = *v;
        }
        fft.process_with_scratch(&mut buffer, &mut scratch);
        for (v, b) in lane.iter_mut().zip(buffer.iter()) {
            *v = *b;
        }
    }
}

/// Periodic roll. Matches `numpy.roll(ar, (shift_x, shift_y), axis=(0, 1))`.
pub fn roll_2d<T: Clone>(ar: &Array2<T>, shift_x: isize, shift_y: isize) -> Array2<T> {
    let (nx, ny) = ar.dim();
    Array2::from_shape_fn((nx, ny), |(i, j)| {
        let si = (i as isize - shift_x).rem_euclid(nx as isize) as usize;
        let sj = (j as isize - shift_y).rem_euclid(ny as isize) as usize;
        ar[[si, sj]].clone()
    })
}

/// Move the zero-frequency sample to the array centre.
pub fn fftshift_2d<T: Clone>(ar: &Array2<T>) -> Array2<T> {
    let (nx, ny) = ar.dim();
    roll_2d(ar, (nx / 2) as isize, (ny / 2) as isize)
}

/// Inverse of [`fftshift_2d`].
pub fn ifftshift_2d<T: Clone>(ar: &Array2<T>) -> Array2<T> {
    let (nx, ny) = ar.dim();
    roll_2d(ar, -((nx / 2) as isize), -((ny / 2) as isize))
}
