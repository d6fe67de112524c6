// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — Detector Conditioning
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Diffraction-pattern resampling, padding and beam-centre fitting.
//!
//! Resampled patterns keep their summed intensity. Datacubes are
//! `(Rx, Ry, Qx, Qy)`.

use ndarray::{s, Array2, Array3, Array4, ArrayView2, Axis};
use num_complex::Complex64;
use ptycho_math::backend::ArrayBackend;
use ptycho_math::fft::{fftshift_2d, ifftshift_2d};
use ptycho_math::linalg::lstsq;
use ptycho_math::shift::center_of_mass;
use ptycho_types::config::{FitFunction, ReshapingMethod};
use ptycho_types::error::{PtychoError, PtychoResult};

fn rescale_sum(image: &mut Array2<f64>, target: f64) {
    let total = image.sum();
    if total != 0.0 && total.is_finite() {
        image.mapv_inplace(|v| v * target / total);
    }
}

/// Sum `factor`-sized blocks.
pub fn bin_pattern(image: &ArrayView2<'_, f64>, factor: [usize; 2]) -> Array2<f64> {
    let (nx, ny) = image.dim();
    let shape = (nx / factor[0], ny / factor[1]);
    Array2::from_shape_fn(shape, |(i, j)| {
        image
            .slice(s![
                i * factor[0]..(i + 1) * factor[0],
                j * factor[1]..(j + 1) * factor[1]
            ])
            .sum()
    })
}

/// Pixel-centre aligned bilinear resize.
pub fn bilinear_resize(image: &ArrayView2<'_, f64>, shape: [usize; 2]) -> Array2<f64> {
    let (nx, ny) = image.dim();
    let source = |i: usize, n_in: usize, n_out: usize| -> (usize, usize, f64) {
        let x = ((i as f64 + 0.5) * n_in as f64 / n_out as f64 - 0.5)
            .clamp(0.0, (n_in - 1) as f64);
        let lo = x.floor() as usize;
        let hi = (lo + 1).min(n_in - 1);
        (lo, hi, x - lo as f64)
    };
    let mut out = Array2::from_shape_fn((shape[0], shape[1]), |(i, j)| {
        let (x0, x1, tx) = source(i, nx, shape[0]);
        let (y0, y1, ty) = source(j, ny, shape[1]);
        (1.0 - tx) * (1.0 - ty) * image[[x0, y0]]
            + tx * (1.0 - ty) * image[[x1, y0]]
            + (1.0 - tx) * ty * image[[x0, y1]]
            + tx * ty * image[[x1, y1]]
    });
    rescale_sum(&mut out, image.sum());
    out
}

/// Crop or zero-pad the centred spectrum to `shape`.
pub fn fourier_resize(
    image: &ArrayView2<'_, f64>,
    shape: [usize; 2],
    backend: &dyn ArrayBackend,
) -> Array2<f64> {
    let (nx, ny) = image.dim();
    let mut spectrum = image.mapv(|v| Complex64::new(v, 0.0));
    backend.fft2(spectrum.view_mut());
    let centred = fftshift_2d(&spectrum);

    let mut resized = Array2::zeros((shape[0], shape[1]));
    let (cx_in, cy_in) = (nx / 2, ny / 2);
    let (cx_out, cy_out) = (shape[0] / 2, shape[1] / 2);
    for ((i, j), v) in resized.indexed_iter_mut() {
        let si = i as isize - cx_out as isize + cx_in as isize;
        let sj = j as isize - cy_out as isize + cy_in as isize;
        if (0..nx as isize).contains(&si) && (0..ny as isize).contains(&sj) {
            *v = centred[[si as usize, sj as usize]];
        }
    }
    let mut field = ifftshift_2d(&resized);
    backend.ifft2(field.view_mut());
    let mut out = field.mapv(|v| v.re);
    rescale_sum(&mut out, image.sum());
    out
}

/// Resample one pattern to `shape`.
pub fn reshape_pattern(
    image: &ArrayView2<'_, f64>,
    shape: [usize; 2],
    method: ReshapingMethod,
    backend: &dyn ArrayBackend,
) -> PtychoResult<Array2<f64>> {
    let (nx, ny) = image.dim();
    if [nx, ny] == shape {
        return Ok(image.to_owned());
    }
    match method {
        ReshapingMethod::Bin => {
            if nx % shape[0] != 0 || ny % shape[1] != 0 || shape[0] > nx || shape[1] > ny {
                return Err(PtychoError::ConfigError(format!(
                    "bin reshaping needs an integer factor from {:?} to {shape:?}",
                    [nx, ny]
                )));
            }
            Ok(bin_pattern(image, [nx / shape[0], ny / shape[1]]))
        }
        ReshapingMethod::Bilinear => Ok(bilinear_resize(image, shape)),
        ReshapingMethod::Fourier => Ok(fourier_resize(image, shape, backend)),
    }
}

/// Resample every pattern of a datacube.
pub fn reshape_stack(
    intensities: &Array4<f64>,
    shape: [usize; 2],
    method: ReshapingMethod,
    backend: &dyn ArrayBackend,
) -> PtychoResult<Array4<f64>> {
    let (rx, ry, _, _) = intensities.dim();
    let mut out = Array4::zeros((rx, ry, shape[0], shape[1]));
    for i in 0..rx {
        for j in 0..ry {
            let pattern = intensities.slice(s![i, j, .., ..]);
            out.slice_mut(s![i, j, .., ..])
                .assign(&reshape_pattern(&pattern, shape, method, backend)?);
        }
    }
    Ok(out)
}

/// Offset placing an `inner` extent in the middle of `outer`.
fn pad_offset(inner: usize, outer: usize) -> usize {
    (outer - inner) / 2
}

/// Centre `image` inside a zero (default) field of `shape`.
pub fn pad_centered<T: Copy + Default>(
    image: &ArrayView2<'_, T>,
    shape: [usize; 2],
) -> PtychoResult<Array2<T>> {
    let (nx, ny) = image.dim();
    if shape[0] < nx || shape[1] < ny {
        return Err(PtychoError::ConfigError(format!(
            "probe_roi_shape {shape:?} is smaller than the diffraction patterns {:?}",
            [nx, ny]
        )));
    }
    let (ox, oy) = (pad_offset(nx, shape[0]), pad_offset(ny, shape[1]));
    let mut out = Array2::from_elem((shape[0], shape[1]), T::default());
    out.slice_mut(s![ox..ox + nx, oy..oy + ny]).assign(image);
    Ok(out)
}

pub fn pad_stack(intensities: &Array4<f64>, shape: [usize; 2]) -> PtychoResult<Array4<f64>> {
    let (rx, ry, _, _) = intensities.dim();
    let mut out = Array4::zeros((rx, ry, shape[0], shape[1]));
    for i in 0..rx {
        for j in 0..ry {
            let padded = pad_centered(&intensities.slice(s![i, j, .., ..]), shape)?;
            out.slice_mut(s![i, j, .., ..]).assign(&padded);
        }
    }
    Ok(out)
}

/// Masked centre of mass of every pattern, `(Rx, Ry, 2)`. Empty patterns
/// fall back to the detector centre.
pub fn pattern_centers_of_mass(
    intensities: &Array4<f64>,
    mask: Option<&Array2<bool>>,
) -> Array3<f64> {
    let (rx, ry, qx, qy) = intensities.dim();
    let centre = [qx as f64 / 2.0, qy as f64 / 2.0];
    let mut com = Array3::zeros((rx, ry, 2));
    for i in 0..rx {
        for j in 0..ry {
            let c = center_of_mass(&intensities.slice(s![i, j, .., ..]), mask).unwrap_or(centre);
            com[[i, j, 0]] = c[0];
            com[[i, j, 1]] = c[1];
        }
    }
    com
}

fn fit_design(rx: usize, ry: usize, fit: FitFunction) -> Array2<f64> {
    let columns = match fit {
        FitFunction::Constant => 1,
        FitFunction::Plane => 3,
        FitFunction::Parabola => 6,
    };
    Array2::from_shape_fn((rx * ry, columns), |(k, c)| {
        let x = (k / ry) as f64;
        let y = (k % ry) as f64;
        match (fit, c) {
            (FitFunction::Constant, _) => 1.0,
            (FitFunction::Plane, 0) | (FitFunction::Parabola, 3) => x,
            (FitFunction::Plane, 1) | (FitFunction::Parabola, 4) => y,
            (FitFunction::Parabola, 0) => x * x,
            (FitFunction::Parabola, 1) => x * y,
            (FitFunction::Parabola, 2) => y * y,
            _ => 1.0,
        }
    })
}

/// Smooth surface through the measured centres over the scan grid.
pub fn fit_origins(com: &Array3<f64>, fit: FitFunction) -> PtychoResult<Array3<f64>> {
    let (rx, ry, _) = com.dim();
    let values = com
        .clone()
        .into_shape((rx * ry, 2))
        .map_err(|e| PtychoError::LinAlg(format!("origin reshape failed: {e}")))?;
    let design = fit_design(rx, ry, fit);
    let fitted = match lstsq(&design, &values) {
        Ok(coefficients) => design.dot(&coefficients),
        Err(PtychoError::LinAlg(msg)) => {
            log::debug!("{fit:?} origin fit degenerate ({msg}); using the mean origin");
            let mean = values
                .mean_axis(Axis(0))
                .ok_or_else(|| PtychoError::LinAlg("empty scan".to_string()))?;
            Array2::from_shape_fn((rx * ry, 2), |(_, c)| mean[c])
        }
        Err(e) => return Err(e),
    };
    fitted
        .into_shape((rx, ry, 2))
        .map_err(|e| PtychoError::LinAlg(format!("origin reshape failed: {e}")))
}
