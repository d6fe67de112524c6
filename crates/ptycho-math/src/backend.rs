// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — Array Backend
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Backend trait for the non-elementwise array operations.
//!
//! Elementwise arithmetic runs on `ndarray` directly. Everything that a
//! device implementation would need its own kernels for (FFTs, filtering,
//! resampling, rotation) goes through [`ArrayBackend`], selected once at
//! construction and injected as `Arc<dyn ArrayBackend>`.

use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use ndarray::{Array2, Array3, ArrayViewMut, ArrayViewMut2, ArrayViewMut3, Dimension};
use num_complex::Complex64;
use ptycho_types::error::{PtychoError, PtychoResult};
use rustfft::{Fft, FftPlanner};

use crate::fft::fft_along_axis;
use crate::filter::gaussian_filter;
use crate::resample::resample_depth;
use crate::rotate::rotate_volume;

pub trait ArrayBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// In-place forward 2D FFT (unnormalized).
    fn fft2(&self, field: ArrayViewMut2<'_, Complex64>);

    /// In-place inverse 2D FFT (normalized by 1/N).
    fn ifft2(&self, field: ArrayViewMut2<'_, Complex64>);

    /// Forward 2D FFT over the last two axes of a stack.
    fn fft2_batch(&self, stack: ArrayViewMut3<'_, Complex64>);

    /// Inverse 2D FFT over the last two axes of a stack.
    fn ifft2_batch(&self, stack: ArrayViewMut3<'_, Complex64>);

    /// In-place forward 3D FFT.
    fn fftn3(&self, volume: ArrayViewMut3<'_, Complex64>);

    /// In-place inverse 3D FFT.
    fn ifftn3(&self, volume: ArrayViewMut3<'_, Complex64>);

    /// Isotropic Gaussian blur with reflecting boundaries.
    fn gaussian_filter(&self, volume: &Array3<f64>, sigma: f64) -> Array3<f64>;

    /// Energy-conserving resample of axis 0 to `output_depth` samples.
    fn resample_depth(&self, volume: &Array3<f64>, output_depth: usize) -> Array3<f64>;

    /// Rotate in the (axis 0, axis 2) plane about the array centre.
    fn rotate_volume(&self, volume: &Array3<f64>, angle_deg: f64) -> Array3<f64>;

    fn fft2_copy(&self, field: &Array2<Complex64>) -> Array2<Complex64> {
        let mut out = field.clone();
        self.fft2(out.view_mut());
        out
    }

    fn ifft2_copy(&self, field: &Array2<Complex64>) -> Array2<Complex64> {
        let mut out = field.clone();
        self.ifft2(out.view_mut());
        out
    }
}

/// Compute device selected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Gpu,
}

impl FromStr for Device {
    type Err = PtychoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Device::Cpu),
            "gpu" => Ok(Device::Gpu),
            other => Err(PtychoError::ConfigError(format!(
                "device must be either 'cpu' or 'gpu', not '{other}'"
            ))),
        }
    }
}

/// Build the backend for a device string.
pub fn create_backend(device: &str) -> PtychoResult<Arc<dyn ArrayBackend>> {
    match device.parse::<Device>()? {
        Device::Cpu => Ok(Arc::new(CpuBackend::new())),
        Device::Gpu => Err(PtychoError::UnsupportedDevice(
            "no accelerator backend is compiled into this build; use device='cpu'".to_string(),
        )),
    }
}

/// Host backend. FFT plans are cached by one shared rustfft planner.
pub struct CpuBackend {
    planner: Mutex<FftPlanner<f64>>,
}

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend {
            planner: Mutex::new(FftPlanner::new()),
        }
    }

    fn plan(&self, len: usize, inverse: bool) -> Arc<dyn Fft<f64>> {
        let mut planner = self.planner.lock().unwrap_or_else(PoisonError::into_inner);
        if inverse {
            planner.plan_fft_inverse(len)
        } else {
            planner.plan_fft_forward(len)
        }
    }

    fn transform<D: Dimension>(
        &self,
        mut data: ArrayViewMut<'_, Complex64, D>,
        axes: &[usize],
        inverse: bool,
    ) {
        let mut count = 1usize;
        for &axis in axes {
            let n = data.shape()[axis];
            count *= n;
            let fft = self.plan(n, inverse);
            fft_along_axis(data.view_mut(), axis, &fft);
        }
        if inverse && count > 0 {
            let norm = 1.0 / count as f64;
            data.mapv_inplace(|v| v * norm);
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ArrayBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn fft2(&self, field: ArrayViewMut2<'_, Complex64>) {
        self.transform(field, &[1, 0], false);
    }

    fn ifft2(&self, field: ArrayViewMut2<'_, Complex64>) {
        self.transform(field, &[1, 0], true);
    }

    fn fft2_batch(&self, stack: ArrayViewMut3<'_, Complex64>) {
        self.transform(stack, &[2, 1], false);
    }

    fn ifft2_batch(&self, stack: ArrayViewMut3<'_, Complex64>) {
        self.transform(stack, &[2, 1], true);
    }

    fn fftn3(&self, volume: ArrayViewMut3<'_, Complex64>) {
        self.transform(volume, &[2, 1, 0], false);
    }

    fn ifftn3(&self, volume: ArrayViewMut3<'_, Complex64>) {
        self.transform(volume, &[2, 1, 0], true);
    }

    fn gaussian_filter(&self, volume: &Array3<f64>, sigma: f64) -> Array3<f64> {
        gaussian_filter(volume, sigma)
    }

    fn resample_depth(&self, volume: &Array3<f64>, output_depth: usize) -> Array3<f64> {
        resample_depth(volume, output_depth)
    }

    fn rotate_volume(&self, volume: &Array3<f64>, angle_deg: f64) -> Array3<f64> {
        rotate_volume(volume, angle_deg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn complex_field(nx: usize, ny: usize) -> Array2<Complex64> {
        Array2::from_shape_fn((nx, ny), |(i, j)| {
            Complex64::new((i * ny + j) as f64, ((i + 2 * j) as f64).sin())
        })
    }

    #[test]
    fn test_fft2_roundtrip() {
        let backend = CpuBackend::new();
        let original = complex_field(16, 12);
        let spectrum = backend.fft2_copy(&original);
        let recovered = backend.ifft2_copy(&spectrum);

        for ((i, j), &val) in original.indexed_iter() {
            assert!(
                (recovered[[i, j]] - val).norm() < 1e-10,
                "FFT roundtrip failed at ({i}, {j})"
            );
        }
    }

    #[test]
    fn test_fft2_dc_component() {
        // For a constant field, the DC component (0,0) should be N*M*value
        let backend = CpuBackend::new();
        let input = Array2::from_elem((8, 6), Complex64::new(3.0, 0.0));
        let spectrum = backend.fft2_copy(&input);
        assert!((spectrum[[0, 0]].re - 144.0).abs() < 1e-10);
        assert!(spectrum[[0, 0]].im.abs() < 1e-10);
        assert!(spectrum[[1, 1]].norm() < 1e-10);
    }

    #[test]
    fn test_batch_matches_single() {
        let backend = CpuBackend::new();
        let field = complex_field(8, 8);
        let mut stack: Array3<Complex64> = Array3::zeros((3, 8, 8));
        for mut layer in stack.outer_iter_mut() {
            layer.assign(&field);
        }
        backend.fft2_batch(stack.view_mut());
        let single = backend.fft2_copy(&field);
        for layer in stack.outer_iter() {
            for (a, b) in layer.iter().zip(single.iter()) {
                assert!((a - b).norm() < 1e-10);
            }
        }
    }

    #[test]
    fn test_fftn3_roundtrip() {
        let backend = CpuBackend::new();
        let original = Array3::from_shape_fn((4, 6, 5), |(k, i, j)| {
            Complex64::new((k + i * j) as f64, k as f64 - j as f64)
        });
        let mut volume = original.clone();
        backend.fftn3(volume.view_mut());
        assert!((volume[[0, 0, 0]].re - original.iter().map(|v| v.re).sum::<f64>()).abs() < 1e-9);
        backend.ifftn3(volume.view_mut());
        for (a, b) in volume.iter().zip(original.iter()) {
            assert!((a - b).norm() < 1e-10);
        }
    }

    #[test]
    fn test_device_parsing() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("gpu".parse::<Device>().unwrap(), Device::Gpu);
        let err = "tpu".parse::<Device>().unwrap_err();
        assert!(err.to_string().contains("tpu"));
    }

    #[test]
    fn test_create_backend() {
        assert_eq!(create_backend("cpu").unwrap().name(), "cpu");
        assert!(matches!(
            create_backend("gpu"),
            Err(PtychoError::UnsupportedDevice(_))
        ));
        assert!(matches!(
            create_backend("CPU"),
            Err(PtychoError::ConfigError(_))
        ));
    }
}
