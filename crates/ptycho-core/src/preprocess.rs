// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — Preprocessor
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Tilt-series conditioning: amplitudes, calibrations, scan positions,
//! initial object and probe, and the propagator stack.

use indicatif::ProgressBar;
use ndarray::{concatenate, s, Array2, Array3, Array4, ArrayView3, Axis};
use num_complex::Complex64;
use ptycho_math::backend::ArrayBackend;
use ptycho_math::shift::bilinear_shift;
use ptycho_types::config::PreprocessConfig;
use ptycho_types::constants::electron_wavelength_angstrom;
use ptycho_types::error::{PtychoError, PtychoResult};
use ptycho_types::state::InitialSnapshot;

use crate::detector::{
    fit_origins, pad_centered, pad_stack, pattern_centers_of_mass, reshape_pattern, reshape_stack,
};
use crate::probe::ComplexProbe;
use crate::propagator::Propagator;

/// Unit of a detector pixel size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReciprocalUnits {
    InverseAngstrom,
    Milliradians,
}

/// One tilt of the series, as delivered by the calibration layer.
#[derive(Debug, Clone)]
pub struct TiltDataset {
    /// `(Rx, Ry, Qx, Qy)` intensities.
    pub intensities: Array4<f64>,
    /// Scan step in Å.
    pub scan_sampling: [f64; 2],
    pub reciprocal_sampling: [f64; 2],
    pub reciprocal_units: ReciprocalUnits,
    /// Explicit scan positions in Å, `(Rx·Ry, 2)`; a raster otherwise.
    pub scan_positions: Option<Array2<f64>>,
    /// Beam centre per position `(Rx, Ry, 2)` in padded-pattern pixels;
    /// replaces the fitted centre of mass.
    pub com_shifts: Option<Array3<f64>>,
}

impl TiltDataset {
    pub fn new(
        intensities: Array4<f64>,
        scan_sampling: [f64; 2],
        reciprocal_sampling: [f64; 2],
        reciprocal_units: ReciprocalUnits,
    ) -> Self {
        TiltDataset {
            intensities,
            scan_sampling,
            reciprocal_sampling,
            reciprocal_units,
            scan_positions: None,
            com_shifts: None,
        }
    }

    pub fn num_patterns(&self) -> usize {
        let (rx, ry, _, _) = self.intensities.dim();
        rx * ry
    }
}

/// Optional inputs shared by all tilts.
#[derive(Debug, Clone, Default)]
pub struct PreprocessInputs {
    pub vacuum_probe_intensity: Option<Array2<f64>>,
    pub detector_mask: Option<Array2<bool>>,
    pub initial_object: Option<Array3<f64>>,
    pub initial_probe: Option<Array2<Complex64>>,
}

/// Everything the reconstruction loop reads but never writes.
#[derive(Debug, Clone)]
pub struct PreprocessedData {
    /// Measured amplitudes of all tilts, `(patterns, Sx, Sy)`.
    pub amplitudes: Array3<f64>,
    /// `num_tilts + 1` running pattern offsets.
    pub cum_probes_per_tilt: Vec<usize>,
    /// Mean summed diffraction intensity per tilt.
    pub mean_intensity: Vec<f64>,
    /// Real-space pixel size in Å.
    pub sampling: [f64; 2],
    pub roi: [usize; 2],
    /// `(voxels, X, Y)`.
    pub object_shape: [usize; 3],
    pub propagator: Propagator,
    pub snapshot: InitialSnapshot,
}

impl PreprocessedData {
    pub fn tilt_amplitudes(&self, tilt: usize) -> ArrayView3<'_, f64> {
        self.amplitudes.slice(s![
            self.cum_probes_per_tilt[tilt]..self.cum_probes_per_tilt[tilt + 1],
            ..,
            ..
        ])
    }
}

/// Detector calibration after reshaping, in Å⁻¹ per pixel.
fn reciprocal_sampling_inv_angstrom(dataset: &TiltDataset, wavelength: f64) -> [f64; 2] {
    match dataset.reciprocal_units {
        ReciprocalUnits::InverseAngstrom => dataset.reciprocal_sampling,
        ReciprocalUnits::Milliradians => [
            dataset.reciprocal_sampling[0] / 1000.0 / wavelength,
            dataset.reciprocal_sampling[1] / 1000.0 / wavelength,
        ],
    }
}

/// Per-tilt conditioned patterns, before positions are known.
struct ConditionedTilt {
    amplitudes: Array3<f64>,
    mean_intensity: f64,
    reciprocal_sampling: [f64; 2],
}

fn condition_tilt(
    dataset: &TiltDataset,
    config: &PreprocessConfig,
    mask: Option<&Array2<bool>>,
    roi: [usize; 2],
    wavelength: f64,
    backend: &dyn ArrayBackend,
) -> PtychoResult<ConditionedTilt> {
    let (rx, ry, qx, qy) = dataset.intensities.dim();
    let mut sampling = reciprocal_sampling_inv_angstrom(dataset, wavelength);

    let mut intensities = match config.diffraction_intensities_shape {
        Some(shape) if shape != [qx, qy] => {
            sampling = [
                sampling[0] * qx as f64 / shape[0] as f64,
                sampling[1] * qy as f64 / shape[1] as f64,
            ];
            reshape_stack(&dataset.intensities, shape, config.reshaping_method, backend)?
        }
        _ => dataset.intensities.clone(),
    };
    if [intensities.dim().2, intensities.dim().3] != roi {
        intensities = pad_stack(&intensities, roi)?;
    }

    let origins = match &dataset.com_shifts {
        Some(forced) => {
            if forced.dim() != (rx, ry, 2) {
                return Err(PtychoError::shape_mismatch(
                    "com_shifts",
                    &[rx, ry, 2],
                    forced.shape(),
                ));
            }
            forced.clone()
        }
        None => fit_origins(&pattern_centers_of_mass(&intensities, mask), config.fit_function)?,
    };

    let mut amplitudes = Array3::zeros((rx * ry, roi[0], roi[1]));
    let mut total_intensity = 0.0;
    for i in 0..rx {
        for j in 0..ry {
            let pattern = intensities.slice(s![i, j, .., ..]).to_owned();
            let centred = bilinear_shift(&pattern, [-origins[[i, j, 0]], -origins[[i, j, 1]]]);
            total_intensity += centred.sum();
            amplitudes
                .index_axis_mut(Axis(0), i * ry + j)
                .assign(&centred.mapv(|v| v.max(0.0).sqrt()));
        }
    }
    Ok(ConditionedTilt {
        amplitudes,
        mean_intensity: total_intensity / (rx * ry).max(1) as f64,
        reciprocal_sampling: sampling,
    })
}

/// Scan positions in Å before padding, `(Rx·Ry, 2)`.
fn scan_positions_angstrom(
    dataset: &TiltDataset,
    config: &PreprocessConfig,
) -> PtychoResult<Array2<f64>> {
    let n = dataset.num_patterns();
    let transpose = config.diffraction_patterns_transpose;
    if let Some(explicit) = &dataset.scan_positions {
        if explicit.dim() != (n, 2) {
            return Err(PtychoError::shape_mismatch(
                "scan_positions",
                &[n, 2],
                explicit.shape(),
            ));
        }
        let mut positions = explicit.clone();
        if transpose {
            positions.invert_axis(Axis(1));
        }
        return Ok(positions);
    }
    let (rx, ry, _, _) = dataset.intensities.dim();
    let theta = config.diffraction_patterns_rotate_degrees.to_radians();
    let (sin, cos) = theta.sin_cos();
    let mut positions = Array2::zeros((n, 2));
    for i in 0..rx {
        for j in 0..ry {
            let x = i as f64 * dataset.scan_sampling[0];
            let y = j as f64 * dataset.scan_sampling[1];
            let (xr, yr) = (x * cos + y * sin, -x * sin + y * cos);
            let (a, b) = if transpose { (yr, xr) } else { (xr, yr) };
            positions[[i * ry + j, 0]] = a;
            positions[[i * ry + j, 1]] = b;
        }
    }
    Ok(positions)
}

/// Shift to the origin, convert to pixels and pad.
fn positions_to_pixels(
    positions: &Array2<f64>,
    sampling: [f64; 2],
    padding: [f64; 2],
) -> Array2<f64> {
    let mut out = positions.clone();
    for axis in 0..2 {
        let mut column = out.column_mut(axis);
        let min = column.iter().cloned().fold(f64::INFINITY, f64::min);
        column.mapv_inplace(|v| (v - min) / sampling[axis] + padding[axis]);
    }
    out
}

/// Centre one tilt's positions on the object's transverse centre.
fn center_positions(positions: &mut Array2<f64>, object_shape: [usize; 3]) {
    let Some(mean) = positions.mean_axis(Axis(0)) else {
        return;
    };
    let centre = [object_shape[1] as f64 / 2.0, object_shape[2] as f64 / 2.0];
    for mut row in positions.outer_iter_mut() {
        row[0] -= mean[0] - centre[0];
        row[1] -= mean[1] - centre[1];
    }
}

fn initial_probe(
    config: &PreprocessConfig,
    inputs: &PreprocessInputs,
    vacuum: Option<Array2<f64>>,
    roi: [usize; 2],
    sampling: [f64; 2],
    backend: &dyn ArrayBackend,
) -> PtychoResult<Array2<Complex64>> {
    if let Some(probe) = &inputs.initial_probe {
        if probe.dim() != (roi[0], roi[1]) {
            return Err(PtychoError::shape_mismatch("initial_probe", &roi, probe.shape()));
        }
        return Ok(probe.clone());
    }
    let mut builder = ComplexProbe::new(roi, sampling, config.energy)
        .with_aperture(config.semiangle_cutoff, config.rolloff)
        .with_aberrations(config.polar_parameters);
    if let Some(vacuum) = vacuum {
        builder = builder.with_vacuum_probe(vacuum)?;
    }
    Ok(builder.build(backend))
}

/// Run the full preprocessing pipeline over every tilt.
pub fn preprocess(
    config: &PreprocessConfig,
    datasets: &[TiltDataset],
    inputs: &PreprocessInputs,
    backend: &dyn ArrayBackend,
    progress: &ProgressBar,
) -> PtychoResult<PreprocessedData> {
    config.validate()?;
    if datasets.len() != config.num_tilts() {
        return Err(PtychoError::ConfigError(format!(
            "{} tilt angles configured but {} datasets supplied",
            config.num_tilts(),
            datasets.len()
        )));
    }
    let wavelength = electron_wavelength_angstrom(config.energy);
    let (_, _, qx, qy) = datasets[0].intensities.dim();
    let detector = config.diffraction_intensities_shape.unwrap_or([qx, qy]);
    let roi = config.probe_roi_shape.unwrap_or(detector);

    // vacuum probe and mask follow the patterns through reshaping and padding
    let vacuum = match &inputs.vacuum_probe_intensity {
        Some(v) => {
            let reshaped = reshape_pattern(&v.view(), detector, config.reshaping_method, backend)?;
            Some(pad_centered(&reshaped.view(), roi)?)
        }
        None => None,
    };
    let mask = match &inputs.detector_mask {
        Some(m) => {
            let weights = m.mapv(|b| if b { 1.0 } else { 0.0 });
            let reshaped =
                reshape_pattern(&weights.view(), detector, config.reshaping_method, backend)?;
            Some(pad_centered(&reshaped.mapv(|w| w > 0.5).view(), roi)?)
        }
        None => None,
    };

    progress.set_length(datasets.len() as u64);
    let mut conditioned = Vec::with_capacity(datasets.len());
    let mut raw_positions = Vec::with_capacity(datasets.len());
    for (t, dataset) in datasets.iter().enumerate() {
        let tilt = condition_tilt(dataset, config, mask.as_ref(), roi, wavelength, backend)?;
        log::debug!(
            "tilt {t}: {} patterns, mean intensity {:.4e}",
            tilt.amplitudes.len_of(Axis(0)),
            tilt.mean_intensity
        );
        conditioned.push(tilt);
        raw_positions.push(scan_positions_angstrom(dataset, config)?);
        progress.inc(1);
    }

    let q = conditioned[0].reciprocal_sampling;
    if conditioned.iter().any(|c| {
        (c.reciprocal_sampling[0] - q[0]).abs() > 1e-9 * q[0].abs()
            || (c.reciprocal_sampling[1] - q[1]).abs() > 1e-9 * q[1].abs()
    }) {
        return Err(PtychoError::ConfigError(
            "all tilts must share one reciprocal sampling".to_string(),
        ));
    }
    let sampling = [1.0 / (q[0] * roi[0] as f64), 1.0 / (q[1] * roi[1] as f64)];
    let padding = config
        .object_padding_px
        .unwrap_or([roi[0] as f64 / 2.0, roi[1] as f64 / 2.0]);

    let mut positions: Vec<Array2<f64>> = raw_positions
        .iter()
        .map(|p| positions_to_pixels(p, sampling, padding))
        .collect();

    let object = match &inputs.initial_object {
        Some(object) => {
            let (_, x, y) = object.dim();
            if x < roi[0] || y < roi[1] {
                return Err(PtychoError::shape_mismatch(
                    "initial_object",
                    &[y, roi[0], roi[1]],
                    object.shape(),
                ));
            }
            object.clone()
        }
        None => {
            let mut extent = [0.0f64; 2];
            for p in &positions {
                for axis in 0..2 {
                    let max = p.column(axis).iter().cloned().fold(0.0, f64::max);
                    extent[axis] = extent[axis].max(max);
                }
            }
            let p = ((extent[0] + padding[0]).round() as usize).max(roi[0]);
            let q = ((extent[1] + padding[1]).round() as usize).max(roi[1]);
            Array3::zeros((q, p, q))
        }
    };
    let (voxels, ox, oy) = object.dim();
    let object_shape = [voxels, ox, oy];
    for p in positions.iter_mut() {
        center_positions(p, object_shape);
    }

    let mut cum_probes_per_tilt = vec![0usize];
    for c in &conditioned {
        let last = cum_probes_per_tilt.last().copied().unwrap_or(0);
        cum_probes_per_tilt.push(last + c.amplitudes.len_of(Axis(0)));
    }
    let amplitude_views: Vec<_> = conditioned.iter().map(|c| c.amplitudes.view()).collect();
    let amplitudes = concatenate(Axis(0), &amplitude_views)
        .map_err(|e| PtychoError::ConfigError(format!("inconsistent pattern shapes: {e}")))?;
    let position_views: Vec<_> = positions.iter().map(|p| p.view()).collect();
    let positions_px = concatenate(Axis(0), &position_views)
        .map_err(|e| PtychoError::ConfigError(format!("inconsistent scan positions: {e}")))?;
    let mean_intensity: Vec<f64> = conditioned.iter().map(|c| c.mean_intensity).collect();

    let mut probe = initial_probe(config, inputs, vacuum, roi, sampling, backend)?;
    let target = mean_intensity.iter().sum::<f64>() / mean_intensity.len() as f64;
    let current: f64 = backend.fft2_copy(&probe).iter().map(|v| v.norm_sqr()).sum();
    if current > 0.0 {
        let scale = (target / current).sqrt();
        probe.mapv_inplace(|v| v * scale);
    }
    let probe_fft_amplitude = backend.fft2_copy(&probe).mapv(|v| v.norm());

    let thickness = voxels as f64 * sampling[1] / config.num_slices as f64;
    let propagator = Propagator::precompute(
        roi,
        sampling,
        config.energy,
        &vec![thickness; config.num_slices - 1],
    );

    progress.finish_and_clear();
    log::info!(
        "preprocessed {} tilts, {} patterns, ROI {:?}, object {:?}, sampling {:.4} Å",
        datasets.len(),
        amplitudes.len_of(Axis(0)),
        roi,
        object_shape,
        sampling[0]
    );

    Ok(PreprocessedData {
        amplitudes,
        cum_probes_per_tilt,
        mean_intensity,
        sampling,
        roi,
        object_shape,
        propagator,
        snapshot: InitialSnapshot {
            object,
            probe,
            positions_px,
            probe_fft_amplitude,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use ptycho_math::backend::CpuBackend;

    fn disc_dataset(rx: usize, ry: usize, q: usize, centre: [f64; 2]) -> TiltDataset {
        let pattern = Array2::from_shape_fn((q, q), |(i, j)| {
            let dx = i as f64 - centre[0];
            let dy = j as f64 - centre[1];
            if dx * dx + dy * dy <= 4.0 {
                2.0
            } else {
                0.0
            }
        });
        let intensities = Array4::from_shape_fn((rx, ry, q, q), |(_, _, i, j)| pattern[[i, j]]);
        TiltDataset::new(intensities, [1.0, 1.0], [0.05, 0.05], ReciprocalUnits::InverseAngstrom)
    }

    fn run(config: &PreprocessConfig, datasets: &[TiltDataset]) -> PtychoResult<PreprocessedData> {
        preprocess(
            config,
            datasets,
            &PreprocessInputs::default(),
            &CpuBackend::new(),
            &ProgressBar::hidden(),
        )
    }

    #[test]
    fn test_beam_moved_to_origin() {
        let mut config = PreprocessConfig::new(300e3, 2, vec![0.0]);
        config.semiangle_cutoff = Some(20.0);
        let data = run(&config, &[disc_dataset(2, 3, 16, [8.0, 8.0])]).unwrap();
        assert_eq!(data.amplitudes.dim(), (6, 16, 16));
        let first = data.amplitudes.index_axis(Axis(0), 0);
        assert!((first[[0, 0]] - 2f64.sqrt()).abs() < 1e-12);
        assert!(first[[8, 8]] < 1e-6);
        assert!((data.mean_intensity[0] - 2.0 * 13.0).abs() < 1e-9);
    }

    #[test]
    fn test_sampling_and_object_geometry() {
        let mut config = PreprocessConfig::new(300e3, 4, vec![0.0, 30.0]);
        config.semiangle_cutoff = Some(20.0);
        let datasets = [
            disc_dataset(4, 4, 16, [8.0, 8.0]),
            disc_dataset(4, 4, 16, [8.0, 8.0]),
        ];
        let data = run(&config, &datasets).unwrap();
        // 1 / (0.05 · 16) = 1.25 Å
        assert!((data.sampling[0] - 1.25).abs() < 1e-12);
        assert_eq!(data.cum_probes_per_tilt, vec![0, 16, 32]);
        // raster extent 3 Å = 2.4 px, padding 8 px each side
        assert_eq!(data.object_shape, [18, 18, 18]);
        assert_eq!(data.propagator.num_kernels(), 3);
        let tilt0 = data.snapshot.positions_px.slice(s![0..16, ..]);
        let mean = tilt0.mean_axis(Axis(0)).unwrap();
        assert!((mean[0] - 9.0).abs() < 1e-12 && (mean[1] - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_probe_normalized_to_mean_intensity() {
        let mut config = PreprocessConfig::new(300e3, 1, vec![0.0]);
        config.semiangle_cutoff = Some(20.0);
        let backend = CpuBackend::new();
        let data = run(&config, &[disc_dataset(2, 2, 16, [8.0, 8.0])]).unwrap();
        let power: f64 = backend
            .fft2_copy(&data.snapshot.probe)
            .iter()
            .map(|v| v.norm_sqr())
            .sum();
        assert!((power - data.mean_intensity[0]).abs() < 1e-9 * power);
        let amp_power: f64 = data.snapshot.probe_fft_amplitude.iter().map(|a| a * a).sum();
        assert!((amp_power - power).abs() < 1e-9 * power);
    }

    #[test]
    fn test_roi_padding_and_errors() {
        let mut config = PreprocessConfig::new(300e3, 1, vec![0.0]);
        config.probe_roi_shape = Some([24, 24]);
        let data = run(&config, &[disc_dataset(1, 2, 16, [8.0, 8.0])]).unwrap();
        assert_eq!(data.roi, [24, 24]);
        assert_eq!(data.snapshot.probe.dim(), (24, 24));

        config.probe_roi_shape = Some([8, 8]);
        assert!(matches!(
            run(&config, &[disc_dataset(1, 2, 16, [8.0, 8.0])]),
            Err(PtychoError::ConfigError(_))
        ));

        let two_tilts = PreprocessConfig::new(300e3, 1, vec![0.0, 10.0]);
        assert!(matches!(
            run(&two_tilts, &[disc_dataset(1, 2, 16, [8.0, 8.0])]),
            Err(PtychoError::ConfigError(_))
        ));
    }

    #[test]
    fn test_forced_origins_and_explicit_positions() {
        let config = PreprocessConfig::new(300e3, 1, vec![0.0]);
        let mut dataset = disc_dataset(1, 2, 8, [0.0, 0.0]);
        dataset.com_shifts = Some(Array3::zeros((1, 2, 2)));
        dataset.scan_positions = Some(array![[0.0, 0.0], [2.0, 1.0]]);
        let data = run(&config, &[dataset]).unwrap();
        let first = data.amplitudes.index_axis(Axis(0), 0);
        assert!((first[[0, 0]] - 2f64.sqrt()).abs() < 1e-12);
        let p = &data.snapshot.positions_px;
        // sampling 1 / (0.05 · 8) = 2.5 Å
        assert!(((p[[1, 0]] - p[[0, 0]]) - 0.8).abs() < 1e-12);
        assert!(((p[[1, 1]] - p[[0, 1]]) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_milliradian_calibration() {
        let mut config = PreprocessConfig::new(300e3, 1, vec![0.0]);
        config.semiangle_cutoff = Some(20.0);
        let mut dataset = disc_dataset(1, 1, 16, [8.0, 8.0]);
        dataset.reciprocal_units = ReciprocalUnits::Milliradians;
        dataset.reciprocal_sampling = [1.0, 1.0];
        let data = run(&config, &[dataset]).unwrap();
        let lambda = electron_wavelength_angstrom(300e3);
        let expected = 1.0 / (1e-3 / lambda * 16.0);
        assert!((data.sampling[0] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_initial_probe_shape_checked() {
        let config = PreprocessConfig::new(300e3, 1, vec![0.0]);
        let inputs = PreprocessInputs {
            initial_probe: Some(Array2::zeros((4, 4))),
            ..Default::default()
        };
        let err = preprocess(
            &config,
            &[disc_dataset(1, 1, 8, [4.0, 4.0])],
            &inputs,
            &CpuBackend::new(),
            &ProgressBar::hidden(),
        )
        .unwrap_err();
        assert!(matches!(err, PtychoError::ShapeMismatch { .. }));
    }
}
