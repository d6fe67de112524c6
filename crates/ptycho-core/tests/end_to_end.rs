// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — End-to-End Reconstruction Tests
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Full preprocess + reconstruct runs on small synthetic tilt series.

use std::sync::Arc;

use ndarray::{Array2, Array3, Array4};
use num_complex::Complex64;
use ptycho_core::constraints::{support_mask, ConstraintEngine};
use ptycho_core::driver::OverlapTomography;
use ptycho_core::preprocess::{PreprocessInputs, ReciprocalUnits, TiltDataset};
use ptycho_math::backend::{ArrayBackend, CpuBackend};
use ptycho_types::config::{PreprocessConfig, ReconstructConfig};
use ptycho_types::error::PtychoError;
use ptycho_types::method::ReconstructionParameter;
use ptycho_types::state::DriverPhase;

const N: usize = 8;

/// Smooth complex probe centred on the field.
fn model_probe() -> Array2<Complex64> {
    Array2::from_shape_fn((N, N), |(i, j)| {
        let dx = i as f64 - (N / 2) as f64;
        let dy = j as f64 - (N / 2) as f64;
        Complex64::from_polar((-(dx * dx + dy * dy) / 6.0).exp(), 0.1 * dx)
    })
}

/// Patterns of an empty specimen: every scan position sees `|fft2(probe)|²`
/// with the beam already at the FFT origin.
fn empty_specimen(probe: &Array2<Complex64>) -> TiltDataset {
    let spectrum = CpuBackend::new().fft2_copy(probe);
    let pattern = spectrum.mapv(|v| v.norm_sqr());
    let intensities = Array4::from_shape_fn((3, 3, N, N), |(_, _, i, j)| pattern[[i, j]]);
    // 1 / (0.125 · 8) = 1 Å per pixel, so 2 Å steps land on whole pixels
    let mut dataset = TiltDataset::new(
        intensities,
        [2.0, 2.0],
        [0.125, 0.125],
        ReciprocalUnits::InverseAngstrom,
    );
    dataset.com_shifts = Some(Array3::zeros((3, 3, 2)));
    dataset
}

fn ring_dataset() -> TiltDataset {
    let intensities = Array4::from_shape_fn((2, 3, N, N), |(a, b, i, j)| {
        let r = i.abs_diff(4) + j.abs_diff(4);
        if r == 2 {
            1.0 + 0.1 * (a + b) as f64
        } else if r < 2 {
            0.5
        } else {
            0.0
        }
    });
    TiltDataset::new(intensities, [1.0, 1.0], [0.1, 0.1], ReciprocalUnits::InverseAngstrom)
}

fn config(num_slices: usize, tilts: Vec<f64>) -> PreprocessConfig {
    let mut config = PreprocessConfig::new(300e3, num_slices, tilts);
    config.progress_bar = false;
    config
}

fn quiet(method: &str, max_iter: usize) -> ReconstructConfig {
    ReconstructConfig {
        max_iter,
        reconstruction_method: method.to_string(),
        progress_bar: false,
        seed_random: Some(5),
        ..Default::default()
    }
}

fn exact_driver() -> OverlapTomography {
    let probe = model_probe();
    let inputs = PreprocessInputs {
        initial_probe: Some(probe.clone()),
        ..Default::default()
    };
    let mut driver = OverlapTomography::new(config(1, vec![0.0]), vec![empty_specimen(&probe)])
        .unwrap()
        .with_inputs(inputs);
    driver.preprocess().unwrap();
    driver
}

// ── Exact Model ──────────────────────────────────────────────────────

#[test]
fn test_gradient_descent_exact_model_has_zero_error() {
    let mut driver = exact_driver();
    assert_eq!(driver.preprocessed().unwrap().object_shape, [12, 12, 12]);
    driver.reconstruct(&quiet("GD", 1)).unwrap();
    let error = driver.error().unwrap();
    assert!(error.abs() < 1e-10, "error {error}");
    let object_max = driver.object().unwrap().iter().cloned().fold(0.0, f64::max);
    assert!(object_max < 1e-8, "object drifted to {object_max}");
}

#[test]
fn test_difference_map_exact_model_has_zero_error() {
    let mut driver = exact_driver();
    driver.reconstruct(&quiet("DM_AP", 1)).unwrap();
    assert!(driver.error().unwrap().abs() < 1e-10);
}

#[test]
fn test_multi_tilt_multislice_run_stays_finite() {
    let mut driver =
        OverlapTomography::new(config(3, vec![-10.0, 10.0]), vec![ring_dataset(), ring_dataset()])
            .unwrap();
    driver.preprocess().unwrap();
    let mut options = quiet("GD", 3);
    options.max_batch_size = Some(4);
    options.store_iterations = true;
    driver.reconstruct(&options).unwrap();

    assert_eq!(driver.phase(), DriverPhase::Finished);
    let history = driver.history().unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.errors.iter().all(|e| e.is_finite() && *e >= 0.0));
    assert!(driver.object().unwrap().iter().all(|v| v.is_finite()));
    assert!(driver.probe().unwrap().iter().all(|v| v.is_finite()));
}

// ── Constraints Through the Driver ───────────────────────────────────

#[test]
fn test_positivity_applied_after_iteration() {
    let inputs = PreprocessInputs {
        initial_object: Some(Array3::from_elem((10, 10, 10), -0.5)),
        ..Default::default()
    };
    let mut driver = OverlapTomography::new(config(2, vec![0.0]), vec![ring_dataset()])
        .unwrap()
        .with_inputs(inputs);
    driver.preprocess().unwrap();
    driver.reconstruct(&quiet("GD", 1)).unwrap();
    assert!(driver.object().unwrap().iter().all(|&v| v >= 0.0));
}

#[test]
fn test_probe_fourier_amplitude_held_fixed() {
    let mut driver = OverlapTomography::new(config(1, vec![0.0]), vec![ring_dataset()]).unwrap();
    driver.preprocess().unwrap();
    let initial = driver.preprocessed().unwrap().snapshot.probe_fft_amplitude.clone();

    let mut options = quiet("GD", 2);
    options.fix_probe_fourier_amplitude_iter = 2;
    options.fix_com = false;
    options.probe_support_relative_radius = 1000.0;
    driver.reconstruct(&options).unwrap();

    let amplitude = CpuBackend::new()
        .fft2_copy(driver.probe().unwrap())
        .mapv(|v| v.norm());
    for (a, b) in amplitude.iter().zip(initial.iter()) {
        assert!((a - b).abs() < 1e-9 * (1.0 + b));
    }
}

#[test]
fn test_positivity_leaves_non_negative_entries() {
    let engine = ConstraintEngine::new(
        Arc::new(CpuBackend::new()),
        [1.0, 1.0],
        support_mask([N, N], 1.0, 10.0),
        Array2::ones((N, N)),
    );
    let mut object = Array3::from_shape_fn((3, 4, 5), |(k, i, j)| {
        (k as f64 - 1.0) * 0.7 + (i as f64 - j as f64) * 0.3
    });
    let before = object.clone();
    engine.positivity(&mut object);
    for (a, b) in object.iter().zip(before.iter()) {
        if *b >= 0.0 {
            assert_eq!(a, b);
        } else {
            assert_eq!(*a, 0.0);
        }
    }
}

#[test]
fn test_fourier_amplitude_fix_restores_magnitude_keeps_phase() {
    let backend = CpuBackend::new();
    let initial = model_probe();
    let target = backend.fft2_copy(&initial).mapv(|v| v.norm());
    let engine = ConstraintEngine::new(
        Arc::new(CpuBackend::new()),
        [1.0, 1.0],
        support_mask([N, N], 1.0, 10.0),
        target.clone(),
    );

    // arbitrary phase, wrong magnitude
    let spectrum = Array2::from_shape_fn((N, N), |(i, j)| {
        Complex64::from_polar(0.2 + (i + 2 * j) as f64 * 0.05, 0.37 * (i * j) as f64 - 1.0)
    });
    let phases = spectrum.mapv(|v| v.arg());
    let probe = backend.ifft2_copy(&spectrum);

    let fixed = backend.fft2_copy(&engine.probe_fourier_amplitude(&probe));
    for ((f, &a), &phi) in fixed.iter().zip(target.iter()).zip(phases.iter()) {
        assert!((f.norm() - a).abs() < 1e-10);
        if a > 1e-6 {
            let d = (f.arg() - phi).rem_euclid(2.0 * std::f64::consts::PI);
            assert!(d < 1e-8 || 2.0 * std::f64::consts::PI - d < 1e-8);
        }
    }
}

// ── Configuration Errors ─────────────────────────────────────────────

fn preprocessed_ring() -> OverlapTomography {
    let mut driver = OverlapTomography::new(config(1, vec![0.0]), vec![ring_dataset()]).unwrap();
    driver.preprocess().unwrap();
    driver
}

#[test]
fn test_invalid_parameters_rejected_before_work() {
    let mut driver = preprocessed_ring();

    let mut dm = quiet("DM_AP", 1);
    dm.reconstruction_parameter = ReconstructionParameter::Scalar(1.5);
    assert!(matches!(
        driver.reconstruct(&dm),
        Err(PtychoError::InvalidParameter { .. })
    ));

    let mut raar = quiet("RAAR", 1);
    raar.reconstruction_parameter = ReconstructionParameter::Scalar(-0.1);
    assert!(matches!(
        driver.reconstruct(&raar),
        Err(PtychoError::InvalidParameter { .. })
    ));

    let mut batched = quiet("RRR", 1);
    batched.max_batch_size = Some(2);
    assert!(matches!(driver.reconstruct(&batched), Err(PtychoError::ConfigError(_))));

    assert!(matches!(
        driver.reconstruct(&quiet("ePIE", 1)),
        Err(PtychoError::ConfigError(_))
    ));

    // nothing above ran an iteration
    assert_eq!(driver.phase(), DriverPhase::Preprocessed);
    assert!(driver.error().is_none());
}

#[test]
fn test_unknown_device_rejected() {
    let mut bad = config(1, vec![0.0]);
    bad.device = "cuda".to_string();
    assert!(OverlapTomography::new(bad, vec![ring_dataset()]).is_err());
}

#[test]
fn test_reconstruct_requires_preprocess() {
    let mut driver = OverlapTomography::new(config(1, vec![0.0]), vec![ring_dataset()]).unwrap();
    assert!(matches!(
        driver.reconstruct(&quiet("GD", 1)),
        Err(PtychoError::StateError(_))
    ));
    assert!(driver.object().is_none());
}
