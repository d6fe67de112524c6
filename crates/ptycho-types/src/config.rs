// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use crate::error::{PtychoError, PtychoResult};
use crate::method::{ReconstructionMethod, ReconstructionParameter};
use serde::{Deserialize, Serialize};

/// Experiment and preprocessing configuration, fixed for the lifetime of a
/// reconstruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Accelerating energy in eV.
    pub energy: f64,
    /// Number of slices in the multislice forward model.
    pub num_slices: usize,
    /// One entry per tilt of the series, in degrees.
    pub tilt_angles_deg: Vec<f64>,
    /// Probe-forming aperture semiangle in mrad. `None` with a vacuum probe.
    #[serde(default)]
    pub semiangle_cutoff: Option<f64>,
    /// Aperture edge rolloff in mrad.
    #[serde(default = "default_rolloff")]
    pub rolloff: f64,
    #[serde(default)]
    pub polar_parameters: PolarParameters,
    /// Resample diffraction patterns to this detector shape.
    #[serde(default)]
    pub diffraction_intensities_shape: Option<[usize; 2]>,
    #[serde(default)]
    pub reshaping_method: ReshapingMethod,
    /// Zero-pad diffraction patterns to this region of interest.
    #[serde(default)]
    pub probe_roi_shape: Option<[usize; 2]>,
    /// Object padding in pixels; defaults to half the ROI.
    #[serde(default)]
    pub object_padding_px: Option<[f64; 2]>,
    #[serde(default)]
    pub fit_function: FitFunction,
    /// Relative rotation between scan and detector axes, degrees.
    #[serde(default)]
    pub diffraction_patterns_rotate_degrees: f64,
    #[serde(default)]
    pub diffraction_patterns_transpose: bool,
    /// Either "cpu" or "gpu".
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_true")]
    pub progress_bar: bool,
}

/// Probe aberration coefficients (Å and rad).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PolarParameters {
    #[serde(rename = "C10", default)]
    pub c10: f64,
    #[serde(rename = "C12", default)]
    pub c12: f64,
    #[serde(rename = "phi12", default)]
    pub phi12: f64,
    #[serde(rename = "C21", default)]
    pub c21: f64,
    #[serde(rename = "phi21", default)]
    pub phi21: f64,
    #[serde(rename = "C23", default)]
    pub c23: f64,
    #[serde(rename = "phi23", default)]
    pub phi23: f64,
    #[serde(rename = "C30", default)]
    pub c30: f64,
}

impl PolarParameters {
    /// Defocus convenience constructor (`C10 = -defocus`).
    pub fn with_defocus(defocus: f64) -> Self {
        PolarParameters {
            c10: -defocus,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReshapingMethod {
    #[default]
    Fourier,
    Bilinear,
    Bin,
}

/// Surface fitted to the per-pattern centre of mass across the scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitFunction {
    #[default]
    Plane,
    Parabola,
    Constant,
}

fn default_rolloff() -> f64 {
    2.0
}
fn default_device() -> String {
    "cpu".to_string()
}
fn default_true() -> bool {
    true
}

impl PreprocessConfig {
    /// Minimal configuration; every optional field takes its default.
    pub fn new(energy: f64, num_slices: usize, tilt_angles_deg: Vec<f64>) -> Self {
        PreprocessConfig {
            energy,
            num_slices,
            tilt_angles_deg,
            semiangle_cutoff: None,
            rolloff: default_rolloff(),
            polar_parameters: PolarParameters::default(),
            diffraction_intensities_shape: None,
            reshaping_method: ReshapingMethod::default(),
            probe_roi_shape: None,
            object_padding_px: None,
            fit_function: FitFunction::default(),
            diffraction_patterns_rotate_degrees: 0.0,
            diffraction_patterns_transpose: false,
            device: default_device(),
            progress_bar: true,
        }
    }

    pub fn from_file(path: &str) -> PtychoResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn num_tilts(&self) -> usize {
        self.tilt_angles_deg.len()
    }

    pub fn validate(&self) -> PtychoResult<()> {
        if !self.energy.is_finite() || self.energy <= 0.0 {
            return Err(PtychoError::ConfigError(
                "energy must be finite and > 0".to_string(),
            ));
        }
        if self.num_slices == 0 {
            return Err(PtychoError::ConfigError(
                "num_slices must be >= 1".to_string(),
            ));
        }
        if self.tilt_angles_deg.is_empty() {
            return Err(PtychoError::ConfigError(
                "tilt_angles_deg must contain at least one tilt".to_string(),
            ));
        }
        if self.tilt_angles_deg.iter().any(|a| !a.is_finite()) {
            return Err(PtychoError::ConfigError(
                "tilt_angles_deg must be finite".to_string(),
            ));
        }
        if !self.rolloff.is_finite() || self.rolloff < 0.0 {
            return Err(PtychoError::ConfigError(
                "rolloff must be finite and >= 0".to_string(),
            ));
        }
        if let Some(cutoff) = self.semiangle_cutoff {
            if cutoff.is_nan() || cutoff <= 0.0 {
                return Err(PtychoError::ConfigError(
                    "semiangle_cutoff must be > 0".to_string(),
                ));
            }
        }
        for shape in [self.diffraction_intensities_shape, self.probe_roi_shape]
            .iter()
            .flatten()
        {
            if shape[0] == 0 || shape[1] == 0 {
                return Err(PtychoError::ConfigError(format!(
                    "detector shapes must be non-empty, got {shape:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Options of a single `reconstruct()` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructConfig {
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_method")]
    pub reconstruction_method: String,
    #[serde(default)]
    pub reconstruction_parameter: ReconstructionParameter,
    /// Patterns per update; `None` processes a whole tilt per update.
    #[serde(default)]
    pub max_batch_size: Option<usize>,
    #[serde(default)]
    pub seed_random: Option<u64>,
    #[serde(default = "default_step_size")]
    pub step_size: f64,
    /// Illumination-normalisation floor as a fraction of the maximum.
    #[serde(default = "default_normalization_min")]
    pub normalization_min: f64,
    #[serde(default = "default_step_size")]
    pub positions_step_size: f64,
    #[serde(default = "default_true")]
    pub fix_com: bool,
    #[serde(default)]
    pub fix_probe_iter: usize,
    #[serde(default)]
    pub fix_probe_fourier_amplitude_iter: usize,
    #[serde(default = "default_never")]
    pub fix_positions_iter: usize,
    #[serde(default = "default_true")]
    pub global_affine_transformation: bool,
    #[serde(default = "default_support_radius")]
    pub probe_support_relative_radius: f64,
    #[serde(default = "default_supergaussian_degree")]
    pub probe_support_supergaussian_degree: f64,
    #[serde(default)]
    pub gaussian_filter_sigma: Option<f64>,
    #[serde(default = "default_never")]
    pub gaussian_filter_iter: usize,
    #[serde(default = "default_never")]
    pub butterworth_filter_iter: usize,
    /// Low-pass cutoff in Å⁻¹.
    #[serde(default)]
    pub q_lowpass: Option<f64>,
    /// High-pass cutoff in Å⁻¹.
    #[serde(default)]
    pub q_highpass: Option<f64>,
    #[serde(default)]
    pub store_iterations: bool,
    #[serde(default = "default_true")]
    pub progress_bar: bool,
    /// `Some(true)` rewinds to the initial snapshot, `None` resumes with a
    /// warning, `Some(false)` resumes silently.
    #[serde(default)]
    pub reset: Option<bool>,
}

fn default_max_iter() -> usize {
    64
}
fn default_method() -> String {
    "gradient-descent".to_string()
}
fn default_step_size() -> f64 {
    0.9
}
fn default_normalization_min() -> f64 {
    1.0
}
fn default_never() -> usize {
    usize::MAX
}
fn default_support_radius() -> f64 {
    1.0
}
fn default_supergaussian_degree() -> f64 {
    10.0
}

impl Default for ReconstructConfig {
    fn default() -> Self {
        ReconstructConfig {
            max_iter: default_max_iter(),
            reconstruction_method: default_method(),
            reconstruction_parameter: ReconstructionParameter::default(),
            max_batch_size: None,
            seed_random: None,
            step_size: default_step_size(),
            normalization_min: default_normalization_min(),
            positions_step_size: default_step_size(),
            fix_com: true,
            fix_probe_iter: 0,
            fix_probe_fourier_amplitude_iter: 0,
            fix_positions_iter: default_never(),
            global_affine_transformation: true,
            probe_support_relative_radius: default_support_radius(),
            probe_support_supergaussian_degree: default_supergaussian_degree(),
            gaussian_filter_sigma: None,
            gaussian_filter_iter: default_never(),
            butterworth_filter_iter: default_never(),
            q_lowpass: None,
            q_highpass: None,
            store_iterations: false,
            progress_bar: true,
            reset: None,
        }
    }
}

impl ReconstructConfig {
    pub fn from_file(path: &str) -> PtychoResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Resolve the configured method without touching any array.
    pub fn method(&self) -> PtychoResult<ReconstructionMethod> {
        ReconstructionMethod::from_name(&self.reconstruction_method, self.reconstruction_parameter)
    }

    /// Full validation; returns the resolved method on success.
    pub fn validate(&self) -> PtychoResult<ReconstructionMethod> {
        let method = self.method()?;
        if let Some(batch) = self.max_batch_size {
            if method.uses_projection_scheme() {
                return Err(PtychoError::ConfigError(format!(
                    "Stochastic object/probe updating is inconsistent with {method}. \
                     Use reconstruction_method='GD' or set max_batch_size=None."
                )));
            }
            if batch == 0 {
                return Err(PtychoError::ConfigError(
                    "max_batch_size must be >= 1".to_string(),
                ));
            }
        }
        if !method.uses_projection_scheme()
            && (!self.step_size.is_finite() || self.step_size <= 0.0)
        {
            return Err(PtychoError::ConfigError(
                "step_size must be finite and > 0".to_string(),
            ));
        }
        if !self.normalization_min.is_finite() || !(0.0..=1.0).contains(&self.normalization_min)
        {
            return Err(PtychoError::ConfigError(
                "normalization_min must be in [0, 1]".to_string(),
            ));
        }
        if !self.positions_step_size.is_finite() {
            return Err(PtychoError::ConfigError(
                "positions_step_size must be finite".to_string(),
            ));
        }
        if !self.probe_support_relative_radius.is_finite()
            || self.probe_support_relative_radius <= 0.0
        {
            return Err(PtychoError::ConfigError(
                "probe_support_relative_radius must be > 0".to_string(),
            ));
        }
        if let Some(sigma) = self.gaussian_filter_sigma {
            if !sigma.is_finite() || sigma < 0.0 {
                return Err(PtychoError::ConfigError(
                    "gaussian_filter_sigma must be finite and >= 0".to_string(),
                ));
            }
        }
        for (name, q) in [("q_lowpass", self.q_lowpass), ("q_highpass", self.q_highpass)] {
            if let Some(q) = q {
                if !q.is_finite() || q <= 0.0 {
                    return Err(PtychoError::ConfigError(format!(
                        "{name} must be finite and > 0"
                    )));
                }
            }
        }
        Ok(method)
    }
}
