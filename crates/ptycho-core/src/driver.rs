// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — Reconstruction Driver
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Iteration, tilt and batch control flow.
//!
//! Per iteration and tilt:
//! 1. rotate the object into the tilt frame
//! 2. resample it to `num_slices` working slices
//! 3. order the patterns (shuffled for gradient descent) and batch them
//! 4. overlap, Fourier projection, adjoint, optional position correction
//! 5. fold the sliced update back into the voxel volume and rotate it out
//! 6. apply the constraints
//!
//! The stored volume never leaves the lab frame. Each pass works on a
//! rotated copy and only the rotated-back update is added to the volume.

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{s, Array2, Array3, Axis};
use num_complex::Complex64;
use ptycho_math::backend::{create_backend, ArrayBackend};
use ptycho_types::config::{PreprocessConfig, ReconstructConfig};
use ptycho_types::error::{PtychoError, PtychoResult};
use ptycho_types::method::ReconstructionMethod;
use ptycho_types::state::{DriverPhase, IterationHistory, ReconstructionState, TiltState};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::adjoint::{gradient_descent_adjoint, projection_set_adjoint, AdjointParams};
use crate::batching::{generate_batches, Permutation};
use crate::constraints::{
    positions_affine, positions_center_of_mass, support_mask, ConstraintEngine, ConstraintFlags,
};
use crate::fourier::{gradient_descent_projection, projection_set_projection};
use crate::overlap::{overlap_projection, PatchGeometry};
use crate::positions::position_correction;
use crate::preprocess::{preprocess, PreprocessInputs, PreprocessedData, TiltDataset};

fn progress_bar(len: u64, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("█▓░"));
    }
    pb
}

/// Read-only inputs of one tilt pass.
struct PassContext<'a> {
    data: &'a PreprocessedData,
    options: &'a ReconstructConfig,
    method: ReconstructionMethod,
    backend: &'a dyn ArrayBackend,
    num_slices: usize,
    iteration: usize,
}

impl PassContext<'_> {
    fn fix_probe(&self) -> bool {
        self.iteration < self.options.fix_probe_iter
    }

    fn correct_positions(&self) -> bool {
        self.iteration >= self.options.fix_positions_iter
    }

    fn constraint_flags(&self) -> ConstraintFlags {
        let o = self.options;
        let a0 = self.iteration;
        let band = o.q_lowpass.is_some() || o.q_highpass.is_some();
        ConstraintFlags {
            gaussian_sigma: o.gaussian_filter_sigma.filter(|_| a0 < o.gaussian_filter_iter),
            butterworth: (a0 < o.butterworth_filter_iter && band)
                .then_some((o.q_lowpass, o.q_highpass)),
            fix_probe_fourier_amplitude: a0 < o.fix_probe_fourier_amplitude_iter,
            fix_probe_com: o.fix_com && !self.fix_probe(),
            fix_positions_com: self.correct_positions(),
            global_affine: self.correct_positions() && o.global_affine_transformation,
        }
    }
}

/// One tilt of one iteration. Returns the tilt's error, the sum of its
/// batch errors.
fn tilt_pass(
    ctx: &PassContext<'_>,
    tilt: TiltState,
    state: &mut ReconstructionState,
    engine: &ConstraintEngine,
    rng: &mut StdRng,
) -> PtychoResult<f64> {
    let backend = ctx.backend;
    let data = ctx.data;
    let [voxels, ox, oy] = data.object_shape;
    let n = tilt.num_patterns();

    if ctx.method.uses_projection_scheme() {
        if let Some(memory) = state.exit_waves[tilt.index].as_ref() {
            let expected = [ctx.num_slices, n, data.roi[0], data.roi[1]];
            if memory.shape() != &expected[..] {
                return Err(PtychoError::shape_mismatch(
                    "exit-wave memory",
                    &expected,
                    memory.shape(),
                ));
            }
        }
    }

    let rotated = backend.rotate_volume(&state.object, tilt.angle_deg);
    let old_sliced = backend.resample_depth(&rotated, ctx.num_slices);
    let mut sliced = old_sliced.clone();

    let permutation = if ctx.method.uses_projection_scheme() {
        Permutation::identity(n)
    } else {
        Permutation::shuffled(n, rng)
    };
    let mut positions = permutation.gather_rows(&tilt.positions(&state.positions_px));
    let amplitudes = permutation.gather_patterns(&data.tilt_amplitudes(tilt.index));
    let mean_intensity = data.mean_intensity[tilt.index];

    let params = AdjointParams {
        step_size: ctx.options.step_size,
        normalization_min: ctx.options.normalization_min,
        fix_probe: ctx.fix_probe(),
    };
    let mut memory = state.exit_waves[tilt.index].take();
    let mut error = 0.0;

    for batch in generate_batches(n, ctx.options.max_batch_size) {
        let geometry = PatchGeometry::new(
            &positions.slice(s![batch.clone(), ..]),
            data.roi,
            [ox, oy],
        );
        let batch_amplitudes = amplitudes.slice(s![batch.clone(), .., ..]);
        let stack = overlap_projection(&sliced, &state.probe, &geometry, &data.propagator, backend);

        let batch_error = match ctx.method.coefficients() {
            None => {
                let projection =
                    gradient_descent_projection(&batch_amplitudes, &stack, mean_intensity, backend);
                gradient_descent_adjoint(
                    &mut sliced,
                    &mut state.probe,
                    &stack,
                    projection.exit_waves,
                    &geometry,
                    &data.propagator,
                    params,
                    backend,
                );
                projection.error
            }
            Some(coefficients) => {
                let projection = projection_set_projection(
                    &batch_amplitudes,
                    &stack,
                    memory.take(),
                    coefficients,
                    mean_intensity,
                    backend,
                );
                let mut exit_waves = projection.exit_waves;
                projection_set_adjoint(
                    &mut sliced,
                    &mut state.probe,
                    &stack,
                    &mut exit_waves,
                    &geometry,
                    &data.propagator,
                    params,
                    backend,
                );
                memory = Some(exit_waves);
                projection.error
            }
        };

        if ctx.correct_positions() {
            position_correction(
                &sliced.index_axis(Axis(0), ctx.num_slices - 1),
                &stack,
                &batch_amplitudes,
                &geometry,
                positions.slice_mut(s![batch.clone(), ..]),
                ctx.options.positions_step_size,
                backend,
            );
        }
        log::debug!(
            "tilt {} batch {:?}: error {:.6e}",
            tilt.index,
            batch,
            batch_error
        );
        error += batch_error;
    }
    if ctx.method.uses_projection_scheme() {
        state.exit_waves[tilt.index] = memory;
    }

    // fold the sliced update back, then leave the tilt frame
    let delta = &sliced - &old_sliced;
    let expanded = backend.resample_depth(&delta, voxels);
    state.object += &backend.rotate_volume(&expanded, -tilt.angle_deg);

    let restored = permutation.scatter_rows(&positions.view());
    state
        .positions_px
        .slice_mut(s![tilt.start..tilt.end, ..])
        .assign(&restored);

    let flags = ctx.constraint_flags();
    engine.apply(&mut state.object, &mut state.probe, &flags);
    if flags.fix_positions_com {
        let initial = tilt.positions(&data.snapshot.positions_px);
        let window = state.positions_px.slice_mut(s![tilt.start..tilt.end, ..]);
        positions_center_of_mass(window, &initial);
        if flags.global_affine {
            let window = state.positions_px.slice_mut(s![tilt.start..tilt.end, ..]);
            positions_affine(window, &initial)?;
        }
    }
    Ok(error)
}

/// Multislice overlap-tomography reconstruction over a tilt series.
pub struct OverlapTomography {
    config: PreprocessConfig,
    backend: Arc<dyn ArrayBackend>,
    datasets: Vec<TiltDataset>,
    inputs: PreprocessInputs,
    phase: DriverPhase,
    data: Option<PreprocessedData>,
    state: Option<ReconstructionState>,
}

impl OverlapTomography {
    /// Validate the configuration and bind the device backend.
    pub fn new(config: PreprocessConfig, datasets: Vec<TiltDataset>) -> PtychoResult<Self> {
        config.validate()?;
        let backend = create_backend(&config.device)?;
        Self::with_backend(config, datasets, backend)
    }

    pub fn with_backend(
        config: PreprocessConfig,
        datasets: Vec<TiltDataset>,
        backend: Arc<dyn ArrayBackend>,
    ) -> PtychoResult<Self> {
        config.validate()?;
        if datasets.len() != config.num_tilts() {
            return Err(PtychoError::ConfigError(format!(
                "{} tilt angles configured but {} datasets supplied",
                config.num_tilts(),
                datasets.len()
            )));
        }
        Ok(OverlapTomography {
            config,
            backend,
            datasets,
            inputs: PreprocessInputs::default(),
            phase: DriverPhase::Uninitialized,
            data: None,
            state: None,
        })
    }

    /// Vacuum probe, detector mask and initial guesses.
    pub fn with_inputs(mut self, inputs: PreprocessInputs) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn phase(&self) -> DriverPhase {
        self.phase
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    pub fn preprocessed(&self) -> Option<&PreprocessedData> {
        self.data.as_ref()
    }

    /// One-time conditioning of every tilt.
    pub fn preprocess(&mut self) -> PtychoResult<&mut Self> {
        if self.phase != DriverPhase::Uninitialized {
            return Err(PtychoError::StateError(
                "preprocess() has already been called on this reconstruction".to_string(),
            ));
        }
        let progress = progress_bar(self.datasets.len() as u64, self.config.progress_bar);
        let data = preprocess(
            &self.config,
            &self.datasets,
            &self.inputs,
            self.backend.as_ref(),
            &progress,
        )?;
        self.state = Some(ReconstructionState::from_snapshot(
            &data.snapshot,
            self.config.num_tilts(),
        ));
        self.data = Some(data);
        self.phase = DriverPhase::Preprocessed;
        Ok(self)
    }

    /// Run `options.max_iter` iterations over the whole tilt series.
    ///
    /// The iteration error is the sum of all batch errors over all tilts.
    /// On error the phase returns to what it was before the call; object,
    /// probe and positions may already hold a partial pass.
    pub fn reconstruct(&mut self, options: &ReconstructConfig) -> PtychoResult<&mut Self> {
        let method = options.validate()?;
        let (Some(data), Some(state)) = (self.data.as_ref(), self.state.as_mut()) else {
            return Err(PtychoError::StateError(
                "preprocess() must be called before reconstruct()".to_string(),
            ));
        };

        match options.reset {
            Some(true) => {
                state.reset_to(&data.snapshot);
                state.error = None;
                state.history = None;
            }
            None if state.error.is_some() => {
                log::warn!(
                    "Continuing reconstruction from previous result. Use reset=True for a fresh start."
                );
            }
            None => state.clear_exit_waves(),
            Some(false) => {}
        }
        if options.store_iterations && state.history.is_none() {
            state.history = Some(IterationHistory::default());
        }

        let engine = ConstraintEngine::new(
            self.backend.clone(),
            data.sampling,
            support_mask(
                data.roi,
                options.probe_support_relative_radius,
                options.probe_support_supergaussian_degree,
            ),
            data.snapshot.probe_fft_amplitude.clone(),
        );
        let mut rng = match options.seed_random {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        log::info!(
            "reconstructing with {method}: {} iterations, {} tilts, {} slices, batch {:?}",
            options.max_iter,
            self.config.num_tilts(),
            self.config.num_slices,
            options.max_batch_size
        );
        let resume = self.phase;
        self.phase = DriverPhase::Reconstructing;
        let progress = progress_bar(options.max_iter as u64, options.progress_bar);

        for iteration in 0..options.max_iter {
            let ctx = PassContext {
                data,
                options,
                method,
                backend: self.backend.as_ref(),
                num_slices: self.config.num_slices,
                iteration,
            };
            let mut error = 0.0;
            for (index, &angle) in self.config.tilt_angles_deg.iter().enumerate() {
                let tilt = TiltState::new(index, angle, &data.cum_probes_per_tilt);
                match tilt_pass(&ctx, tilt, state, &engine, &mut rng) {
                    Ok(tilt_error) => error += tilt_error,
                    Err(e) => {
                        progress.finish_and_clear();
                        self.phase = resume;
                        return Err(e);
                    }
                }
            }

            state.error = Some(error);
            if let Some(history) = state.history.as_mut().filter(|_| options.store_iterations) {
                history.push(&state.object, &state.probe, error);
            }
            log::info!("iteration {iteration}: error {error:.6e}");
            progress.set_message(format!("error {error:.4e}"));
            progress.inc(1);
        }
        progress.finish_and_clear();
        self.phase = DriverPhase::Finished;
        Ok(self)
    }

    pub fn state(&self) -> Option<&ReconstructionState> {
        self.state.as_ref()
    }

    pub fn object(&self) -> Option<&Array3<f64>> {
        self.state.as_ref().map(|s| &s.object)
    }

    pub fn probe(&self) -> Option<&Array2<Complex64>> {
        self.state.as_ref().map(|s| &s.probe)
    }

    pub fn error(&self) -> Option<f64> {
        self.state.as_ref().and_then(|s| s.error)
    }

    /// Current scan positions in Å.
    pub fn positions(&self) -> Option<Array2<f64>> {
        let (data, state) = (self.data.as_ref()?, self.state.as_ref()?);
        let mut out = state.positions_px.clone();
        for (axis, mut column) in out.columns_mut().into_iter().enumerate() {
            column *= data.sampling[axis];
        }
        Some(out)
    }

    pub fn history(&self) -> Option<&IterationHistory> {
        self.state.as_ref().and_then(|s| s.history.as_ref())
    }
}
