// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — State
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use ndarray::{s, Array2, Array3, Array4, ArrayView2};
use num_complex::Complex64;

/// Lifecycle of a reconstruction driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverPhase {
    Uninitialized,
    Preprocessed,
    Reconstructing,
    Finished,
}

/// The tilt currently being processed: its angle and its window into the
/// concatenated position/amplitude arrays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiltState {
    pub index: usize,
    pub angle_deg: f64,
    pub start: usize,
    pub end: usize,
}

impl TiltState {
    /// `cum_probes_per_tilt` holds `num_tilts + 1` running offsets, starting at 0.
    pub fn new(index: usize, angle_deg: f64, cum_probes_per_tilt: &[usize]) -> Self {
        TiltState {
            index,
            angle_deg,
            start: cum_probes_per_tilt[index],
            end: cum_probes_per_tilt[index + 1],
        }
    }

    pub fn num_patterns(&self) -> usize {
        self.end - self.start
    }

    /// This tilt's rows of a `(num_patterns_total, 2)` position array.
    pub fn positions<'a>(&self, all: &'a Array2<f64>) -> ArrayView2<'a, f64> {
        all.slice(s![self.start..self.end, ..])
    }
}

/// Starting point every `reset` rewinds to.
#[derive(Debug, Clone)]
pub struct InitialSnapshot {
    pub object: Array3<f64>,
    pub probe: Array2<Complex64>,
    pub positions_px: Array2<f64>,
    /// `|fft2(probe)|` of the initial probe.
    pub probe_fft_amplitude: Array2<f64>,
}

/// Per-iteration copies kept when `store_iterations` is enabled.
#[derive(Debug, Clone, Default)]
pub struct IterationHistory {
    pub objects: Vec<Array3<f64>>,
    pub probes: Vec<Array2<Complex64>>,
    pub errors: Vec<f64>,
}

impl IterationHistory {
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push(&mut self, object: &Array3<f64>, probe: &Array2<Complex64>, error: f64) {
        self.objects.push(object.clone());
        self.probes.push(probe.clone());
        self.errors.push(error);
    }
}

/// Everything a reconstruction mutates, passed through each stage.
#[derive(Debug, Clone)]
pub struct ReconstructionState {
    /// Potential volume `(voxels, X, Y)`.
    pub object: Array3<f64>,
    /// Complex probe `(Sx, Sy)`.
    pub probe: Array2<Complex64>,
    /// Scan positions in object pixels, all tilts concatenated.
    pub positions_px: Array2<f64>,
    /// Projection-set memory, one `(slices, patterns, Sx, Sy)` stack per tilt.
    pub exit_waves: Vec<Option<Array4<Complex64>>>,
    /// Error of the last completed iteration.
    pub error: Option<f64>,
    pub history: Option<IterationHistory>,
}

impl ReconstructionState {
    pub fn from_snapshot(snapshot: &InitialSnapshot, num_tilts: usize) -> Self {
        ReconstructionState {
            object: snapshot.object.clone(),
            probe: snapshot.probe.clone(),
            positions_px: snapshot.positions_px.clone(),
            exit_waves: vec![None; num_tilts],
            error: None,
            history: None,
        }
    }

    pub fn clear_exit_waves(&mut self) {
        for waves in self.exit_waves.iter_mut() {
            *waves = None;
        }
    }

    /// Rewind object, probe and positions; drop exit-wave memory.
    pub fn reset_to(&mut self, snapshot: &InitialSnapshot) {
        self.object = snapshot.object.clone();
        self.probe = snapshot.probe.clone();
        self.positions_px = snapshot.positions_px.clone();
        self.clear_exit_waves();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> InitialSnapshot {
        InitialSnapshot {
            object: Array3::zeros((4, 8, 4)),
            probe: Array2::from_elem((4, 4), Complex64::new(1.0, 0.0)),
            positions_px: Array2::from_shape_fn((6, 2), |(i, j)| (i + j) as f64),
            probe_fft_amplitude: Array2::ones((4, 4)),
        }
    }

    #[test]
    fn test_tilt_state_window() {
        let cum = [0, 6, 10, 19];
        let tilt = TiltState::new(1, 15.0, &cum);
        assert_eq!(tilt.start, 6);
        assert_eq!(tilt.end, 10);
        assert_eq!(tilt.num_patterns(), 4);
    }

    #[test]
    fn test_tilt_positions_view() {
        let all = Array2::from_shape_fn((6, 2), |(i, _)| i as f64);
        let tilt = TiltState::new(1, 0.0, &[0, 2, 6]);
        let view = tilt.positions(&all);
        assert_eq!(view.shape(), &[4, 2]);
        assert_eq!(view[[0, 0]], 2.0);
    }

    #[test]
    fn test_state_reset_restores_snapshot() {
        let snap = snapshot();
        let mut state = ReconstructionState::from_snapshot(&snap, 3);
        assert_eq!(state.exit_waves.len(), 3);
        state.object.fill(2.0);
        state.positions_px[[0, 0]] = -5.0;
        state.exit_waves[1] = Some(Array4::zeros((1, 1, 4, 4)));

        state.reset_to(&snap);
        assert!(state.object.iter().all(|&v| v == 0.0));
        assert_eq!(state.positions_px[[0, 0]], 0.0);
        assert!(state.exit_waves.iter().all(|w| w.is_none()));
    }

    #[test]
    fn test_history_push() {
        let snap = snapshot();
        let mut history = IterationHistory::default();
        assert!(history.is_empty());
        history.push(&snap.object, &snap.probe, 0.25);
        assert_eq!(history.len(), 1);
        assert_eq!(history.errors[0], 0.25);
    }
}
