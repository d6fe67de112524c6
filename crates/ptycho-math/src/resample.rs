// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — Depth Resampling
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Box resampling along the beam axis.
//!
//! Input cell `i` and output cell `j` are laid on a common grid of
//! `n_in · n_out` units: `I_i = [i·n_out, (i+1)·n_out)` and
//! `O_j = [j·n_in, (j+1)·n_in)`. Each input cell hands its value to the
//! output cells it overlaps in proportion to the overlap, so
//!
//! ```text
//! out_j = Σ_i in_i · |I_i ∩ O_j| / |I_i|
//! ```
//!
//! The total along the axis is conserved exactly. Expanding by an integer
//! factor and projecting back is the identity.

use ndarray::{Array2, Array3, Axis, Zip};

/// `(n_out, n_in)` transfer weights.
pub fn resample_weights(n_in: usize, n_out: usize) -> Array2<f64> {
    let mut weights = Array2::zeros((n_out, n_in));
    if n_in == 0 || n_out == 0 {
        return weights;
    }
    let cell_in = n_out;
    let cell_out = n_in;
    for j in 0..n_out {
        let lo = j * cell_out;
        let hi = lo + cell_out;
        let first = lo / cell_in;
        let last = (hi - 1) / cell_in;
        for i in first..=last.min(n_in - 1) {
            let start = (i * cell_in).max(lo);
            let end = ((i + 1) * cell_in).min(hi);
            if end > start {
                weights[[j, i]] = (end - start) as f64 / cell_in as f64;
            }
        }
    }
    weights
}

/// Resample axis 0 of `volume` to `output_depth` samples, conserving sums.
pub fn resample_depth(volume: &Array3<f64>, output_depth: usize) -> Array3<f64> {
    let (n_in, nx, ny) = volume.dim();
    if n_in == output_depth {
        return volume.clone();
    }
    let weights = resample_weights(n_in, output_depth);
    let mut out = Array3::zeros((output_depth, nx, ny));
    for (j, mut layer) in out.axis_iter_mut(Axis(0)).enumerate() {
        for (i, src) in volume.axis_iter(Axis(0)).enumerate() {
            let w = weights[[j, i]];
            if w == 0.0 {
                continue;
            }
            Zip::from(&mut layer).and(&src).for_each(|o, &s| *o += w * s);
        }
    }
    out
}
