// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — Batching
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Pattern visitation order and batch boundaries.

use std::ops::Range;

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Reorder/restore map over the patterns of one tilt.
///
/// `order[k]` is the original index visited at position `k`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    order: Vec<usize>,
}

impl Permutation {
    pub fn identity(n: usize) -> Self {
        Permutation {
            order: (0..n).collect(),
        }
    }

    pub fn shuffled(n: usize, rng: &mut StdRng) -> Self {
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);
        Permutation { order }
    }

    /// Seeded shuffle; `None` draws the seed from the OS.
    pub fn random(n: usize, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self::shuffled(n, &mut rng)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn inverse(&self) -> Permutation {
        let mut inv = vec![0; self.order.len()];
        for (k, &i) in self.order.iter().enumerate() {
            inv[i] = k;
        }
        Permutation { order: inv }
    }

    /// Rows of `data` in visitation order.
    pub fn gather_rows(&self, data: &ArrayView2<'_, f64>) -> Array2<f64> {
        data.select(Axis(0), &self.order)
    }

    pub fn gather_patterns(&self, data: &ArrayView3<'_, f64>) -> Array3<f64> {
        data.select(Axis(0), &self.order)
    }

    /// Write visitation-ordered rows back to their original places.
    pub fn scatter_rows(&self, permuted: &ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = Array2::zeros(permuted.raw_dim());
        for (row, &i) in permuted.outer_iter().zip(self.order.iter()) {
            out.row_mut(i).assign(&row);
        }
        out
    }
}

/// Split `n` patterns into `ceil(n / max_batch)` contiguous batches whose
/// sizes differ by at most one. `None` gives a single batch.
pub fn generate_batches(n: usize, max_batch: Option<usize>) -> Vec<Range<usize>> {
    if n == 0 {
        return Vec::new();
    }
    let max_batch = max_batch.unwrap_or(n).clamp(1, n);
    let num_batches = n.div_ceil(max_batch);
    let base = n / num_batches;
    let extra = n % num_batches;
    let mut batches = Vec::with_capacity(num_batches);
    let mut start = 0;
    for b in 0..num_batches {
        let size = base + usize::from(b < extra);
        batches.push(start..start + size);
        start += size;
    }
    batches
}
