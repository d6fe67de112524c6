// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — Overlap Projection
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Patch bookkeeping and the multislice overlap projection.
//!
//! A scan position is the probe centre in object pixels. Its patch starts
//! at `round(position) − ROI/2`, wrapped periodically into the object,
//! and the probe is shifted by the sub-pixel remainder
//! `position − round(position)`.

use std::ops::AddAssign;

use ndarray::{Array2, Array3, Array4, ArrayView2, ArrayView3, Axis};
use num_complex::Complex64;
use ptycho_math::backend::ArrayBackend;
use ptycho_math::shift::fourier_shift_stack;

use crate::propagator::Propagator;

/// Integer patch origins and fractional remainders for a set of positions.
#[derive(Debug, Clone)]
pub struct PatchGeometry {
    origins: Vec<[usize; 2]>,
    fractional: Array2<f64>,
    roi: [usize; 2],
    object_shape: [usize; 2],
}

impl PatchGeometry {
    pub fn new(positions: &ArrayView2<'_, f64>, roi: [usize; 2], object_shape: [usize; 2]) -> Self {
        let n = positions.nrows();
        let mut origins = Vec::with_capacity(n);
        let mut fractional = Array2::zeros((n, 2));
        for (k, row) in positions.outer_iter().enumerate() {
            let mut origin = [0usize; 2];
            for axis in 0..2 {
                let rounded = row[axis].round();
                fractional[[k, axis]] = row[axis] - rounded;
                let start = rounded as isize - (roi[axis] / 2) as isize;
                origin[axis] = start.rem_euclid(object_shape[axis] as isize) as usize;
            }
            origins.push(origin);
        }
        PatchGeometry {
            origins,
            fractional,
            roi,
            object_shape,
        }
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    pub fn origins(&self) -> &[[usize; 2]] {
        &self.origins
    }

    /// Sub-pixel remainders, `(n, 2)`.
    pub fn fractional(&self) -> ArrayView2<'_, f64> {
        self.fractional.view()
    }

    pub fn roi(&self) -> [usize; 2] {
        self.roi
    }

    #[inline]
    fn wrap(&self, origin: [usize; 2], i: usize, j: usize) -> (usize, usize) {
        (
            (origin[0] + i) % self.object_shape[0],
            (origin[1] + j) % self.object_shape[1],
        )
    }

    /// Gather `(n, roi_x, roi_y)` windows of `plane`, offset by `offset`
    /// pixels (periodic).
    pub fn extract_offset<T: Copy + Default>(
        &self,
        plane: &ArrayView2<'_, T>,
        offset: [usize; 2],
    ) -> Array3<T> {
        let mut out = Array3::from_elem((self.len(), self.roi[0], self.roi[1]), T::default());
        for (mut patch, origin) in out.outer_iter_mut().zip(self.origins.iter()) {
            let shifted = [origin[0] + offset[0], origin[1] + offset[1]];
            for ((i, j), v) in patch.indexed_iter_mut() {
                let (x, y) = self.wrap(shifted, i, j);
                *v = plane[[x, y]];
            }
        }
        out
    }

    pub fn extract<T: Copy + Default>(&self, plane: &ArrayView2<'_, T>) -> Array3<T> {
        self.extract_offset(plane, [0, 0])
    }

    /// Accumulate every patch back onto the object grid (overlapping
    /// contributions add).
    pub fn scatter_add<T: Copy + Default + AddAssign>(
        &self,
        patches: &ArrayView3<'_, T>,
    ) -> Array2<T> {
        let mut out = Array2::from_elem((self.object_shape[0], self.object_shape[1]), T::default());
        for (patch, origin) in patches.outer_iter().zip(self.origins.iter()) {
            for ((i, j), &v) in patch.indexed_iter() {
                let (x, y) = self.wrap(*origin, i, j);
                out[[x, y]] += v;
            }
        }
        out
    }
}

/// Per-slice forward-model stacks, each `(slices, n, roi_x, roi_y)`.
#[derive(Debug, Clone)]
pub struct OverlapStack {
    /// Wave incident on each slice.
    pub propagated_probes: Array4<Complex64>,
    /// Transmission `exp(i·V)` windows of each slice.
    pub object_patches: Array4<Complex64>,
    /// `object_patches · propagated_probes`.
    pub overlap: Array4<Complex64>,
}

impl OverlapStack {
    pub fn num_slices(&self) -> usize {
        self.overlap.len_of(Axis(0))
    }

    pub fn last_overlap(&self) -> ArrayView3<'_, Complex64> {
        self.overlap.index_axis(Axis(0), self.num_slices() - 1)
    }
}

/// Sub-pixel shifted copies of the probe, one per pattern.
pub fn shifted_probes(
    probe: &Array2<Complex64>,
    geometry: &PatchGeometry,
    backend: &dyn ArrayBackend,
) -> Array3<Complex64> {
    let (sx, sy) = probe.dim();
    let tiled = Array3::from_shape_fn((geometry.len(), sx, sy), |(_, i, j)| probe[[i, j]]);
    fourier_shift_stack(&tiled, &geometry.fractional(), backend)
}

/// Multislice overlap projection of `object_sliced` `(slices, X, Y)`.
pub fn overlap_projection(
    object_sliced: &Array3<f64>,
    probe: &Array2<Complex64>,
    geometry: &PatchGeometry,
    propagator: &Propagator,
    backend: &dyn ArrayBackend,
) -> OverlapStack {
    let num_slices = object_sliced.len_of(Axis(0));
    let n = geometry.len();
    let [rx, ry] = geometry.roi();
    let shape = (num_slices, n, rx, ry);

    let mut object_patches = Array4::zeros(shape);
    for (s, mut patches) in object_patches.outer_iter_mut().enumerate() {
        let transmission = object_sliced
            .index_axis(Axis(0), s)
            .mapv(|v| Complex64::from_polar(1.0, v));
        patches.assign(&geometry.extract(&transmission.view()));
    }

    let mut propagated_probes = Array4::zeros(shape);
    let mut overlap = Array4::zeros(shape);
    propagated_probes
        .index_axis_mut(Axis(0), 0)
        .assign(&shifted_probes(probe, geometry, backend));

    for s in 0..num_slices {
        let product =
            &propagated_probes.index_axis(Axis(0), s) * &object_patches.index_axis(Axis(0), s);
        overlap.index_axis_mut(Axis(0), s).assign(&product);
        if s + 1 < num_slices {
            let mut next = product;
            propagator.propagate_stack(next.view_mut(), s, false, backend);
            propagated_probes.index_axis_mut(Axis(0), s + 1).assign(&next);
        }
    }

    OverlapStack {
        propagated_probes,
        object_patches,
        overlap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use ptycho_math::backend::CpuBackend;

    #[test]
    fn test_geometry_rounding_and_wrap() {
        let positions = array![[4.3, 2.6], [0.0, 9.5]];
        let geom = PatchGeometry::new(&positions.view(), [4, 4], [10, 10]);
        // round(4.3) - 2 = 2 ; round(2.6) - 2 = 1
        assert_eq!(geom.origins()[0], [2, 1]);
        // round(0.0) - 2 wraps to 8 ; round(9.5) = 10 - 2 = 8
        assert_eq!(geom.origins()[1], [8, 8]);
        assert!((geom.fractional()[[0, 0]] - 0.3).abs() < 1e-12);
        assert!((geom.fractional()[[0, 1]] + 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_extract_and_scatter_add() {
        let plane = Array2::from_shape_fn((6, 6), |(i, j)| (i * 6 + j) as f64);
        let positions = array![[3.0, 3.0], [5.0, 5.0]];
        let geom = PatchGeometry::new(&positions.view(), [2, 2], [6, 6]);
        let patches = geom.extract(&plane.view());
        assert_eq!(patches[[0, 0, 0]], plane[[2, 2]]);
        assert_eq!(patches[[1, 1, 1]], plane[[5, 5]]);

        let ones = Array3::from_elem((2, 2, 2), 1.0);
        let counts = geom.scatter_add(&ones.view());
        assert_eq!(counts.sum(), 8.0);
        assert_eq!(counts[[2, 2]], 1.0);
        assert_eq!(counts[[0, 0]], 0.0);
    }

    #[test]
    fn test_scatter_add_overlapping_patches() {
        let positions = array![[2.0, 2.0], [2.0, 2.0], [3.0, 2.0]];
        let geom = PatchGeometry::new(&positions.view(), [2, 2], [5, 5]);
        let ones = Array3::from_elem((3, 2, 2), Complex64::new(1.0, 0.0));
        let counts = geom.scatter_add(&ones.view());
        assert_eq!(counts[[1, 1]].re, 2.0);
        assert_eq!(counts[[2, 1]].re, 3.0);
    }

    #[test]
    fn test_vacuum_object_single_slice_is_shifted_probe() {
        let backend = CpuBackend::new();
        let probe = Array2::from_shape_fn((8, 8), |(i, j)| Complex64::new(i as f64, j as f64));
        let object = Array3::zeros((1, 16, 16));
        let positions = array![[8.0, 8.0], [5.0, 9.0]];
        let geom = PatchGeometry::new(&positions.view(), [8, 8], [16, 16]);
        let prop = Propagator::precompute([8, 8], [1.0, 1.0], 300e3, &[1.0]);
        let stack = overlap_projection(&object, &probe, &geom, &prop, &backend);
        assert_eq!(stack.num_slices(), 1);
        for n in 0..2 {
            for ((i, j), p) in probe.indexed_iter() {
                assert!((stack.overlap[[0, n, i, j]] - p).norm() < 1e-10);
            }
        }
    }

    #[test]
    fn test_multislice_stacks_consistent() {
        let backend = CpuBackend::new();
        let probe = Array2::from_elem((8, 8), Complex64::new(1.0, 0.0));
        let object = Array3::from_shape_fn((3, 12, 12), |(s, i, j)| 0.01 * (s + i + j) as f64);
        let positions = array![[6.0, 6.0]];
        let geom = PatchGeometry::new(&positions.view(), [8, 8], [12, 12]);
        let prop = Propagator::precompute([8, 8], [1.0, 1.0], 300e3, &[2.0, 2.0, 2.0]);
        let stack = overlap_projection(&object, &probe, &geom, &prop, &backend);
        assert_eq!(stack.overlap.dim(), (3, 1, 8, 8));
        for s in 0..3 {
            for i in 0..8 {
                for j in 0..8 {
                    let expected = stack.object_patches[[s, 0, i, j]] * stack.propagated_probes[[s, 0, i, j]];
                    assert!((stack.overlap[[s, 0, i, j]] - expected).norm() < 1e-14);
                }
            }
        }
        assert!((stack.object_patches[[1, 0, 0, 0]].norm() - 1.0).abs() < 1e-14);
    }
}
