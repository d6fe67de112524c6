// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — Position Correction
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Per-pattern scan-position refinement against the last slice.
//!
//! The intensity change produced by a one-pixel object roll along each axis
//! is linearized as `M = [2·Re(ΔF_x·F*), 2·Re(ΔF_y·F*)]`, and the shift `u`
//! solving `Mᵀ M u = Mᵀ (A² − |F|²)` is removed from the position.

use ndarray::{Array3, ArrayView2, ArrayView3, ArrayViewMut2, Axis, Zip};
use num_complex::Complex64;
use ptycho_math::backend::ArrayBackend;
use ptycho_math::linalg::solve_2x2;

use crate::overlap::{OverlapStack, PatchGeometry};

/// `F(overlap) − F(rolled_patch · probe)` for one roll direction.
fn rolled_difference(
    transmission: &ArrayView2<'_, Complex64>,
    probes: &ArrayView3<'_, Complex64>,
    overlap_fft: &Array3<Complex64>,
    geometry: &PatchGeometry,
    offset: [usize; 2],
    backend: &dyn ArrayBackend,
) -> Array3<Complex64> {
    let mut rolled = geometry.extract_offset(transmission, offset);
    rolled *= probes;
    backend.fft2_batch(rolled.view_mut());
    Zip::from(&mut rolled)
        .and(overlap_fft)
        .for_each(|r, &f| *r = f - *r);
    rolled
}

/// Refine `positions` (this batch, object pixels) in place.
pub fn position_correction(
    object_last: &ArrayView2<'_, f64>,
    stack: &OverlapStack,
    amplitudes: &ArrayView3<'_, f64>,
    geometry: &PatchGeometry,
    mut positions: ArrayViewMut2<'_, f64>,
    step_size: f64,
    backend: &dyn ArrayBackend,
) {
    let last = stack.num_slices() - 1;
    let transmission = object_last.mapv(|v| Complex64::from_polar(1.0, v));
    let probes = stack.propagated_probes.index_axis(Axis(0), last);

    let mut overlap_fft = stack.last_overlap().to_owned();
    backend.fft2_batch(overlap_fft.view_mut());
    let dx = rolled_difference(&transmission.view(), &probes, &overlap_fft, geometry, [1, 0], backend);
    let dy = rolled_difference(&transmission.view(), &probes, &overlap_fft, geometry, [0, 1], backend);

    let mut skipped = 0usize;
    for (k, mut position) in positions.outer_iter_mut().enumerate() {
        let mut normal = [[0.0; 2]; 2];
        let mut rhs = [0.0; 2];
        Zip::from(overlap_fft.index_axis(Axis(0), k))
            .and(dx.index_axis(Axis(0), k))
            .and(dy.index_axis(Axis(0), k))
            .and(amplitudes.index_axis(Axis(0), k))
            .for_each(|&f, &ex, &ey, &a| {
                let gx = 2.0 * (ex * f.conj()).re;
                let gy = 2.0 * (ey * f.conj()).re;
                let residual = a * a - f.norm_sqr();
                normal[0][0] += gx * gx;
                normal[0][1] += gx * gy;
                normal[1][1] += gy * gy;
                rhs[0] += gx * residual;
                rhs[1] += gy * residual;
            });
        normal[1][0] = normal[0][1];
        match solve_2x2(normal, rhs) {
            Some(u) => {
                position[0] -= step_size * u[0];
                position[1] -= step_size * u[1];
            }
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        log::debug!("position correction: {skipped} singular pattern(s) left in place");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlap::overlap_projection;
    use crate::propagator::Propagator;
    use ndarray::{array, Array2};
    use ptycho_math::backend::CpuBackend;
    use std::f64::consts::PI;

    fn probe() -> Array2<Complex64> {
        Array2::from_shape_fn((16, 16), |(i, j)| {
            let dx = i as f64 - 8.0;
            let dy = j as f64 - 8.0;
            Complex64::new((-(dx * dx + dy * dy) / 18.0).exp(), 0.0)
        })
    }

    fn measured(object: &Array3<f64>, positions: &Array2<f64>, backend: &CpuBackend) -> Array3<f64> {
        let geom = PatchGeometry::new(&positions.view(), [16, 16], [32, 32]);
        let prop = Propagator::precompute([16, 16], [1.0, 1.0], 300e3, &[1.0]);
        let stack = overlap_projection(object, &probe(), &geom, &prop, backend);
        let mut spectrum = stack.last_overlap().to_owned();
        backend.fft2_batch(spectrum.view_mut());
        spectrum.mapv(|f| f.norm())
    }

    fn correct(object: &Array3<f64>, model: &Array2<f64>, amplitudes: &Array3<f64>) -> Array2<f64> {
        let backend = CpuBackend::new();
        let geom = PatchGeometry::new(&model.view(), [16, 16], [32, 32]);
        let prop = Propagator::precompute([16, 16], [1.0, 1.0], 300e3, &[1.0]);
        let stack = overlap_projection(object, &probe(), &geom, &prop, &backend);
        let mut corrected = model.clone();
        position_correction(
            &object.index_axis(Axis(0), 0),
            &stack,
            &amplitudes.view(),
            &geom,
            corrected.view_mut(),
            1.0,
            &backend,
        );
        corrected
    }

    #[test]
    fn test_correction_moves_towards_true_positions() {
        let backend = CpuBackend::new();
        let object = Array3::from_shape_fn((1, 32, 32), |(_, i, j)| {
            let (x, y) = (2.0 * PI * i as f64 / 16.0, 2.0 * PI * j as f64 / 16.0);
            0.5 * x.sin() + 0.5 * y.cos() + 0.3 * (x + y).sin()
        });
        let model = array![[16.0, 16.0], [14.0, 18.0]];
        let offsets = array![[0.2, -0.15], [-0.1, 0.25]];
        let truth = &model + &offsets;
        let amplitudes = measured(&object, &truth, &backend);

        let corrected = correct(&object, &model, &amplitudes);
        for k in 0..2 {
            let before = offsets.row(k).mapv(|v| v * v).sum().sqrt();
            let after = (&corrected.row(k) - &truth.row(k)).mapv(|v| v * v).sum().sqrt();
            assert!(after < 0.6 * before, "pattern {k}: {before} -> {after}");
        }
    }

    #[test]
    fn test_flat_object_leaves_positions() {
        let backend = CpuBackend::new();
        let object = Array3::from_elem((1, 32, 32), 0.4);
        let model = array![[16.0, 16.0], [10.0, 20.0]];
        let amplitudes = measured(&object, &model, &backend).mapv(|a| a * 1.1);
        let corrected = correct(&object, &model, &amplitudes);
        assert_eq!(corrected, model);
    }
}
