// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — Adjoint Update
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Back-propagation of exit waves into object and probe updates.
//!
//! Both disciplines walk the slices from last to first. At each slice the
//! object update is
//!
//! ```text
//! ΔV[s] = bincount(Re(−i · conj(O) · conj(P) · ψ)) · N_P
//! N_P   = 1 / sqrt(ε + ((1 − m)·I_P)² + (m · max I_P)²),  I_P = bincount(|P|²)
//! ```
//!
//! and the wave is carried to slice `s − 1` through the conjugate kernel.
//! Gradient descent adds `step · ΔV[s]` to the slice; the projection-set
//! family overwrites the slice with `ΔV[s]`.
//! The probe is updated at the first slice, summed over the batch after
//! undoing each pattern's sub-pixel shift.

use ndarray::{Array2, Array3, Array4, ArrayView2, ArrayView3, Axis, Zip};
use num_complex::Complex64;
use ptycho_math::backend::ArrayBackend;
use ptycho_math::shift::fourier_shift_stack;
use ptycho_types::constants::NORMALIZATION_EPS;

use crate::overlap::{OverlapStack, PatchGeometry};
use crate::propagator::Propagator;

/// Scalars shared by both update disciplines.
#[derive(Debug, Clone, Copy)]
pub struct AdjointParams {
    pub step_size: f64,
    pub normalization_min: f64,
    pub fix_probe: bool,
}

/// Regularized inverse square root of an intensity map.
pub fn intensity_normalization(intensity: &ArrayView2<'_, f64>, normalization_min: f64) -> Array2<f64> {
    let max = intensity.iter().cloned().fold(0.0f64, f64::max);
    let floor = (normalization_min * max).powi(2);
    intensity.mapv(|v| {
        let scaled = (1.0 - normalization_min) * v;
        1.0 / (NORMALIZATION_EPS + scaled * scaled + floor).sqrt()
    })
}

/// `Re(−i·conj(O)·conj(P)·ψ)` for every pattern of one slice.
fn object_gradient_patches(
    patches: &ArrayView3<'_, Complex64>,
    probes: &ArrayView3<'_, Complex64>,
    exit: &ArrayView3<'_, Complex64>,
) -> Array3<f64> {
    let mut out = Array3::zeros(patches.raw_dim());
    Zip::from(&mut out)
        .and(patches)
        .and(probes)
        .and(exit)
        .for_each(|g, &o, &p, &e| *g = (o.conj() * p.conj() * e).im);
    out
}

/// Object update for slice `s`, normalized by the illumination.
fn object_update(
    stack: &OverlapStack,
    exit: &ArrayView3<'_, Complex64>,
    s: usize,
    geometry: &PatchGeometry,
    normalization_min: f64,
) -> Array2<f64> {
    let patches = stack.object_patches.index_axis(Axis(0), s);
    let probes = stack.propagated_probes.index_axis(Axis(0), s);
    let probe_intensity = geometry.scatter_add(&probes.mapv(|p| p.norm_sqr()).view());
    let norm = intensity_normalization(&probe_intensity.view(), normalization_min);
    let gradient = object_gradient_patches(&patches, &probes, exit);
    geometry.scatter_add(&gradient.view()) * norm
}

/// Batch-summed probe contribution `Σ unshift(conj(O)·ψ) · N_O`.
fn probe_update(
    patches: &ArrayView3<'_, Complex64>,
    exit: &ArrayView3<'_, Complex64>,
    geometry: &PatchGeometry,
    normalization_min: f64,
    backend: &dyn ArrayBackend,
) -> Array2<Complex64> {
    let mut contributions = Array3::zeros(patches.raw_dim());
    Zip::from(&mut contributions)
        .and(patches)
        .and(exit)
        .for_each(|c, &o, &e| *c = o.conj() * e);
    let unshift = geometry.fractional().mapv(|v| -v);
    let contributions = fourier_shift_stack(&contributions, &unshift.view(), backend);

    let object_intensity = patches.mapv(|o| o.norm_sqr()).sum_axis(Axis(0));
    let norm = intensity_normalization(&object_intensity.view(), normalization_min);
    let mut update = contributions.sum_axis(Axis(0));
    Zip::from(&mut update).and(&norm).for_each(|u, &n| *u *= n);
    update
}

/// Gradient-descent adjoint. `exit_waves` holds residuals and is consumed.
pub fn gradient_descent_adjoint(
    object_sliced: &mut Array3<f64>,
    probe: &mut Array2<Complex64>,
    stack: &OverlapStack,
    mut exit_waves: Array4<Complex64>,
    geometry: &PatchGeometry,
    propagator: &Propagator,
    params: AdjointParams,
    backend: &dyn ArrayBackend,
) {
    for s in (0..stack.num_slices()).rev() {
        let exit = exit_waves.index_axis(Axis(0), s).to_owned();
        let delta = object_update(stack, &exit.view(), s, geometry, params.normalization_min);
        let mut layer = object_sliced.index_axis_mut(Axis(0), s);
        layer.scaled_add(params.step_size, &delta);

        let patches = stack.object_patches.index_axis(Axis(0), s);
        if s > 0 {
            // corrected incident wave P + conj(O)·ψ, carried back one gap
            let mut wave = stack.propagated_probes.index_axis(Axis(0), s).to_owned();
            Zip::from(&mut wave)
                .and(&patches)
                .and(&exit)
                .for_each(|w, &o, &e| *w += o.conj() * e);
            propagator.propagate_stack(wave.view_mut(), s - 1, true, backend);
            let mut previous = exit_waves.index_axis_mut(Axis(0), s - 1);
            previous += &wave;
        } else if !params.fix_probe {
            let update =
                probe_update(&patches, &exit.view(), geometry, params.normalization_min, backend);
            Zip::from(&mut *probe)
                .and(&update)
                .for_each(|p, &u| *p += u * params.step_size);
        }
    }
}

/// Projection-set adjoint. Each object slice is replaced by its update.
/// `exit_waves` is the tilt's exit-wave memory; its lower slices are
/// rewritten with the back-propagated waves.
pub fn projection_set_adjoint(
    object_sliced: &mut Array3<f64>,
    probe: &mut Array2<Complex64>,
    stack: &OverlapStack,
    exit_waves: &mut Array4<Complex64>,
    geometry: &PatchGeometry,
    propagator: &Propagator,
    params: AdjointParams,
    backend: &dyn ArrayBackend,
) {
    let m = params.normalization_min;
    for s in (0..stack.num_slices()).rev() {
        let exit = exit_waves.index_axis(Axis(0), s).to_owned();
        let delta = object_update(stack, &exit.view(), s, geometry, m);
        object_sliced.index_axis_mut(Axis(0), s).assign(&delta);

        let patches = stack.object_patches.index_axis(Axis(0), s);
        if s > 0 {
            let mut wave = Array3::zeros(exit.raw_dim());
            // per-pattern object normalization
            for ((mut wave_n, patch_n), exit_n) in wave
                .outer_iter_mut()
                .zip(patches.outer_iter())
                .zip(exit.outer_iter())
            {
                let intensity = patch_n.mapv(|v| v.norm_sqr());
                let norm = intensity_normalization(&intensity.view(), m);
                Zip::from(&mut wave_n)
                    .and(&patch_n)
                    .and(&exit_n)
                    .and(&norm)
                    .for_each(|w, &o, &e, &n| *w = o.conj() * e * n);
            }
            propagator.propagate_stack(wave.view_mut(), s - 1, true, backend);
            exit_waves.index_axis_mut(Axis(0), s - 1).assign(&wave);
        } else if !params.fix_probe {
            *probe = probe_update(&patches, &exit.view(), geometry, m, backend);
        }
    }
}
