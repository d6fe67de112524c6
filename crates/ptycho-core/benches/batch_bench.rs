// -------------------------------------------------------------------------
// Ptycho-Tomo -- Batch Update Benchmark
// One gradient-descent batch (overlap, Fourier projection, adjoint) at
// 32x32 and 64x64 probe windows over a 4-slice object.
// -------------------------------------------------------------------------

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::{Array2, Array3};
use num_complex::Complex64;
use ptycho_core::adjoint::{gradient_descent_adjoint, AdjointParams};
use ptycho_core::fourier::gradient_descent_projection;
use ptycho_core::overlap::{overlap_projection, PatchGeometry};
use ptycho_core::propagator::Propagator;
use ptycho_math::backend::CpuBackend;
use std::hint::black_box;

const SLICES: usize = 4;
const BATCH: usize = 16;

struct Fixture {
    object: Array3<f64>,
    probe: Array2<Complex64>,
    positions: Array2<f64>,
    amplitudes: Array3<f64>,
    propagator: Propagator,
    roi: usize,
}

/// Self-contained batch so the benchmark does not depend on data files.
fn make_fixture(roi: usize) -> Fixture {
    let extent = 2 * roi;
    let object = Array3::from_shape_fn((SLICES, extent, extent), |(s, i, j)| {
        0.05 * ((i as f64 * 0.3 + s as f64).sin() + (j as f64 * 0.2).cos())
    });
    let c = (roi / 2) as f64;
    let probe = Array2::from_shape_fn((roi, roi), |(i, j)| {
        let r2 = (i as f64 - c).powi(2) + (j as f64 - c).powi(2);
        Complex64::from_polar((-r2 / (roi as f64)).exp(), 0.01 * r2)
    });
    let positions = Array2::from_shape_fn((BATCH, 2), |(k, axis)| {
        let step = roi as f64 / 4.0;
        let grid = if axis == 0 { k / 4 } else { k % 4 };
        c + grid as f64 * step + 0.3
    });
    let amplitudes = Array3::from_shape_fn((BATCH, roi, roi), |(k, i, j)| {
        1.0 + ((i * j + k) % 7) as f64 * 0.1
    });
    let propagator = Propagator::precompute([roi, roi], [0.5, 0.5], 300e3, &[2.0; SLICES - 1]);
    Fixture {
        object,
        probe,
        positions,
        amplitudes,
        propagator,
        roi,
    }
}

fn run_batch(fixture: &Fixture, backend: &CpuBackend) {
    let mut object = fixture.object.clone();
    let mut probe = fixture.probe.clone();
    let (_, ox, oy) = object.dim();
    let geometry = PatchGeometry::new(
        &fixture.positions.view(),
        [fixture.roi, fixture.roi],
        [ox, oy],
    );
    let stack = overlap_projection(&object, &probe, &geometry, &fixture.propagator, backend);
    let projection = gradient_descent_projection(&fixture.amplitudes.view(), &stack, 1.0, backend);
    gradient_descent_adjoint(
        &mut object,
        &mut probe,
        &stack,
        projection.exit_waves,
        &geometry,
        &fixture.propagator,
        AdjointParams {
            step_size: 0.5,
            normalization_min: 1.0,
            fix_probe: false,
        },
        backend,
    );
    black_box(projection.error);
    black_box(object);
}

fn bench_batch_update(c: &mut Criterion) {
    let backend = CpuBackend::new();
    let mut group = c.benchmark_group("gradient_descent_batch");
    group.sample_size(20);

    for &roi in &[32usize, 64usize] {
        let fixture = make_fixture(roi);
        group.bench_with_input(
            BenchmarkId::new("overlap_fourier_adjoint", format!("{roi}x{roi}")),
            &fixture,
            |b, f| b.iter(|| run_batch(f, &backend)),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_batch_update);
criterion_main!(benches);
