//! Criterion benchmarks for dream_core operations.
//!
//! Run with: cargo bench -p dream_core
//! Run specific: cargo bench -p dream_core -- lap_normalize

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::{Array3, ArrayView3};
use rand::prelude::*;

use dream_core::model::FilterBankModel;
use dream_core::resize::downscaled_size;
use dream_core::{
    compute_tiled_gradient_with_shift, lap_normalize, Bilinear, FnProvider, Model, Objective,
    Resampler, Result, TileConfig, CHANNELS,
};

// =============================================================================
// Helper Functions for Test Data Generation
// =============================================================================

fn random_image_f32(h: usize, w: usize, seed: u64) -> Array3<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array3::from_shape_fn((h, w, CHANNELS), |_| rng.gen::<f32>() * 255.0)
}

fn random_image_f64(h: usize, w: usize, seed: u64) -> Array3<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array3::from_shape_fn((h, w, CHANNELS), |_| rng.gen::<f64>() * 255.0)
}

// =============================================================================
// Resize Benchmarks
// =============================================================================

fn bench_resize(c: &mut Criterion) {
    let mut group = c.benchmark_group("resize");

    for size in [64, 224, 512] {
        let input = random_image_f32(size, size, 42);
        let down = downscaled_size((size, size), 1.4);
        let lo = Bilinear.resize(input.view(), down).unwrap();

        group.throughput(Throughput::Elements((size * size) as u64));

        group.bench_with_input(BenchmarkId::new("downscale", size), &size, |b, _| {
            b.iter(|| Bilinear.resize(black_box(input.view()), down))
        });

        group.bench_with_input(BenchmarkId::new("upscale", size), &size, |b, _| {
            b.iter(|| Bilinear.resize(black_box(lo.view()), (size, size)))
        });
    }

    group.finish();
}

// =============================================================================
// Laplacian Normalization Benchmarks
// =============================================================================

fn bench_lap_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("lap_normalize");

    for size in [64, 224, 512] {
        let input = random_image_f32(size, size, 7);
        group.throughput(Throughput::Elements((size * size) as u64));

        for levels in [1, 4] {
            group.bench_with_input(
                BenchmarkId::new(format!("levels_{}", levels), size),
                &size,
                |b, _| b.iter(|| lap_normalize(black_box(input.view()), levels)),
            );
        }
    }

    group.finish();
}

// =============================================================================
// Tiled Gradient Benchmarks
// =============================================================================

fn bench_tiled_gradient(c: &mut Criterion) {
    let mut group = c.benchmark_group("tiled_gradient");
    group.sample_size(10);

    let model = FilterBankModel::<f32>::new();
    let objective: Objective = "edges:3".parse().unwrap();
    let provider = model.objective(&objective).unwrap();

    let size = 384;
    let input = random_image_f32(size, size, 3);
    group.throughput(Throughput::Elements((size * size) as u64));

    for (name, parallel) in [("sequential", false), ("parallel", true)] {
        let config = TileConfig {
            tile_size: 128,
            parallel,
        };
        group.bench_function(name, |b| {
            b.iter(|| {
                compute_tiled_gradient_with_shift(
                    black_box(input.view()),
                    &provider,
                    &config,
                    (37, 91),
                )
            })
        });
    }

    // Tiling overhead alone: roll, slice and reassemble around a trivial provider
    let identity = FnProvider(|t: ArrayView3<f32>| -> Result<Array3<f32>> { Ok(t.to_owned()) });
    let config = TileConfig::default();
    group.bench_function("overhead_only", |b| {
        b.iter(|| {
            compute_tiled_gradient_with_shift(black_box(input.view()), &identity, &config, (5, 9))
        })
    });

    group.finish();
}

// =============================================================================
// f32 vs f64 Precision Comparison Benchmarks
// =============================================================================

fn bench_precision_comparison(c: &mut Criterion) {
    let mut group = c.benchmark_group("f32_vs_f64");

    let size = 256;
    let image_f32 = random_image_f32(size, size, 42);
    let image_f64 = random_image_f64(size, size, 42);

    group.throughput(Throughput::Elements((size * size) as u64));

    group.bench_function("lap_normalize_256_f32", |b| {
        b.iter(|| lap_normalize(black_box(image_f32.view()), 4))
    });

    group.bench_function("lap_normalize_256_f64", |b| {
        b.iter(|| lap_normalize(black_box(image_f64.view()), 4))
    });

    group.finish();
}

// =============================================================================
// Criterion Configuration
// =============================================================================

criterion_group!(
    benches,
    bench_resize,
    bench_lap_normalize,
    bench_tiled_gradient,
    bench_precision_comparison,
);

criterion_main!(benches);
