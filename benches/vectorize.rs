//! Loop Vectorization Benchmarks
//!
//! Measures the pass itself and the reference interpreter on kernels of
//! increasing expression size.
//!
//! ### 1. Pass (`benchmark_pass`)
//! Runs `loop_vectorize` on a fresh copy of each kernel's scalar IR. Cloning the
//! IR happens in the batch setup and is excluded from the measurement.
//!
//! ### 2. Interpretation (`benchmark_run`)
//! Interprets each kernel before and after vectorization. The vectorized loop
//! executes a quarter of the iterations with four lanes each.
//!
//! ## Usage
//!
//! Run with: `cargo bench --bench vectorize`

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use loop_vectorize::{loop_vectorize, Kernel};

const EXTENT: usize = 256;
const FACTOR: usize = 4;

const KERNELS: &[(&str, &str)] = &[
    ("index", "i"),
    ("linear", "i * 2 + x"),
    ("mixed", "x * y - i / 3 + abs(x - y)"),
    (
        "wide",
        "sqrt(abs(x * x + y * y)) + (i % 4 == 0) * x - (x > y) * (i * 0.5 + y) + 3 * i - x / 7",
    ),
];

fn inputs(kernel: &Kernel) -> Vec<Vec<f32>> {
    (0..kernel.inputs().len())
        .map(|k| (0..EXTENT).map(|n| (n + k) as f32 * 0.5).collect())
        .collect()
}

fn benchmark_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("pass");
    for (name, source) in KERNELS {
        let kernel = Kernel::new(source.to_string(), EXTENT, FACTOR).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(name), kernel.ir(), |b, ir| {
            b.iter_batched(
                || ir.clone(),
                |mut ir| {
                    loop_vectorize(&mut ir).unwrap();
                    black_box(ir)
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn benchmark_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("run");
    for (name, source) in KERNELS {
        let scalar = Kernel::new(source.to_string(), EXTENT, FACTOR).unwrap();
        let mut vectorized = scalar.clone();
        vectorized.vectorize().unwrap();

        let data = inputs(&scalar);
        let data: Vec<&[f32]> = data.iter().map(Vec::as_slice).collect();

        group.bench_with_input(BenchmarkId::new("scalar", name), &data, |b, data| {
            b.iter(|| scalar.run(black_box(data)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("vectorized", name), &data, |b, data| {
            b.iter(|| vectorized.run(black_box(data)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_pass, benchmark_run);
criterion_main!(benches);
