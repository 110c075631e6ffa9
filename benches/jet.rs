//! Jet evaluation and propagation benchmarks.
//!
//! Measures the per-step cost of the two emission modes (open-coded native
//! code vs the compact table-driven kernel) and the one-time compilation
//! cost of constructing a stepper.
//!
//! Run with: `cargo bench --bench jet`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use taylorjet::prelude::*;

fn oscillator() -> Vec<Equation> {
    vec![prime("x", var("v")), prime("v", -var("x"))]
}

fn kepler() -> Vec<Equation> {
    let r2 = var("x") * var("x") + var("y") * var("y");
    let r3 = pow(r2, number(1.5));
    vec![
        prime("x", var("vx")),
        prime("y", var("vy")),
        prime("vx", -var("x") / r3.clone()),
        prime("vy", -var("y") / r3),
    ]
}

fn make_stepper(eqs: Vec<Equation>, state: &[f64], compact: bool) -> TaylorStepper<f64> {
    TaylorStepper::new(
        eqs,
        state,
        StepperOptions {
            tolerance: 1e-15,
            compact_mode: Some(compact),
            ..Default::default()
        },
    )
    .unwrap()
}

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("step");
    for compact in [false, true] {
        let mode = if compact { "compact" } else { "open" };

        let mut stepper = make_stepper(oscillator(), &[1.0, 0.0], compact);
        group.bench_with_input(BenchmarkId::new("oscillator", mode), &(), |b, _| {
            b.iter(|| black_box(stepper.step()))
        });

        let mut stepper = make_stepper(kepler(), &[1.0, 0.0, 0.0, 1.0], compact);
        group.bench_with_input(BenchmarkId::new("kepler", mode), &(), |b, _| {
            b.iter(|| black_box(stepper.step()))
        });
    }
    group.finish();
}

fn bench_propagate(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagate");
    for compact in [false, true] {
        let mode = if compact { "compact" } else { "open" };
        let mut stepper = make_stepper(kepler(), &[1.0, 0.0, 0.0, 1.0], compact);
        group.bench_with_input(BenchmarkId::new("kepler_orbit", mode), &(), |b, _| {
            b.iter(|| black_box(stepper.propagate_for(0.5).unwrap()))
        });
    }
    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch");
    for batch in [1usize, 2, 4, 8] {
        let state: Vec<f64> = [1.0, 0.0]
            .iter()
            .flat_map(|&v| std::iter::repeat(v).take(batch))
            .collect();
        let mut stepper = TaylorStepper::<f64>::new(
            oscillator(),
            &state,
            StepperOptions {
                tolerance: 1e-15,
                batch,
                ..Default::default()
            },
        )
        .unwrap();
        group.bench_with_input(BenchmarkId::new("oscillator", batch), &(), |b, _| {
            b.iter(|| black_box(stepper.step()))
        });
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    group.sample_size(20);
    for compact in [false, true] {
        let mode = if compact { "compact" } else { "open" };
        group.bench_with_input(BenchmarkId::new("kepler", mode), &(), |b, _| {
            b.iter(|| black_box(make_stepper(kepler(), &[1.0, 0.0, 0.0, 1.0], compact)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_step, bench_propagate, bench_batch, bench_compile);
criterion_main!(benches);
