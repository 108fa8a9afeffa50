use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vardiff::{grad, Mode, Var};

/// A scalar expression with enough depth and fan-out to exercise the
/// accumulators: f = σ(x·y) · exp(x/y) + (x − y)².
fn graph_expr(x: &Var<f64>, y: &Var<f64>) -> Var<f64> {
    let diff = x - y;
    (x * y).sigmoid() * (x / y).exp() + &diff * &diff
}

fn bench_scalar_gradient(c: &mut Criterion) {
    let mut group = c.benchmark_group("scalar_gradient");
    let inputs = [0.8_f64, 1.7];

    group.bench_with_input(
        BenchmarkId::new("graph", "forward"),
        &inputs,
        |b, &[xv, yv]| {
            b.iter(|| {
                let x = Var::new(black_box(xv), "x");
                let y = Var::new(black_box(yv), "y");
                graph_expr(&x, &y).derivatives().unwrap()
            })
        },
    );

    group.bench_with_input(
        BenchmarkId::new("graph", "reverse"),
        &inputs,
        |b, &[xv, yv]| {
            b.iter(|| {
                let x = Var::with_mode(black_box(xv), "x", Mode::Reverse);
                let y = Var::with_mode(black_box(yv), "y", Mode::Reverse);
                graph_expr(&x, &y).derivatives().unwrap()
            })
        },
    );

    group.bench_with_input(BenchmarkId::new("tape", "reverse"), &inputs, |b, &input| {
        b.iter(|| {
            grad(
                |v| {
                    let d = v[0] - v[1];
                    (v[0] * v[1]).sigmoid() * (v[0] / v[1]).exp() + d * d
                },
                black_box(&input),
            )
            .unwrap()
        })
    });

    group.finish();
}

fn bench_wide_tape(c: &mut Criterion) {
    // Gradient cost of the tape should stay flat in the input count.
    let mut group = c.benchmark_group("tape_width");
    for n in [8usize, 64, 256] {
        let xs: Vec<f64> = (0..n).map(|i| 0.1 + i as f64 * 0.01).collect();
        group.bench_with_input(BenchmarkId::from_parameter(n), &xs, |b, xs| {
            b.iter(|| {
                grad(
                    |v| {
                        let mut acc = v[0] * v[0];
                        for &x in &v[1..] {
                            acc = acc + x * x;
                        }
                        acc.sigmoid()
                    },
                    black_box(xs),
                )
                .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scalar_gradient, bench_wide_tape);
criterion_main!(benches);
