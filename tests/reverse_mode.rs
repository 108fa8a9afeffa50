//! Deferred reverse accumulation over the graph engine, and agreement with
//! the eager forward results.

use approx::assert_relative_eq;
use vardiff::{Mode, Var};

fn rev(v: f64, name: &str) -> Var<f64> {
    Var::with_mode(v, name, Mode::Reverse)
}

#[test]
fn derivative_maps_stay_empty_until_the_sweep() {
    let x = rev(2.0, "x");
    let c = &x * &x;
    assert!(c.forward_derivatives().is_empty());

    let d = c.derivatives().unwrap();
    assert_relative_eq!(d.scalar("x").unwrap(), 4.0, max_relative = 1e-15);
}

#[test]
fn product_and_quotient_scenarios() {
    let x = rev(1.0, "x");
    let y = rev(2.0, "y");
    let c = &x * &y;
    let d = c.derivatives().unwrap();
    assert_eq!(d.scalar("x"), Some(2.0));
    assert_eq!(d.scalar("y"), Some(1.0));

    let x = rev(4.0, "x");
    let y = rev(2.0, "y");
    let d = (&x / &y).derivatives().unwrap();
    assert_eq!(d.scalar("x"), Some(0.5));
    assert_eq!(d.scalar("y"), Some(-1.0));
}

#[test]
fn fan_out_sums_both_paths() {
    // c = x*x + exp(x)  ⇒  dc/dx = 2x + eˣ
    let x = rev(1.1, "x");
    let c = &x * &x + x.exp();
    assert_relative_eq!(
        c.derivatives().unwrap().scalar("x").unwrap(),
        2.0 * 1.1 + 1.1_f64.exp(),
        max_relative = 1e-12
    );
}

#[test]
fn constant_branches_are_skipped() {
    // y constant in x / 2.0: only the dividend edge carries gradient.
    let x = rev(3.0, "x");
    let c = &x / 2.0;
    let d = c.derivatives().unwrap();
    assert_eq!(d.len(), 1);
    assert_eq!(d.scalar("x"), Some(0.5));
}

#[test]
fn cross_mode_consistency() {
    let exprs: [fn(&Var<f64>, &Var<f64>) -> Var<f64>; 4] = [
        |x, y| x * y + x.exp(),
        |x, y| (x / y).sigmoid(),
        |x, y| x.pow(y).ln(),
        |x, y| (x - y).abs() * (x + y),
    ];

    for f in exprs {
        let (xv, yv) = (1.7_f64, 0.6);

        let x = Var::new(xv, "x");
        let y = Var::new(yv, "y");
        let fwd = f(&x, &y).derivatives().unwrap();

        let x = rev(xv, "x");
        let y = rev(yv, "y");
        let bwd = f(&x, &y).derivatives().unwrap();

        for name in ["x", "y"] {
            assert_relative_eq!(
                fwd.scalar(name).unwrap(),
                bwd.scalar(name).unwrap(),
                max_relative = 1e-12
            );
        }
    }
}

#[test]
fn intermediate_accumulators_hold_the_chained_gradient() {
    // c = m * m with m = x*y shared: d c / d m = 2m = 12.
    let x = rev(2.0, "x");
    let y = rev(3.0, "y");
    let m = &x * &y;
    let c = &m * &m;
    c.derivatives().unwrap();
    let g = m.accumulated_gradient("output").unwrap();
    assert_relative_eq!(g[[0, 0, 0, 0]], 12.0, max_relative = 1e-12);
}

#[test]
fn named_root_keys_its_own_accumulators() {
    let x = rev(2.0, "x");
    let c = &x * &x;
    let d = c.derivatives().unwrap();
    assert_relative_eq!(d.scalar("x").unwrap(), 4.0, max_relative = 1e-15);
    assert!(x.accumulated_gradient("output").is_some());
}

#[test]
fn repeated_sweeps_do_not_double_accumulators() {
    let x = rev(2.0, "x");
    let c = &x * &x;

    let first = c.derivatives().unwrap().scalar("x").unwrap();
    let second = c.derivatives().unwrap().scalar("x").unwrap();
    assert_relative_eq!(first, 4.0, max_relative = 1e-15);
    assert_relative_eq!(second, first, max_relative = 1e-15);

    // The stored accumulator reflects the latest sweep only.
    let g = x.accumulated_gradient("output").unwrap();
    assert_relative_eq!(g[[0, 0, 0, 0]], 4.0, max_relative = 1e-15);
}

#[test]
fn distinct_roots_over_a_shared_subgraph_keep_clean_accumulators() {
    // m = x*x feeds two separate anonymous roots; each sweep must start the
    // shared nodes from zero even though both roots key them identically.
    let x = rev(3.0, "x");
    let m = &x * &x;
    let sum_root = &m + &x;
    let scaled_root = &m * 2.0;

    let d = sum_root.derivatives().unwrap();
    assert_relative_eq!(d.scalar("x").unwrap(), 7.0, max_relative = 1e-12);

    let d = scaled_root.derivatives().unwrap();
    assert_relative_eq!(d.scalar("x").unwrap(), 12.0, max_relative = 1e-12);
    let g = x.accumulated_gradient("output").unwrap();
    assert_relative_eq!(g[[0, 0, 0, 0]], 12.0, max_relative = 1e-12);
}

#[test]
fn reverse_mode_matmul_free_scalars_compose_deeply() {
    // Nested composition: sigmoid(exp(x) / (1 + x*x))
    let xv = 0.4_f64;
    let x = rev(xv, "x");
    let c = (x.exp() / (&x * &x + 1.0)).sigmoid();

    let f = |v: f64| {
        let inner = v.exp() / (1.0 + v * v);
        1.0 / (1.0 + (-inner).exp())
    };
    let h = 1e-6;
    let fd = (f(xv + h) - f(xv - h)) / (2.0 * h);
    assert_relative_eq!(
        c.derivatives().unwrap().scalar("x").unwrap(),
        fd,
        max_relative = 1e-5
    );
}
