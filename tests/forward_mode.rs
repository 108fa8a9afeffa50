//! Eager forward accumulation over the graph engine.

use approx::assert_relative_eq;
use rand::{rngs::StdRng, Rng, SeedableRng};
use vardiff::{Mode, Var};

#[test]
fn add_constant() {
    let x = Var::new(1.0_f64, "x");
    let y = &x + 1.0;
    assert_eq!(y.value().as_scalar(), Some(2.0));
    assert_eq!(y.derivatives().unwrap().scalar("x"), Some(1.0));
}

#[test]
fn product_of_two_named_variables() {
    let x = Var::new(1.0_f64, "x");
    let y = Var::new(2.0_f64, "y");
    let c = &x * &y;
    assert_eq!(c.value().as_scalar(), Some(2.0));
    let d = c.derivatives().unwrap();
    assert_eq!(d.scalar("x"), Some(2.0));
    assert_eq!(d.scalar("y"), Some(1.0));
}

#[test]
fn quotient_of_two_named_variables() {
    let x = Var::new(4.0_f64, "x");
    let y = Var::new(2.0_f64, "y");
    let c = &x / &y;
    assert_eq!(c.value().as_scalar(), Some(2.0));
    let d = c.derivatives().unwrap();
    assert_eq!(d.scalar("x"), Some(0.5));
    assert_eq!(d.scalar("y"), Some(-1.0));
}

#[test]
fn logistic_at_zero() {
    let x = Var::new(0.0_f64, "x");
    let c = x.sigmoid();
    assert_eq!(c.value().as_scalar(), Some(0.5));
    assert_eq!(c.derivatives().unwrap().scalar("x"), Some(0.25));
}

#[test]
fn double_negation_is_the_identity() {
    for &v in &[-3.5_f64, 0.0, 1.0, 42.0] {
        let x = Var::new(v, "x");
        let c = -(-&x);
        assert_eq!(c.value().as_scalar(), Some(v));
        assert_eq!(c.derivatives().unwrap().scalar("x"), Some(1.0));
    }
}

#[test]
fn abs_subgradient_at_zero_is_positive_one() {
    let x = Var::new(0.0_f64, "x");
    assert_eq!(x.abs().derivatives().unwrap().scalar("x"), Some(1.0));

    let x = Var::new(-2.0_f64, "x");
    let c = x.abs();
    assert_eq!(c.value().as_scalar(), Some(2.0));
    assert_eq!(c.derivatives().unwrap().scalar("x"), Some(-1.0));
}

#[test]
fn unary_plus_passes_derivative_through() {
    let x = Var::new(-1.5_f64, "x");
    let c = x.pos();
    assert_eq!(c.value().as_scalar(), Some(-1.5));
    assert_eq!(c.derivatives().unwrap().scalar("x"), Some(1.0));
}

/// Chain composition: c = f(x) ⊕ g(x) with f = x², g = eˣ, for each
/// elementwise binary operation, against the hand-derived value.
#[test]
fn chain_rule_composition_per_operation() {
    let v = 0.8_f64;
    let e = v.exp();

    let analytic: [(&str, f64); 5] = [
        ("add", 2.0 * v + e),
        ("sub", 2.0 * v - e),
        ("mul", 2.0 * v * e + v * v * e),
        ("div", (2.0 * v * e - v * v * e) / (e * e)),
        // d/dv (v²)^(eˣ) at x = v
        (
            "pow",
            (v * v).powf(e) * (e * (2.0 * v) / (v * v) + e * (v * v).ln()),
        ),
    ];

    for (name, expected) in analytic {
        let x = Var::new(v, "x");
        let a = &x * &x;
        let b = x.exp();
        let c = match name {
            "add" => a + b,
            "sub" => a - b,
            "mul" => a * b,
            "div" => a / b,
            "pow" => a.pow(&b),
            _ => unreachable!(),
        };
        let got = c.derivatives().unwrap().scalar("x").unwrap();
        assert_relative_eq!(got, expected, max_relative = 1e-12);
    }
}

#[test]
fn log_with_arbitrary_base() {
    let x = Var::new(8.0_f64, "x");
    let b = Var::new(2.0_f64, "b");
    let c = x.log(&b);
    assert_relative_eq!(c.value().as_scalar().unwrap(), 3.0, max_relative = 1e-12);

    let d = c.derivatives().unwrap();
    assert_relative_eq!(
        d.scalar("x").unwrap(),
        1.0 / (8.0 * 2.0_f64.ln()),
        max_relative = 1e-12
    );
    assert_relative_eq!(
        d.scalar("b").unwrap(),
        -(8.0_f64.ln()) / (2.0 * 2.0_f64.ln().powi(2)),
        max_relative = 1e-12
    );
}

#[test]
fn fan_out_sums_contributions() {
    // c = x*x + x  ⇒  dc/dx = 2x + 1
    let x = Var::new(3.0_f64, "x");
    let c = &x * &x + &x;
    assert_relative_eq!(
        c.derivatives().unwrap().scalar("x").unwrap(),
        7.0,
        max_relative = 1e-12
    );
}

#[test]
fn constants_contribute_no_targets() {
    let x = Var::new(2.0_f64, "x");
    let c = &x * 3.0 + 1.0;
    let d = c.derivatives().unwrap();
    assert_eq!(d.len(), 1);
    assert_eq!(d.scalar("x"), Some(3.0));
}

#[test]
fn randomized_composites_match_finite_differences() {
    let mut rng = StdRng::seed_from_u64(11);
    let f = |x: f64, y: f64| (x * y).exp() / (1.0 + (x / y) * (x / y));

    for _ in 0..50 {
        let xv: f64 = rng.gen_range(0.2..2.0);
        let yv: f64 = rng.gen_range(0.2..2.0);

        let x = Var::new(xv, "x");
        let y = Var::new(yv, "y");
        let ratio = &x / &y;
        let c = (&x * &y).exp() / (&ratio * &ratio + 1.0);
        assert_relative_eq!(c.value().as_scalar().unwrap(), f(xv, yv), max_relative = 1e-10);

        let d = c.derivatives().unwrap();
        let h = 1e-6;
        let fd_x = (f(xv + h, yv) - f(xv - h, yv)) / (2.0 * h);
        let fd_y = (f(xv, yv + h) - f(xv, yv - h)) / (2.0 * h);
        assert_relative_eq!(d.scalar("x").unwrap(), fd_x, max_relative = 1e-4);
        assert_relative_eq!(d.scalar("y").unwrap(), fd_y, max_relative = 1e-4);
    }
}

#[test]
fn explicit_forward_mode_matches_default_eager_mode() {
    let build = |mode: Mode| {
        let x = Var::with_mode(1.2_f64, "x", mode);
        (&x * &x).exp().derivatives().unwrap().scalar("x").unwrap()
    };
    assert_relative_eq!(build(Mode::None), build(Mode::Forward), max_relative = 1e-15);
}
