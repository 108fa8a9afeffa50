//! The operation registry: a closed set of elementary operations.
//!
//! Each [`Op`] supplies a value function and a local-derivative function; the
//! shared propagation pipeline in [`crate::var`] turns those into full
//! derivative maps via the chain rule. `MatMul` and `Transpose` escape the
//! generic elementwise path: matrix multiplication needs its own contraction
//! patterns, and transposition is a pure axis permutation with no pointwise
//! local derivative at all.

use ndarray::Array2;

use crate::error::DiffError;
use crate::float::Float;
use crate::value::Value;

/// Elementary operation kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Op {
    // ── Unary ──
    Neg,
    Pos,
    Abs,
    Exp,
    Logistic,
    Transpose,

    // ── Binary ──
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    /// Logarithm of the first operand in the base given by the second.
    /// Modeled as binary even though the base is usually constant, so the
    /// derivative formulas stay uniform.
    Log,
    MatMul,
}

/// A local partial derivative: the derivative of an operation's output with
/// respect to one immediate operand, evaluated at known values.
///
/// Rank 0 and rank 2 are the only shapes the chain-rule contraction accepts.
/// `Skip` marks a partial that was not computed because the operand is
/// constant — some formulas (`ln` of the base of `pow`, the base branch of
/// `log`) are degenerate for operands that never vary, so the placeholder is
/// never consumed.
#[derive(Clone, Debug)]
pub enum LocalDeriv<F: Float> {
    Skip,
    Scalar(F),
    Matrix(Array2<F>),
}

impl<F: Float> From<Value<F>> for LocalDeriv<F> {
    fn from(v: Value<F>) -> Self {
        match v {
            Value::Scalar(s) => LocalDeriv::Scalar(s),
            Value::Matrix(m) => LocalDeriv::Matrix(m),
        }
    }
}

impl Op {
    /// Number of operands: 1 or 2.
    pub fn arity(self) -> usize {
        match self {
            Op::Neg | Op::Pos | Op::Abs | Op::Exp | Op::Logistic | Op::Transpose => 1,
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow | Op::Log | Op::MatMul => 2,
        }
    }

    /// Display symbol, used in diagnostics.
    pub fn symbol(self) -> &'static str {
        match self {
            Op::Neg => "-",
            Op::Pos => "+",
            Op::Abs => "abs",
            Op::Exp => "exp",
            Op::Logistic => "sigmoid",
            Op::Transpose => ".T",
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Pow => "**",
            Op::Log => "log",
            Op::MatMul => "@",
        }
    }

    /// Numeric result of a unary operation.
    pub fn value_unary<F: Float>(self, a: &Value<F>) -> Value<F> {
        match self {
            Op::Neg => a.map(|x| -x),
            Op::Pos => a.clone(),
            Op::Abs => a.map(|x| x.abs()),
            Op::Exp => a.map(|x| x.exp()),
            Op::Logistic => a.map(|x| F::one() / (F::one() + (-x).exp())),
            Op::Transpose => a.transpose(),
            _ => unreachable!("`{}` is not a unary operation", self.symbol()),
        }
    }

    /// Numeric result of a binary operation.
    ///
    /// Shape compatibility of elementwise operands is checked by the caller;
    /// matrix-product inner dimensions are checked here.
    pub fn value_binary<F: Float>(
        self,
        a: &Value<F>,
        b: &Value<F>,
    ) -> Result<Value<F>, DiffError> {
        match self {
            Op::Add => Ok(a.zip_with(b, |x, y| x + y)),
            Op::Sub => Ok(a.zip_with(b, |x, y| x - y)),
            Op::Mul => Ok(a.zip_with(b, |x, y| x * y)),
            Op::Div => Ok(a.zip_with(b, |x, y| x / y)),
            Op::Pow => Ok(a.zip_with(b, |x, y| x.powf(y))),
            Op::Log => Ok(a.zip_with(b, |x, y| x.ln() / y.ln())),
            Op::MatMul => {
                let (am, bm) = match (a.as_matrix(), b.as_matrix()) {
                    (Some(am), Some(bm)) => (am, bm),
                    _ => {
                        let shape = if a.ndim() == 0 { a.shape() } else { b.shape() };
                        return Err(DiffError::MatrixRequired { op: self, shape });
                    }
                };
                if am.ncols() != bm.nrows() {
                    return Err(DiffError::ShapeMismatch {
                        op: self,
                        lhs: a.shape(),
                        rhs: b.shape(),
                    });
                }
                Ok(Value::Matrix(am.dot(bm)))
            }
            _ => unreachable!("`{}` is not a binary operation", self.symbol()),
        }
    }

    /// Local partial derivative of a unary operation, evaluated at the
    /// operand value `va` and result value `vc`.
    pub fn local_derivative_unary<F: Float>(self, va: &Value<F>, vc: &Value<F>) -> LocalDeriv<F> {
        let one = F::one();
        match self {
            Op::Neg => LocalDeriv::Scalar(-one),
            Op::Pos => LocalDeriv::Scalar(one),
            // Subgradient at exactly 0 is +1: zero is treated as non-negative.
            Op::Abs => va.signum_nonneg().into(),
            // c = e^a  ⇒  c' = c
            Op::Exp => vc.clone().into(),
            Op::Logistic => vc.map(|c| c * (one - c)).into(),
            Op::Transpose => {
                unreachable!("transpose derivatives are pure permutations, not local partials")
            }
            _ => unreachable!("`{}` is not a unary operation", self.symbol()),
        }
    }

    /// Local partial derivatives of a binary operation with respect to each
    /// operand, evaluated at the operand values `va`, `vb` and result `vc`.
    ///
    /// `skip_lda` / `skip_ldb` mark constant operands whose partial is not
    /// needed. Only the operations with degenerate constant-branch formulas
    /// honor them; the rest compute both partials cheaply.
    pub fn local_derivative_binary<F: Float>(
        self,
        va: &Value<F>,
        vb: &Value<F>,
        vc: &Value<F>,
        skip_lda: bool,
        skip_ldb: bool,
    ) -> (LocalDeriv<F>, LocalDeriv<F>) {
        let one = F::one();
        match self {
            Op::Add => (LocalDeriv::Scalar(one), LocalDeriv::Scalar(one)),
            Op::Sub => (LocalDeriv::Scalar(one), LocalDeriv::Scalar(-one)),
            Op::Mul => (vb.clone().into(), va.clone().into()),
            Op::Div => {
                let lda = if skip_lda {
                    LocalDeriv::Skip
                } else {
                    vb.map(|y| one / y).into()
                };
                let ldb = if skip_ldb {
                    LocalDeriv::Skip
                } else {
                    vc.zip_with(vb, |c, y| -c / y).into()
                };
                (lda, ldb)
            }
            Op::Pow => {
                // c = a^b  ⇒  dc/da = b·a^(b−1), dc/db = ln(a)·c.
                // ln(a) for a ≤ 0 yields NaN and propagates; no validation.
                let lda = if skip_lda {
                    LocalDeriv::Skip
                } else {
                    va.zip_with(vb, |x, y| y * x.powf(y - one)).into()
                };
                let ldb = if skip_ldb {
                    LocalDeriv::Skip
                } else {
                    vc.zip_with(va, |c, x| x.ln() * c).into()
                };
                (lda, ldb)
            }
            Op::Log => {
                // c = log_b(a)  ⇒  dc/da = 1/(a·ln b), dc/db = −c/(b·ln b).
                let lda = if skip_lda {
                    LocalDeriv::Skip
                } else {
                    va.zip_with(vb, |x, y| one / (x * y.ln())).into()
                };
                let ldb = if skip_ldb {
                    LocalDeriv::Skip
                } else {
                    vc.zip_with(vb, |c, y| -c / (y.ln() * y)).into()
                };
                (lda, ldb)
            }
            // The "local derivative" of a matrix product w.r.t. one operand
            // is the other operand's value; the dedicated matmul contraction
            // consumes these.
            Op::MatMul => (vb.clone().into(), va.clone().into()),
            _ => unreachable!("`{}` is not a binary operation", self.symbol()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LocalDeriv, Op};
    use crate::value::Value;
    use approx::assert_relative_eq;

    fn scalar(ld: &LocalDeriv<f64>) -> f64 {
        match ld {
            LocalDeriv::Scalar(s) => *s,
            other => panic!("expected scalar local derivative, got {other:?}"),
        }
    }

    /// Centered finite difference of a single-variable slice of a binary op.
    fn finite_diff(op: Op, a: f64, b: f64, wrt_a: bool) -> f64 {
        let h = 1e-6;
        let eval = |a: f64, b: f64| match op
            .value_binary(&Value::Scalar(a), &Value::Scalar(b))
            .unwrap()
        {
            Value::Scalar(s) => s,
            _ => unreachable!(),
        };
        if wrt_a {
            (eval(a + h, b) - eval(a - h, b)) / (2.0 * h)
        } else {
            (eval(a, b + h) - eval(a, b - h)) / (2.0 * h)
        }
    }

    #[test]
    fn binary_partials_match_finite_differences() {
        let cases = [
            (Op::Add, 1.5, 2.5),
            (Op::Sub, 1.5, 2.5),
            (Op::Mul, 1.5, 2.5),
            (Op::Div, 3.0, 2.0),
            (Op::Pow, 2.0, 3.0),
            (Op::Log, 4.0, 2.0),
        ];
        for (op, a, b) in cases {
            let va = Value::Scalar(a);
            let vb = Value::Scalar(b);
            let vc = op.value_binary(&va, &vb).unwrap();
            let (lda, ldb) = op.local_derivative_binary(&va, &vb, &vc, false, false);
            assert_relative_eq!(
                scalar(&lda),
                finite_diff(op, a, b, true),
                max_relative = 1e-6
            );
            assert_relative_eq!(
                scalar(&ldb),
                finite_diff(op, a, b, false),
                max_relative = 1e-6
            );
        }
    }

    #[test]
    fn constant_operands_skip_degenerate_branches() {
        let va = Value::Scalar(-2.0_f64); // ln(-2) would be NaN
        let vb = Value::Scalar(2.0);
        let vc = Op::Pow.value_binary(&va, &vb).unwrap();
        let (lda, ldb) = Op::Pow.local_derivative_binary(&va, &vb, &vc, false, true);
        assert!(matches!(ldb, LocalDeriv::Skip));
        assert_relative_eq!(scalar(&lda), 2.0 * (-2.0), max_relative = 1e-12);
    }

    #[test]
    fn exp_partial_is_the_result() {
        let va = Value::Scalar(1.3_f64);
        let vc = Op::Exp.value_unary(&va);
        let ld = Op::Exp.local_derivative_unary(&va, &vc);
        assert_relative_eq!(scalar(&ld), 1.3_f64.exp(), max_relative = 1e-12);
    }

    #[test]
    fn logistic_partial() {
        let va = Value::Scalar(0.0_f64);
        let vc = Op::Logistic.value_unary(&va);
        assert_relative_eq!(vc.as_scalar().unwrap(), 0.5);
        let ld = Op::Logistic.local_derivative_unary(&va, &vc);
        assert_relative_eq!(scalar(&ld), 0.25);
    }
}
