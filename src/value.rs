//! Numeric values: scalars and rectangular matrices, treated uniformly.
//!
//! `Value` is the boundary with the dense-array backend (ndarray). It provides
//! the elementwise arithmetic, `exp`/`ln`/`abs`, matrix product, and transpose
//! that the operation registry builds on. Broadcasting is allowed only between
//! a scalar and a matrix; the operation layer rejects two differently-shaped
//! matrices before any arithmetic runs.

use std::fmt::{self, Display};

use ndarray::{Array2, Zip};

use crate::float::Float;

/// A scalar or rank-2 numeric value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value<F: Float> {
    Scalar(F),
    Matrix(Array2<F>),
}

impl<F: Float> Value<F> {
    /// Number of array dimensions: 0 for scalars, 2 for matrices.
    #[inline]
    pub fn ndim(&self) -> usize {
        match self {
            Value::Scalar(_) => 0,
            Value::Matrix(_) => 2,
        }
    }

    /// Shape as a list of axis lengths (empty for scalars).
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Value::Scalar(_) => Vec::new(),
            Value::Matrix(m) => m.shape().to_vec(),
        }
    }

    /// Axis extents under the rank-4 derivative convention: scalars count
    /// as 1×1.
    #[inline]
    pub fn dims(&self) -> (usize, usize) {
        match self {
            Value::Scalar(_) => (1, 1),
            Value::Matrix(m) => m.dim(),
        }
    }

    #[inline]
    pub fn as_scalar(&self) -> Option<F> {
        match self {
            Value::Scalar(s) => Some(*s),
            Value::Matrix(_) => None,
        }
    }

    #[inline]
    pub fn as_matrix(&self) -> Option<&Array2<F>> {
        match self {
            Value::Scalar(_) => None,
            Value::Matrix(m) => Some(m),
        }
    }

    /// Apply `f` elementwise.
    pub fn map(&self, f: impl Fn(F) -> F) -> Value<F> {
        match self {
            Value::Scalar(s) => Value::Scalar(f(*s)),
            Value::Matrix(m) => Value::Matrix(m.mapv(f)),
        }
    }

    /// Combine two values elementwise, broadcasting a scalar against a matrix.
    ///
    /// Matrix-matrix inputs must have equal shapes; the operation layer
    /// guarantees this before calling in.
    pub fn zip_with(&self, other: &Value<F>, f: impl Fn(F, F) -> F) -> Value<F> {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(f(*a, *b)),
            (Value::Scalar(a), Value::Matrix(b)) => Value::Matrix(b.mapv(|y| f(*a, y))),
            (Value::Matrix(a), Value::Scalar(b)) => Value::Matrix(a.mapv(|x| f(x, *b))),
            (Value::Matrix(a), Value::Matrix(b)) => {
                Value::Matrix(Zip::from(a).and(b).map_collect(|&x, &y| f(x, y)))
            }
        }
    }

    /// Elementwise sign with the `+1`-at-zero convention used by `abs`:
    /// `+1` where the entry is ≥ 0, `-1` where it is negative.
    pub fn signum_nonneg(&self) -> Value<F> {
        self.map(|x| if x >= F::zero() { F::one() } else { -F::one() })
    }

    /// Matrix product. `None` unless both operands are matrices.
    pub fn matmul(&self, other: &Value<F>) -> Option<Value<F>> {
        match (self, other) {
            (Value::Matrix(a), Value::Matrix(b)) => Some(Value::Matrix(a.dot(b))),
            _ => None,
        }
    }

    /// Transpose. A scalar transposes to itself.
    pub fn transpose(&self) -> Value<F> {
        match self {
            Value::Scalar(s) => Value::Scalar(*s),
            Value::Matrix(m) => Value::Matrix(m.t().to_owned()),
        }
    }
}

impl<F: Float> From<F> for Value<F> {
    #[inline]
    fn from(s: F) -> Self {
        Value::Scalar(s)
    }
}

impl<F: Float> From<Array2<F>> for Value<F> {
    #[inline]
    fn from(m: Array2<F>) -> Self {
        Value::Matrix(m)
    }
}

impl<F: Float> Display for Value<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(s) => write!(f, "{}", s),
            Value::Matrix(m) => write!(f, "{}", m),
        }
    }
}
