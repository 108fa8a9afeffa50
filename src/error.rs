//! Error taxonomy for graph construction and differentiation.
//!
//! All of these are unrecoverable for the computation that raised them:
//! continuing would produce silently-wrong gradients, so they surface to the
//! caller immediately. Domain errors in the closed-form partials (`ln` of a
//! non-positive value, fractional powers of negatives) are deliberately *not*
//! validated — the numeric backend produces NaN/inf and the engine propagates
//! it, matching elementwise float semantics.

use std::fmt;

use crate::op::Op;

/// Errors raised while building a computation graph or differentiating it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffError {
    /// Two non-scalar operands of an elementwise operation have different
    /// shapes. Implicit broadcasting between arrays is rejected up front;
    /// only scalar-vs-array broadcasting is allowed.
    ShapeMismatch {
        op: Op,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },
    /// The operation is only defined for matrix operands.
    MatrixRequired { op: Op, shape: Vec<usize> },
    /// A derivative contraction was handed incompatibly-shaped tensors.
    /// Local derivatives must be rank 0 or rank 2, and their axes must line
    /// up with the accumulated total per the contraction direction.
    RankMismatch {
        op: Op,
        total: Vec<usize>,
        local: Vec<usize>,
    },
    /// A forward-accumulated derivative could not be merged with a backward
    /// gradient at a mixed-mode frontier.
    MergeMismatch {
        forward: Vec<usize>,
        backward: Vec<usize>,
    },
    /// [`Table::generate_derivatives`](crate::Table::generate_derivatives)
    /// was called on a table that already ran its backward sweep. A table is
    /// single-use.
    TapeConsumed,
}

impl fmt::Display for DiffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffError::ShapeMismatch { op, lhs, rhs } => {
                write!(
                    f,
                    "shape mismatch in `{}`: {:?} vs {:?} (array operands of an \
                     elementwise operation must have identical shapes)",
                    op.symbol(),
                    lhs,
                    rhs
                )
            }
            DiffError::MatrixRequired { op, shape } => {
                write!(
                    f,
                    "`{}` requires matrix operands, got shape {:?}",
                    op.symbol(),
                    shape
                )
            }
            DiffError::RankMismatch { op, total, local } => {
                write!(
                    f,
                    "cannot contract derivative for `{}`: accumulated total {:?} \
                     against local derivative {:?}",
                    op.symbol(),
                    total,
                    local
                )
            }
            DiffError::MergeMismatch { forward, backward } => {
                write!(
                    f,
                    "cannot merge forward derivative {:?} with backward gradient {:?}",
                    forward, backward
                )
            }
            DiffError::TapeConsumed => {
                write!(f, "table already differentiated; a table is single-use")
            }
        }
    }
}

impl std::error::Error for DiffError {}
