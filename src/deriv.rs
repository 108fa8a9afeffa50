//! Derivative tensors and the chain-rule contractions.
//!
//! Every derivative is stored rank-4: two leading axes shaped like the
//! dependent quantity, two trailing axes shaped like the named target
//! (scalars occupy 1×1 axis pairs). One set of contraction rules then covers
//! scalar and matrix cases uniformly:
//!
//! - elementwise forward: `"ijkl,ij->ijkl"`; elementwise reverse:
//!   `"ijkl,kl->ijkl"` — forward mode propagates "how does this intermediate
//!   vary with the target" outward, reverse mode propagates "how does the
//!   output vary with this intermediate" inward, hence the opposing axis
//!   pairs;
//! - matrix product, one pattern per operand and direction (both operand
//!   shapes participate in the output simultaneously);
//! - transpose: pure axis permutation (`"ijkl->jikl"` forward,
//!   `"ijkl->ijlk"` reverse);
//! - mixed-mode frontier merge: `"ijpq,klij->klpq"`.
//!
//! A 1×1 axis pair broadcasts against a rank-2 local derivative, mirroring
//! the scalar-vs-matrix broadcast the value layer allows; the broadcast
//! direction that contracts *away* a 1×1 pair sums over the partner axes,
//! which is exactly the gradient of a broadcast scalar.

use std::collections::HashMap;

use ndarray::{Array2, Array4};

use crate::error::DiffError;
use crate::float::Float;
use crate::op::{LocalDeriv, Op};

/// Mapping from target variable name to the rank-4 derivative tensor.
pub type DerivMap<F> = HashMap<String, Array4<F>>;

/// Which way a contraction propagates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Which operand of a matrix product a contraction belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Lhs,
    Rhs,
}

/// Identity derivative `d x / d x` for a value with the given axis extents:
/// a Kronecker delta over both index pairs (`[[[[1]]]]` for scalars).
pub fn seed<F: Float>(dims: (usize, usize)) -> Array4<F> {
    let (p, q) = dims;
    Array4::from_shape_fn((p, q, p, q), |(i, j, k, l)| {
        if i == k && j == l {
            F::one()
        } else {
            F::zero()
        }
    })
}

/// Get-or-zero accumulation: add `contribution` onto the entry for `name`,
/// inserting it outright if the target has not been touched yet.
pub fn accumulate<F: Float>(map: &mut DerivMap<F>, name: &str, contribution: Array4<F>) {
    match map.get_mut(name) {
        Some(total) => *total = &*total + &contribution,
        None => {
            map.insert(name.to_owned(), contribution);
        }
    }
}

/// Contract an accumulated total with an elementwise local derivative.
///
/// Returns `None` when the local derivative was skipped (constant operand):
/// no contribution flows along that edge.
pub fn chain_elementwise<F: Float>(
    op: Op,
    total: &Array4<F>,
    local: &LocalDeriv<F>,
    dir: Direction,
) -> Result<Option<Array4<F>>, DiffError> {
    let (m, n, p, q) = total.dim();
    match local {
        LocalDeriv::Skip => Ok(None),
        LocalDeriv::Scalar(s) => {
            let s = *s;
            Ok(Some(total.mapv(|t| t * s)))
        }
        LocalDeriv::Matrix(ld) => {
            let (r, s) = ld.dim();
            let out = match dir {
                // "ijkl,ij->ijkl"
                Direction::Forward => {
                    if (m, n) == (r, s) {
                        Array4::from_shape_fn((m, n, p, q), |(i, j, k, l)| {
                            total[[i, j, k, l]] * ld[[i, j]]
                        })
                    } else if (m, n) == (1, 1) {
                        Array4::from_shape_fn((r, s, p, q), |(i, j, k, l)| {
                            total[[0, 0, k, l]] * ld[[i, j]]
                        })
                    } else {
                        return Err(rank_mismatch(op, total, ld));
                    }
                }
                // "ijkl,kl->ijkl"
                Direction::Reverse => {
                    if (p, q) == (r, s) {
                        Array4::from_shape_fn((m, n, p, q), |(i, j, k, l)| {
                            total[[i, j, k, l]] * ld[[k, l]]
                        })
                    } else if (p, q) == (1, 1) {
                        Array4::from_shape_fn((m, n, r, s), |(i, j, k, l)| {
                            total[[i, j, 0, 0]] * ld[[k, l]]
                        })
                    } else {
                        return Err(rank_mismatch(op, total, ld));
                    }
                }
            };
            Ok(Some(out))
        }
    }
}

/// Contract an accumulated total through a matrix product, on one side.
///
/// `other` is the value of the *other* operand. Forward direction applies
/// `"pqkl,qr->prkl"` (lhs) / `"qrkl,pq->prkl"` (rhs); reverse applies
/// `"mnpr,qr->mnpq"` (lhs) / `"mnpr,pq->mnqr"` (rhs).
pub fn chain_matmul<F: Float>(
    total: &Array4<F>,
    other: &Array2<F>,
    side: Side,
    dir: Direction,
) -> Result<Array4<F>, DiffError> {
    let (m, n, p, q) = total.dim();
    let (or, oc) = other.dim();
    let out = match (dir, side) {
        // c = a@b, propagating through a: local derivative is b (q×r).
        (Direction::Forward, Side::Lhs) => {
            if n != or {
                return Err(rank_mismatch(Op::MatMul, total, other));
            }
            Array4::from_shape_fn((m, oc, p, q), |(i, j, k, l)| {
                (0..n).fold(F::zero(), |acc, t| acc + total[[i, t, k, l]] * other[[t, j]])
            })
        }
        // c = a@b, propagating through b: local derivative is a (p×q).
        (Direction::Forward, Side::Rhs) => {
            if m != oc {
                return Err(rank_mismatch(Op::MatMul, total, other));
            }
            Array4::from_shape_fn((or, n, p, q), |(i, j, k, l)| {
                (0..m).fold(F::zero(), |acc, t| acc + total[[t, j, k, l]] * other[[i, t]])
            })
        }
        // df/da from df/dc (m,n,p,r) and b (q×r).
        (Direction::Reverse, Side::Lhs) => {
            if q != oc {
                return Err(rank_mismatch(Op::MatMul, total, other));
            }
            Array4::from_shape_fn((m, n, p, or), |(i, j, k, l)| {
                (0..q).fold(F::zero(), |acc, t| acc + total[[i, j, k, t]] * other[[l, t]])
            })
        }
        // df/db from df/dc (m,n,p,r) and a (p×q).
        (Direction::Reverse, Side::Rhs) => {
            if p != or {
                return Err(rank_mismatch(Op::MatMul, total, other));
            }
            Array4::from_shape_fn((m, n, oc, q), |(i, j, k, l)| {
                (0..p).fold(F::zero(), |acc, t| acc + total[[i, j, t, l]] * other[[t, k]])
            })
        }
    };
    Ok(out)
}

/// Forward derivative of a transpose: permute the leading axis pair
/// (`"ijkl->jikl"`).
pub fn transpose_forward<F: Float>(d: &Array4<F>) -> Array4<F> {
    let (m, n, p, q) = d.dim();
    Array4::from_shape_fn((n, m, p, q), |(i, j, k, l)| d[[j, i, k, l]])
}

/// Backward gradient of a transpose: permute the trailing axis pair
/// (`"ijkl->ijlk"`).
pub fn transpose_reverse<F: Float>(d: &Array4<F>) -> Array4<F> {
    let (m, n, p, q) = d.dim();
    Array4::from_shape_fn((m, n, q, p), |(i, j, k, l)| d[[i, j, l, k]])
}

/// Merge a forward-accumulated derivative `dc/dx` with a backward gradient
/// `df/dc` at a mixed-mode frontier: `"ijpq,klij->klpq"`.
///
/// When the frontier variable is a scalar that was broadcast into a matrix
/// expression, its 1×1 leading pair sums over all of `df/dc`'s trailing
/// positions.
pub fn merge_reverse_forward<F: Float>(
    dcdx: &Array4<F>,
    dfdc: &Array4<F>,
) -> Result<Array4<F>, DiffError> {
    let (c0, c1, p, q) = dcdx.dim();
    let (k0, k1, i0, i1) = dfdc.dim();
    if (c0, c1) == (i0, i1) {
        Ok(Array4::from_shape_fn((k0, k1, p, q), |(k, l, po, qo)| {
            let mut acc = F::zero();
            for i in 0..i0 {
                for j in 0..i1 {
                    acc = acc + dcdx[[i, j, po, qo]] * dfdc[[k, l, i, j]];
                }
            }
            acc
        }))
    } else if (c0, c1) == (1, 1) {
        Ok(Array4::from_shape_fn((k0, k1, p, q), |(k, l, po, qo)| {
            let mut acc = F::zero();
            for i in 0..i0 {
                for j in 0..i1 {
                    acc = acc + dcdx[[0, 0, po, qo]] * dfdc[[k, l, i, j]];
                }
            }
            acc
        }))
    } else {
        Err(DiffError::MergeMismatch {
            forward: dcdx.shape().to_vec(),
            backward: dfdc.shape().to_vec(),
        })
    }
}

fn rank_mismatch<F: Float, D: ndarray::Dimension>(
    op: Op,
    total: &ndarray::Array<F, ndarray::Ix4>,
    local: &ndarray::Array<F, D>,
) -> DiffError {
    DiffError::RankMismatch {
        op,
        total: total.shape().to_vec(),
        local: local.shape().to_vec(),
    }
}
