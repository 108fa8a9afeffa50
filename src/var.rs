//! Variables and the propagation engine.
//!
//! A [`Var`] is a node in an implicit computation DAG: a numeric value, an
//! optional name, a derivative map, a differentiation mode, and a back-pointer
//! to the operation and operands that produced it. Operand variables are held
//! by shared reference — the graph is a DAG, not a tree, and operations always
//! reference strictly earlier-constructed operands, so plain reference
//! counting suffices (no cycles by construction).
//!
//! Eager modes (`None`, `Forward`) compute derivative maps at construction.
//! Deferred modes (`Reverse`, `Mix`) leave them empty until
//! [`Var::derivatives`] walks the graph backward from the root. Differentiating
//! the *same* graph from two threads at once is not supported: the backward
//! sweep writes per-variable accumulators, so callers must serialize.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Display};
use std::rc::Rc;

use ndarray::{Array2, Array4};

use crate::deriv::{self, DerivMap, Direction, Side};
use crate::error::DiffError;
use crate::float::Float;
use crate::mode::Mode;
use crate::op::{LocalDeriv, Op};
use crate::value::Value;

/// A scalar- or matrix-valued variable in a computation graph.
///
/// Construction fixes everything: value, name, constness, mode. Derivative
/// maps are interior-mutable because deferred modes fill them in later.
///
/// Cloning is O(1): a `Var` is a shared handle to the underlying node.
#[derive(Debug)]
pub struct Var<F: Float> {
    inner: Rc<Inner<F>>,
}

#[derive(Debug)]
struct Inner<F: Float> {
    value: Value<F>,
    name: Option<String>,
    is_const: bool,
    mode: Mode,
    /// Derivative per named target. Populated eagerly in `None`/`Forward`
    /// mode, left empty until a backward sweep in `Reverse`/`Mix` mode.
    derivative: RefCell<DerivMap<F>>,
    /// Gradient accumulator written during backward sweeps, keyed by the
    /// root being differentiated. Fan-out contributions sum here.
    bpgrad: RefCell<DerivMap<F>>,
    /// Sweep stamp of the last backward pass that touched this variable.
    /// Lets a new sweep drop its key's stale entry on first visit.
    bpgrad_sweep: Cell<u64>,
    /// The operation and operands that produced this variable; `None` for
    /// leaves. Used only for backward graph traversal.
    context: Option<(Op, Vec<Var<F>>)>,
}

impl<F: Float> Clone for Var<F> {
    #[inline]
    fn clone(&self) -> Self {
        Var {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<F: Float> Var<F> {
    /// Create a named variable with [`Mode::None`].
    ///
    /// Named variables are differentiation targets: they are seeded with the
    /// identity derivative `d x / d x` at construction.
    pub fn new(value: impl Into<Value<F>>, name: &str) -> Self {
        Self::with_mode(value, name, Mode::None)
    }

    /// Create a named variable with an explicit differentiation mode.
    pub fn with_mode(value: impl Into<Value<F>>, name: &str, mode: Mode) -> Self {
        let value = value.into();
        let mut derivative = DerivMap::new();
        derivative.insert(name.to_owned(), deriv::seed(value.dims()));
        Var {
            inner: Rc::new(Inner {
                value,
                name: Some(name.to_owned()),
                is_const: false,
                mode,
                derivative: RefCell::new(derivative),
                bpgrad: RefCell::new(DerivMap::new()),
                bpgrad_sweep: Cell::new(0),
                context: None,
            }),
        }
    }

    /// Create an anonymous constant. Constants never appear as
    /// differentiation targets.
    pub fn constant(value: impl Into<Value<F>>) -> Self {
        Var {
            inner: Rc::new(Inner {
                value: value.into(),
                name: None,
                is_const: true,
                mode: Mode::None,
                derivative: RefCell::new(DerivMap::new()),
                bpgrad: RefCell::new(DerivMap::new()),
                bpgrad_sweep: Cell::new(0),
                context: None,
            }),
        }
    }

    fn from_op(
        value: Value<F>,
        mode: Mode,
        derivative: DerivMap<F>,
        is_const: bool,
        op: Op,
        operands: Vec<Var<F>>,
    ) -> Self {
        Var {
            inner: Rc::new(Inner {
                value,
                name: None,
                is_const,
                mode,
                derivative: RefCell::new(derivative),
                bpgrad: RefCell::new(DerivMap::new()),
                bpgrad_sweep: Cell::new(0),
                context: Some((op, operands)),
            }),
        }
    }

    /// Numeric value.
    #[inline]
    pub fn value(&self) -> &Value<F> {
        &self.inner.value
    }

    /// Name, if this is a named variable.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Differentiation mode (fixed at construction).
    #[inline]
    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    /// True if no named variable is reachable upstream of this one.
    #[inline]
    pub fn is_const(&self) -> bool {
        self.inner.is_const
    }

    /// The operation that produced this variable, if any.
    pub fn producer(&self) -> Option<Op> {
        self.inner.context.as_ref().map(|(op, _)| *op)
    }

    /// Snapshot of the currently stored derivative map.
    ///
    /// Empty for deferred-mode variables until [`Var::derivatives`] runs.
    pub fn forward_derivatives(&self) -> Derivatives<F> {
        Derivatives {
            map: self.inner.derivative.borrow().clone(),
        }
    }

    /// Differentiate this variable with respect to every named variable it
    /// depends on.
    ///
    /// For eager-mode roots this returns the derivatives accumulated during
    /// construction. For `Reverse`/`Mix` roots it seeds the identity gradient
    /// and sweeps the graph backward, summing fan-out contributions.
    pub fn derivatives(&self) -> Result<Derivatives<F>, DiffError> {
        if self.mode().is_eager() {
            return Ok(self.forward_derivatives());
        }
        let key = self.name().unwrap_or("output").to_owned();
        let root_seed = deriv::seed(self.value().dims());
        let sweep = next_sweep();
        let mut map = DerivMap::new();
        backprop(self, &key, sweep, &root_seed, &mut map)?;
        Ok(Derivatives { map })
    }

    /// Gradient accumulated on this variable during the most recent backward
    /// sweep, keyed by root. Mainly useful for inspecting intermediates.
    pub fn accumulated_gradient(&self, root_key: &str) -> Option<Array4<F>> {
        self.inner.bpgrad.borrow().get(root_key).cloned()
    }
}

impl<F: Float> Display for Var<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} = {}", name, self.value()),
            None => write!(f, "{}", self.value()),
        }
    }
}

thread_local! {
    static SWEEP_COUNTER: Cell<u64> = const { Cell::new(0) };
}

/// Fresh stamp for one backward sweep. Thread-local, which suffices: a graph
/// is single-threaded during differentiation (caller-must-serialize).
fn next_sweep() -> u64 {
    SWEEP_COUNTER.with(|c| {
        let next = c.get() + 1;
        c.set(next);
        next
    })
}

// ── Operation pipeline ──

/// Apply a binary operation, promoting nothing: both operands are already
/// variables. This is the single entry point all binary operator sugar and
/// methods funnel through.
pub fn try_binary<F: Float>(op: Op, a: &Var<F>, b: &Var<F>) -> Result<Var<F>, DiffError> {
    // Reject implicit array broadcasting up front; scalar-vs-array is the one
    // allowed exception, and the matrix product has its own dimension rules.
    if op != Op::MatMul && a.value().ndim() > 0 && b.value().ndim() > 0 {
        let (la, lb) = (a.value().shape(), b.value().shape());
        if la != lb {
            return Err(DiffError::ShapeMismatch {
                op,
                lhs: la,
                rhs: lb,
            });
        }
    }

    let value = op.value_binary(a.value(), b.value())?;
    let mode = Mode::merge(a.mode(), b.mode());
    let is_const = a.is_const() && b.is_const();

    let derivative = if mode.is_eager() {
        fwdprop_binary(op, a, b, &value)?
    } else {
        DerivMap::new()
    };

    Ok(Var::from_op(
        value,
        mode,
        derivative,
        is_const,
        op,
        vec![a.clone(), b.clone()],
    ))
}

/// Apply a unary operation. Counterpart of [`try_binary`].
pub fn try_unary<F: Float>(op: Op, a: &Var<F>) -> Result<Var<F>, DiffError> {
    let value = op.value_unary(a.value());
    let mode = a.mode();
    let is_const = a.is_const();

    let derivative = if mode.is_eager() {
        fwdprop_unary(op, a, &value)?
    } else {
        DerivMap::new()
    };

    Ok(Var::from_op(
        value,
        mode,
        derivative,
        is_const,
        op,
        vec![a.clone()],
    ))
}

/// Forward accumulation for a binary operation: for every named target either
/// operand tracks, contract that operand's derivative with the fresh local
/// derivative and sum contributions across operands.
fn fwdprop_binary<F: Float>(
    op: Op,
    a: &Var<F>,
    b: &Var<F>,
    value: &Value<F>,
) -> Result<DerivMap<F>, DiffError> {
    let (lda, ldb) = op.local_derivative_binary(
        a.value(),
        b.value(),
        value,
        a.is_const(),
        b.is_const(),
    );
    let mut out = DerivMap::new();

    if op == Op::MatMul {
        if let LocalDeriv::Matrix(other) = &lda {
            for (name, d) in a.inner.derivative.borrow().iter() {
                let c = deriv::chain_matmul(d, other, Side::Lhs, Direction::Forward)?;
                deriv::accumulate(&mut out, name, c);
            }
        }
        if let LocalDeriv::Matrix(other) = &ldb {
            for (name, d) in b.inner.derivative.borrow().iter() {
                let c = deriv::chain_matmul(d, other, Side::Rhs, Direction::Forward)?;
                deriv::accumulate(&mut out, name, c);
            }
        }
        return Ok(out);
    }

    for (name, d) in a.inner.derivative.borrow().iter() {
        if let Some(c) = deriv::chain_elementwise(op, d, &lda, Direction::Forward)? {
            deriv::accumulate(&mut out, name, c);
        }
    }
    for (name, d) in b.inner.derivative.borrow().iter() {
        if let Some(c) = deriv::chain_elementwise(op, d, &ldb, Direction::Forward)? {
            deriv::accumulate(&mut out, name, c);
        }
    }
    Ok(out)
}

/// Forward accumulation for a unary operation.
fn fwdprop_unary<F: Float>(op: Op, a: &Var<F>, value: &Value<F>) -> Result<DerivMap<F>, DiffError> {
    let mut out = DerivMap::new();

    if op == Op::Transpose {
        for (name, d) in a.inner.derivative.borrow().iter() {
            out.insert(name.clone(), deriv::transpose_forward(d));
        }
        return Ok(out);
    }

    let lda = op.local_derivative_unary(a.value(), value);
    for (name, d) in a.inner.derivative.borrow().iter() {
        if let Some(c) = deriv::chain_elementwise(op, d, &lda, Direction::Forward)? {
            deriv::accumulate(&mut out, name, c);
        }
    }
    Ok(out)
}

/// One step of the backward sweep: `incoming` is `df/d(v)` for the root `f`
/// identified by `key`.
///
/// A variable with a non-empty forward derivative map is a frontier — its map
/// already summarizes everything upstream, so it is merged and the recursion
/// stops (named leaves carry their identity seed, which makes the leaf case
/// and the mixed-mode frontier the same merge). Otherwise the local
/// derivatives of the producing operation are contracted against `incoming`
/// and pushed into each operand; anonymous leaves terminate.
fn backprop<F: Float>(
    v: &Var<F>,
    key: &str,
    sweep: u64,
    incoming: &Array4<F>,
    out: &mut DerivMap<F>,
) -> Result<(), DiffError> {
    // First visit in this sweep: drop whatever a previous sweep left under
    // this key, so fan-out summation starts from zero.
    if v.inner.bpgrad_sweep.replace(sweep) != sweep {
        v.inner.bpgrad.borrow_mut().remove(key);
    }
    deriv::accumulate(&mut v.inner.bpgrad.borrow_mut(), key, incoming.clone());

    {
        let fwd = v.inner.derivative.borrow();
        if !fwd.is_empty() {
            for (name, dcdx) in fwd.iter() {
                let c = deriv::merge_reverse_forward(dcdx, incoming)?;
                deriv::accumulate(out, name, c);
            }
            return Ok(());
        }
    }

    let (op, operands) = match &v.inner.context {
        Some(ctx) => ctx,
        None => return Ok(()), // anonymous constant leaf
    };

    match operands.as_slice() {
        [a] => {
            let contribution = if *op == Op::Transpose {
                Some(deriv::transpose_reverse(incoming))
            } else {
                let lda = op.local_derivative_unary(a.value(), v.value());
                deriv::chain_elementwise(*op, incoming, &lda, Direction::Reverse)?
            };
            if let Some(c) = contribution {
                backprop(a, key, sweep, &c, out)?;
            }
        }
        [a, b] => {
            let (lda, ldb) = op.local_derivative_binary(
                a.value(),
                b.value(),
                v.value(),
                a.is_const(),
                b.is_const(),
            );
            let (ca, cb) = if *op == Op::MatMul {
                let ca = match &lda {
                    LocalDeriv::Matrix(other) => {
                        Some(deriv::chain_matmul(incoming, other, Side::Lhs, Direction::Reverse)?)
                    }
                    _ => None,
                };
                let cb = match &ldb {
                    LocalDeriv::Matrix(other) => {
                        Some(deriv::chain_matmul(incoming, other, Side::Rhs, Direction::Reverse)?)
                    }
                    _ => None,
                };
                (ca, cb)
            } else {
                (
                    deriv::chain_elementwise(*op, incoming, &lda, Direction::Reverse)?,
                    deriv::chain_elementwise(*op, incoming, &ldb, Direction::Reverse)?,
                )
            };
            if let Some(c) = ca {
                backprop(a, key, sweep, &c, out)?;
            }
            if let Some(c) = cb {
                backprop(b, key, sweep, &c, out)?;
            }
        }
        _ => unreachable!("operations have one or two operands"),
    }
    Ok(())
}

// ── Math methods ──

impl<F: Float> Var<F> {
    /// Unary plus (identity with local derivative +1).
    pub fn pos(&self) -> Var<F> {
        expect_ok(try_unary(Op::Pos, self))
    }

    /// Elementwise absolute value. The subgradient at exactly 0 is +1.
    pub fn abs(&self) -> Var<F> {
        expect_ok(try_unary(Op::Abs, self))
    }

    /// Elementwise exponential.
    pub fn exp(&self) -> Var<F> {
        expect_ok(try_unary(Op::Exp, self))
    }

    /// Natural logarithm: `log` in base *e*.
    pub fn ln(&self) -> Var<F> {
        expect_ok(try_binary(Op::Log, self, &Var::constant(F::E())))
    }

    /// Logarithm in an arbitrary base.
    pub fn log(&self, base: &Var<F>) -> Var<F> {
        expect_ok(try_binary(Op::Log, self, base))
    }

    /// Logistic function `1 / (1 + e^{-x})`.
    pub fn sigmoid(&self) -> Var<F> {
        expect_ok(try_unary(Op::Logistic, self))
    }

    /// Elementwise power with a variable exponent.
    pub fn pow(&self, exponent: &Var<F>) -> Var<F> {
        expect_ok(try_binary(Op::Pow, self, exponent))
    }

    /// Elementwise power with a constant exponent.
    pub fn powf(&self, exponent: F) -> Var<F> {
        self.pow(&Var::constant(exponent))
    }

    /// Square root, defined as power by one half.
    pub fn sqrt(&self) -> Var<F> {
        self.powf(F::from_f64(0.5).unwrap_or_else(|| F::one() / (F::one() + F::one())))
    }

    /// Matrix product. Panics on non-matrix operands or mismatched inner
    /// dimensions; see [`Var::try_matmul`] for the fallible form.
    pub fn matmul(&self, rhs: &Var<F>) -> Var<F> {
        expect_ok(self.try_matmul(rhs))
    }

    /// Fallible matrix product.
    pub fn try_matmul(&self, rhs: &Var<F>) -> Result<Var<F>, DiffError> {
        try_binary(Op::MatMul, self, rhs)
    }

    /// Matrix transpose (identity on scalars).
    pub fn t(&self) -> Var<F> {
        expect_ok(try_unary(Op::Transpose, self))
    }
}

/// Operator sugar and infallible methods funnel through here: construction
/// errors are programming errors at the call site (shape mismatches), so they
/// panic with the descriptive message. Fallible callers use [`try_binary`] /
/// [`try_unary`] directly.
pub(crate) fn expect_ok<F: Float>(r: Result<Var<F>, DiffError>) -> Var<F> {
    match r {
        Ok(v) => v,
        Err(e) => panic!("{}", e),
    }
}

// ── Results of differentiation ──

/// Derivatives of one variable with respect to each named target, in the
/// rank-4 convention.
#[derive(Clone, Debug)]
pub struct Derivatives<F: Float> {
    map: DerivMap<F>,
}

impl<F: Float> Derivatives<F> {
    /// The raw rank-4 derivative tensor with respect to `name`.
    pub fn wrt(&self, name: &str) -> Option<&Array4<F>> {
        self.map.get(name)
    }

    /// Scalar derivative with respect to `name`, when both the dependent and
    /// the target are scalars.
    pub fn scalar(&self, name: &str) -> Option<F> {
        let d = self.map.get(name)?;
        if d.dim() == (1, 1, 1, 1) {
            Some(d[[0, 0, 0, 0]])
        } else {
            None
        }
    }

    /// Rank-2 view of the derivative with respect to `name`, when one side is
    /// a scalar: either `d(matrix)/d(scalar)` or `d(scalar)/d(matrix)`.
    pub fn matrix(&self, name: &str) -> Option<Array2<F>> {
        let d = self.map.get(name)?;
        let (m, n, p, q) = d.dim();
        if (p, q) == (1, 1) {
            Some(Array2::from_shape_fn((m, n), |(i, j)| d[[i, j, 0, 0]]))
        } else if (m, n) == (1, 1) {
            Some(Array2::from_shape_fn((p, q), |(i, j)| d[[0, 0, i, j]]))
        } else {
            None
        }
    }

    /// Names of all targets with a recorded derivative.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Consume into the underlying name → tensor map.
    pub fn into_map(self) -> DerivMap<F> {
        self.map
    }
}
