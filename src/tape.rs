//! Index-based reverse-mode tape.
//!
//! Where [`crate::var::Var`] builds a pointer-linked graph keyed by variable
//! names, [`Table`] records operations as a flat vector of [`Node`]s in
//! execution order. Each node stores the partial derivatives with respect to
//! its parents; a single descending sweep over the vector then yields scalar
//! adjoints for every recorded input. This is the cheap path for
//! scalar-valued functions of many scalar inputs.
//!
//! Operator overloading needs somewhere to record to, so each thread keeps a
//! pointer to its currently active table; [`Table::scope`] installs one for
//! the duration of a closure.

use std::cell::Cell;

use crate::error::DiffError;
use crate::float::Float;

/// One recorded operation result.
///
/// `partials` holds `(parent index, ∂self/∂parent)` pairs. A binary operation
/// whose operands coincide (`x * x`) records two pairs with the same parent;
/// the sweep sums them.
#[derive(Clone, Debug)]
struct Node<F> {
    value: F,
    partials: Vec<(u32, F)>,
    /// Indices of nodes computed from this one. Registered at push time,
    /// ascending, one entry per child regardless of how many partials the
    /// child holds against us.
    children: Vec<u32>,
    derivative: F,
}

/// A recording of a scalar computation, ready for one backward sweep.
#[derive(Debug, Default)]
pub struct Table<F: Float> {
    nodes: Vec<Node<F>>,
    var_indices: Vec<u32>,
    finalized: bool,
}

/// A lightweight handle into a [`Table`]: the recorded value plus its node
/// index. `Copy`, so expressions read like plain arithmetic.
#[derive(Clone, Copy, Debug)]
pub struct TapeVar<F> {
    value: F,
    index: u32,
}

impl<F: Float> TapeVar<F> {
    /// The recorded numeric value.
    #[inline]
    pub fn value(&self) -> F {
        self.value
    }

    /// Position in the owning table.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl<F: Float> Table<F> {
    pub fn new() -> Self {
        Table {
            nodes: Vec::new(),
            var_indices: Vec::new(),
            finalized: false,
        }
    }

    /// Number of recorded nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Record an input variable. Its adjoint appears in the output of
    /// [`Table::generate_derivatives`], in registration order.
    pub fn variable(&mut self, value: F) -> TapeVar<F> {
        let index = self.push(Node {
            value,
            partials: Vec::new(),
            children: Vec::new(),
            derivative: F::zero(),
        });
        self.var_indices.push(index);
        TapeVar { value, index }
    }

    fn push(&mut self, node: Node<F>) -> u32 {
        let index = u32::try_from(self.nodes.len()).expect("tape overflow");
        self.nodes.push(node);
        index
    }

    pub(crate) fn push_unary(&mut self, parent: u32, value: F, partial: F) -> TapeVar<F> {
        let index = self.push(Node {
            value,
            partials: vec![(parent, partial)],
            children: Vec::new(),
            derivative: F::zero(),
        });
        self.nodes[parent as usize].children.push(index);
        TapeVar { value, index }
    }

    pub(crate) fn push_binary(
        &mut self,
        pa: u32,
        pb: u32,
        value: F,
        wa: F,
        wb: F,
    ) -> TapeVar<F> {
        let index = self.push(Node {
            value,
            partials: vec![(pa, wa), (pb, wb)],
            children: Vec::new(),
            derivative: F::zero(),
        });
        self.nodes[pa as usize].children.push(index);
        if pa != pb {
            self.nodes[pb as usize].children.push(index);
        }
        TapeVar { value, index }
    }

    /// Sweep the table backward from its most recently recorded node and
    /// return the adjoints of all [`Table::variable`] inputs, in registration
    /// order.
    ///
    /// A table can be swept once; a second call returns
    /// [`DiffError::TapeConsumed`]. Inputs the output does not depend on get
    /// adjoint zero. When the designated output is not the last node (dead
    /// computation was recorded after it), use
    /// [`Table::generate_derivatives_from`] instead.
    pub fn generate_derivatives(&mut self) -> Result<Vec<F>, DiffError> {
        if self.nodes.is_empty() {
            if self.finalized {
                return Err(DiffError::TapeConsumed);
            }
            self.finalized = true;
            return Ok(Vec::new());
        }
        let seed = self.nodes.len() - 1;
        self.sweep(seed)
    }

    /// Sweep the table backward from `output`, the designated output node.
    ///
    /// Nodes recorded after `output` get adjoint zero; everything else is as
    /// in [`Table::generate_derivatives`], single-use included.
    pub fn generate_derivatives_from(&mut self, output: TapeVar<F>) -> Result<Vec<F>, DiffError> {
        self.sweep(output.index() as usize)
    }

    fn sweep(&mut self, seed: usize) -> Result<Vec<F>, DiffError> {
        if self.finalized {
            return Err(DiffError::TapeConsumed);
        }
        self.finalized = true;

        // Descending order guarantees every child's adjoint is final before
        // its parents read it. The seed's own adjoint is 1 by definition;
        // contributions it would pull from later nodes are all zero.
        for i in (0..self.nodes.len()).rev() {
            if i == seed {
                self.nodes[i].derivative = F::one();
                continue;
            }
            let mut acc = F::zero();
            for k in 0..self.nodes[i].children.len() {
                let c = self.nodes[i].children[k] as usize;
                let d = self.nodes[c].derivative;
                let mut w = F::zero();
                for &(p, partial) in &self.nodes[c].partials {
                    if p as usize == i {
                        w = w + partial;
                    }
                }
                acc = acc + d * w;
            }
            self.nodes[i].derivative = acc;
        }

        Ok(self
            .var_indices
            .iter()
            .map(|&i| self.nodes[i as usize].derivative)
            .collect())
    }
}

// ── Per-thread active table ──

thread_local! {
    static ACTIVE_F32: Cell<*mut Table<f32>> = const { Cell::new(std::ptr::null_mut()) };
    static ACTIVE_F64: Cell<*mut Table<f64>> = const { Cell::new(std::ptr::null_mut()) };
}

/// Float types with a per-thread active-table slot. Sealed by construction:
/// implemented for `f32` and `f64` only.
pub trait TableScalar: Float {
    #[doc(hidden)]
    fn with_cell<R>(f: impl FnOnce(&Cell<*mut Table<Self>>) -> R) -> R;
}

impl TableScalar for f32 {
    fn with_cell<R>(f: impl FnOnce(&Cell<*mut Table<f32>>) -> R) -> R {
        ACTIVE_F32.with(f)
    }
}

impl TableScalar for f64 {
    fn with_cell<R>(f: impl FnOnce(&Cell<*mut Table<f64>>) -> R) -> R {
        ACTIVE_F64.with(f)
    }
}

/// Run `f` against this thread's active table.
///
/// Panics when no table is in scope; recording outside [`Table::scope`] is a
/// programming error.
pub(crate) fn with_active_table<F: TableScalar, R>(f: impl FnOnce(&mut Table<F>) -> R) -> R {
    F::with_cell(|cell| {
        let ptr = cell.get();
        assert!(
            !ptr.is_null(),
            "no active differentiation table on this thread; wrap the computation in Table::scope"
        );
        // The pointer was installed by a live `TableGuard` borrowing the
        // table mutably, and this thread cannot reach the table any other
        // way while the guard exists.
        unsafe { f(&mut *ptr) }
    })
}

struct TableGuard<F: TableScalar> {
    prev: *mut Table<F>,
}

impl<F: TableScalar> TableGuard<F> {
    fn install(table: &mut Table<F>) -> Self {
        let ptr: *mut Table<F> = table;
        let prev = F::with_cell(|cell| cell.replace(ptr));
        TableGuard { prev }
    }
}

impl<F: TableScalar> Drop for TableGuard<F> {
    fn drop(&mut self) {
        F::with_cell(|cell| cell.set(self.prev));
    }
}

impl<F: TableScalar> Table<F> {
    /// Install this table as the thread's active one for the duration of `f`.
    ///
    /// Nesting is allowed; the previously active table is restored on exit,
    /// including on unwind.
    pub fn scope<R>(&mut self, f: impl FnOnce() -> R) -> R {
        let _guard = TableGuard::install(self);
        f()
    }
}

// ── Recorded math ──

impl<F: TableScalar> TapeVar<F> {
    /// Unary plus.
    pub fn pos(self) -> TapeVar<F> {
        with_active_table(|t| t.push_unary(self.index, self.value, F::one()))
    }

    /// Absolute value; the subgradient at exactly 0 is +1.
    pub fn abs(self) -> TapeVar<F> {
        let sign = if self.value < F::zero() {
            -F::one()
        } else {
            F::one()
        };
        with_active_table(|t| t.push_unary(self.index, self.value.abs(), sign))
    }

    pub fn exp(self) -> TapeVar<F> {
        let v = self.value.exp();
        with_active_table(|t| t.push_unary(self.index, v, v))
    }

    /// Natural logarithm.
    pub fn ln(self) -> TapeVar<F> {
        with_active_table(|t| t.push_unary(self.index, self.value.ln(), self.value.recip()))
    }

    /// Logarithm in a constant base.
    pub fn log(self, base: F) -> TapeVar<F> {
        let v = self.value.log(base);
        let partial = (self.value * base.ln()).recip();
        with_active_table(|t| t.push_unary(self.index, v, partial))
    }

    /// Logistic function `1 / (1 + e^{-x})`.
    pub fn sigmoid(self) -> TapeVar<F> {
        let v = (F::one() + (-self.value).exp()).recip();
        with_active_table(|t| t.push_unary(self.index, v, v * (F::one() - v)))
    }

    /// Power with a constant exponent.
    pub fn powf(self, exponent: F) -> TapeVar<F> {
        let v = self.value.powf(exponent);
        let partial = exponent * self.value.powf(exponent - F::one());
        with_active_table(|t| t.push_unary(self.index, v, partial))
    }

    /// Power with a recorded exponent.
    pub fn pow(self, exponent: TapeVar<F>) -> TapeVar<F> {
        let v = self.value.powf(exponent.value);
        let wa = exponent.value * self.value.powf(exponent.value - F::one());
        let wb = self.value.ln() * v;
        with_active_table(|t| t.push_binary(self.index, exponent.index, v, wa, wb))
    }

    pub fn sqrt(self) -> TapeVar<F> {
        self.powf(F::from_f64(0.5).unwrap_or_else(|| F::one() / (F::one() + F::one())))
    }

    pub fn sin(self) -> TapeVar<F> {
        with_active_table(|t| t.push_unary(self.index, self.value.sin(), self.value.cos()))
    }

    pub fn cos(self) -> TapeVar<F> {
        with_active_table(|t| t.push_unary(self.index, self.value.cos(), -self.value.sin()))
    }

    pub fn tan(self) -> TapeVar<F> {
        let c = self.value.cos();
        with_active_table(|t| t.push_unary(self.index, self.value.tan(), (c * c).recip()))
    }

    /// Inverse sine. NaN partial outside (-1, 1), matching the value.
    pub fn asin(self) -> TapeVar<F> {
        let partial = (F::one() - self.value * self.value).sqrt().recip();
        with_active_table(|t| t.push_unary(self.index, self.value.asin(), partial))
    }

    /// Inverse cosine. NaN partial outside (-1, 1), matching the value.
    pub fn acos(self) -> TapeVar<F> {
        let partial = -(F::one() - self.value * self.value).sqrt().recip();
        with_active_table(|t| t.push_unary(self.index, self.value.acos(), partial))
    }

    pub fn atan(self) -> TapeVar<F> {
        let partial = (F::one() + self.value * self.value).recip();
        with_active_table(|t| t.push_unary(self.index, self.value.atan(), partial))
    }

    pub fn sinh(self) -> TapeVar<F> {
        with_active_table(|t| t.push_unary(self.index, self.value.sinh(), self.value.cosh()))
    }

    pub fn cosh(self) -> TapeVar<F> {
        with_active_table(|t| t.push_unary(self.index, self.value.cosh(), self.value.sinh()))
    }

    pub fn tanh(self) -> TapeVar<F> {
        let v = self.value.tanh();
        with_active_table(|t| t.push_unary(self.index, v, F::one() - v * v))
    }
}
