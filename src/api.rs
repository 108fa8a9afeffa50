//! High-level gradient helpers.
//!
//! These wrap the two engines for the common "scalar function of n scalar
//! inputs" case: [`grad`] records onto a fresh reverse-mode [`Table`] and
//! sweeps it once; [`forward_gradient`] builds eagerly differentiating graph
//! variables and reads the accumulated map off the result.

use crate::error::DiffError;
use crate::float::Float;
use crate::tape::{Table, TableScalar, TapeVar};
use crate::var::Var;

/// Gradient of `f` at `x` by taped reverse accumulation.
///
/// One forward evaluation of `f`, one backward sweep; cost is independent of
/// the number of inputs. Inputs the result does not depend on get gradient
/// zero.
///
/// ```
/// use vardiff::grad;
///
/// let g = grad(|x| x[0] * x[1] + x[0].exp(), &[1.0_f64, 2.0]).unwrap();
/// assert!((g[0] - (2.0 + 1.0_f64.exp())).abs() < 1e-12);
/// assert!((g[1] - 1.0).abs() < 1e-12);
/// ```
pub fn grad<F, G>(f: G, x: &[F]) -> Result<Vec<F>, DiffError>
where
    F: TableScalar,
    G: FnOnce(&[TapeVar<F>]) -> TapeVar<F>,
{
    let mut table = Table::new();
    let vars: Vec<TapeVar<F>> = x.iter().map(|&v| table.variable(v)).collect();
    let out = table.scope(|| f(&vars));
    table.generate_derivatives_from(out)
}

/// Gradient of `f` at `x` by eager forward accumulation.
///
/// Every operation carries one derivative entry per input, so this is the
/// expensive direction for many inputs; it exists as an independent check on
/// [`grad`] and for few-input problems. Inputs are named `x0`, `x1`, … and
/// the result must be scalar-valued.
pub fn forward_gradient<F, G>(f: G, x: &[F]) -> Result<Vec<F>, DiffError>
where
    F: Float,
    G: FnOnce(&[Var<F>]) -> Var<F>,
{
    let vars: Vec<Var<F>> = x
        .iter()
        .enumerate()
        .map(|(i, &v)| Var::new(v, &format!("x{i}")))
        .collect();
    let out = f(&vars);
    let derivs = out.derivatives()?;
    Ok((0..x.len())
        .map(|i| derivs.scalar(&format!("x{i}")).unwrap_or_else(F::zero))
        .collect())
}
