//! Automatic differentiation over scalars and dense matrices.
//!
//! Two engines share one set of differentiation rules:
//!
//! - [`Var`]: a name-keyed computation graph. Variables carry a value, an
//!   optional name, and a map from target names to rank-4 derivative
//!   tensors. Each variable fixes a [`Mode`] — eager forward accumulation,
//!   deferred reverse accumulation, or a mix where forward-mode islands feed
//!   a reverse-mode sweep. Works uniformly over scalars and `ndarray`
//!   matrices, including matrix products and transposes.
//! - [`Table`] / [`TapeVar`]: a flat index-based tape for scalar reverse
//!   mode. Cheapest when differentiating one scalar output with respect to
//!   many scalar inputs.
//!
//! ```
//! use vardiff::{Mode, Var};
//!
//! let x = Var::with_mode(2.0_f64, "x", Mode::Reverse);
//! let y = Var::with_mode(3.0_f64, "y", Mode::Reverse);
//! let z = &x * &y + x.exp();
//!
//! let d = z.derivatives().unwrap();
//! assert!((d.scalar("x").unwrap() - (3.0 + 2.0_f64.exp())).abs() < 1e-12);
//! assert!((d.scalar("y").unwrap() - 2.0).abs() < 1e-12);
//! ```

pub mod api;
pub mod deriv;
pub mod error;
pub mod float;
pub mod mode;
pub mod op;
pub mod tape;
mod traits;
pub mod value;
pub mod var;

pub use api::{forward_gradient, grad};
pub use error::DiffError;
pub use float::Float;
pub use mode::Mode;
pub use op::Op;
pub use tape::{Table, TableScalar, TapeVar};
pub use value::Value;
pub use var::{try_binary, try_unary, Derivatives, Var};

/// Graph variable over `f64`.
pub type Var64 = Var<f64>;
/// Graph variable over `f32`.
pub type Var32 = Var<f32>;
