//! Differentiation modes and the mode-merge rule.
//!
//! Every [`Var`](crate::Var) carries a mode fixed at construction. The mode of
//! an operation result is the merge of its operands' modes; merging decides
//! whether derivatives are computed eagerly (forward accumulation) or deferred
//! until an explicit backward sweep.

/// Differentiation mode of a variable.
///
/// `None` tracks no derivatives by itself but still participates in graphs;
/// it is the identity element of [`Mode::merge`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    /// No differentiation strategy requested.
    #[default]
    None,
    /// Forward accumulation: derivatives computed while the graph is built.
    Forward,
    /// Reverse accumulation: derivatives deferred to a backward sweep.
    Reverse,
    /// Forward and reverse parts coexist in the same graph.
    Mix,
}

impl Mode {
    /// Merge the modes of two operands into the mode of the result.
    ///
    /// The table is total, commutative, and associative:
    /// `None` is the identity, equal modes are idempotent, and any two
    /// different non-`None` modes collapse to `Mix`.
    pub fn merge(a: Mode, b: Mode) -> Mode {
        use Mode::*;
        match (a, b) {
            (None, None) => None,

            (None, Forward) | (Forward, None) | (Forward, Forward) => Forward,
            (None, Reverse) | (Reverse, None) | (Reverse, Reverse) => Reverse,
            (None, Mix) | (Mix, None) | (Mix, Mix) => Mix,

            (Forward, Reverse) | (Reverse, Forward) => Mix,
            (Forward, Mix) | (Mix, Forward) => Mix,
            (Reverse, Mix) | (Mix, Reverse) => Mix,
        }
    }

    /// True if derivatives for this mode are computed at construction time.
    ///
    /// `Reverse` and `Mix` variables leave their derivative map empty until
    /// [`Var::derivatives`](crate::Var::derivatives) walks the graph backward.
    #[inline]
    pub fn is_eager(self) -> bool {
        matches!(self, Mode::None | Mode::Forward)
    }
}
