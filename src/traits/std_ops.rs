//! Operator overloads.
//!
//! Graph arithmetic panics on shape mismatches; use [`crate::var::try_binary`]
//! where a recoverable error is needed. Tape arithmetic panics when no table
//! is active on the thread.

use std::ops::{Add, Div, Mul, Neg, Sub};

use ndarray::Array2;

use crate::float::Float;
use crate::op::Op;
use crate::tape::{with_active_table, TableScalar, TapeVar};
use crate::var::{expect_ok, try_binary, try_unary, Var};

// ── Graph variables ──

impl<F: Float> Neg for Var<F> {
    type Output = Var<F>;
    fn neg(self) -> Var<F> {
        expect_ok(try_unary(Op::Neg, &self))
    }
}

impl<F: Float> Neg for &Var<F> {
    type Output = Var<F>;
    fn neg(self) -> Var<F> {
        expect_ok(try_unary(Op::Neg, self))
    }
}

macro_rules! impl_var_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<F: Float> $trait for Var<F> {
            type Output = Var<F>;
            fn $method(self, rhs: Var<F>) -> Var<F> {
                expect_ok(try_binary($op, &self, &rhs))
            }
        }

        impl<F: Float> $trait<&Var<F>> for Var<F> {
            type Output = Var<F>;
            fn $method(self, rhs: &Var<F>) -> Var<F> {
                expect_ok(try_binary($op, &self, rhs))
            }
        }

        impl<F: Float> $trait<Var<F>> for &Var<F> {
            type Output = Var<F>;
            fn $method(self, rhs: Var<F>) -> Var<F> {
                expect_ok(try_binary($op, self, &rhs))
            }
        }

        impl<F: Float> $trait<&Var<F>> for &Var<F> {
            type Output = Var<F>;
            fn $method(self, rhs: &Var<F>) -> Var<F> {
                expect_ok(try_binary($op, self, rhs))
            }
        }
    };
}

impl_var_binary_op!(Add, add, Op::Add);
impl_var_binary_op!(Sub, sub, Op::Sub);
impl_var_binary_op!(Mul, mul, Op::Mul);
impl_var_binary_op!(Div, div, Op::Div);

// Mixed scalar / matrix operands promote to anonymous constants. The
// left-scalar and left-matrix impls cannot be generic over the float type,
// so they are stamped out per concrete type.
macro_rules! impl_var_mixed_ops {
    ($f:ty => $($trait:ident, $method:ident, $op:expr);+ $(;)?) => {
        $(
            impl $trait<$f> for Var<$f> {
                type Output = Var<$f>;
                fn $method(self, rhs: $f) -> Var<$f> {
                    expect_ok(try_binary($op, &self, &Var::constant(rhs)))
                }
            }

            impl $trait<$f> for &Var<$f> {
                type Output = Var<$f>;
                fn $method(self, rhs: $f) -> Var<$f> {
                    expect_ok(try_binary($op, self, &Var::constant(rhs)))
                }
            }

            impl $trait<Var<$f>> for $f {
                type Output = Var<$f>;
                fn $method(self, rhs: Var<$f>) -> Var<$f> {
                    expect_ok(try_binary($op, &Var::constant(self), &rhs))
                }
            }

            impl $trait<&Var<$f>> for $f {
                type Output = Var<$f>;
                fn $method(self, rhs: &Var<$f>) -> Var<$f> {
                    expect_ok(try_binary($op, &Var::constant(self), rhs))
                }
            }

            impl $trait<Array2<$f>> for Var<$f> {
                type Output = Var<$f>;
                fn $method(self, rhs: Array2<$f>) -> Var<$f> {
                    expect_ok(try_binary($op, &self, &Var::constant(rhs)))
                }
            }

            impl $trait<Array2<$f>> for &Var<$f> {
                type Output = Var<$f>;
                fn $method(self, rhs: Array2<$f>) -> Var<$f> {
                    expect_ok(try_binary($op, self, &Var::constant(rhs)))
                }
            }

            impl $trait<Var<$f>> for Array2<$f> {
                type Output = Var<$f>;
                fn $method(self, rhs: Var<$f>) -> Var<$f> {
                    expect_ok(try_binary($op, &Var::constant(self), &rhs))
                }
            }

            impl $trait<&Var<$f>> for Array2<$f> {
                type Output = Var<$f>;
                fn $method(self, rhs: &Var<$f>) -> Var<$f> {
                    expect_ok(try_binary($op, &Var::constant(self), rhs))
                }
            }
        )+
    };
}

impl_var_mixed_ops!(f32 =>
    Add, add, Op::Add;
    Sub, sub, Op::Sub;
    Mul, mul, Op::Mul;
    Div, div, Op::Div;
);
impl_var_mixed_ops!(f64 =>
    Add, add, Op::Add;
    Sub, sub, Op::Sub;
    Mul, mul, Op::Mul;
    Div, div, Op::Div;
);

// ── Tape variables ──

impl<F: TableScalar> Neg for TapeVar<F> {
    type Output = TapeVar<F>;
    fn neg(self) -> TapeVar<F> {
        with_active_table(|t| t.push_unary(self.index(), -self.value(), -F::one()))
    }
}

impl<F: TableScalar> Add for TapeVar<F> {
    type Output = TapeVar<F>;
    fn add(self, rhs: TapeVar<F>) -> TapeVar<F> {
        with_active_table(|t| {
            t.push_binary(
                self.index(),
                rhs.index(),
                self.value() + rhs.value(),
                F::one(),
                F::one(),
            )
        })
    }
}

impl<F: TableScalar> Sub for TapeVar<F> {
    type Output = TapeVar<F>;
    fn sub(self, rhs: TapeVar<F>) -> TapeVar<F> {
        with_active_table(|t| {
            t.push_binary(
                self.index(),
                rhs.index(),
                self.value() - rhs.value(),
                F::one(),
                -F::one(),
            )
        })
    }
}

impl<F: TableScalar> Mul for TapeVar<F> {
    type Output = TapeVar<F>;
    fn mul(self, rhs: TapeVar<F>) -> TapeVar<F> {
        with_active_table(|t| {
            t.push_binary(
                self.index(),
                rhs.index(),
                self.value() * rhs.value(),
                rhs.value(),
                self.value(),
            )
        })
    }
}

impl<F: TableScalar> Div for TapeVar<F> {
    type Output = TapeVar<F>;
    fn div(self, rhs: TapeVar<F>) -> TapeVar<F> {
        let v = self.value() / rhs.value();
        with_active_table(|t| {
            t.push_binary(
                self.index(),
                rhs.index(),
                v,
                rhs.value().recip(),
                -v / rhs.value(),
            )
        })
    }
}

macro_rules! impl_tape_scalar_ops {
    ($f:ty) => {
        impl Add<$f> for TapeVar<$f> {
            type Output = TapeVar<$f>;
            fn add(self, rhs: $f) -> TapeVar<$f> {
                with_active_table(|t| t.push_unary(self.index(), self.value() + rhs, 1.0))
            }
        }

        impl Add<TapeVar<$f>> for $f {
            type Output = TapeVar<$f>;
            fn add(self, rhs: TapeVar<$f>) -> TapeVar<$f> {
                rhs + self
            }
        }

        impl Sub<$f> for TapeVar<$f> {
            type Output = TapeVar<$f>;
            fn sub(self, rhs: $f) -> TapeVar<$f> {
                with_active_table(|t| t.push_unary(self.index(), self.value() - rhs, 1.0))
            }
        }

        impl Sub<TapeVar<$f>> for $f {
            type Output = TapeVar<$f>;
            fn sub(self, rhs: TapeVar<$f>) -> TapeVar<$f> {
                with_active_table(|t| t.push_unary(rhs.index(), self - rhs.value(), -1.0))
            }
        }

        impl Mul<$f> for TapeVar<$f> {
            type Output = TapeVar<$f>;
            fn mul(self, rhs: $f) -> TapeVar<$f> {
                with_active_table(|t| t.push_unary(self.index(), self.value() * rhs, rhs))
            }
        }

        impl Mul<TapeVar<$f>> for $f {
            type Output = TapeVar<$f>;
            fn mul(self, rhs: TapeVar<$f>) -> TapeVar<$f> {
                rhs * self
            }
        }

        impl Div<$f> for TapeVar<$f> {
            type Output = TapeVar<$f>;
            fn div(self, rhs: $f) -> TapeVar<$f> {
                with_active_table(|t| {
                    t.push_unary(self.index(), self.value() / rhs, rhs.recip())
                })
            }
        }

        impl Div<TapeVar<$f>> for $f {
            type Output = TapeVar<$f>;
            fn div(self, rhs: TapeVar<$f>) -> TapeVar<$f> {
                let v = self / rhs.value();
                with_active_table(|t| t.push_unary(rhs.index(), v, -v / rhs.value()))
            }
        }
    };
}

impl_tape_scalar_ops!(f32);
impl_tape_scalar_ops!(f64);
