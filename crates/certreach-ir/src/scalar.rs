//! Scalar algebra shared by numeric, differentiable, and symbolic evaluation.

use std::ops::{Add, Mul, Neg, Sub};

use certreach_smt::terms::SmtTerm;

/// A real-valued quantity that certificates and dynamics are written against.
///
/// Constants are created from an existing value (`x.constant(2.0)`) so that
/// context-carrying implementations, such as tape variables, can attach the
/// constant to the same context.
pub trait Scalar:
    Clone + Add<Output = Self> + Sub<Output = Self> + Mul<Output = Self> + Neg<Output = Self>
{
    fn constant(&self, v: f64) -> Self;
    fn tanh(&self) -> Self;
    fn sin(&self) -> Self;
    fn cos(&self) -> Self;
    fn exp(&self) -> Self;
    fn sqrt(&self) -> Self;
    fn abs(&self) -> Self;
    fn max(&self, other: &Self) -> Self;
    fn min(&self, other: &Self) -> Self;

    fn powi(&self, n: u32) -> Self {
        let mut acc = self.constant(1.0);
        for _ in 0..n {
            acc = acc * self.clone();
        }
        acc
    }

    fn scale(&self, k: f64) -> Self {
        self.constant(k) * self.clone()
    }

    fn square(&self) -> Self {
        self.clone() * self.clone()
    }
}

impl Scalar for f64 {
    fn constant(&self, v: f64) -> f64 {
        v
    }

    fn tanh(&self) -> f64 {
        f64::tanh(*self)
    }

    fn sin(&self) -> f64 {
        f64::sin(*self)
    }

    fn cos(&self) -> f64 {
        f64::cos(*self)
    }

    fn exp(&self) -> f64 {
        f64::exp(*self)
    }

    fn sqrt(&self) -> f64 {
        f64::sqrt(*self)
    }

    fn abs(&self) -> f64 {
        f64::abs(*self)
    }

    fn max(&self, other: &f64) -> f64 {
        f64::max(*self, *other)
    }

    fn min(&self, other: &f64) -> f64 {
        f64::min(*self, *other)
    }

    fn powi(&self, n: u32) -> f64 {
        f64::powi(*self, n as i32)
    }
}

impl Scalar for SmtTerm {
    fn constant(&self, v: f64) -> SmtTerm {
        SmtTerm::real(v)
    }

    fn tanh(&self) -> SmtTerm {
        self.clone().tanh()
    }

    fn sin(&self) -> SmtTerm {
        self.clone().sin()
    }

    fn cos(&self) -> SmtTerm {
        self.clone().cos()
    }

    fn exp(&self) -> SmtTerm {
        self.clone().exp()
    }

    fn sqrt(&self) -> SmtTerm {
        self.clone().sqrt()
    }

    fn abs(&self) -> SmtTerm {
        self.clone().abs()
    }

    fn max(&self, other: &SmtTerm) -> SmtTerm {
        self.clone().max(other.clone())
    }

    fn min(&self, other: &SmtTerm) -> SmtTerm {
        self.clone().min(other.clone())
    }

    fn powi(&self, n: u32) -> SmtTerm {
        self.clone().pow(n)
    }
}

/// `sum_i a_i * b_i`; zero-length input yields `zero`.
pub fn dot<S: Scalar>(zero: &S, a: &[S], b: &[S]) -> S {
    a.iter()
        .zip(b)
        .fold(zero.constant(0.0), |acc, (x, y)| acc + x.clone() * y.clone())
}

/// Euclidean norm of `v`.
pub fn norm<S: Scalar>(zero: &S, v: &[S]) -> S {
    dot(zero, v, v).sqrt()
}
