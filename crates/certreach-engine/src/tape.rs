//! Reverse-mode automatic differentiation on a flat tape.
//!
//! Every operation on a [`Var`] appends one node holding at most two
//! parent indices and the local partial derivative toward each. A single
//! backward sweep over the tape then yields the derivative of one output
//! with respect to every node. [`Var`] implements [`Scalar`], so certificate
//! jets, Hamiltonians and residuals written once against that trait are
//! differentiated with respect to the certificate parameters without
//! further code.

use std::cell::RefCell;
use std::ops::{Add, Mul, Neg, Sub};

use certreach_ir::scalar::Scalar;

#[derive(Debug, Clone, Copy)]
struct Node {
    lhs: (usize, f64),
    rhs: (usize, f64),
}

#[derive(Debug, Default)]
pub struct Tape {
    nodes: RefCell<Vec<Node>>,
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: RefCell::new(Vec::with_capacity(capacity)),
        }
    }

    /// A fresh independent variable.
    pub fn var(&self, value: f64) -> Var<'_> {
        let index = self.push((0, 0.0), (0, 0.0));
        Var {
            tape: self,
            index,
            value,
        }
    }

    pub fn vars(&self, values: &[f64]) -> Vec<Var<'_>> {
        values.iter().map(|&v| self.var(v)).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every node. Requires exclusive access, so no [`Var`] can
    /// outlive the reset.
    pub fn clear(&mut self) {
        self.nodes.get_mut().clear();
    }

    fn push(&self, lhs: (usize, f64), rhs: (usize, f64)) -> usize {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(Node { lhs, rhs });
        nodes.len() - 1
    }

    /// Backward sweep from `output`.
    pub fn gradient(&self, output: Var<'_>) -> Gradient {
        let nodes = self.nodes.borrow();
        let mut adjoints = vec![0.0; nodes.len()];
        adjoints[output.index] = 1.0;
        for i in (0..=output.index).rev() {
            let a = adjoints[i];
            if a == 0.0 {
                continue;
            }
            let node = nodes[i];
            adjoints[node.lhs.0] += node.lhs.1 * a;
            adjoints[node.rhs.0] += node.rhs.1 * a;
        }
        Gradient { adjoints }
    }
}

/// Adjoints of every node for one backward sweep.
#[derive(Debug, Clone)]
pub struct Gradient {
    adjoints: Vec<f64>,
}

impl Gradient {
    pub fn wrt(&self, var: Var<'_>) -> f64 {
        self.adjoints.get(var.index).copied().unwrap_or(0.0)
    }

    pub fn wrt_all(&self, vars: &[Var<'_>]) -> Vec<f64> {
        vars.iter().map(|&v| self.wrt(v)).collect()
    }
}

/// A value recorded on a [`Tape`].
#[derive(Debug, Clone, Copy)]
pub struct Var<'t> {
    tape: &'t Tape,
    index: usize,
    value: f64,
}

impl<'t> Var<'t> {
    pub fn value(&self) -> f64 {
        self.value
    }

    fn unary(&self, value: f64, partial: f64) -> Var<'t> {
        let index = self.tape.push((self.index, partial), (0, 0.0));
        Var {
            tape: self.tape,
            index,
            value,
        }
    }

    fn binary(&self, other: &Var<'t>, value: f64, dl: f64, dr: f64) -> Var<'t> {
        debug_assert!(std::ptr::eq(self.tape, other.tape), "vars from different tapes");
        let index = self.tape.push((self.index, dl), (other.index, dr));
        Var {
            tape: self.tape,
            index,
            value,
        }
    }
}

impl<'t> Add for Var<'t> {
    type Output = Var<'t>;

    fn add(self, rhs: Var<'t>) -> Var<'t> {
        self.binary(&rhs, self.value + rhs.value, 1.0, 1.0)
    }
}

impl<'t> Sub for Var<'t> {
    type Output = Var<'t>;

    fn sub(self, rhs: Var<'t>) -> Var<'t> {
        self.binary(&rhs, self.value - rhs.value, 1.0, -1.0)
    }
}

impl<'t> Mul for Var<'t> {
    type Output = Var<'t>;

    fn mul(self, rhs: Var<'t>) -> Var<'t> {
        self.binary(&rhs, self.value * rhs.value, rhs.value, self.value)
    }
}

impl<'t> Neg for Var<'t> {
    type Output = Var<'t>;

    fn neg(self) -> Var<'t> {
        self.unary(-self.value, -1.0)
    }
}

impl<'t> Scalar for Var<'t> {
    fn constant(&self, v: f64) -> Var<'t> {
        self.tape.var(v)
    }

    fn tanh(&self) -> Var<'t> {
        let t = self.value.tanh();
        self.unary(t, 1.0 - t * t)
    }

    fn sin(&self) -> Var<'t> {
        self.unary(self.value.sin(), self.value.cos())
    }

    fn cos(&self) -> Var<'t> {
        self.unary(self.value.cos(), -self.value.sin())
    }

    fn exp(&self) -> Var<'t> {
        let e = self.value.exp();
        self.unary(e, e)
    }

    fn sqrt(&self) -> Var<'t> {
        let s = self.value.sqrt();
        // Subgradient 0 at the origin keeps norms differentiable there.
        let d = if s > 0.0 { 0.5 / s } else { 0.0 };
        self.unary(s, d)
    }

    fn abs(&self) -> Var<'t> {
        let sign = if self.value > 0.0 {
            1.0
        } else if self.value < 0.0 {
            -1.0
        } else {
            0.0
        };
        self.unary(self.value.abs(), sign)
    }

    fn max(&self, other: &Var<'t>) -> Var<'t> {
        if self.value >= other.value {
            self.binary(other, self.value, 1.0, 0.0)
        } else {
            self.binary(other, other.value, 0.0, 1.0)
        }
    }

    fn min(&self, other: &Var<'t>) -> Var<'t> {
        if self.value <= other.value {
            self.binary(other, self.value, 1.0, 0.0)
        } else {
            self.binary(other, other.value, 0.0, 1.0)
        }
    }

    fn scale(&self, k: f64) -> Var<'t> {
        self.unary(k * self.value, k)
    }

    fn square(&self) -> Var<'t> {
        self.unary(self.value * self.value, 2.0 * self.value)
    }
}
