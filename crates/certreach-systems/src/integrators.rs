//! Integrator chains with a single bounded control on the last state.

use certreach_ir::domain::DomainBox;
use certreach_ir::dynamics::Dynamics;
use certreach_ir::scalar::{norm, Scalar};

/// Shift drift `x_i' = x_{i+1}`, last component driven by the control.
fn chain_drift<S: Scalar>(x: &[S]) -> Vec<S> {
    let zero = x[0].constant(0.0);
    x.iter().skip(1).cloned().chain(std::iter::once(zero)).collect()
}

fn last_axis_gain<S: Scalar>(x: &[S]) -> Vec<Vec<S>> {
    let n = x.len();
    let column = (0..n)
        .map(|i| x[0].constant(if i + 1 == n { 1.0 } else { 0.0 }))
        .collect();
    vec![column]
}

/// `x1' = x2, x2' = u`.
#[derive(Debug, Clone, PartialEq)]
pub struct DoubleIntegrator {
    pub control_bound: f64,
    pub target_radius: f64,
    pub half_width: f64,
}

impl Default for DoubleIntegrator {
    fn default() -> Self {
        Self {
            control_bound: 1.0,
            target_radius: 0.25,
            half_width: 1.0,
        }
    }
}

impl Dynamics for DoubleIntegrator {
    fn name(&self) -> &str {
        "double_integrator"
    }

    fn state_dim(&self) -> usize {
        2
    }

    fn domain(&self) -> DomainBox {
        DomainBox::cube(2, -self.half_width, self.half_width)
    }

    fn control_bound(&self) -> f64 {
        self.control_bound
    }

    fn drift<S: Scalar>(&self, x: &[S]) -> Vec<S> {
        chain_drift(x)
    }

    fn control_gain<S: Scalar>(&self, x: &[S]) -> Vec<Vec<S>> {
        last_axis_gain(x)
    }

    fn target_membership<S: Scalar>(&self, x: &[S]) -> S {
        norm(&x[0], x) - x[0].constant(self.target_radius)
    }
}

/// `x1' = x2, x2' = x3, x3' = u`.
#[derive(Debug, Clone, PartialEq)]
pub struct TripleIntegrator {
    pub control_bound: f64,
    pub target_radius: f64,
    pub half_width: f64,
}

impl Default for TripleIntegrator {
    fn default() -> Self {
        Self {
            control_bound: 1.0,
            target_radius: 0.25,
            half_width: 1.0,
        }
    }
}

impl Dynamics for TripleIntegrator {
    fn name(&self) -> &str {
        "triple_integrator"
    }

    fn state_dim(&self) -> usize {
        3
    }

    fn domain(&self) -> DomainBox {
        DomainBox::cube(3, -self.half_width, self.half_width)
    }

    fn control_bound(&self) -> f64 {
        self.control_bound
    }

    fn drift<S: Scalar>(&self, x: &[S]) -> Vec<S> {
        chain_drift(x)
    }

    fn control_gain<S: Scalar>(&self, x: &[S]) -> Vec<Vec<S>> {
        last_axis_gain(x)
    }

    fn target_membership<S: Scalar>(&self, x: &[S]) -> S {
        norm(&x[0], x) - x[0].constant(self.target_radius)
    }
}
