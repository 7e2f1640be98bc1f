use std::f64::consts::PI;

use certreach_ir::domain::DomainBox;
use certreach_ir::dynamics::Dynamics;
use certreach_ir::scalar::{norm, Scalar};

/// Constant-speed unicycle `x' = v cos θ, y' = v sin θ, θ' = ω`, `|ω| <= ω_max`.
///
/// The target is a disc around the origin in the position plane; heading is
/// unconstrained.
#[derive(Debug, Clone, PartialEq)]
pub struct DubinsCar {
    pub speed: f64,
    pub turn_rate_bound: f64,
    pub target_radius: f64,
    pub half_width: f64,
}

impl Default for DubinsCar {
    fn default() -> Self {
        Self {
            speed: 0.6,
            turn_rate_bound: 1.1,
            target_radius: 0.25,
            half_width: 1.0,
        }
    }
}

impl Dynamics for DubinsCar {
    fn name(&self) -> &str {
        "dubins_car"
    }

    fn state_dim(&self) -> usize {
        3
    }

    fn domain(&self) -> DomainBox {
        DomainBox::new(
            vec![-self.half_width, -self.half_width, -PI],
            vec![self.half_width, self.half_width, PI],
        )
    }

    fn control_bound(&self) -> f64 {
        self.turn_rate_bound
    }

    fn drift<S: Scalar>(&self, x: &[S]) -> Vec<S> {
        let theta = &x[2];
        vec![
            theta.cos().scale(self.speed),
            theta.sin().scale(self.speed),
            x[0].constant(0.0),
        ]
    }

    fn control_gain<S: Scalar>(&self, x: &[S]) -> Vec<Vec<S>> {
        vec![vec![
            x[0].constant(0.0),
            x[0].constant(0.0),
            x[0].constant(1.0),
        ]]
    }

    fn target_membership<S: Scalar>(&self, x: &[S]) -> S {
        norm(&x[0], &x[..2]) - x[0].constant(self.target_radius)
    }
}
