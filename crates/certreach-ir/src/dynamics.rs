//! The capability contract every controlled system implements.

use crate::config::ReachAim;
use crate::domain::DomainBox;
use crate::scalar::{dot, Scalar};

/// A control-affine system `x' = f(x) + G(x) u + E(x) d` with box-bounded
/// control `|u_j| <= control_bound` and disturbance `|d_k| <= disturbance_bound`.
///
/// Every method is pure and generic over [`Scalar`], so one definition
/// serves the trainer (tape variables), numeric checks (`f64`), and the
/// verifier (`SmtTerm`).
pub trait Dynamics: Send + Sync {
    fn name(&self) -> &str;

    fn state_dim(&self) -> usize;

    /// Box in which the certificate must hold.
    fn domain(&self) -> DomainBox;

    fn control_bound(&self) -> f64;

    fn disturbance_bound(&self) -> f64 {
        0.0
    }

    /// Drift `f(x)`.
    fn drift<S: Scalar>(&self, x: &[S]) -> Vec<S>;

    /// Columns of the control matrix `G(x)`, one vector per control input.
    fn control_gain<S: Scalar>(&self, x: &[S]) -> Vec<Vec<S>>;

    /// Columns of the disturbance matrix `E(x)`.
    fn disturbance_gain<S: Scalar>(&self, _x: &[S]) -> Vec<Vec<S>> {
        Vec::new()
    }

    /// `H(x, p)` with control and disturbance extremized in closed form.
    ///
    /// For `Reach` the control minimizes and the disturbance maximizes
    /// (`p.f - u_max sum |p.g_j| + d_max sum |p.e_k|`); `Avoid` swaps the
    /// roles.
    fn hamiltonian<S: Scalar>(&self, x: &[S], p: &[S], aim: ReachAim) -> S {
        let zero = &p[0];
        let (control_sign, disturbance_sign) = match aim {
            ReachAim::Reach => (-1.0, 1.0),
            ReachAim::Avoid => (1.0, -1.0),
        };
        let mut h = dot(zero, p, &self.drift(x));
        let u_max = self.control_bound();
        if u_max != 0.0 {
            for g in self.control_gain(x) {
                h = h + dot(zero, p, &g).abs().scale(control_sign * u_max);
            }
        }
        let d_max = self.disturbance_bound();
        if d_max != 0.0 {
            for e in self.disturbance_gain(x) {
                h = h + dot(zero, p, &e).abs().scale(disturbance_sign * d_max);
            }
        }
        h
    }

    /// Signed distance to the target set, negative inside.
    fn target_membership<S: Scalar>(&self, x: &[S]) -> S;

    /// Signed distance to the avoid set, negative inside. Defaults to the
    /// target set.
    fn avoid_membership<S: Scalar>(&self, x: &[S]) -> S {
        self.target_membership(x)
    }
}
