//! Hamilton-Jacobi residual of a certificate under given dynamics.
//!
//! All terms are generic over [`Scalar`]: the trainer differentiates them on
//! the tape, the verifier turns them into solver terms, and diagnostics
//! evaluate them as `f64`.

use certreach_ir::certificate::Certificate;
use certreach_ir::config::{MinWith, ReachAim, ReachMode, RunConfig, SetType};
use certreach_ir::dynamics::Dynamics;
use certreach_ir::scalar::Scalar;
use thiserror::Error;

/// Sign conventions that select which residual is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResidualSettings {
    pub reach_mode: ReachMode,
    pub reach_aim: ReachAim,
    pub min_with: MinWith,
    pub set_type: SetType,
}

impl From<&RunConfig> for ResidualSettings {
    fn from(cfg: &RunConfig) -> Self {
        Self {
            reach_mode: cfg.reach_mode,
            reach_aim: cfg.reach_aim,
            min_with: cfg.min_with,
            set_type: cfg.set_type,
        }
    }
}

/// Residual components at one input `[t, x]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualTerms<S> {
    /// `V(t, x)`.
    pub value: S,
    /// Signed distance `l(x)` the value must match at `t = 0`.
    pub boundary: S,
    /// `dV/dt + H(x, dV/dx)` after the tube clamp and the reach-mode sign.
    pub pde: S,
    /// `pde`, or `max(pde, V - l)` when minimizing against the target.
    pub combined: S,
}

impl<S: Scalar> ResidualTerms<S> {
    /// `V - l`.
    pub fn value_gap(&self) -> S {
        self.value.clone() - self.boundary.clone()
    }
}

/// Signed distance used as the terminal condition: the target for `reach`,
/// the avoid set for `avoid`.
pub fn boundary_function<S: Scalar, D: Dynamics>(dynamics: &D, aim: ReachAim, x: &[S]) -> S {
    match aim {
        ReachAim::Reach => dynamics.target_membership(x),
        ReachAim::Avoid => dynamics.avoid_membership(x),
    }
}

/// Build every residual term with the certificate parameters given as
/// scalars, so the caller picks the evaluation domain.
pub fn residual_terms<S: Scalar, D: Dynamics>(
    dynamics: &D,
    cert: &Certificate,
    params: &[S],
    input: &[S],
    settings: ResidualSettings,
) -> ResidualTerms<S> {
    let jet = cert.jet_with(params, input);
    let state = if cert.time_varying {
        &input[1..]
    } else {
        input
    };
    let p = jet.state_gradient(cert.time_varying);

    let mut ham = dynamics.hamiltonian(state, p, settings.reach_aim);
    if settings.reach_mode == ReachMode::Backward {
        ham = -ham;
    }
    if settings.set_type == SetType::Tube {
        ham = ham.min(&ham.constant(0.0));
    }
    let pde = match jet.time_derivative(cert.time_varying) {
        Some(dvdt) => dvdt.clone() + ham,
        None => ham,
    };

    let boundary = boundary_function(dynamics, settings.reach_aim, state);
    let combined = match settings.min_with {
        MinWith::None => pde.clone(),
        MinWith::Target => pde.max(&(jet.value.clone() - boundary.clone())),
    };
    ResidualTerms {
        value: jet.value,
        boundary,
        pde,
        combined,
    }
}

/// Numeric residual evaluation bound to one system and sign convention.
#[derive(Debug, Clone)]
pub struct ResidualEvaluator<'a, D> {
    dynamics: &'a D,
    settings: ResidualSettings,
}

impl<'a, D: Dynamics> ResidualEvaluator<'a, D> {
    pub fn new(dynamics: &'a D, settings: ResidualSettings) -> Self {
        Self { dynamics, settings }
    }

    pub fn dynamics(&self) -> &'a D {
        self.dynamics
    }

    pub fn settings(&self) -> ResidualSettings {
        self.settings
    }

    pub fn terms(&self, cert: &Certificate, input: &[f64]) -> ResidualTerms<f64> {
        residual_terms(self.dynamics, cert, &cert.params, input, self.settings)
    }

    /// Terms at a full `[t, x]` point, whatever inputs `cert` takes.
    pub fn terms_at(&self, cert: &Certificate, point: &[f64]) -> ResidualTerms<f64> {
        self.terms(cert, certificate_input(cert, point))
    }

    /// `|R(t, x)|` at a `[t, x]` point; zero means the PDE holds exactly.
    pub fn interior_violation(&self, cert: &Certificate, point: &[f64]) -> f64 {
        self.terms_at(cert, point).combined.abs()
    }

    /// `|V(0, x) - l(x)|` for a state `x`.
    pub fn boundary_violation(&self, cert: &Certificate, state: &[f64]) -> f64 {
        let input = initial_input(cert, state);
        let terms = self.terms(cert, &input);
        (terms.value - terms.boundary).abs()
    }
}

/// Prefix `t = 0` to a state when the certificate is time-varying.
pub fn initial_input(cert: &Certificate, state: &[f64]) -> Vec<f64> {
    if cert.time_varying {
        std::iter::once(0.0).chain(state.iter().copied()).collect()
    } else {
        state.to_vec()
    }
}

/// The inputs `cert` takes from a `[t, x]` point: all of it, or just `x`
/// for a stationary certificate.
pub fn certificate_input<'p>(cert: &Certificate, point: &'p [f64]) -> &'p [f64] {
    if cert.time_varying {
        point
    } else {
        &point[1..]
    }
}

/// A dynamics implementation that returned something unusable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractViolation {
    #[error("`{system}` declares a malformed domain box")]
    MalformedDomain { system: String },
    #[error("`{system}` has state_dim {state_dim} but a {domain_dim}-dimensional domain")]
    DimensionMismatch {
        system: String,
        state_dim: usize,
        domain_dim: usize,
    },
    #[error("`{system}` returned {actual} {quantity} components, expected {expected}")]
    WrongArity {
        system: String,
        quantity: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("`{system}` returned a non-finite {quantity} at {state:?}")]
    NonFinite {
        system: String,
        quantity: &'static str,
        state: Vec<f64>,
    },
}

/// Check the shape of a dynamics implementation, then its outputs at each
/// of `states`.
pub fn check_dynamics_contract<D: Dynamics>(
    dynamics: &D,
    states: &[Vec<f64>],
) -> Result<(), ContractViolation> {
    let system = dynamics.name().to_string();
    let domain = dynamics.domain();
    let n = dynamics.state_dim();
    if !domain.is_well_formed() {
        return Err(ContractViolation::MalformedDomain { system });
    }
    if domain.dim() != n {
        return Err(ContractViolation::DimensionMismatch {
            system,
            state_dim: n,
            domain_dim: domain.dim(),
        });
    }
    let bounds_finite =
        dynamics.control_bound().is_finite() && dynamics.disturbance_bound().is_finite();
    if !bounds_finite {
        return Err(ContractViolation::NonFinite {
            system,
            quantity: "input bound",
            state: Vec::new(),
        });
    }
    states
        .iter()
        .try_for_each(|x| check_dynamics_at(dynamics, x))
}

/// Reject a non-finite or mis-shaped output of `dynamics` at state `x`.
pub fn check_dynamics_at<D: Dynamics>(dynamics: &D, x: &[f64]) -> Result<(), ContractViolation> {
    let n = dynamics.state_dim();
    let non_finite = |quantity: &'static str| ContractViolation::NonFinite {
        system: dynamics.name().to_string(),
        quantity,
        state: x.to_vec(),
    };
    let wrong_arity = |quantity: &'static str, actual: usize| ContractViolation::WrongArity {
        system: dynamics.name().to_string(),
        quantity,
        expected: n,
        actual,
    };

    let f = dynamics.drift(x);
    if f.len() != n {
        return Err(wrong_arity("drift", f.len()));
    }
    if f.iter().any(|v| !v.is_finite()) {
        return Err(non_finite("drift"));
    }
    let gains = dynamics
        .control_gain(x)
        .into_iter()
        .chain(dynamics.disturbance_gain(x));
    for column in gains {
        if column.len() != n {
            return Err(wrong_arity("gain column", column.len()));
        }
        if column.iter().any(|v| !v.is_finite()) {
            return Err(non_finite("gain"));
        }
    }
    if !dynamics.target_membership(x).is_finite() {
        return Err(non_finite("target distance"));
    }
    if !dynamics.avoid_membership(x).is_finite() {
        return Err(non_finite("avoid distance"));
    }
    let costate = vec![1.0; n];
    for aim in [ReachAim::Reach, ReachAim::Avoid] {
        if !dynamics.hamiltonian(x, &costate, aim).is_finite() {
            return Err(non_finite("hamiltonian"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use certreach_ir::certificate::{CertificateShape, PolynomialShape};
    use certreach_ir::domain::DomainBox;
    use certreach_ir::scalar::norm;
    use certreach_smt::terms::SmtTerm;

    /// `x' = u`, `|u| <= 1`, target `|x| <= 0.5`.
    struct Line;

    impl Dynamics for Line {
        fn name(&self) -> &str {
            "line"
        }

        fn state_dim(&self) -> usize {
            1
        }

        fn domain(&self) -> DomainBox {
            DomainBox::cube(1, -1.0, 1.0)
        }

        fn control_bound(&self) -> f64 {
            1.0
        }

        fn drift<S: Scalar>(&self, x: &[S]) -> Vec<S> {
            vec![x[0].constant(0.0)]
        }

        fn control_gain<S: Scalar>(&self, x: &[S]) -> Vec<Vec<S>> {
            vec![vec![x[0].constant(1.0)]]
        }

        fn target_membership<S: Scalar>(&self, x: &[S]) -> S {
            norm(&x[0], x) - x[0].constant(0.5)
        }
    }

    /// Returns NaN drift away from the origin.
    struct Broken;

    impl Dynamics for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn state_dim(&self) -> usize {
            1
        }

        fn domain(&self) -> DomainBox {
            DomainBox::cube(1, -1.0, 1.0)
        }

        fn control_bound(&self) -> f64 {
            1.0
        }

        fn drift<S: Scalar>(&self, x: &[S]) -> Vec<S> {
            vec![x[0].sqrt().scale(-1.0).sqrt()]
        }

        fn control_gain<S: Scalar>(&self, x: &[S]) -> Vec<Vec<S>> {
            vec![vec![x[0].constant(1.0)]]
        }

        fn target_membership<S: Scalar>(&self, x: &[S]) -> S {
            x[0].clone()
        }
    }

    /// `V(t, x) = c0 + c_t t + c_x x` over inputs `[t, x]`.
    fn affine(c0: f64, ct: f64, cx: f64) -> Certificate {
        let shape = PolynomialShape {
            input_dim: 2,
            degree: 1,
        };
        // Graded order: 1, t, x
        Certificate::from_params(CertificateShape::Polynomial(shape), true, vec![c0, ct, cx])
            .unwrap()
    }

    fn settings(
        mode: ReachMode,
        aim: ReachAim,
        min_with: MinWith,
        set: SetType,
    ) -> ResidualSettings {
        ResidualSettings {
            reach_mode: mode,
            reach_aim: aim,
            min_with,
            set_type: set,
        }
    }

    #[test]
    fn backward_reach_negates_hamiltonian() {
        // V = 0.1 t + 2 x  =>  dV/dt = 0.1, H_reach = -|2| = -2
        let cert = affine(0.0, 0.1, 2.0);
        let forward = settings(ReachMode::Forward, ReachAim::Reach, MinWith::None, SetType::Set);
        let backward = ResidualSettings {
            reach_mode: ReachMode::Backward,
            ..forward
        };
        let f = residual_terms(&Line, &cert, &cert.params, &[0.3, 0.2], forward);
        let b = residual_terms(&Line, &cert, &cert.params, &[0.3, 0.2], backward);
        assert!((f.pde - (0.1 - 2.0)).abs() < 1e-12);
        assert!((b.pde - (0.1 + 2.0)).abs() < 1e-12);
    }

    #[test]
    fn tube_clamps_positive_hamiltonian() {
        let cert = affine(0.0, 0.1, 2.0);
        let s = settings(ReachMode::Backward, ReachAim::Reach, MinWith::None, SetType::Tube);
        let terms = residual_terms(&Line, &cert, &cert.params, &[0.3, 0.2], s);
        // -H = 2 is clamped to 0.
        assert!((terms.pde - 0.1).abs() < 1e-12);
    }

    #[test]
    fn min_with_target_takes_max_with_value_gap() {
        // V = 1 everywhere, l(0.2) = -0.3, so V - l = 1.3 dominates pde = 0.
        let cert = affine(1.0, 0.0, 0.0);
        let s = settings(ReachMode::Backward, ReachAim::Reach, MinWith::Target, SetType::Set);
        let terms = residual_terms(&Line, &cert, &cert.params, &[0.5, 0.2], s);
        assert!(terms.pde.abs() < 1e-12);
        assert!((terms.combined - 1.3).abs() < 1e-12);
        assert!((terms.value_gap() - 1.3).abs() < 1e-12);
    }

    #[test]
    fn exact_boundary_fit_has_zero_boundary_violation() {
        // For x > 0, l(x) = x - 0.5, so V = x - 0.5 matches at t = 0.
        let cert = affine(-0.5, 0.0, 1.0);
        let s = settings(ReachMode::Backward, ReachAim::Reach, MinWith::None, SetType::Set);
        let eval = ResidualEvaluator::new(&Line, s);
        assert!(eval.boundary_violation(&cert, &[0.75]) < 1e-12);
        assert!((eval.boundary_violation(&cert, &[-0.75]) - 1.5).abs() < 1e-12);
        // dV/dt = 0, -H = |1| = 1.
        assert!((eval.interior_violation(&cert, &[0.4, 0.75]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn symbolic_terms_fold_to_numeric_values() {
        let cert = affine(0.2, -0.1, 0.7);
        let s = settings(ReachMode::Backward, ReachAim::Avoid, MinWith::None, SetType::Set);
        let params: Vec<SmtTerm> = cert.params.iter().map(|&p| SmtTerm::real(p)).collect();
        let sym = residual_terms(
            &Line,
            &cert,
            &params,
            &[SmtTerm::real(0.5), SmtTerm::real(0.25)],
            s,
        );
        let num = residual_terms(&Line, &cert, &cert.params, &[0.5, 0.25], s);
        let folded = sym.combined.as_real_lit().unwrap();
        assert!((folded - num.combined).abs() < 1e-12);
    }

    #[test]
    fn stationary_certificate_ignores_the_time_coordinate() {
        let shape = PolynomialShape {
            input_dim: 1,
            degree: 1,
        };
        // V(x) = x - 0.5
        let cert =
            Certificate::from_params(CertificateShape::Polynomial(shape), false, vec![-0.5, 1.0])
                .unwrap();
        let s = settings(ReachMode::Backward, ReachAim::Reach, MinWith::None, SetType::Set);
        let eval = ResidualEvaluator::new(&Line, s);
        assert_eq!(certificate_input(&cert, &[0.7, 0.25]), &[0.25]);
        // No dV/dt term, -H = |1| = 1 at any time.
        assert!((eval.interior_violation(&cert, &[0.7, 0.25]) - 1.0).abs() < 1e-12);
        assert!((eval.terms_at(&cert, &[0.0, 0.75]).value - 0.25).abs() < 1e-12);
        assert!(eval.boundary_violation(&cert, &[0.75]) < 1e-12);
    }

    #[test]
    fn pointwise_check_reports_the_offending_state() {
        assert_eq!(check_dynamics_at(&Broken, &[0.0]), Ok(()));
        assert_eq!(
            check_dynamics_at(&Broken, &[0.5]),
            Err(ContractViolation::NonFinite {
                system: "broken".into(),
                quantity: "drift",
                state: vec![0.5],
            })
        );
    }

    #[test]
    fn contract_check_flags_non_finite_drift() {
        assert_eq!(check_dynamics_contract(&Line, &[vec![0.3], vec![-0.3]]), Ok(()));
        let err = check_dynamics_contract(&Broken, &[vec![0.0], vec![0.5]]).unwrap_err();
        assert!(matches!(
            err,
            ContractViolation::NonFinite { quantity: "drift", .. }
        ));
    }
}
