//! The train / verify / extract / prune loop.
//!
//! ```text
//! INIT -> TRAIN -> VERIFY -> CONVERGED
//!                    |  \
//!                    |   EXTRACT -> PRUNE -> TRAIN
//!                    FAILED (iteration cap, stall cap, instability, budget)
//! ```
//!
//! Phases run strictly in sequence: the verifier only ever sees a fully
//! fitted certificate, and the dataset is only mutated between phases.

use std::fmt;
use std::time::Instant;

use certreach_ir::certificate::{
    Activation, Certificate, CertificateError, MlpShape, PolynomialShape,
};
use certreach_ir::config::{ConfigError, ModelType, RunConfig};
use certreach_ir::dynamics::Dynamics;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::backend::{BackendUnavailable, SolverFactory};
use crate::counterexample::Counterexample;
use crate::dataset::{Dataset, SampleTag};
use crate::residual::{check_dynamics_contract, ContractViolation};
use crate::result::{QueryStats, VerificationStatus};
use crate::timeout::{deadline_exceeded, deadline_from_timeout_secs};
use crate::trainer::{Trainer, TrainerSettings, TrainingError, TrainingState};
use crate::verifier::{Verifier, VerifierSettings, VerifyError};

/// Random states sampled for the dynamics contract check at INIT.
const CONTRACT_SAMPLES: usize = 64;

/// Fatal errors. Running out of iterations or time is not an error; it is
/// reported through [`CegisStatus::Failed`].
#[derive(Debug, Error)]
pub enum CegisError {
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),
    #[error("dynamics contract violated: {0}")]
    DynamicsContract(#[from] ContractViolation),
    #[error("certificate does not fit this run: {0}")]
    Certificate(#[from] CertificateError),
    #[error("training failed: {0}")]
    Training(TrainingError),
    #[error("verification failed: {0}")]
    Verify(VerifyError),
    #[error("artifact error: {0}")]
    Artifact(#[from] certreach_proof_kernel::ArtifactError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Backend(#[from] BackendUnavailable),
    #[error("saved certificate belongs to `{found}`, not `{expected}`")]
    ModelMismatch { expected: String, found: String },
}

/// Contract violations found while training or verifying are reported the
/// same way as those found at INIT.
impl From<TrainingError> for CegisError {
    fn from(err: TrainingError) -> Self {
        match err {
            TrainingError::DynamicsContract(violation) => CegisError::DynamicsContract(violation),
            other => CegisError::Training(other),
        }
    }
}

impl From<VerifyError> for CegisError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::DynamicsContract(violation) => CegisError::DynamicsContract(violation),
            other => CegisError::Verify(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    IterationCap,
    StallCap,
    NumericalInstability,
    BudgetExhausted,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureReason::IterationCap => "iteration cap reached without verification",
            FailureReason::StallCap => "too many consecutive inconclusive verifications",
            FailureReason::NumericalInstability => "training diverged twice in a row",
            FailureReason::BudgetExhausted => "time budget exhausted",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum CegisStatus {
    Converged,
    Failed(FailureReason),
}

impl CegisStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, CegisStatus::Converged)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseVerdict {
    Verified,
    Counterexample,
    Inconclusive,
}

/// What happened in one TRAIN + VERIFY round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub train_loss: f64,
    pub train_ms: u64,
    pub retried_training: bool,
    /// Training resumed from the previous round's optimizer state.
    pub fine_tuned: bool,
    pub learning_rate: f64,
    pub verdict: PhaseVerdict,
    pub queries: QueryStats,
    pub verify_ms: u64,
    pub counterexample: Option<Counterexample>,
    pub dataset_size: usize,
    pub counterexamples_total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CegisTermination {
    pub reason: String,
    pub iteration_budget: usize,
    pub iterations_used: usize,
    pub stall_count: usize,
    pub elapsed_ms: u64,
}

/// Final certificate of a run plus how the run ended. `certificate` is
/// verified exactly when `status` is [`CegisStatus::Converged`].
#[derive(Debug, Clone)]
pub struct CegisOutcome {
    pub status: CegisStatus,
    pub certificate: Certificate,
    pub history: Vec<IterationRecord>,
    pub counterexamples: Vec<Counterexample>,
    pub termination: CegisTermination,
}

impl CegisOutcome {
    pub fn verified(&self) -> bool {
        self.status.is_converged()
    }

    pub fn iterations(&self) -> usize {
        self.termination.iterations_used
    }
}

/// Fresh certificate for `cfg`: polynomial (zero) or learned (seeded Xavier).
pub fn initial_certificate<R: Rng>(cfg: &RunConfig, state_dim: usize, rng: &mut R) -> Certificate {
    let input_dim = state_dim + 1;
    if cfg.use_polynomial {
        Certificate::polynomial(
            PolynomialShape {
                input_dim,
                degree: cfg.poly_degree,
            },
            true,
        )
    } else {
        let activation = match cfg.model_type {
            ModelType::Tanh => Activation::Tanh,
            ModelType::Sine => Activation::Sine {
                frequency: cfg.sine_frequency,
            },
        };
        Certificate::learned(
            MlpShape {
                input_dim,
                num_nl: cfg.num_nl,
                num_hl: cfg.num_hl,
                activation,
            },
            true,
            rng,
        )
    }
}

pub struct Cegis<'a, D, F> {
    dynamics: &'a D,
    config: RunConfig,
    trainer: Trainer<'a, D>,
    verifier: Verifier<'a, D, F>,
}

impl<'a, D: Dynamics, F: SolverFactory> Cegis<'a, D, F> {
    /// INIT: validate the configuration and the dynamics. Nothing is
    /// sampled or trained if either is rejected.
    pub fn new(
        dynamics: &'a D,
        config: RunConfig,
        factory: F,
        verifier_settings: VerifierSettings,
    ) -> Result<Self, CegisError> {
        config.validate()?;
        let mut sample_rng = ChaCha8Rng::seed_from_u64(config.seed ^ 0x5eed);
        let domain = dynamics.domain();
        let mut states = vec![domain.lower.clone(), domain.upper.clone(), domain.center()];
        for _ in 0..CONTRACT_SAMPLES {
            let u: Vec<f64> = (0..domain.dim()).map(|_| sample_rng.gen::<f64>()).collect();
            states.push(domain.lerp(&u));
        }
        check_dynamics_contract(dynamics, &states)?;

        let trainer = Trainer::new(dynamics, TrainerSettings::from_config(&config));
        let verifier = Verifier::new(dynamics, factory, verifier_settings);
        Ok(Self {
            dynamics,
            config,
            trainer,
            verifier,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn trainer(&self) -> &Trainer<'a, D> {
        &self.trainer
    }

    pub fn verifier(&self) -> &Verifier<'a, D, F> {
        &self.verifier
    }

    /// Run the loop to convergence or failure, starting from `initial` if
    /// given (e.g. a loaded model) or from a fresh certificate.
    pub fn run(&self, initial: Option<Certificate>) -> Result<CegisOutcome, CegisError> {
        let cfg = &self.config;
        let started = Instant::now();
        let deadline = deadline_from_timeout_secs(cfg.time_budget_secs);
        let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);

        let mut cert = match initial {
            Some(cert) => {
                cert.check()?;
                let expected = self.dynamics.state_dim() + usize::from(cert.time_varying);
                if cert.input_dim() != expected {
                    return Err(VerifyError::InputDimension {
                        expected,
                        actual: cert.input_dim(),
                    }
                    .into());
                }
                cert
            }
            None => initial_certificate(cfg, self.dynamics.state_dim(), &mut rng),
        };
        let mut dataset = Dataset::generate(
            self.dynamics.domain(),
            cfg.time_horizon,
            cfg.num_uniform,
            cfg.num_boundary,
            &mut rng,
        );
        info!(
            system = self.dynamics.name(),
            representation = %cert.kind(),
            params = cert.num_params(),
            samples = dataset.len(),
            "CEGIS initialized"
        );

        let mut training = TrainingState::new(self.trainer.settings());
        let mut history = Vec::new();
        let mut counterexamples = Vec::new();
        let mut stall = 0usize;
        let mut pruned = false;

        let finish = |status: CegisStatus,
                      certificate: Certificate,
                      history: Vec<IterationRecord>,
                      counterexamples: Vec<Counterexample>,
                      stall: usize| {
            let termination = CegisTermination {
                reason: match status {
                    CegisStatus::Converged => "verified".to_string(),
                    CegisStatus::Failed(reason) => reason.to_string(),
                },
                iteration_budget: cfg.max_iterations,
                iterations_used: history.len(),
                stall_count: stall,
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
            match status {
                CegisStatus::Converged => info!(
                    iterations = termination.iterations_used,
                    elapsed_ms = termination.elapsed_ms,
                    "CEGIS converged"
                ),
                CegisStatus::Failed(reason) => warn!(
                    iterations = termination.iterations_used,
                    ?reason,
                    "CEGIS failed; returning unverified certificate"
                ),
            }
            CegisOutcome {
                status,
                certificate,
                history,
                counterexamples,
                termination,
            }
        };

        for iteration in 1..=cfg.max_iterations {
            if deadline_exceeded(deadline) {
                let status = CegisStatus::Failed(FailureReason::BudgetExhausted);
                return Ok(finish(status, cert, history, counterexamples, stall));
            }

            // TRAIN
            info!(iteration, samples = dataset.len(), "TRAIN");
            let fit = self.trainer.fit_with(&cert, &dataset, &mut training, &mut rng);
            let (fitted, report, retried) = match fit {
                Ok((fitted, report)) => (fitted, report, false),
                Err(TrainingError::NumericalInstability { epoch, step, loss }) => {
                    warn!(
                        iteration,
                        epoch,
                        step,
                        loss,
                        "Training diverged; retrying from last good parameters"
                    );
                    training.back_off();
                    match self.trainer.fit_with(&cert, &dataset, &mut training, &mut rng) {
                        Ok((fitted, report)) => (fitted, report, true),
                        Err(_) => {
                            let status = CegisStatus::Failed(FailureReason::NumericalInstability);
                            return Ok(finish(status, cert, history, counterexamples, stall));
                        }
                    }
                }
                Err(err) => return Err(err.into()),
            };
            cert = fitted;

            if deadline_exceeded(deadline) {
                let status = CegisStatus::Failed(FailureReason::BudgetExhausted);
                return Ok(finish(status, cert, history, counterexamples, stall));
            }

            // VERIFY
            info!(iteration, "VERIFY");
            let result = self.verifier.verify_until(&cert, deadline)?;
            let mut record = IterationRecord {
                iteration,
                train_loss: report.final_loss.total,
                train_ms: report.elapsed.as_millis() as u64,
                retried_training: retried,
                fine_tuned: report.fine_tuned,
                learning_rate: report.learning_rate,
                verdict: PhaseVerdict::Inconclusive,
                queries: result.stats,
                verify_ms: result.elapsed.as_millis() as u64,
                counterexample: None,
                dataset_size: dataset.len(),
                counterexamples_total: dataset.count(SampleTag::Counterexample),
            };

            match result.status {
                VerificationStatus::Verified => {
                    record.verdict = PhaseVerdict::Verified;
                    history.push(record);
                    return Ok(finish(
                        CegisStatus::Converged,
                        cert,
                        history,
                        counterexamples,
                        stall,
                    ));
                }
                VerificationStatus::Counterexample(cex) => {
                    // EXTRACT
                    info!(
                        iteration,
                        kind = %cex.kind,
                        clause = %cex.clause,
                        margin = cex.margin,
                        point = ?cex.point,
                        "EXTRACT"
                    );
                    dataset.ingest(&cex);
                    stall = 0;
                    record.verdict = PhaseVerdict::Counterexample;
                    record.counterexample = Some(cex.clone());
                    record.dataset_size = dataset.len();
                    record.counterexamples_total = dataset.count(SampleTag::Counterexample);
                    counterexamples.push(cex);

                    // PRUNE
                    if cfg.prune_after_initial && !pruned {
                        let report =
                            dataset.prune(cfg.retained_anchors, cfg.pruned_uniform, &mut rng);
                        info!(
                            removed = report.removed_uniform,
                            retained = report.retained_uniform,
                            regenerated = report.regenerated_uniform,
                            counterexamples = report.counterexamples,
                            "PRUNE"
                        );
                        pruned = true;
                        record.dataset_size = dataset.len();
                    }
                    history.push(record);
                }
                VerificationStatus::Timeout { reason } => {
                    stall += 1;
                    warn!(
                        iteration,
                        stall,
                        limit = cfg.stall_limit,
                        %reason,
                        "Verification inconclusive"
                    );
                    history.push(record);
                    if deadline_exceeded(deadline) {
                        let status = CegisStatus::Failed(FailureReason::BudgetExhausted);
                        return Ok(finish(status, cert, history, counterexamples, stall));
                    }
                    if stall >= cfg.stall_limit {
                        let status = CegisStatus::Failed(FailureReason::StallCap);
                        return Ok(finish(status, cert, history, counterexamples, stall));
                    }
                }
            }
        }

        let status = CegisStatus::Failed(FailureReason::IterationCap);
        Ok(finish(status, cert, history, counterexamples, stall))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::testing::{Fixed, Pinhole, Still};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use certreach_ir::certificate::{CertificateShape, RepresentationKind};
    use certreach_ir::domain::DomainBox;
    use certreach_ir::scalar::Scalar;

    fn config() -> RunConfig {
        RunConfig {
            use_polynomial: true,
            poly_degree: 1,
            epsilon: 0.25,
            num_epochs: 60,
            batch_size: 32,
            learning_rate: 0.05,
            grad_clip: 0.0,
            num_uniform: 200,
            num_boundary: 50,
            time_subdivisions: 2,
            state_splits: 2,
            verify_workers: 2,
            max_iterations: 4,
            ..RunConfig::default()
        }
    }

    fn cegis<F: SolverFactory>(cfg: RunConfig, factory: F) -> Cegis<'static, Still, F> {
        let settings = VerifierSettings::from_config(&cfg);
        Cegis::new(&Still, cfg, factory, settings).unwrap()
    }

    /// Same as [`Still`] but with a target so steep that any loss overflows.
    struct Steep;

    impl Dynamics for Steep {
        fn name(&self) -> &str {
            "steep"
        }

        fn state_dim(&self) -> usize {
            1
        }

        fn domain(&self) -> DomainBox {
            DomainBox::cube(1, -1.0, 1.0)
        }

        fn control_bound(&self) -> f64 {
            0.0
        }

        fn drift<S: Scalar>(&self, x: &[S]) -> Vec<S> {
            vec![x[0].constant(0.0)]
        }

        fn control_gain<S: Scalar>(&self, _x: &[S]) -> Vec<Vec<S>> {
            Vec::new()
        }

        fn target_membership<S: Scalar>(&self, x: &[S]) -> S {
            x[0].scale(1e308)
        }
    }

    /// [`Still`] whose target is NaN on the training tape for the first
    /// `left` evaluations, so the first fit diverges and a retry is clean.
    struct Hiccup {
        left: AtomicUsize,
    }

    impl Dynamics for Hiccup {
        fn name(&self) -> &str {
            "hiccup"
        }

        fn state_dim(&self) -> usize {
            1
        }

        fn domain(&self) -> DomainBox {
            DomainBox::cube(1, -1.0, 1.0)
        }

        fn control_bound(&self) -> f64 {
            0.0
        }

        fn drift<S: Scalar>(&self, x: &[S]) -> Vec<S> {
            vec![x[0].constant(0.0)]
        }

        fn control_gain<S: Scalar>(&self, _x: &[S]) -> Vec<Vec<S>> {
            Vec::new()
        }

        fn target_membership<S: Scalar>(&self, x: &[S]) -> S {
            let on_tape = std::any::type_name::<S>().contains("tape::Var");
            let spoiled = on_tape
                && self
                    .left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if spoiled {
                x[0].constant(f64::NAN)
            } else {
                x[0].clone()
            }
        }
    }

    #[test]
    fn polynomial_certificate_converges_on_still_system() {
        let cfg = config();
        let backend = Backend::from_config(&cfg).unwrap();
        let outcome = cegis(cfg, backend).run(None).unwrap();
        assert_eq!(outcome.status, CegisStatus::Converged);
        assert!(outcome.verified());
        let last = outcome.history.last().unwrap();
        assert_eq!(last.verdict, PhaseVerdict::Verified);
        assert_eq!(last.queries.refuted, last.queries.issued);
        // V(0, x) must match the target x within epsilon.
        let v = outcome.certificate.evaluate(&[0.0, 0.5]);
        assert!((v - 0.5).abs() <= 0.25, "V(0, 0.5) = {v}");
    }

    #[test]
    fn invalid_configuration_is_rejected_before_sampling() {
        let cfg = RunConfig {
            epsilon: -1.0,
            ..config()
        };
        let settings = VerifierSettings::from_config(&cfg);
        let err = Cegis::new(&Still, cfg, Fixed::unknown(), settings).err();
        assert!(matches!(
            err,
            Some(CegisError::Configuration(ConfigError::InvalidEpsilon(_)))
        ));
    }

    #[test]
    fn undecidable_queries_hit_the_stall_cap() {
        let cfg = RunConfig {
            num_epochs: 1,
            stall_limit: 2,
            max_iterations: 5,
            ..config()
        };
        let outcome = cegis(cfg, Fixed::unknown()).run(None).unwrap();
        assert_eq!(outcome.status, CegisStatus::Failed(FailureReason::StallCap));
        assert!(!outcome.verified());
        assert_eq!(outcome.iterations(), 2);
        assert_eq!(outcome.termination.stall_count, 2);
        assert!(outcome
            .history
            .iter()
            .all(|r| r.verdict == PhaseVerdict::Inconclusive));
        assert!(outcome.certificate.check().is_ok());
    }

    #[test]
    fn counterexamples_accumulate_until_the_iteration_cap() {
        // A barely trained certificate stays near zero, so the boundary
        // witness at x = 0.9 is always a genuine violation.
        let cfg = RunConfig {
            num_epochs: 1,
            learning_rate: 1e-6,
            max_iterations: 3,
            prune_after_initial: true,
            retained_anchors: 5,
            pruned_uniform: 10,
            ..config()
        };
        let outcome = cegis(cfg, Fixed::sat(0.9)).run(None).unwrap();
        assert_eq!(
            outcome.status,
            CegisStatus::Failed(FailureReason::IterationCap)
        );
        assert_eq!(outcome.counterexamples.len(), 3);
        assert!(outcome
            .history
            .iter()
            .all(|r| r.verdict == PhaseVerdict::Counterexample));
        // Pruned once after the first extraction: 5 + 10 uniform, 50
        // anchors, then one more counterexample per round.
        let sizes: Vec<usize> = outcome.history.iter().map(|r| r.dataset_size).collect();
        assert_eq!(sizes, vec![66, 67, 68]);
        let totals: Vec<usize> = outcome
            .history
            .iter()
            .map(|r| r.counterexamples_total)
            .collect();
        assert_eq!(totals, vec![1, 2, 3]);
        assert_eq!(outcome.termination.stall_count, 0);
    }

    #[test]
    fn repeated_divergence_fails_with_numerical_instability() {
        let cfg = RunConfig {
            num_epochs: 1,
            boundary_fraction: 0.5,
            ..config()
        };
        let settings = VerifierSettings::from_config(&cfg);
        let cegis = Cegis::new(&Steep, cfg, Fixed::unknown(), settings).unwrap();
        let outcome = cegis.run(None).unwrap();
        assert_eq!(
            outcome.status,
            CegisStatus::Failed(FailureReason::NumericalInstability)
        );
        assert!(outcome.history.is_empty());
        assert!(outcome.certificate.params.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn single_divergence_is_retried_from_the_last_good_state() {
        let cfg = RunConfig {
            num_epochs: 1,
            max_iterations: 1,
            ..config()
        };
        let system = Hiccup {
            left: AtomicUsize::new(1),
        };
        let settings = VerifierSettings::from_config(&cfg);
        let cegis = Cegis::new(&system, cfg, Fixed::unknown(), settings).unwrap();
        let outcome = cegis.run(None).unwrap();
        assert_eq!(
            outcome.status,
            CegisStatus::Failed(FailureReason::IterationCap)
        );
        assert_eq!(outcome.history.len(), 1);
        let record = &outcome.history[0];
        assert!(record.retried_training);
        assert!(!record.fine_tuned);
        assert!(record.train_loss.is_finite());
        // The retry backs off to half the configured learning rate.
        assert!((record.learning_rate - 0.025).abs() < 1e-12);
        assert_eq!(system.left.load(Ordering::SeqCst), 0);
        assert!(outcome.certificate.params.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn later_rounds_fine_tune_the_previous_fit() {
        let cfg = RunConfig {
            num_epochs: 1,
            learning_rate: 1e-6,
            max_iterations: 2,
            ..config()
        };
        let outcome = cegis(cfg, Fixed::sat(0.9)).run(None).unwrap();
        let tuned: Vec<bool> = outcome.history.iter().map(|r| r.fine_tuned).collect();
        assert_eq!(tuned, vec![false, true]);
        assert!(outcome.history.iter().all(|r| !r.retried_training));
    }

    #[test]
    fn dynamics_failing_at_a_solver_witness_abort_the_run() {
        let cfg = RunConfig {
            num_epochs: 1,
            learning_rate: 1e-6,
            ..config()
        };
        let settings = VerifierSettings::from_config(&cfg);
        let cegis = Cegis::new(&Pinhole, cfg, Fixed::sat(0.9), settings).unwrap();
        let err = cegis.run(None).unwrap_err();
        let CegisError::DynamicsContract(ContractViolation::NonFinite {
            quantity, state, ..
        }) = err
        else {
            panic!("expected a contract violation, got {err:?}");
        };
        assert_eq!(quantity, "drift");
        assert_eq!(state, vec![0.9]);
    }

    #[test]
    fn contract_violations_from_any_phase_share_one_error() {
        let violation = ContractViolation::NonFinite {
            system: "pinhole".into(),
            quantity: "drift",
            state: vec![0.9],
        };
        let from_training = CegisError::from(TrainingError::DynamicsContract(violation.clone()));
        let from_verifier = CegisError::from(VerifyError::DynamicsContract(violation.clone()));
        for err in [from_training, from_verifier] {
            assert!(matches!(err, CegisError::DynamicsContract(ref v) if *v == violation));
        }
        assert!(matches!(
            CegisError::from(TrainingError::EmptyDataset),
            CegisError::Training(TrainingError::EmptyDataset)
        ));
    }

    #[test]
    fn stationary_initial_certificate_is_accepted() {
        let shape = certreach_ir::certificate::PolynomialShape {
            input_dim: 1,
            degree: 1,
        };
        let cert = Certificate::polynomial(shape, false);
        let cfg = RunConfig {
            num_epochs: 1,
            max_iterations: 1,
            ..config()
        };
        let outcome = cegis(cfg, Fixed::unknown()).run(Some(cert)).unwrap();
        assert!(!outcome.certificate.time_varying);
        assert_eq!(outcome.history.len(), 1);
    }

    #[test]
    fn initial_certificate_must_match_the_system() {
        let shape = certreach_ir::certificate::PolynomialShape {
            input_dim: 3,
            degree: 1,
        };
        let wrong = Certificate::polynomial(shape, true);
        let err = cegis(config(), Fixed::unknown()).run(Some(wrong)).unwrap_err();
        assert!(matches!(
            err,
            CegisError::Verify(VerifyError::InputDimension { expected: 2, .. })
        ));
    }

    #[test]
    fn fresh_certificate_follows_the_configuration() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let poly = initial_certificate(&config(), 2, &mut rng);
        assert_eq!(poly.kind(), RepresentationKind::Polynomial);
        assert_eq!(poly.input_dim(), 3);

        let cfg = RunConfig {
            model_type: ModelType::Sine,
            sine_frequency: 2.0,
            num_nl: 8,
            ..RunConfig::default()
        };
        let net = initial_certificate(&cfg, 2, &mut rng);
        let CertificateShape::Learned(shape) = &net.shape else {
            panic!("expected a learned certificate");
        };
        assert_eq!(shape.num_nl, 8);
        assert_eq!(shape.activation, Activation::Sine { frequency: 2.0 });
        assert!(net.time_varying);
    }
}
