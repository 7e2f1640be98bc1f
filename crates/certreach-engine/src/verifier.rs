//! Global verification of a certificate's residual bound.
//!
//! The domain is cut into regions and every (clause, region) query runs on
//! a fresh solver from a [`SolverFactory`]. Queries are independent and run
//! on a pool of scoped worker threads. The first numerically confirmed
//! counterexample cancels everything still in flight; the certificate is
//! verified only if every query is refuted.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use certreach_ir::certificate::Certificate;
use certreach_ir::config::RunConfig;
use certreach_ir::dynamics::Dynamics;
use certreach_smt::backends::smtlib_printer::ScriptWriter;
use certreach_smt::solver::{SatResult, SmtSolver};
use certreach_smt::sorts::SmtSort;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::SolverFactory;
use crate::counterexample::{extract_point, Counterexample};
use crate::query::{build_queries, partition_regions, Query};
use crate::residual::{check_dynamics_at, ContractViolation, ResidualEvaluator, ResidualSettings};
use crate::result::{QueryStats, VerificationResult, VerificationStatus};
use crate::timeout::{deadline_exceeded, effective_timeout, timeout_duration};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("certificate takes {actual} inputs, expected {expected}")]
    InputDimension { expected: usize, actual: usize },
    #[error("dynamics contract violated at a solver witness: {0}")]
    DynamicsContract(#[from] ContractViolation),
    #[error("solver `{solver}` failed on query {query} ({clause}): {message}")]
    Solver {
        solver: String,
        query: usize,
        clause: &'static str,
        message: String,
    },
    #[error("failed to write SMT dump {path}: {source}")]
    Dump {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifierSettings {
    pub epsilon: f64,
    pub residual: ResidualSettings,
    pub time_horizon: f64,
    pub time_subdivisions: usize,
    pub state_splits: usize,
    /// Worker threads; 0 means available parallelism.
    pub workers: usize,
    pub query_timeout: Option<Duration>,
    /// Write every query as an SMT-LIB2 script into this directory.
    pub dump_dir: Option<PathBuf>,
}

impl VerifierSettings {
    pub fn from_config(cfg: &RunConfig) -> Self {
        Self {
            epsilon: cfg.epsilon,
            residual: ResidualSettings::from(cfg),
            time_horizon: cfg.time_horizon,
            time_subdivisions: cfg.time_subdivisions,
            state_splits: cfg.state_splits,
            workers: cfg.verify_workers,
            query_timeout: timeout_duration(cfg.solver_timeout_secs),
            dump_dir: None,
        }
    }
}

/// What one query concluded.
#[derive(Debug)]
enum Outcome {
    Refuted,
    Violation(Counterexample),
    /// Solver said sat but the witness does not violate epsilon numerically.
    Unconfirmed,
    Undecided(String),
    Cancelled,
    Failed(String),
    /// The dynamics misbehaved at the witness state.
    Contract(ContractViolation),
}

pub struct Verifier<'a, D, F> {
    dynamics: &'a D,
    factory: F,
    settings: VerifierSettings,
}

impl<'a, D: Dynamics, F: SolverFactory> Verifier<'a, D, F> {
    pub fn new(dynamics: &'a D, factory: F, settings: VerifierSettings) -> Self {
        Self {
            dynamics,
            factory,
            settings,
        }
    }

    pub fn settings(&self) -> &VerifierSettings {
        &self.settings
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Verify `cert` with no deadline beyond the per-query timeout.
    pub fn verify(&self, cert: &Certificate) -> Result<VerificationResult, VerifyError> {
        self.verify_until(cert, None)
    }

    /// Verify `cert`; queries not started before `deadline` count as
    /// undecided.
    pub fn verify_until(
        &self,
        cert: &Certificate,
        deadline: Option<Instant>,
    ) -> Result<VerificationResult, VerifyError> {
        let start = Instant::now();
        let expected = self.dynamics.state_dim() + usize::from(cert.time_varying);
        if cert.input_dim() != expected {
            return Err(VerifyError::InputDimension {
                expected,
                actual: cert.input_dim(),
            });
        }
        let s = &self.settings;
        let regions = partition_regions(
            &self.dynamics.domain(),
            s.time_horizon,
            s.time_subdivisions,
            s.state_splits,
        );
        let queries = build_queries(self.dynamics, cert, s.residual, s.epsilon, &regions);
        if let Some(dir) = &s.dump_dir {
            dump_queries(dir, &queries)?;
        }
        let workers = match s.workers {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        }
        .clamp(1, queries.len().max(1));
        info!(
            solver = self.factory.name(),
            queries = queries.len(),
            workers,
            epsilon = s.epsilon,
            "Starting verification..."
        );

        let evaluator = ResidualEvaluator::new(self.dynamics, s.residual);
        let cancel = Arc::new(AtomicBool::new(false));
        let next = AtomicUsize::new(0);
        let mut stats = QueryStats {
            issued: queries.len(),
            ..QueryStats::default()
        };
        let mut found: Option<Counterexample> = None;
        let mut failure: Option<VerifyError> = None;
        let mut undecided_reason: Option<String> = None;

        std::thread::scope(|scope| {
            let (tx, rx) = mpsc::channel::<(usize, Outcome)>();
            for _ in 0..workers {
                let tx = tx.clone();
                let (cancel, next, queries, evaluator) = (&cancel, &next, &queries, &evaluator);
                scope.spawn(move || loop {
                    if cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some(query) = queries.get(i) else {
                        break;
                    };
                    let outcome = if deadline_exceeded(deadline) {
                        Outcome::Undecided("time budget exhausted".to_string())
                    } else {
                        self.run_query(query, cert, evaluator, cancel, deadline)
                    };
                    if tx.send((i, outcome)).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            for (i, outcome) in rx {
                let query = &queries[i];
                match outcome {
                    Outcome::Refuted => stats.refuted += 1,
                    Outcome::Violation(cex) => {
                        debug!(
                            query = i,
                            clause = query.clause.name(),
                            margin = cex.margin,
                            "Counterexample confirmed"
                        );
                        if found.is_none() {
                            cancel.store(true, Ordering::Relaxed);
                            found = Some(cex);
                        }
                    }
                    Outcome::Unconfirmed => {
                        stats.unconfirmed += 1;
                        undecided_reason.get_or_insert_with(|| {
                            "solver witness did not exceed epsilon numerically".to_string()
                        });
                    }
                    Outcome::Undecided(reason) => {
                        debug!(
                            query = i,
                            clause = query.clause.name(),
                            %reason,
                            "Query undecided"
                        );
                        stats.inconclusive += 1;
                        undecided_reason.get_or_insert(reason);
                    }
                    Outcome::Cancelled => stats.cancelled += 1,
                    Outcome::Failed(message) => {
                        cancel.store(true, Ordering::Relaxed);
                        failure.get_or_insert(VerifyError::Solver {
                            solver: self.factory.name().to_string(),
                            query: i,
                            clause: query.clause.name(),
                            message,
                        });
                    }
                    Outcome::Contract(violation) => {
                        cancel.store(true, Ordering::Relaxed);
                        failure.get_or_insert(VerifyError::DynamicsContract(violation));
                    }
                }
            }
        });

        if let Some(err) = failure {
            return Err(err);
        }
        let status = match (found, undecided_reason) {
            (Some(cex), _) => VerificationStatus::Counterexample(cex),
            (None, Some(reason)) => VerificationStatus::Timeout { reason },
            (None, None) if stats.refuted == stats.issued => VerificationStatus::Verified,
            (None, None) => VerificationStatus::Timeout {
                reason: "not every query was decided".to_string(),
            },
        };
        let result = VerificationResult {
            status,
            epsilon: s.epsilon,
            stats,
            elapsed: start.elapsed(),
        };
        match &result.status {
            VerificationStatus::Timeout { reason } => {
                warn!(%reason, inconclusive = stats.inconclusive, "Verification inconclusive")
            }
            _ => info!(
                refuted = stats.refuted,
                elapsed_ms = result.elapsed.as_millis() as u64,
                "{result}"
            ),
        }
        Ok(result)
    }

    fn run_query(
        &self,
        query: &Query,
        cert: &Certificate,
        evaluator: &ResidualEvaluator<'_, D>,
        cancel: &Arc<AtomicBool>,
        deadline: Option<Instant>,
    ) -> Outcome {
        let timeout = effective_timeout(self.settings.query_timeout, deadline);
        let mut solver = self.factory.create(timeout);
        solver.set_cancel_flag(Arc::clone(cancel));
        match self.check(&mut solver, query) {
            Err(message) => Outcome::Failed(message),
            Ok((SatResult::Unsat, _)) => Outcome::Refuted,
            Ok((SatResult::Unknown(reason), _)) if reason == "cancelled" => Outcome::Cancelled,
            Ok((SatResult::Unknown(reason), _)) => Outcome::Undecided(reason),
            Ok((SatResult::Sat, None)) => Outcome::Unconfirmed,
            Ok((SatResult::Sat, Some(values))) => {
                match self.confirm(query, cert, evaluator, &values) {
                    Ok(Some(cex)) => Outcome::Violation(cex),
                    Ok(None) => Outcome::Unconfirmed,
                    Err(violation) => Outcome::Contract(violation),
                }
            }
        }
    }

    fn check(
        &self,
        solver: &mut F::Solver,
        query: &Query,
    ) -> Result<(SatResult, Option<Vec<f64>>), String> {
        let err = |e: <F::Solver as SmtSolver>::Error| e.to_string();
        for (name, lo, hi) in &query.variables {
            solver.declare_bounded_var(name, *lo, *hi).map_err(err)?;
        }
        solver.assert(&query.formula).map_err(err)?;
        let names: Vec<(&str, &SmtSort)> = query
            .variables
            .iter()
            .map(|(n, _, _)| (n.as_str(), &SmtSort::Real))
            .collect();
        let (result, model) = solver.check_sat_with_model(&names).map_err(err)?;
        let values = model.and_then(|m| extract_point(&m, &query.variable_names()));
        Ok((result, values))
    }

    /// Re-evaluate a solver witness numerically; only a strict epsilon
    /// violation becomes a counterexample. The dynamics are checked at the
    /// witness state first.
    fn confirm(
        &self,
        query: &Query,
        cert: &Certificate,
        evaluator: &ResidualEvaluator<'_, D>,
        values: &[f64],
    ) -> Result<Option<Counterexample>, ContractViolation> {
        let mut point = query.input_from(values);
        point[0] = point[0].clamp(0.0, self.settings.time_horizon);
        query.region.state.clamp(&mut point[1..]);
        check_dynamics_at(self.dynamics, &point[1..])?;
        let terms = evaluator.terms_at(cert, &point);
        let margin = query.clause.margin(&terms);
        if margin.is_finite() && margin.abs() > self.settings.epsilon {
            Ok(Some(Counterexample {
                point,
                kind: query.clause.violation_kind(),
                margin,
                clause: query.clause.name().to_string(),
            }))
        } else {
            Ok(None)
        }
    }
}

fn dump_queries(dir: &Path, queries: &[Query]) -> Result<(), VerifyError> {
    let io_err = |path: PathBuf| move |source: std::io::Error| VerifyError::Dump { path, source };
    fs::create_dir_all(dir).map_err(io_err(dir.to_path_buf()))?;
    for q in queries {
        let mut script = ScriptWriter::new("QF_NRA");
        script.comment(&format!(
            "query {} clause {} t in [{}, {}]",
            q.id, q.clause, q.region.time.0, q.region.time.1
        ));
        for (name, lo, hi) in &q.variables {
            script.declare_bounded(name, *lo, *hi);
        }
        script.assert(&q.formula);
        let path = dir.join(format!("q{:04}_{}.smt2", q.id, q.clause));
        fs::write(&path, script.finish()).map_err(io_err(path.clone()))?;
    }
    debug!(count = queries.len(), dir = %dir.display(), "SMT dump written");
    Ok(())
}
