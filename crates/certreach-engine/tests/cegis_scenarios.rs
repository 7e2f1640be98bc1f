mod common;
use common::*;

use certreach_engine::cegis::{CegisError, CegisStatus, FailureReason, PhaseVerdict};
use certreach_engine::run::{run, run_with_factory, RunMode};
use certreach_ir::config::{ConfigError, MinWith, ReachAim, ReachMode, RunConfig};
use certreach_proof_kernel::{check_artifact_integrity, ArtifactStatus};
use certreach_systems::DoubleIntegrator;

#[test]
fn contradictory_modes_are_rejected_before_any_work() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        reach_mode: ReachMode::Forward,
        reach_aim: ReachAim::Avoid,
        min_with: MinWith::Target,
        ..tiny_mlp_config()
    };
    let ctx = context(dir.path(), "scenario_b");
    let err = run(RunMode::Cegis, &DoubleIntegrator::default(), cfg, &ctx).unwrap_err();
    assert!(matches!(
        err,
        CegisError::Configuration(ConfigError::IncompatibleModes)
    ));
    assert!(!ctx.experiment_dir().exists());
}

#[test]
fn injected_solver_timeouts_end_at_the_stall_cap() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        stall_limit: 2,
        max_iterations: 10,
        ..tiny_mlp_config()
    };
    let ctx = context(dir.path(), "scenario_c");
    let report = run_with_factory(
        RunMode::Cegis,
        &DoubleIntegrator::default(),
        cfg,
        &ctx,
        AlwaysUnknown,
    )
    .unwrap();

    let outcome = report.cegis.as_ref().unwrap();
    assert_eq!(outcome.status, CegisStatus::Failed(FailureReason::StallCap));
    assert_eq!(outcome.iterations(), 2);
    assert!(outcome
        .history
        .iter()
        .all(|r| r.verdict == PhaseVerdict::Inconclusive && r.queries.inconclusive > 0));
    assert!(!report.verified());

    let saved = check_artifact_integrity(&ctx.experiment_dir()).unwrap();
    assert!(saved.is_ok(), "{:?}", saved.issues);
    assert_eq!(saved.artifact.status, ArtifactStatus::Unverified);
    assert_eq!(saved.artifact.dynamics, "double_integrator");
    assert!(saved.artifact.failure.is_some());
    assert!(ctx.experiment_dir().join("history.json").exists());
}

#[test]
fn loop_halts_at_the_iteration_cap_when_stalls_are_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        stall_limit: 100,
        max_iterations: 3,
        ..tiny_mlp_config()
    };
    let ctx = context(dir.path(), "cap");
    let report = run_with_factory(
        RunMode::Cegis,
        &DoubleIntegrator::default(),
        cfg,
        &ctx,
        AlwaysUnknown,
    )
    .unwrap();
    let outcome = report.cegis.unwrap();
    assert_eq!(
        outcome.status,
        CegisStatus::Failed(FailureReason::IterationCap)
    );
    assert_eq!(outcome.history.len(), 3);
    assert_eq!(report.artifact.iterations, 3);
}

#[test]
fn polynomial_loop_converges_and_persists_a_verified_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), "still");
    let report = run(RunMode::Cegis, &Still, still_config(), &ctx).unwrap();
    assert!(report.verified());
    let outcome = report.cegis.unwrap();
    assert!(outcome.iterations() <= 4);
    assert_eq!(
        outcome.history.last().map(|r| r.verdict),
        Some(PhaseVerdict::Verified)
    );
    let saved = check_artifact_integrity(&ctx.experiment_dir()).unwrap();
    assert!(saved.is_ok());
    assert_eq!(saved.artifact.status, ArtifactStatus::Verified);
    assert_eq!(saved.artifact.failure, None);
}

#[test]
fn time_budget_ends_the_run_with_an_unverified_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        time_budget_secs: 1,
        stall_limit: 100,
        max_iterations: 50,
        ..tiny_mlp_config()
    };
    let ctx = context(dir.path(), "budget");
    let report = run_with_factory(
        RunMode::Cegis,
        &DoubleIntegrator::default(),
        cfg,
        &ctx,
        Sluggish,
    )
    .unwrap();

    let outcome = report.cegis.as_ref().unwrap();
    assert_eq!(
        outcome.status,
        CegisStatus::Failed(FailureReason::BudgetExhausted)
    );
    assert!(outcome.iterations() < 50);
    assert!(!report.verified());

    let saved = check_artifact_integrity(&ctx.experiment_dir()).unwrap();
    assert!(saved.is_ok(), "{:?}", saved.issues);
    assert_eq!(saved.artifact.status, ArtifactStatus::Unverified);
    assert_eq!(
        saved.artifact.failure.as_deref(),
        Some(FailureReason::BudgetExhausted.to_string().as_str())
    );
}

#[test]
#[ignore = "slow: ~minutes in debug builds, run with --release --ignored"]
fn double_integrator_avoid_converges() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        reach_mode: ReachMode::Backward,
        reach_aim: ReachAim::Avoid,
        min_with: MinWith::None,
        epsilon: 0.25,
        num_hl: 0,
        num_nl: 64,
        max_iterations: 10,
        num_epochs: 150,
        learning_rate: 5e-3,
        counterexample_fraction: 0.3,
        counterexample_weight: 4.0,
        time_subdivisions: 4,
        state_splits: 2,
        ..RunConfig::default()
    };
    let ctx = context(dir.path(), "scenario_a");
    let report = run(RunMode::Cegis, &DoubleIntegrator::default(), cfg, &ctx).unwrap();
    assert!(report.verified(), "{:?}", report.cegis.as_ref().map(|o| &o.termination));
    let outcome = report.cegis.as_ref().unwrap();
    assert!(outcome.iterations() <= 10);
    assert!(outcome.history.iter().skip(1).all(|r| r.fine_tuned));
    let saved = check_artifact_integrity(&ctx.experiment_dir()).unwrap();
    assert!(saved.is_ok());
    assert_eq!(saved.artifact.status, ArtifactStatus::Verified);
}
