// Command handlers for: Train, Verify, Cegis
//
// All three share argument handling and dispatch into the engine's run
// entry point; only the summary printed afterwards differs.

use serde_json::json;

use certreach_engine::run::{run, RunContext, RunMode, RunReport};
use certreach_systems::with_system;

use super::helpers::{build_config, experiment_name, parse_output_format, print_json, OutputFormat};
use crate::cli::RunArgs;

/// Returns whether the run ended with a verified certificate.
pub(crate) fn run_mode_command(mode: RunMode, args: RunArgs) -> miette::Result<bool> {
    let format = parse_output_format(&args.format)?;
    let config = build_config(args.config.as_deref(), &args.overrides)?;
    let mut ctx = RunContext::new(
        &args.logging_root,
        experiment_name(args.experiment.as_deref(), args.system),
    );
    ctx.dump_smt = args.dump_smt.clone();

    let report = with_system!(args.system, |sys| run(mode, &sys, config, &ctx))
        .map_err(|e| miette::miette!("{mode} run failed: {e}"))?;

    match format {
        OutputFormat::Text => print_text(&report),
        OutputFormat::Json => print_json(&summary_json(&report))?,
    }
    Ok(report.verified())
}

fn print_text(report: &RunReport) {
    let artifact = &report.artifact;
    println!("System:     {}", artifact.dynamics);
    println!("Model:      {}", artifact.representation);
    println!("Epsilon:    {}", artifact.epsilon);
    if let Some(training) = &report.training {
        println!(
            "Training:   {} epochs, {} steps, final loss {:.6} (pde {:.6}, boundary {:.6})",
            training.epochs,
            training.steps,
            training.final_loss.total,
            training.final_loss.pde,
            training.final_loss.boundary
        );
    }
    if let Some(result) = &report.verification {
        println!("Result:     {result}");
    }
    if let Some(outcome) = &report.cegis {
        println!(
            "Iterations: {} of {}",
            outcome.termination.iterations_used, outcome.termination.iteration_budget
        );
        println!("Counterexamples: {}", outcome.counterexamples.len());
        println!("Result:     {}", outcome.termination.reason);
    }
    println!("Status:     {}", artifact.status.to_string().to_uppercase());
    println!("Artifact:   {}", report.artifact_path.display());
}

fn summary_json(report: &RunReport) -> serde_json::Value {
    let artifact = &report.artifact;
    let mut value = json!({
        "schema_version": 1,
        "mode": report.mode,
        "system": artifact.dynamics,
        "status": artifact.status,
        "representation": artifact.representation,
        "epsilon": artifact.epsilon,
        "artifact": report.artifact_path.display().to_string(),
        "sha256": artifact.sha256,
    });
    if let Some(training) = &report.training {
        value["training"] = json!({
            "epochs": training.epochs,
            "steps": training.steps,
            "final_loss": training.final_loss.total,
            "elapsed_ms": training.elapsed.as_millis() as u64,
        });
    }
    if let Some(result) = &report.verification {
        value["verification"] = json!(result);
    }
    if let Some(outcome) = &report.cegis {
        value["cegis"] = json!({
            "status": outcome.status,
            "termination": outcome.termination,
            "counterexamples": outcome.counterexamples.len(),
            "history": outcome.history,
        });
    }
    value
}
