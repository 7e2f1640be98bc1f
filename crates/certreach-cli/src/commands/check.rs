// Command handler for: Check
//
// Re-reads a saved artifact without trusting the run that produced it:
// hash and schema checks, then a dense numeric audit of the residual, then
// an optional slice rendering.

use std::fs;
use std::path::Path;

use miette::IntoDiagnostic;
use serde_json::json;
use tracing::info;

use certreach_engine::counterexample::Counterexample;
use certreach_engine::soundness::{audit, AuditSettings, SoundnessReport};
use certreach_engine::visualization::{render_slice, Slice, SliceSpec};
use certreach_ir::dynamics::Dynamics;
use certreach_proof_kernel::{artifact_dir, check_artifact_integrity, ArtifactIntegrityReport};
use certreach_systems::with_system;

use super::helpers::{experiment_name, parse_axes, parse_output_format, print_json, OutputFormat};
use crate::cli::CheckArgs;

/// Returns whether the artifact is intact and passed the audit.
pub(crate) fn run_check_command(args: CheckArgs) -> miette::Result<bool> {
    let format = parse_output_format(&args.format)?;
    let dir = artifact_dir(
        &args.logging_root,
        &experiment_name(args.experiment.as_deref(), args.system),
    );
    info!(dir = %dir.display(), "Checking artifact");
    let integrity = check_artifact_integrity(&dir).into_diagnostic()?;
    let artifact = &integrity.artifact;
    if artifact.dynamics != args.system.name() {
        return Err(miette::miette!(
            "artifact in {} was saved for '{}', not '{}'",
            dir.display(),
            artifact.dynamics,
            args.system
        ));
    }

    if !integrity.is_ok() {
        // A tampered or malformed certificate is not worth evaluating.
        match format {
            OutputFormat::Text => print_integrity(&integrity),
            OutputFormat::Json => print_json(&json!({
                "schema_version": 1,
                "artifact": dir.display().to_string(),
                "integrity": integrity_json(&integrity),
            }))?,
        }
        return Ok(false);
    }

    let settings = AuditSettings {
        grid_per_axis: args.grid,
        random_points: args.random_points,
        ..AuditSettings::from_config(&artifact.run_config)
    };
    let (audit_report, slice) = with_system!(args.system, |sys| {
        let expected = sys.state_dim() + usize::from(artifact.certificate.time_varying);
        if artifact.certificate.input_dim() != expected {
            return Err(miette::miette!(
                "certificate takes {} inputs, '{}' needs {expected}",
                artifact.certificate.input_dim(),
                args.system
            ));
        }
        let report = audit(&sys, &artifact.certificate, &settings);
        let slice = if args.slice {
            let axes = parse_axes(&args.slice_axes, sys.state_dim())?;
            let spec = SliceSpec {
                resolution: args.resolution,
                ..SliceSpec::new(axes, args.slice_time)
            };
            Some(render_slice(&artifact.certificate, &sys.domain(), &spec))
        } else {
            None
        };
        (report, slice)
    });

    if let (Some(slice), Some(path)) = (&slice, &args.csv) {
        fs::write(path, slice.to_csv()).into_diagnostic()?;
    }
    let counterexamples = load_counterexamples(&dir);

    match format {
        OutputFormat::Text => {
            print_text(&integrity, &audit_report, slice.as_ref(), &counterexamples)
        }
        OutputFormat::Json => print_json(&json!({
            "schema_version": 1,
            "artifact": dir.display().to_string(),
            "status": artifact.status,
            "integrity": integrity_json(&integrity),
            "audit": audit_report,
        }))?,
    }
    Ok(integrity.is_ok() && audit_report.passed())
}

fn integrity_json(integrity: &ArtifactIntegrityReport) -> serde_json::Value {
    json!({
        "ok": integrity.is_ok(),
        "issues": integrity
            .issues
            .iter()
            .map(|issue| json!({"code": issue.code, "message": issue.message}))
            .collect::<Vec<_>>(),
    })
}

/// Counterexamples recorded by a cegis run, if any were saved.
fn load_counterexamples(dir: &Path) -> Vec<Counterexample> {
    fs::read_to_string(dir.join("counterexamples.json"))
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}

fn print_integrity(integrity: &ArtifactIntegrityReport) {
    let artifact = &integrity.artifact;
    println!("System:    {}", artifact.dynamics);
    println!("Status:    {}", artifact.status.to_string().to_uppercase());
    if integrity.is_ok() {
        println!("Integrity: OK");
    } else {
        println!("Integrity: {} issue(s)", integrity.issues.len());
        for issue in &integrity.issues {
            println!("  - {issue}");
        }
    }
}

fn print_text(
    integrity: &ArtifactIntegrityReport,
    audit: &SoundnessReport,
    slice: Option<&Slice>,
    counterexamples: &[Counterexample],
) {
    print_integrity(integrity);
    println!(
        "Audit:     {} ({} points, max interior {:.3e}, max boundary {:.3e}, epsilon {})",
        if audit.passed() { "PASSED" } else { "FAILED" },
        audit.points_checked,
        audit.max_interior,
        audit.max_boundary,
        audit.epsilon
    );
    if let Some(worst) = &audit.worst {
        if !audit.passed() {
            println!(
                "  worst {} residual {:.6} at {:?}",
                worst.kind, worst.residual, worst.point
            );
        }
    }
    if let Some(slice) = slice {
        println!();
        print!("{}", slice.to_ascii(counterexamples));
    }
}
