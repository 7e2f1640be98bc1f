// Shared helpers for the command handlers: output format parsing, run
// configuration assembly, and JSON printing.

use std::fs;
use std::path::Path;

use miette::IntoDiagnostic;
use serde::Serialize;

use certreach_ir::config::RunConfig;
use certreach_systems::SystemKind;

use crate::cli::ConfigOverrides;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

pub(crate) fn parse_output_format(raw: &str) -> miette::Result<OutputFormat> {
    match raw {
        "text" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        other => Err(miette::miette!(
            "Unknown output format: {other}. Use 'text' or 'json'."
        )),
    }
}

/// Experiment directory name: explicit `--experiment`, else the system name.
pub(crate) fn experiment_name(explicit: Option<&str>, system: SystemKind) -> String {
    explicit.map_or_else(|| system.name().to_string(), str::to_string)
}

/// `--config` file (or defaults) with the per-flag overrides applied.
pub(crate) fn build_config(
    path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> miette::Result<RunConfig> {
    let mut cfg = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .into_diagnostic()
                .map_err(|e| e.wrap_err(format!("reading {}", path.display())))?;
            serde_json::from_str::<RunConfig>(&text)
                .into_diagnostic()
                .map_err(|e| e.wrap_err(format!("parsing {}", path.display())))?
        }
        None => RunConfig::default(),
    };
    apply_overrides(&mut cfg, overrides);
    Ok(cfg)
}

pub(crate) fn apply_overrides(cfg: &mut RunConfig, o: &ConfigOverrides) {
    macro_rules! set {
        ($($field:ident),+ $(,)?) => {
            $(
                if let Some(value) = o.$field {
                    cfg.$field = value;
                }
            )+
        };
    }
    set!(
        reach_mode,
        reach_aim,
        min_with,
        set_type,
        epsilon,
        num_nl,
        num_hl,
        model_type,
        sine_frequency,
        poly_degree,
        time_horizon,
        batch_size,
        num_epochs,
        learning_rate,
        grad_clip,
        l1_penalty,
        lipschitz_weight,
        boundary_weight,
        pretrain_fraction,
        seed,
        num_uniform,
        num_boundary,
        counterexample_fraction,
        boundary_fraction,
        counterexample_radius,
        counterexample_weight,
        retained_anchors,
        pruned_uniform,
        max_iterations,
        stall_limit,
        time_budget_secs,
        solver,
        solver_timeout_secs,
        delta_ratio,
        icp_max_boxes,
        time_subdivisions,
        state_splits,
        verify_workers,
    );
    // Switches can only turn a setting on; the file decides otherwise.
    cfg.use_polynomial |= o.use_polynomial;
    cfg.prune_after_initial |= o.prune_after_initial;
    cfg.load_model |= o.load_model;
}

/// `"0,1"` -> `(0, 1)`, both below `dim` and distinct.
pub(crate) fn parse_axes(raw: &str, dim: usize) -> miette::Result<(usize, usize)> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    let [a, b] = parts.as_slice() else {
        return Err(miette::miette!(
            "--slice-axes expects two comma-separated indices, got '{raw}'"
        ));
    };
    let a: usize = a.parse().into_diagnostic()?;
    let b: usize = b.parse().into_diagnostic()?;
    if a == b || a >= dim || b >= dim {
        return Err(miette::miette!(
            "--slice-axes {a},{b} must name two distinct axes below {dim}"
        ));
    }
    Ok((a, b))
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> miette::Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}
