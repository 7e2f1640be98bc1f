// Command handler for: Systems

use serde_json::json;

use certreach_ir::dynamics::Dynamics;
use certreach_systems::{with_system, SystemKind};

use super::helpers::{parse_output_format, print_json, OutputFormat};

pub(crate) fn run_systems_command(format: &str) -> miette::Result<()> {
    let format = parse_output_format(format)?;
    let rows: Vec<serde_json::Value> = SystemKind::ALL
        .into_iter()
        .map(|kind| {
            with_system!(kind, |sys| {
                let domain = sys.domain();
                json!({
                    "name": kind.name(),
                    "state_dim": sys.state_dim(),
                    "control_bound": sys.control_bound(),
                    "disturbance_bound": sys.disturbance_bound(),
                    "domain": {"lower": domain.lower, "upper": domain.upper},
                })
            })
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&rows)?,
        OutputFormat::Text => {
            for row in &rows {
                println!(
                    "{:<20} dim={}  u_max={}  domain={} .. {}",
                    row["name"].as_str().unwrap_or_default(),
                    row["state_dim"],
                    row["control_bound"],
                    row["domain"]["lower"],
                    row["domain"]["upper"],
                );
            }
        }
    }
    Ok(())
}
