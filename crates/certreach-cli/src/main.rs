#![doc = include_str!("../README.md")]

mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use certreach_engine::run::RunMode;

use cli::{Cli, Commands};

/// Exit status for a run that finished cleanly without a verified result.
const EXIT_UNVERIFIED: i32 = 2;

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let verified = match cli.command {
        Commands::Train(args) => {
            commands::run::run_mode_command(RunMode::Train, args)?;
            true
        }
        Commands::Verify(args) => commands::run::run_mode_command(RunMode::Verify, args)?,
        Commands::Cegis(args) => commands::run::run_mode_command(RunMode::Cegis, args)?,
        Commands::Check(args) => commands::check::run_check_command(args)?,
        Commands::Systems { format } => {
            commands::systems::run_systems_command(&format)?;
            true
        }
    };

    if !verified {
        std::process::exit(EXIT_UNVERIFIED);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse_into_overrides() {
        let cli = Cli::try_parse_from([
            "certreach",
            "cegis",
            "--system",
            "dubins-car",
            "--epsilon",
            "0.3",
            "--solver",
            "icp",
            "--use-polynomial",
        ])
        .unwrap();
        let Commands::Cegis(args) = cli.command else {
            panic!("expected cegis");
        };
        assert_eq!(args.system, certreach_systems::SystemKind::DubinsCar);
        assert_eq!(args.overrides.epsilon, Some(0.3));
        assert!(args.overrides.use_polynomial);
        assert!(!args.overrides.load_model);
    }

    #[test]
    fn unknown_system_is_a_parse_error() {
        assert!(Cli::try_parse_from(["certreach", "train", "--system", "pendulum"]).is_err());
    }
}
