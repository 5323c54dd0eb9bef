//! Command-line interface for nestwatch.
//!
//! This module provides the CLI structure for the `nestwatch` binary; the
//! handlers live in the binary itself.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    CheckCommand, ClearCommand, ConfigCommand, RunCommand, SnapshotCommand, StatusCommand,
};

/// nestwatch - Watch a no-drone zone and keep track of who flew into it
///
/// Polls drone telemetry, records every drone seen inside the zone together
/// with its pilot, and forgets violations once the drone has stayed away for
/// the retention window.
#[derive(Debug, Parser)]
#[command(name = "nestwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Monitor the zone, printing violation events as JSON lines
    Run(RunCommand),

    /// List active violations
    Snapshot(SnapshotCommand),

    /// Show storage statistics
    Status(StatusCommand),

    /// Check whether a coordinate lies inside the zone
    Check(CheckCommand),

    /// Remove every stored violation
    Clear(ClearCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Verbosity;
    use clap::CommandFactory;

    fn cli(verbose: u8, quiet: bool) -> Cli {
        Cli {
            config: None,
            verbose,
            quiet,
            command: Command::Status(StatusCommand { json: false }),
        }
    }

    #[test]
    fn test_cli_name() {
        assert_eq!(Cli::command().get_name(), "nestwatch");
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity() {
        assert_eq!(cli(0, true).verbosity(), Verbosity::Quiet);
        assert_eq!(cli(3, true).verbosity(), Verbosity::Quiet);
        assert_eq!(cli(0, false).verbosity(), Verbosity::Normal);
        assert_eq!(cli(1, false).verbosity(), Verbosity::Verbose);
        assert_eq!(cli(2, false).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from(["nestwatch", "run"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Run(RunCommand { no_backlog: false })
        ));
    }

    #[test]
    fn test_parse_snapshot_json() {
        let cli = Cli::try_parse_from(["nestwatch", "snapshot", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Snapshot(SnapshotCommand { json: true })
        ));
    }

    #[test]
    fn test_parse_check_negative() {
        let cli = Cli::try_parse_from(["nestwatch", "check", "-12.5", "250000"]).unwrap();
        let Command::Check(check) = cli.command else {
            panic!("expected check command");
        };
        assert!((check.x + 12.5).abs() < f64::EPSILON);
        assert!((check.y - 250_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_config_validate() {
        let cli =
            Cli::try_parse_from(["nestwatch", "config", "validate", "--file", "/tmp/x.toml"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Validate { file: Some(_) })
        ));
    }

    #[test]
    fn test_parse_with_config() {
        let cli = Cli::try_parse_from(["nestwatch", "-c", "/custom/config.toml", "status"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
    }

    #[test]
    fn test_parse_with_verbose_and_quiet() {
        let cli = Cli::try_parse_from(["nestwatch", "-vv", "status"]).unwrap();
        assert_eq!(cli.verbose, 2);

        let cli = Cli::try_parse_from(["nestwatch", "-q", "status"]).unwrap();
        assert!(cli.quiet);
    }
}
