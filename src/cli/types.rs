//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::analyze::AnalyzeArgs;
use super::commands::config::ConfigArgs;
use super::commands::stream::StreamArgs;

#[derive(Parser, Debug)]
#[command(name = "clinical-orchestrator")]
#[command(about = "Debounced, rate-limit aware clinical analysis sessions", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Directory containing the `.clinical/` configuration folder
    #[arg(long, global = true, default_value = ".", env = "CLINICAL_ROOT")]
    pub root: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one fan-out analysis and print the aggregate
    Analyze(AnalyzeArgs),

    /// Open a streaming analysis and print snapshots until it ends
    Stream(StreamArgs),

    /// Show the effective configuration
    Config(ConfigArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_analyze() {
        let cli = Cli::try_parse_from([
            "clinical-orchestrator",
            "--json",
            "analyze",
            "--subject",
            "42",
            "--notes",
            "persistent dry cough for three weeks",
        ])
        .unwrap();

        assert!(cli.json);
        match cli.command {
            Commands::Analyze(args) => {
                assert_eq!(args.input.subject, "42");
                assert_eq!(
                    args.input.notes.as_deref(),
                    Some("persistent dry cough for three weeks")
                );
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_config_format() {
        let cli =
            Cli::try_parse_from(["clinical-orchestrator", "config", "--format", "json"]).unwrap();
        assert!(matches!(cli.command, Commands::Config(_)));
    }
}
