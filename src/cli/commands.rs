//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEV_STAGE;

/// Stackup - provision a server, DNS and containers from one declaration.
#[derive(Parser, Debug)]
#[command(name = "stackup")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Deployment stage (`production`, `dev`, or any DNS label).
    #[arg(short, long, global = true, env = "STACKUP_STAGE", default_value = DEV_STAGE)]
    pub stage: String,

    /// Path to the settings file (defaults to `stackup.yaml` if present).
    #[arg(long, global = true, env = "STACKUP_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Path to a `.env` file (defaults to `./.env` if present).
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the environment and settings.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show the resources and the order they will be created in.
    Plan,

    /// Print the reverse proxy configuration for the stage.
    Render,

    /// Create every resource of the stack.
    Apply {
        /// Maximum number of resources created at once.
        #[arg(long)]
        max_parallel: Option<usize>,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_arguments() {
        let cli = Cli::try_parse_from([
            "stackup",
            "--stage",
            "production",
            "apply",
            "--max-parallel",
            "4",
        ])
        .unwrap();

        assert_eq!(cli.stage, "production");
        assert!(matches!(cli.command, Commands::Apply { max_parallel: Some(4) }));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["stackup", "plan", "--output", "json", "-v"]).unwrap();
        assert!(matches!(cli.output, OutputFormat::Json));
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Plan));
    }
}
