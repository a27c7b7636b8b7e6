//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--config <path>`: Use this configuration file
//! - `--debug`: Enable debug logging
//! - `--quiet` / `-q`: Minimal output
//! - `--json`: Machine-readable output

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// branchroute - Route every registered branch to its own API version
#[derive(Parser, Debug)]
#[command(name = "branchroute")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (default: search upward for branchroute.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Minimal output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one convergence pass
    #[command(
        name = "converge",
        long_about = "Run one convergence pass.\n\n\
            Resolves every branch's current binding, publishes the artifact, prunes \
            routes of removed branches, binds one alias per branch, provisions its \
            versioned routes and, once every branch is routed, publishes at most one \
            deployment to the stage.",
        after_help = "\
WORKFLOW EXAMPLES:
    # Promote main with a fresh build
    branchroute converge --current main --artifact dist/bundle.zip

    # Re-run without new code (no-op if nothing changed)
    branchroute converge --current main

    # Promote beta for the first time, then add it as a stable branch
    branchroute converge --current beta --artifact dist/bundle.zip"
    )]
    Converge {
        /// Branch to promote (default: current_branch from the config)
        #[arg(long, value_name = "BRANCH")]
        current: Option<String>,

        /// Code bundle to publish
        #[arg(long, value_name = "PATH")]
        artifact: Option<PathBuf>,
    },

    /// Preview a convergence pass without changing anything
    #[command(name = "plan")]
    Plan {
        /// Branch to promote (default: current_branch from the config)
        #[arg(long, value_name = "BRANCH")]
        current: Option<String>,

        /// Code bundle that would be published
        #[arg(long, value_name = "PATH")]
        artifact: Option<PathBuf>,
    },

    /// Show each branch's alias binding and the live stage
    #[command(name = "status")]
    Status,

    /// Print the base URL, per-branch endpoints and API key
    #[command(name = "outputs")]
    Outputs,

    /// Generate shell completion scripts
    #[command(
        name = "completion",
        after_help = "\
EXAMPLES:
    # Bash
    branchroute completion bash > /etc/bash_completion.d/branchroute

    # Zsh
    branchroute completion zsh > \"${fpath[1]}/_branchroute\""
    )]
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completion
#[derive(clap::ValueEnum, Debug, Clone, Copy)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "branchroute",
            "converge",
            "--current",
            "main",
            "--json",
            "--config",
            "x.toml",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        match cli.command {
            Command::Converge { current, artifact } => {
                assert_eq!(current.as_deref(), Some("main"));
                assert!(artifact.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn completion_requires_shell() {
        assert!(Cli::try_parse_from(["branchroute", "completion"]).is_err());
        assert!(Cli::try_parse_from(["branchroute", "completion", "zsh"]).is_ok());
    }
}
