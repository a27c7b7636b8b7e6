//! cli
//!
//! Command-line interface layer for branchroute.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Load configuration and open the platform
//! - Delegate to command handlers
//!
//! The CLI layer is thin. Every platform change flows through
//! [`crate::engine`].

pub mod args;
pub mod commands;

pub use args::{Cli, Command, Shell};

use anyhow::Result;

/// Global output flags shared by every handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputFlags {
    pub debug: bool,
    pub quiet: bool,
    pub json: bool,
}

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run(cli: Cli) -> Result<()> {
    let flags = OutputFlags {
        debug: cli.debug,
        quiet: cli.quiet,
        json: cli.json,
    };
    commands::dispatch(cli.command, cli.config.as_deref(), flags)
}
