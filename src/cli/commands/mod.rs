//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Loads configuration and opens the platform into a [`Context`]
//! 2. Calls the engine
//! 3. Formats and displays output through [`crate::ui::output`]
//!
//! # Async Commands
//!
//! The engine is async. Handlers are synchronous wrappers that build a
//! tokio runtime and `block_on` their async implementation.

mod completion;
mod converge;
mod outputs;
mod plan;
mod status;

pub use completion::completion;
pub use converge::converge;
pub use outputs::outputs;
pub use plan::plan;
pub use status::status;

use std::path::Path;

use anyhow::{Context as _, Result};

use super::args::Command;
use super::OutputFlags;
use crate::core::config::Config;
use crate::engine::Context;

/// Dispatch a command to its handler.
pub fn dispatch(command: Command, config: Option<&Path>, flags: OutputFlags) -> Result<()> {
    match command {
        Command::Completion { shell } => completion::completion(shell),
        Command::Converge { current, artifact } => {
            let ctx = open_context(config, flags)?;
            converge::converge(&ctx, current, artifact.as_deref(), flags.json)
        }
        Command::Plan { current, artifact } => {
            let ctx = open_context(config, flags)?;
            plan::plan(&ctx, current, artifact.as_deref(), flags.json)
        }
        Command::Status => {
            let ctx = open_context(config, flags)?;
            status::status(&ctx, flags.json)
        }
        Command::Outputs => {
            let ctx = open_context(config, flags)?;
            outputs::outputs(&ctx, flags.json)
        }
    }
}

/// Load configuration and open its platform.
pub fn open_context(config: Option<&Path>, flags: OutputFlags) -> Result<Context> {
    let config = Config::load(config).context("Failed to load configuration")?;
    let provider = config.deploy.platform.provider.clone();
    let ctx = Context::open(config)
        .with_context(|| format!("Failed to open '{}' platform", provider))?;
    Ok(ctx.with_flags(flags.debug, flags.quiet))
}
