//! status command - Show live alias bindings and stage

use anyhow::{Context as _, Result};

use crate::engine::{self, Context};
use crate::ui::output;

/// Run the status command.
pub fn status(ctx: &Context, json: bool) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(status_async(ctx, json))
}

async fn status_async(ctx: &Context, json: bool) -> Result<()> {
    let status = engine::status(ctx)
        .await
        .context("Failed to read platform status")?;
    if json {
        output::json(&status)?;
    } else {
        output::print(&status, ctx.verbosity());
    }
    Ok(())
}
