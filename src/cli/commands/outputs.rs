//! outputs command - Print URLs and the API key

use anyhow::{Context as _, Result};

use crate::engine::{Context, Outputs};
use crate::ui::output;

/// Run the outputs command.
pub fn outputs(ctx: &Context, json: bool) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(outputs_async(ctx, json))
}

async fn outputs_async(ctx: &Context, json: bool) -> Result<()> {
    let outputs = Outputs::read(
        &ctx.config.deploy,
        &ctx.config.registry,
        ctx.platform.gateway.as_ref(),
    )
    .await
    .context("Failed to read outputs")?;

    let Some(outputs) = outputs else {
        anyhow::bail!("nothing deployed yet; run `branchroute converge` first");
    };
    if json {
        output::json(&outputs)?;
    } else {
        output::print(&outputs, ctx.verbosity());
    }
    Ok(())
}
