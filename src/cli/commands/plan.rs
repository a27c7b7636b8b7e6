//! plan command - Preview a convergence pass

use std::path::Path;

use anyhow::Result;

use super::converge::read_artifact;
use crate::engine::{self, Context, PassOptions};
use crate::ui::output;

/// Run the plan command.
///
/// Prints the plan even when the pass would abort, then fails so scripts
/// can gate on the exit code.
pub fn plan(
    ctx: &Context,
    current: Option<String>,
    artifact: Option<&Path>,
    json: bool,
) -> Result<()> {
    let options = PassOptions {
        current,
        artifact: artifact.map(read_artifact).transpose()?,
    };
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(plan_async(ctx, &options, json))
}

async fn plan_async(ctx: &Context, options: &PassOptions, json: bool) -> Result<()> {
    let plan = engine::preview(ctx, options).await?;
    if json {
        output::json(&plan)?;
    } else {
        output::print(&plan, ctx.verbosity());
    }
    if plan.is_blocked() {
        anyhow::bail!("convergence would abort; see plan above");
    }
    Ok(())
}
