//! converge command - Run one convergence pass

use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result};

use crate::core::types::CodeDigest;
use crate::engine::{self, Context, DeploymentOutcome, PassOptions, PassReport};
use crate::ui::output;

/// Run the converge command.
pub fn converge(
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
    rt.block_on(converge_async(ctx, &options, json))
}

async fn converge_async(ctx: &Context, options: &PassOptions, json: bool) -> Result<()> {
    let report = engine::converge(ctx, options).await?;
    if json {
        output::json(&report)?;
    } else {
        print_report(ctx, &report);
    }
    Ok(())
}

/// Digest of the artifact at `path`.
pub(crate) fn read_artifact(path: &Path) -> Result<CodeDigest> {
    let bytes = fs::read(path)
        .with_context(|| format!("Failed to read artifact {}", path.display()))?;
    Ok(CodeDigest::of_bytes(&bytes))
}

fn print_report(ctx: &Context, report: &PassReport) {
    let verbosity = ctx.verbosity();
    output::debug(format!("trigger {}", report.trigger), verbosity);
    for branch in &report.branches {
        let marker = if branch.is_current { "*" } else { " " };
        output::print(
            format!(
                "{} {} ({}) -> version {}",
                marker, branch.branch, branch.version_label, branch.bound_version
            ),
            verbosity,
        );
    }
    if !report.pruned.is_empty() {
        output::warn(
            format!(
                "removed routes of unregistered branches:\n{}",
                output::format_list(&report.pruned, "  - ")
            ),
            verbosity,
        );
    }
    match &report.deployment {
        DeploymentOutcome::Created { deployment_id } => output::success(
            format!(
                "Deployed function version {} as {}",
                report.function_version.id, deployment_id
            ),
            verbosity,
        ),
        DeploymentOutcome::Unchanged { deployment_id } => output::success(
            format!("No changes, {} is live", deployment_id),
            verbosity,
        ),
    }
    output::print(&report.outputs, verbosity);
}
