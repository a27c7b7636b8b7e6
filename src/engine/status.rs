//! engine::status
//!
//! Live bindings and stage, read from the platform.

use std::fmt;

use serde::Serialize;

use super::trigger::{TRIGGER_VARIABLE, VERSION_VARIABLE};
use super::Context;
use crate::core::types::{BranchName, VersionId, VersionLabel};
use crate::platform::PlatformError;

/// Alias binding of one registered branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchStatus {
    pub branch: BranchName,
    pub version_label: VersionLabel,
    /// `None` if the branch was never deployed
    pub bound_version: Option<VersionId>,
}

/// The live stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageStatus {
    pub name: String,
    pub deployment_id: String,
    pub function_version: Option<String>,
    pub trigger: Option<String>,
}

/// Snapshot of what is live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub function: String,
    /// In registry order
    pub branches: Vec<BranchStatus>,
    pub stage: Option<StageStatus>,
}

/// Read every registered branch's alias and the live stage.
///
/// Unlike resolution inside a pass, read failures surface.
pub async fn status(ctx: &Context) -> Result<Status, PlatformError> {
    let deploy = &ctx.config.deploy;
    let function = deploy.function_name();

    let mut branches = Vec::with_capacity(ctx.config.registry.len());
    for spec in ctx.config.registry.entries() {
        let alias = ctx
            .platform
            .functions
            .get_alias(&function, &spec.name)
            .await?;
        branches.push(BranchStatus {
            branch: spec.name.clone(),
            version_label: spec.version_label.clone(),
            bound_version: alias.map(|a| a.bound_version),
        });
    }

    let gateway = &ctx.platform.gateway;
    let stage = match gateway.find_rest_api(&deploy.api_name()).await? {
        Some(api) => gateway
            .get_stage(&api.id, &deploy.stack)
            .await?
            .map(|stage| StageStatus {
                function_version: stage.variables.get(VERSION_VARIABLE).cloned(),
                trigger: stage.variables.get(TRIGGER_VARIABLE).cloned(),
                name: stage.name,
                deployment_id: stage.deployment_id,
            }),
        None => None,
    };

    Ok(Status {
        function,
        branches,
        stage,
    })
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "function: {}", self.function)?;
        for branch in &self.branches {
            let bound = branch
                .bound_version
                .as_ref()
                .map(|v| format!("version {}", v))
                .unwrap_or_else(|| "never deployed".to_string());
            writeln!(f, "  {} ({}): {}", branch.branch, branch.version_label, bound)?;
        }
        match &self.stage {
            Some(stage) => write!(
                f,
                "stage {}: deployment {}, function version {}, trigger {}",
                stage.name,
                stage.deployment_id,
                stage.function_version.as_deref().unwrap_or("-"),
                stage.trigger.as_deref().unwrap_or("-"),
            ),
            None => write!(f, "stage: not deployed"),
        }
    }
}
