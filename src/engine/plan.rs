//! engine::plan
//!
//! Read-only preview of a convergence pass.
//!
//! # Design
//!
//! [`build`] is a pure function of the resolved bindings, the newest
//! version, the routing settings and the live API, so the preview uses the
//! same binding policy as the pass itself. [`preview`] gathers those inputs from the
//! platform using reads only.

use std::fmt;

use serde::Serialize;

use super::alias::AliasTarget;
use super::converge::{ConvergeError, PassOptions};
use super::deploy::{expected_dependencies, ROUTING_VARIABLE};
use super::resolve::{ResolvedMap, VersionResolver};
use super::routes::stale_routes;
use super::state::PassStage;
use super::trigger::{self, TRIGGER_VARIABLE};
use super::Context;
use crate::core::registry::{Branch, RegistryError};
use crate::core::types::{
    BranchName, CodeDigest, Fingerprint, ResolvedVersion, VersionId, VersionLabel,
};
use crate::platform::{FunctionVersion, PlatformError};

/// What the pass would do to one alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedBinding {
    /// Bind to the version this pass produces.
    BindNewest,
    /// Rebind to the version already bound.
    Keep { version: VersionId },
    /// The pass would abort on this branch.
    Blocked { reason: String },
}

/// Where the newest version would come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum NewestVersion {
    /// An already published version.
    Existing { version: FunctionVersion },
    /// The artifact would be published as a new version.
    Publish { digest: CodeDigest },
    /// No function and no artifact.
    Missing,
}

/// Whether the pass would create a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentForecast {
    Redeploy,
    Unchanged,
    Blocked,
}

/// One branch of the preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchPlan {
    pub branch: BranchName,
    pub version_label: VersionLabel,
    pub is_current: bool,
    pub resolved: ResolvedVersion,
    pub binding: PlannedBinding,
}

/// The live API and stage as the preview saw them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LiveStage {
    /// Trigger recorded on the stage
    pub trigger: Option<String>,
    /// Dependencies of the deployment the stage points at
    #[serde(skip)]
    pub dependencies: Option<Vec<String>>,
    /// Routing fingerprint recorded on the stage
    #[serde(skip)]
    pub routing: Option<String>,
    /// Removed branches that still own route resources
    #[serde(skip)]
    pub stale_branches: Vec<BranchName>,
}

/// Preview of a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassPlan {
    pub current: BranchName,
    pub branches: Vec<BranchPlan>,
    pub newest: NewestVersion,
    /// Removed branches whose routes the pass would delete
    pub prune: Vec<BranchName>,
    pub live_trigger: Option<String>,
    pub deployment: DeploymentForecast,
}

impl PassPlan {
    /// Check if the pass would abort.
    pub fn is_blocked(&self) -> bool {
        self.deployment == DeploymentForecast::Blocked
    }
}

/// Build a preview from already gathered inputs.
pub fn build(
    current: &BranchName,
    branches: &[Branch],
    resolved: &ResolvedMap,
    newest: NewestVersion,
    routing: &Fingerprint,
    live: LiveStage,
) -> PassPlan {
    let plans: Vec<BranchPlan> = branches
        .iter()
        .map(|branch| {
            let binding = match AliasTarget::decide(&branch.name, current, resolved) {
                Ok(AliasTarget::Newest) => PlannedBinding::BindNewest,
                Ok(AliasTarget::Pinned(version)) => PlannedBinding::Keep { version },
                Err(e) => PlannedBinding::Blocked {
                    reason: e.to_string(),
                },
            };
            BranchPlan {
                branch: branch.name.clone(),
                version_label: branch.version_label.clone(),
                is_current: branch.is_current,
                resolved: resolved
                    .get(&branch.name)
                    .cloned()
                    .unwrap_or(ResolvedVersion::Sentinel),
                binding,
            }
        })
        .collect();

    let blocked = plans
        .iter()
        .any(|p| matches!(p.binding, PlannedBinding::Blocked { .. }));
    let deployment = match &newest {
        _ if blocked => DeploymentForecast::Blocked,
        NewestVersion::Missing => DeploymentForecast::Blocked,
        NewestVersion::Publish { .. } => DeploymentForecast::Redeploy,
        NewestVersion::Existing { version } => {
            let trigger = trigger::compute(&version.id, &version.code_digest);
            let expected = expected_dependencies(branches.iter().map(|b| &b.name));
            if trigger.matches(live.trigger.as_deref())
                && live.dependencies.as_ref() == Some(&expected)
                && live.routing.as_deref() == Some(routing.as_str())
            {
                DeploymentForecast::Unchanged
            } else {
                DeploymentForecast::Redeploy
            }
        }
    };

    PassPlan {
        current: current.clone(),
        branches: plans,
        newest,
        prune: live.stale_branches,
        live_trigger: live.trigger,
        deployment,
    }
}

/// Preview a pass against the platform without writing anything.
///
/// # Errors
///
/// Registry errors and failed platform reads. A never deployed branch is
/// reported in the plan, not as an error.
pub async fn preview(ctx: &Context, options: &PassOptions) -> Result<PassPlan, ConvergeError> {
    let deploy = &ctx.config.deploy;
    let current_name = ctx
        .config
        .current_branch(options.current.as_deref())
        .ok_or(ConvergeError::NoCurrentBranch)?;
    let branches = ctx.config.registry.for_pass(current_name)?;
    let current = branches
        .iter()
        .find(|b| b.is_current)
        .map(|b| b.name.clone())
        .ok_or_else(|| RegistryError::UnknownCurrent(current_name.to_string()))?;
    let names: Vec<BranchName> = branches.iter().map(|b| b.name.clone()).collect();
    let function_name = deploy.function_name();

    let resolved = VersionResolver::new(ctx.platform.functions.clone(), ctx.max_concurrency())
        .resolve(&function_name, &names)
        .await;

    let read_failed = |e: PlatformError| ConvergeError::Platform {
        stage: PassStage::Publish,
        branch: None,
        error: e,
    };
    let latest = ctx
        .platform
        .functions
        .get_function(&function_name)
        .await
        .map_err(read_failed)?
        .and_then(|info| info.latest_version);
    let newest = match (options.artifact.as_ref(), latest) {
        (Some(digest), Some(latest)) if &latest.code_digest == digest => {
            NewestVersion::Existing { version: latest }
        }
        (Some(digest), _) => NewestVersion::Publish {
            digest: digest.clone(),
        },
        (None, Some(latest)) => NewestVersion::Existing { version: latest },
        (None, None) => NewestVersion::Missing,
    };

    let gateway = &ctx.platform.gateway;
    let stage_failed = |e: PlatformError| ConvergeError::Platform {
        stage: PassStage::Deploy,
        branch: None,
        error: e,
    };
    let mut live = LiveStage::default();
    if let Some(api) = gateway
        .find_rest_api(&deploy.api_name())
        .await
        .map_err(stage_failed)?
    {
        let resources = gateway
            .list_resources(&api.id)
            .await
            .map_err(|e| ConvergeError::Platform {
                stage: PassStage::Prune,
                branch: None,
                error: e,
            })?;
        live.stale_branches = stale_routes(&resources, &ctx.config.registry)
            .into_keys()
            .collect();

        if let Some(stage) = gateway
            .get_stage(&api.id, &deploy.stack)
            .await
            .map_err(stage_failed)?
        {
            live.trigger = stage.variables.get(TRIGGER_VARIABLE).cloned();
            live.routing = stage.variables.get(ROUTING_VARIABLE).cloned();
            live.dependencies = gateway
                .get_deployment(&api.id, &stage.deployment_id)
                .await
                .map_err(stage_failed)?
                .map(|deployment| deployment.depends_on);
        }
    }

    Ok(build(
        &current,
        &branches,
        &resolved,
        newest,
        &deploy.routing.fingerprint(),
        live,
    ))
}

impl fmt::Display for PassPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Plan for current branch '{}':", self.current)?;
        for plan in &self.branches {
            let marker = if plan.is_current { "*" } else { " " };
            let action = match &plan.binding {
                PlannedBinding::BindNewest => "bind newest".to_string(),
                PlannedBinding::Keep { version } => format!("keep version {}", version),
                PlannedBinding::Blocked { reason } => format!("BLOCKED: {}", reason),
            };
            writeln!(
                f,
                "{} {} ({}): resolved {}, {}",
                marker, plan.branch, plan.version_label, plan.resolved, action
            )?;
        }
        let newest = match &self.newest {
            NewestVersion::Existing { version } => format!("version {}", version.id),
            NewestVersion::Publish { digest } => format!("new version from {}", digest.short()),
            NewestVersion::Missing => "none (function missing)".to_string(),
        };
        writeln!(f, "newest: {}", newest)?;
        if !self.prune.is_empty() {
            let names: Vec<&str> = self.prune.iter().map(|b| b.as_str()).collect();
            writeln!(f, "prune: {}", names.join(", "))?;
        }
        let deployment = match self.deployment {
            DeploymentForecast::Redeploy => "new deployment",
            DeploymentForecast::Unchanged => "unchanged",
            DeploymentForecast::Blocked => "blocked",
        };
        write!(f, "deployment: {}", deployment)
    }
}
