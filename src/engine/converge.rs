//! engine::converge
//!
//! The convergence pass entry point and its aggregate error.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::alias::{AliasError, AliasManager};
use super::deploy::{DeployError, DeploymentOrchestrator, DeploymentOutcome};
use super::outputs::Outputs;
use super::resolve::{ResolvedMap, VersionResolver};
use super::routes::{RouteError, RouteProvisioner, RouteSet, Scaffold};
use super::state::{BranchPhase, PassStage, PassState, StateError};
use super::trigger::{self, DeploymentTrigger};
use super::Context;
use crate::core::config::DeployConfig;
use crate::core::registry::{Branch, RegistryError};
use crate::core::types::{BranchName, CodeDigest, ResolvedVersion, VersionId, VersionLabel};
use crate::platform::{Alias, FunctionConfig, FunctionVersion, PlatformError};

/// The single error a failed pass surfaces.
///
/// Display names the stage the pass aborted at and, where one is to blame,
/// the branch. Provider errors are flattened into the message.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConvergeError {
    #[error("no current branch: pass --current or set current_branch in the config")]
    NoCurrentBranch,

    #[error("convergence aborted at resolve: {0}")]
    Registry(#[from] RegistryError),

    #[error(
        "convergence aborted at publish: function '{function}' does not exist, converge with an artifact to create it"
    )]
    FunctionMissing { function: String },

    #[error(
        "convergence aborted at alias for branch '{branch}': branch never deployed, promote it once as current before introducing it as a stable branch"
    )]
    NeverDeployed { branch: BranchName },

    #[error("convergence aborted at route for branch '{branch}': resource '{name}' collides ({detail})")]
    RouteCollision {
        branch: BranchName,
        name: String,
        detail: String,
    },

    #[error("convergence aborted at deploy: barrier unmet, branches not routed: {}", format_names(.pending))]
    BarrierUnmet { pending: Vec<BranchName> },

    #[error("convergence aborted at {stage}{}: {error}", describe(.branch.as_ref()))]
    Platform {
        stage: PassStage,
        branch: Option<BranchName>,
        error: PlatformError,
    },

    #[error("convergence aborted: {0}")]
    State(StateError),
}

fn format_names(names: &[BranchName]) -> String {
    names
        .iter()
        .map(|n| n.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe(branch: Option<&BranchName>) -> String {
    branch
        .map(|b| format!(" for branch '{}'", b))
        .unwrap_or_default()
}

impl ConvergeError {
    fn platform(stage: PassStage, branch: Option<&BranchName>, error: PlatformError) -> Self {
        ConvergeError::Platform {
            stage,
            branch: branch.cloned(),
            error,
        }
    }

    fn from_route(err: RouteError, stage: PassStage) -> Self {
        match err {
            RouteError::Collision {
                branch,
                name,
                detail,
            } => ConvergeError::RouteCollision {
                branch,
                name,
                detail,
            },
            RouteError::Platform { branch, source } => Self::platform(stage, Some(&branch), source),
            RouteError::Listing(source) => Self::platform(stage, None, source),
        }
    }

    fn from_deploy(err: DeployError, function: &str) -> Self {
        match err {
            DeployError::BarrierUnmet { pending } => ConvergeError::BarrierUnmet { pending },
            DeployError::FunctionMissing => ConvergeError::FunctionMissing {
                function: function.to_string(),
            },
            DeployError::Platform(error) => Self::platform(PassStage::Deploy, None, error),
        }
    }

    /// The stage the pass aborted at.
    pub fn stage(&self) -> Option<PassStage> {
        match self {
            ConvergeError::NoCurrentBranch | ConvergeError::Registry(_) => {
                Some(PassStage::Resolve)
            }
            ConvergeError::FunctionMissing { .. } => Some(PassStage::Publish),
            ConvergeError::NeverDeployed { .. } => Some(PassStage::Alias),
            ConvergeError::RouteCollision { .. } => Some(PassStage::Route),
            ConvergeError::BarrierUnmet { .. } => Some(PassStage::Deploy),
            ConvergeError::Platform { stage, .. } => Some(*stage),
            ConvergeError::State(_) => None,
        }
    }

    /// The branch to blame, if any.
    pub fn branch(&self) -> Option<&BranchName> {
        match self {
            ConvergeError::NeverDeployed { branch }
            | ConvergeError::RouteCollision { branch, .. } => Some(branch),
            ConvergeError::Platform { branch, .. } => branch.as_ref(),
            _ => None,
        }
    }
}

impl From<AliasError> for ConvergeError {
    fn from(err: AliasError) -> Self {
        match err {
            AliasError::NeverDeployed(branch) => ConvergeError::NeverDeployed { branch },
            AliasError::Platform { branch, source } => {
                Self::platform(PassStage::Alias, Some(&branch), source)
            }
        }
    }
}

impl From<StateError> for ConvergeError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::BarrierUnmet { pending } => ConvergeError::BarrierUnmet { pending },
            other => ConvergeError::State(other),
        }
    }
}

/// Inputs of one pass beyond the configuration.
#[derive(Debug, Clone, Default)]
pub struct PassOptions {
    /// Branch to promote; falls back to `current_branch` in the config.
    pub current: Option<String>,
    /// Digest of the artifact to publish, if any.
    pub artifact: Option<CodeDigest>,
}

/// What the pass did to one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchReport {
    pub branch: BranchName,
    pub version_label: VersionLabel,
    pub is_current: bool,
    /// Binding captured before the pass wrote anything
    pub resolved: ResolvedVersion,
    pub bound_version: VersionId,
    pub routes: Vec<String>,
}

/// Result of a successful pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassReport {
    pub current: BranchName,
    pub function_version: FunctionVersion,
    pub trigger: DeploymentTrigger,
    /// In registry order
    pub branches: Vec<BranchReport>,
    /// Removed branches whose routes were deleted
    pub pruned: Vec<BranchName>,
    pub deployment: DeploymentOutcome,
    pub outputs: Outputs,
}

/// Function settings to publish with.
pub fn function_config(deploy: &DeployConfig) -> FunctionConfig {
    FunctionConfig {
        name: deploy.function_name(),
        runtime: deploy.function.runtime.clone(),
        handler: deploy.function.handler.clone(),
        memory_mb: deploy.function.memory_mb,
        timeout_secs: deploy.function.timeout_secs,
        environment: deploy.function.environment_variables(),
    }
}

enum BranchOutcome {
    Routed(Alias, RouteSet),
    AliasFailed(ConvergeError),
    RouteFailed(ConvergeError),
}

/// Run one convergence pass.
///
/// # Errors
///
/// See [`ConvergeError`]. Resolution failures never surface; they become
/// the sentinel for the affected branch.
pub async fn converge(ctx: &Context, options: &PassOptions) -> Result<PassReport, ConvergeError> {
    let deploy = &ctx.config.deploy;
    let registry = &ctx.config.registry;

    let current_name = ctx
        .config
        .current_branch(options.current.as_deref())
        .ok_or(ConvergeError::NoCurrentBranch)?;
    let branches = registry.for_pass(current_name)?;
    let current = branches
        .iter()
        .find(|b| b.is_current)
        .map(|b| b.name.clone())
        .ok_or_else(|| RegistryError::UnknownCurrent(current_name.to_string()))?;
    let names: Vec<BranchName> = branches.iter().map(|b| b.name.clone()).collect();
    let function_name = deploy.function_name();
    let mut state = PassState::new(&names);

    info!(current = %current, branches = names.len(), "starting convergence pass");

    // Resolve before anything is written.
    let resolved = VersionResolver::new(ctx.platform.functions.clone(), ctx.max_concurrency())
        .resolve(&function_name, &names)
        .await;
    for name in &names {
        state.advance(name, BranchPhase::Resolved)?;
    }

    let newest = newest_version(ctx, &function_name, options.artifact.as_ref()).await?;
    let trigger = trigger::compute(&newest.id, &newest.code_digest);
    debug!(version = %newest.id, trigger = %trigger, "newest function version");

    let scaffold = Scaffold::ensure(ctx.platform.gateway.as_ref(), deploy)
        .await
        .map_err(|e| ConvergeError::platform(PassStage::Scaffold, None, e))?;
    let scaffold = Arc::new(scaffold);
    RouteProvisioner::check_collisions(&branches)
        .map_err(|e| ConvergeError::from_route(e, PassStage::Route))?;

    let aliases = AliasManager::new(ctx.platform.functions.clone(), function_name.clone());
    let provisioner = RouteProvisioner::new(
        ctx.platform.gateway.clone(),
        ctx.platform.functions.clone(),
        scaffold.clone(),
        deploy.routing.clone(),
        function_name.clone(),
    );

    // Stale routes may hold path slots registered branches are about to take.
    let pruned = provisioner
        .prune(registry)
        .await
        .map_err(|e| ConvergeError::from_route(e, PassStage::Prune))?;

    let mut outcomes = provision_branches(
        ctx.max_concurrency(),
        &branches,
        &current,
        &newest.id,
        Arc::new(resolved.clone()),
        &aliases,
        &provisioner,
    )
    .await;

    let mut bound = BTreeMap::new();
    let mut routes = BTreeMap::new();
    let mut failure = None;
    for branch in &branches {
        match outcomes.remove(&branch.name) {
            Some(BranchOutcome::Routed(alias, set)) => {
                state.advance(&branch.name, BranchPhase::Aliased)?;
                state.advance(&branch.name, BranchPhase::Routed)?;
                bound.insert(branch.name.clone(), alias.bound_version);
                routes.insert(branch.name.clone(), set);
            }
            Some(BranchOutcome::RouteFailed(err)) => {
                state.advance(&branch.name, BranchPhase::Aliased)?;
                error!(branch = %branch.name, error = %err, "routing failed");
                failure.get_or_insert(err);
            }
            Some(BranchOutcome::AliasFailed(err)) => {
                error!(branch = %branch.name, error = %err, "aliasing failed");
                failure.get_or_insert(err);
            }
            None => {
                let err = ConvergeError::platform(
                    PassStage::Alias,
                    Some(&branch.name),
                    PlatformError::Unavailable("branch task aborted".into()),
                );
                failure.get_or_insert(err);
            }
        }
    }
    if let Some(err) = failure {
        debug!(pending = ?state.pending(), "aborting before deployment barrier");
        return Err(err);
    }

    state.mark_all_routed()?;
    let orchestrator = DeploymentOrchestrator::new(
        ctx.platform.gateway.clone(),
        deploy.stack.clone(),
        deploy.usage_plan_name(),
        deploy.usage_plan.clone(),
        deploy.routing.fingerprint(),
    );
    let deployed = orchestrator
        .converge(&scaffold, registry, &routes, &trigger, Some(&newest))
        .await
        .map_err(|e| ConvergeError::from_deploy(e, &function_name))?;
    state.mark_deployed()?;
    info!(outcome = ?deployed.outcome, "convergence pass complete");

    let reports = branches
        .iter()
        .map(|branch| BranchReport {
            branch: branch.name.clone(),
            version_label: branch.version_label.clone(),
            is_current: branch.is_current,
            resolved: resolved
                .get(&branch.name)
                .cloned()
                .unwrap_or(ResolvedVersion::Sentinel),
            bound_version: bound
                .get(&branch.name)
                .cloned()
                .unwrap_or_else(|| newest.id.clone()),
            routes: routes
                .get(&branch.name)
                .map(|set| set.names().map(str::to_string).collect())
                .unwrap_or_default(),
        })
        .collect();

    Ok(PassReport {
        current,
        trigger,
        branches: reports,
        pruned,
        deployment: deployed.outcome,
        outputs: Outputs::collect(deploy, registry, &scaffold.api.id, &scaffold.api_key.value),
        function_version: newest,
    })
}

/// Publish the artifact, or fall back to the newest published version.
async fn newest_version(
    ctx: &Context,
    function_name: &str,
    artifact: Option<&CodeDigest>,
) -> Result<FunctionVersion, ConvergeError> {
    let functions = &ctx.platform.functions;
    match artifact {
        Some(digest) => {
            let version = functions
                .publish_version(&function_config(&ctx.config.deploy), digest)
                .await
                .map_err(|e| ConvergeError::platform(PassStage::Publish, None, e))?;
            info!(version = %version.id, digest = digest.short(), "published function version");
            Ok(version)
        }
        None => functions
            .get_function(function_name)
            .await
            .map_err(|e| ConvergeError::platform(PassStage::Publish, None, e))?
            .and_then(|info| info.latest_version)
            .ok_or_else(|| ConvergeError::FunctionMissing {
                function: function_name.to_string(),
            }),
    }
}

/// Alias and route every branch concurrently.
async fn provision_branches(
    max_concurrency: usize,
    branches: &[Branch],
    current: &BranchName,
    newest: &VersionId,
    resolved: Arc<ResolvedMap>,
    aliases: &AliasManager,
    provisioner: &RouteProvisioner,
) -> BTreeMap<BranchName, BranchOutcome> {
    let semaphore = Arc::new(Semaphore::new(max_concurrency));
    let mut tasks = JoinSet::new();

    for branch in branches {
        let semaphore = Arc::clone(&semaphore);
        let resolved = Arc::clone(&resolved);
        let aliases = aliases.clone();
        let provisioner = provisioner.clone();
        let branch = branch.clone();
        let current = current.clone();
        let newest = newest.clone();

        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let outcome = match aliases.bind(&branch.name, &current, &newest, &resolved).await {
                Err(e) => BranchOutcome::AliasFailed(e.into()),
                Ok(alias) => match provisioner.build_routes(&branch, &alias).await {
                    Ok(set) => BranchOutcome::Routed(alias, set),
                    Err(e) => {
                        BranchOutcome::RouteFailed(ConvergeError::from_route(e, PassStage::Route))
                    }
                },
            };
            (branch.name, outcome)
        });
    }

    let mut outcomes = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, outcome)) => {
                outcomes.insert(name, outcome);
            }
            Err(e) => error!(error = %e, "branch task aborted"),
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::platform::mock::{FailOn, MockPlatform, Op};
    use crate::platform::{FunctionApi, Platform};
    use std::path::Path;

    const CONFIG: &str = r#"
        project = "email"
        stack = "dev"
        region = "us-east-1"

        [[branches]]
        name = "main"
        version_label = "v1"

        [[branches]]
        name = "beta"
        version_label = "v2"
    "#;

    const MAIN_ONLY: &str = r#"
        project = "email"
        stack = "dev"
        region = "us-east-1"

        [[branches]]
        name = "main"
        version_label = "v1"
    "#;

    fn context(mock: &MockPlatform) -> Context {
        let config = Config::from_toml_str(CONFIG, Path::new("branchroute.toml")).unwrap();
        Context::new(config, Platform::from_shared(mock.clone()))
    }

    fn options(current: &str, bundle: Option<&[u8]>) -> PassOptions {
        PassOptions {
            current: Some(current.to_string()),
            artifact: bundle.map(CodeDigest::of_bytes),
        }
    }

    mod errors {
        use super::*;

        #[test]
        fn display_names_stage_and_branch() {
            let err = ConvergeError::platform(
                PassStage::Route,
                Some(&BranchName::new("beta").unwrap()),
                PlatformError::Throttled,
            );
            assert_eq!(
                err.to_string(),
                "convergence aborted at route for branch 'beta': throttled"
            );
            assert_eq!(err.stage(), Some(PassStage::Route));
            assert_eq!(err.branch().unwrap().as_str(), "beta");
        }

        #[test]
        fn shared_failure_has_no_branch() {
            let err = ConvergeError::platform(PassStage::Scaffold, None, PlatformError::Throttled);
            assert_eq!(err.to_string(), "convergence aborted at scaffold: throttled");
            assert!(err.branch().is_none());
        }

        #[test]
        fn never_deployed_message() {
            let err: ConvergeError = AliasError::NeverDeployed(BranchName::new("beta").unwrap()).into();
            let text = err.to_string();
            assert!(text.contains("alias"));
            assert!(text.contains("'beta'"));
            assert!(text.contains("never deployed"));
        }

        #[test]
        fn barrier_from_state() {
            let err: ConvergeError = StateError::BarrierUnmet {
                pending: vec![BranchName::new("beta").unwrap()],
            }
            .into();
            assert_eq!(err.stage(), Some(PassStage::Deploy));
        }
    }

    mod pass {
        use super::*;

        #[tokio::test]
        async fn no_current_branch() {
            let mock = MockPlatform::new("us-east-1");
            let err = converge(&context(&mock), &PassOptions::default())
                .await
                .unwrap_err();
            assert_eq!(err, ConvergeError::NoCurrentBranch);
        }

        #[tokio::test]
        async fn unknown_current_branch() {
            let mock = MockPlatform::new("us-east-1");
            let err = converge(&context(&mock), &options("gamma", None))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                ConvergeError::Registry(RegistryError::UnknownCurrent(_))
            ));
        }

        #[tokio::test]
        async fn missing_function_without_artifact() {
            let mock = MockPlatform::new("us-east-1");
            let err = converge(&context(&mock), &options("main", None))
                .await
                .unwrap_err();
            assert!(matches!(err, ConvergeError::FunctionMissing { .. }));
            assert_eq!(mock.count(Op::PutAlias), 0);
            assert_eq!(mock.count(Op::PutResource), 0);
        }

        #[tokio::test]
        async fn resolution_precedes_publish() {
            let mock = MockPlatform::new("us-east-1");
            let _ = converge(&context(&mock), &options("main", Some(b"one"))).await;

            let ops = mock.operations();
            let last_lookup = ops.iter().rposition(|o| o.op == Op::GetAlias).unwrap();
            let publish = ops.iter().position(|o| o.op == Op::PublishVersion).unwrap();
            let first_write = ops.iter().position(|o| o.op == Op::PutAlias).unwrap();
            assert!(last_lookup < publish);
            assert!(publish < first_write);
        }

        #[tokio::test]
        async fn scaffold_failure_is_attributed() {
            let mock = MockPlatform::new("us-east-1")
                .fail_on(FailOn::new(Op::EnsureRestApi, PlatformError::Throttled));
            let err = converge(&context(&mock), &options("main", Some(b"one")))
                .await
                .unwrap_err();
            assert_eq!(err.stage(), Some(PassStage::Scaffold));
        }

        #[tokio::test]
        async fn branch_work_bounded_by_max_concurrency() {
            const FOUR_BRANCHES: &str = r#"
                project = "email"
                stack = "dev"
                region = "us-east-1"

                [platform]
                max_concurrency = 2

                [[branches]]
                name = "main"
                version_label = "v1"

                [[branches]]
                name = "beta"
                version_label = "v2"

                [[branches]]
                name = "gamma"
                version_label = "v3"

                [[branches]]
                name = "delta"
                version_label = "v4"
            "#;
            let config = Config::from_toml_str(FOUR_BRANCHES, Path::new("branchroute.toml")).unwrap();
            let mock = MockPlatform::new("us-east-1").with_latency(2);
            let version = mock
                .publish_version(
                    &function_config(&config.deploy),
                    &CodeDigest::of_bytes(b"one"),
                )
                .await
                .unwrap();
            for name in config.registry.names() {
                mock.put_alias("email-dev", name, &version.id).await.unwrap();
            }
            mock.clear_operations();

            let ctx = Context::new(config, Platform::from_shared(mock.clone()));
            let report = converge(&ctx, &options("main", None)).await.unwrap();

            assert!(report.deployment.is_created());
            assert_eq!(mock.count(Op::GetAlias), 4);
            assert_eq!(mock.count(Op::PutAlias), 4);
            assert_eq!(mock.count(Op::PutPermission), 4);
            assert_eq!(mock.peak_in_flight(), 2);
        }

        #[tokio::test]
        async fn route_failure_blocks_deployment() {
            let mock = MockPlatform::new("us-east-1");
            let ctx = context(&mock);

            // Bootstrap main alone, then pin beta to the same version.
            let single = Config::from_toml_str(MAIN_ONLY, Path::new("branchroute.toml")).unwrap();
            let bootstrap = Context::new(single, Platform::from_shared(mock.clone()));
            converge(&bootstrap, &options("main", Some(b"one"))).await.unwrap();
            mock.put_alias(
                "email-dev",
                &BranchName::new("beta").unwrap(),
                &VersionId::new("1").unwrap(),
            )
            .await
            .unwrap();
            mock.clear_operations();

            mock.add_failure(
                FailOn::new(Op::PutPermission, PlatformError::Throttled)
                    .for_subject("api-gateway-lambda-permission-beta"),
            );
            let err = converge(&ctx, &options("main", Some(b"two"))).await.unwrap_err();
            assert_eq!(err.stage(), Some(PassStage::Route));
            assert_eq!(err.branch().unwrap().as_str(), "beta");
            assert_eq!(mock.count(Op::CreateDeployment), 0);
            assert_eq!(mock.count(Op::PutStage), 0);
        }
    }
}
