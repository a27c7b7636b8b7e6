//! engine::deploy
//!
//! The single deployment of a pass.
//!
//! # Invariants
//!
//! - Barrier: every registered branch has a complete route set and the
//!   function exists, or nothing is created
//! - At most one deployment per pass, created only when the trigger differs
//!   from the one recorded on the live stage (compare-and-swap), or when
//!   the live snapshot was taken over a different route set or different
//!   routing settings
//! - The deployment depends on every branch's route resources plus the
//!   shared scaffolding, a strict superset of the union of route sets
//! - One usage plan and one API key cover every branch's routes

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use super::routes::{route_names, RouteSet, Scaffold, SCAFFOLD_RESOURCE};
use super::trigger::{DeploymentTrigger, TRIGGER_VARIABLE, VERSION_VARIABLE};
use crate::core::config::UsagePlanSettings;
use crate::core::registry::BranchRegistry;
use crate::core::types::{BranchName, Fingerprint};
use crate::platform::{
    DeploymentRequest, FunctionVersion, GatewayApi, PlatformError, Stage, StageRequest,
    UsagePlan, UsagePlanRequest,
};

/// Stage variable the routing settings fingerprint is recorded under.
pub const ROUTING_VARIABLE: &str = "routing_fingerprint";

/// Errors from the deployment step.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeployError {
    #[error("deployment barrier unmet, branches without complete routes: {}", format_names(.pending))]
    BarrierUnmet { pending: Vec<BranchName> },

    #[error("function does not exist; nothing to deploy")]
    FunctionMissing,

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

fn format_names(names: &[BranchName]) -> String {
    names
        .iter()
        .map(|n| n.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// What happened to the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeploymentOutcome {
    /// A new snapshot was created and the stage repointed.
    Created { deployment_id: String },
    /// The live stage already carries this trigger.
    Unchanged { deployment_id: String },
}

impl DeploymentOutcome {
    pub fn deployment_id(&self) -> &str {
        match self {
            DeploymentOutcome::Created { deployment_id }
            | DeploymentOutcome::Unchanged { deployment_id } => deployment_id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, DeploymentOutcome::Created { .. })
    }
}

/// Result of the deployment step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployReport {
    pub outcome: DeploymentOutcome,
    pub stage: Stage,
    pub usage_plan: UsagePlan,
}

/// Owns deployment and stage creation for one API.
#[derive(Clone)]
pub struct DeploymentOrchestrator {
    gateway: Arc<dyn GatewayApi>,
    stage_name: String,
    usage_plan_name: String,
    usage_plan: UsagePlanSettings,
    routing: Fingerprint,
}

impl DeploymentOrchestrator {
    pub fn new(
        gateway: Arc<dyn GatewayApi>,
        stage_name: impl Into<String>,
        usage_plan_name: impl Into<String>,
        usage_plan: UsagePlanSettings,
        routing: Fingerprint,
    ) -> Self {
        Self {
            gateway,
            stage_name: stage_name.into(),
            usage_plan_name: usage_plan_name.into(),
            usage_plan,
            routing,
        }
    }

    /// Check the barrier without touching the platform.
    pub fn check_barrier(
        registry: &BranchRegistry,
        branch_routes: &BTreeMap<BranchName, RouteSet>,
        function: Option<&FunctionVersion>,
    ) -> Result<(), DeployError> {
        let pending: Vec<BranchName> = registry
            .names()
            .filter(|name| {
                !branch_routes
                    .get(*name)
                    .is_some_and(|set| set.is_complete())
            })
            .cloned()
            .collect();
        if !pending.is_empty() {
            return Err(DeployError::BarrierUnmet { pending });
        }
        if function.is_none() {
            return Err(DeployError::FunctionMissing);
        }
        Ok(())
    }

    /// Deploy the API if the trigger, the route set or the routing settings
    /// changed, then publish the stage and attach the usage plan.
    pub async fn converge(
        &self,
        scaffold: &Scaffold,
        registry: &BranchRegistry,
        branch_routes: &BTreeMap<BranchName, RouteSet>,
        trigger: &DeploymentTrigger,
        function: Option<&FunctionVersion>,
    ) -> Result<DeployReport, DeployError> {
        Self::check_barrier(registry, branch_routes, function)?;
        let function = function.ok_or(DeployError::FunctionMissing)?;
        let api_id = &scaffold.api.id;

        let depends_on = dependencies(scaffold, branch_routes);

        let live = self.gateway.get_stage(api_id, &self.stage_name).await?;
        let unchanged = trigger.matches(stage_variable(live.as_ref(), TRIGGER_VARIABLE));
        let same_routing =
            stage_variable(live.as_ref(), ROUTING_VARIABLE) == Some(self.routing.as_str());
        if unchanged && !same_routing {
            debug!("routing settings changed since last deployment");
        }
        let unchanged = unchanged && same_routing;

        let reusable = match live {
            Some(stage) if unchanged => {
                let snapshot = self
                    .gateway
                    .get_deployment(api_id, &stage.deployment_id)
                    .await?;
                match snapshot {
                    Some(snapshot) if snapshot.depends_on == depends_on => Some(stage),
                    _ => {
                        debug!(
                            deployment = %stage.deployment_id,
                            "route set changed since last deployment"
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        let (outcome, stage) = match reusable {
            Some(stage) => {
                debug!(trigger = %trigger, "trigger unchanged, keeping deployment");
                let outcome = DeploymentOutcome::Unchanged {
                    deployment_id: stage.deployment_id.clone(),
                };
                (outcome, stage)
            }
            None => {
                let deployment = self
                    .gateway
                    .create_deployment(
                        api_id,
                        DeploymentRequest {
                            description: format!(
                                "function version {} ({})",
                                function.id,
                                function.code_digest.short()
                            ),
                            trigger: trigger.fingerprint().clone(),
                            function_version: function.id.clone(),
                            depends_on,
                        },
                    )
                    .await?;
                info!(deployment = %deployment.id, trigger = %trigger, "created deployment");

                let stage = self
                    .gateway
                    .put_stage(
                        api_id,
                        StageRequest {
                            name: self.stage_name.clone(),
                            deployment_id: deployment.id.clone(),
                            variables: BTreeMap::from([
                                (VERSION_VARIABLE.to_string(), function.id.to_string()),
                                (TRIGGER_VARIABLE.to_string(), trigger.to_string()),
                                (ROUTING_VARIABLE.to_string(), self.routing.to_string()),
                            ]),
                        },
                    )
                    .await?;
                let outcome = DeploymentOutcome::Created {
                    deployment_id: deployment.id,
                };
                (outcome, stage)
            }
        };

        let usage_plan = self
            .gateway
            .put_usage_plan(UsagePlanRequest {
                name: self.usage_plan_name.clone(),
                description: format!("Usage plan for stage {}", self.stage_name),
                api_id: api_id.clone(),
                stage: stage.name.clone(),
                quota_limit: self.usage_plan.quota_limit,
                quota_period: self.usage_plan.quota_period,
                burst_limit: self.usage_plan.burst_limit,
                rate_limit: self.usage_plan.rate_limit,
                api_key_id: scaffold.api_key.id.clone(),
            })
            .await?;

        Ok(DeployReport {
            outcome,
            stage,
            usage_plan,
        })
    }
}

fn stage_variable<'a>(stage: Option<&'a Stage>, name: &str) -> Option<&'a str> {
    stage
        .and_then(|stage| stage.variables.get(name))
        .map(String::as_str)
}

/// Dependencies a pass over `branches` produces, without provisioning.
pub fn expected_dependencies<'a>(branches: impl IntoIterator<Item = &'a BranchName>) -> Vec<String> {
    let mut names = vec![SCAFFOLD_RESOURCE.to_string()];
    for branch in branches {
        names.extend(route_names(branch));
    }
    names.sort();
    names.dedup();
    names
}

/// Shared scaffolding plus every route resource, sorted.
pub fn dependencies(scaffold: &Scaffold, branch_routes: &BTreeMap<BranchName, RouteSet>) -> Vec<String> {
    let mut names: Vec<String> = scaffold.resource_names();
    for set in branch_routes.values() {
        names.extend(set.names().map(str::to_string));
    }
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{Config, DeployConfig, RoutingSettings};
    use crate::core::types::{CodeDigest, VersionId};
    use crate::engine::routes::{Route, RouteProvisioner, ROUTE_KINDS};
    use crate::engine::trigger;
    use crate::platform::mock::{MockPlatform, Op};
    use crate::platform::{FunctionApi, FunctionConfig};
    use std::collections::BTreeSet;
    use std::path::Path;

    fn routes_for(name: &str, label: &str) -> RouteSet {
        let branch = BranchName::new(name).unwrap();
        RouteSet {
            branch: branch.clone(),
            version_label: crate::core::types::VersionLabel::new(label).unwrap(),
            routes: ROUTE_KINDS
                .iter()
                .map(|kind| Route {
                    name: format!("{kind}-{name}"),
                    kind,
                    id: format!("{kind}-{name}"),
                })
                .collect(),
        }
    }

    fn registry() -> BranchRegistry {
        BranchRegistry::from_pairs(&[("main", "v1"), ("beta", "v2")]).unwrap()
    }

    fn version() -> FunctionVersion {
        FunctionVersion {
            id: VersionId::new("1").unwrap(),
            code_digest: CodeDigest::of_bytes(b"bundle"),
        }
    }

    mod barrier {
        use super::*;

        #[test]
        fn missing_branch_blocks() {
            let routes = BTreeMap::from([(
                BranchName::new("main").unwrap(),
                routes_for("main", "v1"),
            )]);
            let err =
                DeploymentOrchestrator::check_barrier(&registry(), &routes, Some(&version()))
                    .unwrap_err();
            assert_eq!(
                err,
                DeployError::BarrierUnmet {
                    pending: vec![BranchName::new("beta").unwrap()]
                }
            );
        }

        #[test]
        fn incomplete_set_blocks() {
            let mut beta = routes_for("beta", "v2");
            beta.routes.pop();
            let routes = BTreeMap::from([
                (BranchName::new("main").unwrap(), routes_for("main", "v1")),
                (BranchName::new("beta").unwrap(), beta),
            ]);
            assert!(matches!(
                DeploymentOrchestrator::check_barrier(&registry(), &routes, Some(&version())),
                Err(DeployError::BarrierUnmet { .. })
            ));
        }

        #[test]
        fn missing_function_blocks() {
            let routes = BTreeMap::from([
                (BranchName::new("main").unwrap(), routes_for("main", "v1")),
                (BranchName::new("beta").unwrap(), routes_for("beta", "v2")),
            ]);
            assert_eq!(
                DeploymentOrchestrator::check_barrier(&registry(), &routes, None),
                Err(DeployError::FunctionMissing)
            );
        }
    }

    mod deployment {
        use super::*;

        const CONFIG: &str = r#"
            project = "email"
            stack = "dev"
            region = "us-east-1"
            current_branch = "main"

            [platform]
            provider = "memory"

            [[branches]]
            name = "main"
            version_label = "v1"

            [[branches]]
            name = "beta"
            version_label = "v2"
        "#;

        #[test]
        fn dependencies_strictly_cover_routes() {
            let scaffold = Scaffold {
                api: crate::platform::RestApi {
                    id: "a".into(),
                    name: "n".into(),
                    root_resource_id: "r".into(),
                    execution_arn: "arn".into(),
                },
                api_resource: crate::platform::GatewayResource {
                    name: "api-resource".into(),
                    id: "p".into(),
                    owner: None,
                    spec: crate::platform::ResourceSpec::Path {
                        parent_id: "r".into(),
                        path_part: "api".into(),
                    },
                },
                api_key: crate::platform::ApiKey {
                    id: "k".into(),
                    name: "k".into(),
                    value: "v".into(),
                    enabled: true,
                },
            };
            let routes = BTreeMap::from([
                (BranchName::new("main").unwrap(), routes_for("main", "v1")),
                (BranchName::new("beta").unwrap(), routes_for("beta", "v2")),
            ]);

            let deps: BTreeSet<String> = dependencies(&scaffold, &routes).into_iter().collect();
            let union: BTreeSet<String> = routes
                .values()
                .flat_map(|s| s.names().map(str::to_string))
                .collect();
            assert!(deps.is_superset(&union));
            assert!(deps.len() > union.len());
        }

        struct Fixture {
            mock: MockPlatform,
            scaffold: Scaffold,
            routes: BTreeMap<BranchName, RouteSet>,
            registry: BranchRegistry,
            orchestrator: DeploymentOrchestrator,
        }

        async fn routed(bundle: &[u8]) -> (Fixture, FunctionVersion) {
            let config = Config::from_toml_str(CONFIG, Path::new("branchroute.toml")).unwrap();
            let deploy: &DeployConfig = &config.deploy;
            let mock = MockPlatform::new("us-east-1");
            let function = FunctionConfig {
                name: deploy.function_name(),
                runtime: deploy.function.runtime.clone(),
                handler: deploy.function.handler.clone(),
                memory_mb: deploy.function.memory_mb,
                timeout_secs: deploy.function.timeout_secs,
                environment: deploy.function.environment_variables(),
            };
            let version = mock
                .publish_version(&function, &CodeDigest::of_bytes(bundle))
                .await
                .unwrap();

            let scaffold = Scaffold::ensure(&mock, deploy).await.unwrap();
            let shared = Arc::new(mock.clone());
            let provisioner = RouteProvisioner::new(
                shared.clone(),
                shared.clone(),
                Arc::new(scaffold.clone()),
                deploy.routing.clone(),
                deploy.function_name(),
            );

            let mut routes = BTreeMap::new();
            for branch in config.registry.for_pass("main").unwrap() {
                let alias = mock
                    .put_alias(&function.name, &branch.name, &version.id)
                    .await
                    .unwrap();
                let set = provisioner.build_routes(&branch, &alias).await.unwrap();
                routes.insert(branch.name.clone(), set);
            }

            let orchestrator = DeploymentOrchestrator::new(
                shared,
                deploy.stack.clone(),
                deploy.usage_plan_name(),
                deploy.usage_plan.clone(),
                deploy.routing.fingerprint(),
            );
            let fixture = Fixture {
                mock,
                scaffold,
                routes,
                registry: config.registry.clone(),
                orchestrator,
            };
            (fixture, version)
        }

        #[tokio::test]
        async fn creates_deployment_and_stage() {
            let (f, v) = routed(b"one").await;
            let t = trigger::compute(&v.id, &v.code_digest);
            let report = f
                .orchestrator
                .converge(&f.scaffold, &f.registry, &f.routes, &t, Some(&v))
                .await
                .unwrap();

            assert!(report.outcome.is_created());
            assert_eq!(report.stage.name, "dev");
            assert_eq!(report.stage.variables[TRIGGER_VARIABLE], t.to_string());
            assert_eq!(report.stage.variables[VERSION_VARIABLE], "1");
            assert_eq!(
                report.usage_plan.api_stages,
                vec![(f.scaffold.api.id.clone(), "dev".to_string())]
            );
            assert_eq!(report.usage_plan.api_key_ids, vec![f.scaffold.api_key.id.clone()]);
            assert_eq!(report.usage_plan.quota_limit, 500);

            let deployment = f
                .mock
                .get_deployment(&f.scaffold.api.id, report.outcome.deployment_id())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(deployment.depends_on, dependencies(&f.scaffold, &f.routes));
            assert_eq!(deployment.depends_on, expected_dependencies(f.registry.names()));
        }

        #[tokio::test]
        async fn unchanged_trigger_is_noop() {
            let (f, v) = routed(b"one").await;
            let t = trigger::compute(&v.id, &v.code_digest);
            let first = f
                .orchestrator
                .converge(&f.scaffold, &f.registry, &f.routes, &t, Some(&v))
                .await
                .unwrap();
            let second = f
                .orchestrator
                .converge(&f.scaffold, &f.registry, &f.routes, &t, Some(&v))
                .await
                .unwrap();

            assert_eq!(
                second.outcome,
                DeploymentOutcome::Unchanged {
                    deployment_id: first.outcome.deployment_id().to_string()
                }
            );
            assert_eq!(f.mock.count(Op::CreateDeployment), 1);
            assert_eq!(f.mock.count(Op::PutStage), 1);
        }

        #[tokio::test]
        async fn changed_trigger_redeploys() {
            let (f, v) = routed(b"one").await;
            let first = f
                .orchestrator
                .converge(
                    &f.scaffold,
                    &f.registry,
                    &f.routes,
                    &trigger::compute(&v.id, &v.code_digest),
                    Some(&v),
                )
                .await
                .unwrap();

            let next = FunctionVersion {
                id: VersionId::new("2").unwrap(),
                code_digest: CodeDigest::of_bytes(b"two"),
            };
            let second = f
                .orchestrator
                .converge(
                    &f.scaffold,
                    &f.registry,
                    &f.routes,
                    &trigger::compute(&next.id, &next.code_digest),
                    Some(&next),
                )
                .await
                .unwrap();

            assert!(second.outcome.is_created());
            assert_ne!(
                first.outcome.deployment_id(),
                second.outcome.deployment_id()
            );
            assert_eq!(second.stage.variables[VERSION_VARIABLE], "2");
        }

        #[tokio::test]
        async fn pruned_route_set_redeploys_same_trigger() {
            let (f, v) = routed(b"one").await;
            let t = trigger::compute(&v.id, &v.code_digest);
            let first = f
                .orchestrator
                .converge(&f.scaffold, &f.registry, &f.routes, &t, Some(&v))
                .await
                .unwrap();

            let registry = BranchRegistry::from_pairs(&[("main", "v1")]).unwrap();
            let mut remaining = f.routes.clone();
            remaining.remove(&BranchName::new("beta").unwrap());
            let second = f
                .orchestrator
                .converge(&f.scaffold, &registry, &remaining, &t, Some(&v))
                .await
                .unwrap();

            assert!(second.outcome.is_created());
            assert_ne!(first.outcome.deployment_id(), second.outcome.deployment_id());
            assert_eq!(second.stage.variables[TRIGGER_VARIABLE], t.to_string());
        }

        #[tokio::test]
        async fn routing_change_redeploys_same_trigger() {
            let (f, v) = routed(b"one").await;
            let t = trigger::compute(&v.id, &v.code_digest);
            let first = f
                .orchestrator
                .converge(&f.scaffold, &f.registry, &f.routes, &t, Some(&v))
                .await
                .unwrap();
            assert_eq!(
                first.stage.variables[ROUTING_VARIABLE],
                RoutingSettings::default().fingerprint().to_string()
            );

            let origin = RoutingSettings {
                allow_origin: "https://app.example.com".into(),
                ..Default::default()
            };
            let edited = DeploymentOrchestrator::new(
                Arc::new(f.mock.clone()),
                "dev",
                "email-plan-dev",
                UsagePlanSettings::default(),
                origin.fingerprint(),
            );
            let second = edited
                .converge(&f.scaffold, &f.registry, &f.routes, &t, Some(&v))
                .await
                .unwrap();
            let third = edited
                .converge(&f.scaffold, &f.registry, &f.routes, &t, Some(&v))
                .await
                .unwrap();

            assert!(second.outcome.is_created());
            assert_ne!(first.outcome.deployment_id(), second.outcome.deployment_id());
            assert_eq!(second.stage.variables[TRIGGER_VARIABLE], t.to_string());
            assert!(!third.outcome.is_created());
            assert_eq!(f.mock.count(Op::CreateDeployment), 2);
        }

        #[tokio::test]
        async fn barrier_failure_creates_nothing() {
            let (f, v) = routed(b"one").await;
            let mut partial = f.routes.clone();
            partial.remove(&BranchName::new("beta").unwrap());
            let err = f
                .orchestrator
                .converge(
                    &f.scaffold,
                    &f.registry,
                    &partial,
                    &trigger::compute(&v.id, &v.code_digest),
                    Some(&v),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, DeployError::BarrierUnmet { .. }));
            assert_eq!(f.mock.count(Op::GetStage), 0);
            assert_eq!(f.mock.count(Op::CreateDeployment), 0);
        }
    }
}
