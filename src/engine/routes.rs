//! engine::routes
//!
//! Per-branch route provisioning under the shared API scaffolding.
//!
//! # Layout
//!
//! ```text
//! /{api_prefix}                     shared, owned by no branch
//!   /{version_label}                version-resource-{branch}
//!     /{endpoint}                   generate-email-resource-{branch}
//!       POST    -> alias (proxy)    api key required
//!       OPTIONS -> mock 200         CORS preflight
//! ```
//!
//! # Invariants
//!
//! - Every resource name embeds the branch name and records the branch as
//!   its owner; no two branches share a mutable resource
//! - The invoke permission's qualifier is the branch's own alias
//! - Branches have no data dependency on each other and may be provisioned
//!   concurrently
//! - Resources owned by branches no longer registered are pruned children
//!   first, before any branch is routed, so a removed branch never holds a
//!   path slot a registered branch asks for

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::config::{DeployConfig, RoutingSettings};
use crate::core::registry::{Branch, BranchRegistry};
use crate::core::types::{BranchName, VersionLabel};
use crate::platform::{
    Alias, ApiKey, FunctionApi, GatewayApi, GatewayResource, HttpMethod, Integration,
    PermissionRequest, PlatformError, ResourceSpec, RestApi,
};

/// Name of the shared `/{api_prefix}` parent resource.
pub const SCAFFOLD_RESOURCE: &str = "api-resource";

/// Route resource kinds, in provisioning order.
pub const ROUTE_KINDS: [&str; 10] = [
    "version-resource",
    "generate-email-resource",
    "generate-email-method",
    "generate-email-integration",
    "generate-email-options",
    "generate-email-options-integration",
    "options-method-response",
    "options-integration-response",
    "post-method-response",
    "api-gateway-lambda-permission",
];

/// Number of resources in a complete route set.
pub const ROUTE_RESOURCE_COUNT: usize = ROUTE_KINDS.len();

const PERMISSION_KIND: &str = "api-gateway-lambda-permission";
const INVOKE_ACTION: &str = "lambda:InvokeFunction";
const GATEWAY_PRINCIPAL: &str = "apigateway.amazonaws.com";
const PREFLIGHT_TEMPLATE: &str = r#"{"statusCode": 200}"#;
const ALLOW_HEADERS: &str = "method.response.header.Access-Control-Allow-Headers";
const ALLOW_METHODS: &str = "method.response.header.Access-Control-Allow-Methods";
const ALLOW_ORIGIN: &str = "method.response.header.Access-Control-Allow-Origin";

/// Name of one route resource of `branch`.
pub fn resource_name(kind: &str, branch: &BranchName) -> String {
    format!("{}-{}", kind, branch)
}

/// Every route resource name of `branch`, in provisioning order.
pub fn route_names(branch: &BranchName) -> Vec<String> {
    ROUTE_KINDS
        .iter()
        .map(|kind| resource_name(kind, branch))
        .collect()
}

/// Errors from provisioning or pruning routes.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RouteError {
    #[error("route resource '{name}' of branch '{branch}' collides: {detail}")]
    Collision {
        branch: BranchName,
        name: String,
        detail: String,
    },

    #[error("routing branch '{branch}' failed: {source}")]
    Platform {
        branch: BranchName,
        source: PlatformError,
    },

    #[error("listing route resources failed: {0}")]
    Listing(PlatformError),
}

impl RouteError {
    /// The branch the error is attributed to, if any.
    pub fn branch(&self) -> Option<&BranchName> {
        match self {
            RouteError::Collision { branch, .. } | RouteError::Platform { branch, .. } => {
                Some(branch)
            }
            RouteError::Listing(_) => None,
        }
    }
}

/// Shared resources every branch's routes hang off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scaffold {
    pub api: RestApi,
    /// The `/{api_prefix}` parent node
    pub api_resource: GatewayResource,
    pub api_key: ApiKey,
}

impl Scaffold {
    /// Ensure the REST API, its shared parent resource and the API key.
    pub async fn ensure(
        gateway: &dyn GatewayApi,
        deploy: &DeployConfig,
    ) -> Result<Self, PlatformError> {
        let api = gateway
            .ensure_rest_api(
                &deploy.api_name(),
                &format!("{} API ({})", deploy.project, deploy.stack),
            )
            .await?;
        let api_resource = gateway
            .put_resource(
                &api.id,
                SCAFFOLD_RESOURCE,
                None,
                ResourceSpec::Path {
                    parent_id: api.root_resource_id.clone(),
                    path_part: deploy.routing.api_prefix.clone(),
                },
            )
            .await?;
        let api_key = gateway.ensure_api_key(&deploy.api_key_name()).await?;
        debug!(api = %api.id, "scaffold ready");

        Ok(Self {
            api,
            api_resource,
            api_key,
        })
    }

    /// Names of the shared resources a deployment depends on.
    pub fn resource_names(&self) -> Vec<String> {
        vec![self.api_resource.name.clone()]
    }
}

/// One provisioned route resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub name: String,
    pub kind: &'static str,
    /// Provider id (the statement id for the permission)
    pub id: String,
}

/// The provisioned routes of one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteSet {
    pub branch: BranchName,
    pub version_label: VersionLabel,
    pub routes: Vec<Route>,
}

impl RouteSet {
    /// Resource names in provisioning order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.name.as_str())
    }

    /// Check the set holds every route resource kind.
    pub fn is_complete(&self) -> bool {
        self.routes.len() == ROUTE_RESOURCE_COUNT
            && self
                .routes
                .iter()
                .zip(ROUTE_KINDS.iter())
                .all(|(route, kind)| route.kind == *kind)
    }
}

/// Builds route sets for branches against one scaffold.
#[derive(Clone)]
pub struct RouteProvisioner {
    gateway: Arc<dyn GatewayApi>,
    functions: Arc<dyn FunctionApi>,
    scaffold: Arc<Scaffold>,
    routing: RoutingSettings,
    function_name: String,
}

impl RouteProvisioner {
    pub fn new(
        gateway: Arc<dyn GatewayApi>,
        functions: Arc<dyn FunctionApi>,
        scaffold: Arc<Scaffold>,
        routing: RoutingSettings,
        function_name: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            functions,
            scaffold,
            routing,
            function_name: function_name.into(),
        }
    }

    /// Reject branch sets whose route names would collide.
    ///
    /// Distinct branch names can still produce equal resource names (branch
    /// `integration-x` under `generate-email-options` against branch `x`
    /// under `generate-email-options-integration`).
    pub fn check_collisions(branches: &[Branch]) -> Result<(), RouteError> {
        let mut owners: HashMap<String, Option<&BranchName>> = HashMap::new();
        owners.insert(SCAFFOLD_RESOURCE.to_string(), None);

        for branch in branches {
            for name in route_names(&branch.name) {
                if let Some(owner) = owners.get(&name) {
                    let detail = match owner {
                        Some(other) => format!("also produced by branch '{}'", other),
                        None => "reserved for the shared scaffolding".to_string(),
                    };
                    return Err(RouteError::Collision {
                        branch: branch.name.clone(),
                        name,
                        detail,
                    });
                }
                owners.insert(name, Some(&branch.name));
            }
        }
        Ok(())
    }

    /// Provision the routes of `branch`, integrated with `alias`.
    ///
    /// # Errors
    ///
    /// - [`RouteError::Collision`] if the platform reports a name or slot
    ///   conflict
    /// - [`RouteError::Platform`] for any other platform failure
    pub async fn build_routes(&self, branch: &Branch, alias: &Alias) -> Result<RouteSet, RouteError> {
        let name = &branch.name;
        let mut routes = Vec::with_capacity(ROUTE_RESOURCE_COUNT);

        let version = self
            .put(
                name,
                "version-resource",
                ResourceSpec::Path {
                    parent_id: self.scaffold.api_resource.id.clone(),
                    path_part: branch.version_label.to_string(),
                },
            )
            .await?;
        let leaf = self
            .put(
                name,
                "generate-email-resource",
                ResourceSpec::Path {
                    parent_id: version.id.clone(),
                    path_part: self.routing.endpoint.clone(),
                },
            )
            .await?;
        let leaf_id = leaf.id.clone();
        routes.push(version);
        routes.push(leaf);

        let specs = [
            (
                "generate-email-method",
                ResourceSpec::Method {
                    resource_id: leaf_id.clone(),
                    http_method: HttpMethod::Post,
                    api_key_required: true,
                },
            ),
            (
                "generate-email-integration",
                ResourceSpec::Integration {
                    resource_id: leaf_id.clone(),
                    http_method: HttpMethod::Post,
                    integration: Integration::AwsProxy {
                        uri: alias.invoke_arn.clone(),
                    },
                },
            ),
            (
                "generate-email-options",
                ResourceSpec::Method {
                    resource_id: leaf_id.clone(),
                    http_method: HttpMethod::Options,
                    api_key_required: false,
                },
            ),
            (
                "generate-email-options-integration",
                ResourceSpec::Integration {
                    resource_id: leaf_id.clone(),
                    http_method: HttpMethod::Options,
                    integration: Integration::Mock {
                        request_template: PREFLIGHT_TEMPLATE.to_string(),
                    },
                },
            ),
            (
                "options-method-response",
                ResourceSpec::MethodResponse {
                    resource_id: leaf_id.clone(),
                    http_method: HttpMethod::Options,
                    status_code: 200,
                    headers: vec![
                        ALLOW_HEADERS.to_string(),
                        ALLOW_METHODS.to_string(),
                        ALLOW_ORIGIN.to_string(),
                    ],
                },
            ),
            (
                "options-integration-response",
                ResourceSpec::IntegrationResponse {
                    resource_id: leaf_id.clone(),
                    http_method: HttpMethod::Options,
                    status_code: 200,
                    headers: self.preflight_headers(),
                },
            ),
            (
                "post-method-response",
                ResourceSpec::MethodResponse {
                    resource_id: leaf_id.clone(),
                    http_method: HttpMethod::Post,
                    status_code: 200,
                    headers: vec![ALLOW_ORIGIN.to_string()],
                },
            ),
        ];
        for (kind, spec) in specs {
            routes.push(self.put(name, kind, spec).await?);
        }

        routes.push(self.grant(name).await?);
        debug!(branch = %name, label = %branch.version_label, "routes provisioned");

        Ok(RouteSet {
            branch: name.clone(),
            version_label: branch.version_label.clone(),
            routes,
        })
    }

    /// Delete the routes of branches no longer in `registry`.
    ///
    /// Returns the pruned branch names. Aliases are left in place.
    pub async fn prune(&self, registry: &BranchRegistry) -> Result<Vec<BranchName>, RouteError> {
        let api_id = &self.scaffold.api.id;
        let resources = self
            .gateway
            .list_resources(api_id)
            .await
            .map_err(RouteError::Listing)?;

        let stale = stale_routes(&resources, registry);
        let depths = path_depths(&resources);
        for (branch, owned) in &stale {
            let mut owned = owned.clone();
            owned.sort_by_key(|r| std::cmp::Reverse(depth_of(r, &depths)));
            info!(branch = %branch, count = owned.len(), "pruning routes of removed branch");
            for resource in owned {
                self.gateway
                    .delete_resource(api_id, &resource.name)
                    .await
                    .map_err(|source| RouteError::Platform {
                        branch: branch.clone(),
                        source,
                    })?;
            }

            let statement = resource_name(PERMISSION_KIND, branch);
            match self
                .functions
                .remove_permission(&self.function_name, &statement)
                .await
            {
                Ok(()) | Err(PlatformError::NotFound(_)) => {}
                Err(source) => {
                    return Err(RouteError::Platform {
                        branch: branch.clone(),
                        source,
                    })
                }
            }
        }

        Ok(stale.into_keys().collect())
    }

    async fn put(
        &self,
        branch: &BranchName,
        kind: &'static str,
        spec: ResourceSpec,
    ) -> Result<Route, RouteError> {
        let name = resource_name(kind, branch);
        match self
            .gateway
            .put_resource(&self.scaffold.api.id, &name, Some(branch), spec)
            .await
        {
            Ok(resource) => Ok(Route {
                name,
                kind,
                id: resource.id,
            }),
            Err(PlatformError::Conflict(detail)) => Err(RouteError::Collision {
                branch: branch.clone(),
                name,
                detail,
            }),
            Err(source) => Err(RouteError::Platform {
                branch: branch.clone(),
                source,
            }),
        }
    }

    async fn grant(&self, branch: &BranchName) -> Result<Route, RouteError> {
        let statement_id = resource_name(PERMISSION_KIND, branch);
        let request = PermissionRequest {
            statement_id: statement_id.clone(),
            function_name: self.function_name.clone(),
            action: INVOKE_ACTION.to_string(),
            principal: GATEWAY_PRINCIPAL.to_string(),
            qualifier: branch.clone(),
            source_arn: format!("{}/*/*", self.scaffold.api.execution_arn),
        };
        self.functions
            .put_permission(&request)
            .await
            .map_err(|source| RouteError::Platform {
                branch: branch.clone(),
                source,
            })?;

        Ok(Route {
            name: statement_id.clone(),
            kind: PERMISSION_KIND,
            id: statement_id,
        })
    }

    fn preflight_headers(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                ALLOW_HEADERS.to_string(),
                format!("'{}'", self.routing.allow_headers),
            ),
            (ALLOW_METHODS.to_string(), "'OPTIONS,POST'".to_string()),
            (
                ALLOW_ORIGIN.to_string(),
                format!("'{}'", self.routing.allow_origin),
            ),
        ])
    }
}

/// Route resources owned by branches no longer in `registry`, by owner.
pub fn stale_routes<'a>(
    resources: &'a [GatewayResource],
    registry: &BranchRegistry,
) -> BTreeMap<BranchName, Vec<&'a GatewayResource>> {
    let mut stale: BTreeMap<BranchName, Vec<&GatewayResource>> = BTreeMap::new();
    for resource in resources {
        if let Some(owner) = &resource.owner {
            if !registry.contains(owner) {
                stale.entry(owner.clone()).or_default().push(resource);
            }
        }
    }
    stale
}

/// Depth of every path node, keyed by id. Scaffold nodes count too.
fn path_depths(resources: &[GatewayResource]) -> HashMap<String, usize> {
    let parents: HashMap<&str, &str> = resources
        .iter()
        .filter_map(|r| match &r.spec {
            ResourceSpec::Path { parent_id, .. } => Some((r.id.as_str(), parent_id.as_str())),
            _ => None,
        })
        .collect();

    let mut depths = HashMap::new();
    for id in parents.keys() {
        let mut depth = 0;
        let mut cursor = *id;
        let mut visited = BTreeSet::new();
        while let Some(parent) = parents.get(cursor) {
            if !visited.insert(cursor) {
                break;
            }
            depth += 1;
            cursor = *parent;
        }
        depths.insert(id.to_string(), depth);
    }
    depths
}

/// Children sort deeper than the node they hang off.
fn depth_of(resource: &GatewayResource, depths: &HashMap<String, usize>) -> usize {
    match &resource.spec {
        ResourceSpec::Path { .. } => depths.get(&resource.id).copied().unwrap_or(0),
        other => depths.get(other.anchor_id()).copied().unwrap_or(0) + 1,
    }
}
