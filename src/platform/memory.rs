//! platform::memory
//!
//! In-process platform implementation, optionally persisted to a JSON state
//! file.
//!
//! # Design
//!
//! `MemoryPlatform` implements both [`FunctionApi`] and [`GatewayApi`] over a
//! single [`PlatformState`] guarded by a mutex. It enforces the same
//! constraints a real provider does (versions are immutable, aliases must
//! point at existing versions, path nodes cannot be shared by two names,
//! deployments require their dependencies to exist), which makes it usable
//! both as the `memory` provider for dry runs and as the `local` provider.
//!
//! With a state path, the state is loaded on open, written after every
//! mutation, and an exclusive [`StateLock`] is held for the handle's lifetime.
//!
//! # Example
//!
//! ```
//! use branchroute::platform::memory::MemoryPlatform;
//! use branchroute::platform::{FunctionApi, FunctionConfig};
//! use branchroute::core::types::CodeDigest;
//! use std::collections::BTreeMap;
//!
//! # tokio_test::block_on(async {
//! let platform = MemoryPlatform::new("us-east-1");
//! let config = FunctionConfig {
//!     name: "email-api-dev".to_string(),
//!     runtime: "python3.10".to_string(),
//!     handler: "lambda_handler.handler".to_string(),
//!     memory_mb: 1024,
//!     timeout_secs: 30,
//!     environment: BTreeMap::new(),
//! };
//!
//! let v1 = platform.publish_version(&config, &CodeDigest::of_bytes(b"a")).await.unwrap();
//! let again = platform.publish_version(&config, &CodeDigest::of_bytes(b"a")).await.unwrap();
//! assert_eq!(v1, again);
//! # });
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::lock::StateLock;
use super::traits::{
    Alias, ApiKey, Deployment, DeploymentRequest, FunctionApi, FunctionConfig, FunctionInfo,
    FunctionVersion, GatewayApi, GatewayResource, PermissionRequest, PlatformError,
    ResourceSpec, RestApi, Stage, StageRequest, UsagePlan, UsagePlanRequest,
};
use crate::core::types::{BranchName, CodeDigest, VersionId};

/// Account id used in the ARNs this platform mints.
const LOCAL_ACCOUNT: &str = "000000000000";

/// Everything the platform knows, as persisted to disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformState {
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionRecord>,
    /// Keyed by API id
    #[serde(default)]
    pub apis: BTreeMap<String, ApiRecord>,
    /// Keyed by key name
    #[serde(default)]
    pub api_keys: BTreeMap<String, ApiKey>,
    /// Keyed by plan name
    #[serde(default)]
    pub usage_plans: BTreeMap<String, UsagePlan>,
}

/// One function with its versions, aliases and permissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub arn: String,
    pub config: FunctionConfig,
    /// Published versions, oldest first
    pub versions: Vec<FunctionVersion>,
    pub aliases: BTreeMap<BranchName, VersionId>,
    /// Keyed by statement id
    pub permissions: BTreeMap<String, PermissionRequest>,
}

impl FunctionRecord {
    fn latest(&self) -> Option<&FunctionVersion> {
        self.versions.last()
    }
}

/// One REST API with its resources, deployments and stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRecord {
    pub api: RestApi,
    /// Keyed by resource name
    pub resources: BTreeMap<String, GatewayResource>,
    /// Oldest first
    pub deployments: Vec<Deployment>,
    pub stages: BTreeMap<String, Stage>,
}

impl ApiRecord {
    fn has_path_node(&self, id: &str) -> bool {
        id == self.api.root_resource_id
            || self
                .resources
                .values()
                .any(|r| r.id == id && matches!(r.spec, ResourceSpec::Path { .. }))
    }
}

/// Where and how the state is persisted.
#[derive(Debug)]
struct StateStore {
    path: PathBuf,
    _lock: StateLock,
}

/// In-process platform.
///
/// Thread-safe via internal `Arc<Mutex<...>>` wrapping; clones share state.
#[derive(Debug, Clone)]
pub struct MemoryPlatform {
    inner: Arc<Mutex<PlatformState>>,
    store: Option<Arc<StateStore>>,
    region: String,
}

impl MemoryPlatform {
    /// Create an empty, unpersisted platform.
    pub fn new(region: impl Into<String>) -> Self {
        Self::with_state(region, PlatformState::default())
    }

    /// Create an unpersisted platform seeded with `state`.
    pub fn with_state(region: impl Into<String>, state: PlatformState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
            store: None,
            region: region.into(),
        }
    }

    /// Open a persisted platform at `path`, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Unavailable` if the state is locked by another
    /// process or cannot be read or parsed.
    pub fn open(path: &Path, region: impl Into<String>) -> Result<Self, PlatformError> {
        let lock = StateLock::acquire(path).map_err(|e| PlatformError::Unavailable(e.to_string()))?;

        let state = if path.exists() {
            let contents = fs::read_to_string(path).map_err(|e| {
                PlatformError::Unavailable(format!("cannot read {}: {}", path.display(), e))
            })?;
            serde_json::from_str(&contents).map_err(|e| {
                PlatformError::Unavailable(format!("cannot parse {}: {}", path.display(), e))
            })?
        } else {
            PlatformState::default()
        };

        Ok(Self {
            inner: Arc::new(Mutex::new(state)),
            store: Some(Arc::new(StateStore {
                path: path.to_path_buf(),
                _lock: lock,
            })),
            region: region.into(),
        })
    }

    /// The region ARNs and URLs are minted for.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Copy of the current state (for inspection and tests).
    pub fn snapshot(&self) -> Result<PlatformState, PlatformError> {
        self.read(|state| Ok(state.clone()))
    }

    fn read<R>(
        &self,
        f: impl FnOnce(&PlatformState) -> Result<R, PlatformError>,
    ) -> Result<R, PlatformError> {
        let state = self
            .inner
            .lock()
            .map_err(|_| PlatformError::Unavailable("platform state poisoned".into()))?;
        f(&state)
    }

    /// Apply a mutation and persist the result.
    ///
    /// The state is only persisted when `f` succeeds.
    fn write<R>(
        &self,
        f: impl FnOnce(&mut PlatformState) -> Result<R, PlatformError>,
    ) -> Result<R, PlatformError> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| PlatformError::Unavailable("platform state poisoned".into()))?;
        let result = f(&mut state)?;
        if let Some(store) = &self.store {
            persist(&store.path, &state)?;
        }
        Ok(result)
    }

    fn function_arn(&self, name: &str) -> String {
        format!(
            "arn:aws:lambda:{}:{}:function:{}",
            self.region, LOCAL_ACCOUNT, name
        )
    }

    fn alias_view(&self, record: &FunctionRecord, name: &BranchName, version: &VersionId) -> Alias {
        let arn = format!("{}:{}", record.arn, name);
        Alias {
            name: name.clone(),
            function_name: record.config.name.clone(),
            bound_version: version.clone(),
            invoke_arn: format!(
                "arn:aws:apigateway:{}:lambda:path/2015-03-31/functions/{}/invocations",
                self.region, arn
            ),
            arn,
        }
    }
}

fn persist(path: &Path, state: &PlatformState) -> Result<(), PlatformError> {
    let content = serde_json::to_string_pretty(state)
        .map_err(|e| PlatformError::Unavailable(format!("cannot encode state: {}", e)))?;
    fs::write(path, content).map_err(|e| {
        PlatformError::Unavailable(format!("cannot write {}: {}", path.display(), e))
    })
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..10].to_string()
}

fn function_mut<'a>(
    state: &'a mut PlatformState,
    name: &str,
) -> Result<&'a mut FunctionRecord, PlatformError> {
    state
        .functions
        .get_mut(name)
        .ok_or_else(|| PlatformError::NotFound(format!("function '{}'", name)))
}

fn api_mut<'a>(state: &'a mut PlatformState, api_id: &str) -> Result<&'a mut ApiRecord, PlatformError> {
    state
        .apis
        .get_mut(api_id)
        .ok_or_else(|| PlatformError::NotFound(format!("rest api '{}'", api_id)))
}

fn api_ref<'a>(state: &'a PlatformState, api_id: &str) -> Result<&'a ApiRecord, PlatformError> {
    state
        .apis
        .get(api_id)
        .ok_or_else(|| PlatformError::NotFound(format!("rest api '{}'", api_id)))
}

#[async_trait]
impl FunctionApi for MemoryPlatform {
    fn name(&self) -> &'static str {
        if self.store.is_some() {
            "local"
        } else {
            "memory"
        }
    }

    async fn get_function(&self, function_name: &str) -> Result<Option<FunctionInfo>, PlatformError> {
        self.read(|state| {
            Ok(state.functions.get(function_name).map(|record| FunctionInfo {
                name: function_name.to_string(),
                arn: record.arn.clone(),
                config: record.config.clone(),
                latest_version: record.latest().cloned(),
            }))
        })
    }

    async fn publish_version(
        &self,
        config: &FunctionConfig,
        code_digest: &CodeDigest,
    ) -> Result<FunctionVersion, PlatformError> {
        let arn = self.function_arn(&config.name);
        self.write(|state| {
            let record = state
                .functions
                .entry(config.name.clone())
                .or_insert_with(|| FunctionRecord {
                    arn,
                    config: config.clone(),
                    versions: Vec::new(),
                    aliases: BTreeMap::new(),
                    permissions: BTreeMap::new(),
                });
            record.config = config.clone();

            if let Some(latest) = record.latest() {
                if &latest.code_digest == code_digest {
                    return Ok(latest.clone());
                }
            }

            let next = record.versions.len() + 1;
            let version = FunctionVersion {
                id: VersionId::new(next.to_string())
                    .map_err(|e| PlatformError::InvalidRequest(e.to_string()))?,
                code_digest: code_digest.clone(),
            };
            record.versions.push(version.clone());
            Ok(version)
        })
    }

    async fn get_alias(
        &self,
        function_name: &str,
        alias: &BranchName,
    ) -> Result<Option<Alias>, PlatformError> {
        self.read(|state| {
            let Some(record) = state.functions.get(function_name) else {
                return Ok(None);
            };
            Ok(record
                .aliases
                .get(alias)
                .map(|version| self.alias_view(record, alias, version)))
        })
    }

    async fn put_alias(
        &self,
        function_name: &str,
        alias: &BranchName,
        version: &VersionId,
    ) -> Result<Alias, PlatformError> {
        self.write(|state| {
            let record = function_mut(state, function_name)?;
            if !record.versions.iter().any(|v| &v.id == version) {
                return Err(PlatformError::NotFound(format!(
                    "version {} of function '{}'",
                    version, function_name
                )));
            }
            record.aliases.insert(alias.clone(), version.clone());
            Ok(self.alias_view(record, alias, version))
        })
    }

    async fn put_permission(&self, request: &PermissionRequest) -> Result<(), PlatformError> {
        self.write(|state| {
            let record = function_mut(state, &request.function_name)?;
            if !record.aliases.contains_key(&request.qualifier) {
                return Err(PlatformError::NotFound(format!(
                    "alias '{}' of function '{}'",
                    request.qualifier, request.function_name
                )));
            }
            record
                .permissions
                .insert(request.statement_id.clone(), request.clone());
            Ok(())
        })
    }

    async fn remove_permission(
        &self,
        function_name: &str,
        statement_id: &str,
    ) -> Result<(), PlatformError> {
        self.write(|state| {
            let record = function_mut(state, function_name)?;
            record
                .permissions
                .remove(statement_id)
                .map(|_| ())
                .ok_or_else(|| PlatformError::NotFound(format!("permission '{}'", statement_id)))
        })
    }
}

#[async_trait]
impl GatewayApi for MemoryPlatform {
    fn name(&self) -> &'static str {
        FunctionApi::name(self)
    }

    async fn ensure_rest_api(
        &self,
        name: &str,
        _description: &str,
    ) -> Result<RestApi, PlatformError> {
        let region = self.region.clone();
        self.write(|state| {
            if let Some(existing) = state.apis.values().find(|a| a.api.name == name) {
                return Ok(existing.api.clone());
            }
            let id = short_id();
            let api = RestApi {
                execution_arn: format!("arn:aws:execute-api:{}:{}:{}", region, LOCAL_ACCOUNT, id),
                root_resource_id: short_id(),
                name: name.to_string(),
                id: id.clone(),
            };
            state.apis.insert(
                id,
                ApiRecord {
                    api: api.clone(),
                    resources: BTreeMap::new(),
                    deployments: Vec::new(),
                    stages: BTreeMap::new(),
                },
            );
            Ok(api)
        })
    }

    async fn find_rest_api(&self, name: &str) -> Result<Option<RestApi>, PlatformError> {
        self.read(|state| {
            Ok(state
                .apis
                .values()
                .find(|a| a.api.name == name)
                .map(|a| a.api.clone()))
        })
    }

    async fn put_resource(
        &self,
        api_id: &str,
        name: &str,
        owner: Option<&BranchName>,
        spec: ResourceSpec,
    ) -> Result<GatewayResource, PlatformError> {
        self.write(|state| {
            let record = api_mut(state, api_id)?;

            if !record.has_path_node(spec.anchor_id()) {
                return Err(PlatformError::NotFound(format!(
                    "path node '{}' for resource '{}'",
                    spec.anchor_id(),
                    name
                )));
            }

            let slot = spec.slot();
            if let Some(other) = record
                .resources
                .values()
                .find(|r| r.name != name && r.spec.slot() == slot)
            {
                return Err(PlatformError::Conflict(format!(
                    "'{}' occupies the slot requested by '{}'",
                    other.name, name
                )));
            }

            let id = match record.resources.get(name) {
                Some(existing) if existing.owner.as_ref() != owner => {
                    return Err(PlatformError::Conflict(format!(
                        "resource '{}' is owned by {}",
                        name,
                        existing
                            .owner
                            .as_ref()
                            .map(|b| format!("branch '{}'", b))
                            .unwrap_or_else(|| "the shared scaffolding".to_string())
                    )));
                }
                Some(existing) => existing.id.clone(),
                None => short_id(),
            };

            let resource = GatewayResource {
                name: name.to_string(),
                id,
                owner: owner.cloned(),
                spec,
            };
            record.resources.insert(name.to_string(), resource.clone());
            Ok(resource)
        })
    }

    async fn list_resources(&self, api_id: &str) -> Result<Vec<GatewayResource>, PlatformError> {
        self.read(|state| Ok(api_ref(state, api_id)?.resources.values().cloned().collect()))
    }

    async fn delete_resource(&self, api_id: &str, name: &str) -> Result<(), PlatformError> {
        self.write(|state| {
            let record = api_mut(state, api_id)?;
            let target = record
                .resources
                .get(name)
                .ok_or_else(|| PlatformError::NotFound(format!("resource '{}'", name)))?;

            if matches!(target.spec, ResourceSpec::Path { .. }) {
                if let Some(child) = record
                    .resources
                    .values()
                    .find(|r| r.spec.anchor_id() == target.id)
                {
                    return Err(PlatformError::Conflict(format!(
                        "'{}' still hangs off '{}'",
                        child.name, name
                    )));
                }
            }

            record.resources.remove(name);
            Ok(())
        })
    }

    async fn create_deployment(
        &self,
        api_id: &str,
        request: DeploymentRequest,
    ) -> Result<Deployment, PlatformError> {
        self.write(|state| {
            // A dependency is either a gateway resource or an invoke permission.
            let record = api_ref(state, api_id)?;
            if let Some(missing) = request.depends_on.iter().find(|name| {
                !record.resources.contains_key(name.as_str())
                    && !state
                        .functions
                        .values()
                        .any(|f| f.permissions.contains_key(name.as_str()))
            }) {
                return Err(PlatformError::NotFound(format!(
                    "deployment dependency '{}'",
                    missing
                )));
            }

            let record = api_mut(state, api_id)?;
            let deployment = Deployment {
                id: short_id(),
                api_id: api_id.to_string(),
                description: request.description,
                trigger: request.trigger,
                function_version: request.function_version,
                depends_on: request.depends_on,
                created_at: Utc::now(),
            };
            record.deployments.push(deployment.clone());
            Ok(deployment)
        })
    }

    async fn get_deployment(
        &self,
        api_id: &str,
        deployment_id: &str,
    ) -> Result<Option<Deployment>, PlatformError> {
        self.read(|state| {
            Ok(api_ref(state, api_id)?
                .deployments
                .iter()
                .find(|d| d.id == deployment_id)
                .cloned())
        })
    }

    async fn get_stage(&self, api_id: &str, stage: &str) -> Result<Option<Stage>, PlatformError> {
        self.read(|state| Ok(api_ref(state, api_id)?.stages.get(stage).cloned()))
    }

    async fn put_stage(&self, api_id: &str, request: StageRequest) -> Result<Stage, PlatformError> {
        self.write(|state| {
            let record = api_mut(state, api_id)?;
            if !record
                .deployments
                .iter()
                .any(|d| d.id == request.deployment_id)
            {
                return Err(PlatformError::NotFound(format!(
                    "deployment '{}'",
                    request.deployment_id
                )));
            }
            let stage = Stage {
                name: request.name,
                deployment_id: request.deployment_id,
                variables: request.variables,
            };
            record.stages.insert(stage.name.clone(), stage.clone());
            Ok(stage)
        })
    }

    async fn ensure_api_key(&self, name: &str) -> Result<ApiKey, PlatformError> {
        self.write(|state| {
            let key = state
                .api_keys
                .entry(name.to_string())
                .or_insert_with(|| ApiKey {
                    id: short_id(),
                    name: name.to_string(),
                    value: uuid::Uuid::new_v4().simple().to_string(),
                    enabled: true,
                });
            Ok(key.clone())
        })
    }

    async fn find_api_key(&self, name: &str) -> Result<Option<ApiKey>, PlatformError> {
        self.read(|state| Ok(state.api_keys.get(name).cloned()))
    }

    async fn put_usage_plan(&self, request: UsagePlanRequest) -> Result<UsagePlan, PlatformError> {
        self.write(|state| {
            let record = api_ref(state, &request.api_id)?;
            if !record.stages.contains_key(&request.stage) {
                return Err(PlatformError::NotFound(format!("stage '{}'", request.stage)));
            }
            if !state.api_keys.values().any(|k| k.id == request.api_key_id) {
                return Err(PlatformError::NotFound(format!(
                    "api key '{}'",
                    request.api_key_id
                )));
            }

            let id = state
                .usage_plans
                .get(&request.name)
                .map(|p| p.id.clone())
                .unwrap_or_else(short_id);
            let plan = UsagePlan {
                id,
                name: request.name.clone(),
                description: request.description,
                api_stages: vec![(request.api_id, request.stage)],
                quota_limit: request.quota_limit,
                quota_period: request.quota_period,
                burst_limit: request.burst_limit,
                rate_limit: request.rate_limit,
                api_key_ids: vec![request.api_key_id],
            };
            state.usage_plans.insert(request.name, plan.clone());
            Ok(plan)
        })
    }
}
