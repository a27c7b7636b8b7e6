//! platform::traits
//!
//! The two external collaborator seams of a convergence pass.
//!
//! # Design
//!
//! [`FunctionApi`] covers the serverless function side (versions, aliases,
//! invoke permissions). [`GatewayApi`] covers the REST gateway side
//! (resource tree, methods, deployments, stages, usage plans).
//!
//! Both traits are async because real providers are network services, and
//! both follow apply-by-name semantics: writing a named resource that already
//! exists with the same owner updates it in place, so repeating a write is a
//! no-op at the data-model level.
//!
//! # Example
//!
//! ```ignore
//! use branchroute::platform::{FunctionApi, PlatformError};
//! use branchroute::core::types::BranchName;
//!
//! async fn show(functions: &dyn FunctionApi) -> Result<(), PlatformError> {
//!     let main = BranchName::new("main").unwrap();
//!     if let Some(alias) = functions.get_alias("email-api-dev", &main).await? {
//!         println!("main -> {}", alias.bound_version);
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::config::QuotaPeriod;
use crate::core::types::{BranchName, CodeDigest, Fingerprint, VersionId};

/// Errors from platform operations.
///
/// These map to the common failure modes of cloud control-plane APIs.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum PlatformError {
    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A write would collide with a different existing resource.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request was rejected as invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Request rate exceeded.
    #[error("throttled")]
    Throttled,

    /// API returned an error.
    #[error("API error: {status} - {message}")]
    ApiError {
        /// Status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// The provider could not be reached or its state could not be loaded.
    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// Function side
// ============================================================================

/// Settings the function is created or updated with on publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub name: String,
    pub runtime: String,
    pub handler: String,
    pub memory_mb: u32,
    pub timeout_secs: u32,
    pub environment: BTreeMap<String, String>,
}

/// An immutable published function version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionVersion {
    /// Provider-assigned id
    pub id: VersionId,
    /// Digest of the artifact this version was published from
    pub code_digest: CodeDigest,
}

/// Function metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub arn: String,
    pub config: FunctionConfig,
    /// Newest published version, if any
    pub latest_version: Option<FunctionVersion>,
}

/// A named, mutable pointer to one published version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub name: BranchName,
    pub function_name: String,
    pub bound_version: VersionId,
    pub arn: String,
    /// Address the gateway integrates with to invoke this alias
    pub invoke_arn: String,
}

/// An invoke permission granted on a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Unique statement id (apply-by-name key)
    pub statement_id: String,
    pub function_name: String,
    pub action: String,
    pub principal: String,
    /// Alias the grant is scoped to
    pub qualifier: BranchName,
    pub source_arn: String,
}

/// The function-side platform API.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; a pass calls them from several
/// tasks at once.
#[async_trait]
pub trait FunctionApi: Send + Sync {
    /// Provider name (e.g. "local", "memory", "mock").
    fn name(&self) -> &'static str;

    /// Read a function and its newest published version.
    ///
    /// Returns `None` if the function has never been created.
    async fn get_function(&self, function_name: &str) -> Result<Option<FunctionInfo>, PlatformError>;

    /// Publish an artifact as a new immutable version.
    ///
    /// Creates the function on first publish. If `code_digest` equals the
    /// newest version's digest, that version is returned and no new version
    /// is created.
    async fn publish_version(
        &self,
        config: &FunctionConfig,
        code_digest: &CodeDigest,
    ) -> Result<FunctionVersion, PlatformError>;

    /// Read the alias named `alias`.
    ///
    /// Returns `None` if the alias does not exist yet.
    async fn get_alias(
        &self,
        function_name: &str,
        alias: &BranchName,
    ) -> Result<Option<Alias>, PlatformError>;

    /// Create the alias or rebind it to `version`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the function or the version does not exist
    async fn put_alias(
        &self,
        function_name: &str,
        alias: &BranchName,
        version: &VersionId,
    ) -> Result<Alias, PlatformError>;

    /// Grant (or re-grant) an invoke permission.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the function or the qualifier alias does not exist
    async fn put_permission(&self, request: &PermissionRequest) -> Result<(), PlatformError>;

    /// Revoke an invoke permission by statement id.
    async fn remove_permission(
        &self,
        function_name: &str,
        statement_id: &str,
    ) -> Result<(), PlatformError>;
}

// ============================================================================
// Gateway side
// ============================================================================

/// A REST API object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestApi {
    pub id: String,
    pub name: String,
    pub root_resource_id: String,
    pub execution_arn: String,
}

/// HTTP methods the routing layer provisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Options,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Options => write!(f, "OPTIONS"),
        }
    }
}

/// How a method is wired to its backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Integration {
    /// Proxy the request unchanged to a function invoke address.
    AwsProxy { uri: String },
    /// Answer from the gateway itself.
    Mock { request_template: String },
}

/// The shape of a named gateway resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    /// A path node under `parent_id`.
    Path { parent_id: String, path_part: String },
    /// A method on a path node.
    Method {
        resource_id: String,
        http_method: HttpMethod,
        api_key_required: bool,
    },
    /// The integration behind a method.
    Integration {
        resource_id: String,
        http_method: HttpMethod,
        integration: Integration,
    },
    /// A response descriptor declaring which headers a method may return.
    MethodResponse {
        resource_id: String,
        http_method: HttpMethod,
        status_code: u16,
        headers: Vec<String>,
    },
    /// Static header values an integration maps into a method response.
    IntegrationResponse {
        resource_id: String,
        http_method: HttpMethod,
        status_code: u16,
        headers: BTreeMap<String, String>,
    },
}

impl ResourceSpec {
    /// The path node this resource hangs off (its parent for `Path`).
    pub fn anchor_id(&self) -> &str {
        match self {
            ResourceSpec::Path { parent_id, .. } => parent_id,
            ResourceSpec::Method { resource_id, .. }
            | ResourceSpec::Integration { resource_id, .. }
            | ResourceSpec::MethodResponse { resource_id, .. }
            | ResourceSpec::IntegrationResponse { resource_id, .. } => resource_id,
        }
    }

    /// Short kind name for display.
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceSpec::Path { .. } => "path",
            ResourceSpec::Method { .. } => "method",
            ResourceSpec::Integration { .. } => "integration",
            ResourceSpec::MethodResponse { .. } => "method-response",
            ResourceSpec::IntegrationResponse { .. } => "integration-response",
        }
    }

    /// Key identifying the slot this spec occupies; two differently named
    /// resources may not share a slot.
    pub fn slot(&self) -> String {
        match self {
            ResourceSpec::Path {
                parent_id,
                path_part,
            } => format!("path:{parent_id}/{path_part}"),
            ResourceSpec::Method {
                resource_id,
                http_method,
                ..
            } => format!("method:{resource_id}:{http_method}"),
            ResourceSpec::Integration {
                resource_id,
                http_method,
                ..
            } => format!("integration:{resource_id}:{http_method}"),
            ResourceSpec::MethodResponse {
                resource_id,
                http_method,
                status_code,
                ..
            } => format!("method-response:{resource_id}:{http_method}:{status_code}"),
            ResourceSpec::IntegrationResponse {
                resource_id,
                http_method,
                status_code,
                ..
            } => format!("integration-response:{resource_id}:{http_method}:{status_code}"),
        }
    }
}

/// A named gateway resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResource {
    /// Apply-by-name key
    pub name: String,
    /// Provider-assigned id
    pub id: String,
    /// Branch that owns this resource; `None` for shared scaffolding
    pub owner: Option<BranchName>,
    pub spec: ResourceSpec,
}

/// Request to snapshot the API into a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRequest {
    pub description: String,
    pub trigger: Fingerprint,
    pub function_version: VersionId,
    /// Names of every resource that must exist before the snapshot
    pub depends_on: Vec<String>,
}

/// An immutable deployment snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub api_id: String,
    pub description: String,
    pub trigger: Fingerprint,
    pub function_version: VersionId,
    pub depends_on: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Request to create or repoint a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRequest {
    pub name: String,
    pub deployment_id: String,
    pub variables: BTreeMap<String, String>,
}

/// The long-lived pointer to the current deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub deployment_id: String,
    pub variables: BTreeMap<String, String>,
}

/// An API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub name: String,
    pub value: String,
    pub enabled: bool,
}

/// Request to create or update a usage plan.
#[derive(Debug, Clone, PartialEq)]
pub struct UsagePlanRequest {
    pub name: String,
    pub description: String,
    pub api_id: String,
    pub stage: String,
    pub quota_limit: u32,
    pub quota_period: QuotaPeriod,
    pub burst_limit: u32,
    pub rate_limit: f64,
    pub api_key_id: String,
}

/// A quota/throttle policy bound to API stages and keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsagePlan {
    pub id: String,
    pub name: String,
    pub description: String,
    /// `(api_id, stage)` pairs
    pub api_stages: Vec<(String, String)>,
    pub quota_limit: u32,
    pub quota_period: QuotaPeriod,
    pub burst_limit: u32,
    pub rate_limit: f64,
    pub api_key_ids: Vec<String>,
}

/// The gateway-side platform API.
#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// Provider name.
    fn name(&self) -> &'static str;

    /// Find the REST API named `name`, creating it if absent.
    async fn ensure_rest_api(&self, name: &str, description: &str)
        -> Result<RestApi, PlatformError>;

    /// Find an existing REST API by name.
    async fn find_rest_api(&self, name: &str) -> Result<Option<RestApi>, PlatformError>;

    /// Create or update a named resource.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the anchor path node does not exist
    /// - `Conflict` if the name is owned by another branch, or another name
    ///   already occupies the same slot
    async fn put_resource(
        &self,
        api_id: &str,
        name: &str,
        owner: Option<&BranchName>,
        spec: ResourceSpec,
    ) -> Result<GatewayResource, PlatformError>;

    /// List all named resources of an API.
    async fn list_resources(&self, api_id: &str) -> Result<Vec<GatewayResource>, PlatformError>;

    /// Delete a named resource.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no such resource exists
    /// - `Conflict` if other resources still hang off it
    async fn delete_resource(&self, api_id: &str, name: &str) -> Result<(), PlatformError>;

    /// Snapshot the API.
    ///
    /// # Errors
    ///
    /// - `NotFound` if any `depends_on` resource is missing
    async fn create_deployment(
        &self,
        api_id: &str,
        request: DeploymentRequest,
    ) -> Result<Deployment, PlatformError>;

    /// Read a deployment.
    async fn get_deployment(
        &self,
        api_id: &str,
        deployment_id: &str,
    ) -> Result<Option<Deployment>, PlatformError>;

    /// Read a stage.
    async fn get_stage(&self, api_id: &str, stage: &str) -> Result<Option<Stage>, PlatformError>;

    /// Create or repoint a stage.
    async fn put_stage(&self, api_id: &str, request: StageRequest) -> Result<Stage, PlatformError>;

    /// Find the API key named `name`, creating it if absent.
    async fn ensure_api_key(&self, name: &str) -> Result<ApiKey, PlatformError>;

    /// Find an existing API key by name.
    async fn find_api_key(&self, name: &str) -> Result<Option<ApiKey>, PlatformError>;

    /// Create or update a usage plan and associate the key with it.
    async fn put_usage_plan(&self, request: UsagePlanRequest) -> Result<UsagePlan, PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_method_display() {
        assert_eq!(HttpMethod::Post.to_string(), "POST");
        assert_eq!(HttpMethod::Options.to_string(), "OPTIONS");
    }

    #[test]
    fn slot_distinguishes_methods() {
        let post = ResourceSpec::Method {
            resource_id: "r1".into(),
            http_method: HttpMethod::Post,
            api_key_required: true,
        };
        let options = ResourceSpec::Method {
            resource_id: "r1".into(),
            http_method: HttpMethod::Options,
            api_key_required: false,
        };
        assert_ne!(post.slot(), options.slot());
        assert_eq!(post.anchor_id(), "r1");
    }

    #[test]
    fn path_slot_uses_parent_and_part() {
        let spec = ResourceSpec::Path {
            parent_id: "root".into(),
            path_part: "v1".into(),
        };
        assert_eq!(spec.slot(), "path:root/v1");
        assert_eq!(spec.kind(), "path");
    }

    #[test]
    fn error_display() {
        let err = PlatformError::ApiError {
            status: 429,
            message: "slow down".into(),
        };
        assert_eq!(err.to_string(), "API error: 429 - slow down");
    }
}
