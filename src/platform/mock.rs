//! platform::mock
//!
//! Mock platform for deterministic testing.
//!
//! # Design
//!
//! `MockPlatform` delegates to an unpersisted [`MemoryPlatform`] and adds two
//! things tests need: failure injection (optionally scoped to one subject,
//! such as a single branch's alias) and a log of every call made.
//!
//! # Example
//!
//! ```
//! use branchroute::platform::mock::{FailOn, MockPlatform, Op};
//! use branchroute::platform::{FunctionApi, PlatformError};
//! use branchroute::core::types::BranchName;
//!
//! # tokio_test::block_on(async {
//! let platform = MockPlatform::new("us-east-1")
//!     .fail_on(FailOn::new(Op::GetAlias, PlatformError::Throttled).for_subject("beta"));
//!
//! let beta = BranchName::new("beta").unwrap();
//! let main = BranchName::new("main").unwrap();
//! assert!(platform.get_alias("f", &beta).await.is_err());
//! assert!(platform.get_alias("f", &main).await.unwrap().is_none());
//! assert_eq!(platform.count(Op::GetAlias), 2);
//! # });
//! ```

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::memory::{MemoryPlatform, PlatformState};
use super::traits::{
    Alias, ApiKey, Deployment, DeploymentRequest, FunctionApi, FunctionConfig, FunctionInfo,
    FunctionVersion, GatewayApi, GatewayResource, PermissionRequest, PlatformError,
    ResourceSpec, RestApi, Stage, StageRequest, UsagePlan, UsagePlanRequest,
};
use crate::core::types::{BranchName, CodeDigest, VersionId};

/// Platform operations, for failure injection and call recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    GetFunction,
    PublishVersion,
    GetAlias,
    PutAlias,
    PutPermission,
    RemovePermission,
    EnsureRestApi,
    FindRestApi,
    PutResource,
    ListResources,
    DeleteResource,
    CreateDeployment,
    GetDeployment,
    GetStage,
    PutStage,
    EnsureApiKey,
    FindApiKey,
    PutUsagePlan,
}

/// A failure to inject.
#[derive(Debug, Clone)]
pub struct FailOn {
    op: Op,
    subject: Option<String>,
    error: PlatformError,
}

impl FailOn {
    /// Fail every call of `op` with `error`.
    pub fn new(op: Op, error: PlatformError) -> Self {
        Self {
            op,
            subject: None,
            error,
        }
    }

    /// Only fail calls whose subject (alias, resource or function name)
    /// equals `subject`.
    pub fn for_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    fn matches(&self, op: Op, subject: &str) -> bool {
        self.op == op && self.subject.as_deref().map_or(true, |s| s == subject)
    }
}

/// Recorded call for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockOperation {
    pub op: Op,
    /// Alias, resource, function or stage the call was about
    pub subject: String,
}

#[derive(Debug, Default)]
struct MockInner {
    fail_on: Vec<FailOn>,
    operations: Vec<MockOperation>,
    /// Scheduler yields inside every call
    latency: usize,
    in_flight: usize,
    peak_in_flight: usize,
}

/// Marks one call as in flight until dropped.
struct InFlight(Arc<Mutex<MockInner>>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.0.lock() {
            inner.in_flight -= 1;
        }
    }
}

/// Mock platform for testing.
///
/// Clones share state, failure rules and the call log.
#[derive(Debug, Clone)]
pub struct MockPlatform {
    platform: MemoryPlatform,
    inner: Arc<Mutex<MockInner>>,
}

impl MockPlatform {
    /// Create an empty mock platform.
    pub fn new(region: impl Into<String>) -> Self {
        Self::from_platform(MemoryPlatform::new(region))
    }

    /// Wrap an existing memory platform (shares its state).
    pub fn from_platform(platform: MemoryPlatform) -> Self {
        Self {
            platform,
            inner: Arc::new(Mutex::new(MockInner::default())),
        }
    }

    /// Add a failure rule.
    pub fn fail_on(self, fail_on: FailOn) -> Self {
        self.add_failure(fail_on);
        self
    }

    /// Add a failure rule to a shared handle.
    pub fn add_failure(&self, fail_on: FailOn) {
        self.inner.lock().unwrap().fail_on.push(fail_on);
    }

    /// Yield to the scheduler `yields` times inside every call, so
    /// concurrent callers overlap.
    pub fn with_latency(self, yields: usize) -> Self {
        self.inner.lock().unwrap().latency = yields;
        self
    }

    /// Most calls ever in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.inner.lock().unwrap().peak_in_flight
    }

    /// Clear all failure rules.
    pub fn clear_fail_on(&self) {
        self.inner.lock().unwrap().fail_on.clear();
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<MockOperation> {
        self.inner.lock().unwrap().operations.clone()
    }

    /// Count recorded calls of `op`.
    pub fn count(&self, op: Op) -> usize {
        self.inner
            .lock()
            .unwrap()
            .operations
            .iter()
            .filter(|o| o.op == op)
            .count()
    }

    /// Clear recorded operations.
    pub fn clear_operations(&self) {
        self.inner.lock().unwrap().operations.clear();
    }

    /// Copy of the underlying state.
    pub fn state(&self) -> PlatformState {
        self.platform.snapshot().unwrap()
    }

    /// The wrapped memory platform.
    pub fn platform(&self) -> &MemoryPlatform {
        &self.platform
    }

    /// Record a call and return the injected failure, if any.
    ///
    /// The call counts as in flight until the returned guard drops.
    async fn enter(&self, op: Op, subject: &str) -> Result<InFlight, PlatformError> {
        let latency = {
            let mut inner = self.inner.lock().unwrap();
            inner.operations.push(MockOperation {
                op,
                subject: subject.to_string(),
            });
            if let Some(f) = inner.fail_on.iter().find(|f| f.matches(op, subject)) {
                return Err(f.error.clone());
            }
            inner.in_flight += 1;
            inner.peak_in_flight = inner.peak_in_flight.max(inner.in_flight);
            inner.latency
        };
        let guard = InFlight(Arc::clone(&self.inner));
        for _ in 0..latency {
            tokio::task::yield_now().await;
        }
        Ok(guard)
    }
}

#[async_trait]
impl FunctionApi for MockPlatform {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn get_function(&self, function_name: &str) -> Result<Option<FunctionInfo>, PlatformError> {
        let _call = self.enter(Op::GetFunction, function_name).await?;
        self.platform.get_function(function_name).await
    }

    async fn publish_version(
        &self,
        config: &FunctionConfig,
        code_digest: &CodeDigest,
    ) -> Result<FunctionVersion, PlatformError> {
        let _call = self.enter(Op::PublishVersion, &config.name).await?;
        self.platform.publish_version(config, code_digest).await
    }

    async fn get_alias(
        &self,
        function_name: &str,
        alias: &BranchName,
    ) -> Result<Option<Alias>, PlatformError> {
        let _call = self.enter(Op::GetAlias, alias.as_str()).await?;
        self.platform.get_alias(function_name, alias).await
    }

    async fn put_alias(
        &self,
        function_name: &str,
        alias: &BranchName,
        version: &VersionId,
    ) -> Result<Alias, PlatformError> {
        let _call = self.enter(Op::PutAlias, alias.as_str()).await?;
        self.platform.put_alias(function_name, alias, version).await
    }

    async fn put_permission(&self, request: &PermissionRequest) -> Result<(), PlatformError> {
        let _call = self.enter(Op::PutPermission, &request.statement_id).await?;
        self.platform.put_permission(request).await
    }

    async fn remove_permission(
        &self,
        function_name: &str,
        statement_id: &str,
    ) -> Result<(), PlatformError> {
        let _call = self.enter(Op::RemovePermission, statement_id).await?;
        self.platform.remove_permission(function_name, statement_id).await
    }
}

#[async_trait]
impl GatewayApi for MockPlatform {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn ensure_rest_api(&self, name: &str, description: &str) -> Result<RestApi, PlatformError> {
        let _call = self.enter(Op::EnsureRestApi, name).await?;
        self.platform.ensure_rest_api(name, description).await
    }

    async fn find_rest_api(&self, name: &str) -> Result<Option<RestApi>, PlatformError> {
        let _call = self.enter(Op::FindRestApi, name).await?;
        self.platform.find_rest_api(name).await
    }

    async fn put_resource(
        &self,
        api_id: &str,
        name: &str,
        owner: Option<&BranchName>,
        spec: ResourceSpec,
    ) -> Result<GatewayResource, PlatformError> {
        let _call = self.enter(Op::PutResource, name).await?;
        self.platform.put_resource(api_id, name, owner, spec).await
    }

    async fn list_resources(&self, api_id: &str) -> Result<Vec<GatewayResource>, PlatformError> {
        let _call = self.enter(Op::ListResources, api_id).await?;
        self.platform.list_resources(api_id).await
    }

    async fn delete_resource(&self, api_id: &str, name: &str) -> Result<(), PlatformError> {
        let _call = self.enter(Op::DeleteResource, name).await?;
        self.platform.delete_resource(api_id, name).await
    }

    async fn create_deployment(
        &self,
        api_id: &str,
        request: DeploymentRequest,
    ) -> Result<Deployment, PlatformError> {
        let _call = self.enter(Op::CreateDeployment, api_id).await?;
        self.platform.create_deployment(api_id, request).await
    }

    async fn get_deployment(
        &self,
        api_id: &str,
        deployment_id: &str,
    ) -> Result<Option<Deployment>, PlatformError> {
        let _call = self.enter(Op::GetDeployment, deployment_id).await?;
        self.platform.get_deployment(api_id, deployment_id).await
    }

    async fn get_stage(&self, api_id: &str, stage: &str) -> Result<Option<Stage>, PlatformError> {
        let _call = self.enter(Op::GetStage, stage).await?;
        self.platform.get_stage(api_id, stage).await
    }

    async fn put_stage(&self, api_id: &str, request: StageRequest) -> Result<Stage, PlatformError> {
        let _call = self.enter(Op::PutStage, &request.name).await?;
        self.platform.put_stage(api_id, request).await
    }

    async fn ensure_api_key(&self, name: &str) -> Result<ApiKey, PlatformError> {
        let _call = self.enter(Op::EnsureApiKey, name).await?;
        self.platform.ensure_api_key(name).await
    }

    async fn find_api_key(&self, name: &str) -> Result<Option<ApiKey>, PlatformError> {
        let _call = self.enter(Op::FindApiKey, name).await?;
        self.platform.find_api_key(name).await
    }

    async fn put_usage_plan(&self, request: UsagePlanRequest) -> Result<UsagePlan, PlatformError> {
        let _call = self.enter(Op::PutUsagePlan, &request.name).await?;
        self.platform.put_usage_plan(request).await
    }
}
