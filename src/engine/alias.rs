//! engine::alias
//!
//! Alias binding policy and writes.
//!
//! # Policy
//!
//! - The current branch is bound to the newest version of this pass
//! - Every other branch is bound to the version captured by resolution,
//!   leaving its behavior untouched
//! - A non-current branch that resolved to the sentinel cannot be bound
//!
//! Rebinding to the same version is a no-op at the data-model level, so the
//! alias is written on every pass.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::resolve::ResolvedMap;
use crate::core::types::{BranchName, ResolvedVersion, VersionId};
use crate::platform::{Alias, FunctionApi, PlatformError};

/// Errors from binding one branch's alias.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AliasError {
    #[error(
        "branch '{0}' never deployed, promote it once as current before introducing it as a stable branch"
    )]
    NeverDeployed(BranchName),

    #[error("binding alias '{branch}' failed: {source}")]
    Platform {
        branch: BranchName,
        source: PlatformError,
    },
}

/// Where a branch's alias should point, before the newest version is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "version", rename_all = "snake_case")]
pub enum AliasTarget {
    /// The version produced by this pass.
    Newest,
    /// The version captured by resolution.
    Pinned(VersionId),
}

impl AliasTarget {
    /// Decide the target for `branch`.
    ///
    /// A branch absent from `resolved` is treated like the sentinel.
    pub fn decide(
        branch: &BranchName,
        current: &BranchName,
        resolved: &ResolvedMap,
    ) -> Result<Self, AliasError> {
        if branch == current {
            return Ok(AliasTarget::Newest);
        }
        match resolved.get(branch) {
            Some(ResolvedVersion::Pinned(version)) => Ok(AliasTarget::Pinned(version.clone())),
            Some(ResolvedVersion::Sentinel) | None => {
                Err(AliasError::NeverDeployed(branch.clone()))
            }
        }
    }

    /// The concrete version, given the newest one.
    pub fn version<'a>(&'a self, newest: &'a VersionId) -> &'a VersionId {
        match self {
            AliasTarget::Newest => newest,
            AliasTarget::Pinned(version) => version,
        }
    }
}

impl std::fmt::Display for AliasTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AliasTarget::Newest => write!(f, "newest"),
            AliasTarget::Pinned(v) => write!(f, "version {}", v),
        }
    }
}

/// Owns alias mutation for one function.
#[derive(Clone)]
pub struct AliasManager {
    functions: Arc<dyn FunctionApi>,
    function_name: String,
}

impl AliasManager {
    pub fn new(functions: Arc<dyn FunctionApi>, function_name: impl Into<String>) -> Self {
        Self {
            functions,
            function_name: function_name.into(),
        }
    }

    /// Bind `branch`'s alias according to the policy.
    ///
    /// # Errors
    ///
    /// - [`AliasError::NeverDeployed`] before any write, for a non-current
    ///   branch without a resolved version
    /// - [`AliasError::Platform`] if the write fails
    pub async fn bind(
        &self,
        branch: &BranchName,
        current: &BranchName,
        newest: &VersionId,
        resolved: &ResolvedMap,
    ) -> Result<Alias, AliasError> {
        let target = AliasTarget::decide(branch, current, resolved)?;
        let version = target.version(newest);
        debug!(branch = %branch, %version, "binding alias");

        self.functions
            .put_alias(&self.function_name, branch, version)
            .await
            .map_err(|source| AliasError::Platform {
                branch: branch.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CodeDigest;
    use crate::platform::mock::{MockPlatform, Op};
    use crate::platform::FunctionConfig;

    fn b(name: &str) -> BranchName {
        BranchName::new(name).unwrap()
    }

    fn v(id: &str) -> VersionId {
        VersionId::new(id).unwrap()
    }

    mod policy {
        use super::*;

        #[test]
        fn current_gets_newest() {
            let resolved = ResolvedMap::from([(b("main"), ResolvedVersion::Sentinel)]);
            assert_eq!(
                AliasTarget::decide(&b("main"), &b("main"), &resolved),
                Ok(AliasTarget::Newest)
            );
        }

        #[test]
        fn other_keeps_resolved() {
            let resolved = ResolvedMap::from([(b("beta"), ResolvedVersion::Pinned(v("3")))]);
            let target = AliasTarget::decide(&b("beta"), &b("main"), &resolved).unwrap();
            assert_eq!(target, AliasTarget::Pinned(v("3")));
            assert_eq!(target.version(&v("9")), &v("3"));
        }

        #[test]
        fn sentinel_for_other_is_never_deployed() {
            let resolved = ResolvedMap::from([(b("beta"), ResolvedVersion::Sentinel)]);
            let err = AliasTarget::decide(&b("beta"), &b("main"), &resolved).unwrap_err();
            assert_eq!(err, AliasError::NeverDeployed(b("beta")));
            assert!(err.to_string().contains("promote it once as current"));
        }

        #[test]
        fn missing_entry_is_never_deployed() {
            let err = AliasTarget::decide(&b("beta"), &b("main"), &ResolvedMap::new()).unwrap_err();
            assert!(matches!(err, AliasError::NeverDeployed(_)));
        }
    }

    mod binding {
        use super::*;

        async fn published(mock: &MockPlatform, count: usize) -> Vec<VersionId> {
            let config = FunctionConfig {
                name: "f".into(),
                runtime: "python3.10".into(),
                handler: "h".into(),
                memory_mb: 128,
                timeout_secs: 3,
                environment: Default::default(),
            };
            let mut ids = Vec::new();
            for i in 0..count {
                let version = mock
                    .publish_version(&config, &CodeDigest::of_bytes(&[i as u8]))
                    .await
                    .unwrap();
                ids.push(version.id);
            }
            ids
        }

        #[tokio::test]
        async fn binds_current_and_pinned() {
            let mock = MockPlatform::new("us-east-1");
            let ids = published(&mock, 2).await;
            let manager = AliasManager::new(Arc::new(mock.clone()), "f");
            let resolved = ResolvedMap::from([
                (b("main"), ResolvedVersion::Sentinel),
                (b("beta"), ResolvedVersion::Pinned(ids[0].clone())),
            ]);

            let main = manager.bind(&b("main"), &b("main"), &ids[1], &resolved).await.unwrap();
            let beta = manager.bind(&b("beta"), &b("main"), &ids[1], &resolved).await.unwrap();

            assert_eq!(main.bound_version, ids[1]);
            assert_eq!(beta.bound_version, ids[0]);
        }

        #[tokio::test]
        async fn rebinding_same_version_is_stable() {
            let mock = MockPlatform::new("us-east-1");
            let ids = published(&mock, 1).await;
            let manager = AliasManager::new(Arc::new(mock.clone()), "f");
            let resolved = ResolvedMap::new();

            let first = manager.bind(&b("main"), &b("main"), &ids[0], &resolved).await.unwrap();
            let second = manager.bind(&b("main"), &b("main"), &ids[0], &resolved).await.unwrap();
            assert_eq!(first, second);
        }

        #[tokio::test]
        async fn never_deployed_writes_nothing() {
            let mock = MockPlatform::new("us-east-1");
            let ids = published(&mock, 1).await;
            let manager = AliasManager::new(Arc::new(mock.clone()), "f");

            let result = manager
                .bind(&b("beta"), &b("main"), &ids[0], &ResolvedMap::new())
                .await;
            assert!(matches!(result, Err(AliasError::NeverDeployed(_))));
            assert_eq!(mock.count(Op::PutAlias), 0);
        }

        #[tokio::test]
        async fn platform_failure_names_branch() {
            let mock = MockPlatform::new("us-east-1");
            let manager = AliasManager::new(Arc::new(mock), "f");
            let err = manager
                .bind(&b("main"), &b("main"), &v("1"), &ResolvedMap::new())
                .await
                .unwrap_err();
            match err {
                AliasError::Platform { branch, source } => {
                    assert_eq!(branch, b("main"));
                    assert!(matches!(source, PlatformError::NotFound(_)));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }
}
