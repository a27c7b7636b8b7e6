//! engine::resolve
//!
//! Version resolution: capture every branch's currently bound version before
//! the pass writes anything.
//!
//! # Invariants
//!
//! - The result holds exactly one entry per requested branch
//! - A failed or empty lookup becomes [`ResolvedVersion::Sentinel`] for that
//!   branch only; platform errors are logged, never returned
//! - Lookups for different branches run concurrently, bounded by a semaphore
//!
//! The snapshot must be taken before a new function version is published:
//! the platform keeps no history beyond the live alias pointer.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::core::types::{BranchName, ResolvedVersion};
use crate::platform::FunctionApi;

/// Snapshot of prior bindings, keyed by branch.
pub type ResolvedMap = BTreeMap<BranchName, ResolvedVersion>;

/// Reads each branch's alias binding.
#[derive(Clone)]
pub struct VersionResolver {
    functions: Arc<dyn FunctionApi>,
    max_concurrency: usize,
}

impl VersionResolver {
    pub fn new(functions: Arc<dyn FunctionApi>, max_concurrency: usize) -> Self {
        Self {
            functions,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Resolve the version bound to each branch's alias.
    ///
    /// Never fails; see the module invariants.
    pub async fn resolve(&self, function_name: &str, branches: &[BranchName]) -> ResolvedMap {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();

        for branch in branches {
            let functions = Arc::clone(&self.functions);
            let semaphore = Arc::clone(&semaphore);
            let function_name = function_name.to_string();
            let branch = branch.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let resolved = match functions.get_alias(&function_name, &branch).await {
                    Ok(Some(alias)) => ResolvedVersion::Pinned(alias.bound_version),
                    Ok(None) => {
                        debug!(branch = %branch, "no alias yet");
                        ResolvedVersion::Sentinel
                    }
                    Err(e) => {
                        warn!(branch = %branch, error = %e, "version lookup failed, using sentinel");
                        ResolvedVersion::Sentinel
                    }
                };
                (branch, resolved)
            });
        }

        let mut resolved = ResolvedMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((branch, version)) => {
                    resolved.insert(branch, version);
                }
                Err(e) => warn!(error = %e, "version lookup task aborted"),
            }
        }

        // An aborted task leaves its branch out; it still gets an entry.
        for branch in branches {
            resolved.entry(branch.clone()).or_insert_with(|| {
                warn!(branch = %branch, "no resolution recorded, using sentinel");
                ResolvedVersion::Sentinel
            });
        }

        debug!(count = resolved.len(), "resolved branch versions");
        resolved
    }
}
