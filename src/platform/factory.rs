//! platform::factory
//!
//! Provider selection and creation.
//!
//! Commands obtain platform handles through [`create_platform`] rather than
//! constructing a specific provider.

use std::path::Path;
use std::sync::Arc;

use super::memory::MemoryPlatform;
use super::traits::{FunctionApi, GatewayApi, PlatformError};

/// Supported platform providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformProvider {
    /// In-memory state persisted to a local JSON file.
    Local,
    /// In-memory state discarded at exit.
    Memory,
}

impl PlatformProvider {
    /// Parse a provider name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "local" => Some(PlatformProvider::Local),
            "memory" => Some(PlatformProvider::Memory),
            _ => None,
        }
    }

    /// The provider's config name.
    pub fn name(&self) -> &'static str {
        match self {
            PlatformProvider::Local => "local",
            PlatformProvider::Memory => "memory",
        }
    }
}

/// Names accepted in `[platform] provider`.
pub fn valid_provider_names() -> &'static [&'static str] {
    &["local", "memory"]
}

/// Both platform handles of one process.
#[derive(Clone)]
pub struct Platform {
    pub functions: Arc<dyn FunctionApi>,
    pub gateway: Arc<dyn GatewayApi>,
}

impl Platform {
    /// Bundle one value implementing both APIs.
    pub fn from_shared<P>(platform: P) -> Self
    where
        P: FunctionApi + GatewayApi + 'static,
    {
        let shared = Arc::new(platform);
        Self {
            functions: shared.clone(),
            gateway: shared,
        }
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("functions", &self.functions.name())
            .field("gateway", &self.gateway.name())
            .finish()
    }
}

/// Create the configured platform.
///
/// # Errors
///
/// - `InvalidRequest` for an unknown provider name
/// - `Unavailable` if local state is locked or unreadable
pub fn create_platform(
    provider: &str,
    state_path: &Path,
    region: &str,
) -> Result<Platform, PlatformError> {
    match PlatformProvider::from_name(provider) {
        Some(PlatformProvider::Local) => {
            Ok(Platform::from_shared(MemoryPlatform::open(state_path, region)?))
        }
        Some(PlatformProvider::Memory) => Ok(Platform::from_shared(MemoryPlatform::new(region))),
        None => Err(PlatformError::InvalidRequest(format!(
            "unknown platform provider '{}', must be one of: {}",
            provider,
            valid_provider_names().join(", ")
        ))),
    }
}
