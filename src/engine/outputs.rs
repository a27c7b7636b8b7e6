//! engine::outputs
//!
//! Observable outputs of a pass: the gateway base URL, one endpoint per
//! branch, and the API key value.

use serde::Serialize;

use crate::core::config::DeployConfig;
use crate::core::registry::BranchRegistry;
use crate::core::types::{BranchName, VersionLabel};
use crate::platform::{GatewayApi, PlatformError};

/// One branch's public endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub branch: BranchName,
    pub version_label: VersionLabel,
    pub url: String,
}

/// Everything a caller needs to reach the deployed API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outputs {
    pub base_url: String,
    /// In registry order
    pub endpoints: Vec<Endpoint>,
    pub api_key: String,
}

impl Outputs {
    /// Assemble outputs for a known API id and key value.
    pub fn collect(
        deploy: &DeployConfig,
        registry: &BranchRegistry,
        api_id: &str,
        api_key: &str,
    ) -> Self {
        let base = base_url(api_id, &deploy.region, &deploy.stack);
        let endpoints = registry
            .entries()
            .iter()
            .map(|entry| Endpoint {
                branch: entry.name.clone(),
                version_label: entry.version_label.clone(),
                url: endpoint_url(
                    &base,
                    &deploy.routing.api_prefix,
                    &entry.version_label,
                    &deploy.routing.endpoint,
                ),
            })
            .collect();

        Self {
            base_url: base,
            endpoints,
            api_key: api_key.to_string(),
        }
    }

    /// Read outputs from the platform without writing anything.
    ///
    /// Returns `None` until the API and its key exist.
    pub async fn read(
        deploy: &DeployConfig,
        registry: &BranchRegistry,
        gateway: &dyn GatewayApi,
    ) -> Result<Option<Self>, PlatformError> {
        let Some(api) = gateway.find_rest_api(&deploy.api_name()).await? else {
            return Ok(None);
        };
        let Some(key) = gateway.find_api_key(&deploy.api_key_name()).await? else {
            return Ok(None);
        };
        Ok(Some(Self::collect(deploy, registry, &api.id, &key.value)))
    }
}

/// `https://{api_id}.execute-api.{region}.amazonaws.com/{stage}/`
pub fn base_url(api_id: &str, region: &str, stage: &str) -> String {
    format!("https://{}.execute-api.{}.amazonaws.com/{}/", api_id, region, stage)
}

/// `{base}{api_prefix}/{version_label}/{endpoint}`
pub fn endpoint_url(base: &str, api_prefix: &str, label: &VersionLabel, endpoint: &str) -> String {
    format!("{}{}/{}/{}", base, api_prefix, label, endpoint)
}

impl std::fmt::Display for Outputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "base url: {}", self.base_url)?;
        for endpoint in &self.endpoints {
            writeln!(f, "  {} ({}): {}", endpoint.branch, endpoint.version_label, endpoint.url)?;
        }
        write!(f, "api key: {}", self.api_key)
    }
}
