//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Deployment Config
//!
//! A single TOML document describes the function, the branch registry, the
//! routing surface, the usage plan and the platform provider. Every table
//! rejects unknown keys, so typos fail at load time instead of being
//! silently ignored.
//!
//! # Validation
//!
//! Config values are validated after parsing (see [`DeployConfig::validate`]).
//! Required fields (`project`, `stack`, `region`, `branches`) have no
//! defaults; parsing fails when they are missing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::core::registry::BranchSpec;
use crate::core::types::Fingerprint;

/// Deployment configuration.
///
/// # Example
///
/// ```toml
/// project = "ingren-email-api"
/// stack = "dev"
/// region = "us-east-1"
///
/// [function]
/// memory_mb = 1024
/// timeout_secs = 30
/// model = "gpt-4.1-nano"
///
/// [[branches]]
/// name = "main"
/// version_label = "v1"
///
/// [[branches]]
/// name = "beta"
/// version_label = "v2"
///
/// [usage_plan]
/// quota_limit = 500
/// quota_period = "DAY"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DeployConfig {
    /// Project name; prefixes every platform resource.
    pub project: String,

    /// Stack name; also the gateway stage name.
    pub stack: String,

    /// Platform region (used in endpoint URLs).
    pub region: String,

    /// Default branch to promote when `--current` is not given.
    #[serde(default)]
    pub current_branch: Option<String>,

    /// Function settings
    #[serde(default)]
    pub function: FunctionSettings,

    /// The branch registry
    pub branches: Vec<BranchSpec>,

    /// Route layout and CORS settings
    #[serde(default)]
    pub routing: RoutingSettings,

    /// Shared quota/throttle policy
    #[serde(default)]
    pub usage_plan: UsagePlanSettings,

    /// Platform provider settings
    #[serde(default)]
    pub platform: PlatformSettings,
}

impl DeployConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier("project", &self.project)?;
        validate_identifier("stack", &self.stack)?;

        if self.region.trim().is_empty() {
            return Err(ConfigError::InvalidValue("region cannot be empty".into()));
        }

        if let Some(current) = &self.current_branch {
            if !self.branches.iter().any(|b| b.name.as_str() == current) {
                return Err(ConfigError::InvalidValue(format!(
                    "current_branch '{}' is not listed in [[branches]]",
                    current
                )));
            }
        }

        self.function.validate()?;
        self.routing.validate()?;
        self.usage_plan.validate()?;
        self.platform.validate()?;
        Ok(())
    }

    /// The deployed function's name (`{project}-{stack}` unless overridden).
    pub fn function_name(&self) -> String {
        self.function
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.project, self.stack))
    }

    /// The REST API object's name.
    pub fn api_name(&self) -> String {
        format!("{}-api-{}", self.project, self.stack)
    }

    /// The API key's name.
    pub fn api_key_name(&self) -> String {
        format!("{}-key-{}", self.project, self.stack)
    }

    /// The usage plan's name.
    pub fn usage_plan_name(&self) -> String {
        format!("{}-plan-{}", self.project, self.stack)
    }
}

/// Function runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FunctionSettings {
    /// Function name override
    pub name: Option<String>,
    pub runtime: String,
    pub handler: String,
    pub memory_mb: u32,
    pub timeout_secs: u32,
    /// Language model used by the email service
    pub model: String,
    pub system_prompt_path: String,
    pub user_prompt_template_path: String,
    /// Remote prompt identifier, if prompts are fetched from a prompt hub
    pub prompt_id: Option<String>,
    /// Extra environment variables
    pub environment: BTreeMap<String, String>,
}

impl Default for FunctionSettings {
    fn default() -> Self {
        Self {
            name: None,
            runtime: "python3.10".to_string(),
            handler: "lambda_handler.handler".to_string(),
            memory_mb: 1024,
            timeout_secs: 30,
            model: "gpt-4.1-nano".to_string(),
            system_prompt_path: "prompts/system_prompt.txt".to_string(),
            user_prompt_template_path: "prompts/user_prompt_template.txt".to_string(),
            prompt_id: None,
            environment: BTreeMap::new(),
        }
    }
}

impl FunctionSettings {
    pub const MEMORY_RANGE: std::ops::RangeInclusive<u32> = 128..=10240;
    pub const TIMEOUT_RANGE: std::ops::RangeInclusive<u32> = 1..=900;

    /// Validate the function settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = &self.name {
            validate_identifier("function.name", name)?;
        }
        if !Self::MEMORY_RANGE.contains(&self.memory_mb) {
            return Err(ConfigError::InvalidValue(format!(
                "function.memory_mb must be within {}..={}, got {}",
                Self::MEMORY_RANGE.start(),
                Self::MEMORY_RANGE.end(),
                self.memory_mb
            )));
        }
        if !Self::TIMEOUT_RANGE.contains(&self.timeout_secs) {
            return Err(ConfigError::InvalidValue(format!(
                "function.timeout_secs must be within {}..={}, got {}",
                Self::TIMEOUT_RANGE.start(),
                Self::TIMEOUT_RANGE.end(),
                self.timeout_secs
            )));
        }
        for (field, value) in [
            ("function.runtime", &self.runtime),
            ("function.handler", &self.handler),
            ("function.model", &self.model),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue(format!("{field} cannot be empty")));
            }
        }
        Ok(())
    }

    /// Environment variables handed to the function.
    ///
    /// Explicit `environment` entries win over the derived ones.
    pub fn environment_variables(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("OPENAI_MODEL".to_string(), self.model.clone());
        vars.insert(
            "SYSTEM_PROMPT_PATH".to_string(),
            self.system_prompt_path.clone(),
        );
        vars.insert(
            "USER_PROMPT_TEMPLATE_PATH".to_string(),
            self.user_prompt_template_path.clone(),
        );
        if let Some(prompt_id) = &self.prompt_id {
            vars.insert("PROMPT_ID".to_string(), prompt_id.clone());
        }
        vars.extend(self.environment.clone());
        vars
    }
}

/// Route layout and CORS settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RoutingSettings {
    /// Shared parent path segment (`/api`)
    pub api_prefix: String,
    /// Leaf path segment under each version (`generate-email`)
    pub endpoint: String,
    pub allow_origin: String,
    pub allow_headers: String,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            api_prefix: "api".to_string(),
            endpoint: "generate-email".to_string(),
            allow_origin: "*".to_string(),
            allow_headers: "Content-Type,X-Amz-Date,Authorization,X-Api-Key,X-Amz-Security-Token"
                .to_string(),
        }
    }
}

impl RoutingSettings {
    /// Validate the routing settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_path_segment("routing.api_prefix", &self.api_prefix)?;
        validate_path_segment("routing.endpoint", &self.endpoint)?;
        if self.allow_origin.is_empty() {
            return Err(ConfigError::InvalidValue(
                "routing.allow_origin cannot be empty".into(),
            ));
        }
        Ok(())
    }

    /// Fingerprint of every setting the route resources are built from.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of_fields(&[
            self.api_prefix.as_str(),
            self.endpoint.as_str(),
            self.allow_origin.as_str(),
            self.allow_headers.as_str(),
        ])
    }
}

/// Quota period for the usage plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuotaPeriod {
    #[default]
    Day,
    Week,
    Month,
}

impl std::fmt::Display for QuotaPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaPeriod::Day => write!(f, "DAY"),
            QuotaPeriod::Week => write!(f, "WEEK"),
            QuotaPeriod::Month => write!(f, "MONTH"),
        }
    }
}

/// Shared quota and throttle policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct UsagePlanSettings {
    pub quota_limit: u32,
    pub quota_period: QuotaPeriod,
    pub burst_limit: u32,
    pub rate_limit: f64,
}

impl Default for UsagePlanSettings {
    fn default() -> Self {
        Self {
            quota_limit: 500,
            quota_period: QuotaPeriod::Day,
            burst_limit: 10,
            rate_limit: 10.0,
        }
    }
}

impl UsagePlanSettings {
    /// Validate the usage plan settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quota_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "usage_plan.quota_limit must be positive".into(),
            ));
        }
        if !self.rate_limit.is_finite() || self.rate_limit <= 0.0 {
            return Err(ConfigError::InvalidValue(format!(
                "usage_plan.rate_limit must be a positive number, got {}",
                self.rate_limit
            )));
        }
        Ok(())
    }
}

/// Platform provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformSettings {
    /// Provider to use ("local" or "memory")
    pub provider: String,
    /// State file for the local provider
    pub state_path: String,
    /// Maximum concurrent platform calls within a pass
    pub max_concurrency: usize,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            state_path: ".branchroute/state.json".to_string(),
            max_concurrency: 4,
        }
    }
}

impl PlatformSettings {
    /// Validate the platform settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid = crate::platform::valid_provider_names();
        if !valid.contains(&self.provider.as_str()) {
            return Err(ConfigError::InvalidValue(format!(
                "invalid platform provider '{}', must be one of: {}",
                self.provider,
                valid.join(", ")
            )));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "platform.max_concurrency must be at least 1".into(),
            ));
        }
        if self.state_path.is_empty() {
            return Err(ConfigError::InvalidValue(
                "platform.state_path cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Resource-name identifiers: ASCII letters, digits, `-` and `_`.
fn validate_identifier(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::InvalidValue(format!("{field} cannot be empty")));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(ConfigError::InvalidValue(format!(
            "{field} cannot contain '{c}'"
        )));
    }
    Ok(())
}

fn validate_path_segment(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() || value.contains('/') || value == "." || value == ".." {
        return Err(ConfigError::InvalidValue(format!(
            "{field} must be a single path segment, got '{value}'"
        )));
    }
    Ok(())
}
