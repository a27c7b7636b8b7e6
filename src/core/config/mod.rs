//! core::config
//!
//! Configuration schema and loading.
//!
//! # Overview
//!
//! A deployment is described by one TOML file (see [`schema::DeployConfig`]).
//! Loading parses, validates and builds the [`BranchRegistry`] in one step,
//! so a [`Config`] value is always internally consistent.
//!
//! # Locations
//!
//! Searched in order:
//! 1. An explicit path (`--config`)
//! 2. `$BRANCHROUTE_CONFIG` if set
//! 3. `./branchroute.toml`
//! 4. `$XDG_CONFIG_HOME/branchroute/config.toml`
//! 5. `~/.branchroute/config.toml`
//!
//! # Example
//!
//! ```no_run
//! use branchroute::core::config::Config;
//!
//! let config = Config::load(None).unwrap();
//! println!("Stack: {}", config.deploy.stack);
//! for branch in config.registry.entries() {
//!     println!("{} -> {}", branch.name, branch.version_label);
//! }
//! ```

pub mod schema;

pub use schema::{
    DeployConfig, FunctionSettings, PlatformSettings, QuotaPeriod, RoutingSettings,
    UsagePlanSettings,
};

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::registry::{BranchRegistry, RegistryError};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "BRANCHROUTE_CONFIG";

/// Config file name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "branchroute.toml";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("invalid branch registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("no config file found (searched: {})", format_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Loaded and validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// The parsed deployment config
    pub deploy: DeployConfig,
    /// The branch registry built from `deploy.branches`
    pub registry: BranchRegistry,
    /// Path the config was loaded from
    path: PathBuf,
}

impl Config {
    /// Locate, read, parse and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no config file exists, or if the file cannot be
    /// parsed or fails validation.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = Self::locate(explicit)?;
        let contents = fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;
        Self::from_toml_str(&contents, &path)
    }

    /// Parse and validate configuration text.
    ///
    /// `path` is only used for error messages and relative path resolution.
    pub fn from_toml_str(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let deploy: DeployConfig =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        deploy.validate()?;
        let registry = BranchRegistry::new(deploy.branches.clone())?;

        Ok(Self {
            deploy,
            registry,
            path: path.to_path_buf(),
        })
    }

    /// Find the config file to load.
    pub fn locate(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        let mut searched = Vec::new();

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(path);
            }
            searched.push(path);
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Ok(local);
        }
        searched.push(local);

        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("branchroute/config.toml");
            if path.exists() {
                return Ok(path);
            }
            searched.push(path);
        }

        if let Some(home) = dirs::home_dir() {
            let path = home.join(".branchroute/config.toml");
            if path.exists() {
                return Ok(path);
            }
            searched.push(path);
        }

        Err(ConfigError::NotFound { searched })
    }

    /// Path the config was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// State file for the local provider, relative to the config file.
    pub fn state_path(&self) -> PathBuf {
        let state = PathBuf::from(&self.deploy.platform.state_path);
        if state.is_absolute() {
            return state;
        }
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(state),
            _ => state,
        }
    }

    /// The branch to promote: the CLI override, else `current_branch`.
    pub fn current_branch<'a>(&'a self, cli_override: Option<&'a str>) -> Option<&'a str> {
        cli_override.or(self.deploy.current_branch.as_deref())
    }
}
