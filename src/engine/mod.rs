//! engine
//!
//! Runs a convergence pass: Resolve -> Publish -> Prune -> Alias/Route -> Deploy.
//!
//! # Architecture
//!
//! ```text
//! VersionResolver -> AliasManager -> RouteProvisioner -> DeploymentOrchestrator
//!                                                          ^
//!                         DeploymentTriggerCalculator -----+
//! ```
//!
//! 1. **Resolve**: snapshot every branch's bound version (fail-soft)
//! 2. **Publish**: publish the artifact, or reuse the newest version
//! 3. **Prune**: remove routes of branches no longer registered, freeing
//!    their path slots
//! 4. **Alias/Route**: per branch, concurrently, bind the alias and
//!    provision its routes
//! 5. **Deploy**: behind the all-routed barrier, create at most one
//!    deployment and publish the stage
//!
//! # Invariants
//!
//! - Resolution completes before any alias write or publish
//! - Alias and route failures abort the pass before the barrier; no
//!   deployment ever reflects a partially provisioned branch set
//! - Failures surface as one [`ConvergeError`] naming branch and stage
//!
//! # Example
//!
//! ```
//! use branchroute::core::config::Config;
//! use branchroute::core::types::CodeDigest;
//! use branchroute::engine::{converge, Context, PassOptions};
//! use branchroute::platform::mock::MockPlatform;
//! use branchroute::platform::Platform;
//! use std::path::Path;
//!
//! let config = Config::from_toml_str(r#"
//!     project = "email"
//!     stack = "dev"
//!     region = "us-east-1"
//!
//!     [[branches]]
//!     name = "main"
//!     version_label = "v1"
//! "#, Path::new("branchroute.toml")).unwrap();
//!
//! let ctx = Context::new(config, Platform::from_shared(MockPlatform::new("us-east-1")));
//! let options = PassOptions {
//!     current: Some("main".to_string()),
//!     artifact: Some(CodeDigest::of_bytes(b"bundle")),
//! };
//!
//! # tokio_test::block_on(async {
//! let report = converge(&ctx, &options).await.unwrap();
//! assert!(report.deployment.is_created());
//! # });
//! ```

pub mod alias;
mod converge;
pub mod deploy;
pub mod outputs;
pub mod plan;
pub mod resolve;
pub mod routes;
pub mod state;
pub mod status;
pub mod trigger;

pub use alias::{AliasError, AliasManager, AliasTarget};
pub use converge::{converge, function_config, BranchReport, ConvergeError, PassOptions, PassReport};
pub use deploy::{DeployError, DeploymentOrchestrator, DeploymentOutcome};
pub use outputs::Outputs;
pub use plan::{preview, DeploymentForecast, PassPlan};
pub use resolve::{ResolvedMap, VersionResolver};
pub use routes::{RouteError, RouteProvisioner, RouteSet, Scaffold};
pub use state::{BranchPhase, GlobalPhase, PassStage, PassState};
pub use status::{status, Status};
pub use trigger::DeploymentTrigger;

use crate::core::config::Config;
use crate::platform::{create_platform, Platform, PlatformError};
use crate::ui::output::Verbosity;

/// Execution context for one process.
///
/// Built once from the loaded configuration and passed by reference to
/// every operation; there is no global state.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: Config,
    pub platform: Platform,
    /// Debug output enabled.
    pub debug: bool,
    /// Quiet mode (minimal output).
    pub quiet: bool,
}

impl Context {
    pub fn new(config: Config, platform: Platform) -> Self {
        Self {
            config,
            platform,
            debug: false,
            quiet: false,
        }
    }

    /// Create the configured platform and wrap it with `config`.
    ///
    /// # Errors
    ///
    /// Fails if the provider is unknown or its state cannot be opened.
    pub fn open(config: Config) -> Result<Self, PlatformError> {
        let platform = create_platform(
            &config.deploy.platform.provider,
            &config.state_path(),
            &config.deploy.region,
        )?;
        Ok(Self::new(config, platform))
    }

    /// Set output flags.
    pub fn with_flags(mut self, debug: bool, quiet: bool) -> Self {
        self.debug = debug;
        self.quiet = quiet;
        self
    }

    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.debug)
    }

    /// Permits for concurrent per-branch platform work.
    pub fn max_concurrency(&self) -> usize {
        self.config.deploy.platform.max_concurrency.max(1)
    }
}
