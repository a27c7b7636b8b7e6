//! platform
//!
//! Abstraction for the deployment platform (function runtime + REST gateway).
//!
//! # Architecture
//!
//! The [`FunctionApi`] and [`GatewayApi`] traits define everything a
//! convergence pass may ask of the platform. Commands use the
//! [`create_platform`] factory rather than importing specific providers.
//!
//! - Platform calls are made only by the engine's pass components
//! - Every write is apply-by-name and idempotent per named resource
//! - Read failures during version resolution are absorbed by the caller
//!
//! # Modules
//!
//! - `traits`: Core traits and request/response types
//! - [`memory`]: In-process provider, optionally persisted (`local`)
//! - [`mock`]: Failure-injecting wrapper for deterministic testing
//! - [`lock`]: Exclusive lock on persisted state
//! - `factory`: Provider selection and creation

mod factory;
pub mod lock;
pub mod memory;
pub mod mock;
mod traits;

pub use factory::{create_platform, valid_provider_names, Platform, PlatformProvider};
pub use traits::*;
