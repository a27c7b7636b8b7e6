//! core
//!
//! Domain types, the branch registry, and configuration.
//!
//! # Modules
//!
//! - [`types`] - Validated newtypes (branch names, labels, versions, digests)
//! - [`registry`] - The `branch -> version label` routing table
//! - [`config`] - Deployment configuration schema and loading
//!
//! Nothing in `core` performs platform I/O.

pub mod config;
pub mod registry;
pub mod types;
