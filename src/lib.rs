//! branchroute - Route every registered branch to its own API version
//!
//! branchroute keeps one serverless function and one HTTP gateway serving
//! several long-lived branches at once. Each branch owns an alias pinned to
//! a published function version and a versioned route set
//! (`/api/{version_label}/...`). A convergence pass promotes exactly one
//! branch, the current one, to the newest code and leaves every other
//! branch on the version it already runs.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface layer (parses args, delegates to engine)
//! - [`engine`] - The convergence pass: Resolve -> Publish -> Prune -> Alias/Route -> Deploy
//! - [`core`] - Domain types, the branch registry, and configuration
//! - [`platform`] - Function and gateway seams, with local and mock providers
//! - [`ui`] - Output helpers
//!
//! # Correctness Invariants
//!
//! 1. Non-current branches are never moved to new code
//! 2. At most one deployment per pass, and only once every branch is routed
//! 3. An unchanged function version and digest never redeploys
//! 4. Route names never collide across branches

pub mod cli;
pub mod core;
pub mod engine;
pub mod platform;
pub mod ui;
