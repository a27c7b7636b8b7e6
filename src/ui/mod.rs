//! ui
//!
//! Terminal output.
//!
//! # Modules
//!
//! - [`output`] - Verbosity-aware printing and JSON output
//!
//! Commands never print directly; everything goes through [`output`] so
//! `--quiet` and `--json` behave the same everywhere.

pub mod output;
