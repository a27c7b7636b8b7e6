//! core::registry
//!
//! The branch registry: the static `branch name -> version label` table that
//! defines the routing surface.
//!
//! # Invariants
//!
//! - Branch names are unique
//! - Version labels are unique, so every branch owns a disjoint URL prefix
//! - The registry is never empty
//! - The registry is read-only once loaded
//!
//! # Example
//!
//! ```
//! use branchroute::core::registry::BranchRegistry;
//!
//! let registry = BranchRegistry::from_pairs(&[("main", "v1"), ("beta", "v2")]).unwrap();
//! let pass = registry.for_pass("main").unwrap();
//!
//! assert_eq!(pass.len(), 2);
//! assert!(pass[0].is_current);
//! assert!(!pass[1].is_current);
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{BranchName, TypeError, VersionLabel};

/// Errors from registry construction and lookup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("branch registry is empty")]
    Empty,

    #[error("branch '{0}' is registered more than once")]
    DuplicateBranch(BranchName),

    #[error("version label '{label}' is claimed by both '{first}' and '{second}'")]
    DuplicateLabel {
        label: VersionLabel,
        first: BranchName,
        second: BranchName,
    },

    #[error("current branch '{0}' is not in the branch registry")]
    UnknownCurrent(String),

    #[error(transparent)]
    Type(#[from] TypeError),
}

/// One registry row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BranchSpec {
    /// Branch name (also the alias name).
    pub name: BranchName,
    /// Stable API version label.
    pub version_label: VersionLabel,
}

/// A branch as seen by one convergence pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Branch {
    pub name: BranchName,
    pub version_label: VersionLabel,
    /// Whether this branch is the one being promoted by the pass.
    pub is_current: bool,
}

/// Validated, ordered branch registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRegistry {
    entries: Vec<BranchSpec>,
}

impl BranchRegistry {
    /// Build a registry, rejecting empty tables and duplicate names or labels.
    pub fn new(entries: Vec<BranchSpec>) -> Result<Self, RegistryError> {
        if entries.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut names = HashSet::new();
        for entry in &entries {
            if !names.insert(&entry.name) {
                return Err(RegistryError::DuplicateBranch(entry.name.clone()));
            }
        }

        for (i, a) in entries.iter().enumerate() {
            if let Some(b) = entries[i + 1..]
                .iter()
                .find(|b| b.version_label == a.version_label)
            {
                return Err(RegistryError::DuplicateLabel {
                    label: a.version_label.clone(),
                    first: a.name.clone(),
                    second: b.name.clone(),
                });
            }
        }

        Ok(Self { entries })
    }

    /// Convenience constructor from `(name, label)` string pairs.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Result<Self, RegistryError> {
        let entries = pairs
            .iter()
            .map(|(name, label)| {
                Ok(BranchSpec {
                    name: BranchName::new(*name)?,
                    version_label: VersionLabel::new(*label)?,
                })
            })
            .collect::<Result<Vec<_>, TypeError>>()?;
        Self::new(entries)
    }

    /// Registry rows in declaration order.
    pub fn entries(&self) -> &[BranchSpec] {
        &self.entries
    }

    /// Registered branch names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &BranchName> {
        self.entries.iter().map(|e| &e.name)
    }

    /// Number of registered branches.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false for a constructed registry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a branch by name.
    pub fn get(&self, name: &str) -> Option<&BranchSpec> {
        self.entries.iter().find(|e| e.name.as_str() == name)
    }

    /// Check if a branch is registered.
    pub fn contains(&self, name: &BranchName) -> bool {
        self.entries.iter().any(|e| &e.name == name)
    }

    /// Materialize the branches for one pass, marking exactly one as current.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownCurrent` if `current` is not registered.
    pub fn for_pass(&self, current: &str) -> Result<Vec<Branch>, RegistryError> {
        if self.get(current).is_none() {
            return Err(RegistryError::UnknownCurrent(current.to_string()));
        }

        Ok(self
            .entries
            .iter()
            .map(|e| Branch {
                name: e.name.clone(),
                version_label: e.version_label.clone(),
                is_current: e.name.as_str() == current,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_pairs() {
        let registry = BranchRegistry::from_pairs(&[("main", "v1"), ("beta", "v2")]).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("beta").unwrap().version_label.as_str(), "v2");
        let names: Vec<_> = registry.names().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["main", "beta"]);
    }

    #[test]
    fn empty_rejected() {
        assert_eq!(BranchRegistry::new(vec![]), Err(RegistryError::Empty));
    }

    #[test]
    fn duplicate_branch_rejected() {
        let err = BranchRegistry::from_pairs(&[("main", "v1"), ("main", "v2")]).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateBranch(_)));
    }

    #[test]
    fn duplicate_label_rejected() {
        let err = BranchRegistry::from_pairs(&[("main", "v1"), ("beta", "v1")]).unwrap_err();
        match err {
            RegistryError::DuplicateLabel { first, second, .. } => {
                assert_eq!(first.as_str(), "main");
                assert_eq!(second.as_str(), "beta");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn invalid_names_rejected() {
        assert!(matches!(
            BranchRegistry::from_pairs(&[("feature/x", "v1")]),
            Err(RegistryError::Type(_))
        ));
    }

    mod for_pass {
        use super::*;

        #[test]
        fn exactly_one_current() {
            let registry =
                BranchRegistry::from_pairs(&[("main", "v1"), ("beta", "v2"), ("exp", "v3")])
                    .unwrap();
            let pass = registry.for_pass("beta").unwrap();
            assert_eq!(pass.iter().filter(|b| b.is_current).count(), 1);
            assert!(pass.iter().find(|b| b.is_current).unwrap().name.as_str() == "beta");
        }

        #[test]
        fn unknown_current_rejected() {
            let registry = BranchRegistry::from_pairs(&[("main", "v1")]).unwrap();
            assert_eq!(
                registry.for_pass("nope"),
                Err(RegistryError::UnknownCurrent("nope".into()))
            );
        }
    }
}
