//! engine::state
//!
//! Phase tracking for one convergence pass.
//!
//! # State machine
//!
//! ```text
//! per branch:  unresolved -> resolved -> aliased -> routed
//! global:      pending -> all-routed -> deployed
//! ```
//!
//! Branches advance independently, one step at a time. The global barrier
//! only moves to `all-routed` once every branch is `routed`, and only
//! `all-routed` may become `deployed`. A new pass starts every branch over at
//! `unresolved`.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::core::types::BranchName;

/// Where a branch is within the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchPhase {
    Unresolved,
    /// Prior version captured (possibly the sentinel)
    Resolved,
    Aliased,
    Routed,
}

impl BranchPhase {
    /// The only phase this one may advance to.
    pub fn next(self) -> Option<Self> {
        match self {
            BranchPhase::Unresolved => Some(BranchPhase::Resolved),
            BranchPhase::Resolved => Some(BranchPhase::Aliased),
            BranchPhase::Aliased => Some(BranchPhase::Routed),
            BranchPhase::Routed => None,
        }
    }
}

impl std::fmt::Display for BranchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BranchPhase::Unresolved => "unresolved",
            BranchPhase::Resolved => "resolved",
            BranchPhase::Aliased => "aliased",
            BranchPhase::Routed => "routed",
        };
        write!(f, "{}", name)
    }
}

/// The cross-branch barrier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GlobalPhase {
    Pending,
    AllRouted,
    Deployed,
}

/// The step of the pass an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStage {
    Resolve,
    Publish,
    Scaffold,
    Prune,
    Alias,
    Route,
    Deploy,
}

impl std::fmt::Display for PassStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PassStage::Resolve => "resolve",
            PassStage::Publish => "publish",
            PassStage::Scaffold => "scaffold",
            PassStage::Prune => "prune",
            PassStage::Alias => "alias",
            PassStage::Route => "route",
            PassStage::Deploy => "deploy",
        };
        write!(f, "{}", name)
    }
}

/// Errors from illegal transitions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("branch '{0}' is not part of this pass")]
    UnknownBranch(BranchName),

    #[error("branch '{branch}' cannot move from {from} to {to}")]
    InvalidTransition {
        branch: BranchName,
        from: BranchPhase,
        to: BranchPhase,
    },

    #[error("barrier unmet, branches not routed: {}", format_names(.pending))]
    BarrierUnmet { pending: Vec<BranchName> },

    #[error("cannot deploy before every branch is routed")]
    NotAllRouted,
}

fn format_names(names: &[BranchName]) -> String {
    names
        .iter()
        .map(|n| n.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Phase bookkeeping for every branch of one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassState {
    branches: BTreeMap<BranchName, BranchPhase>,
    global: GlobalPhase,
}

impl PassState {
    /// Start a pass with every branch `unresolved`.
    pub fn new<'a>(branches: impl IntoIterator<Item = &'a BranchName>) -> Self {
        Self {
            branches: branches
                .into_iter()
                .map(|b| (b.clone(), BranchPhase::Unresolved))
                .collect(),
            global: GlobalPhase::Pending,
        }
    }

    /// Current phase of a branch.
    pub fn phase(&self, branch: &BranchName) -> Option<BranchPhase> {
        self.branches.get(branch).copied()
    }

    /// The barrier state.
    pub fn global(&self) -> GlobalPhase {
        self.global
    }

    /// Advance `branch` by exactly one phase to `to`.
    pub fn advance(&mut self, branch: &BranchName, to: BranchPhase) -> Result<(), StateError> {
        let from = self
            .branches
            .get_mut(branch)
            .ok_or_else(|| StateError::UnknownBranch(branch.clone()))?;
        if from.next() != Some(to) {
            return Err(StateError::InvalidTransition {
                branch: branch.clone(),
                from: *from,
                to,
            });
        }
        *from = to;
        Ok(())
    }

    /// Branches not yet `routed`, in name order.
    pub fn pending(&self) -> Vec<BranchName> {
        self.branches
            .iter()
            .filter(|(_, phase)| **phase != BranchPhase::Routed)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Close the barrier once every branch is routed.
    pub fn mark_all_routed(&mut self) -> Result<(), StateError> {
        let pending = self.pending();
        if !pending.is_empty() {
            return Err(StateError::BarrierUnmet { pending });
        }
        self.global = GlobalPhase::AllRouted;
        Ok(())
    }

    /// Record the single deployment of the pass.
    pub fn mark_deployed(&mut self) -> Result<(), StateError> {
        if self.global != GlobalPhase::AllRouted {
            return Err(StateError::NotAllRouted);
        }
        self.global = GlobalPhase::Deployed;
        Ok(())
    }
}
