//! engine::trigger
//!
//! Deployment trigger calculation.
//!
//! The trigger is a fingerprint over exactly two content-derived fields: the
//! newest function version id and its code digest. A change in the trigger
//! is the only signal that a new deployment snapshot is required.
//!
//! # Invariants
//!
//! - Pure: equal inputs always produce the same trigger
//! - Any change to either input produces a different trigger
//! - Nothing volatile (time, randomness, host) is mixed in

use serde::{Deserialize, Serialize};

use crate::core::types::{CodeDigest, Fingerprint, VersionId};

/// Stage variable the live trigger is recorded under.
pub const TRIGGER_VARIABLE: &str = "deployment_trigger";

/// Stage variable the newest function version is exposed under.
pub const VERSION_VARIABLE: &str = "function_version";

/// Derived deployment trigger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentTrigger {
    fingerprint: Fingerprint,
}

impl DeploymentTrigger {
    /// The underlying fingerprint.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Hex form, as stored in the stage variable.
    pub fn as_str(&self) -> &str {
        self.fingerprint.as_str()
    }

    /// Check whether a recorded stage value equals this trigger.
    pub fn matches(&self, recorded: Option<&str>) -> bool {
        recorded == Some(self.as_str())
    }
}

impl std::fmt::Display for DeploymentTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.fingerprint)
    }
}

/// Compute the trigger for a function version.
///
/// # Example
///
/// ```
/// use branchroute::core::types::{CodeDigest, VersionId};
/// use branchroute::engine::trigger::compute;
///
/// let v = VersionId::new("3").unwrap();
/// let h = CodeDigest::of_bytes(b"bundle");
/// assert_eq!(compute(&v, &h), compute(&v, &h));
/// ```
pub fn compute(version_id: &VersionId, code_digest: &CodeDigest) -> DeploymentTrigger {
    DeploymentTrigger {
        fingerprint: Fingerprint::of_fields(&[version_id.as_str(), code_digest.as_str()]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(id: &str) -> VersionId {
        VersionId::new(id).unwrap()
    }

    #[test]
    fn idempotent() {
        let h = CodeDigest::of_bytes(b"x");
        assert_eq!(compute(&v("1"), &h), compute(&v("1"), &h));
    }

    #[test]
    fn version_change_changes_trigger() {
        let h = CodeDigest::of_bytes(b"x");
        assert_ne!(compute(&v("1"), &h), compute(&v("2"), &h));
    }

    #[test]
    fn digest_change_changes_trigger() {
        assert_ne!(
            compute(&v("1"), &CodeDigest::of_bytes(b"x")),
            compute(&v("1"), &CodeDigest::of_bytes(b"y"))
        );
    }

    #[test]
    fn matches_recorded_value() {
        let trigger = compute(&v("4"), &CodeDigest::of_bytes(b"x"));
        let recorded = trigger.as_str().to_string();
        assert!(trigger.matches(Some(&recorded)));
        assert!(!trigger.matches(Some("stale")));
        assert!(!trigger.matches(None));
    }
}
