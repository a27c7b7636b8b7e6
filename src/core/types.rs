//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`BranchName`] - Branch name, also used verbatim as the function alias name
//! - [`VersionLabel`] - Stable API version label (a single URL path segment)
//! - [`VersionId`] - Immutable, provider-assigned function version id
//! - [`ResolvedVersion`] - A pinned version id or the "never deployed" sentinel
//! - [`CodeDigest`] - Content digest of a function artifact
//! - [`Fingerprint`] - Content-derived hash used to gate redeployments
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented, preventing entire classes of bugs.
//!
//! # Examples
//!
//! ```
//! use branchroute::core::types::{BranchName, VersionLabel, VersionId};
//!
//! // Valid constructions
//! let branch = BranchName::new("main").unwrap();
//! let label = VersionLabel::new("v1").unwrap();
//! let version = VersionId::new("7").unwrap();
//!
//! // Invalid constructions fail at creation time
//! assert!(BranchName::new("feature/x").is_err());
//! assert!(VersionLabel::new("v1/extra").is_err());
//! assert!(VersionId::new("").is_err());
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),

    #[error("invalid version label: {0}")]
    InvalidVersionLabel(String),

    #[error("invalid version id: {0}")]
    InvalidVersionId(String),

    #[error("invalid code digest: {0}")]
    InvalidDigest(String),
}

/// A validated branch name.
///
/// The branch name doubles as the function alias name and as the suffix of
/// every gateway resource provisioned for the branch, so it must satisfy the
/// alias naming rules:
/// - 1 to 128 characters
/// - Only ASCII letters, digits, `-` and `_`
/// - Cannot consist of digits only (those read as version numbers)
///
/// # Example
///
/// ```
/// use branchroute::core::types::BranchName;
///
/// let name = BranchName::new("release_2024-q3").unwrap();
/// assert_eq!(name.as_str(), "release_2024-q3");
///
/// assert!(BranchName::new("").is_err());
/// assert!(BranchName::new("42").is_err());
/// assert!(BranchName::new("has space").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Maximum alias name length accepted by the function platform.
    pub const MAX_LEN: usize = 128;

    /// Create a new validated branch name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidBranchName` if the name cannot be used as
    /// an alias name.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), TypeError> {
        if name.is_empty() {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot be empty".into(),
            ));
        }

        if name.len() > Self::MAX_LEN {
            return Err(TypeError::InvalidBranchName(format!(
                "branch name cannot exceed {} characters",
                Self::MAX_LEN
            )));
        }

        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(TypeError::InvalidBranchName(format!(
                "branch name cannot contain '{c}'"
            )));
        }

        // Digit-only names are indistinguishable from version qualifiers
        if name.chars().all(|c| c.is_ascii_digit()) {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot consist only of digits".into(),
            ));
        }

        Ok(())
    }

    /// Get the branch name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BranchName {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BranchName> for String {
    fn from(name: BranchName) -> Self {
        name.0
    }
}

impl std::fmt::Display for BranchName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A stable API version label such as `v1`.
///
/// Labels become a single path segment (`/api/{label}/...`), so they are
/// restricted to 1 to 64 characters of ASCII letters, digits, `.`, `-` and
/// `_`, and cannot be `.` or `..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionLabel(String);

impl VersionLabel {
    /// Create a new validated version label.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidVersionLabel` if the label is not a valid
    /// path segment.
    pub fn new(label: impl Into<String>) -> Result<Self, TypeError> {
        let label = label.into();

        if label.is_empty() {
            return Err(TypeError::InvalidVersionLabel(
                "version label cannot be empty".into(),
            ));
        }
        if label.len() > 64 {
            return Err(TypeError::InvalidVersionLabel(
                "version label cannot exceed 64 characters".into(),
            ));
        }
        if label == "." || label == ".." {
            return Err(TypeError::InvalidVersionLabel(format!(
                "'{label}' is not a path segment"
            )));
        }
        if let Some(c) = label
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
        {
            return Err(TypeError::InvalidVersionLabel(format!(
                "version label cannot contain '{c}'"
            )));
        }

        Ok(Self(label))
    }

    /// Get the label as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VersionLabel {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VersionLabel> for String {
    fn from(label: VersionLabel) -> Self {
        label.0
    }
}

impl std::fmt::Display for VersionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable function version id assigned by the platform.
///
/// Published versions are never mutated; a new artifact produces a new id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId(String);

impl VersionId {
    /// Create a new version id.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidVersionId` if the id is empty or contains
    /// whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        if id.is_empty() {
            return Err(TypeError::InvalidVersionId(
                "version id cannot be empty".into(),
            ));
        }
        if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(TypeError::InvalidVersionId(format!(
                "version id '{}' contains whitespace",
                id.escape_debug()
            )));
        }
        Ok(Self(id))
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VersionId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VersionId> for String {
    fn from(id: VersionId) -> Self {
        id.0
    }
}

impl std::fmt::Display for VersionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The version a branch's alias was bound to before the current pass.
///
/// `Sentinel` means no version could be resolved: the alias does not exist
/// yet, or the platform query failed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "version", rename_all = "snake_case")]
pub enum ResolvedVersion {
    /// The alias is bound to this version.
    Pinned(VersionId),
    /// Nothing resolved; the branch has never been deployed.
    Sentinel,
}

impl ResolvedVersion {
    /// The pinned version, if any.
    pub fn version(&self) -> Option<&VersionId> {
        match self {
            ResolvedVersion::Pinned(v) => Some(v),
            ResolvedVersion::Sentinel => None,
        }
    }

    /// Check if this is the sentinel.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, ResolvedVersion::Sentinel)
    }
}

impl std::fmt::Display for ResolvedVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedVersion::Pinned(v) => write!(f, "{}", v),
            ResolvedVersion::Sentinel => write!(f, "<never deployed>"),
        }
    }
}

/// Lowercase hex SHA-256 digest of a function artifact.
///
/// # Example
///
/// ```
/// use branchroute::core::types::CodeDigest;
///
/// let a = CodeDigest::of_bytes(b"artifact");
/// let b = CodeDigest::new(a.as_str()).unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.as_str().len(), 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CodeDigest(String);

impl CodeDigest {
    /// Digest raw artifact bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Wrap an existing hex digest.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidDigest` unless the value is non-empty
    /// lowercase hex.
    pub fn new(digest: impl Into<String>) -> Result<Self, TypeError> {
        let digest = digest.into();
        if digest.is_empty() {
            return Err(TypeError::InvalidDigest("digest cannot be empty".into()));
        }
        if !digest
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(TypeError::InvalidDigest(format!(
                "'{}' is not lowercase hex",
                digest
            )));
        }
        Ok(Self(digest))
    }

    /// Get the digest as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for display.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl TryFrom<String> for CodeDigest {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CodeDigest> for String {
    fn from(digest: CodeDigest) -> Self {
        digest.0
    }
}

impl std::fmt::Display for CodeDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A content-derived hash over an ordered list of fields.
///
/// Each field is length-prefixed before hashing, so distinct field lists
/// never collide by concatenation (`["ab", "c"]` vs `["a", "bc"]`).
///
/// # Example
///
/// ```
/// use branchroute::core::types::Fingerprint;
///
/// let fp = Fingerprint::of_fields(&["7", "abc123"]);
/// assert_eq!(fp, Fingerprint::of_fields(&["7", "abc123"]));
/// assert_ne!(fp, Fingerprint::of_fields(&["7a", "bc123"]));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute a fingerprint from fields, in order.
    pub fn of_fields(fields: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for field in fields {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Rehydrate a fingerprint previously rendered with `as_str`.
    pub fn from_hex(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the fingerprint as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
