//! Error handling for brig-types.

/// The error that can occur when working with brig types.
#[derive(Debug, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An invalid package name.
    #[error("Invalid package name: {0}")]
    InvalidPackageName(String),

    /// An invalid project name.
    #[error("Invalid project name: {0}")]
    InvalidProjectName(String),

    /// An invalid package version.
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// An invalid version epoch.
    #[error("Invalid version epoch: {0}")]
    InvalidEpoch(String),

    /// An invalid version revision.
    #[error("Invalid version revision: {0}")]
    InvalidRevision(String),

    /// An invalid version constraint.
    #[error("Invalid version constraint: {0}")]
    InvalidConstraint(String),

    /// A version constraint whose minimum is greater than its maximum.
    #[error("Empty version constraint: {0}")]
    EmptyConstraint(String),

    /// A `^` or `~` shorthand applied to a version without the required
    /// numeric components.
    #[error("Constraint shorthand requires a numeric version component: {0}")]
    NonNumericShorthand(String),

    /// An invalid package type.
    #[error("Invalid package type: {0}")]
    InvalidPackageType(String),

    /// A manifest could not be parsed.
    #[error("Manifest parse error: {0}")]
    ManifestParse(String),

    /// A manifest declares a format version this library does not support.
    #[error("Unsupported manifest version: {0}")]
    UnsupportedManifestVersion(String),

    /// A manifest value is invalid for its key.
    #[error("Invalid manifest value for {key}: {reason}")]
    InvalidManifestValue {
        /// The manifest key the value belongs to.
        key: String,
        /// Why the value is rejected.
        reason: String,
    },
}
