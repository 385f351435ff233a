//! Error handling for brig-skeleton.

use brig_types::Version;

/// The error that can occur when evaluating a package skeleton.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A build fragment or expression could not be parsed or
    /// evaluated.
    #[error("Unable to evaluate {context}: {reason}")]
    Evaluation {
        /// What was being evaluated (an enable condition, a reflect
        /// fragment, ...), including the dependency position.
        context: String,
        /// The failure.
        reason: String,
    },

    /// A reflect clause overrides a variable reflected earlier with a
    /// different value.
    #[error(
        "Reflect clause of {package} {version} redefines {name} from '{previous}' to '{new}'"
    )]
    ReflectRedefinition {
        /// The reflecting package name.
        package: String,
        /// The reflecting package version.
        version: Version,
        /// The redefined variable.
        name: String,
        /// The previously reflected value.
        previous: String,
        /// The conflicting new value.
        new: String,
    },

    /// A require clause sets a non-boolean or non-true value.
    #[error("Require clause may only set boolean true, but sets {name} = {value}")]
    RequireNonTrue {
        /// The offending variable.
        name: String,
        /// The offending value.
        value: String,
    },

    /// A dependency configuration was rejected and the dependent has
    /// no other enabled alternative.
    #[error("{package} {version} rejects the negotiated configuration at {position}")]
    ConfigurationRejected {
        /// The rejecting package name.
        package: String,
        /// The rejecting package version.
        version: Version,
        /// The dependency position the rejection happened at.
        position: String,
    },

    /// An I/O error occurred while materializing the skeleton project.
    #[error("I/O error while {context}: {source}")]
    Io {
        /// The operation that failed.
        context: String,
        /// The source error.
        source: std::io::Error,
    },
}
