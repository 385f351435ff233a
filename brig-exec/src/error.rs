//! Error handling for brig-exec.

use brig_types::PackageKey;

/// The error that can occur while executing a plan.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A [`brig_store::Error`].
    #[error(transparent)]
    Store(#[from] brig_store::Error),

    /// A handler failed while executing an operation; if mutation had
    /// begun the package was marked broken.
    #[error("Unable to {operation} package {key}: {source}")]
    OperationFailed {
        /// The package the operation applied to.
        key: PackageKey,
        /// The failed operation.
        operation: &'static str,
        /// The handler failure.
        source: crate::handlers::HandlerError,
    },

    /// A step applies to a package the store does not know.
    #[error("Plan step references unknown selected package {0}")]
    UnknownSelectedPackage(PackageKey),
}
