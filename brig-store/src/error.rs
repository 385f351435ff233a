//! Error handling for brig-store.

use std::path::PathBuf;

use uuid::Uuid;

/// The error that can occur when working with a workspace store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A [`brig_types::Error`].
    #[error(transparent)]
    Types(#[from] brig_types::Error),

    /// An underlying SQLite error.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// A structured column could not be encoded or decoded.
    #[error("Malformed structured column: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred at a path.
    #[error("I/O error at {path} while {context}: {source}")]
    IoPath {
        /// The path at which the error occurred.
        path: PathBuf,
        /// The operation that failed.
        ///
        /// This is meant to complete the sentence "I/O error at path
        /// while ".
        context: String,
        /// The source error.
        source: std::io::Error,
    },

    /// The workspace is open in another process.
    #[error("Workspace {path} is already in use by another process")]
    AlreadyInUse {
        /// The workspace root.
        path: PathBuf,
    },

    /// A directory does not contain a workspace store.
    #[error("{path} does not contain a brig workspace")]
    NotAWorkspace {
        /// The offending directory.
        path: PathBuf,
    },

    /// The store schema is newer than this tool understands.
    #[error("Workspace schema version {found} is newer than supported version {supported}")]
    SchemaTooNew {
        /// The version found in the store.
        found: String,
        /// The newest version this tool supports.
        supported: String,
    },

    /// The stored schema version could not be parsed.
    #[error("Malformed workspace schema version: {0}")]
    MalformedSchemaVersion(String),

    /// An explicitly linked workspace no longer exists on disk.
    #[error("Explicitly linked workspace {path} no longer exists")]
    DanglingExplicitLink {
        /// The recorded path of the missing workspace.
        path: PathBuf,
    },

    /// A workspace uuid is not part of the open cluster.
    #[error("Workspace {0} is not part of the open cluster")]
    UnknownConfiguration(Uuid),

    /// A store-level consistency invariant does not hold.
    #[error("Workspace integrity violation: {0}")]
    Integrity(String),
}
