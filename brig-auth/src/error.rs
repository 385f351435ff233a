//! Error handling for brig-auth.

/// The error that can occur when authenticating a repository.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A [`brig_store::Error`].
    #[error(transparent)]
    Store(#[from] brig_store::Error),

    /// The repository certificate could not be decoded.
    #[error("Unable to parse repository certificate: {0}")]
    UnparseableCertificate(String),

    /// The certificate is outside its validity period.
    #[error("Certificate for {name} is expired or not yet valid")]
    ExpiredCertificate {
        /// The certificate name.
        name: String,
    },

    /// The certificate name does not cover the repository.
    #[error("Certificate name mismatch for repository {repository} (certificate name is {name})")]
    NameMismatch {
        /// The certificate name.
        name: String,
        /// The repository canonical name.
        repository: String,
    },

    /// Authentication was refused.
    #[error("Repository {0} is not trusted")]
    UntrustedRepository(String),

    /// An I/O error occurred while persisting a certificate.
    #[error("I/O error while {context}: {source}")]
    Io {
        /// The operation that failed.
        context: String,
        /// The source error.
        source: std::io::Error,
    },
}
