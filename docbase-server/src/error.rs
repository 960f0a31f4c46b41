//! Errors returned by the registry, the ledger and the service.

/// Result type of the archive and document operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error taxonomy of the archive and document operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The collection, archive, document or revision does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// A required parameter is missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The requested revision exists but marks the document as deleted.
    #[error("revision {0} is a tombstone")]
    Tombstoned(String),
    /// The storage engine failed.
    #[error("storage unavailable: {0:#}")]
    StorageUnavailable(#[from] anyhow::Error),
    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
    /// The operation did not complete before the caller's deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    pub(crate) fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }
}
