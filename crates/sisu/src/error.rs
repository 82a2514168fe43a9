//! Error types for sisu

use thiserror::Error;

/// Result type alias using sisu's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Sisu error types.
///
/// Providers classify backend failures into these kinds; the FUSE adapter
/// maps each kind to an errno at the kernel boundary and nowhere else.
#[derive(Error, Debug)]
pub enum Error {
    /// Path not present at any layer.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write or delete against a read-only service or path.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Write or truncate against a read-only file handle.
    #[error("read-only file handle")]
    ReadOnly,

    /// Cloud API failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// Malformed path handed to a provider.
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl Error {
    /// Classify a backend failure, keeping its display form for the logs.
    pub(crate) fn backend(err: impl std::fmt::Display) -> Self {
        Error::Backend(err.to_string())
    }

    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        Error::NotFound(path.into())
    }
}
