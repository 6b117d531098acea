//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("invalid label: {0}")]
    InvalidLabel(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
