//! Error types for the skill federation.
//!
//! Hard provider failures (transport, decoding) and caller cancellation are
//! the only things that surface here. Soft upstream failures are absorbed by
//! providers as empty results and never become errors.

use crate::types::SourceType;

/// Errors produced by sources and single-source federation operations.
#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    /// A request to an upstream provider failed in transit.
    #[error("transport error: {0}")]
    Transport(String),

    /// An upstream response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline passed before the operation finished.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The source's circuit is open after repeated failures.
    #[error("source {0} is temporarily unavailable")]
    SourceUnavailable(SourceType),

    /// A fan-out unit panicked or was aborted.
    #[error("source task failed: {0}")]
    Task(String),

    /// Invalid federation configuration.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error while loading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FederationError {
    /// Whether this error came from the caller's context rather than the source.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, FederationError>;
