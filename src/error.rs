//! Error type shared by the fetch engine, partitions, and the HTTP surface.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, MixerError>;

/// Errors surfaced by the mixer.
#[derive(Debug, Error)]
pub enum MixerError {
    /// Request arguments were rejected before any data was read.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Continuation token could not be decoded or does not fit the request.
    #[error("invalid pagination token: {0}")]
    InvalidToken(String),
    /// A backing import group failed to serve a read.
    #[error("partition '{partition}' read failed: {message}")]
    Partition {
        /// Import group name.
        partition: String,
        /// Failure reported by the backing store.
        message: String,
    },
    /// The request deadline elapsed while reads were in flight.
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),
    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
    /// Engine invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
    /// SQLite triples store failure.
    #[error("local store error: {0}")]
    Local(#[from] rusqlite::Error),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl MixerError {
    /// Builds a [`MixerError::Partition`] for the named import group.
    pub fn partition(partition: impl Into<String>, message: impl Into<String>) -> Self {
        MixerError::Partition {
            partition: partition.into(),
            message: message.into(),
        }
    }

    /// Builds a [`MixerError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        MixerError::Internal(message.into())
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            MixerError::InvalidArgument(_) => "INVALID_ARGUMENT",
            MixerError::InvalidToken(_) => "INVALID_TOKEN",
            MixerError::Partition { .. } => "PARTITION_UNAVAILABLE",
            MixerError::DeadlineExceeded(_) => "DEADLINE_EXCEEDED",
            MixerError::Cancelled => "CANCELLED",
            MixerError::Config(_) => "CONFIG",
            MixerError::Internal(_)
            | MixerError::Local(_)
            | MixerError::Io(_)
            | MixerError::Serialization(_) => "INTERNAL_ERROR",
        }
    }

    /// True when the caller supplied bad input; such errors are never retried.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            MixerError::InvalidArgument(_) | MixerError::InvalidToken(_)
        )
    }
}
