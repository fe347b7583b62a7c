//! Error types for the memory subsystem.

use serde_json::Error as SerdeError;
use thiserror::Error;

/// Errors emitted by memory components.
///
/// Store implementations use this type internally; the public store contract
/// converts it into `false` / unsuccessful results at the backend boundary.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Serialization or deserialization error.
    #[error("serialization error: {source}")]
    Serialization {
        /// Source [`serde_json::Error`].
        #[from]
        source: SerdeError,
    },
    /// Memory entry failed validation.
    #[error("invalid memory entry: {0}")]
    InvalidEntry(&'static str),
    /// Query parameters failed validation.
    #[error("invalid memory query: {0}")]
    InvalidQuery(&'static str),
    /// The backend could not be reached.
    #[error("backend unavailable: {reason}")]
    Unavailable {
        /// Human-readable reason describing the outage.
        reason: String,
    },
    /// Backend reported an application error.
    #[error("backend error: {reason}")]
    Backend {
        /// Human-readable reason describing the failure.
        reason: String,
    },
    /// Embedding provider failed to produce a vector.
    #[error("embedding error: {reason}")]
    Embedding {
        /// Human-readable reason describing the failure.
        reason: String,
    },
    /// Operation invoked on a store that has already been closed.
    #[error("store closed")]
    Closed,
}

impl MemoryError {
    /// Helper to construct backend errors from string-like values.
    #[must_use]
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }

    /// Helper to construct unavailability errors.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Helper to construct embedding errors.
    #[must_use]
    pub fn embedding(reason: impl Into<String>) -> Self {
        Self::Embedding {
            reason: reason.into(),
        }
    }

    /// Returns `true` for transient connectivity failures.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, MemoryError>;
