//! Unified error types for the anvil core engine.
//!
//! Framework-level errors share a common shape: benign conditions (duplicate
//! updates, rate-limited updates) are *not* errors and never appear here —
//! they are accounted in [`StatsCollector`](crate::stats::StatsCollector)
//! instead. Cancellation is modeled explicitly so callers can tell an
//! intentional shutdown apart from a genuine failure.

use thiserror::Error;

/// Boxed error type used for handler failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Queue Errors
// =============================================================================

/// Errors that can occur on the bounded update queue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The operation was cancelled by the caller's cancellation token.
    #[error("queue operation cancelled")]
    Cancelled,

    /// The queue has been completed and no longer accepts new items.
    #[error("queue closed for writing")]
    Closed,
}

// =============================================================================
// Pipeline Errors
// =============================================================================

/// Errors produced while assembling the middleware pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// `add` was called after `build` froze the pipeline.
    #[error("pipeline is already built and frozen")]
    Frozen,
}

// =============================================================================
// Dispatch Errors
// =============================================================================

/// Errors raised while an update travels through the pipeline.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The update's cancellation token fired mid-flight.
    ///
    /// This indicates an intentional shutdown, not a failure; every
    /// middleware swallows it without logging.
    #[error("update processing cancelled")]
    Cancelled,

    /// A matched handler returned an error.
    #[error("handler '{handler}' failed: {source}")]
    Handler {
        /// Name of the handler that failed.
        handler: String,
        /// The underlying failure.
        #[source]
        source: BoxError,
    },

    /// The state backend failed during dedup or rate limiting.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl DispatchError {
    /// Wraps a handler failure with its handler name.
    pub fn handler(name: impl Into<String>, source: BoxError) -> Self {
        Self::Handler {
            handler: name.into(),
            source,
        }
    }

    /// Returns `true` if this error represents intentional cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// =============================================================================
// Collaborator Errors
// =============================================================================

/// Errors surfaced by a [`StateBackend`](crate::state::StateBackend).
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The backend is unreachable.
    #[error("state backend unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded as the requested type.
    #[error("failed to decode value for key '{key}': {reason}")]
    Decode {
        /// The offending key.
        key: String,
        /// Reason for failure.
        reason: String,
    },

    /// Internal backend error.
    #[error("state backend error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Creates an internal backend error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Errors surfaced by a [`TransportClient`](crate::transport::TransportClient).
#[derive(Debug, Clone, Error)]
pub enum SendError {
    /// The transport is not connected.
    #[error("transport not connected")]
    NotConnected,

    /// The send was cancelled.
    #[error("send cancelled")]
    Cancelled,

    /// Message send failed.
    #[error("failed to send message: {0}")]
    Failed(String),
}

/// Errors surfaced by an [`UpdateSource`](crate::source::UpdateSource).
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The source failed to start producing updates.
    #[error("source failed to start: {0}")]
    StartFailed(String),

    /// Internal source error.
    #[error("source error: {0}")]
    Internal(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Result type for pipeline invocations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Result type for state backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
