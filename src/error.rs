//! Error types for the queue engine
//!
//! All errors implement `std::error::Error` via `thiserror::Error`.
//!
//! # Error Handling
//!
//! The [`QueueError`] enum covers:
//! - Queue store rejections (duplicate entry, capacity exceeded, not found)
//! - Internal invariant violations (`IndexOutOfRange`)
//! - Persistence and upstream connectivity failures
//!
//! Every queue store operation leaves state untouched when it returns an error.
//!
//! # Example
//!
//! ```rust,ignore
//! use line_queue::QueueError;
//!
//! match engine.delete("open-id").await {
//!     Ok(_seq) => {}
//!     Err(QueueError::NotFound(id)) => tracing::debug!("{} is not queued", id),
//!     Err(e) => tracing::error!("delete failed: {}", e),
//! }
//! ```

use crate::entry::{OpenId, Tier};
use thiserror::Error;

/// Queue engine error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    /// The viewer already holds a position in some tier
    #[error("Viewer already queued: {0}")]
    DuplicateEntry(OpenId),

    /// The common line is full
    #[error("Common line is full (capacity {capacity})")]
    CapacityExceeded { capacity: usize },

    /// The viewer is not in any tier
    #[error("Viewer not queued: {0}")]
    NotFound(OpenId),

    /// An identity index points outside its sequence
    #[error("Stale {tier} index {index} for {open_id} (line length {len})")]
    IndexOutOfRange {
        tier: Tier,
        index: usize,
        len: usize,
        open_id: OpenId,
    },

    /// Nothing to act on; callers treat this as a no-op
    #[error("Queue is empty")]
    Empty,

    /// Empty OpenID supplied
    #[error("OpenID must not be empty")]
    InvalidOpenId,

    /// Persistence failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Live platform connection failure
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Engine is shutting down
    #[error("Queue engine is shutting down")]
    ShutdownInProgress,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl QueueError {
    /// True for the no-op condition that callers should not treat as a failure
    pub fn is_empty(&self) -> bool {
        matches!(self, QueueError::Empty)
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

/// Result type alias using QueueError
pub type Result<T> = std::result::Result<T, QueueError>;
