//! Error types for the stakeindex pipeline.

use thiserror::Error;

/// Errors that abort processing of a single chain event.
///
/// Every variant is fatal for the event that produced it. Handlers stage their
/// writes in a [`UnitOfWork`](crate::store::UnitOfWork), so an error means
/// nothing from that event reaches the store.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// A referenced entity that must already exist does not.
    #[error("Missing precondition: {0}")]
    MissingPrecondition(String),

    /// Required event fields are absent or structurally invalid.
    #[error("Malformed event '{event}': {reason}")]
    MalformedEvent { event: String, reason: String },

    /// The read-only chain-state query collaborator failed.
    #[error("Chain query failed: {0}")]
    ExternalQuery(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// A stored record could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProcessingError {
    pub fn malformed(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            event: event.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if the event stream itself is inconsistent (an entity
    /// the stream should already have produced is missing).
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::MissingPrecondition(_))
    }
}
