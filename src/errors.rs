//! Error taxonomy for the chat core.
//!
//! Failures are scoped to the smallest affected entity: one message send or
//! one appointment action never invalidates the rest of the store. Only the
//! Sync Coordinator's connection-level failures drive the global banner.

use thiserror::Error;

/// Errors surfaced by the chat core
#[derive(Debug, Error)]
pub enum ChatError {
    /// Local pre-submit validation failure; never reaches the network
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transient network failure; the action can be retried
    #[error("Network error: {0}")]
    Network(String),

    /// Bounded wait expired; treated as transient, not a rejection
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// 401-class failure, propagated to the session collaborator
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Server-detected double booking despite the client pre-check
    #[error("Scheduling conflict: {0}")]
    Conflict(String),

    /// Reconciliation found no matching temp id; resolved internally by
    /// appending the confirmed message, never shown to the user
    #[error("No optimistic entry for temp id {0}")]
    Stale(String),
}

impl ChatError {
    /// Whether the failed action may be resubmitted as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Network(_) | ChatError::Timeout(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ChatError::Validation(_))
    }
}
