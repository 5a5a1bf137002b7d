//! Relay error taxonomy.
//!
//! Validation failures live in `voxrelay_core::envelope`; everything that can
//! go wrong after an envelope is accepted is described here.

use crate::registry::SessionId;

/// A destination could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("Target session not found: {session_id}")]
    TargetNotFound { session_id: String },
}

/// Writing to one connection failed. Only that session is affected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection closed: {session_id}")]
    Closed { session_id: SessionId },

    #[error("Outbound queue full, session stalled: {session_id}")]
    Backpressure { session_id: SessionId },
}

/// Journal persistence failure. Logged, never blocks delivery.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("Journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt journal at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}
