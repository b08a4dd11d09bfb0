//! Consensus error types.
//!
//! Only faults that end the process are errors. A round that times out, meets
//! a stale number or misses confirmations is reported through
//! [`RoundOutcome`](crate::RoundOutcome) and
//! [`AcceptorOutcome`](crate::AcceptorOutcome) instead.

use synod_transport::TransportError;
use thiserror::Error;

/// Fatal errors raised by a role.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// A round's queues could not be opened or a queue closed under a waiter.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A wait task panicked or was cancelled.
    #[error("wait task failed: {0}")]
    TaskFailed(String),

    /// Role configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A role reached a step its state does not allow.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// Result type for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;

impl From<tokio::task::JoinError> for ConsensusError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskFailed(err.to_string())
    }
}
