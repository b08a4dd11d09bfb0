//! Node error types.

use synod_consensus::ConsensusError;
use synod_transport::TransportError;
use thiserror::Error;

/// Errors raised while configuring or running a role.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The configuration was loaded but is unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// Operator input could not be read or parsed.
    #[error("input error: {0}")]
    Input(String),

    /// A round failed fatally.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for NodeError {
    fn from(err: TransportError) -> Self {
        Self::Consensus(ConsensusError::Transport(err))
    }
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
