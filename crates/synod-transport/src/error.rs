//! Transport error types.

use std::net::SocketAddr;

use synod_protocol::Phase;
use thiserror::Error;

/// Errors that can occur while opening or using round queues.
///
/// All of these are fatal for the process: a role cannot take part in a
/// round whose queues it cannot open.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Binding a queue failed.
    #[error("failed to bind {phase} queue on {addr}: {source}")]
    Bind {
        /// The queue.
        phase: Phase,
        /// The address we tried to bind.
        addr: SocketAddr,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Connecting to a queue failed after all retries.
    #[error("failed to connect {phase} queue at {addr} after {attempts} attempts: {source}")]
    Connect {
        /// The queue.
        phase: Phase,
        /// The address we tried to reach.
        addr: String,
        /// Number of connection attempts made.
        attempts: u32,
        /// The last error seen.
        #[source]
        source: std::io::Error,
    },

    /// A base port leaves no room for all five queues.
    #[error("base port {0} leaves no room for five queues")]
    PortRange(u16),

    /// The in-memory endpoint is already bound by another proposer.
    #[error("queues already bound by another proposer")]
    AddressInUse,

    /// No proposer bound the in-memory queues in time.
    #[error("no proposer bound the queues within {0:?}")]
    NotBound(std::time::Duration),

    /// A queue was closed while a consumer was waiting on it.
    #[error("{0} queue closed")]
    Closed(Phase),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Builds a bind error.
    pub(crate) fn bind(phase: Phase, addr: SocketAddr, source: std::io::Error) -> Self {
        Self::Bind {
            phase,
            addr,
            source,
        }
    }
}
