//! # Synod Transport
//!
//! Directed queues that carry one Paxos round between a proposer and its
//! acceptors.
//!
//! A round uses five queues, one per [`Phase`](synod_protocol::Phase). The
//! proposer *binds* all five at `base_port + offset`; each acceptor
//! *connects* to them. Every queue has a single consumer and any number of
//! producers:
//!
//! - An [`Inbox`] is the consuming end. It is FIFO and unbounded.
//! - An [`Outbox`] is a producing end. On the bound side it round-robins each
//!   record over the connected consumers; on the connected side it forwards to
//!   the one peer it connected to.
//!
//! [`ProposerChannels`] and [`AcceptorChannels`] group the five ends of one
//! round. They are created by an endpoint ([`ProposerEndpoint`] /
//! [`AcceptorEndpoint`]) at the start of every round and dropping them
//! releases the round's ports.
//!
//! Two endpoint families are provided:
//!
//! - [`tcp`]: real sockets, one TCP connection per queue per acceptor.
//! - [`memory`]: the same semantics inside one process, for tests and
//!   simulation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod channels;
mod error;
pub mod memory;
mod queue;
pub mod tcp;

pub use channels::{AcceptorChannels, AcceptorEndpoint, ProposerChannels, ProposerEndpoint};
pub use error::{Result, TransportError};
pub use memory::MemoryHub;
pub use queue::{channel, Inbox, Outbox};
pub use tcp::{ConnectPolicy, TcpAcceptorEndpoint, TcpProposerEndpoint};

use std::time::Duration;

use tokio::time::Instant;

/// Default time an acceptor keeps retrying to reach the proposer's queues.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// The instant `limit` from now, saturating about thirty years out.
pub fn deadline_after(limit: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(limit).unwrap_or(now + FAR_FUTURE)
}
