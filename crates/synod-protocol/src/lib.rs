//! # Synod Protocol
//!
//! Wire definitions for the five directed queues of a single-decree Paxos
//! round.
//!
//! Every queue carries exactly one record type and lives at a fixed offset
//! from the proposer's base port:
//!
//! | offset | direction           | record       |
//! |--------|---------------------|--------------|
//! | 0      | acceptor → proposer | [`AcceptorUp`] |
//! | 1      | proposer → acceptor | [`Propose`]    |
//! | 2      | acceptor → proposer | [`Promise`]    |
//! | 3      | proposer → acceptor | [`Accept`]     |
//! | 4      | acceptor → proposer | [`Learn`]      |
//!
//! Records are flat, field-name keyed JSON objects. On a byte stream each
//! record is framed by [`JsonCodec`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod messages;

pub use codec::JsonCodec;
pub use error::{ProtocolError, Result};
pub use messages::{
    Accept, AcceptorStatus, AcceptorUp, Learn, Phase, ProposalNumber, ProposalValue, Promise,
    Propose, Record,
};

/// Default base port of the proposer's phase-0 queue.
pub const DEFAULT_BASE_PORT: u16 = 5555;

/// Maximum encoded record size in bytes (1 MiB).
pub const MAX_RECORD_SIZE: usize = 1024 * 1024;
