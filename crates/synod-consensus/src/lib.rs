//! # Synod Consensus
//!
//! Single-decree Paxos between one proposer and a fixed quorum of acceptors,
//! run over many independent rounds.
//!
//! A round moves through five queues opened by
//! [`synod_transport`]:
//!
//! ```text
//! ┌──────────┐  acceptor_up (0)   ┌──────────┐
//! │          │◀───────────────────│          │
//! │          │  propose (1)       │          │
//! │          │───────────────────▶│          │
//! │ Proposer │  promise (2)       │ Acceptor │ × N
//! │          │◀───────────────────│          │
//! │          │  accept (3)        │          │
//! │          │───────────────────▶│          │
//! │          │  learn (4)         │          │
//! │          │◀───────────────────│          │
//! └──────────┘                    └──────────┘
//! ```
//!
//! # Components
//!
//! - [`QuorumWait`]: a task that gathers a target number of records from one
//!   queue, with or without a deadline.
//! - [`Proposer`] / [`ProposerRound`]: barrier, propose, promise evaluation,
//!   accept and learn evaluation. A round ends [`RoundOutcome::Decided`] or
//!   [`RoundOutcome::Defeated`].
//! - [`Acceptor`] / [`AcceptorRound`]: promise on a newer number, always reply
//!   to a propose, take the accepted value and confirm it.
//! - [`DelayInjector`]: random latency before every send and receive.
//!
//! Timeouts, stale numbers and missing confirmations are round outcomes, not
//! errors. [`ConsensusError`] is reserved for faults that end the process.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod acceptor;
mod delay;
mod error;
mod outcome;
mod proposer;
mod quorum;

pub use acceptor::{Acceptor, AcceptorConfig, AcceptorRecord, AcceptorRound, AcceptorState};
pub use delay::DelayInjector;
pub use error::{ConsensusError, Result};
pub use outcome::{AcceptorOutcome, Ballot, DefeatReason, RoundOutcome};
pub use proposer::{
    majority, Proposer, ProposerConfig, ProposerRecord, ProposerRound, ProposerState,
};
pub use quorum::{await_quorum, QuorumWait};
