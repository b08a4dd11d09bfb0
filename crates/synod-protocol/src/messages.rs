//! Record definitions for the five round queues.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A proposal number.
///
/// Numbers are chosen by an operator per round and only ever compared; a
/// number that is greater than or equal to another one makes the other stale.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ProposalNumber(pub u64);

impl ProposalNumber {
    /// Returns true if holding `self` makes a proposal numbered `incoming`
    /// stale, i.e. `self >= incoming`.
    #[must_use]
    pub fn supersedes(self, incoming: ProposalNumber) -> bool {
        self >= incoming
    }
}

impl fmt::Display for ProposalNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ProposalNumber {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

/// An opaque proposal value.
///
/// Any JSON value is accepted on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalValue(pub serde_json::Value);

impl ProposalValue {
    /// Creates a string value.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self(serde_json::Value::String(s.into()))
    }
}

impl fmt::Display for ProposalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            serde_json::Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

impl From<&str> for ProposalValue {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

impl From<i64> for ProposalValue {
    fn from(n: i64) -> Self {
        Self(serde_json::Value::from(n))
    }
}

/// The queue a record travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum Phase {
    /// Acceptor liveness announcements.
    AcceptorUp = 0,
    /// Proposer's prepare request.
    Propose = 1,
    /// Acceptor's reply to a propose.
    Promise = 2,
    /// Proposer's accept request.
    Accept = 3,
    /// Acceptor's confirmation of an accepted value.
    Learn = 4,
}

impl Phase {
    /// All phases in port order.
    pub const ALL: [Phase; 5] = [
        Phase::AcceptorUp,
        Phase::Propose,
        Phase::Promise,
        Phase::Accept,
        Phase::Learn,
    ];

    /// Offset of this phase's queue from the base port.
    #[must_use]
    pub const fn offset(self) -> u16 {
        self as u16
    }

    /// Port of this phase's queue, or `None` if it would overflow.
    #[must_use]
    pub fn port(self, base: u16) -> Option<u16> {
        base.checked_add(self.offset())
    }

    /// Returns the phase name for logging.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Phase::AcceptorUp => "acceptor_up",
            Phase::Propose => "propose",
            Phase::Promise => "promise",
            Phase::Accept => "accept",
            Phase::Learn => "learn",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A record that travels on exactly one queue.
pub trait Record: Serialize + DeserializeOwned + fmt::Debug + Send + 'static {
    /// The queue this record belongs to.
    const PHASE: Phase;
}

/// Acceptor status carried by [`AcceptorUp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceptorStatus {
    /// The acceptor has connected its queues and is ready for the round.
    Up,
}

/// `{"status": "up"}`, sent once per round by every acceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptorUp {
    /// Always [`AcceptorStatus::Up`].
    pub status: AcceptorStatus,
}

impl AcceptorUp {
    /// Creates the liveness record.
    #[must_use]
    pub const fn up() -> Self {
        Self {
            status: AcceptorStatus::Up,
        }
    }
}

impl Record for AcceptorUp {
    const PHASE: Phase = Phase::AcceptorUp;
}

/// `{"id": i, "num": n}`, the proposer's prepare request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Propose {
    /// Ordinal assigned by the proposer; echoed back by the acceptor.
    pub id: u32,
    /// The proposal number.
    pub num: ProposalNumber,
}

impl Record for Propose {
    const PHASE: Phase = Phase::Propose;
}

/// `{"id": i, "prop_num": n | null}`, an acceptor's reply to a propose.
///
/// `prop_num` is the number the acceptor held before the propose arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promise {
    /// Ordinal from the propose.
    pub id: u32,
    /// Number held before the propose, if any.
    pub prop_num: Option<ProposalNumber>,
}

impl Promise {
    /// Returns true if this promise reports a number that is not strictly
    /// older than `proposed`. An unset number never does.
    #[must_use]
    pub fn reports_stale(&self, proposed: ProposalNumber) -> bool {
        self.prop_num.is_some_and(|held| held.supersedes(proposed))
    }
}

impl Record for Promise {
    const PHASE: Phase = Phase::Promise;
}

/// `{"num": n, "val": v}`, the proposer's accept request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accept {
    /// The proposal number.
    pub num: ProposalNumber,
    /// The proposal value.
    pub val: ProposalValue,
}

impl Record for Accept {
    const PHASE: Phase = Phase::Accept;
}

/// `{"id": i, "prop_num": n, "prop_val": v}`, an acceptor's confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learn {
    /// Ordinal from the propose.
    pub id: u32,
    /// The accepted number.
    pub prop_num: ProposalNumber,
    /// The accepted value.
    pub prop_val: ProposalValue,
}

impl Record for Learn {
    const PHASE: Phase = Phase::Learn;
}
