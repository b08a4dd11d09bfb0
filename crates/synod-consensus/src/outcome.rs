//! Round outcomes.

use std::fmt;

use serde::Serialize;
use synod_protocol::{Phase, ProposalNumber, ProposalValue};

/// The number and value a proposer puts forward in one round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ballot {
    /// Proposal number.
    pub num: ProposalNumber,
    /// Proposal value.
    pub val: ProposalValue,
}

impl Ballot {
    /// Creates a ballot.
    pub fn new(num: u64, val: impl Into<ProposalValue>) -> Self {
        Self {
            num: ProposalNumber(num),
            val: val.into(),
        }
    }
}

/// Why a proposer abandoned its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DefeatReason {
    /// Fewer promises than a majority arrived before the deadline.
    QuorumNotMet,
    /// A promise reported a number not strictly older than ours.
    StaleNumber,
    /// Fewer learns arrived than promises did.
    IncompleteLearn,
    /// A learn confirmed a different number or value than proposed.
    ConflictingLearn,
}

impl DefeatReason {
    /// All reasons, in the order they can occur in a round.
    pub const ALL: [DefeatReason; 4] = [
        DefeatReason::QuorumNotMet,
        DefeatReason::StaleNumber,
        DefeatReason::IncompleteLearn,
        DefeatReason::ConflictingLearn,
    ];

    /// Snake-case name used in logs and tallies.
    pub const fn as_str(self) -> &'static str {
        match self {
            DefeatReason::QuorumNotMet => "quorum_not_met",
            DefeatReason::StaleNumber => "stale_number",
            DefeatReason::IncompleteLearn => "incomplete_learn",
            DefeatReason::ConflictingLearn => "conflicting_learn",
        }
    }
}

impl fmt::Display for DefeatReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a proposer round ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RoundOutcome {
    /// Enough acceptors learned the value.
    Decided {
        /// The decided number.
        num: ProposalNumber,
        /// The decided value.
        val: ProposalValue,
    },
    /// The proposer gave up on its value.
    Defeated {
        /// Why.
        reason: DefeatReason,
    },
}

impl RoundOutcome {
    /// Returns true for [`RoundOutcome::Decided`].
    pub fn is_decided(&self) -> bool {
        matches!(self, RoundOutcome::Decided { .. })
    }

    /// The defeat reason, if any.
    pub fn defeat_reason(&self) -> Option<DefeatReason> {
        match self {
            RoundOutcome::Defeated { reason } => Some(*reason),
            RoundOutcome::Decided { .. } => None,
        }
    }
}

impl fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundOutcome::Decided { num, val } => write!(f, "decided num={num} val={val}"),
            RoundOutcome::Defeated { reason } => write!(f, "defeated ({reason})"),
        }
    }
}

/// How an acceptor round ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AcceptorOutcome {
    /// The acceptor took the proposer's value and confirmed it.
    Learned {
        /// The accepted number.
        num: ProposalNumber,
        /// The accepted value.
        val: ProposalValue,
    },
    /// The acceptor already held an equal or greater number.
    Stale {
        /// The number it held.
        held: ProposalNumber,
    },
    /// Nothing arrived on a queue before the timeout.
    TimedOut {
        /// The queue that stayed silent.
        phase: Phase,
    },
}

impl fmt::Display for AcceptorOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceptorOutcome::Learned { num, val } => write!(f, "learned num={num} val={val}"),
            AcceptorOutcome::Stale { held } => write!(f, "stale proposer (held {held})"),
            AcceptorOutcome::TimedOut { phase } => write!(f, "timed out waiting for {phase}"),
        }
    }
}
