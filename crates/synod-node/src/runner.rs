//! Iteration loops.
//!
//! A role runs a fixed number of rounds. Every round opens fresh queues,
//! takes operator input, runs the round and closes the queues again; a pause
//! between rounds gives the transport time to release the previous round's
//! ports.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use synod_consensus::{
    Acceptor, AcceptorOutcome, ConsensusError, DefeatReason, Proposer, RoundOutcome,
};
use synod_protocol::ProposalNumber;
use synod_transport::{AcceptorEndpoint, MemoryHub, ProposerEndpoint};
use tracing::{info, Instrument};

use crate::ballot::{parse_held, BallotSource, HeldSource};
use crate::{NodeConfig, Result};

/// Proposer results over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposerTally {
    /// Rounds decided.
    pub decided: u32,
    /// Rounds lost, by reason.
    pub defeated: HashMap<DefeatReason, u32>,
}

impl ProposerTally {
    /// Counts one outcome.
    pub fn record(&mut self, outcome: &RoundOutcome) {
        match outcome.defeat_reason() {
            Some(reason) => *self.defeated.entry(reason).or_default() += 1,
            None => self.decided += 1,
        }
    }

    /// Rounds lost for `reason`.
    pub fn defeated_by(&self, reason: DefeatReason) -> u32 {
        self.defeated.get(&reason).copied().unwrap_or(0)
    }
}

impl fmt::Display for ProposerTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decided={}", self.decided)?;
        for reason in DefeatReason::ALL {
            write!(f, " {reason}={}", self.defeated_by(reason))?;
        }
        Ok(())
    }
}

/// Acceptor results over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptorTally {
    /// Rounds that ended with a learn sent.
    pub learned: u32,
    /// Rounds against a stale proposer.
    pub stale: u32,
    /// Rounds where the proposer went quiet.
    pub timed_out: u32,
}

impl AcceptorTally {
    /// Counts one outcome.
    pub fn record(&mut self, outcome: &AcceptorOutcome) {
        match outcome {
            AcceptorOutcome::Learned { .. } => self.learned += 1,
            AcceptorOutcome::Stale { .. } => self.stale += 1,
            AcceptorOutcome::TimedOut { .. } => self.timed_out += 1,
        }
    }
}

impl fmt::Display for AcceptorTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "learned={} stale={} timed_out={}",
            self.learned, self.stale, self.timed_out
        )
    }
}

/// Runs `iters` proposer rounds.
pub async fn run_proposer(
    endpoint: &dyn ProposerEndpoint,
    proposer: &mut Proposer,
    ballots: &mut BallotSource,
    iters: u32,
    round_pause: Duration,
) -> Result<ProposerTally> {
    let mut tally = ProposerTally::default();
    info!(endpoint = %endpoint.describe(), iters, "running proposer");

    for iter in 1..=iters {
        let channels = endpoint.open().await?;
        let ballot = ballots.next_ballot().await?;
        let outcome = proposer.run_round(channels, ballot).await?;
        info!(iter, iters, %outcome, "round complete");
        tally.record(&outcome);

        if iter < iters {
            tokio::time::sleep(round_pause).await;
        }
    }

    Ok(tally)
}

/// Runs `iters` acceptor rounds.
pub async fn run_acceptor(
    endpoint: &dyn AcceptorEndpoint,
    acceptor: &mut Acceptor,
    held: &mut HeldSource,
    iters: u32,
    round_pause: Duration,
) -> Result<AcceptorTally> {
    let mut tally = AcceptorTally::default();
    info!(endpoint = %endpoint.describe(), iters, "running acceptor");

    for iter in 1..=iters {
        let channels = endpoint.open().await?;
        let number = held.next_held().await?;
        let outcome = acceptor.run_round(channels, number).await?;
        info!(iter, iters, %outcome, "round complete");
        tally.record(&outcome);

        if iter < iters {
            tokio::time::sleep(round_pause).await;
        }
    }

    Ok(tally)
}

/// Results of [`simulate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationReport {
    /// The proposer's tally.
    pub proposer: ProposerTally,
    /// One tally per acceptor.
    pub acceptors: Vec<AcceptorTally>,
}

/// Runs one proposer and `quorum` acceptors in this process over a
/// [`MemoryHub`].
///
/// Ballots come from `proposer.numbers`/`proposer.values`, or count up from
/// 1 when those are empty. Entry `i` of `acceptor.held` is the number
/// acceptor `i` holds at the start of every round, cycling over the list;
/// missing entries hold nothing.
pub async fn simulate(config: &NodeConfig) -> Result<SimulationReport> {
    let settings = &config.proposer;
    let iters = settings.iters;

    let mut ballots = if settings.numbers.is_empty() {
        let numbers: Vec<u64> = (1..=u64::from(iters)).collect();
        let values: Vec<String> = numbers.iter().map(|n| format!("value-{n}")).collect();
        BallotSource::from_lists(&numbers, &values)?
    } else {
        BallotSource::from_lists(&settings.numbers, &settings.values)?
    };

    let held: Vec<Option<ProposalNumber>> = config
        .acceptor
        .held
        .iter()
        .map(|s| parse_held(s))
        .collect::<Result<_>>()?;

    let hub = MemoryHub::new();
    let mut acceptors = Vec::with_capacity(settings.quorum);
    for index in 0..settings.quorum {
        let endpoint = hub.acceptor(config.acceptor.connect_timeout());
        let mut acceptor = Acceptor::new(config.acceptor.consensus());
        let mut source = HeldSource::fixed(if held.is_empty() {
            None
        } else {
            held[index % held.len()]
        });
        let span = tracing::info_span!("acceptor", index);
        acceptors.push(tokio::spawn(
            async move {
                run_acceptor(&endpoint, &mut acceptor, &mut source, iters, Duration::ZERO).await
            }
            .instrument(span),
        ));
    }

    let mut proposer = Proposer::new(settings.consensus())?;
    let proposer_tally = run_proposer(
        &hub.proposer(),
        &mut proposer,
        &mut ballots,
        iters,
        settings.round_pause(),
    )
    .instrument(tracing::info_span!("proposer"))
    .await?;

    let mut acceptor_tallies = Vec::with_capacity(acceptors.len());
    for handle in acceptors {
        acceptor_tallies.push(handle.await.map_err(ConsensusError::from)??);
    }

    Ok(SimulationReport {
        proposer: proposer_tally,
        acceptors: acceptor_tallies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use synod_protocol::ProposalValue;

    #[test]
    fn proposer_tally_counts_by_reason() {
        let mut tally = ProposerTally::default();
        tally.record(&RoundOutcome::Decided {
            num: ProposalNumber(1),
            val: ProposalValue::text("a"),
        });
        tally.record(&RoundOutcome::Defeated {
            reason: DefeatReason::StaleNumber,
        });
        tally.record(&RoundOutcome::Defeated {
            reason: DefeatReason::StaleNumber,
        });

        assert_eq!(tally.decided, 1);
        assert_eq!(tally.defeated_by(DefeatReason::StaleNumber), 2);
        assert_eq!(
            tally.to_string(),
            "decided=1 quorum_not_met=0 stale_number=2 incomplete_learn=0 conflicting_learn=0"
        );
    }

    #[test]
    fn acceptor_tally_renders() {
        let mut tally = AcceptorTally::default();
        tally.record(&AcceptorOutcome::Stale {
            held: ProposalNumber(4),
        });
        assert_eq!(tally.to_string(), "learned=0 stale=1 timed_out=0");
    }
}
