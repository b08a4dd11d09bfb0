//! Proposer role.
//!
//! ```text
//! START → BARRIER → PROPOSE_SENT → PROMISE_WAIT → (DEFEATED | ACCEPT_SENT)
//!       → LEARN_WAIT → (DEFEATED | DECIDED)
//! ```
//!
//! Every round starts from a fresh [`ProposerRound`]; nothing but the
//! configuration carries over from one round to the next.

use std::time::Duration;

use synod_protocol::{
    Accept, AcceptorUp, Learn, Promise, ProposalNumber, ProposalValue, Propose,
};
use synod_transport::{Inbox, Outbox, ProposerChannels};
use tracing::{debug, info, warn};

use crate::quorum::QuorumWait;
use crate::{Ballot, ConsensusError, DefeatReason, DelayInjector, Result, RoundOutcome};

/// Smallest number of acceptors that forms a majority of `quorum`.
pub const fn majority(quorum: usize) -> usize {
    quorum / 2 + 1
}

/// Proposer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposerConfig {
    /// Number of acceptors addressed every round.
    pub quorum: usize,
    /// Deadline for gathering promises and, separately, learns.
    pub timeout: Duration,
    /// Upper bound of the injected latency.
    pub max_delay: Duration,
    /// Also require every learn to carry the proposed number and value.
    pub strict_learn: bool,
}

impl Default for ProposerConfig {
    fn default() -> Self {
        Self {
            quorum: 3,
            timeout: Duration::from_secs(10),
            max_delay: Duration::from_secs(5),
            strict_learn: false,
        }
    }
}

impl ProposerConfig {
    /// Checks that the configuration can run a round.
    pub fn validate(&self) -> Result<()> {
        if self.quorum == 0 {
            return Err(ConsensusError::InvalidConfig(
                "quorum must be at least 1".into(),
            ));
        }
        if u32::try_from(self.quorum).is_err() {
            return Err(ConsensusError::InvalidConfig(format!(
                "quorum {} does not fit an acceptor id",
                self.quorum
            )));
        }
        Ok(())
    }
}

/// Where a proposer round stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposerState {
    /// Nothing done yet.
    Start,
    /// Waiting for every acceptor to announce itself.
    Barrier,
    /// Propose requests are out.
    ProposeSent,
    /// Gathering promises.
    PromiseWait,
    /// Accept requests are out.
    AcceptSent,
    /// Gathering learns.
    LearnWait,
    /// The value was abandoned.
    Defeated,
    /// The value was learned.
    Decided,
}

/// Per-round proposer bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposerRecord {
    quorum: usize,
    majority: usize,
    prop_num: ProposalNumber,
    prop_val: ProposalValue,
    responders: usize,
    defeat: Option<DefeatReason>,
}

impl ProposerRecord {
    fn new(quorum: usize, ballot: Ballot) -> Self {
        Self {
            quorum,
            majority: majority(quorum),
            prop_num: ballot.num,
            prop_val: ballot.val,
            responders: 0,
            defeat: None,
        }
    }

    /// Number of acceptors addressed.
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Promises needed to continue.
    pub fn majority(&self) -> usize {
        self.majority
    }

    /// The proposed number.
    pub fn prop_num(&self) -> ProposalNumber {
        self.prop_num
    }

    /// The proposed value.
    pub fn prop_val(&self) -> &ProposalValue {
        &self.prop_val
    }

    /// Promises received before the deadline.
    pub fn responders(&self) -> usize {
        self.responders
    }

    /// True once the round is lost.
    pub fn defeated(&self) -> bool {
        self.defeat.is_some()
    }

    /// Why the round was lost.
    pub fn defeat_reason(&self) -> Option<DefeatReason> {
        self.defeat
    }

    // The first reason sticks for the rest of the round
    fn defeat(&mut self, reason: DefeatReason) -> DefeatReason {
        *self.defeat.get_or_insert(reason)
    }
}

/// Runs proposer rounds.
#[derive(Debug)]
pub struct Proposer {
    config: ProposerConfig,
    delay: DelayInjector,
    rounds: u64,
}

impl Proposer {
    /// Creates a proposer.
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::InvalidConfig`] for an empty quorum.
    pub fn new(config: ProposerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            delay: DelayInjector::new(config.max_delay),
            config,
            rounds: 0,
        })
    }

    /// The configuration.
    pub fn config(&self) -> &ProposerConfig {
        &self.config
    }

    /// Rounds started so far.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Starts a fresh round for `ballot`.
    pub fn begin(&mut self, ballot: Ballot) -> ProposerRound {
        self.rounds += 1;
        ProposerRound::new(self.rounds, &self.config, self.delay, ballot)
    }

    /// Runs one complete round over `channels` and closes them.
    ///
    /// # Errors
    ///
    /// Only fatal faults are errors; a lost round is
    /// [`RoundOutcome::Defeated`].
    pub async fn run_round(
        &mut self,
        channels: ProposerChannels,
        ballot: Ballot,
    ) -> Result<RoundOutcome> {
        let mut round = self.begin(ballot);
        info!(
            round = round.round,
            num = %round.record.prop_num,
            val = %round.record.prop_val,
            quorum = round.record.quorum,
            "starting proposer round"
        );

        round.barrier(channels.up).await?;
        round.send_propose(&channels.propose).await;

        let promises = round.collect_promises(channels.promise).await?;
        if round.evaluate_promises(&promises).is_some() {
            return Ok(round.finish());
        }

        round.send_accept(&channels.accept).await;
        let learns = round.collect_learns(channels.learn).await?;
        round.evaluate_learns(&learns);

        Ok(round.finish())
    }
}

/// One proposer round.
#[derive(Debug)]
pub struct ProposerRound {
    round: u64,
    quorum_timeout: Duration,
    strict_learn: bool,
    delay: DelayInjector,
    record: ProposerRecord,
    state: ProposerState,
}

impl ProposerRound {
    fn new(round: u64, config: &ProposerConfig, delay: DelayInjector, ballot: Ballot) -> Self {
        Self {
            round,
            quorum_timeout: config.timeout,
            strict_learn: config.strict_learn,
            delay,
            record: ProposerRecord::new(config.quorum, ballot),
            state: ProposerState::Start,
        }
    }

    /// Round number, starting at 1.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// The round's bookkeeping.
    pub fn record(&self) -> &ProposerRecord {
        &self.record
    }

    /// Where the round stands.
    pub fn state(&self) -> ProposerState {
        self.state
    }

    /// Waits, without deadline, for `quorum` acceptors to announce
    /// themselves.
    pub async fn barrier(&mut self, up: Inbox<AcceptorUp>) -> Result<usize> {
        self.state = ProposerState::Barrier;
        let ups = QuorumWait::spawn(up, self.record.quorum, None, self.delay)
            .join()
            .await?;
        info!(round = self.round, acceptors = ups.len(), "all acceptors up");
        Ok(ups.len())
    }

    /// Sends one propose per acceptor after a single injected delay.
    pub async fn send_propose(&mut self, propose: &Outbox<Propose>) {
        let connected = propose
            .wait_for_peers(self.record.quorum, self.quorum_timeout)
            .await;
        if connected < self.record.quorum {
            warn!(
                round = self.round,
                connected,
                quorum = self.record.quorum,
                "not every acceptor is connected to the propose queue"
            );
        }

        self.delay.pause("propose").await;
        let num = self.record.prop_num;
        let mut delivered = 0;
        for id in 0..self.record.quorum {
            let msg = Propose { id: id as u32, num };
            debug!(round = self.round, ?msg, "sending propose");
            delivered += usize::from(propose.send(msg).await);
        }
        debug!(round = self.round, delivered, "proposes sent");
        self.state = ProposerState::ProposeSent;
    }

    /// Gathers promises until every acceptor answered or the deadline passed.
    pub async fn collect_promises(&mut self, promise: Inbox<Promise>) -> Result<Vec<Promise>> {
        self.state = ProposerState::PromiseWait;
        QuorumWait::spawn(
            promise,
            self.record.quorum,
            Some(self.quorum_timeout),
            self.delay,
        )
        .join()
        .await
    }

    /// Applies the promise rules and records the number of responders.
    ///
    /// The round is lost if fewer than a majority answered, or if any answer
    /// reports a number at least as high as ours.
    pub fn evaluate_promises(&mut self, promises: &[Promise]) -> Option<DefeatReason> {
        self.record.responders = promises.len();
        info!(
            round = self.round,
            responders = self.record.responders,
            quorum = self.record.quorum,
            "promises gathered"
        );

        if self.record.responders < self.record.majority {
            warn!(
                round = self.round,
                responders = self.record.responders,
                majority = self.record.majority,
                "majority of promises not received"
            );
            return Some(self.defeat(DefeatReason::QuorumNotMet));
        }

        let num = self.record.prop_num;
        if let Some(stale) = promises.iter().find(|p| p.reports_stale(num)) {
            warn!(
                round = self.round,
                acceptor = stale.id,
                reported = ?stale.prop_num,
                num = %num,
                "acceptor holds an equal or higher number"
            );
            return Some(self.defeat(DefeatReason::StaleNumber));
        }

        None
    }

    /// Sends the accept request to every acceptor after one injected delay,
    /// whether or not it promised.
    ///
    /// Acceptors that already gave up on the round are skipped; their missing
    /// learns defeat the round.
    pub async fn send_accept(&mut self, accept: &Outbox<Accept>) {
        self.delay.pause("accept").await;
        let mut delivered = 0;
        for _ in 0..self.record.quorum {
            let msg = Accept {
                num: self.record.prop_num,
                val: self.record.prop_val.clone(),
            };
            debug!(round = self.round, ?msg, "sending accept");
            delivered += usize::from(accept.send(msg).await);
        }
        if delivered < self.record.quorum {
            warn!(
                round = self.round,
                delivered,
                quorum = self.record.quorum,
                "some accept requests found no acceptor"
            );
        }
        self.state = ProposerState::AcceptSent;
    }

    /// Gathers learns until every acceptor answered or the deadline passed.
    pub async fn collect_learns(&mut self, learn: Inbox<Learn>) -> Result<Vec<Learn>> {
        self.state = ProposerState::LearnWait;
        QuorumWait::spawn(
            learn,
            self.record.quorum,
            Some(self.quorum_timeout),
            self.delay,
        )
        .join()
        .await
    }

    /// Applies the learn rules.
    ///
    /// Every acceptor that promised must confirm. With `strict_learn` each
    /// confirmation must also carry exactly the proposed number and value.
    pub fn evaluate_learns(&mut self, learns: &[Learn]) -> Option<DefeatReason> {
        if learns.len() < self.record.responders {
            warn!(
                round = self.round,
                learned = learns.len(),
                responders = self.record.responders,
                "learn confirmations missing"
            );
            return Some(self.defeat(DefeatReason::IncompleteLearn));
        }

        if self.strict_learn {
            let conflicting = learns.iter().find(|l| {
                l.prop_num != self.record.prop_num || l.prop_val != self.record.prop_val
            });
            if let Some(learn) = conflicting {
                warn!(
                    round = self.round,
                    acceptor = learn.id,
                    num = %learn.prop_num,
                    val = %learn.prop_val,
                    "learn confirms a different proposal"
                );
                return Some(self.defeat(DefeatReason::ConflictingLearn));
            }
        }

        None
    }

    fn defeat(&mut self, reason: DefeatReason) -> DefeatReason {
        self.state = ProposerState::Defeated;
        self.record.defeat(reason)
    }

    /// Ends the round and reports its outcome.
    pub fn finish(mut self) -> RoundOutcome {
        let outcome = match self.record.defeat {
            Some(reason) => RoundOutcome::Defeated { reason },
            None => {
                self.state = ProposerState::Decided;
                RoundOutcome::Decided {
                    num: self.record.prop_num,
                    val: self.record.prop_val.clone(),
                }
            }
        };
        info!(round = self.round, state = ?self.state, %outcome, "proposer round finished");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use synod_protocol::Phase;
    use synod_transport::channel;

    fn round(quorum: usize, num: u64) -> ProposerRound {
        let config = ProposerConfig {
            quorum,
            max_delay: Duration::ZERO,
            ..Default::default()
        };
        let mut proposer = Proposer::new(config).unwrap();
        proposer.begin(Ballot::new(num, "v"))
    }

    fn fresh(id: u32) -> Promise {
        Promise { id, prop_num: None }
    }

    fn learn(id: u32, num: u64, val: &str) -> Learn {
        Learn {
            id,
            prop_num: ProposalNumber(num),
            prop_val: ProposalValue::text(val),
        }
    }

    #[test]
    fn majority_examples() {
        assert_eq!(majority(1), 1);
        assert_eq!(majority(3), 2);
        assert_eq!(majority(4), 3);
        assert_eq!(majority(5), 3);
    }

    #[test]
    fn empty_quorum_is_rejected() {
        let config = ProposerConfig {
            quorum: 0,
            ..Default::default()
        };
        assert!(matches!(
            Proposer::new(config),
            Err(ConsensusError::InvalidConfig(_))
        ));
    }

    #[test]
    fn too_few_promises_lose_the_round() {
        let mut round = round(5, 5);
        let reason = round.evaluate_promises(&[fresh(0), fresh(1)]);
        assert_eq!(reason, Some(DefeatReason::QuorumNotMet));
        assert_eq!(round.record().responders(), 2);
        assert_eq!(round.state(), ProposerState::Defeated);
    }

    #[test]
    fn one_stale_promise_loses_the_round() {
        let mut round = round(3, 5);
        let stale = Promise {
            id: 2,
            prop_num: Some(ProposalNumber(7)),
        };
        let reason = round.evaluate_promises(&[fresh(0), fresh(1), stale]);
        assert_eq!(reason, Some(DefeatReason::StaleNumber));
    }

    #[test]
    fn equal_number_is_stale() {
        let mut round = round(1, 5);
        let equal = Promise {
            id: 0,
            prop_num: Some(ProposalNumber(5)),
        };
        assert_eq!(
            round.evaluate_promises(&[equal]),
            Some(DefeatReason::StaleNumber)
        );
    }

    #[test]
    fn learn_check_compares_against_responders() {
        let mut round = round(3, 5);
        assert_eq!(
            round.evaluate_promises(&[fresh(0), fresh(1), fresh(2)]),
            None
        );

        let reason = round.evaluate_learns(&[learn(0, 5, "v"), learn(1, 5, "v")]);
        assert_eq!(reason, Some(DefeatReason::IncompleteLearn));
    }

    #[test]
    fn first_defeat_reason_sticks() {
        let mut round = round(3, 5);
        round.evaluate_promises(&[fresh(0)]);
        round.evaluate_learns(&[]);
        assert_eq!(
            round.record().defeat_reason(),
            Some(DefeatReason::QuorumNotMet)
        );
        assert_eq!(
            round.finish(),
            RoundOutcome::Defeated {
                reason: DefeatReason::QuorumNotMet
            }
        );
    }

    #[test]
    fn count_only_learn_ignores_values() {
        let mut round = round(2, 5);
        round.evaluate_promises(&[fresh(0), fresh(1)]);
        assert_eq!(
            round.evaluate_learns(&[learn(0, 5, "v"), learn(1, 9, "other")]),
            None
        );
        assert!(round.finish().is_decided());
    }

    #[test]
    fn strict_learn_rejects_conflicting_value() {
        let config = ProposerConfig {
            quorum: 2,
            max_delay: Duration::ZERO,
            strict_learn: true,
            ..Default::default()
        };
        let mut proposer = Proposer::new(config).unwrap();
        let mut round = proposer.begin(Ballot::new(5, "v"));

        round.evaluate_promises(&[fresh(0), fresh(1)]);
        assert_eq!(
            round.evaluate_learns(&[learn(0, 5, "v"), learn(1, 5, "other")]),
            Some(DefeatReason::ConflictingLearn)
        );
    }

    #[test]
    fn rounds_start_clean() {
        let mut proposer = Proposer::new(ProposerConfig::default()).unwrap();

        let mut first = proposer.begin(Ballot::new(5, "a"));
        first.evaluate_promises(&[]);
        assert!(first.record().defeated());
        drop(first);

        let second = proposer.begin(Ballot::new(6, "b"));
        assert_eq!(second.round(), 2);
        assert!(!second.record().defeated());
        assert_eq!(second.record().responders(), 0);
        assert_eq!(second.state(), ProposerState::Start);
    }

    #[tokio::test(start_paused = true)]
    async fn barrier_never_returns_short_of_quorum() {
        let mut round = round(3, 5);
        let (tx, up) = channel(Phase::AcceptorUp);
        tx.send(AcceptorUp::up()).unwrap();
        tx.send(AcceptorUp::up()).unwrap();

        let waited = tokio::time::timeout(Duration::from_secs(600), round.barrier(up)).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn barrier_returns_at_quorum() {
        let mut round = round(2, 5);
        let (tx, up) = channel(Phase::AcceptorUp);
        tx.send(AcceptorUp::up()).unwrap();
        tx.send(AcceptorUp::up()).unwrap();

        assert_eq!(round.barrier(up).await.unwrap(), 2);
        assert_eq!(round.state(), ProposerState::Barrier);
    }

    proptest! {
        #[test]
        fn majority_is_a_strict_majority(n in 1usize..10_000) {
            let m = majority(n);
            prop_assert!(m * 2 > n);
            prop_assert!(m <= n);
        }

        #[test]
        fn any_stale_promise_defeats(
            quorum in 1usize..12,
            num in 0u64..100,
            held in proptest::collection::vec(proptest::option::of(0u64..200), 1..12),
        ) {
            let promises: Vec<Promise> = held
                .iter()
                .take(quorum)
                .enumerate()
                .map(|(i, h)| Promise { id: i as u32, prop_num: h.map(ProposalNumber) })
                .collect();

            let mut round = round(quorum, num);
            let reason = round.evaluate_promises(&promises);

            let expected = if promises.len() < majority(quorum) {
                Some(DefeatReason::QuorumNotMet)
            } else if promises.iter().any(|p| p.prop_num.is_some_and(|h| h.0 >= num)) {
                Some(DefeatReason::StaleNumber)
            } else {
                None
            };
            prop_assert_eq!(reason, expected);
        }
    }
}
