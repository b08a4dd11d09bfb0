//! Acceptor role.
//!
//! ```text
//! START → AWAIT_PROPOSE → (STALE | PROMISED) → AWAIT_ACCEPT → ACCEPTED → LEARNED
//! ```
//!
//! `TIMED_OUT` is reachable from either await state. `STALE` and `TIMED_OUT`
//! end the round without an accept phase.

use std::time::Duration;

use synod_protocol::{
    Accept, AcceptorUp, Learn, Phase, Promise, ProposalNumber, ProposalValue, Propose,
};
use synod_transport::{AcceptorChannels, Inbox, Outbox};
use tracing::{debug, info, warn};

use crate::{AcceptorOutcome, ConsensusError, DelayInjector, Result};

/// Acceptor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptorConfig {
    /// How long to wait for each request from the proposer.
    pub timeout: Duration,
    /// Upper bound of the injected latency.
    pub max_delay: Duration,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Where an acceptor round stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptorState {
    /// Nothing done yet.
    Start,
    /// Announced and waiting for a propose.
    AwaitPropose,
    /// The proposer's number was not newer than ours.
    Stale,
    /// The proposer's number was newer than ours.
    Promised,
    /// Promise sent, waiting for the accept.
    AwaitAccept,
    /// Took the proposer's number and value.
    Accepted,
    /// Confirmed the accepted value.
    Learned,
    /// A request did not arrive in time.
    TimedOut,
}

/// What an acceptor holds during one round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcceptorRecord {
    /// Ordinal from the last propose.
    pub id: Option<u32>,
    /// The last number seen.
    pub prop_num: Option<ProposalNumber>,
    /// The last value seen.
    pub prop_val: Option<ProposalValue>,
}

/// Runs acceptor rounds.
#[derive(Debug)]
pub struct Acceptor {
    config: AcceptorConfig,
    delay: DelayInjector,
    rounds: u64,
}

impl Acceptor {
    /// Creates an acceptor.
    pub fn new(config: AcceptorConfig) -> Self {
        Self {
            delay: DelayInjector::new(config.max_delay),
            config,
            rounds: 0,
        }
    }

    /// The configuration.
    pub fn config(&self) -> &AcceptorConfig {
        &self.config
    }

    /// Starts a fresh round holding `held` from an earlier promise, if any.
    pub fn begin(&mut self, held: Option<ProposalNumber>) -> AcceptorRound {
        self.rounds += 1;
        AcceptorRound {
            round: self.rounds,
            timeout: self.config.timeout,
            delay: self.delay,
            record: AcceptorRecord {
                prop_num: held,
                ..Default::default()
            },
            reported: None,
            state: AcceptorState::Start,
            silent: None,
        }
    }

    /// Runs one complete round over `channels` and closes them.
    ///
    /// # Errors
    ///
    /// Only fatal faults are errors; timeouts and stale proposers are
    /// reported through [`AcceptorOutcome`].
    pub async fn run_round(
        &mut self,
        mut channels: AcceptorChannels,
        held: Option<ProposalNumber>,
    ) -> Result<AcceptorOutcome> {
        let mut round = self.begin(held);
        info!(round = round.round, held = ?held, "starting acceptor round");

        round.announce(&channels.up).await;

        if round.await_and_process_propose(&mut channels.propose).await? == AcceptorState::TimedOut
        {
            return round.finish();
        }

        round.send_promise(&channels.promise).await?;
        if round.state() == AcceptorState::Stale {
            return round.finish();
        }

        if round.await_and_process_accept(&mut channels.accept).await? == AcceptorState::TimedOut {
            return round.finish();
        }

        round.send_learn(&channels.learn).await?;
        round.finish()
    }
}

/// One acceptor round.
#[derive(Debug)]
pub struct AcceptorRound {
    round: u64,
    timeout: Duration,
    delay: DelayInjector,
    record: AcceptorRecord,
    reported: Option<ProposalNumber>,
    state: AcceptorState,
    silent: Option<Phase>,
}

impl AcceptorRound {
    /// Round number, starting at 1.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// What the acceptor holds.
    pub fn record(&self) -> &AcceptorRecord {
        &self.record
    }

    /// Where the round stands.
    pub fn state(&self) -> AcceptorState {
        self.state
    }

    /// Tells the proposer this acceptor is ready.
    pub async fn announce(&mut self, up: &Outbox<AcceptorUp>) {
        up.send(AcceptorUp::up()).await;
        self.state = AcceptorState::AwaitPropose;
    }

    /// Waits for one propose and decides whether the proposer is stale.
    ///
    /// A number we do not hold yet never makes the proposer stale.
    pub async fn await_and_process_propose(
        &mut self,
        propose: &mut Inbox<Propose>,
    ) -> Result<AcceptorState> {
        self.state = AcceptorState::AwaitPropose;
        let Some(msg) = self.receive(propose).await? else {
            return Ok(self.state);
        };

        self.record.id = Some(msg.id);
        self.reported = self.record.prop_num;

        let stale = self
            .record
            .prop_num
            .is_some_and(|held| held.supersedes(msg.num));
        self.state = if stale {
            warn!(
                round = self.round,
                held = ?self.record.prop_num,
                num = %msg.num,
                "our number is equal or greater than the proposer's"
            );
            AcceptorState::Stale
        } else {
            debug!(
                round = self.round,
                held = ?self.record.prop_num,
                num = %msg.num,
                "our number is older than the proposer's"
            );
            AcceptorState::Promised
        };
        Ok(self.state)
    }

    /// Replies to the propose with the number held before it arrived.
    ///
    /// Sent even when the proposer is stale so it can see it was beaten.
    pub async fn send_promise(&mut self, promise: &Outbox<Promise>) -> Result<()> {
        let id = match (self.state, self.record.id) {
            (AcceptorState::Promised | AcceptorState::Stale, Some(id)) => id,
            (state, _) => {
                return Err(ConsensusError::InvalidState(format!(
                    "cannot promise in state {state:?}"
                )))
            }
        };

        self.delay.pause("promise").await;
        let msg = Promise {
            id,
            prop_num: self.reported,
        };
        debug!(round = self.round, ?msg, "sending promise");
        promise.send(msg).await;
        Ok(())
    }

    /// Waits for the accept and takes its number and value.
    pub async fn await_and_process_accept(
        &mut self,
        accept: &mut Inbox<Accept>,
    ) -> Result<AcceptorState> {
        if self.state != AcceptorState::Promised {
            return Err(ConsensusError::InvalidState(format!(
                "cannot await accept in state {:?}",
                self.state
            )));
        }

        self.state = AcceptorState::AwaitAccept;
        let Some(msg) = self.receive(accept).await? else {
            return Ok(self.state);
        };

        info!(round = self.round, num = %msg.num, val = %msg.val, "accepted proposal");
        self.record.prop_num = Some(msg.num);
        self.record.prop_val = Some(msg.val);
        self.state = AcceptorState::Accepted;
        Ok(self.state)
    }

    /// Confirms the accepted number and value to the proposer.
    pub async fn send_learn(&mut self, learn: &Outbox<Learn>) -> Result<()> {
        let (id, prop_num, prop_val) = match (
            self.state,
            self.record.id,
            self.record.prop_num,
            &self.record.prop_val,
        ) {
            (AcceptorState::Accepted, Some(id), Some(num), Some(val)) => (id, num, val.clone()),
            (state, ..) => {
                return Err(ConsensusError::InvalidState(format!(
                    "cannot learn in state {state:?}"
                )))
            }
        };

        self.delay.pause("learn").await;
        let msg = Learn {
            id,
            prop_num,
            prop_val,
        };
        debug!(round = self.round, ?msg, "sending learn");
        learn.send(msg).await;
        self.state = AcceptorState::Learned;
        Ok(())
    }

    /// Ends the round and reports its outcome.
    pub fn finish(self) -> Result<AcceptorOutcome> {
        let outcome = match (self.state, self.silent) {
            (AcceptorState::TimedOut, Some(phase)) => AcceptorOutcome::TimedOut { phase },
            (AcceptorState::Stale, _) => AcceptorOutcome::Stale {
                held: self.reported.ok_or_else(|| {
                    ConsensusError::InvalidState("stale without a held number".into())
                })?,
            },
            (AcceptorState::Learned, _) => match (self.record.prop_num, self.record.prop_val) {
                (Some(num), Some(val)) => AcceptorOutcome::Learned { num, val },
                _ => {
                    return Err(ConsensusError::InvalidState(
                        "learned without a proposal".into(),
                    ))
                }
            },
            (state, _) => {
                return Err(ConsensusError::InvalidState(format!(
                    "round ended in state {state:?}"
                )))
            }
        };
        info!(round = self.round, %outcome, "acceptor round finished");
        Ok(outcome)
    }

    async fn receive<M: std::fmt::Debug>(&mut self, inbox: &mut Inbox<M>) -> Result<Option<M>> {
        let phase = inbox.phase();
        self.delay.pause(phase.name()).await;

        match tokio::time::timeout(self.timeout, inbox.recv()).await {
            Ok(msg) => {
                let msg = msg?;
                debug!(round = self.round, %phase, ?msg, "request received");
                Ok(Some(msg))
            }
            Err(_) => {
                warn!(round = self.round, %phase, timeout = ?self.timeout, "timed out waiting for request");
                self.state = AcceptorState::TimedOut;
                self.silent = Some(phase);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synod_transport::channel;

    fn acceptor() -> Acceptor {
        Acceptor::new(AcceptorConfig {
            timeout: Duration::from_secs(20),
            max_delay: Duration::ZERO,
        })
    }

    fn propose(id: u32, num: u64) -> Propose {
        Propose {
            id,
            num: ProposalNumber(num),
        }
    }

    #[tokio::test]
    async fn unset_number_always_promises() {
        let mut round = acceptor().begin(None);
        let (tx, mut inbox) = channel(Phase::Propose);
        tx.send(propose(1, 0)).unwrap();

        let state = round.await_and_process_propose(&mut inbox).await.unwrap();
        assert_eq!(state, AcceptorState::Promised);
        assert_eq!(round.record().id, Some(1));
    }

    #[tokio::test]
    async fn equal_number_is_stale_but_still_promised() {
        let mut round = acceptor().begin(Some(ProposalNumber(5)));
        let (tx, mut inbox) = channel(Phase::Propose);
        tx.send(propose(0, 5)).unwrap();

        assert_eq!(
            round.await_and_process_propose(&mut inbox).await.unwrap(),
            AcceptorState::Stale
        );

        let (promise_tx, mut promises) = channel(Phase::Promise);
        round
            .send_promise(&Outbox::connected(Phase::Promise, promise_tx))
            .await
            .unwrap();
        assert_eq!(
            promises.recv().await.unwrap(),
            Promise {
                id: 0,
                prop_num: Some(ProposalNumber(5))
            }
        );
        assert_eq!(
            round.finish().unwrap(),
            AcceptorOutcome::Stale {
                held: ProposalNumber(5)
            }
        );
    }

    #[tokio::test]
    async fn lower_number_never_replaces_the_held_one() {
        let mut round = acceptor().begin(Some(ProposalNumber(9)));
        let (tx, mut inbox) = channel(Phase::Propose);
        tx.send(propose(0, 4)).unwrap();

        assert_eq!(
            round.await_and_process_propose(&mut inbox).await.unwrap(),
            AcceptorState::Stale
        );
        assert_eq!(round.record().prop_num, Some(ProposalNumber(9)));
        assert_eq!(
            round.finish().unwrap(),
            AcceptorOutcome::Stale {
                held: ProposalNumber(9)
            }
        );
    }

    #[tokio::test]
    async fn promise_reports_number_held_before_propose() {
        let mut round = acceptor().begin(Some(ProposalNumber(3)));
        let (tx, mut inbox) = channel(Phase::Propose);
        tx.send(propose(2, 8)).unwrap();
        round.await_and_process_propose(&mut inbox).await.unwrap();

        let (promise_tx, mut promises) = channel(Phase::Promise);
        round
            .send_promise(&Outbox::connected(Phase::Promise, promise_tx))
            .await
            .unwrap();
        assert_eq!(
            promises.recv().await.unwrap().prop_num,
            Some(ProposalNumber(3))
        );
    }

    #[tokio::test]
    async fn accept_overwrites_held_proposal() {
        let mut round = acceptor().begin(Some(ProposalNumber(3)));
        let (tx, mut inbox) = channel(Phase::Propose);
        tx.send(propose(0, 8)).unwrap();
        round.await_and_process_propose(&mut inbox).await.unwrap();

        let (accept_tx, mut accepts) = channel(Phase::Accept);
        accept_tx
            .send(Accept {
                num: ProposalNumber(8),
                val: ProposalValue::text("blue"),
            })
            .unwrap();
        assert_eq!(
            round.await_and_process_accept(&mut accepts).await.unwrap(),
            AcceptorState::Accepted
        );
        assert_eq!(round.record().prop_num, Some(ProposalNumber(8)));

        let (learn_tx, mut learns) = channel(Phase::Learn);
        round
            .send_learn(&Outbox::connected(Phase::Learn, learn_tx))
            .await
            .unwrap();
        let learn = learns.recv().await.unwrap();
        assert_eq!(learn.prop_val, ProposalValue::text("blue"));
        assert_eq!(
            round.finish().unwrap(),
            AcceptorOutcome::Learned {
                num: ProposalNumber(8),
                val: ProposalValue::text("blue")
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn silence_times_out() {
        let mut round = acceptor().begin(None);
        let (_tx, mut inbox) = channel::<Propose>(Phase::Propose);

        assert_eq!(
            round.await_and_process_propose(&mut inbox).await.unwrap(),
            AcceptorState::TimedOut
        );
        assert_eq!(
            round.finish().unwrap(),
            AcceptorOutcome::TimedOut {
                phase: Phase::Propose
            }
        );
    }

    #[tokio::test]
    async fn accept_requires_a_promise() {
        let mut round = acceptor().begin(None);
        let (_tx, mut accepts) = channel::<Accept>(Phase::Accept);
        let err = round
            .await_and_process_accept(&mut accepts)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidState(_)));
    }
}
