//! In-process endpoints.
//!
//! A [`MemoryHub`] plays the part of the network for one proposer address:
//! at most one proposer can hold the binding at a time, and acceptors attach
//! to whichever proposer currently holds it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use synod_protocol::{Accept, AcceptorUp, Learn, Phase, Promise, Propose};
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use crate::channels::Teardown;
use crate::queue::PeerSet;
use crate::{
    channel, AcceptorChannels, AcceptorEndpoint, Outbox, ProposerChannels, ProposerEndpoint,
    Result, TransportError,
};

#[derive(Clone)]
struct Binding {
    generation: u64,
    up: mpsc::UnboundedSender<AcceptorUp>,
    propose: Arc<PeerSet<Propose>>,
    promise: mpsc::UnboundedSender<Promise>,
    accept: Arc<PeerSet<Accept>>,
    learn: mpsc::UnboundedSender<Learn>,
}

#[derive(Default)]
struct HubInner {
    slot: Mutex<Option<Binding>>,
    bound: Notify,
    generations: AtomicU64,
    acceptors: AtomicU64,
}

/// An in-process stand-in for a proposer's five ports.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    /// Creates an unbound hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a proposer endpoint for this hub.
    pub fn proposer(&self) -> MemoryProposerEndpoint {
        MemoryProposerEndpoint { hub: self.clone() }
    }

    /// Returns an acceptor endpoint that waits up to `connect_timeout` for a
    /// proposer to bind.
    ///
    /// The endpoint never joins the same binding twice: each `open` waits for
    /// a proposer round newer than the one it last joined.
    pub fn acceptor(&self, connect_timeout: Duration) -> MemoryAcceptorEndpoint {
        MemoryAcceptorEndpoint {
            hub: self.clone(),
            connect_timeout,
            joined: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns true while a proposer holds the binding.
    pub fn is_bound(&self) -> bool {
        self.inner.slot.lock().is_some()
    }

    async fn wait_bound(&self, limit: Duration, after: Option<u64>) -> Result<Binding> {
        let deadline = crate::deadline_after(limit);
        loop {
            let bound = self.inner.bound.notified();
            tokio::pin!(bound);
            bound.as_mut().enable();

            let current = self.inner.slot.lock().clone();
            if let Some(binding) = current {
                if after.map_or(true, |seen| binding.generation > seen) {
                    return Ok(binding);
                }
            }
            if tokio::time::timeout_at(deadline, bound).await.is_err() {
                return Err(TransportError::NotBound(limit));
            }
        }
    }
}

impl std::fmt::Debug for MemoryHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHub")
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Proposer side of a [`MemoryHub`].
#[derive(Debug, Clone)]
pub struct MemoryProposerEndpoint {
    hub: MemoryHub,
}

#[async_trait]
impl ProposerEndpoint for MemoryProposerEndpoint {
    async fn open(&self) -> Result<ProposerChannels> {
        let inner = &self.hub.inner;

        let (up_tx, up) = channel(Phase::AcceptorUp);
        let (promise_tx, promise) = channel(Phase::Promise);
        let (learn_tx, learn) = channel(Phase::Learn);
        let propose_peers = PeerSet::new();
        let accept_peers = PeerSet::new();

        let generation = {
            let mut slot = inner.slot.lock();
            if slot.is_some() {
                return Err(TransportError::AddressInUse);
            }
            let generation = inner.generations.fetch_add(1, Ordering::Relaxed);
            *slot = Some(Binding {
                generation,
                up: up_tx,
                propose: propose_peers.clone(),
                promise: promise_tx,
                accept: accept_peers.clone(),
                learn: learn_tx,
            });
            generation
        };
        inner.bound.notify_waiters();
        debug!(generation, "memory queues bound");

        let mut teardown = Teardown::default();
        let hub = Arc::clone(inner);
        teardown.on_close(move || {
            let mut slot = hub.slot.lock();
            if slot.as_ref().is_some_and(|b| b.generation == generation) {
                *slot = None;
                debug!(generation, "memory queues released");
            }
        });

        Ok(ProposerChannels {
            up,
            propose: Outbox::bound(Phase::Propose, propose_peers),
            promise,
            accept: Outbox::bound(Phase::Accept, accept_peers),
            learn,
            _teardown: teardown,
        })
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Acceptor side of a [`MemoryHub`].
#[derive(Debug, Clone)]
pub struct MemoryAcceptorEndpoint {
    hub: MemoryHub,
    connect_timeout: Duration,
    joined: Arc<Mutex<Option<u64>>>,
}

#[async_trait]
impl AcceptorEndpoint for MemoryAcceptorEndpoint {
    async fn open(&self) -> Result<AcceptorChannels> {
        let after = *self.joined.lock();
        let binding = self.hub.wait_bound(self.connect_timeout, after).await?;
        *self.joined.lock() = Some(binding.generation);
        let label = format!(
            "memory-acceptor-{}",
            self.hub.inner.acceptors.fetch_add(1, Ordering::Relaxed)
        );

        let mut teardown = Teardown::default();

        let (propose_tx, propose) = channel(Phase::Propose);
        binding.propose.join(label.clone(), propose_tx.clone());
        // A proposer that goes away reads as silence, not as a closed queue
        teardown.hold(propose_tx);

        let (accept_tx, accept) = channel(Phase::Accept);
        binding.accept.join(label.clone(), accept_tx.clone());
        teardown.hold(accept_tx);

        debug!(%label, generation = binding.generation, "memory acceptor attached");

        Ok(AcceptorChannels {
            up: Outbox::connected(Phase::AcceptorUp, binding.up),
            propose,
            promise: Outbox::connected(Phase::Promise, binding.promise),
            accept,
            learn: Outbox::connected(Phase::Learn, binding.learn),
            _teardown: teardown,
        })
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synod_protocol::{ProposalNumber, ProposalValue};

    #[tokio::test]
    async fn second_proposer_cannot_bind() {
        let hub = MemoryHub::new();
        let _first = hub.proposer().open().await.unwrap();

        let err = hub.proposer().open().await.unwrap_err();
        assert!(matches!(err, TransportError::AddressInUse));
    }

    #[tokio::test]
    async fn dropping_channels_releases_binding() {
        let hub = MemoryHub::new();
        let first = hub.proposer().open().await.unwrap();
        assert!(hub.is_bound());

        drop(first);
        assert!(!hub.is_bound());
        assert!(hub.proposer().open().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn acceptor_gives_up_without_proposer() {
        let hub = MemoryHub::new();
        let err = hub
            .acceptor(Duration::from_secs(3))
            .open()
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotBound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn acceptor_waits_for_late_proposer() {
        let hub = MemoryHub::new();
        let endpoint = hub.acceptor(Duration::from_secs(30));
        let pending = tokio::spawn(async move { endpoint.open().await });

        tokio::time::sleep(Duration::from_secs(5)).await;
        let mut proposer = hub.proposer().open().await.unwrap();

        let acceptor = pending.await.unwrap().unwrap();
        acceptor.up.send(AcceptorUp::up()).await;
        assert_eq!(proposer.up.recv().await.unwrap(), AcceptorUp::up());
    }

    #[tokio::test]
    async fn records_flow_both_ways() {
        let hub = MemoryHub::new();
        let mut proposer = hub.proposer().open().await.unwrap();
        let mut acceptor = hub.acceptor(Duration::from_secs(1)).open().await.unwrap();

        proposer
            .accept
            .send(Accept {
                num: ProposalNumber(3),
                val: ProposalValue::text("x"),
            })
            .await;
        let accept = acceptor.accept.recv().await.unwrap();
        assert_eq!(accept.num, ProposalNumber(3));

        acceptor
            .learn
            .send(Learn {
                id: 0,
                prop_num: accept.num,
                prop_val: accept.val,
            })
            .await;
        assert_eq!(proposer.learn.recv().await.unwrap().id, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn departed_proposer_reads_as_silence() {
        let hub = MemoryHub::new();
        let proposer = hub.proposer().open().await.unwrap();
        let mut acceptor = hub.acceptor(Duration::from_secs(1)).open().await.unwrap();
        drop(proposer);

        let waited =
            tokio::time::timeout(Duration::from_secs(5), acceptor.propose.recv()).await;
        assert!(waited.is_err());

        // Sends to the vanished proposer are dropped quietly
        acceptor.up.send(AcceptorUp::up()).await;
        assert_eq!(acceptor.up.peer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn acceptor_waits_for_the_next_round() {
        let hub = MemoryHub::new();
        let endpoint = hub.acceptor(Duration::from_secs(30));

        let first = hub.proposer().open().await.unwrap();
        let _joined = endpoint.open().await.unwrap();

        let again = endpoint.clone();
        let pending = tokio::spawn(async move { again.open().await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!pending.is_finished());

        drop(first);
        let mut second = hub.proposer().open().await.unwrap();
        let acceptor = pending.await.unwrap().unwrap();
        acceptor.up.send(AcceptorUp::up()).await;
        assert_eq!(second.up.recv().await.unwrap(), AcceptorUp::up());
    }
}
