//! Single-consumer inboxes and directed outboxes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use synod_protocol::Phase;
use tokio::sync::{mpsc, Notify};

use crate::{Result, TransportError};

/// The consuming end of a queue.
///
/// Records arrive in the order they were produced by each producer; nothing
/// is implied across producers.
pub struct Inbox<M> {
    phase: Phase,
    rx: mpsc::UnboundedReceiver<M>,
}

impl<M> Inbox<M> {
    pub(crate) fn new(phase: Phase, rx: mpsc::UnboundedReceiver<M>) -> Self {
        Self { phase, rx }
    }

    /// The queue this inbox consumes.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Waits for the next record.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] once every producer and the binding
    /// itself are gone.
    pub async fn recv(&mut self) -> Result<M> {
        self.rx.recv().await.ok_or(TransportError::Closed(self.phase))
    }
}

impl<M> fmt::Debug for Inbox<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbox").field("phase", &self.phase).finish()
    }
}

/// Creates a detached queue.
///
/// The inbox closes when every clone of the returned sender is dropped.
pub fn channel<M>(phase: Phase) -> (mpsc::UnboundedSender<M>, Inbox<M>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Inbox::new(phase, rx))
}

struct Peer<M> {
    label: String,
    tx: mpsc::UnboundedSender<M>,
}

struct PeerList<M> {
    peers: Vec<Peer<M>>,
    next: usize,
}

/// Consumers connected to a bound queue.
pub(crate) struct PeerSet<M> {
    list: Mutex<PeerList<M>>,
    joined: Notify,
}

impl<M> PeerSet<M> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            list: Mutex::new(PeerList {
                peers: Vec::new(),
                next: 0,
            }),
            joined: Notify::new(),
        })
    }

    /// Registers a newly connected consumer.
    pub(crate) fn join(&self, label: impl Into<String>, tx: mpsc::UnboundedSender<M>) {
        self.list.lock().peers.push(Peer {
            label: label.into(),
            tx,
        });
        self.joined.notify_waiters();
    }

    fn live(&self) -> usize {
        let mut list = self.list.lock();
        list.peers.retain(|peer| !peer.tx.is_closed());
        list.peers.len()
    }

    /// Hands `msg` to the next live consumer in round-robin order.
    ///
    /// Consumers whose queue is gone are dropped on the way. Returns the
    /// record if nobody is connected.
    fn deliver(&self, mut msg: M) -> std::result::Result<String, M> {
        let mut list = self.list.lock();
        while !list.peers.is_empty() {
            let idx = list.next % list.peers.len();
            match list.peers[idx].tx.send(msg) {
                Ok(()) => {
                    list.next = idx + 1;
                    return Ok(list.peers[idx].label.clone());
                }
                Err(mpsc::error::SendError(returned)) => {
                    msg = returned;
                    let gone = list.peers.remove(idx);
                    tracing::debug!(peer = %gone.label, "dropping disconnected consumer");
                    list.next = idx;
                }
            }
        }
        Err(msg)
    }
}

enum Route<M> {
    Bound(Arc<PeerSet<M>>),
    Connected(mpsc::UnboundedSender<M>),
}

/// A producing end of a queue.
pub struct Outbox<M> {
    phase: Phase,
    route: Route<M>,
}

impl<M: fmt::Debug> Outbox<M> {
    pub(crate) fn bound(phase: Phase, peers: Arc<PeerSet<M>>) -> Self {
        Self {
            phase,
            route: Route::Bound(peers),
        }
    }

    /// Creates the connected end of a queue that forwards into `tx`.
    ///
    /// Records sent after the consumer went away are dropped.
    pub fn connected(phase: Phase, tx: mpsc::UnboundedSender<M>) -> Self {
        Self {
            phase,
            route: Route::Connected(tx),
        }
    }

    /// The queue this outbox produces into.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of consumers currently reachable.
    pub fn peer_count(&self) -> usize {
        match &self.route {
            Route::Bound(peers) => peers.live(),
            Route::Connected(tx) => usize::from(!tx.is_closed()),
        }
    }

    /// Queues a record and reports whether a consumer took it.
    ///
    /// On a bound queue the record goes to the next connected consumer in
    /// round-robin order. With nobody connected it is dropped; callers that
    /// need consumers wait for them first with
    /// [`wait_for_peers`](Self::wait_for_peers).
    pub async fn send(&self, msg: M) -> bool {
        match &self.route {
            Route::Connected(tx) => match tx.send(msg) {
                Ok(()) => true,
                Err(mpsc::error::SendError(msg)) => {
                    tracing::debug!(phase = %self.phase, ?msg, "consumer gone, record dropped");
                    false
                }
            },
            Route::Bound(peers) => match peers.deliver(msg) {
                Ok(peer) => {
                    tracing::trace!(phase = %self.phase, %peer, "record queued");
                    true
                }
                Err(msg) => {
                    tracing::warn!(
                        phase = %self.phase,
                        ?msg,
                        "no consumer connected, record dropped"
                    );
                    false
                }
            },
        }
    }

    /// Waits up to `limit` for at least `n` consumers and returns how many
    /// are connected.
    pub async fn wait_for_peers(&self, n: usize, limit: Duration) -> usize {
        let peers = match &self.route {
            Route::Connected(_) => return self.peer_count(),
            Route::Bound(peers) => peers,
        };

        let deadline = crate::deadline_after(limit);
        loop {
            let joined = peers.joined.notified();
            tokio::pin!(joined);
            joined.as_mut().enable();

            let live = peers.live();
            if live >= n {
                return live;
            }
            if tokio::time::timeout_at(deadline, joined).await.is_err() {
                return peers.live();
            }
        }
    }
}

impl<M> fmt::Debug for Outbox<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let route = match self.route {
            Route::Bound(_) => "bound",
            Route::Connected(_) => "connected",
        };
        f.debug_struct("Outbox")
            .field("phase", &self.phase)
            .field("route", &route)
            .finish()
    }
}
