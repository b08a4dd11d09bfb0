//! Per-round channel sets and the endpoints that open them.

use std::any::Any;

use async_trait::async_trait;
use synod_protocol::{Accept, AcceptorUp, Learn, Promise, Propose};
use tokio::task::AbortHandle;

use crate::{Inbox, Outbox, Result};

/// Releases a round's endpoints when dropped.
#[derive(Default)]
pub(crate) struct Teardown {
    tasks: Vec<AbortHandle>,
    held: Vec<Box<dyn Any + Send>>,
    on_close: Vec<Box<dyn FnOnce() + Send>>,
}

impl Teardown {
    /// Aborts `task` when the round closes.
    pub(crate) fn abort(&mut self, task: AbortHandle) {
        self.tasks.push(task);
    }

    /// Keeps `value` alive until the round closes.
    pub(crate) fn hold<T: Send + 'static>(&mut self, value: T) {
        self.held.push(Box::new(value));
    }

    /// Runs `f` when the round closes.
    pub(crate) fn on_close(&mut self, f: impl FnOnce() + Send + 'static) {
        self.on_close.push(Box::new(f));
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.held.clear();
        for f in self.on_close.drain(..) {
            f();
        }
    }
}

/// The proposer's five queues for one round.
///
/// Dropping the value closes the round: listeners stop, pending readers are
/// aborted and the ports become free for the next round.
pub struct ProposerChannels {
    /// Acceptor liveness announcements.
    pub up: Inbox<AcceptorUp>,
    /// Propose requests to acceptors.
    pub propose: Outbox<Propose>,
    /// Promise replies from acceptors.
    pub promise: Inbox<Promise>,
    /// Accept requests to acceptors.
    pub accept: Outbox<Accept>,
    /// Learn confirmations from acceptors.
    pub learn: Inbox<Learn>,
    pub(crate) _teardown: Teardown,
}

impl std::fmt::Debug for ProposerChannels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProposerChannels")
            .field("propose_peers", &self.propose.peer_count())
            .field("accept_peers", &self.accept.peer_count())
            .finish_non_exhaustive()
    }
}

/// One acceptor's five queues for one round.
pub struct AcceptorChannels {
    /// Liveness announcement to the proposer.
    pub up: Outbox<AcceptorUp>,
    /// Propose requests from the proposer.
    pub propose: Inbox<Propose>,
    /// Promise replies to the proposer.
    pub promise: Outbox<Promise>,
    /// Accept requests from the proposer.
    pub accept: Inbox<Accept>,
    /// Learn confirmations to the proposer.
    pub learn: Outbox<Learn>,
    pub(crate) _teardown: Teardown,
}

impl std::fmt::Debug for AcceptorChannels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceptorChannels").finish_non_exhaustive()
    }
}

/// Opens the proposer's side of a round.
#[async_trait]
pub trait ProposerEndpoint: Send + Sync {
    /// Binds the five queues for a new round.
    async fn open(&self) -> Result<ProposerChannels>;

    /// Human-readable description for logging.
    fn describe(&self) -> String;
}

/// Opens an acceptor's side of a round.
#[async_trait]
pub trait AcceptorEndpoint: Send + Sync {
    /// Connects to the proposer's five queues for a new round.
    async fn open(&self) -> Result<AcceptorChannels>;

    /// Human-readable description for logging.
    fn describe(&self) -> String;
}
