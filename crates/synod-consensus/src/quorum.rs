//! Quorum Wait: gather a target number of records from one queue.
//!
//! The wait runs on its own task so the round logic can start it, do nothing
//! else, and join it. With a deadline the task sleeps an injected delay before
//! every receive and stops with whatever it has once the deadline passes;
//! without one it blocks until the target is reached.

use std::fmt;
use std::time::Duration;

use synod_protocol::Phase;
use synod_transport::Inbox;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::{DelayInjector, Result};

/// A running wait for `target` records.
///
/// A short result after [`join`](QuorumWait::join) means the deadline
/// expired; it is not an error.
pub struct QuorumWait<M> {
    phase: Phase,
    target: usize,
    handle: JoinHandle<synod_transport::Result<Vec<M>>>,
}

impl<M: fmt::Debug + Send + 'static> QuorumWait<M> {
    /// Starts waiting on `inbox`.
    ///
    /// `deadline` of `None` waits forever and skips delay injection.
    pub fn spawn(
        inbox: Inbox<M>,
        target: usize,
        deadline: Option<Duration>,
        delay: DelayInjector,
    ) -> Self {
        let phase = inbox.phase();
        debug!(%phase, target, ?deadline, "starting quorum wait");
        Self {
            phase,
            target,
            handle: tokio::spawn(gather(inbox, target, deadline, delay)),
        }
    }

    /// Waits for the task and returns what it gathered.
    ///
    /// # Errors
    ///
    /// Fails if the queue closed under the wait or the task died.
    pub async fn join(self) -> Result<Vec<M>> {
        let received = self.handle.await??;
        debug!(phase = %self.phase, target = self.target, received = received.len(), "quorum wait joined");
        Ok(received)
    }
}

impl<M> fmt::Debug for QuorumWait<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuorumWait")
            .field("phase", &self.phase)
            .field("target", &self.target)
            .finish()
    }
}

/// Spawns a [`QuorumWait`] and joins it.
pub async fn await_quorum<M: fmt::Debug + Send + 'static>(
    inbox: Inbox<M>,
    target: usize,
    deadline: Option<Duration>,
    delay: DelayInjector,
) -> Result<Vec<M>> {
    QuorumWait::spawn(inbox, target, deadline, delay)
        .join()
        .await
}

async fn gather<M: fmt::Debug>(
    mut inbox: Inbox<M>,
    target: usize,
    limit: Option<Duration>,
    delay: DelayInjector,
) -> synod_transport::Result<Vec<M>> {
    let phase = inbox.phase();
    let deadline = limit.map(synod_transport::deadline_after);
    let mut received = Vec::with_capacity(target);

    while received.len() < target {
        let Some(deadline) = deadline else {
            let record = inbox.recv().await?;
            debug!(%phase, ?record, count = received.len() + 1, target, "record gathered");
            received.push(record);
            continue;
        };

        delay
            .pause_within(phase.name(), deadline.saturating_duration_since(Instant::now()))
            .await;
        // Timeout polls the receive first, so a record already queued when
        // the deadline passes is still taken by this attempt
        match tokio::time::timeout_at(deadline, inbox.recv()).await {
            Ok(record) => {
                let record = record?;
                debug!(%phase, ?record, count = received.len() + 1, target, "record gathered");
                received.push(record);
            }
            Err(_) => {
                debug!(%phase, received = received.len(), target, "deadline expired");
                break;
            }
        }
        if Instant::now() >= deadline && received.len() < target {
            debug!(%phase, received = received.len(), target, "deadline expired");
            break;
        }
    }

    Ok(received)
}
