//! TCP endpoints.
//!
//! Each queue is a separate TCP connection per acceptor. Records are framed
//! with [`JsonCodec`]. The proposer binds `bind_ip:base_port + offset`; an
//! acceptor connects to `host:base_port + offset`, retrying until the
//! proposer's listeners are up.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use synod_protocol::{JsonCodec, Phase, Record};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace, warn};

use crate::channels::Teardown;
use crate::queue::PeerSet;
use crate::{
    channel, AcceptorChannels, AcceptorEndpoint, Outbox, ProposerChannels, ProposerEndpoint,
    Result, TransportError, DEFAULT_CONNECT_TIMEOUT,
};

/// Reconnect policy for an acceptor reaching the proposer's queues.
#[derive(Debug, Clone)]
pub struct ConnectPolicy {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Give up once this much time has passed since the first attempt.
    pub limit: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            limit: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ConnectPolicy {
    /// Creates a policy that gives up after `limit`.
    pub fn with_limit(limit: Duration) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt as i32 - 1);
        let capped = delay_ms.min(self.max_delay.as_millis() as f64);

        // Up to 25% jitter so acceptors do not reconnect in lockstep
        let jitter = 1.0 + rand::random::<f64>() * 0.25;
        Duration::from_millis((capped * jitter) as u64)
    }

    async fn connect(&self, phase: Phase, host: &str, port: u16) -> Result<TcpStream> {
        let deadline = crate::deadline_after(self.limit);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout_at(deadline, TcpStream::connect((host, port)))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(std::io::ErrorKind::TimedOut.into()),
            };

            match result {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    debug!(%phase, host, port, attempt, "queue connected");
                    return Ok(stream);
                }
                Err(source) => {
                    let delay = self.delay_for_attempt(attempt);
                    if Instant::now() + delay >= deadline {
                        return Err(TransportError::Connect {
                            phase,
                            addr: format!("{host}:{port}"),
                            attempts: attempt,
                            source,
                        });
                    }
                    trace!(%phase, host, port, attempt, delay_ms = delay.as_millis() as u64, "retrying connect");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Binds the proposer's queues on TCP.
#[derive(Debug, Clone)]
pub struct TcpProposerEndpoint {
    bind_ip: IpAddr,
    base_port: u16,
}

impl TcpProposerEndpoint {
    /// Binds on all interfaces.
    pub fn new(base_port: u16) -> Self {
        Self::with_ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED), base_port)
    }

    /// Binds on a specific interface.
    pub fn with_ip(bind_ip: IpAddr, base_port: u16) -> Self {
        Self { bind_ip, base_port }
    }

    fn addr(&self, phase: Phase) -> Result<SocketAddr> {
        let port = phase
            .port(self.base_port)
            .ok_or(TransportError::PortRange(self.base_port))?;
        Ok(SocketAddr::new(self.bind_ip, port))
    }

    async fn bind(&self, phase: Phase) -> Result<TcpListener> {
        let addr = self.addr(phase)?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::bind(phase, addr, e))?;
        debug!(%phase, %addr, "queue bound");
        Ok(listener)
    }
}

#[async_trait]
impl ProposerEndpoint for TcpProposerEndpoint {
    async fn open(&self) -> Result<ProposerChannels> {
        // Bind everything first so a bind failure leaves nothing running
        let up_listener = self.bind(Phase::AcceptorUp).await?;
        let propose_listener = self.bind(Phase::Propose).await?;
        let promise_listener = self.bind(Phase::Promise).await?;
        let accept_listener = self.bind(Phase::Accept).await?;
        let learn_listener = self.bind(Phase::Learn).await?;

        let mut teardown = Teardown::default();

        let (up_tx, up) = channel(Phase::AcceptorUp);
        teardown.abort(tokio::spawn(accept_inbound(up_listener, up_tx)).abort_handle());

        let propose_peers = PeerSet::new();
        teardown.abort(
            tokio::spawn(accept_outbound(propose_listener, propose_peers.clone())).abort_handle(),
        );

        let (promise_tx, promise) = channel(Phase::Promise);
        teardown.abort(tokio::spawn(accept_inbound(promise_listener, promise_tx)).abort_handle());

        let accept_peers = PeerSet::new();
        teardown.abort(
            tokio::spawn(accept_outbound(accept_listener, accept_peers.clone())).abort_handle(),
        );

        let (learn_tx, learn) = channel(Phase::Learn);
        teardown.abort(tokio::spawn(accept_inbound(learn_listener, learn_tx)).abort_handle());

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
        format!("tcp://{}:{}", self.bind_ip, self.base_port)
    }
}

/// Connects an acceptor to the proposer's queues on TCP.
#[derive(Debug, Clone)]
pub struct TcpAcceptorEndpoint {
    host: String,
    base_port: u16,
    policy: ConnectPolicy,
}

impl TcpAcceptorEndpoint {
    /// Connects to `host` with the default retry policy.
    pub fn new(host: impl Into<String>, base_port: u16) -> Self {
        Self::with_policy(host, base_port, ConnectPolicy::default())
    }

    /// Connects to `host` with a custom retry policy.
    pub fn with_policy(host: impl Into<String>, base_port: u16, policy: ConnectPolicy) -> Self {
        Self {
            host: host.into(),
            base_port,
            policy,
        }
    }

    fn port(&self, phase: Phase) -> Result<u16> {
        phase
            .port(self.base_port)
            .ok_or(TransportError::PortRange(self.base_port))
    }

    async fn connect_outbound<M: Record>(&self) -> Result<Outbox<M>> {
        let port = self.port(M::PHASE)?;
        let stream = self.policy.connect(M::PHASE, &self.host, port).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_queue(
            stream,
            rx,
            format!("{}:{port}", self.host),
            OnDisconnect::Drain,
        ));
        Ok(Outbox::connected(M::PHASE, tx))
    }

    async fn connect_inbound<M: Record>(
        &self,
        teardown: &mut Teardown,
    ) -> Result<crate::Inbox<M>> {
        let port = self.port(M::PHASE)?;
        let stream = self.policy.connect(M::PHASE, &self.host, port).await?;
        let (tx, inbox) = channel(M::PHASE);
        let reader = tokio::spawn(read_queue(stream, tx.clone(), format!("{}:{port}", self.host)));
        teardown.abort(reader.abort_handle());
        // A proposer that hangs up reads as silence, not as a closed queue
        teardown.hold(tx);
        Ok(inbox)
    }
}

#[async_trait]
impl AcceptorEndpoint for TcpAcceptorEndpoint {
    async fn open(&self) -> Result<AcceptorChannels> {
        let mut teardown = Teardown::default();

        let up = self.connect_outbound().await?;
        let propose = self.connect_inbound(&mut teardown).await?;
        let promise = self.connect_outbound().await?;
        let accept = self.connect_inbound(&mut teardown).await?;
        let learn = self.connect_outbound().await?;

        Ok(AcceptorChannels {
            up,
            propose,
            promise,
            accept,
            learn,
            _teardown: teardown,
        })
    }

    fn describe(&self) -> String {
        format!("tcp://{}:{}", self.host, self.base_port)
    }
}

/// What a writer does once its peer disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnDisconnect {
    /// Stop and let the bound side drop this consumer.
    Drop,
    /// Keep accepting records and discard them.
    Drain,
}

async fn accept_inbound<M: Record>(listener: TcpListener, tx: mpsc::UnboundedSender<M>) {
    let mut readers = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(phase = %M::PHASE, %peer, "producer connected");
                    let _ = stream.set_nodelay(true);
                    readers.spawn(read_queue(stream, tx.clone(), peer.to_string()));
                }
                Err(e) => {
                    warn!(phase = %M::PHASE, error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            Some(_) = readers.join_next(), if !readers.is_empty() => {}
        }
    }
}

async fn accept_outbound<M: Record>(listener: TcpListener, peers: std::sync::Arc<PeerSet<M>>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(phase = %M::PHASE, %peer, "consumer connected");
                let _ = stream.set_nodelay(true);
                let (tx, rx) = mpsc::unbounded_channel();
                peers.join(peer.to_string(), tx);
                tokio::spawn(write_queue(stream, rx, peer.to_string(), OnDisconnect::Drop));
            }
            Err(e) => {
                warn!(phase = %M::PHASE, error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn read_queue<M: Record>(stream: TcpStream, tx: mpsc::UnboundedSender<M>, peer: String) {
    let mut frames = FramedRead::new(stream, JsonCodec::<M>::new());
    while let Some(item) = frames.next().await {
        match item {
            Ok(record) => {
                trace!(phase = %M::PHASE, %peer, ?record, "record received");
                if tx.send(record).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(phase = %M::PHASE, %peer, error = %e, "dropping connection after bad record");
                break;
            }
        }
    }
    debug!(phase = %M::PHASE, %peer, "producer disconnected");
}

async fn write_queue<M: Record>(
    stream: TcpStream,
    mut rx: mpsc::UnboundedReceiver<M>,
    peer: String,
    on_disconnect: OnDisconnect,
) {
    let (mut read_half, write_half) = stream.into_split();
    let mut frames = FramedWrite::new(write_half, JsonCodec::<M>::new());
    let mut byte = [0u8; 1];

    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Some(record) => {
                    if let Err(e) = frames.send(record).await {
                        warn!(phase = %M::PHASE, %peer, error = %e, "write failed");
                        break;
                    }
                }
                // Every producer is gone; dropping the stream signals EOF
                None => return,
            },
            read = read_half.read(&mut byte) => match read {
                Ok(0) | Err(_) => {
                    debug!(phase = %M::PHASE, %peer, "consumer disconnected");
                    break;
                }
                Ok(_) => {}
            },
        }
    }

    if on_disconnect == OnDisconnect::Drain {
        while let Some(record) = rx.recv().await {
            debug!(phase = %M::PHASE, %peer, ?record, "consumer gone, record dropped");
        }
    }
}
