//! Persistent WebSocket transport for the group chat.
//!
//! A supervisor task owns the live link. It reconnects according to a
//! [`RetryPolicy`], re-announces the current group membership each time a link
//! opens, and forwards every decoded inbound frame to the controller in
//! arrival order. Connection state is published on a `watch` channel so
//! callers can observe `Connecting -> Open -> Reconnecting -> Failed`.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::client::services::retry::RetryPolicy;
use crate::common::protocol::{encode_frame, parse_frame, Frame, FrameError, Inbound, Presence};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Waiting before reconnect attempt `attempt`.
    Reconnecting { attempt: u32 },
    /// The retry policy gave up.
    Failed,
    /// Shut down on request.
    Closed,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection is not open")]
    NotOpen,
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// An established connection, seen from the client side. Dropping `outgoing`
/// closes the link; `incoming` ends when the peer goes away.
pub struct Link {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

/// Opens links to a chat endpoint.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> impl Future<Output = Result<Link, TransportError>> + Send;
}

/// Real connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        info!("[WS:CLIENT] Connecting to {}", url);
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        info!("[WS:CLIENT] Connected to {}", url);

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = out_rx.recv() => match outbound {
                        Some(text) => {
                            if let Err(e) = ws_sender.send(Message::Text(text)).await {
                                warn!("[WS:CLIENT] Failed to send frame: {}", e);
                                break;
                            }
                        }
                        None => {
                            let _ = ws_sender.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    inbound = ws_receiver.next() => match inbound {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(text).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("[WS:CLIENT] Connection closed by server");
                            break;
                        }
                        // binary, ping, pong
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("[WS:CLIENT] WebSocket error: {}", e);
                            break;
                        }
                    },
                }
            }
            debug!("[WS:CLIENT] Link task ended");
        });

        Ok(Link {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

#[derive(Default)]
struct Shared {
    outgoing: Option<mpsc::UnboundedSender<String>>,
    membership: Option<Presence>,
}

/// Cloneable handle to the supervised connection.
#[derive(Clone)]
pub struct TransportHandle {
    shared: Arc<Mutex<Shared>>,
    state: watch::Receiver<ConnectionState>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl TransportHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.lock().outgoing.is_some()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Waits until the connection state satisfies `pred`.
    pub async fn wait_for_state<F>(&self, mut pred: F) -> ConnectionState
    where
        F: FnMut(&ConnectionState) -> bool,
    {
        let mut rx = self.state.clone();
        let reached = rx.wait_for(|s| pred(s)).await.map(|state| *state);
        reached.unwrap_or_else(|_| *self.state.borrow())
    }

    pub fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let text = encode_frame(frame)?;
        let shared = self.lock();
        match &shared.outgoing {
            Some(tx) => tx.send(text).map_err(|_| TransportError::NotOpen),
            None => Err(TransportError::NotOpen),
        }
    }

    /// Records the group this client is in and announces it if the link is
    /// open. The supervisor replays the join on every reconnect.
    pub fn join(&self, presence: Presence) {
        let mut shared = self.lock();
        if let Some(tx) = &shared.outgoing {
            match encode_frame(&Frame::Join(presence.clone())) {
                Ok(text) => {
                    let _ = tx.send(text);
                }
                Err(e) => warn!("[WS:CLIENT] {}", e),
            }
        } else {
            debug!(
                "[WS:CLIENT] Not open; join for {} deferred to next connect",
                presence.group_id
            );
        }
        shared.membership = Some(presence);
    }

    /// Forgets the current membership and announces the leave if possible.
    /// Returns whether a leave frame was actually sent.
    pub fn leave(&self) -> bool {
        let mut shared = self.lock();
        let Some(presence) = shared.membership.take() else {
            return false;
        };
        let Some(tx) = &shared.outgoing else {
            debug!(
                "[WS:CLIENT] Not open; dropping leave for {}",
                presence.group_id
            );
            return false;
        };
        match encode_frame(&Frame::Leave(presence)) {
            Ok(text) => tx.send(text).is_ok(),
            Err(e) => {
                warn!("[WS:CLIENT] {}", e);
                false
            }
        }
    }

    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Transport;

impl Transport {
    /// Starts the supervisor. Decoded inbound frames are delivered on `frames`.
    pub fn spawn<C: Connector>(
        connector: C,
        url: String,
        policy: RetryPolicy,
        frames: mpsc::UnboundedSender<Inbound>,
    ) -> TransportHandle {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Mutex::new(Shared::default()));

        let supervisor = Supervisor {
            connector,
            url,
            policy,
            frames,
            shared: shared.clone(),
            state: state_tx,
            shutdown: shutdown_rx,
            rng: StdRng::from_entropy(),
        };
        tokio::spawn(supervisor.run());

        TransportHandle {
            shared,
            state: state_rx,
            shutdown: Arc::new(shutdown_tx),
        }
    }
}

struct Supervisor<C> {
    connector: C,
    url: String,
    policy: RetryPolicy,
    frames: mpsc::UnboundedSender<Inbound>,
    shared: Arc<Mutex<Shared>>,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Receiver<bool>,
    rng: StdRng,
}

enum LinkEnd {
    Dropped,
    Shutdown,
}

impl<C: Connector> Supervisor<C> {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            match self.connector.connect(&self.url).await {
                Ok(link) => {
                    attempt = 0;
                    self.install(link.outgoing);
                    self.set_state(ConnectionState::Open);
                    let end = self.pump(link.incoming).await;
                    self.lock().outgoing = None;
                    if let LinkEnd::Shutdown = end {
                        break;
                    }
                    warn!("[WS:CLIENT] Connection to {} dropped", self.url);
                }
                Err(e) => warn!("[WS:CLIENT] Connection attempt failed: {}", e),
            }

            attempt += 1;
            let Some(delay) = self.policy.delay_for(attempt, &mut self.rng) else {
                warn!(
                    "[WS:CLIENT] Giving up after {} reconnect attempts",
                    attempt - 1
                );
                self.set_state(ConnectionState::Failed);
                return;
            };
            self.set_state(ConnectionState::Reconnecting { attempt });
            info!(
                "[WS:CLIENT] Reconnecting in {:?} (attempt {})",
                delay, attempt
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => {}
            }
        }
        self.lock().outgoing = None;
        self.set_state(ConnectionState::Closed);
        info!("[WS:CLIENT] Transport closed");
    }

    /// Makes the link available to senders, replaying the join first so it is
    /// always the first frame on a fresh link.
    fn install(&self, outgoing: mpsc::UnboundedSender<String>) {
        let mut shared = self.lock();
        if let Some(presence) = shared.membership.clone() {
            match encode_frame(&Frame::Join(presence)) {
                Ok(text) => {
                    let _ = outgoing.send(text);
                }
                Err(e) => warn!("[WS:CLIENT] {}", e),
            }
        }
        shared.outgoing = Some(outgoing);
    }

    async fn pump(&mut self, mut incoming: mpsc::UnboundedReceiver<String>) -> LinkEnd {
        loop {
            tokio::select! {
                text = incoming.recv() => {
                    let Some(text) = text else { return LinkEnd::Dropped };
                    match parse_frame(&text) {
                        Ok(inbound) => {
                            if self.frames.send(inbound).is_err() {
                                debug!("[WS:CLIENT] Frame consumer gone, shutting down");
                                return LinkEnd::Shutdown;
                            }
                        }
                        Err(e) => warn!(
                            "[WS:CLIENT] Dropping malformed frame: {} - Raw: {}",
                            e, text
                        ),
                    }
                }
                _ = self.shutdown.changed() => return LinkEnd::Shutdown,
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process connector: every accepted link shows up as a [`MemoryPeer`]
/// standing in for the server side. Useful for embedding and tests.
#[derive(Clone)]
pub struct MemoryConnector {
    inner: Arc<Mutex<MemoryInner>>,
    accepted: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryPeer>>>,
}

struct MemoryInner {
    refusing: bool,
    attempts: Vec<tokio::time::Instant>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        let (peers, accepted) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Mutex::new(MemoryInner {
                refusing: false,
                attempts: Vec::new(),
                peers,
            })),
            accepted: Arc::new(tokio::sync::Mutex::new(accepted)),
        }
    }

    /// While refusing, every connect attempt fails.
    pub fn set_refusing(&self, refusing: bool) {
        self.lock().refusing = refusing;
    }

    /// Times of every connect attempt so far, successful or not.
    pub fn attempts(&self) -> Vec<tokio::time::Instant> {
        self.lock().attempts.clone()
    }

    /// Waits for the next accepted link.
    pub async fn accept(&self) -> Option<MemoryPeer> {
        self.accepted.lock().await.recv().await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let mut inner = self.lock();
        inner.attempts.push(tokio::time::Instant::now());
        if inner.refusing {
            return Err(TransportError::ConnectionFailed(format!("{} refused", url)));
        }
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            received: out_rx,
            sender: in_tx,
        };
        inner.peers.send(peer).map_err(|_| {
            TransportError::ConnectionFailed("memory connector dropped".to_string())
        })?;
        Ok(Link {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

/// Server end of an in-memory link. Dropping it drops the connection.
pub struct MemoryPeer {
    received: mpsc::UnboundedReceiver<String>,
    sender: mpsc::UnboundedSender<String>,
}

impl MemoryPeer {
    pub fn push(&self, frame: &Frame) -> bool {
        match encode_frame(frame) {
            Ok(text) => self.push_text(text),
            Err(_) => false,
        }
    }

    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.sender.send(text.into()).is_ok()
    }

    /// Next frame the client sent, skipping anything undecodable.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        while let Some(text) = self.received.recv().await {
            if let Ok(Inbound::Frame(frame)) = parse_frame(&text) {
                return Some(frame);
            }
        }
        None
    }

    /// Frames already sent by the client, without waiting.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(text) = self.received.try_recv() {
            if let Ok(Inbound::Frame(frame)) = parse_frame(&text) {
                frames.push(frame);
            }
        }
        frames
    }
}
