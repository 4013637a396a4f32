//! Durable socket (§4.1): the reconnecting [`Channel`] most applications
//! plug into a [`crate::session::Session`]. Frames sent while disconnected
//! queue in order and replay once a new physical connection comes up; a
//! session id threaded through [`RawConnector::connect`] lets the peer
//! recognize a reconnect as a continuation rather than a fresh identity.
//!
//! The transport itself is pluggable via [`RawConnector`]/[`RawConnection`]
//! so tests can swap in an in-process fake instead of a real socket.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelError, Readiness};

#[derive(Debug, Error)]
pub enum DurableSocketError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// One live physical connection underneath a [`DurableSocket`]. Implemented
/// by [`WebSocketConnector`]'s connections in production, and by an
/// in-process fake in tests.
#[async_trait::async_trait]
pub trait RawConnection: Send {
    async fn send(&mut self, frame: String) -> Result<(), DurableSocketError>;

    /// `Ok(None)` means the peer closed the connection cleanly.
    async fn recv(&mut self) -> Result<Option<String>, DurableSocketError>;

    async fn close(&mut self) {}
}

/// Opens physical connections on demand. `resume` carries the session id
/// from a previous connection, if any, so the implementation can attach it
/// (as a query parameter, a resume header, whatever the transport supports)
/// and let the peer restore continuity instead of treating the reconnect as
/// a brand new identity.
#[async_trait::async_trait]
pub trait RawConnector: Send + Sync {
    async fn connect(&self, resume: Option<&str>) -> Result<Box<dyn RawConnection>, DurableSocketError>;
}

#[derive(Debug, Clone)]
pub struct DurableSocketOptions {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Fraction of the computed delay to randomize by, on each side, so a
    /// fleet of clients reconnecting at once doesn't thunder back in lockstep.
    pub jitter_ratio: f64,
    /// How often to push a keep-alive ping while idle.
    pub keepalive_interval: Duration,
    /// If no pong (or other traffic) has crossed the wire in this long,
    /// treat the connection as dead and reconnect.
    pub keepalive_timeout: Duration,
    /// Give up permanently after this many consecutive failed connect
    /// attempts. `0` means retry forever.
    pub max_attempts: u32,
}

impl Default for DurableSocketOptions {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 1.5,
            jitter_ratio: 0.05,
            keepalive_interval: Duration::from_secs(10),
            keepalive_timeout: Duration::from_secs(25),
            max_attempts: 0,
        }
    }
}

fn backoff_delay(attempt: u32, options: &DurableSocketOptions) -> Duration {
    let exp = options.backoff_multiplier.powi(attempt as i32);
    let base = (options.initial_backoff.as_secs_f64() * exp).min(options.max_backoff.as_secs_f64());
    let jitter = base * options.jitter_ratio;
    let delta = rand::thread_rng().gen_range(-jitter..=jitter);
    Duration::from_secs_f64((base + delta).max(0.0))
}

/// Reconnecting [`Channel`]. `open`/`lost`/`restore`/`close` are surfaced
/// through [`Channel::ready`] and [`Channel::state_lost`] edges: the first
/// ready transition is "open", a ready→not-ready transition is "lost" (with
/// a reason), and a not-ready→ready transition after at least one prior
/// connection is "restore".
pub struct DurableSocket {
    outbound: Arc<OutboundQueue>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    ready_tx: watch::Sender<Readiness>,
    ready_rx: watch::Receiver<Readiness>,
    state_lost_tx: watch::Sender<Option<String>>,
    state_lost_rx: watch::Receiver<Option<String>>,
    closed: Arc<AtomicBool>,
    force_reconnect: Arc<Notify>,
}

struct OutboundQueue {
    queue: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl OutboundQueue {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    async fn push(&self, frame: String) {
        self.queue.lock().await.push_back(frame);
        self.notify.notify_one();
    }

    async fn push_front(&self, frame: String) {
        self.queue.lock().await.push_front(frame);
    }

    async fn pop(&self) -> String {
        loop {
            if let Some(frame) = self.queue.lock().await.pop_front() {
                return frame;
            }
            self.notify.notified().await;
        }
    }
}

impl DurableSocket {
    /// Open a durable socket and start its background reconnect loop.
    /// Returns immediately; the first physical connection happens in the
    /// background, with [`Channel::ready`] reporting [`Readiness::NotReady`]
    /// until it succeeds.
    pub fn connect(connector: Arc<dyn RawConnector>, options: DurableSocketOptions) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = watch::channel(Readiness::NotReady);
        let (state_lost_tx, state_lost_rx) = watch::channel(None);

        let socket = Arc::new(Self {
            outbound: Arc::new(OutboundQueue::new()),
            inbound_rx: Mutex::new(inbound_rx),
            ready_tx,
            ready_rx,
            state_lost_tx,
            state_lost_rx,
            closed: Arc::new(AtomicBool::new(false)),
            force_reconnect: Arc::new(Notify::new()),
        });

        socket.clone().spawn_reconnect_loop(connector, options, inbound_tx);
        socket
    }

    /// Forcibly drop the current underlying connection to trigger the
    /// reconnect path, e.g. for a health check that decided the transport
    /// is wedged despite still looking alive.
    pub fn reconnect(&self) {
        self.force_reconnect.notify_one();
    }

    fn spawn_reconnect_loop(
        self: Arc<Self>,
        connector: Arc<dyn RawConnector>,
        options: DurableSocketOptions,
        inbound_tx: mpsc::UnboundedSender<String>,
    ) {
        tokio::spawn(async move {
            let mut session_id: Option<String> = None;
            let mut ever_connected = false;
            let mut attempt = 0u32;

            loop {
                if self.closed.load(Ordering::SeqCst) {
                    return;
                }

                let raw = match connector.connect(session_id.as_deref()).await {
                    Ok(raw) => raw,
                    Err(err) => {
                        attempt = attempt.saturating_add(1);
                        if options.max_attempts != 0 && attempt >= options.max_attempts {
                            warn!(attempts = attempt, "durable socket giving up permanently (503)");
                            self.closed.store(true, Ordering::SeqCst);
                            let _ = self.ready_tx.send(Readiness::NotReady);
                            let _ = self
                                .state_lost_tx
                                .send(Some("fatal: exceeded max_attempts (503)".to_owned()));
                            return;
                        }
                        let delay = backoff_delay(attempt - 1, &options);
                        warn!(error = %err, delay_ms = delay.as_millis() as u64, "durable socket connect failed, backing off");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                };

                attempt = 0;
                let _ = self.ready_tx.send(Readiness::Ready);
                let _ = self.state_lost_tx.send(None);
                if ever_connected {
                    info!("durable socket restored");
                } else {
                    info!("durable socket open");
                    ever_connected = true;
                }

                let lost_reason = self.run_connection(raw, &options, &inbound_tx, &mut session_id).await;

                if self.closed.load(Ordering::SeqCst) {
                    return;
                }
                let _ = self.ready_tx.send(Readiness::NotReady);
                let _ = self.state_lost_tx.send(Some(lost_reason.clone()));
                warn!(reason = %lost_reason, "durable socket lost, reconnecting");
            }
        });
    }

    /// Run one physical connection until it fails, returning the failure
    /// reason. Pumps the outbound queue, forwards inbound frames, and
    /// enforces the keep-alive/liveness timeout.
    async fn run_connection(
        &self,
        mut raw: Box<dyn RawConnection>,
        options: &DurableSocketOptions,
        inbound_tx: &mpsc::UnboundedSender<String>,
        session_id: &mut Option<String>,
    ) -> String {
        let mut last_activity = tokio::time::Instant::now();
        let mut keepalive = tokio::time::interval(options.keepalive_interval);
        keepalive.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                () = self.force_reconnect.notified() => {
                    raw.close().await;
                    return "forced reconnect".to_owned();
                }
                frame = self.outbound.pop() => {
                    if let Err(err) = raw.send(frame.clone()).await {
                        self.outbound.push_front(frame).await;
                        raw.close().await;
                        return err.to_string();
                    }
                    last_activity = tokio::time::Instant::now();
                }
                received = raw.recv() => {
                    match received {
                        Ok(Some(frame)) => {
                            last_activity = tokio::time::Instant::now();
                            if let Some(id) = extract_session_id(&frame) {
                                *session_id = Some(id);
                            }
                            // Keep-alive frames are this layer's own business
                            // and never propagate to the session above.
                            if frame == KEEPALIVE_PONG {
                                continue;
                            }
                            if frame == KEEPALIVE_PING {
                                if let Err(err) = raw.send(KEEPALIVE_PONG.to_owned()).await {
                                    raw.close().await;
                                    return err.to_string();
                                }
                                continue;
                            }
                            if inbound_tx.send(frame).is_err() {
                                raw.close().await;
                                return "inbound receiver dropped".to_owned();
                            }
                        }
                        Ok(None) => {
                            raw.close().await;
                            return "peer closed connection".to_owned();
                        }
                        Err(err) => {
                            raw.close().await;
                            return err.to_string();
                        }
                    }
                }
                _ = keepalive.tick() => {
                    if last_activity.elapsed() > options.keepalive_timeout {
                        raw.close().await;
                        return "keep-alive timeout".to_owned();
                    }
                    if let Err(err) = raw.send(KEEPALIVE_PING.to_owned()).await {
                        raw.close().await;
                        return err.to_string();
                    }
                    debug!("durable socket keep-alive sent");
                }
            }
        }
    }
}

const KEEPALIVE_PING: &str = r#"{"type":"ping"}"#;
const KEEPALIVE_PONG: &str = r#"{"type":"pong"}"#;

/// Recognize the `{"type":"setSessionId","id":"<opaque>"}` control frame a
/// conformant peer sends right after a connection is established, carrying
/// the session id to present on a later reconnect.
fn extract_session_id(frame: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(frame).ok()?;
    if value.get("type")?.as_str()? != "setSessionId" {
        return None;
    }
    value.get("id")?.as_str().map(str::to_owned)
}

#[async_trait::async_trait]
impl Channel for DurableSocket {
    async fn send(&self, frame: String) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        self.outbound.push(frame).await;
        Ok(())
    }

    fn ready(&self) -> watch::Receiver<Readiness> {
        self.ready_rx.clone()
    }

    fn state_lost(&self) -> watch::Receiver<Option<String>> {
        self.state_lost_rx.clone()
    }

    async fn recv(&self) -> Option<String> {
        self.inbound_rx.lock().await.recv().await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.ready_tx.send(Readiness::NotReady);
        let _ = self.state_lost_tx.send(Some("closed".to_owned()));
    }
}

// ---------------------------------------------------------------------------
// Production connector: a real WebSocket, Bearer-authenticated
// ---------------------------------------------------------------------------

/// Opens real WebSocket connections, attaching a Bearer token and (when
/// resuming) the prior session id as a query parameter.
pub struct WebSocketConnector {
    url: String,
    token: Option<String>,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), token: None }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[async_trait::async_trait]
impl RawConnector for WebSocketConnector {
    async fn connect(&self, resume: Option<&str>) -> Result<Box<dyn RawConnection>, DurableSocketError> {
        use tokio_tungstenite::connect_async;

        let url = match resume {
            Some(session_id) => format!(
                "{}{}sessionId={}",
                self.url,
                if self.url.contains('?') { '&' } else { '?' },
                session_id
            ),
            None => self.url.clone(),
        };
        let request = build_ws_request(&url, self.token.as_deref())?;
        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| DurableSocketError::Connect(e.to_string()))?;
        Ok(Box::new(WebSocketConnection { ws }))
    }
}

struct WebSocketConnection {
    ws: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
}

#[async_trait::async_trait]
impl RawConnection for WebSocketConnection {
    async fn send(&mut self, frame: String) -> Result<(), DurableSocketError> {
        use futures_util::SinkExt;
        self.ws
            .send(tokio_tungstenite::tungstenite::protocol::Message::Text(frame.into()))
            .await
            .map_err(|e| DurableSocketError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<String>, DurableSocketError> {
        use futures_util::StreamExt;
        use tokio_tungstenite::tungstenite::protocol::Message;

        loop {
            match self.ws.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(DurableSocketError::Transport(e.to_string())),
                Some(Ok(Message::Text(t))) => return Ok(Some(t.to_string())),
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Ping(data))) => {
                    use futures_util::SinkExt;
                    let _ = self.ws.send(Message::Pong(data)).await;
                    continue;
                }
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn close(&mut self) {
        use futures_util::SinkExt;
        let _ = self.ws.close(None).await;
    }
}

fn build_ws_request(
    url: &str,
    token: Option<&str>,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, DurableSocketError> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .map_err(|e| DurableSocketError::Connect(format!("invalid URL '{url}': {e}")))?;

    if let Some(token) = token {
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {token}").parse().map_err(
                |e: tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue| {
                    DurableSocketError::Connect(format!("invalid auth header: {e}"))
                },
            )?,
        );
    }

    Ok(request)
}
