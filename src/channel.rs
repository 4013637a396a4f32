//! Abstract duplex message transport (§4.1).
//!
//! A [`Channel`] is the only thing a [`crate::session::Session`] depends on
//! for moving bytes. It never assumes framing size limits, ordering across
//! reconnects, or delivery receipts — those are the concern of whichever
//! concrete channel is plugged in (see [`crate::durable_socket::DurableSocket`]
//! for the reconnecting one).

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,
    #[error("send failed: {0}")]
    Send(String),
}

/// Current readiness of a channel, as observed by late subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady,
}

/// Abstract duplex transport. Implementors push inbound frames onto the
/// `received` stream returned by [`Channel::receiver`] and accept outbound
/// frames via [`Channel::send`].
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    /// Send a single text frame. May suspend until the channel is ready;
    /// must not silently drop the frame.
    async fn send(&self, frame: String) -> Result<(), ChannelError>;

    /// A `watch` channel reflecting current readiness. Subscribers that join
    /// late observe the *current* value, not a missed past edge — this is
    /// exactly the semantics `tokio::sync::watch` provides.
    fn ready(&self) -> watch::Receiver<Readiness>;

    /// Fires with a human-readable reason once per ready→not-ready
    /// transition. `None` once the channel is permanently closed.
    fn state_lost(&self) -> watch::Receiver<Option<String>>;

    /// Pull the next inbound text frame. Returns `None` once the channel is
    /// closed for good and will never produce another frame.
    async fn recv(&self) -> Option<String>;

    /// Optional graceful shutdown. Default: no-op.
    async fn close(&self) {}
}

/// One half of an in-memory paired channel — the test/same-process built-in
/// kind from §4.1. Construct a pair with [`in_memory_pair`].
pub struct InMemoryChannel {
    outbound: mpsc::UnboundedSender<String>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    ready_tx: watch::Sender<Readiness>,
    ready_rx: watch::Receiver<Readiness>,
    state_lost_tx: watch::Sender<Option<String>>,
    state_lost_rx: watch::Receiver<Option<String>>,
}

impl InMemoryChannel {
    /// Simulate a state-loss transition without actually closing anything —
    /// useful for service-proxy recovery tests (§8 S5).
    pub fn simulate_state_lost(&self, reason: impl Into<String>) {
        let _ = self.ready_tx.send(Readiness::NotReady);
        let _ = self.state_lost_tx.send(Some(reason.into()));
    }

    /// Simulate the channel becoming ready again after a simulated loss.
    pub fn simulate_ready(&self) {
        let _ = self.ready_tx.send(Readiness::Ready);
    }
}

#[async_trait::async_trait]
impl Channel for InMemoryChannel {
    async fn send(&self, frame: String) -> Result<(), ChannelError> {
        self.outbound
            .send(frame)
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    fn ready(&self) -> watch::Receiver<Readiness> {
        self.ready_rx.clone()
    }

    fn state_lost(&self) -> watch::Receiver<Option<String>> {
        self.state_lost_rx.clone()
    }

    async fn recv(&self) -> Option<String> {
        self.inbound.lock().await.recv().await
    }
}

/// Build a connected pair of [`InMemoryChannel`]s: frames sent on one side
/// arrive on the other's `recv`.
pub fn in_memory_pair() -> (Arc<InMemoryChannel>, Arc<InMemoryChannel>) {
    let (a_to_b_tx, a_to_b_rx) = mpsc::unbounded_channel();
    let (b_to_a_tx, b_to_a_rx) = mpsc::unbounded_channel();

    let (a_ready_tx, a_ready_rx) = watch::channel(Readiness::Ready);
    let (a_lost_tx, a_lost_rx) = watch::channel(None);
    let (b_ready_tx, b_ready_rx) = watch::channel(Readiness::Ready);
    let (b_lost_tx, b_lost_rx) = watch::channel(None);

    let a = Arc::new(InMemoryChannel {
        outbound: a_to_b_tx,
        inbound: tokio::sync::Mutex::new(b_to_a_rx),
        ready_tx: a_ready_tx,
        ready_rx: a_ready_rx,
        state_lost_tx: a_lost_tx,
        state_lost_rx: a_lost_rx,
    });
    let b = Arc::new(InMemoryChannel {
        outbound: b_to_a_tx,
        inbound: tokio::sync::Mutex::new(a_to_b_rx),
        ready_tx: b_ready_tx,
        ready_rx: b_ready_rx,
        state_lost_tx: b_lost_tx,
        state_lost_rx: b_lost_rx,
    });
    (a, b)
}
