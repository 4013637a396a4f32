//! Shared test utilities for exercising the webrpc runtime without real
//! sockets: an in-process paired [`Channel`] for session tests, and a
//! scriptable [`FakeRawConnector`] for [`DurableSocket`] reconnect tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use webrpc::durable_socket::{DurableSocketError, RawConnection, RawConnector};

pub use webrpc::channel::in_memory_pair as paired_channels;

/// One in-process physical connection produced by [`FakeRawConnector`].
/// Text frames written via [`RawConnection::send`] arrive on the paired
/// [`FakeServerHandle`] connection, and vice versa.
pub struct FakeRawConnection {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait::async_trait]
impl RawConnection for FakeRawConnection {
    async fn send(&mut self, frame: String) -> Result<(), DurableSocketError> {
        self.tx
            .send(frame)
            .map_err(|_| DurableSocketError::Transport("peer dropped".to_owned()))
    }

    async fn recv(&mut self) -> Result<Option<String>, DurableSocketError> {
        Ok(self.rx.recv().await)
    }
}

impl FakeRawConnection {
    /// Drive this end directly in a test without going through
    /// [`DurableSocket`] — e.g. to assert on keep-alive frames.
    pub async fn recv_raw(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn send_raw(&self, frame: impl Into<String>) {
        let _ = self.tx.send(frame.into());
    }
}

/// The "server" side of a [`FakeRawConnector`]: yields the peer half of each
/// connection the connector hands out, in the order they were opened.
pub struct FakeServerHandle {
    accept_rx: mpsc::UnboundedReceiver<FakeRawConnection>,
}

impl FakeServerHandle {
    pub async fn accept(&mut self) -> FakeRawConnection {
        self.accept_rx.recv().await.expect("connector dropped before accept")
    }
}

/// Scriptable [`RawConnector`] fake. Fails the first `fail_connects`
/// connection attempts, mirroring a briefly-unreachable server that later
/// starts accepting, then succeeds by handing out in-process duplex pairs.
pub struct FakeRawConnector {
    fail_connects: AtomicU32,
    accept_tx: mpsc::UnboundedSender<FakeRawConnection>,
}

impl FakeRawConnector {
    pub fn new(fail_connects: u32) -> (Arc<Self>, FakeServerHandle) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                fail_connects: AtomicU32::new(fail_connects),
                accept_tx,
            }),
            FakeServerHandle { accept_rx },
        )
    }
}

#[async_trait::async_trait]
impl RawConnector for FakeRawConnector {
    async fn connect(&self, _resume: Option<&str>) -> Result<Box<dyn RawConnection>, DurableSocketError> {
        let remaining = self.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connects.fetch_sub(1, Ordering::SeqCst);
            return Err(DurableSocketError::Connect("simulated unreachable".to_owned()));
        }

        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        let client_conn = FakeRawConnection { tx: client_tx, rx: client_rx };
        let server_conn = FakeRawConnection { tx: server_tx, rx: server_rx };
        let _ = self.accept_tx.send(server_conn);
        Ok(Box::new(client_conn))
    }
}
