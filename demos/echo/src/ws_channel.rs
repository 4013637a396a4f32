//! Adapts one accepted WebSocket connection to [`webrpc::Channel`], the same
//! shape as `webrpc`'s own [`webrpc::InMemoryChannel`] but backed by a real
//! socket instead of an in-process pair — pump tasks on both directions,
//! readiness/state-loss reported through `watch` channels.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use webrpc::{Channel, ChannelError, Readiness};

pub struct WsChannel {
    outbound: mpsc::UnboundedSender<String>,
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
    ready_rx: watch::Receiver<Readiness>,
    state_lost_rx: watch::Receiver<Option<String>>,
}

impl WsChannel {
    pub fn spawn(stream: WebSocketStream<TcpStream>) -> Arc<Self> {
        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = watch::channel(Readiness::Ready);
        let (state_lost_tx, state_lost_rx) = watch::channel(None);

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if sink.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if inbound_tx.send(text.to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
            let _ = ready_tx.send(Readiness::NotReady);
            let _ = state_lost_tx.send(Some("connection closed".to_owned()));
        });

        Arc::new(Self {
            outbound: outbound_tx,
            inbound: Mutex::new(inbound_rx),
            ready_rx,
            state_lost_rx,
        })
    }
}

#[async_trait::async_trait]
impl Channel for WsChannel {
    async fn send(&self, frame: String) -> Result<(), ChannelError> {
        self.outbound.send(frame).map_err(|e| ChannelError::Send(e.to_string()))
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
