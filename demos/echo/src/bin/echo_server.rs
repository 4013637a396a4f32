//! Accepts WebSocket connections and exposes a single "echo" service on each
//! one: `say(x)` returns `x` unchanged.

use std::sync::Arc;

use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{info, warn};
use webrpc::{Dispatchable, RpcError, ServiceHandle, Session, SessionOptions};
use webrpc_protocol::invalid_call_reasons;

use echo_demo::ws_channel::WsChannel;

struct Echo;

#[async_trait::async_trait]
impl Dispatchable for Echo {
    async fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        match method {
            "say" => Ok(params.into_iter().next().unwrap_or(Value::Null)),
            _ => Err(RpcError::invalid_call(invalid_call_reasons::NO_SUCH_METHOD, method)),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match echo_demo::config::load_server_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("FATAL: failed to load config: {err}");
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind(&config.bind).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("FATAL: failed to bind {}: {err}", config.bind);
            std::process::exit(1);
        }
    };
    info!(bind = %config.bind, "echo-server listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "accept failed");
                continue;
            }
        };
        tokio::spawn(async move {
            let ws = match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => ws,
                Err(err) => {
                    warn!(%peer, error = %err, "websocket handshake failed");
                    return;
                }
            };
            let channel = WsChannel::spawn(ws);
            let session = Session::new(channel, SessionOptions::default());
            session
                .expose_service(ServiceHandle::new("echo", Arc::new(Echo)).describe("Echoes back whatever it's given"))
                .await;
            info!(%peer, "session established");
        });
    }
}
