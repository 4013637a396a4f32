//! Calls the echo demo's "say" method once with a message taken from the
//! command line (or a default), through the reconnecting client stack.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;
use webrpc::durable_socket::{DurableSocket, DurableSocketOptions, WebSocketConnector};
use webrpc::ServiceProxy;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match echo_demo::config::load_client_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("FATAL: failed to load config: {err}");
            std::process::exit(1);
        }
    };

    let message = std::env::args().nth(1).unwrap_or_else(|| "hello from echo-client".to_owned());

    let connector = Arc::new(WebSocketConnector::new(config.server_url.clone()));
    let socket = DurableSocket::connect(connector, DurableSocketOptions::default());
    let proxy = ServiceProxy::new(socket, "echo");

    info!(server = %config.server_url, %message, "calling echo");
    let reply = proxy.call("say", vec![Value::from(message)]).await.expect("echo call failed");
    println!("{reply}");
}
