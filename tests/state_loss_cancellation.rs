//! A call left in flight when the channel reports state loss must fail fast
//! with `ChannelStateLost` instead of hanging until some caller-supplied
//! timeout gives up on it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use webrpc::channel::in_memory_pair;
use webrpc::error::RpcError;
use webrpc::proxy::RequestSender;
use webrpc::{Dispatchable, ServiceHandle, Session, SessionOptions};

struct Sleeper;

#[async_trait::async_trait]
impl Dispatchable for Sleeper {
    async fn dispatch(&self, _method: &str, _params: Vec<Value>) -> Result<Value, RpcError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn in_flight_call_fails_fast_once_the_channel_reports_state_loss() {
    let (server_channel, client_channel) = in_memory_pair();
    let server = Session::new(server_channel, SessionOptions::default());
    server.expose_service(ServiceHandle::new("sleeper", Arc::new(Sleeper))).await;

    let client = Session::new(client_channel.clone(), SessionOptions::default());
    let service_ref = client.call_remote(Value::Null, "getLocalService", vec![Value::from("sleeper")]).await.unwrap();

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call_remote(service_ref, "stall", vec![]).await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    client_channel.simulate_state_lost("transport dropped");

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.name, "ChannelStateLost");
}
