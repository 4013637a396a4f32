//! The same capability placeholder, passed twice in one call's parameter
//! list, must collapse onto a single decoded proxy within that call — not
//! two independent ones — proven by echoing the decoded parameters straight
//! back and comparing them.

use std::sync::Arc;

use serde_json::Value;
use webrpc::channel::in_memory_pair;
use webrpc::error::RpcError;
use webrpc::proxy::RequestSender;
use webrpc::{Dispatchable, ServiceHandle, Session, SessionOptions};
use webrpc_protocol::invalid_call_reasons;

struct EchoParams;

#[async_trait::async_trait]
impl Dispatchable for EchoParams {
    async fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        match method {
            "echo" => Ok(Value::Array(params)),
            _ => Err(RpcError::invalid_call(invalid_call_reasons::NO_SUCH_METHOD, method)),
        }
    }
}

struct Callback;

#[async_trait::async_trait]
impl Dispatchable for Callback {
    async fn dispatch(&self, _method: &str, _params: Vec<Value>) -> Result<Value, RpcError> {
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn repeated_capability_in_one_call_resolves_to_the_same_proxy() {
    let (server_channel, client_channel) = in_memory_pair();
    let server = Session::new(server_channel, SessionOptions::default());
    server.expose_service(ServiceHandle::new("probe", Arc::new(EchoParams))).await;

    let client = Session::new(client_channel, SessionOptions::default());
    let service_ref = client.call_remote(Value::Null, "getLocalService", vec![Value::from("probe")]).await.unwrap();

    let cap = client.register_capability("cb", Arc::new(Callback)).await;
    let result = client.call_remote(service_ref, "echo", vec![cap.clone(), cap]).await.unwrap();

    let items = result.as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], items[1]);
}
