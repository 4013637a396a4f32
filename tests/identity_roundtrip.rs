//! Two independent `getLocalService` acquisitions of the same name must
//! resolve to the same underlying object, not two unrelated copies — proven
//! here via shared mutable state rather than pointer comparison, since the
//! client only ever sees wire descriptors.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use webrpc::channel::in_memory_pair;
use webrpc::error::RpcError;
use webrpc::proxy::RequestSender;
use webrpc::{Dispatchable, ServiceHandle, Session, SessionOptions};
use webrpc_protocol::invalid_call_reasons;

struct Counter {
    value: AtomicI64,
}

#[async_trait::async_trait]
impl Dispatchable for Counter {
    async fn dispatch(&self, method: &str, _params: Vec<Value>) -> Result<Value, RpcError> {
        match method {
            "increment" => Ok(Value::from(self.value.fetch_add(1, Ordering::SeqCst) + 1)),
            "get" => Ok(Value::from(self.value.load(Ordering::SeqCst))),
            _ => Err(RpcError::invalid_call(invalid_call_reasons::NO_SUCH_METHOD, method)),
        }
    }
}

#[tokio::test]
async fn two_independent_acquisitions_of_the_same_service_share_identity() {
    let (server_channel, client_channel) = in_memory_pair();
    let server = Session::new(server_channel, SessionOptions::default());
    server
        .expose_service(ServiceHandle::new("counter", Arc::new(Counter { value: AtomicI64::new(0) })))
        .await;

    let client = Session::new(client_channel, SessionOptions::default());
    let ref_a = client.call_remote(Value::Null, "getLocalService", vec![Value::from("counter")]).await.unwrap();
    let ref_b = client.call_remote(Value::Null, "getLocalService", vec![Value::from("counter")]).await.unwrap();

    client.call_remote(ref_a.clone(), "increment", vec![]).await.unwrap();
    client.call_remote(ref_a, "increment", vec![]).await.unwrap();
    let via_b = client.call_remote(ref_b, "get", vec![]).await.unwrap();

    assert_eq!(via_b, Value::from(2));
}
