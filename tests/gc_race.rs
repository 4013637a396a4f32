//! A capability handed to a peer that never retains it must eventually be
//! released: once the receiving side's last proxy for it drops, a `$release`
//! round trip should let the sending side's own drop of its last local
//! strong reference actually run the object's destructor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use webrpc::channel::in_memory_pair;
use webrpc::error::RpcError;
use webrpc::proxy::RequestSender;
use webrpc::{Dispatchable, ServiceHandle, Session, SessionOptions};

struct Sink;

#[async_trait::async_trait]
impl Dispatchable for Sink {
    async fn dispatch(&self, _method: &str, _params: Vec<Value>) -> Result<Value, RpcError> {
        // Deliberately doesn't retain the capability parameter: once this
        // call returns, the server side has no reason to keep it alive.
        Ok(Value::Null)
    }
}

struct TrackedCapability {
    dropped: Arc<AtomicBool>,
}

impl Drop for TrackedCapability {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Dispatchable for TrackedCapability {
    async fn dispatch(&self, _method: &str, _params: Vec<Value>) -> Result<Value, RpcError> {
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn capability_is_released_once_the_peer_drops_its_last_proxy() {
    let (server_channel, client_channel) = in_memory_pair();
    let server = Session::new(server_channel, SessionOptions::default());
    server.expose_service(ServiceHandle::new("sink", Arc::new(Sink))).await;

    let client = Session::new(client_channel, SessionOptions::default());
    let service_ref = client.call_remote(Value::Null, "getLocalService", vec![Value::from("sink")]).await.unwrap();

    let dropped = Arc::new(AtomicBool::new(false));
    let tracked: Arc<dyn Dispatchable> = Arc::new(TrackedCapability { dropped: dropped.clone() });
    let cap = client.register_capability("tracked", tracked.clone()).await;

    client.call_remote(service_ref, "consume", vec![cap]).await.unwrap();
    // Drop every local strong reference this test holds; only the outstanding
    // registry keeps the object alive now, pending the server's release.
    drop(tracked);

    let mut waited = Duration::ZERO;
    while !dropped.load(Ordering::SeqCst) && waited < Duration::from_secs(1) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    assert!(dropped.load(Ordering::SeqCst), "capability was never released back");
}
