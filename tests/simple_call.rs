//! End-to-end happy path through the public façade: a channel, a session on
//! each end, a service exposed with introspection, and a call round-tripped
//! through [`ServiceProxy`] without ever touching `Session` directly.

use std::sync::Arc;

use serde_json::Value;
use webrpc::channel::in_memory_pair;
use webrpc::error::RpcError;
use webrpc::introspection::method;
use webrpc::{Dispatchable, ServiceHandle, ServiceProxy, Session, SessionOptions};
use webrpc_protocol::{invalid_call_reasons, SimpleType};

struct Calculator;

#[async_trait::async_trait]
impl Dispatchable for Calculator {
    async fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        match method {
            "add" => {
                let a = params[0].as_i64().ok_or_else(|| RpcError::type_error("expected a number"))?;
                let b = params[1].as_i64().ok_or_else(|| RpcError::type_error("expected a number"))?;
                Ok(Value::from(a + b))
            }
            _ => Err(RpcError::invalid_call(invalid_call_reasons::NO_SUCH_METHOD, method)),
        }
    }
}

#[tokio::test]
async fn calling_a_method_through_the_service_proxy_round_trips() {
    let (server_channel, client_channel) = in_memory_pair();
    let server = Session::new(server_channel, SessionOptions::default());
    server
        .expose_service(
            ServiceHandle::new("calc", Arc::new(Calculator))
                .describe("Basic arithmetic")
                .with_introspection(
                    Session::introspection_builder("calc")
                        .method(method("add", SimpleType::Number).param("a", SimpleType::Number).param("b", SimpleType::Number))
                        .build(),
                ),
        )
        .await;

    let proxy = ServiceProxy::new(client_channel, "calc");
    let sum = proxy.call("add", vec![Value::from(2), Value::from(40)]).await.unwrap();
    assert_eq!(sum, Value::from(42));
}

#[tokio::test]
async fn calling_an_unknown_method_surfaces_an_invalid_call_error() {
    let (server_channel, client_channel) = in_memory_pair();
    let server = Session::new(server_channel, SessionOptions::default());
    server.expose_service(ServiceHandle::new("calc", Arc::new(Calculator))).await;

    let proxy = ServiceProxy::new(client_channel, "calc");
    let err = proxy.call("multiply", vec![Value::from(2), Value::from(3)]).await.unwrap_err();
    assert_eq!(err.name, "InvalidCallError");
}
