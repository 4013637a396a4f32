//! Errors crossing the wire keep their kind, fields, and (masked) stack, and
//! an application can extend the standard kinds with its own factories.

use std::sync::Arc;

use serde_json::Value;
use webrpc::channel::in_memory_pair;
use webrpc::error::RpcError;
use webrpc::proxy::RequestSender;
use webrpc::{Dispatchable, ServiceHandle, Session, SessionOptions};
use webrpc_protocol::invalid_call_reasons;

struct Catalog;

#[async_trait::async_trait]
impl Dispatchable for Catalog {
    async fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        match method {
            "find" => {
                let id = params.first().and_then(Value::as_str).unwrap_or_default().to_owned();
                Err(RpcError::new("NotFoundError", format!("no item named {id}"))
                    .with_field("id", Value::from(id))
                    .mark_intentional())
            }
            "explode" => Err(RpcError::aggregate(
                "batch failed",
                vec![RpcError::type_error("bad a"), RpcError::range_error("bad b")],
            )),
            _ => Err(RpcError::invalid_call(invalid_call_reasons::NO_SUCH_METHOD, method)),
        }
    }
}

async fn acquire_catalog(client: &Session) -> Value {
    client.call_remote(Value::Null, "getLocalService", vec![Value::from("catalog")]).await.unwrap()
}

#[tokio::test]
async fn custom_error_kind_round_trips_through_a_registered_factory() {
    let (server_channel, client_channel) = in_memory_pair();
    let server = Session::new(server_channel, SessionOptions::default());
    server.expose_service(ServiceHandle::new("catalog", Arc::new(Catalog))).await;

    let client = Session::new(client_channel, SessionOptions::default());
    client
        .register_error_kind("NotFoundError", |wire| {
            RpcError::new(&wire.name, wire.message.clone())
                .with_field("id", wire.fields.get("id").cloned().unwrap_or(Value::Null))
        })
        .await;

    let service_ref = acquire_catalog(&client).await;
    let err = client.call_remote(service_ref, "find", vec![Value::from("widget")]).await.unwrap_err();

    assert_eq!(err.name, "NotFoundError");
    assert_eq!(err.fields.get("id"), Some(&Value::from("widget")));
}

#[tokio::test]
async fn default_options_mask_the_stack_trace_across_the_wire() {
    let (server_channel, client_channel) = in_memory_pair();
    let server = Session::new(server_channel, SessionOptions::default());
    server.expose_service(ServiceHandle::new("catalog", Arc::new(Catalog))).await;
    let client = Session::new(client_channel, SessionOptions::default());

    let service_ref = acquire_catalog(&client).await;
    let err = client.call_remote(service_ref, "find", vec![Value::from("x")]).await.unwrap_err();
    assert_eq!(err.stack.as_deref(), Some("NotFoundError: no item named x"));
}

#[tokio::test]
async fn aggregate_errors_preserve_their_child_errors_across_the_wire() {
    let (server_channel, client_channel) = in_memory_pair();
    let server = Session::new(server_channel, SessionOptions::default());
    server.expose_service(ServiceHandle::new("catalog", Arc::new(Catalog))).await;
    let client = Session::new(client_channel, SessionOptions::default());

    let service_ref = acquire_catalog(&client).await;
    let err = client.call_remote(service_ref, "explode", vec![]).await.unwrap_err();

    assert_eq!(err.name, "AggregateError");
    assert_eq!(err.errors.len(), 2);
    assert_eq!(err.errors[0].name, "TypeError");
    assert_eq!(err.errors[1].name, "RangeError");
}
