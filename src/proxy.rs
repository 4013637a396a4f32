//! Proxy (§4.3): the statically-typed stand-in for a host-language Proxy
//! object. Since Rust cannot intercept arbitrary member access the way a
//! dynamic Proxy can, a remote capability is represented as a [`RemoteHandle`]
//! with explicit `call`/`subscribe` methods keyed by name, rather than a
//! value that transparently forwards every method call.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::dispatch::Dispatchable;
use crate::error::RpcError;

/// Abstraction a [`RemoteHandle`] sends requests through. Implemented by
/// [`crate::session::Session`]; kept as a trait here so this module does not
/// need to know about sessions, registries, or the wire envelope.
#[async_trait::async_trait]
pub trait RequestSender: Send + Sync {
    async fn call_remote(&self, receiver: Value, method: &str, params: Vec<Value>) -> Result<Value, RpcError>;

    async fn subscribe_remote(&self, receiver: Value, event: &str) -> Result<RemoteSubscription, RpcError>;
}

/// A live subscription to a remote event. Dropping this unsubscribes on the
/// session's next housekeeping pass; call [`RemoteSubscription::unsubscribe`]
/// to do so eagerly.
pub struct RemoteSubscription {
    pub events: mpsc::UnboundedReceiver<Value>,
    /// Keeps the local callback object registered for the lifetime of the
    /// subscription — [`crate::registry::LocalObjectRegistry`] only holds a
    /// weak reference, so nothing else keeps this alive.
    _callback_keepalive: Arc<dyn Dispatchable>,
    unsubscribe: Box<dyn FnOnce() + Send>,
}

impl RemoteSubscription {
    pub fn new(
        events: mpsc::UnboundedReceiver<Value>,
        callback_keepalive: Arc<dyn Dispatchable>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            _callback_keepalive: callback_keepalive,
            unsubscribe: Box::new(unsubscribe),
        }
    }

    pub fn unsubscribe(self) {
        (self.unsubscribe)();
    }
}

/// A handle to an object that lives on the remote side of a session. Holds
/// the wire-form receiver descriptor for itself and a reference back to
/// whatever can actually dispatch calls for it.
#[derive(Clone)]
pub struct RemoteHandle {
    receiver: Value,
    sender: Arc<dyn RequestSender>,
}

impl RemoteHandle {
    pub fn new(receiver: Value, sender: Arc<dyn RequestSender>) -> Self {
        Self { receiver, sender }
    }

    pub fn receiver_descriptor(&self) -> &Value {
        &self.receiver
    }

    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        self.sender.call_remote(self.receiver.clone(), method, params).await
    }

    pub async fn subscribe(&self, event: &str) -> Result<RemoteSubscription, RpcError> {
        self.sender.subscribe_remote(self.receiver.clone(), event).await
    }
}

/// A proxy dispatches by forwarding to its remote side, so it can sit in the
/// same [`crate::registry::ProxyRegistry`] slot local objects occupy in
/// [`crate::registry::LocalObjectRegistry`].
#[async_trait::async_trait]
impl Dispatchable for RemoteHandle {
    async fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        self.call(method, params).await
    }
}
