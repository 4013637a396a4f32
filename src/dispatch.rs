//! The common capability trait: anything a reference descriptor can point
//! to — a local object answering calls directly, or a [`crate::proxy::RemoteHandle`]
//! forwarding them over the wire — implements [`Dispatchable`]. Unifying the
//! two lets the registries in [`crate::registry`] and the decoder in
//! [`crate::reference`] hold one kind of trait object regardless of which
//! side of the wire the capability actually lives on.

use serde_json::Value;

use crate::error::RpcError;

#[async_trait::async_trait]
pub trait Dispatchable: Send + Sync {
    async fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError>;

    /// Record that the peer has handed out another distinct wire reference
    /// to this same object, so a release can be sent for it independently
    /// once this proxy is finally dropped. Default no-op; only the proxy
    /// wrapper [`crate::session::Session`] builds around remote capabilities
    /// overrides this.
    fn track_additional_reference(&self, _reference_id: String) {}
}
