//! Service registry (§4.5): named top-level capabilities a session exposes,
//! with independent discoverable/introspectable visibility flags.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use webrpc_protocol::{DiscoveredService, IntrospectedService};

use crate::dispatch::Dispatchable;

type AnyObject = dyn Dispatchable;

/// One registered service: its backing object plus how it should be exposed
/// to discovery (`getDiscoverableServices`) and introspection
/// (`getServiceIntrospection`) requests from a peer.
pub struct ServiceHandle {
    pub name: String,
    pub description: String,
    pub object: Arc<AnyObject>,
    pub discoverable: bool,
    pub introspection: Option<IntrospectedService>,
}

impl ServiceHandle {
    pub fn new(name: impl Into<String>, object: Arc<AnyObject>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            object,
            discoverable: true,
            introspection: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.discoverable = false;
        self
    }

    pub fn with_introspection(mut self, introspection: IntrospectedService) -> Self {
        self.introspection = Some(introspection);
        self
    }
}

/// Registry of services exposed by a session on this side. A peer reaches
/// these through the well-known root object id rather than a reference
/// descriptor, since they exist before any handshake establishes identity.
pub struct ServiceRegistry {
    services: Mutex<HashMap<String, ServiceHandle>>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
        }
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, handle: ServiceHandle) {
        self.services.lock().await.insert(handle.name.clone(), handle);
    }

    pub async fn unregister(&self, name: &str) {
        self.services.lock().await.remove(name);
    }

    pub async fn get_local_service(&self, name: &str) -> Option<Arc<AnyObject>> {
        self.services.lock().await.get(name).map(|h| h.object.clone())
    }

    pub async fn discoverable_services(&self) -> Vec<DiscoveredService> {
        self.services
            .lock()
            .await
            .values()
            .filter(|h| h.discoverable)
            .map(|h| DiscoveredService {
                name: h.name.clone(),
                description: h.description.clone(),
            })
            .collect()
    }

    pub async fn introspection(&self, name: &str) -> Option<IntrospectedService> {
        self.services.lock().await.get(name)?.introspection.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::{method, ServiceIntrospectionBuilder};
    use serde_json::Value;
    use webrpc_protocol::SimpleType;

    struct DummyDispatchable;

    #[async_trait::async_trait]
    impl Dispatchable for DummyDispatchable {
        async fn dispatch(&self, _method: &str, _params: Vec<Value>) -> Result<Value, crate::error::RpcError> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn hidden_service_is_reachable_but_not_discoverable() {
        let registry = ServiceRegistry::new();
        registry
            .register(ServiceHandle::new("secret", Arc::new(DummyDispatchable)).hidden())
            .await;

        assert!(registry.get_local_service("secret").await.is_some());
        assert!(registry.discoverable_services().await.is_empty());
    }

    #[tokio::test]
    async fn introspection_is_returned_when_attached() {
        let registry = ServiceRegistry::new();
        let introspected = ServiceIntrospectionBuilder::new("Calc")
            .method(method("add", SimpleType::Number))
            .build();
        registry
            .register(ServiceHandle::new("calc", Arc::new(DummyDispatchable)).with_introspection(introspected))
            .await;

        let back = registry.introspection("calc").await.unwrap();
        assert_eq!(back.methods[0].name, "add");
    }

    #[tokio::test]
    async fn unregistered_service_is_absent_from_both_views() {
        let registry = ServiceRegistry::new();
        registry.register(ServiceHandle::new("temp", Arc::new(DummyDispatchable))).await;
        registry.unregister("temp").await;
        assert!(registry.get_local_service("temp").await.is_none());
        assert!(registry.discoverable_services().await.is_empty());
    }
}
