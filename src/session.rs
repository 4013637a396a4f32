//! Session (§4.4, §5): the protocol state machine sitting on top of a
//! [`Channel`]. Owns the registries, turns outgoing calls into
//! [`RequestEnvelope`]s and incoming frames into dispatched calls, and
//! answers the built-in discovery/introspection/subscribe methods every
//! session understands regardless of what the application has registered.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, trace, warn};
use webrpc_protocol::{
    invalid_call_reasons, Envelope, EventEnvelope, RequestEnvelope, ResponseEnvelope,
    SerializedError,
};

use crate::channel::{Channel, ChannelError};
use crate::dispatch::Dispatchable;
use crate::error::{ErrorRegistry, RpcError};
use crate::introspection::ServiceIntrospectionBuilder;
use crate::proxy::{RemoteHandle, RemoteSubscription, RequestSender};
use crate::reference::{capability_placeholder, decode_value, encode_value, DecodeError};
use crate::registry::{FinalizationQueue, LocalObjectRegistry, OutstandingReferenceRegistry, ProxyRegistry};
use crate::service::{ServiceHandle, ServiceRegistry};

/// Well-known receiver naming the session itself — used for
/// `getDiscoverableServices`, `getServiceIntrospection`, and `getLocalService`.
pub const ROOT_OBJECT_ID: &str = "$root";

const METHOD_DISCOVER: &str = "getDiscoverableServices";
const METHOD_INTROSPECT: &str = "getServiceIntrospection";
const METHOD_GET_SERVICE: &str = "getLocalService";
const METHOD_SUBSCRIBE: &str = "$subscribe";

tokio::task_local! {
    /// Set while a request's dispatch is already on the stack, so a nested
    /// call back into this same session (a capability calling back into its
    /// own owner mid-request) is recognized as reentrant rather than, say,
    /// mistaken for a second independent top-level call. Nothing in this
    /// crate currently blocks on a session-wide lock, so unlike the scripting
    /// runtime this was distilled from there is no deadlock to avoid — this
    /// is kept for parity with that runtime's request-local bookkeeping and
    /// for diagnostics (`Session::call_depth`).
    static CALL_DEPTH: Cell<u32>;
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("failed to parse frame: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Reference(#[from] DecodeError),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Strip stack traces down to `"Name: message"` before they cross the
    /// wire, regardless of whether the peer is trusted.
    pub mask_stack_traces: bool,
    /// When set, only errors explicitly raised via [`crate::error::raise`]
    /// cross the wire with their real shape; anything else is replaced with
    /// an opaque internal-error placeholder before sending.
    pub safe_exceptions: bool,
    /// How long the finalization queue waits for the drop rate to go quiet
    /// before flushing a release batch.
    pub finalization_debounce: Duration,
    /// Capture a local backtrace at each outgoing call's call site and
    /// append it to any error that comes back, under a delimiter line.
    pub capture_caller_stacks: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            mask_stack_traces: true,
            safe_exceptions: true,
            finalization_debounce: Duration::from_millis(50),
            capture_caller_stacks: true,
        }
    }
}

struct Inner {
    channel: Arc<dyn Channel>,
    options: SessionOptions,
    services: ServiceRegistry,
    errors: Mutex<ErrorRegistry>,
    local_objects: LocalObjectRegistry,
    proxies: ProxyRegistry,
    outstanding: OutstandingReferenceRegistry,
    finalization: Arc<FinalizationQueue>,
    pending: Mutex<HashMap<String, oneshot::Sender<ResponseEnvelope>>>,
    next_id: AtomicU64,
    event_subscribers: Mutex<HashMap<(String, String), Vec<Arc<dyn Dispatchable>>>>,
}

/// A live, bound protocol session. Cloning is cheap (it's a handle around a
/// shared [`Inner`]); the background recv and finalization tasks keep the
/// session alive until the channel is permanently closed.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(channel: Arc<dyn Channel>, options: SessionOptions) -> Self {
        let inner = Arc::new(Inner {
            finalization: Arc::new(FinalizationQueue::new(options.finalization_debounce)),
            channel,
            options,
            services: ServiceRegistry::new(),
            errors: Mutex::new(ErrorRegistry::default()),
            local_objects: LocalObjectRegistry::new(),
            proxies: ProxyRegistry::new(),
            outstanding: OutstandingReferenceRegistry::new(),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            event_subscribers: Mutex::new(HashMap::new()),
        });
        let session = Session { inner };
        session.spawn_recv_loop();
        session.spawn_finalization_loop();
        session.spawn_state_loss_watcher();
        session
    }

    fn spawn_recv_loop(&self) {
        let session = self.clone();
        tokio::spawn(async move {
            loop {
                let Some(frame) = session.inner.channel.recv().await else {
                    debug!("channel closed, session recv loop exiting");
                    break;
                };
                if let Err(err) = session.handle_frame(&frame).await {
                    warn!(error = %err, "failed to handle inbound frame");
                }
            }
        });
    }

    fn spawn_finalization_loop(&self) {
        let session = self.clone();
        tokio::spawn(async move {
            loop {
                let batch = session.inner.finalization.next_batch().await;
                for key in batch {
                    trace!(key = %key, "flushing finalized reference");
                    let _ = session.send_envelope(Envelope::Event(EventEnvelope {
                        receiver: Value::String(ROOT_OBJECT_ID.to_owned()),
                        name: "$release".to_owned(),
                        object: Value::String(key),
                    })).await;
                }
            }
        });
    }

    /// Fail every in-flight [`RequestSender::call_remote`] the moment the
    /// channel reports state loss, instead of leaving it to hang until
    /// whatever timeout the caller happens to wrap it in. Dropping the
    /// pending responders is enough: the waiting `rx.await` on the other end
    /// turns into [`RpcError::channel_state_lost`] on its own.
    fn spawn_state_loss_watcher(&self) {
        let session = self.clone();
        tokio::spawn(async move {
            let mut state_lost = session.inner.channel.state_lost();
            loop {
                if state_lost.changed().await.is_err() {
                    break;
                }
                if state_lost.borrow().is_some() {
                    session.inner.pending.lock().await.clear();
                }
            }
        });
    }

    async fn send_envelope(&self, envelope: Envelope) -> Result<(), ChannelError> {
        let frame = serde_json::to_string(&envelope).expect("envelope always serializes");
        self.inner.channel.send(frame).await
    }

    async fn handle_frame(&self, frame: &str) -> Result<(), SessionError> {
        let envelope: Envelope = serde_json::from_str(frame)?;
        match envelope {
            Envelope::Response(resp) => self.complete_pending(resp).await,
            Envelope::Request(req) => {
                let session = self.clone();
                tokio::spawn(async move { session.handle_request(req).await });
            }
            Envelope::Ping => {
                let _ = self.send_envelope(Envelope::Pong).await;
            }
            Envelope::Pong => {}
            Envelope::Event(ev) => {
                // The only event this protocol actually sends itself is the
                // internal `$release` notification the finalization queue
                // emits; everything else in this variant is reserved.
                if ev.name == "$release" {
                    if let Some(key) = ev.object.as_str() {
                        self.inner.outstanding.release(key).await;
                    }
                }
            }
        }
        Ok(())
    }

    async fn complete_pending(&self, response: ResponseEnvelope) {
        if let Some(responder) = self.inner.pending.lock().await.remove(&response.id) {
            let _ = responder.send(response);
        }
    }

    async fn handle_request(&self, req: RequestEnvelope) {
        let result = CALL_DEPTH
            .scope(Cell::new(0), self.dispatch_request(&req))
            .await;
        let response = match result {
            Ok(value) => {
                let encoded = encode_value(&value, &self.inner.local_objects, &self.inner.outstanding, || {
                    uuid::Uuid::new_v4().to_string()
                })
                .await
                .unwrap_or(value);
                ResponseEnvelope {
                    id: req.id,
                    value: Some(encoded),
                    error: None,
                }
            }
            Err(err) => {
                let masked = self.mask_if_needed(err);
                let wire = masked.to_wire(self.inner.options.mask_stack_traces);
                ResponseEnvelope {
                    id: req.id,
                    value: None,
                    error: Some(serde_json::to_value(wire).unwrap()),
                }
            }
        };
        if let Err(err) = self.send_envelope(Envelope::Response(response)).await {
            warn!(error = %err, "failed to send response");
        }
    }

    fn mask_if_needed(&self, err: RpcError) -> RpcError {
        if self.inner.options.safe_exceptions && !err.is_intentional() {
            return RpcError::internal_placeholder();
        }
        err
    }

    async fn dispatch_request(&self, req: &RequestEnvelope) -> Result<Value, RpcError> {
        if req.receiver.is_null() || matches!(&req.receiver, Value::String(s) if s == ROOT_OBJECT_ID) {
            return self.dispatch_root(&req.method, &req.parameters).await;
        }
        if req.method == METHOD_SUBSCRIBE {
            return self.dispatch_subscribe(req).await;
        }

        let mut resolved = HashMap::new();
        let mut duplicate_releases = Vec::new();
        let receiver = decode_value(
            &req.receiver,
            &self.inner.local_objects,
            &self.inner.proxies,
            |id| self.make_proxy(id),
            &mut resolved,
            &mut duplicate_releases,
        )
        .await
        .map_err(|_| {
            RpcError::invalid_call(
                invalid_call_reasons::NO_SUCH_RECEIVER,
                "receiver does not resolve to a known object",
            )
        })?;
        let object = self
            .lookup_decoded(&receiver, &resolved)
            .ok_or_else(|| {
                RpcError::invalid_call(
                    invalid_call_reasons::NO_SUCH_RECEIVER,
                    "receiver does not resolve to a known object",
                )
            })?;

        let mut params = Vec::with_capacity(req.parameters.len());
        for param in &req.parameters {
            let decoded = decode_value(
                param,
                &self.inner.local_objects,
                &self.inner.proxies,
                |id| self.make_proxy(id),
                &mut resolved,
                &mut duplicate_releases,
            )
            .await
            .map_err(|e| RpcError::type_error(e.to_string()))?;
            params.push(decoded);
        }

        if !duplicate_releases.is_empty() {
            self.release_duplicate_references(duplicate_releases).await;
        }

        object.dispatch(&req.method, params).await
    }

    fn lookup_decoded(&self, decoded: &Value, resolved: &HashMap<String, Arc<dyn Dispatchable>>) -> Option<Arc<dyn Dispatchable>> {
        let key = decoded.get("$webrpcResolved")?.as_str()?;
        resolved.get(key).cloned()
    }

    async fn dispatch_root(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        match method {
            METHOD_DISCOVER => {
                let services = self.inner.services.discoverable_services().await;
                Ok(serde_json::to_value(services).unwrap())
            }
            METHOD_INTROSPECT => {
                let name = params
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::type_error("getServiceIntrospection requires a service name"))?;
                let introspected = self.inner.services.introspection(name).await.ok_or_else(|| {
                    RpcError::invalid_call(invalid_call_reasons::NO_SUCH_METHOD, format!("no introspection for {name}"))
                })?;
                Ok(serde_json::to_value(introspected).unwrap())
            }
            METHOD_GET_SERVICE => {
                let name = params
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::type_error("getLocalService requires a service name"))?;
                let object = self.inner.services.get_local_service(name).await.ok_or_else(|| {
                    RpcError::invalid_call(invalid_call_reasons::NO_SUCH_RECEIVER, format!("no such service {name}"))
                })?;
                let id = format!("service:{name}");
                self.inner.local_objects.insert(id.clone(), &object).await;
                Ok(capability_placeholder(&id, webrpc_protocol::Side::Local))
            }
            _ => Err(RpcError::invalid_call(
                invalid_call_reasons::NO_SUCH_METHOD,
                format!("no such root method {method}"),
            )),
        }
    }

    async fn dispatch_subscribe(&self, req: &RequestEnvelope) -> Result<Value, RpcError> {
        let object_id = reference_object_id(&req.receiver).ok_or_else(|| {
            RpcError::invalid_call(invalid_call_reasons::NO_SUCH_RECEIVER, "subscribe target has no stable id")
        })?;
        let event = req
            .parameters
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::type_error("$subscribe requires an event name"))?;
        let callback_descriptor = req
            .parameters
            .get(1)
            .ok_or_else(|| RpcError::type_error("$subscribe requires a callback capability"))?;

        let mut resolved = HashMap::new();
        let mut duplicate_releases = Vec::new();
        let decoded = decode_value(
            callback_descriptor,
            &self.inner.local_objects,
            &self.inner.proxies,
            |id| self.make_proxy(id),
            &mut resolved,
            &mut duplicate_releases,
        )
        .await
        .map_err(|e| RpcError::type_error(e.to_string()))?;
        let callback = self
            .lookup_decoded(&decoded, &resolved)
            .ok_or_else(|| RpcError::type_error("malformed subscribe callback"))?;

        if !duplicate_releases.is_empty() {
            self.release_duplicate_references(duplicate_releases).await;
        }

        self.inner
            .event_subscribers
            .lock()
            .await
            .entry((object_id, event.to_owned()))
            .or_default()
            .push(callback);
        Ok(Value::Null)
    }

    /// Build the proxy [`crate::registry::ProxyRegistry`] hands out for a
    /// remote object id the first time this session sees it. Wrapped in
    /// [`ReleasingProxy`] so that once every clone of the dedup'd proxy is
    /// finally dropped, this side tells the peer it can forget every
    /// reference id it ever handed out for that object.
    fn make_proxy(&self, object_id: &str) -> Arc<dyn Dispatchable> {
        let sender: Arc<dyn RequestSender> = Arc::new(self.clone());
        let handle = RemoteHandle::new(
            serde_json::to_value(webrpc_protocol::ReferenceDescriptor::remote(object_id)).unwrap(),
            sender,
        );
        Arc::new(ReleasingProxy {
            handle,
            object_id: object_id.to_owned(),
            reference_ids: std::sync::Mutex::new(Vec::new()),
            session: self.clone(),
        })
    }

    /// Expose a named, top-level service. Reachable via `getLocalService` and
    /// (unless hidden) listed by `getDiscoverableServices`.
    pub async fn expose_service(&self, handle: ServiceHandle) {
        self.inner.services.register(handle).await;
    }

    pub async fn unexpose_service(&self, name: &str) {
        self.inner.services.unregister(name).await;
    }

    /// Expose an arbitrary object as a capability under `id`, returning the
    /// placeholder to embed anywhere in a value returned from, or passed as
    /// a parameter to, a [`Dispatchable::dispatch`] implementation. The same
    /// two-step pattern `dispatch_root` uses for `getLocalService`, made
    /// available for application-level nested capabilities.
    pub async fn register_capability(&self, id: impl Into<String>, object: Arc<dyn Dispatchable>) -> Value {
        let id = id.into();
        self.inner.local_objects.insert(id.clone(), &object).await;
        capability_placeholder(&id, webrpc_protocol::Side::Local)
    }

    pub fn introspection_builder(name: impl Into<String>) -> ServiceIntrospectionBuilder {
        ServiceIntrospectionBuilder::new(name)
    }

    /// Register an additional error-kind factory for deserializing remote
    /// errors, beyond the standard JS-style hierarchy.
    pub async fn register_error_kind(
        &self,
        kind: &str,
        factory: impl Fn(&SerializedError) -> RpcError + Send + Sync + 'static,
    ) {
        self.inner.errors.lock().await.register(kind, factory);
    }

    /// Notify every subscriber registered for `(object_id, event)`.
    pub async fn emit(&self, object_id: &str, event: &str, value: Value) {
        let subscribers = {
            let table = self.inner.event_subscribers.lock().await;
            table.get(&(object_id.to_owned(), event.to_owned())).cloned().unwrap_or_default()
        };
        for subscriber in subscribers {
            if let Err(err) = subscriber.dispatch("emit", vec![value.clone()]).await {
                warn!(error = %err, object_id, event, "event delivery failed");
            }
        }
    }

    fn next_request_id(&self) -> String {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        format!("req-{id}")
    }

    pub fn call_depth() -> u32 {
        CALL_DEPTH.try_with(|d| d.get()).unwrap_or(0)
    }

    /// Tell the peer it can finalize every one of `keys` right away. Used for
    /// references that collapsed onto a proxy we already held: the peer
    /// allocated a fresh strong hold believing we needed a new proxy, and
    /// since we didn't, the hold must be released now rather than waiting on
    /// the debounced finalization queue.
    async fn release_duplicate_references(&self, keys: Vec<String>) {
        for key in keys {
            trace!(key = %key, "releasing duplicate reference immediately");
            let _ = self
                .send_envelope(Envelope::Event(EventEnvelope {
                    receiver: Value::String(ROOT_OBJECT_ID.to_owned()),
                    name: "$release".to_owned(),
                    object: Value::String(key),
                }))
                .await;
        }
    }

    /// Capture the current call site's backtrace, if `capture_caller_stacks`
    /// is enabled, so it can be appended to whatever error comes back.
    fn capture_caller_stack(&self) -> Option<String> {
        if !self.inner.options.capture_caller_stacks {
            return None;
        }
        Some(std::backtrace::Backtrace::force_capture().to_string())
    }
}

/// A reference descriptor's `S` field is relative to whoever sent the
/// message carrying it. A value received as a call result and then reused
/// by its new holder as the receiver of a follow-up call has switched from
/// "something I received" to "something I'm about to address", which flips
/// the side without changing the object's actual location.
fn flip_side_in_value(value: &Value) -> Value {
    if webrpc_protocol::looks_like_reference(value) {
        if let Ok(descriptor) = serde_json::from_value::<webrpc_protocol::ReferenceDescriptor>(value.clone()) {
            let flipped = match descriptor.side {
                webrpc_protocol::Side::Local => webrpc_protocol::ReferenceDescriptor::remote(descriptor.object_id),
                webrpc_protocol::Side::Remote => {
                    webrpc_protocol::ReferenceDescriptor::local(descriptor.object_id, uuid::Uuid::new_v4().to_string())
                }
            };
            return serde_json::to_value(flipped).unwrap();
        }
    }
    match value {
        Value::Array(items) => Value::Array(items.iter().map(flip_side_in_value).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), flip_side_in_value(v))).collect()),
        other => other.clone(),
    }
}

pub(crate) fn reference_object_id(value: &Value) -> Option<String> {
    if value.is_null() {
        return Some(ROOT_OBJECT_ID.to_owned());
    }
    value.get("Rε").and_then(Value::as_str).map(str::to_owned)
}

#[async_trait::async_trait]
impl RequestSender for Session {
    async fn call_remote(&self, receiver: Value, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let mut encoded_params = Vec::with_capacity(params.len());
        for param in &params {
            let encoded = encode_value(param, &self.inner.local_objects, &self.inner.outstanding, || {
                uuid::Uuid::new_v4().to_string()
            })
            .await
            .map_err(|e| RpcError::type_error(e.to_string()))?;
            encoded_params.push(encoded);
        }

        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id.clone(), tx);
        let caller_stack = self.capture_caller_stack();

        let envelope = Envelope::Request(RequestEnvelope {
            id: id.clone(),
            receiver,
            method: method.to_owned(),
            parameters: encoded_params,
            metadata: Value::Null,
        });
        if let Err(err) = self.send_envelope(envelope).await {
            self.inner.pending.lock().await.remove(&id);
            return Err(RpcError::generic(err.to_string()));
        }

        let response = rx.await.map_err(|_| RpcError::channel_state_lost())?;
        if let Some(error) = response.error {
            let wire: SerializedError = serde_json::from_value(error).map_err(|e| RpcError::type_error(e.to_string()))?;
            let registry = self.inner.errors.lock().await;
            let err = registry.deserialize(&wire);
            return Err(match caller_stack {
                Some(stack) => err.with_caller_stack(&stack),
                None => err,
            });
        }
        Ok(flip_side_in_value(&response.value.unwrap_or(Value::Null)))
    }

    async fn subscribe_remote(&self, receiver: Value, event: &str) -> Result<RemoteSubscription, RpcError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback_id = format!("callback:{}", uuid::Uuid::new_v4());
        let callback: Arc<dyn Dispatchable> = Arc::new(CallbackSink { sender: tx });
        self.inner.local_objects.insert(callback_id.clone(), &callback).await;

        self.call_remote(
            receiver,
            METHOD_SUBSCRIBE,
            vec![
                Value::String(event.to_owned()),
                capability_placeholder(&callback_id, webrpc_protocol::Side::Local),
            ],
        )
        .await?;

        let session = self.clone();
        Ok(RemoteSubscription::new(rx, callback, move || {
            let session = session.clone();
            let callback_id = callback_id.clone();
            tokio::spawn(async move {
                session.inner.local_objects.get(&callback_id).await;
            });
        }))
    }
}

struct CallbackSink {
    sender: mpsc::UnboundedSender<Value>,
}

#[async_trait::async_trait]
impl Dispatchable for CallbackSink {
    async fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        if method == "emit" {
            let _ = self.sender.send(params.into_iter().next().unwrap_or(Value::Null));
        }
        Ok(Value::Null)
    }
}

/// Wraps the proxy [`Session::make_proxy`] hands out for a remote object,
/// accumulating every reference id the peer has sent for it. Every occurrence
/// of that object id decoded off the wire collapses onto this one instance
/// (see [`crate::registry::ProxyRegistry`]), so its eventual drop is the
/// right moment to tell the peer every one of those references can be
/// forgotten at once.
struct ReleasingProxy {
    handle: RemoteHandle,
    object_id: String,
    reference_ids: std::sync::Mutex<Vec<String>>,
    session: Session,
}

#[async_trait::async_trait]
impl Dispatchable for ReleasingProxy {
    async fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        self.handle.dispatch(method, params).await
    }

    fn track_additional_reference(&self, reference_id: String) {
        self.reference_ids.lock().unwrap().push(reference_id);
    }
}

impl Drop for ReleasingProxy {
    fn drop(&mut self) {
        let reference_ids = std::mem::take(&mut *self.reference_ids.lock().unwrap());
        if reference_ids.is_empty() {
            return;
        }
        let finalization = self.session.inner.finalization.clone();
        let object_id = self.object_id.clone();
        tokio::spawn(async move {
            for reference_id in reference_ids {
                let key = webrpc_protocol::ReferenceDescriptor::outstanding_key(&object_id, &reference_id);
                finalization.schedule(key).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::in_memory_pair;
    use crate::introspection::method;
    use crate::service::ServiceHandle;
    use webrpc_protocol::SimpleType;

    struct Adder;

    #[async_trait::async_trait]
    impl Dispatchable for Adder {
        async fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
            match method {
                "add" => {
                    let a = params[0].as_i64().unwrap();
                    let b = params[1].as_i64().unwrap();
                    Ok(Value::from(a + b))
                }
                "boom" => Err(RpcError::type_error("kaboom")),
                _ => Err(RpcError::invalid_call(invalid_call_reasons::NO_SUCH_METHOD, method)),
            }
        }
    }

    #[tokio::test]
    async fn simple_call_round_trips_through_a_named_service() {
        let (a, b) = in_memory_pair();
        let server = Session::new(a, SessionOptions::default());
        let client = Session::new(b, SessionOptions::default());

        server
            .expose_service(
                ServiceHandle::new("calc", Arc::new(Adder))
                    .with_introspection(Session::introspection_builder("calc").method(method("add", SimpleType::Number)).build()),
            )
            .await;

        let service_ref = client.call_remote(Value::Null, METHOD_GET_SERVICE, vec![Value::from("calc")]).await.unwrap();
        let sum = client.call_remote(service_ref, "add", vec![Value::from(2), Value::from(3)]).await.unwrap();
        assert_eq!(sum, Value::from(5));
    }

    #[tokio::test]
    async fn discoverable_services_lists_registered_names() {
        let (a, b) = in_memory_pair();
        let server = Session::new(a, SessionOptions::default());
        let client = Session::new(b, SessionOptions::default());
        server.expose_service(ServiceHandle::new("calc", Arc::new(Adder))).await;

        let result = client.call_remote(Value::Null, METHOD_DISCOVER, vec![]).await.unwrap();
        let services: Vec<webrpc_protocol::DiscoveredService> = serde_json::from_value(result).unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "calc");
    }

    #[tokio::test]
    async fn errors_propagate_with_correct_kind() {
        let (a, b) = in_memory_pair();
        let mut opts = SessionOptions::default();
        opts.safe_exceptions = false;
        let server = Session::new(a, opts);
        let client = Session::new(b, SessionOptions::default());
        server.expose_service(ServiceHandle::new("calc", Arc::new(Adder))).await;

        let service_ref = client.call_remote(Value::Null, METHOD_GET_SERVICE, vec![Value::from("calc")]).await.unwrap();
        let err = client.call_remote(service_ref, "boom", vec![]).await.unwrap_err();
        assert_eq!(err.name, "TypeError");
    }

    #[tokio::test]
    async fn safe_exceptions_mode_masks_unintentional_errors() {
        let (a, b) = in_memory_pair();
        let mut opts = SessionOptions::default();
        opts.safe_exceptions = true;
        let server = Session::new(a, opts);
        let client = Session::new(b, SessionOptions::default());
        server.expose_service(ServiceHandle::new("calc", Arc::new(Adder))).await;

        let service_ref = client.call_remote(Value::Null, METHOD_GET_SERVICE, vec![Value::from("calc")]).await.unwrap();
        let err = client.call_remote(service_ref, "boom", vec![]).await.unwrap_err();
        assert_eq!(err.name, crate::error::INTERNAL_ERROR_KIND);
    }

    #[tokio::test]
    async fn subscribe_delivers_emitted_events_to_the_subscriber() {
        let (a, b) = in_memory_pair();
        let server = Session::new(a, SessionOptions::default());
        let client = Session::new(b, SessionOptions::default());
        server.expose_service(ServiceHandle::new("calc", Arc::new(Adder))).await;

        let service_ref = client.call_remote(Value::Null, METHOD_GET_SERVICE, vec![Value::from("calc")]).await.unwrap();
        let object_id = reference_object_id(&service_ref).unwrap();
        let mut subscription = client.subscribe_remote(service_ref, "tick").await.unwrap();

        server.emit(&object_id, "tick", Value::from(1)).await;
        let received = subscription.events.recv().await.unwrap();
        assert_eq!(received, Value::from(1));
    }
}
