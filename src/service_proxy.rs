//! Service Proxy (§4.6): the "it just works" façade over a durable
//! transport. Returned immediately — no channel round trip has happened by
//! the time the caller gets one back. Calls pile up until the channel
//! becomes ready, the underlying session and remote service handle resolve
//! lazily on first use, and every active subscription survives a state-loss
//! cycle by replaying itself against the freshly re-acquired handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::warn;

use crate::channel::{Channel, Readiness};
use crate::error::RpcError;
use crate::proxy::{RemoteHandle, RemoteSubscription, RequestSender};
use crate::session::{Session, SessionOptions};

struct SubscriptionRecord {
    event: String,
    forward: mpsc::UnboundedSender<Value>,
    cancel: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct ProxyState {
    session: Option<Session>,
    handle: Option<RemoteHandle>,
    subscriptions: HashMap<u64, SubscriptionRecord>,
}

struct Inner {
    channel: Arc<dyn Channel>,
    service_name: String,
    state: Mutex<ProxyState>,
    next_subscription_id: AtomicU64,
}

/// A handle to a single event subscription made through a [`ServiceProxy`].
/// Surviving reconnects is the façade's job, not this type's — this is just
/// the application-facing receiving end.
pub struct FacadeSubscription {
    pub events: mpsc::UnboundedReceiver<Value>,
    id: u64,
    proxy: Arc<Inner>,
}

impl FacadeSubscription {
    /// Cancel this subscription: removes it from the re-subscribe ledger and
    /// tells the currently active forwarder to unsubscribe remotely.
    pub async fn unsubscribe(self) {
        if let Some(record) = self.proxy.state.lock().await.subscriptions.remove(&self.id) {
            if let Some(cancel) = record.cancel {
                let _ = cancel.send(());
            }
        }
    }
}

/// Façade returned by [`ServiceProxy::new`]. Cheap to clone; every clone
/// shares the same lazily-resolved session/handle and subscription ledger.
#[derive(Clone)]
pub struct ServiceProxy {
    inner: Arc<Inner>,
}

impl ServiceProxy {
    /// Construct a façade over `channel` for the named service. Returns
    /// immediately; nothing is awaited until the first [`ServiceProxy::call`]
    /// or [`ServiceProxy::subscribe`].
    pub fn new(channel: Arc<dyn Channel>, service_name: impl Into<String>) -> Self {
        let proxy = Self {
            inner: Arc::new(Inner {
                channel,
                service_name: service_name.into(),
                state: Mutex::new(ProxyState::default()),
                next_subscription_id: AtomicU64::new(0),
            }),
        };
        proxy.spawn_state_loss_watcher();
        proxy
    }

    /// Drop the remembered handle the moment the channel reports state loss,
    /// then proactively re-acquire it and replay every active subscription —
    /// rather than waiting for the next [`ServiceProxy::call`] to notice.
    /// Without this, a façade used purely for subscriptions (no intervening
    /// call) would go quiet across a state-loss/ready cycle and never
    /// recover, since nothing else would ever invalidate the stale handle.
    fn spawn_state_loss_watcher(&self) {
        let proxy = self.clone();
        tokio::spawn(async move {
            let mut state_lost = proxy.inner.channel.state_lost();
            loop {
                if state_lost.changed().await.is_err() {
                    break;
                }
                if state_lost.borrow().is_some() {
                    proxy.inner.state.lock().await.handle = None;
                    if let Err(err) = proxy.ensure_handle().await {
                        warn!(error = %err, "failed to re-acquire service handle after state loss");
                    }
                }
            }
        });
    }

    /// Invoke a method on the remote service, transparently waiting out
    /// channel readiness and re-acquiring the service handle across state
    /// loss. Retries exactly once after a state-loss failure, since a
    /// second failure in a row means something other than a transient
    /// reconnect is wrong.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let handle = self.ensure_handle().await?;
        match handle.call(method, params.clone()).await {
            Ok(value) => Ok(value),
            Err(err) if err.name == "ChannelStateLost" => {
                self.inner.state.lock().await.handle = None;
                let handle = self.ensure_handle().await?;
                handle.call(method, params).await
            }
            Err(err) => Err(err),
        }
    }

    /// Subscribe to a remote event. The returned [`FacadeSubscription`]
    /// keeps delivering events across reconnects: on recovery the façade
    /// re-issues the underlying `$subscribe` call against the newly
    /// resolved handle before the next [`ServiceProxy::call`] completes.
    pub async fn subscribe(&self, event: &str) -> Result<FacadeSubscription, RpcError> {
        let handle = self.ensure_handle().await?;
        let remote = handle.subscribe(event).await?;

        let id = self.inner.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let (forward_tx, forward_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.inner.state.lock().await.subscriptions.insert(
            id,
            SubscriptionRecord {
                event: event.to_owned(),
                forward: forward_tx.clone(),
                cancel: Some(cancel_tx),
            },
        );
        spawn_forwarder(remote, forward_tx, cancel_rx);

        Ok(FacadeSubscription {
            events: forward_rx,
            id,
            proxy: self.inner.clone(),
        })
    }

    /// Resolve (lazily, and caching across calls) the remote service
    /// handle: wait for the channel to be ready, create the session on
    /// first use, call `getLocalService`, and wrap the result. On recovery
    /// from a prior state loss, replay every event this façade still has a
    /// live subscription for.
    async fn ensure_handle(&self) -> Result<RemoteHandle, RpcError> {
        {
            let state = self.inner.state.lock().await;
            if let Some(handle) = &state.handle {
                return Ok(handle.clone());
            }
        }

        self.await_ready().await;

        let mut state = self.inner.state.lock().await;
        if let Some(handle) = &state.handle {
            return Ok(handle.clone());
        }

        if state.session.is_none() {
            state.session = Some(Session::new(self.inner.channel.clone(), SessionOptions::default()));
        }
        let session = state.session.clone().expect("just populated");
        let service_name = self.inner.service_name.clone();
        let events_to_replay: Vec<String> = state.subscriptions.values().map(|s| s.event.clone()).collect();
        drop(state);

        let service_ref = session
            .call_remote(Value::Null, "getLocalService", vec![Value::String(service_name)])
            .await?;
        let sender: Arc<dyn RequestSender> = Arc::new(session);
        let handle = RemoteHandle::new(service_ref, sender);

        self.inner.state.lock().await.handle = Some(handle.clone());

        self.replay_subscriptions(&handle, events_to_replay).await;

        Ok(handle)
    }

    /// Re-issue `$subscribe` for every event still on the ledger, swapping
    /// in a fresh forwarder/cancel pair for each. A failure here means the
    /// façade is back up but silently missing events, so it's logged rather
    /// than surfaced — the next [`ServiceProxy::call`] still succeeds.
    async fn replay_subscriptions(&self, handle: &RemoteHandle, events: Vec<String>) {
        for event in events {
            match handle.subscribe(&event).await {
                Ok(remote) => {
                    let mut state = self.inner.state.lock().await;
                    let Some(record) = state.subscriptions.values_mut().find(|record| record.event == event) else {
                        continue;
                    };
                    let forward = record.forward.clone();
                    let (cancel_tx, cancel_rx) = oneshot::channel();
                    record.cancel = Some(cancel_tx);
                    drop(state);
                    spawn_forwarder(remote, forward, cancel_rx);
                }
                Err(err) => {
                    warn!(event = %event, error = %err, "failed to re-subscribe after recovery");
                }
            }
        }
    }

    async fn await_ready(&self) {
        let mut ready = self.inner.channel.ready();
        while *ready.borrow() != Readiness::Ready {
            if ready.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Pump one [`RemoteSubscription`]'s events into the façade's stable
/// forwarding channel until either side hangs up or `cancel` fires, in
/// which case the remote subscription is torn down explicitly.
fn spawn_forwarder(
    mut remote: RemoteSubscription,
    forward: mpsc::UnboundedSender<Value>,
    mut cancel: oneshot::Receiver<()>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut cancel => {
                    remote.unsubscribe();
                    return;
                }
                event = remote.events.recv() => {
                    match event {
                        Some(value) => {
                            if forward.send(value).is_err() {
                                return;
                            }
                        }
                        None => return,
                    }
                }
            }
        }
    });
}
