//! Object bookkeeping for a session (§4.2, §5): the local-object table that
//! backs outgoing reference descriptors, the proxy table that collapses
//! repeated remote identities into one handle, the outstanding-reference
//! table that keeps a local object alive for as long as a peer holds a
//! descriptor to it, and the finalization debounce queue that coalesces
//! near-simultaneous drops into one release message.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::dispatch::Dispatchable;

type AnyObject = dyn Dispatchable;

/// Weak-held table of objects this side has exposed to a peer, keyed by
/// object id. Weak because ownership belongs to the application (or to the
/// proxy registry on the other end of a round trip) — the registry must
/// never be the thing keeping an object alive.
pub struct LocalObjectRegistry {
    objects: Mutex<HashMap<String, Weak<AnyObject>>>,
}

impl Default for LocalObjectRegistry {
    fn default() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
        }
    }
}

impl LocalObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, id: String, object: &Arc<AnyObject>) {
        self.objects.lock().await.insert(id, Arc::downgrade(object));
    }

    pub async fn get(&self, id: &str) -> Option<Arc<AnyObject>> {
        let mut objects = self.objects.lock().await;
        match objects.get(id).and_then(Weak::upgrade) {
            Some(obj) => Some(obj),
            None => {
                objects.remove(id);
                None
            }
        }
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.get(id).await.is_some()
    }
}

/// Weak-held table of proxies this side has created for remote objects,
/// keyed by the remote object id. Ensures that two descriptors naming the
/// same remote object collapse onto the same proxy instance (§4.3 identity).
pub struct ProxyRegistry {
    proxies: Mutex<HashMap<String, Weak<AnyObject>>>,
}

impl Default for ProxyRegistry {
    fn default() -> Self {
        Self {
            proxies: Mutex::new(HashMap::new()),
        }
    }
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing proxy for `id` if one is still alive, otherwise
    /// calls `create` and registers the result. The bool reports whether a
    /// new proxy was created (`false` means `id` already had a live proxy,
    /// which callers must immediately tell the peer to finalize the
    /// just-received duplicate reference for).
    pub async fn get_or_insert_with<F>(&self, id: &str, create: F) -> (Arc<AnyObject>, bool)
    where
        F: FnOnce() -> Arc<AnyObject>,
    {
        let mut proxies = self.proxies.lock().await;
        if let Some(existing) = proxies.get(id).and_then(Weak::upgrade) {
            return (existing, false);
        }
        let created = create();
        proxies.insert(id.to_owned(), Arc::downgrade(&created));
        (created, true)
    }

    pub async fn forget(&self, id: &str) {
        self.proxies.lock().await.remove(id);
    }
}

/// Strongly-held, reference-counted table keyed by `"<object_id>.<reference_id>"`
/// (see [`webrpc_protocol::ReferenceDescriptor::outstanding_key`]). As long as
/// a peer holds at least one outstanding reference to a local object, this
/// registry keeps it alive even if the application itself has dropped its
/// own handle — mirroring the server-side half of a distributed GC scheme.
pub struct OutstandingReferenceRegistry {
    entries: Mutex<HashMap<String, OutstandingEntry>>,
}

struct OutstandingEntry {
    object: Arc<AnyObject>,
    count: u64,
}

impl Default for OutstandingReferenceRegistry {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl OutstandingReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more outstanding reference under `key`, holding `object`
    /// strongly if this is the first one. Returns the new count.
    pub async fn acquire(&self, key: String, object: Arc<AnyObject>) -> u64 {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key).or_insert(OutstandingEntry { object, count: 0 });
        entry.count += 1;
        entry.count
    }

    /// Drop one outstanding reference under `key`. Returns the remaining
    /// count, or `None` if `key` was not tracked (a double-release, which
    /// callers should treat as a protocol violation rather than a panic).
    pub async fn release(&self, key: &str) -> Option<u64> {
        let mut entries = self.entries.lock().await;
        let remaining = {
            let entry = entries.get_mut(key)?;
            entry.count = entry.count.saturating_sub(1);
            entry.count
        };
        if remaining == 0 {
            entries.remove(key);
        }
        Some(remaining)
    }

    pub async fn count(&self, key: &str) -> u64 {
        self.entries.lock().await.get(key).map_or(0, |e| e.count)
    }
}

// ---------------------------------------------------------------------------
// Finalization debounce queue
// ---------------------------------------------------------------------------

/// Coalesces many near-simultaneous local-object drops into a single batch,
/// so a tight loop that drops a thousand proxies in one tick produces one
/// release round trip instead of a thousand. Debounce policy: wait for the
/// queue to go quiet for `debounce` before draining.
pub struct FinalizationQueue {
    pending: Mutex<HashSet<String>>,
    notify: Notify,
    debounce: Duration,
}

impl FinalizationQueue {
    pub fn new(debounce: Duration) -> Self {
        Self {
            pending: Mutex::new(HashSet::new()),
            notify: Notify::new(),
            debounce,
        }
    }

    /// Enqueue a key for release notification. Idempotent.
    pub async fn schedule(&self, key: String) {
        self.pending.lock().await.insert(key);
        self.notify.notify_one();
    }

    /// Wait for at least one pending key, then debounce: keep resetting the
    /// timer as new keys arrive, and once `debounce` passes quietly, drain
    /// and return everything collected so far.
    pub async fn next_batch(&self) -> Vec<String> {
        loop {
            self.notify.notified().await;
            loop {
                tokio::select! {
                    () = self.notify.notified() => continue,
                    () = tokio::time::sleep(self.debounce) => break,
                }
            }
            let mut pending = self.pending.lock().await;
            if pending.is_empty() {
                continue;
            }
            return pending.drain().collect();
        }
    }
}
