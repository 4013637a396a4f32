//! Reference encoding (§4.2): the value-tree walk that turns capability
//! placeholders into wire [`ReferenceDescriptor`]s on the way out, and wire
//! descriptors back into resolved local handles on the way in.
//!
//! Rust has no equivalent of a host-language Proxy that can intercept
//! arbitrary property access, so instead of rewriting values in place we
//! require callers to mark capability positions explicitly with
//! [`capability_placeholder`] before encoding, and consume the parallel
//! `resolved` map handed back by [`decode_value`] after decoding. Everything
//! else in the tree — strings, numbers, arrays, nested objects — passes
//! through untouched.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use webrpc_protocol::{looks_like_reference, ReferenceDescriptor, Side};

use crate::dispatch::Dispatchable;
use crate::registry::{LocalObjectRegistry, OutstandingReferenceRegistry, ProxyRegistry};

type AnyObject = dyn Dispatchable;

const MARKER_KEY: &str = "$webrpcCapability";
const MARKER_SIDE_KEY: &str = "$webrpcCapabilitySide";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("value claims to reference local object {0:?} but it is no longer alive")]
    DeadLocalObject(String),
    #[error("malformed capability placeholder: {0}")]
    MalformedPlaceholder(String),
}

/// Build a placeholder for `object_id`, to be embedded anywhere in a
/// parameter/return tree in place of the real capability value. `side`
/// records whether the object is locally owned (exposing a new capability)
/// or being handed back (a previously-received proxy passed through again).
pub fn capability_placeholder(object_id: &str, side: Side) -> Value {
    serde_json::json!({
        MARKER_KEY: object_id,
        MARKER_SIDE_KEY: side,
    })
}

fn as_placeholder(value: &Value) -> Option<(&str, Side)> {
    let obj = value.as_object()?;
    if obj.len() != 2 {
        return None;
    }
    let id = obj.get(MARKER_KEY)?.as_str()?;
    let side = serde_json::from_value(obj.get(MARKER_SIDE_KEY)?.clone()).ok()?;
    Some((id, side))
}

/// Walk `value`, replacing every [`capability_placeholder`] with a real wire
/// [`ReferenceDescriptor`], registering an outstanding reference for each
/// locally-owned capability so it survives until the peer releases it.
pub async fn encode_value(
    value: &Value,
    local_objects: &LocalObjectRegistry,
    outstanding: &OutstandingReferenceRegistry,
    next_reference_id: impl Fn() -> String,
) -> Result<Value, DecodeError> {
    if let Some((id, side)) = as_placeholder(value) {
        return match side {
            Side::Local => {
                let object = local_objects
                    .get(id)
                    .await
                    .ok_or_else(|| DecodeError::DeadLocalObject(id.to_owned()))?;
                let reference_id = next_reference_id();
                let key = ReferenceDescriptor::outstanding_key(id, &reference_id);
                outstanding.acquire(key, object).await;
                Ok(serde_json::to_value(ReferenceDescriptor::local(id, reference_id)).unwrap())
            }
            Side::Remote => Ok(serde_json::to_value(ReferenceDescriptor::remote(id)).unwrap()),
        };
    }
    match value {
        Value::Array(items) => {
            let mut encoded = Vec::with_capacity(items.len());
            for item in items {
                encoded.push(Box::pin(encode_value(item, local_objects, outstanding, &next_reference_id)).await?);
            }
            Ok(Value::Array(encoded))
        }
        Value::Object(map) => {
            let mut encoded = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                encoded.insert(
                    key.clone(),
                    Box::pin(encode_value(item, local_objects, outstanding, &next_reference_id)).await?,
                );
            }
            Ok(Value::Object(encoded))
        }
        other => Ok(other.clone()),
    }
}

/// Walk `value`, replacing every wire [`ReferenceDescriptor`] with a
/// placeholder keyed into the returned `resolved` map. `make_proxy` is
/// called (at most once per distinct remote object id, courtesy of
/// [`ProxyRegistry`]) to construct a fresh proxy handle when a previously
/// unseen remote object arrives.
///
/// Every `S="L"` descriptor that resolves to a proxy we already hold appends
/// its `outstanding_key` to `duplicate_releases`: the sender allocated a
/// fresh strong hold for it believing we needed a new proxy, and since we
/// don't, that hold must be told to finalize right away rather than waiting
/// on this proxy's own eventual drop (it isn't even the same reference id
/// that drop would release).
pub async fn decode_value(
    value: &Value,
    local_objects: &LocalObjectRegistry,
    proxies: &ProxyRegistry,
    make_proxy: impl Fn(&str) -> Arc<AnyObject> + Copy,
    resolved: &mut HashMap<String, Arc<AnyObject>>,
    duplicate_releases: &mut Vec<String>,
) -> Result<Value, DecodeError> {
    if looks_like_reference(value) {
        let descriptor: ReferenceDescriptor = serde_json::from_value(value.clone())
            .map_err(|e| DecodeError::MalformedPlaceholder(e.to_string()))?;
        let object = match descriptor.side {
            // Local to the sender => a remote capability from our point of view.
            Side::Local => {
                let (object, is_new) = proxies
                    .get_or_insert_with(&descriptor.object_id, || make_proxy(&descriptor.object_id))
                    .await;
                if let Some(reference_id) = &descriptor.reference_id {
                    if is_new {
                        // First hold for this object: track it so the proxy's
                        // eventual drop releases it.
                        object.track_additional_reference(reference_id.clone());
                    } else {
                        // We already have a live proxy; this reference is
                        // redundant and must be finalized immediately instead
                        // of accumulating until the proxy is dropped.
                        duplicate_releases
                            .push(ReferenceDescriptor::outstanding_key(&descriptor.object_id, reference_id));
                    }
                }
                object
            }
            // Remote to the sender => our own object, being handed back to us.
            Side::Remote => local_objects
                .get(&descriptor.object_id)
                .await
                .ok_or_else(|| DecodeError::DeadLocalObject(descriptor.object_id.clone()))?,
        };
        let key = format!("{}:{}", side_tag(descriptor.side), descriptor.object_id);
        resolved.insert(key.clone(), object);
        return Ok(serde_json::json!({ "$webrpcResolved": key }));
    }
    match value {
        Value::Array(items) => {
            let mut decoded = Vec::with_capacity(items.len());
            for item in items {
                decoded.push(
                    Box::pin(decode_value(item, local_objects, proxies, make_proxy, resolved, duplicate_releases)).await?,
                );
            }
            Ok(Value::Array(decoded))
        }
        Value::Object(map) => {
            let mut decoded = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                decoded.insert(
                    key.clone(),
                    Box::pin(decode_value(item, local_objects, proxies, make_proxy, resolved, duplicate_releases)).await?,
                );
            }
            Ok(Value::Object(decoded))
        }
        other => Ok(other.clone()),
    }
}

fn side_tag(side: Side) -> &'static str {
    match side {
        Side::Local => "L",
        Side::Remote => "R",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct DummyDispatchable;

    #[async_trait::async_trait]
    impl Dispatchable for DummyDispatchable {
        async fn dispatch(&self, _method: &str, _params: Vec<Value>) -> Result<Value, crate::error::RpcError> {
            Ok(Value::Null)
        }
    }

    fn dummy_object() -> Arc<AnyObject> {
        Arc::new(DummyDispatchable)
    }

    #[tokio::test]
    async fn encode_turns_local_placeholder_into_descriptor_and_tracks_outstanding() {
        let local_objects = LocalObjectRegistry::new();
        let outstanding = OutstandingReferenceRegistry::new();
        let obj = dummy_object();
        local_objects.insert("obj-1".into(), &obj).await;

        let placeholder = capability_placeholder("obj-1", Side::Local);
        let encoded = encode_value(&placeholder, &local_objects, &outstanding, || "ref-1".into())
            .await
            .unwrap();

        assert_eq!(encoded["Rε"], "obj-1");
        assert_eq!(encoded["S"], "L");
        assert_eq!(
            outstanding
                .count(&ReferenceDescriptor::outstanding_key("obj-1", "ref-1"))
                .await,
            1
        );
    }

    #[tokio::test]
    async fn encode_fails_for_dead_local_object() {
        let local_objects = LocalObjectRegistry::new();
        let outstanding = OutstandingReferenceRegistry::new();
        let placeholder = capability_placeholder("missing", Side::Local);
        let err = encode_value(&placeholder, &local_objects, &outstanding, || "r".into())
            .await
            .unwrap_err();
        assert!(matches!(err, DecodeError::DeadLocalObject(id) if id == "missing"));
    }

    #[tokio::test]
    async fn decode_collapses_repeated_remote_ids_onto_one_proxy() {
        let local_objects = LocalObjectRegistry::new();
        let proxies = ProxyRegistry::new();
        let mut resolved = HashMap::new();
        let mut duplicate_releases = Vec::new();
        let first_descriptor = serde_json::to_value(ReferenceDescriptor::local("remote-obj", "ref-9")).unwrap();
        let second_descriptor = serde_json::to_value(ReferenceDescriptor::local("remote-obj", "ref-10")).unwrap();
        let tree = serde_json::json!([first_descriptor, second_descriptor]);

        let build_count = std::sync::atomic::AtomicUsize::new(0);
        let decoded = decode_value(
            &tree,
            &local_objects,
            &proxies,
            |_id| {
                build_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                dummy_object()
            },
            &mut resolved,
            &mut duplicate_releases,
        )
        .await
        .unwrap();

        assert_eq!(decoded.as_array().unwrap().len(), 2);
        assert_eq!(resolved.len(), 1);
        assert_eq!(build_count.load(std::sync::atomic::Ordering::SeqCst), 1);
        // The first occurrence created the proxy and is tracked for release on
        // drop; the second is redundant and must be finalized right away.
        assert_eq!(duplicate_releases, vec![ReferenceDescriptor::outstanding_key("remote-obj", "ref-10")]);
    }

    #[tokio::test]
    async fn decode_resolves_handed_back_object_via_local_registry() {
        let local_objects = LocalObjectRegistry::new();
        let proxies = ProxyRegistry::new();
        let mut resolved = HashMap::new();
        let mut duplicate_releases = Vec::new();
        let obj = dummy_object();
        local_objects.insert("mine".into(), &obj).await;

        let descriptor = serde_json::to_value(ReferenceDescriptor::remote("mine")).unwrap();
        decode_value(&descriptor, &local_objects, &proxies, |_| dummy_object(), &mut resolved, &mut duplicate_releases)
            .await
            .unwrap();

        assert_eq!(resolved.len(), 1);
        assert!(duplicate_releases.is_empty());
        let _ = Duration::from_secs(0);
    }
}
