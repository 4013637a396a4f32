//! webrpc-protocol: wire format types for the capability RPC protocol.
//!
//! All session-level messages use a top-level `type` field for discriminated
//! deserialization. Reference descriptors may appear anywhere a JSON value is
//! expected inside `parameters`, `value`, or `error`; they are not covered by
//! this enum because they are substituted in and out of arbitrary positions
//! by the encoder/decoder in `webrpc::reference`, not by serde derive.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Reference descriptor
// ---------------------------------------------------------------------------

/// Side marker on a [`ReferenceDescriptor`], interpreted relative to the
/// *sender* of the message that carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    /// Object is local to the sender (remote to the receiver).
    #[serde(rename = "L")]
    Local,
    /// Object is remote to the sender (local to the receiver) — i.e. the
    /// receiver is being handed back its own proxy.
    #[serde(rename = "R")]
    Remote,
}

/// Wire form of a reference: `{ "Rε": "<uuid-or-well-known>", "S": "L"|"R", "Rid"?: "<uuid>" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDescriptor {
    #[serde(rename = "Rε")]
    pub object_id: String,
    #[serde(rename = "S")]
    pub side: Side,
    #[serde(rename = "Rid", default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
}

impl ReferenceDescriptor {
    pub fn local(object_id: impl Into<String>, reference_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            side: Side::Local,
            reference_id: Some(reference_id.into()),
        }
    }

    pub fn remote(object_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            side: Side::Remote,
            reference_id: None,
        }
    }

    /// Key used by the outstanding-reference registry: `"<object_id>.<reference_id>"`.
    pub fn outstanding_key(object_id: &str, reference_id: &str) -> String {
        format!("{object_id}.{reference_id}")
    }
}

/// Returns `true` if `value` looks like a serialized [`ReferenceDescriptor`]
/// (i.e. a JSON object carrying the `Rε`/`S` keys).
pub fn looks_like_reference(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.contains_key("Rε") && map.contains_key("S"))
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Top-level session message envelope, discriminated on `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum Envelope {
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
    Ping,
    Pong,
    /// Reserved: declared by the protocol, never emitted. Implementations
    /// must accept and silently ignore it on receipt.
    Event(EventEnvelope),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: String,
    pub receiver: Value,
    pub method: String,
    #[serde(default)]
    pub parameters: Vec<Value>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub receiver: Value,
    pub name: String,
    #[serde(default)]
    pub object: Value,
}

// ---------------------------------------------------------------------------
// Invalid-call error codes (§7)
// ---------------------------------------------------------------------------

pub mod error_codes {
    pub const INVALID_CALL: &str = "invalid-call";
    pub const CHANNEL_STATE_LOST: &str = "channel-state-lost";
    pub const INTERNAL_ERROR: &str = "internal-error";
    pub const DECODE_FAILED: &str = "decode-failed";
}

pub mod invalid_call_reasons {
    pub const NO_RECEIVER_SPECIFIED: &str = "no-receiver-specified";
    pub const NO_SUCH_RECEIVER: &str = "no-such-receiver";
    pub const NO_SUCH_METHOD: &str = "no-such-method";
}

// ---------------------------------------------------------------------------
// Serialized error form (§4.7)
// ---------------------------------------------------------------------------

/// Wire form of an error: `{ name, message, stack, $constructorName, ...fields, errors? }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerializedError {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(rename = "$constructorName")]
    pub constructor_name: String,
    /// Own enumerable fields beyond the base ones above.
    #[serde(default, flatten)]
    pub fields: serde_json::Map<String, Value>,
    /// Present only on aggregate errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<SerializedError>>,
}

// ---------------------------------------------------------------------------
// Introspection (§4.5, §6)
// ---------------------------------------------------------------------------

/// One of the closed set of simple types reported by introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimpleType {
    String,
    Number,
    Bigint,
    Boolean,
    Object,
    Array,
    Void,
    Undefined,
    Null,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterIntrospection {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub simple_type: SimpleType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodIntrospection {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub simple_return_type: SimpleType,
    pub parameters: Vec<ParameterIntrospection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventIntrospection {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectedService {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub methods: Vec<MethodIntrospection>,
    pub events: Vec<EventIntrospection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredService {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_descriptor_wire_shape_round_trips() {
        let local = ReferenceDescriptor::local("obj-1", "ref-1");
        let json = serde_json::to_value(&local).unwrap();
        assert_eq!(json["Rε"], "obj-1");
        assert_eq!(json["S"], "L");
        assert_eq!(json["Rid"], "ref-1");
        let back: ReferenceDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, local);
    }

    #[test]
    fn remote_descriptor_omits_rid() {
        let remote = ReferenceDescriptor::remote("obj-2");
        let json = serde_json::to_value(&remote).unwrap();
        assert!(json.get("Rid").is_none());
        assert_eq!(json["S"], "R");
    }

    #[test]
    fn looks_like_reference_detects_descriptor_shape() {
        let desc = serde_json::to_value(ReferenceDescriptor::remote("x")).unwrap();
        assert!(looks_like_reference(&desc));
        assert!(!looks_like_reference(&Value::String("x".into())));
        assert!(!looks_like_reference(&serde_json::json!({"Rε": "x"})));
    }

    #[test]
    fn envelope_request_round_trips_with_type_tag() {
        let env = Envelope::Request(RequestEnvelope {
            id: "req-1".into(),
            receiver: serde_json::to_value(ReferenceDescriptor::remote("svc")).unwrap(),
            method: "add".into(),
            parameters: vec![Value::from(2), Value::from(3)],
            metadata: Value::Null,
        });
        let text = serde_json::to_string(&env).unwrap();
        assert!(text.contains("\"type\":\"request\""));
        let back: Envelope = serde_json::from_str(&text).unwrap();
        match back {
            Envelope::Request(r) => assert_eq!(r.method, "add"),
            _ => panic!("expected request"),
        }
    }

    #[test]
    fn envelope_ping_pong_are_unit_variants() {
        assert!(matches!(
            serde_json::from_str::<Envelope>(r#"{"type":"ping"}"#).unwrap(),
            Envelope::Ping
        ));
        assert!(matches!(
            serde_json::from_str::<Envelope>(r#"{"type":"pong"}"#).unwrap(),
            Envelope::Pong
        ));
    }

    #[test]
    fn serialized_error_keeps_extra_fields_flattened() {
        let mut fields = serde_json::Map::new();
        fields.insert("code".into(), Value::from("ECONN"));
        let err = SerializedError {
            name: "GenericError".into(),
            message: "boom".into(),
            stack: Some("GenericError: boom\n  at x".into()),
            constructor_name: "GenericError".into(),
            fields,
            errors: None,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "ECONN");
        assert_eq!(json["$constructorName"], "GenericError");
        let back: SerializedError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }
}
