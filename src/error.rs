//! Error taxonomy (§4.7): serialization/deserialization of structured errors,
//! the intentional-vs-internal distinction, and stack masking.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;
use webrpc_protocol::SerializedError;

/// An application or protocol error as it exists inside this process, before
/// (or after) crossing the wire.
#[derive(Debug, Clone)]
pub struct RpcError {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    pub constructor_name: String,
    pub fields: serde_json::Map<String, Value>,
    pub errors: Vec<RpcError>,
    intentional: bool,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RpcError {}

impl RpcError {
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            name: kind.to_owned(),
            message: message.into(),
            stack: Some(format!("{kind}: <no backtrace captured>")),
            constructor_name: kind.to_owned(),
            fields: serde_json::Map::new(),
            errors: Vec::new(),
            intentional: false,
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new("GenericError", message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        Self::new("RangeError", message)
    }

    pub fn reference_error(message: impl Into<String>) -> Self {
        Self::new("ReferenceError", message)
    }

    pub fn internal_placeholder() -> Self {
        Self::new(
            INTERNAL_ERROR_KIND,
            "An internal error occurred. See server logs for details.",
        )
    }

    pub fn channel_state_lost() -> Self {
        Self::new("ChannelStateLost", "channel state was lost")
    }

    pub fn invalid_call(reason: &str, message: impl Into<String>) -> Self {
        let mut err = Self::new("InvalidCallError", message);
        err.fields
            .insert("reason".into(), Value::String(reason.to_owned()));
        err
    }

    pub fn aggregate(message: impl Into<String>, errors: Vec<RpcError>) -> Self {
        Self {
            errors,
            ..Self::new("AggregateError", message)
        }
    }

    /// Mark this error as having been thrown intentionally via [`raise`], so
    /// safe-exceptions mode lets it cross the wire unmasked.
    pub fn mark_intentional(mut self) -> Self {
        self.intentional = true;
        self
    }

    pub fn is_intentional(&self) -> bool {
        self.intentional
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_owned(), value);
        self
    }

    /// Serialize for the wire. `mask_stack_traces` strips `stack` down to
    /// `"<Name>: <message>"`.
    pub fn to_wire(&self, mask_stack_traces: bool) -> SerializedError {
        let stack = if mask_stack_traces {
            Some(format!("{}: {}", self.name, self.message))
        } else {
            self.stack.clone()
        };
        SerializedError {
            name: self.name.clone(),
            message: self.message.clone(),
            stack,
            constructor_name: self.constructor_name.clone(),
            fields: self.fields.clone(),
            errors: if self.errors.is_empty() {
                None
            } else {
                Some(self.errors.iter().map(|e| e.to_wire(mask_stack_traces)).collect())
            },
        }
    }

    /// Append a locally-captured caller stack under a delimiter line, as
    /// `addCallerStackTraces` does on the calling side after deserializing a
    /// remote error.
    pub fn with_caller_stack(mut self, caller_stack: &str) -> Self {
        let existing = self.stack.take().unwrap_or_default();
        self.stack = Some(format!(
            "{existing}\n-- remote call site --\n{caller_stack}"
        ));
        self
    }
}

pub const INTERNAL_ERROR_KIND: &str = "InternalError";

/// `raise(value)` marks the value with the intentional-error sentinel so it
/// crosses safe-exceptions mode unmasked, mirroring the scripting-language
/// helper of the same name. Rust has no implicit-throw to hook, so this
/// simply returns the tagged value for the caller to propagate with `?`.
pub fn raise(err: impl Into<RpcError>) -> RpcError {
    err.into().mark_intentional()
}

impl From<RpcError> for RpcError {
    fn from(e: RpcError) -> Self {
        e
    }
}

// ---------------------------------------------------------------------------
// Error-type registry (§4.7, §9 open question on conflicting factories)
// ---------------------------------------------------------------------------

type ErrorFactory = dyn Fn(&SerializedError) -> RpcError + Send + Sync;

/// Maps `$constructorName` / `name` to a reconstruction factory, so a peer
/// can deserialize a remote error back into a recognizable local kind.
///
/// Per the open question in the distilled spec, when both a class-provided
/// `deserialize` and an explicitly registered callback could apply, the
/// explicit callback wins — this registry only ever stores one factory per
/// key, and [`ErrorRegistry::register`] always overwrites, so callers control
/// precedence by registration order.
pub struct ErrorRegistry {
    factories: HashMap<String, Box<ErrorFactory>>,
}

impl Default for ErrorRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        for kind in [
            "GenericError",
            "EvalError",
            "RangeError",
            "ReferenceError",
            "SyntaxError",
            "TypeError",
            "URIError",
            INTERNAL_ERROR_KIND,
        ] {
            registry.register(kind, default_factory(kind));
        }
        registry.register("AggregateError", |wire| {
            RpcError {
                name: wire.name.clone(),
                message: wire.message.clone(),
                stack: wire.stack.clone(),
                constructor_name: wire.constructor_name.clone(),
                fields: wire.fields.clone(),
                errors: wire
                    .errors
                    .clone()
                    .unwrap_or_default()
                    .iter()
                    .map(|child| deserialize_with_default(child))
                    .collect(),
                intentional: false,
            }
        });
        registry
    }
}

fn default_factory(kind: &str) -> impl Fn(&SerializedError) -> RpcError + Send + Sync + 'static {
    let kind = kind.to_owned();
    move |wire: &SerializedError| RpcError {
        name: kind.clone(),
        message: wire.message.clone(),
        stack: wire.stack.clone(),
        constructor_name: wire.constructor_name.clone(),
        fields: wire.fields.clone(),
        errors: Vec::new(),
        intentional: false,
    }
}

fn deserialize_with_default(wire: &SerializedError) -> RpcError {
    RpcError {
        name: wire.name.clone(),
        message: wire.message.clone(),
        stack: wire.stack.clone(),
        constructor_name: wire.constructor_name.clone(),
        fields: wire.fields.clone(),
        errors: Vec::new(),
        intentional: false,
    }
}

impl ErrorRegistry {
    /// Register (or overwrite) a factory for `kind`. Applications use this to
    /// add error kinds beyond the standard set.
    pub fn register(
        &mut self,
        kind: &str,
        factory: impl Fn(&SerializedError) -> RpcError + Send + Sync + 'static,
    ) {
        self.factories.insert(kind.to_owned(), Box::new(factory));
    }

    /// Reconstruct an [`RpcError`] from its wire form: look up
    /// `$constructorName` then `name`; fall back to a generic remote-error
    /// carrier that still preserves `{name, message, stack}`.
    pub fn deserialize(&self, wire: &SerializedError) -> RpcError {
        if let Some(factory) = self.factories.get(&wire.constructor_name) {
            return factory(wire);
        }
        if let Some(factory) = self.factories.get(&wire.name) {
            return factory(wire);
        }
        deserialize_with_default(wire)
    }
}
