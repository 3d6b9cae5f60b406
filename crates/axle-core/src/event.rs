//! Canonical event names and the event payload envelope

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical event names carried in every emitted payload's `event` field.
pub mod names {
    pub const SESSION_START: &str = "session:start";
    pub const SESSION_END: &str = "session:end";
    pub const SESSION_ERROR: &str = "session:error";
    pub const SESSION_RESUME: &str = "session:resume";
    pub const SESSION_FORK: &str = "session:fork";
    pub const TURN_START: &str = "turn:start";
    pub const TURN_END: &str = "turn:end";
    pub const TURN_ERROR: &str = "turn:error";
    pub const PROMPT_SUBMIT: &str = "prompt:submit";
    pub const PROMPT_COMPLETE: &str = "prompt:complete";
    pub const PROVIDER_REQUEST: &str = "provider:request";
    pub const PROVIDER_RESPONSE: &str = "provider:response";
    pub const PROVIDER_ERROR: &str = "provider:error";
    pub const TOOL_PRE: &str = "tool:pre";
    pub const TOOL_POST: &str = "tool:post";
    pub const TOOL_ERROR: &str = "tool:error";
    pub const CONTEXT_PRE_COMPACT: &str = "context:pre_compact";
    pub const CONTEXT_POST_COMPACT: &str = "context:post_compact";
    pub const HOOK_CONTEXT_INJECTION: &str = "hook:context_injection";
    pub const CANCEL_REQUESTED: &str = "cancel:requested";
    pub const CANCEL_COMPLETED: &str = "cancel:completed";
    pub const APPROVAL_REQUESTED: &str = "approval:requested";
    pub const APPROVAL_DECISION: &str = "approval:decision";
    pub const APPROVAL_TIMEOUT: &str = "approval:timeout";
    pub const USER_NOTIFICATION: &str = "user:notification";
    pub const ORCHESTRATOR_COMPLETE: &str = "orchestrator:complete";
    pub const DECISION_TOOL_RESOLUTION: &str = "decision:tool_resolution";
    pub const DECISION_AGENT_RESOLUTION: &str = "decision:agent_resolution";
    pub const DECISION_CONTEXT_RESOLUTION: &str = "decision:context_resolution";
}

/// Envelope field keys stamped into every emitted payload.
pub mod envelope {
    pub const EVENT: &str = "event";
    pub const TS: &str = "ts";
    pub const SEQ: &str = "seq";
    pub const SESSION_ID: &str = "session_id";
    pub const PARENT_ID: &str = "parent_id";
    pub const TURN_ID: &str = "turn_id";
    pub const SPAN_ID: &str = "span_id";
    pub const PARENT_SPAN_ID: &str = "parent_span_id";
}

/// An event payload: a string-keyed JSON object with typed accessors.
///
/// The dispatcher merges the registry's default fields into the payload
/// (explicit fields win) and stamps `event`, `ts`, and `seq` itself, so
/// callers can never forge the envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload {
    fields: Map<String, Value>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a payload from a JSON object value. Non-objects yield `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Builder-style `set`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.fields.get(key).and_then(Value::as_u64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.fields.get(key).and_then(Value::as_bool)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Merge default fields in; existing payload fields win on collision.
    pub fn merge_defaults(&mut self, defaults: &Map<String, Value>) {
        for (key, value) in defaults {
            self.fields
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}
