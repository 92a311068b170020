//! Wire packets: every packet is a JSON object carrying `to` (inbound) or
//! `from` (outbound) plus type-specific fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ProtocolError;
use crate::ids::ActorId;

/// Inbound request addressed to an actor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Target actor.
    pub to: ActorId,
    /// Request type, looked up in the actor's request table.
    #[serde(rename = "type")]
    pub request_type: String,
    /// Remaining type-specific fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Request {
    /// Create a request with no extra fields.
    pub fn new(to: impl Into<ActorId>, request_type: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            request_type: request_type.into(),
            fields: Map::new(),
        }
    }

    /// Attach a field.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        let _ = self.fields.insert(key.to_owned(), value.into());
        self
    }

    /// Parse an inbound text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::NotParseable {
            message: format!("Invalid request packet: {e}"),
        })
    }

    /// Raw field access. JSON `null` counts as absent.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    /// Required string field.
    pub fn require_str(&self, key: &str) -> Result<&str, ProtocolError> {
        self.opt_str(key)?.ok_or_else(|| ProtocolError::missing(key))
    }

    /// Optional string field.
    pub fn opt_str(&self, key: &str) -> Result<Option<&str>, ProtocolError> {
        match self.field(key) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| ProtocolError::bad_type(key, "a string")),
        }
    }

    /// Optional boolean field.
    pub fn opt_bool(&self, key: &str) -> Result<Option<bool>, ProtocolError> {
        match self.field(key) {
            None => Ok(None),
            Some(v) => v
                .as_bool()
                .map(Some)
                .ok_or_else(|| ProtocolError::bad_type(key, "a boolean")),
        }
    }

    /// Optional unsigned integer field.
    pub fn opt_u64(&self, key: &str) -> Result<Option<u64>, ProtocolError> {
        match self.field(key) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| ProtocolError::bad_type(key, "an unsigned integer")),
        }
    }

    /// Optional 32-bit mask field (`whatToShow`).
    pub fn opt_u32(&self, key: &str) -> Result<Option<u32>, ProtocolError> {
        match self.opt_u64(key)? {
            None => Ok(None),
            Some(n) => u32::try_from(n)
                .map(Some)
                .map_err(|_| ProtocolError::bad_type(key, "a 32-bit unsigned integer")),
        }
    }
}

/// Outbound packet: a reply, an error, or an unsolicited event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Sending actor.
    pub from: ActorId,
    /// Reply or event body.
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Packet {
    /// Wrap a reply body. Non-object bodies are stored under `value`.
    pub fn reply(from: ActorId, body: Value) -> Self {
        let body = match body {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                let _ = map.insert("value".to_owned(), other);
                map
            }
        };
        Self { from, body }
    }

    /// Build an error packet.
    pub fn error(from: ActorId, error: &str, message: impl Into<String>) -> Self {
        let mut body = Map::new();
        let _ = body.insert("error".to_owned(), Value::from(error));
        let _ = body.insert("message".to_owned(), Value::from(message.into()));
        Self { from, body }
    }

    /// Build an unsolicited event of `event_type` with extra fields.
    pub fn event(from: ActorId, event_type: &str, fields: Map<String, Value>) -> Self {
        let mut body = fields;
        let _ = body.insert("type".to_owned(), Value::from(event_type));
        Self { from, body }
    }

    /// The `error` name, if this is an error packet.
    pub fn error_name(&self) -> Option<&str> {
        self.body.get("error").and_then(Value::as_str)
    }

    /// The `type` field, if this is an event.
    pub fn event_type(&self) -> Option<&str> {
        self.body.get("type").and_then(Value::as_str)
    }

    /// Body field access.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Minimal reference to a freshly created actor: `{actor}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grip {
    /// The referenced actor.
    pub actor: ActorId,
}

impl Grip {
    /// Grip for `actor`.
    pub fn new(actor: ActorId) -> Self {
        Self { actor }
    }
}
