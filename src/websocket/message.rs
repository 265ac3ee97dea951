use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ClientError;

/// Discriminator of the server's keep-alive acknowledgement
pub const KEEPALIVE_ACK: &str = "pong";

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Ping,
}

impl ClientFrame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Raw frame as delivered by a transport, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// A decoded inbound message.
///
/// Only the `type` discriminator, `title` and `message` have meaning to the
/// client; every other field is carried through untouched for the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InboundMessage {
    fields: Map<String, Value>,
}

impl InboundMessage {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// The `type` discriminator, if present and a string
    pub fn kind(&self) -> Option<&str> {
        self.get_str("type")
    }

    pub fn title(&self) -> Option<&str> {
        self.get_str("title")
    }

    pub fn message(&self) -> Option<&str> {
        self.get_str("message")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    /// Transport-internal acknowledgement that must not reach consumers
    pub fn is_keepalive_ack(&self) -> bool {
        self.kind() == Some(KEEPALIVE_ACK)
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Decode a frame into a message.
///
/// The frame must hold a JSON object; anything else is a `MalformedMessage`.
pub fn parse_frame(frame: &InboundFrame) -> Result<InboundMessage, ClientError> {
    let value: Value = match frame {
        InboundFrame::Text(text) => serde_json::from_str(text),
        InboundFrame::Binary(bytes) => serde_json::from_slice(bytes),
    }
    .map_err(|e| ClientError::MalformedMessage(e.to_string()))?;

    match value {
        Value::Object(fields) => Ok(InboundMessage::new(fields)),
        other => Err(ClientError::MalformedMessage(format!(
            "expected a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
