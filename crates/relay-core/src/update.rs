//! Inbound update model.
//!
//! The update-retrieval collaborator (polling loop, webhook server, test
//! harness) converts platform payloads into [`Update`] values before handing
//! them to the engine. The dispatch core never parses platform JSON itself.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One inbound event from the external transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Update {
    /// A chat message, possibly carrying attachments and a structured payload.
    Message(Message),
    /// A platform event that is not a message.
    Raw(Value),
}

impl Update {
    /// Returns the message if this update is one.
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(message) => Some(message),
            Self::Raw(_) => None,
        }
    }

    /// Returns the raw event if this update is not a message.
    pub fn as_raw(&self) -> Option<&Value> {
        match self {
            Self::Raw(value) => Some(value),
            Self::Message(_) => None,
        }
    }

    /// Returns the reply destination, if the update carries one.
    pub fn target_id(&self) -> Option<i64> {
        self.as_message().and_then(|m| m.target_id)
    }

    /// Short name used in log fields.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Raw(_) => "raw",
        }
    }
}

impl From<Message> for Update {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

/// A chat message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Plain text of the message (may be empty).
    #[serde(default)]
    pub text: String,
    /// Attachments in the order the platform delivered them.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Structured payload (e.g. from a keyboard button), if any.
    #[serde(default)]
    pub payload: Option<Value>,
    /// Where replies to this message should go.
    #[serde(default)]
    pub target_id: Option<i64>,
    /// Transport-specific extra fields.
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl Message {
    /// Creates a text-only message.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Sets the reply destination.
    pub fn with_target(mut self, target_id: i64) -> Self {
        self.target_id = Some(target_id);
        self
    }

    /// Appends an attachment.
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Sets the structured payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Returns the payload when it is a JSON object.
    pub fn payload_object(&self) -> Option<&Map<String, Value>> {
        self.payload.as_ref().and_then(Value::as_object)
    }
}

/// A media item attached to a message, or produced by an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Attachment type, e.g. `"photo"`, `"doc"`, `"audio"`.
    pub kind: String,
    /// Platform identifier of the item.
    #[serde(default)]
    pub id: Option<i64>,
    /// Identifier of the item's owner.
    #[serde(default)]
    pub owner_id: Option<i64>,
    /// The unparsed platform object.
    #[serde(default)]
    pub raw: Value,
}

impl Attachment {
    /// Creates an attachment with only a type.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            owner_id: None,
            raw: Value::Null,
        }
    }

    /// Builds an attachment from a platform object, reading `id` and
    /// `owner_id` when present.
    pub fn from_raw(kind: impl Into<String>, raw: Value) -> Self {
        Self {
            kind: kind.into(),
            id: raw.get("id").and_then(Value::as_i64),
            owner_id: raw.get("owner_id").and_then(Value::as_i64),
            raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attachment_from_raw_reads_ids() {
        let a = Attachment::from_raw("photo", json!({"id": 7, "owner_id": -3, "sizes": []}));
        assert_eq!(a.kind, "photo");
        assert_eq!(a.id, Some(7));
        assert_eq!(a.owner_id, Some(-3));
    }

    #[test]
    fn test_payload_object_ignores_non_objects() {
        let m = Message::text("hi").with_payload(json!("bad"));
        assert!(m.payload_object().is_none());

        let m = Message::text("hi").with_payload(json!({"a": 1}));
        assert_eq!(m.payload_object().map(|o| o.len()), Some(1));
    }

    #[test]
    fn test_update_deserializes_tagged() {
        let update: Update = serde_json::from_value(json!({
            "type": "message",
            "data": {"text": "hello", "target_id": 5}
        }))
        .unwrap();
        assert_eq!(update.target_id(), Some(5));
        assert_eq!(update.kind_name(), "message");
    }
}
