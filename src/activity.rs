//! Activity data model.
//!
//! Activities are treated as opaque records: the engine inspects `type`,
//! `conversation.id` and `from.id`, and everything else passes through
//! untouched via flattened maps.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single message-like object exchanged between user and bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(rename = "type")]
    pub activity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Participant>,
    /// Every field the engine does not inspect.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Activity {
    /// Build a plain text message activity, the common user-turn payload.
    #[must_use]
    pub fn message(text: impl Into<String>) -> Self {
        let mut extra = Map::new();
        extra.insert("text".to_string(), Value::String(text.into()));
        Self {
            activity_type: "message".to_string(),
            conversation: None,
            from: None,
            extra,
        }
    }

    /// The conversation this activity belongs to, if the server tagged it.
    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation.as_ref().map(|c| c.id.as_str())
    }

    /// The `text` field, when present and a string.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.extra.get("text").and_then(Value::as_str)
    }
}

/// The conversation an activity belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationReference {
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The sender of an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructor_sets_type_and_text() {
        let activity = Activity::message("Aloha!");
        assert_eq!(activity.activity_type, "message");
        assert_eq!(activity.text(), Some("Aloha!"));
        assert!(activity.conversation.is_none());
    }

    #[test]
    fn unknown_fields_round_trip() {
        let json = r#"{
            "type": "message",
            "text": "Hello, World!",
            "channelData": {"feedback": true},
            "conversation": {"id": "c-00001", "name": "test"}
        }"#;

        let activity: Activity = serde_json::from_str(json).unwrap();
        assert_eq!(activity.activity_type, "message");
        assert_eq!(activity.conversation_id(), Some("c-00001"));
        assert_eq!(activity.extra["channelData"]["feedback"], Value::Bool(true));

        let back = serde_json::to_value(&activity).unwrap();
        assert_eq!(back["channelData"]["feedback"], Value::Bool(true));
        assert_eq!(back["conversation"]["name"], "test");
    }

    #[test]
    fn from_id_is_optional() {
        let json = r#"{"type": "typing", "from": {"role": "bot"}}"#;
        let activity: Activity = serde_json::from_str(json).unwrap();
        let from = activity.from.unwrap();
        assert!(from.id.is_none());
        assert_eq!(from.extra["role"], "bot");
    }

    #[test]
    fn missing_type_is_rejected() {
        let result = serde_json::from_str::<Activity>(r#"{"text": "hi"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn deep_value_equality() {
        let a: Activity = serde_json::from_str(r#"{"type":"message","text":"您好！"}"#).unwrap();
        let b: Activity = serde_json::from_str(r#"{"type":"message","text":"您好！"}"#).unwrap();
        assert_eq!(a, b);
    }
}
