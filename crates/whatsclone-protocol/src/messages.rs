//! Inbound message shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message key as reported by the protocol library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    /// Routing address of the counterpart (the conversation id).
    pub remote_jid: String,
    /// Set when the message was sent by the paired account itself.
    #[serde(default)]
    pub from_me: bool,
    /// Protocol message id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// A raw message delivered by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub key: MessageKey,
    /// Content object keyed by message kind (`conversation`, `extendedTextMessage`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    /// Epoch milliseconds, when the bridge normalised the time itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Protocol send time in unix seconds, as the client library reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_timestamp: Option<i64>,
    /// Display name the sender chose for themselves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
}

impl WireMessage {
    /// Classify the content of this message.
    pub fn shape(&self) -> MessageShape {
        match &self.message {
            Some(content) => MessageShape::classify(content),
            None => MessageShape::Empty,
        }
    }

    /// Send time in epoch milliseconds. `timestamp` wins over the
    /// seconds-based `messageTimestamp`.
    pub fn timestamp_millis(&self) -> Option<i64> {
        self.timestamp
            .or_else(|| self.message_timestamp.map(|secs| secs.saturating_mul(1000)))
    }
}

/// The content shapes the relay distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageShape {
    /// `{"conversation": "text"}`
    Conversation(String),
    /// `{"extendedTextMessage": {"text": "text", ...}}`
    ExtendedText(String),
    /// Any other kind (image, sticker, reaction, ...), named by its key.
    Unsupported(String),
    /// No content or empty text.
    Empty,
}

/// Keys that accompany real content without being content themselves.
const METADATA_KEYS: &[&str] = &["messageContextInfo"];

impl MessageShape {
    /// Classify a content object.
    pub fn classify(content: &Value) -> Self {
        let Some(obj) = content.as_object() else {
            return Self::Empty;
        };

        if let Some(text) = obj.get("conversation").and_then(|v| v.as_str()) {
            return non_empty(text).map_or(Self::Empty, Self::Conversation);
        }

        if let Some(ext) = obj.get("extendedTextMessage") {
            return ext
                .get("text")
                .and_then(|v| v.as_str())
                .and_then(non_empty)
                .map_or(Self::Empty, Self::ExtendedText);
        }

        obj.keys()
            .find(|k| !METADATA_KEYS.contains(&k.as_str()))
            .map_or(Self::Empty, |k| Self::Unsupported(k.clone()))
    }

    /// The textual body, for shapes that carry one.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Conversation(text) | Self::ExtendedText(text) => Some(text),
            Self::Unsupported(_) | Self::Empty => None,
        }
    }
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Strip the routing suffix from an address: `5511999@s.whatsapp.net` -> `5511999`.
pub fn phone_from_jid(jid: &str) -> &str {
    jid.split_once('@').map_or(jid, |(phone, _)| phone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_conversation() {
        let shape = MessageShape::classify(&json!({"conversation": "oi"}));
        assert_eq!(shape, MessageShape::Conversation("oi".to_string()));
        assert_eq!(shape.text(), Some("oi"));
    }

    #[test]
    fn test_classify_extended_text_with_context_info() {
        let content = json!({
            "messageContextInfo": {"deviceListMetadata": {}},
            "extendedTextMessage": {"text": "see https://example.com", "matchedText": "https://example.com"}
        });
        assert_eq!(
            MessageShape::classify(&content),
            MessageShape::ExtendedText("see https://example.com".to_string())
        );
    }

    #[test]
    fn test_classify_unsupported_kind() {
        let content = json!({
            "messageContextInfo": {},
            "imageMessage": {"url": "https://mmg.whatsapp.net/x"}
        });
        assert_eq!(
            MessageShape::classify(&content),
            MessageShape::Unsupported("imageMessage".to_string())
        );
    }

    #[test]
    fn test_classify_empty_text() {
        assert_eq!(
            MessageShape::classify(&json!({"conversation": ""})),
            MessageShape::Empty
        );
        assert_eq!(MessageShape::classify(&json!({})), MessageShape::Empty);
        assert_eq!(MessageShape::classify(&json!("oi")), MessageShape::Empty);
    }

    #[test]
    fn test_wire_message_defaults() {
        let msg: WireMessage = serde_json::from_value(json!({
            "key": {"remoteJid": "5511999@s.whatsapp.net"}
        }))
        .unwrap();
        assert!(!msg.key.from_me);
        assert_eq!(msg.shape(), MessageShape::Empty);
        assert!(msg.timestamp_millis().is_none());
    }

    #[test]
    fn test_timestamp_units() {
        let seconds: WireMessage = serde_json::from_value(json!({
            "key": {"remoteJid": "5511999@s.whatsapp.net"},
            "messageTimestamp": 1_700_000_000i64
        }))
        .unwrap();
        assert_eq!(seconds.timestamp_millis(), Some(1_700_000_000_000));

        let both: WireMessage = serde_json::from_value(json!({
            "key": {"remoteJid": "5511999@s.whatsapp.net"},
            "timestamp": 1000,
            "messageTimestamp": 1_700_000_000i64
        }))
        .unwrap();
        assert_eq!(both.timestamp_millis(), Some(1000));
    }

    #[test]
    fn test_phone_from_jid() {
        assert_eq!(phone_from_jid("5511999@s.whatsapp.net"), "5511999");
        assert_eq!(phone_from_jid("5511999@proto"), "5511999");
        assert_eq!(phone_from_jid("5511999"), "5511999");
    }
}
