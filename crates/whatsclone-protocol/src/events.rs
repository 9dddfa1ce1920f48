//! Events and responses written by the bridge to its stdout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messages::WireMessage;

/// Close status code the protocol library uses for an authenticated logout.
pub const LOGGED_OUT_STATUS: u16 = 401;

/// Session events emitted by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// A pairing challenge. Superseded by the next one.
    Qr { qr: String },

    /// The session completed its handshake.
    Open {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<Value>,
    },

    /// The session closed.
    Close {
        #[serde(
            default,
            rename = "statusCode",
            alias = "status_code",
            skip_serializing_if = "Option::is_none"
        )]
        status_code: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// A batch of new messages, in delivery order.
    Messages { messages: Vec<WireMessage> },
}

impl BridgeEvent {
    /// Whether a close event was caused by an authenticated logout.
    pub fn is_logged_out(&self) -> bool {
        matches!(
            self,
            Self::Close {
                status_code: Some(LOGGED_OUT_STATUS),
                ..
            }
        )
    }
}

/// Response to a command carrying an `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Any line the bridge can write.
#[derive(Debug, Clone)]
pub enum BridgeLine {
    Response(BridgeResponse),
    Event(BridgeEvent),
}

impl BridgeLine {
    /// Parse one stdout line.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        let mut value: Value = serde_json::from_str(line)?;

        if value.get("type").and_then(|v| v.as_str()) == Some("response") {
            if let Some(obj) = value.as_object_mut() {
                obj.remove("type");
            }
            let response: BridgeResponse = serde_json::from_value(value)?;
            return Ok(Self::Response(response));
        }

        let event: BridgeEvent = serde_json::from_value(value)?;
        Ok(Self::Event(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let line = r#"{"type":"response","id":"req-7","ok":false,"error":"timed out"}"#;
        match BridgeLine::parse(line).unwrap() {
            BridgeLine::Response(resp) => {
                assert_eq!(resp.id, "req-7");
                assert!(!resp.ok);
                assert_eq!(resp.error.as_deref(), Some("timed out"));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_close_logged_out() {
        let line = r#"{"type":"close","statusCode":401,"reason":"logged out"}"#;
        let BridgeLine::Event(event) = BridgeLine::parse(line).unwrap() else {
            panic!("expected event");
        };
        assert!(event.is_logged_out());
    }

    #[test]
    fn test_parse_close_connection_lost() {
        let line = r#"{"type":"close","statusCode":428}"#;
        let BridgeLine::Event(event) = BridgeLine::parse(line).unwrap() else {
            panic!("expected event");
        };
        assert!(!event.is_logged_out());

        let BridgeLine::Event(bare) = BridgeLine::parse(r#"{"type":"close"}"#).unwrap() else {
            panic!("expected event");
        };
        assert!(!bare.is_logged_out());
    }

    #[test]
    fn test_parse_messages_batch() {
        let line = r#"{"type":"messages","messages":[
            {"key":{"remoteJid":"5511999@s.whatsapp.net","fromMe":false,"id":"ABC"},
             "message":{"conversation":"oi"},"timestamp":1000}
        ]}"#
        .replace('\n', "");
        let BridgeLine::Event(BridgeEvent::Messages { messages }) =
            BridgeLine::parse(&line).unwrap()
        else {
            panic!("expected messages event");
        };
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key.remote_jid, "5511999@s.whatsapp.net");
        assert_eq!(messages[0].timestamp_millis(), Some(1000));
    }

    #[test]
    fn test_unknown_type_is_error() {
        assert!(BridgeLine::parse(r#"{"type":"presence"}"#).is_err());
    }
}
