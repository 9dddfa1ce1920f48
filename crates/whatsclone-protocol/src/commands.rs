//! Commands sent from the relay to the bridge.

use serde::{Deserialize, Serialize};

/// A command written to the bridge's stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    /// Send a plain text message to a routing address.
    SendText {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        jid: String,
        text: String,
    },
    /// Close the protocol session without logging out.
    Close {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl BridgeCommand {
    /// Build a send command without a request id.
    pub fn send_text(jid: impl Into<String>, text: impl Into<String>) -> Self {
        Self::SendText {
            id: None,
            jid: jid.into(),
            text: text.into(),
        }
    }

    /// Return a copy of the command carrying the given request id.
    pub fn with_id(self, request_id: impl Into<String>) -> Self {
        let request_id = Some(request_id.into());
        match self {
            Self::SendText { jid, text, .. } => Self::SendText {
                id: request_id,
                jid,
                text,
            },
            Self::Close { .. } => Self::Close { id: request_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_send_text_serialization() {
        let cmd = BridgeCommand::send_text("5511999@s.whatsapp.net", "oi").with_id("req-1");
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "send_text",
                "id": "req-1",
                "jid": "5511999@s.whatsapp.net",
                "text": "oi"
            })
        );
    }

    #[test]
    fn test_close_without_id_omits_field() {
        let value = serde_json::to_value(BridgeCommand::Close { id: None }).unwrap();
        assert_eq!(value, json!({"type": "close"}));
    }
}
