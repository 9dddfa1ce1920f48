//! Protocol capability traits.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use whatsclone_protocol::BridgeEvent;

use super::BridgeResult;

/// An open protocol session.
#[async_trait]
pub trait ProtocolSession: Send + Sync {
    /// Send a plain text message to a routing address.
    async fn send_text(&self, jid: &str, text: &str) -> BridgeResult<()>;

    /// Close the session without logging out. Credentials stay valid.
    async fn close(&self) -> BridgeResult<()>;
}

/// A session handle plus its event stream.
///
/// Events arrive in the order the protocol produced them. The stream ends
/// when the underlying session is gone.
pub struct ProtocolConnection {
    pub session: Arc<dyn ProtocolSession>,
    pub events: mpsc::Receiver<BridgeEvent>,
}

/// Opens protocol sessions using persisted credentials.
#[async_trait]
pub trait ProtocolConnector: Send + Sync {
    async fn connect(&self) -> BridgeResult<ProtocolConnection>;
}
