//! Message relay.
//!
//! Coordinates the protocol session, the local store and the remote channel:
//! inbound messages are persisted then mirrored, remote commands are executed
//! against the session, and the whole history can be re-mirrored on demand.

mod commands;
mod error;
mod inbound;
mod locks;
mod outbound;
mod resync;

pub use commands::{
    CommandOutcome, CommandStatus, MarkReadCommand, SendMessageCommand, run_command_inbox,
};
pub use error::{RelayError, RelayResult};
pub use inbound::{IgnoreReason, InboundOutcome};
pub use locks::ConversationLocks;
pub use resync::ResyncReport;

use dashmap::DashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::bridge::ProtocolSession;
use crate::remote::SyncChannel;
use crate::store::{LocalStore, StoredMessage};

/// Shared relay context.
pub struct Relay {
    store: LocalStore,
    sync: SyncChannel,
    /// The open protocol session, if any.
    session: RwLock<Option<Arc<dyn ProtocolSession>>>,
    locks: ConversationLocks,
    /// Inbox entries (`{inbox}/{key}`) this process has already taken.
    claimed: DashSet<String>,
}

impl Relay {
    pub fn new(store: LocalStore, sync: SyncChannel) -> Self {
        Self {
            store,
            sync,
            session: RwLock::new(None),
            locks: ConversationLocks::default(),
            claimed: DashSet::new(),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn sync(&self) -> &SyncChannel {
        &self.sync
    }

    /// Make `session` the one used for outbound sends.
    pub async fn attach_session(&self, session: Arc<dyn ProtocolSession>) {
        *self.session.write().await = Some(session);
    }

    /// Forget the current session. Returns it if there was one.
    pub async fn detach_session(&self) -> Option<Arc<dyn ProtocolSession>> {
        self.session.write().await.take()
    }

    pub async fn session(&self) -> Option<Arc<dyn ProtocolSession>> {
        self.session.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Push a freshly stored message and remember its remote key.
    ///
    /// Failures are logged; the next resync mirrors the message again.
    async fn mirror_new_message(&self, message: &StoredMessage) -> Option<String> {
        let key = match self.sync.mirror_message(message).await {
            Ok(key) => key,
            Err(e) => {
                warn!(
                    message_id = message.id,
                    conversation_id = %message.conversation_id,
                    "Failed to mirror message: {}",
                    e
                );
                return None;
            }
        };

        if let Err(e) = self.store.set_remote_key(message.id, &key).await {
            warn!(message_id = message.id, "Failed to record remote key: {:#}", e);
        }
        Some(key)
    }
}
