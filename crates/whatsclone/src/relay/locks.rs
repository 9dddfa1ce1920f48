//! Per-conversation serialisation.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per conversation id.
///
/// Every read-modify-write of a conversation summary happens under its lock,
/// so concurrent inbound messages, commands and resync never lose updates.
#[derive(Debug, Default)]
pub struct ConversationLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ConversationLocks {
    pub async fn lock(&self, conversation_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(conversation_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
