//! Full re-mirror of the local history.

use serde::Serialize;
use tracing::info;

use super::{Relay, RelayResult};

/// Counts from a resync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    pub conversations: usize,
    pub messages: usize,
    /// Messages that had never been mirrored and got a new key.
    pub pushed: usize,
}

impl Relay {
    /// Mirror every conversation and message from the local store.
    ///
    /// Conversations go most recent first, each followed by its messages in
    /// timestamp order. Messages already mirrored are rewritten at their
    /// recorded key, so running this twice leaves the remote tree unchanged
    /// apart from sync timestamps. Stops at the first failure.
    pub async fn resync_all(&self) -> RelayResult<ResyncReport> {
        let mut report = ResyncReport::default();

        for summary in self.store.list_conversations().await? {
            let _guard = self.locks.lock(&summary.id).await;

            // Re-read under the lock: the summary may have moved on since listing.
            let Some(conversation) = self.store.get_conversation(&summary.id).await? else {
                continue;
            };
            self.sync.mirror_conversation(&conversation).await?;
            report.conversations += 1;

            for message in self.store.list_messages(&conversation.id).await? {
                match &message.remote_key {
                    Some(key) => self.sync.rewrite_message(&message, key).await?,
                    None => {
                        let key = self.sync.mirror_message(&message).await?;
                        self.store.set_remote_key(message.id, &key).await?;
                        report.pushed += 1;
                    }
                }
                report.messages += 1;
            }
        }

        info!(
            conversations = report.conversations,
            messages = report.messages,
            pushed = report.pushed,
            "Resync complete"
        );
        Ok(report)
    }
}
