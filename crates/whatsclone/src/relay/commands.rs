//! Remote command inbox.
//!
//! Clients drop commands under `commands/send_message` and
//! `commands/mark_read`. Each command is executed at most once: send commands
//! are claimed (`processing`) before the protocol send, then stamped
//! `processed` or `error` and left in place. Mark-read commands are deleted
//! once applied.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Relay, RelayError, RelayResult};
use crate::remote::{ChildEvent, ChildSubscription, RemoteResult, paths};

/// Lifecycle of a command in the inbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    #[default]
    Pending,
    /// Claimed by a relay. Never executed again, even if no final stamp follows.
    Processing,
    Processed,
    Error,
}

impl CommandStatus {
    /// Read the status of a raw command. A missing status means pending;
    /// an unrecognised one is treated as already handled.
    pub fn of(value: &Value) -> Option<Self> {
        match value.get("status") {
            None | Some(Value::Null) => Some(Self::Pending),
            Some(status) => serde_json::from_value(status.clone()).ok(),
        }
    }
}

/// Request to send a text message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageCommand {
    pub conversation_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub status: CommandStatus,
}

impl SendMessageCommand {
    pub fn parse(value: Value) -> RelayResult<Self> {
        let command: Self = serde_json::from_value(value)
            .map_err(|e| RelayError::InvalidCommand(e.to_string()))?;
        if command.conversation_id.trim().is_empty() {
            return Err(RelayError::InvalidCommand("conversationId is empty".to_string()));
        }
        if command.message.is_empty() {
            return Err(RelayError::InvalidCommand("message is empty".to_string()));
        }
        Ok(command)
    }
}

/// Request to clear a conversation's unread count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadCommand {
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub status: CommandStatus,
}

impl MarkReadCommand {
    pub fn parse(value: Value) -> RelayResult<Self> {
        let command: Self = serde_json::from_value(value)
            .map_err(|e| RelayError::InvalidCommand(e.to_string()))?;
        if command.conversation_id.trim().is_empty() {
            return Err(RelayError::InvalidCommand("conversationId is empty".to_string()));
        }
        Ok(command)
    }
}

/// What the inbox did with one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Already handled earlier.
    Skipped,
    /// Executed and stamped `processed`.
    Processed,
    /// Executed and deleted.
    Removed,
    /// Stamped `error` with this message.
    Failed(String),
    /// Could not be claimed; left pending for the next delivery.
    Deferred(String),
}

impl Relay {
    /// Execute one send command found at `commands/send_message/{key}`.
    ///
    /// The command is claimed remotely before anything is sent, and the key is
    /// remembered in-process, so a redelivery never sends twice even when the
    /// final stamp is lost.
    pub async fn process_send_command(&self, key: &str, value: Value) -> CommandOutcome {
        if CommandStatus::of(&value) != Some(CommandStatus::Pending) {
            debug!(key = %key, "Skipping handled send command");
            return CommandOutcome::Skipped;
        }

        let entry = paths::child(paths::SEND_COMMANDS, key);
        if !self.claimed.insert(entry.clone()) {
            debug!(key = %key, "Skipping send command already taken");
            return CommandOutcome::Skipped;
        }

        if let Err(e) = self.sync.claim_command(paths::SEND_COMMANDS, key).await {
            warn!(key = %key, "Failed to claim send command: {}", e);
            self.claimed.remove(&entry);
            return CommandOutcome::Deferred(e.to_string());
        }

        let result = match SendMessageCommand::parse(value) {
            Ok(command) => self
                .send_message(&command.conversation_id, &command.message)
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(key = %key, "Send command processed");
                log_remote(
                    self.sync.mark_command_processed(paths::SEND_COMMANDS, key).await,
                    key,
                );
                CommandOutcome::Processed
            }
            Err(e) => self.fail_command(paths::SEND_COMMANDS, key, e).await,
        }
    }

    /// Execute one mark-read command found at `commands/mark_read/{key}`.
    ///
    /// Applied commands are deleted. A command that fails is kept and stamped
    /// `error` so it is not silently lost.
    pub async fn process_mark_read_command(&self, key: &str, value: Value) -> CommandOutcome {
        if CommandStatus::of(&value) != Some(CommandStatus::Pending) {
            debug!(key = %key, "Skipping handled mark-read command");
            return CommandOutcome::Skipped;
        }

        let result = match MarkReadCommand::parse(value) {
            Ok(command) => self.mark_as_read(&command.conversation_id).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => {
                log_remote(
                    self.sync.remove_command(paths::MARK_READ_COMMANDS, key).await,
                    key,
                );
                CommandOutcome::Removed
            }
            Err(e) => self.fail_command(paths::MARK_READ_COMMANDS, key, e).await,
        }
    }

    async fn fail_command(&self, inbox: &str, key: &str, error: RelayError) -> CommandOutcome {
        let message = error.to_string();
        warn!(inbox = %inbox, key = %key, "Command failed: {}", message);
        log_remote(
            self.sync.mark_command_failed(inbox, key, &message).await,
            key,
        );
        CommandOutcome::Failed(message)
    }
}

fn log_remote(result: RemoteResult<()>, key: &str) {
    if let Err(e) = result {
        warn!(key = %key, "Failed to update command: {}", e);
    }
}

/// Run the command inbox until `cancel` fires.
///
/// Commands are handled one at a time in arrival order per inbox. If either
/// subscription fails, both are re-established after `retry_delay`; commands
/// already handled are skipped on replay.
pub async fn run_command_inbox(relay: Arc<Relay>, cancel: CancellationToken, retry_delay: Duration) {
    info!("Command inbox started");

    loop {
        let subscribed = tokio::select! {
            _ = cancel.cancelled() => break,
            result = subscribe(&relay) => result,
        };

        match subscribed {
            Ok((mut sends, mut reads)) => {
                if !listen(&relay, &cancel, &mut sends, &mut reads).await {
                    break;
                }
            }
            Err(e) => warn!("Failed to subscribe to command inbox: {}", e),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(retry_delay) => {}
        }
        info!("Resubscribing to command inbox");
    }

    info!("Command inbox stopped");
}

async fn subscribe(relay: &Relay) -> RemoteResult<(ChildSubscription, ChildSubscription)> {
    let sends = relay.sync.subscribe_commands(paths::SEND_COMMANDS).await?;
    let reads = relay.sync.subscribe_commands(paths::MARK_READ_COMMANDS).await?;
    Ok((sends, reads))
}

/// Dispatch events until a stream fails or a command is deferred (returns
/// true) or shutdown (false).
async fn listen(
    relay: &Relay,
    cancel: &CancellationToken,
    sends: &mut ChildSubscription,
    reads: &mut ChildSubscription,
) -> bool {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            event = sends.next() => match event {
                Some(Ok(ChildEvent { key, value })) => {
                    if let CommandOutcome::Deferred(_) = relay.process_send_command(&key, value).await {
                        // Redelivered after resubscribing
                        return true;
                    }
                }
                Some(Err(e)) => {
                    warn!("Send command stream failed: {}", e);
                    return true;
                }
                None => {
                    warn!("Send command stream ended");
                    return true;
                }
            },
            event = reads.next() => match event {
                Some(Ok(ChildEvent { key, value })) => {
                    relay.process_mark_read_command(&key, value).await;
                }
                Some(Err(e)) => {
                    warn!("Mark-read command stream failed: {}", e);
                    return true;
                }
                None => {
                    warn!("Mark-read command stream ended");
                    return true;
                }
            },
        }
    }
}
