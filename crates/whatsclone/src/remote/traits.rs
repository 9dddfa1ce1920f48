//! Remote channel trait definitions.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::RemoteResult;

/// A child that appeared under a subscribed path.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildEvent {
    /// Push key of the child.
    pub key: String,
    /// Child value at the time it was observed.
    pub value: Value,
}

/// Live child-added subscription.
///
/// Existing children are delivered first, then new ones as they arrive. The
/// background listener stops when the subscription is dropped.
pub struct ChildSubscription {
    path: String,
    rx: mpsc::Receiver<RemoteResult<ChildEvent>>,
    task: Option<JoinHandle<()>>,
}

impl ChildSubscription {
    pub fn new(
        path: impl Into<String>,
        rx: mpsc::Receiver<RemoteResult<ChildEvent>>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            path: path.into(),
            rx,
            task,
        }
    }

    /// Path this subscription listens on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the next child event. `None` once the listener has stopped.
    pub async fn next(&mut self) -> Option<RemoteResult<ChildEvent>> {
        self.rx.recv().await
    }

    /// Stop listening.
    pub fn close(&mut self) {
        self.rx.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ChildSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ChildSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildSubscription")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Push-based hierarchical key/value store.
///
/// Paths are slash-separated keys relative to the store root. Values are JSON;
/// `{".sv": "timestamp"}` anywhere in a written value is replaced by the
/// server's clock.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Replace the value at `path`.
    async fn set(&self, path: &str, value: Value) -> RemoteResult<()>;

    /// Merge the given fields into the object at `path`.
    async fn update(&self, path: &str, fields: Value) -> RemoteResult<()>;

    /// Append `value` under a new unique, time-ordered key. Returns the key.
    async fn push(&self, path: &str, value: Value) -> RemoteResult<String>;

    /// Delete the value at `path`.
    async fn remove(&self, path: &str) -> RemoteResult<()>;

    /// Read the value at `path`.
    async fn get(&self, path: &str) -> RemoteResult<Option<Value>>;

    /// Subscribe to children added under `path`.
    async fn subscribe_children(&self, path: &str) -> RemoteResult<ChildSubscription>;
}
