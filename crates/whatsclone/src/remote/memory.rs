//! In-process remote channel.
//!
//! Keeps the whole tree in memory with the same write, push and child-added
//! semantics as the hosted backend. Used for local development and tests.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, broadcast, mpsc};

use super::paths;
use super::push_id::PushIdGenerator;
use super::traits::{ChildEvent, ChildSubscription, RemoteChannel};
use super::{RemoteError, RemoteResult};

const EVENT_CAPACITY: usize = 1024;
const SUBSCRIPTION_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct ChildAdded {
    parent: String,
    key: String,
    value: Value,
}

struct Inner {
    tree: RwLock<Value>,
    events: broadcast::Sender<ChildAdded>,
    ids: PushIdGenerator,
    offline: AtomicBool,
}

/// In-memory remote tree.
#[derive(Clone)]
pub struct MemoryChannel {
    inner: Arc<Inner>,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel").finish_non_exhaustive()
    }
}

impl MemoryChannel {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                tree: RwLock::new(Value::Object(Map::new())),
                events,
                ids: PushIdGenerator::new(),
                offline: AtomicBool::new(false),
            }),
        }
    }

    /// Make every subsequent operation fail until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Copy of the whole tree.
    pub async fn snapshot(&self) -> Value {
        self.inner.tree.read().await.clone()
    }

    fn check_online(&self) -> RemoteResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Status {
                status: 503,
                body: "memory channel is offline".to_string(),
            });
        }
        Ok(())
    }

    /// Write `value` at `path` and announce every child that did not exist before.
    fn write(&self, tree: &mut Value, path: &str, value: Value) {
        let segs: Vec<&str> = paths::segments(path).collect();
        let value = resolve_server_values(value, crate::now_millis());

        let existed: Vec<bool> = (1..=segs.len())
            .map(|depth| get_at(tree, &segs[..depth]).is_some())
            .collect();

        if value.is_null() {
            remove_at(tree, &segs);
            return;
        }
        set_at(tree, &segs, value);

        for (depth, existed) in existed.into_iter().enumerate() {
            if existed {
                continue;
            }
            let child = &segs[..=depth];
            if let Some(value) = get_at(tree, child) {
                // No receivers is fine.
                let _ = self.inner.events.send(ChildAdded {
                    parent: segs[..depth].join("/"),
                    key: segs[depth].to_string(),
                    value: value.clone(),
                });
            }
        }
    }
}

#[async_trait]
impl RemoteChannel for MemoryChannel {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn set(&self, path: &str, value: Value) -> RemoteResult<()> {
        self.check_online()?;
        paths::validate(path)?;
        let mut tree = self.inner.tree.write().await;
        self.write(&mut tree, path, value);
        Ok(())
    }

    async fn update(&self, path: &str, fields: Value) -> RemoteResult<()> {
        self.check_online()?;
        paths::validate(path)?;
        let Value::Object(fields) = fields else {
            return Err(RemoteError::Parse("update expects an object".to_string()));
        };
        for key in fields.keys() {
            paths::validate(key)?;
        }

        let mut tree = self.inner.tree.write().await;
        for (key, value) in fields {
            self.write(&mut tree, &paths::child(path, &key), value);
        }
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> RemoteResult<String> {
        self.check_online()?;
        paths::validate(path)?;
        let key = self.inner.ids.next_id();
        let mut tree = self.inner.tree.write().await;
        self.write(&mut tree, &paths::child(path, &key), value);
        Ok(key)
    }

    async fn remove(&self, path: &str) -> RemoteResult<()> {
        self.check_online()?;
        paths::validate(path)?;
        let segs: Vec<&str> = paths::segments(path).collect();
        let mut tree = self.inner.tree.write().await;
        remove_at(&mut tree, &segs);
        Ok(())
    }

    async fn get(&self, path: &str) -> RemoteResult<Option<Value>> {
        self.check_online()?;
        paths::validate(path)?;
        let segs: Vec<&str> = paths::segments(path).collect();
        let tree = self.inner.tree.read().await;
        Ok(get_at(&tree, &segs).cloned())
    }

    async fn subscribe_children(&self, path: &str) -> RemoteResult<ChildSubscription> {
        self.check_online()?;
        paths::validate(path)?;
        let segs: Vec<&str> = paths::segments(path).collect();
        let parent = segs.join("/");

        // Snapshot and registration happen under the same lock so no child is
        // missed or delivered twice.
        let (existing, mut live) = {
            let tree = self.inner.tree.read().await;
            let live = self.inner.events.subscribe();
            let mut existing: Vec<ChildEvent> = match get_at(&tree, &segs) {
                Some(Value::Object(children)) => children
                    .iter()
                    .map(|(key, value)| ChildEvent {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect(),
                _ => Vec::new(),
            };
            existing.sort_by(|a, b| a.key.cmp(&b.key));
            (existing, live)
        };

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let task = tokio::spawn(async move {
            for event in existing {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
            loop {
                match live.recv().await {
                    Ok(added) if added.parent == parent => {
                        let event = ChildEvent {
                            key: added.key,
                            value: added.value,
                        };
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        let _ = tx
                            .send(Err(RemoteError::StreamClosed(format!(
                                "listener lagged by {skipped} events"
                            ))))
                            .await;
                        return;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(ChildSubscription::new(path, rx, Some(task)))
    }
}

fn get_at<'a>(tree: &'a Value, segs: &[&str]) -> Option<&'a Value> {
    segs.iter().try_fold(tree, |node, seg| node.get(*seg))
}

fn set_at(tree: &mut Value, segs: &[&str], value: Value) {
    let Some((last, parents)) = segs.split_last() else {
        *tree = value;
        return;
    };
    let mut node = tree;
    for seg in parents {
        let map = as_object_mut(node);
        node = map
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    as_object_mut(node).insert(last.to_string(), value);
}

/// Borrow `node` as an object, replacing any scalar in the way.
fn as_object_mut(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced by an object"),
    }
}

/// Remove the value at `segs` and prune parents left empty.
fn remove_at(tree: &mut Value, segs: &[&str]) {
    let Some((first, rest)) = segs.split_first() else {
        *tree = Value::Object(Map::new());
        return;
    };
    let Value::Object(map) = tree else {
        return;
    };
    if rest.is_empty() {
        map.remove(*first);
        return;
    }
    if let Some(child) = map.get_mut(*first) {
        remove_at(child, rest);
        if child.as_object().is_some_and(|m| m.is_empty()) {
            map.remove(*first);
        }
    }
}

/// Replace `{".sv": "timestamp"}` placeholders with `now`.
fn resolve_server_values(value: Value, now: i64) -> Value {
    match value {
        Value::Object(map) => {
            if map.len() == 1 && map.get(".sv").and_then(|v| v.as_str()) == Some("timestamp") {
                return Value::from(now);
            }
            Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, resolve_server_values(v, now)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| resolve_server_values(v, now))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::server_timestamp;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_set_get_update_remove() {
        let remote = MemoryChannel::new();
        remote
            .set("conversations/a/info", json!({"name": "A", "unreadCount": 3}))
            .await
            .unwrap();
        remote
            .update("conversations/a/info", json!({"unreadCount": 0}))
            .await
            .unwrap();

        let info = remote.get("conversations/a/info").await.unwrap().unwrap();
        assert_eq!(info, json!({"name": "A", "unreadCount": 0}));

        remote.remove("conversations/a/info").await.unwrap();
        assert!(remote.get("conversations/a/info").await.unwrap().is_none());
        // Empty parents are pruned
        assert_eq!(remote.snapshot().await, json!({}));
    }

    #[tokio::test]
    async fn test_server_timestamp_resolved() {
        let remote = MemoryChannel::new();
        remote
            .set("connection/status", json!({"connected": true, "timestamp": server_timestamp()}))
            .await
            .unwrap();
        let status = remote.get("connection/status").await.unwrap().unwrap();
        assert!(status["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_push_keys_are_ordered() {
        let remote = MemoryChannel::new();
        let a = remote.push("list", json!(1)).await.unwrap();
        let b = remote.push("list", json!(2)).await.unwrap();
        assert!(a < b);
        assert_eq!(remote.get(&format!("list/{b}")).await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_subscription_delivers_existing_then_live() {
        let remote = MemoryChannel::new();
        let first = remote.push("commands/mark_read", json!({"n": 1})).await.unwrap();

        let mut sub = remote.subscribe_children("commands/mark_read").await.unwrap();
        let event = sub.next().await.unwrap().unwrap();
        assert_eq!(event.key, first);

        // Writes to an existing child are not new children
        remote
            .update(&format!("commands/mark_read/{first}"), json!({"status": "processed"}))
            .await
            .unwrap();
        // Other parents are filtered out
        remote.push("commands/send_message", json!({"n": 0})).await.unwrap();

        let second = remote.push("commands/mark_read", json!({"n": 2})).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.key, second);
        assert_eq!(event.value, json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_offline_fails() {
        let remote = MemoryChannel::new();
        remote.set_offline(true);
        assert!(remote.set("a", json!(1)).await.is_err());
        remote.set_offline(false);
        assert!(remote.set("a", json!(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_path_rejected() {
        let remote = MemoryChannel::new();
        let err = remote.set("conversations/a.b/info", json!(1)).await.unwrap_err();
        assert!(matches!(err, RemoteError::InvalidPath(_)));
    }
}
