//! Realtime Database REST backend.
//!
//! Writes map onto `PUT`/`PATCH`/`POST`/`DELETE` against `{base}/{path}.json`.
//! Child subscriptions use the streaming endpoint (`text/event-stream`) and
//! translate its `put`/`patch` events into child-added notifications.

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, Response};
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::mpsc;

use super::paths;
use super::traits::{ChildEvent, ChildSubscription, RemoteChannel};
use super::{RemoteError, RemoteResult};

const SUBSCRIPTION_CAPACITY: usize = 256;

/// Client for a Realtime Database instance.
#[derive(Debug, Clone)]
pub struct FirebaseChannel {
    /// Client for plain requests, with a request timeout.
    client: Client,
    /// Client for event streams, without a total timeout.
    stream_client: Client,
    /// Database root URL, e.g. `https://project-default-rtdb.firebaseio.com`.
    base_url: String,
    /// Database secret or ID token passed as the `auth` query parameter.
    auth_token: Option<String>,
}

impl FirebaseChannel {
    /// Create a new client.
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        request_timeout: Duration,
    ) -> RemoteResult<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        let stream_client = Client::builder()
            .connect_timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            stream_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: auth_token.filter(|t| !t.is_empty()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.query(&[("auth", token)]),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

#[async_trait]
impl RemoteChannel for FirebaseChannel {
    fn name(&self) -> &'static str {
        "firebase"
    }

    async fn set(&self, path: &str, value: Value) -> RemoteResult<()> {
        paths::validate(path)?;
        self.send(self.client.put(self.url(path)).json(&value)).await?;
        Ok(())
    }

    async fn update(&self, path: &str, fields: Value) -> RemoteResult<()> {
        paths::validate(path)?;
        self.send(self.client.patch(self.url(path)).json(&fields))
            .await?;
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> RemoteResult<String> {
        paths::validate(path)?;
        let response = self.send(self.client.post(self.url(path)).json(&value)).await?;
        let pushed: PushResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Parse(format!("push response: {e}")))?;
        Ok(pushed.name)
    }

    async fn remove(&self, path: &str) -> RemoteResult<()> {
        paths::validate(path)?;
        self.send(self.client.delete(self.url(path))).await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> RemoteResult<Option<Value>> {
        paths::validate(path)?;
        let response = self.send(self.client.get(self.url(path))).await?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| RemoteError::Parse(format!("get response: {e}")))?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    async fn subscribe_children(&self, path: &str) -> RemoteResult<ChildSubscription> {
        paths::validate(path)?;

        let request = self.authorize(
            self.stream_client
                .get(self.url(path))
                .header("Accept", "text/event-stream"),
        );
        let mut es = EventSource::new(request)
            .map_err(|e| RemoteError::StreamClosed(format!("cannot open stream: {e}")))?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let listen_path = path.to_string();

        let task = tokio::spawn(async move {
            let mut tracker = ChildTracker::default();

            while let Some(event) = es.next().await {
                match event {
                    Ok(Event::Open) => {
                        info!("Listening for children of {}", listen_path);
                    }
                    Ok(Event::Message(msg)) => match tracker.apply(&msg.event, &msg.data) {
                        Ok(children) => {
                            for child in children {
                                if tx.send(Ok(child)).await.is_err() {
                                    es.close();
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            warn!("Stream for {} stopped: {}", listen_path, e);
                            let _ = tx.send(Err(e)).await;
                            es.close();
                            return;
                        }
                    },
                    Err(e) => {
                        warn!("Stream error for {}: {}", listen_path, e);
                        let _ = tx.send(Err(RemoteError::StreamClosed(e.to_string()))).await;
                        es.close();
                        return;
                    }
                }
            }

            debug!("Stream for {} ended", listen_path);
            let _ = tx
                .send(Err(RemoteError::StreamClosed("stream ended".to_string())))
                .await;
        });

        Ok(ChildSubscription::new(path, rx, Some(task)))
    }
}

#[derive(Debug, Deserialize)]
struct StreamPayload {
    path: String,
    #[serde(default)]
    data: Value,
}

/// Turns streaming `put`/`patch` events into child-added events.
///
/// The stream starts with a `put` of the whole subtree at `/`; later events
/// carry the changed path relative to the listened location. A child is
/// reported once, the first time it is seen with a non-null value, and again
/// only if it was removed in between.
#[derive(Debug, Default)]
pub struct ChildTracker {
    known: BTreeSet<String>,
}

impl ChildTracker {
    /// Apply one stream event.
    pub fn apply(&mut self, event: &str, data: &str) -> RemoteResult<Vec<ChildEvent>> {
        match event {
            "put" | "patch" => {
                let payload: StreamPayload = serde_json::from_str(data)?;
                Ok(self.apply_payload(event == "patch", payload))
            }
            "cancel" => Err(RemoteError::Cancelled(data.trim_matches('"').to_string())),
            "auth_revoked" => Err(RemoteError::Cancelled("auth revoked".to_string())),
            // keep-alive and anything newer
            _ => Ok(Vec::new()),
        }
    }

    fn apply_payload(&mut self, is_patch: bool, payload: StreamPayload) -> Vec<ChildEvent> {
        let segs: Vec<&str> = paths::segments(&payload.path).collect();

        match segs.as_slice() {
            [] if is_patch => match payload.data {
                Value::Object(children) => children
                    .into_iter()
                    .filter_map(|(key, value)| self.observe(key, value))
                    .collect(),
                _ => Vec::new(),
            },
            [] => match payload.data {
                Value::Object(children) => {
                    self.known.retain(|key| children.contains_key(key));
                    children
                        .into_iter()
                        .filter_map(|(key, value)| self.observe(key, value))
                        .collect()
                }
                _ => {
                    self.known.clear();
                    Vec::new()
                }
            },
            [key] if !is_patch => self
                .observe(key.to_string(), payload.data)
                .into_iter()
                .collect(),
            // Changes inside an existing child
            _ => Vec::new(),
        }
    }

    fn observe(&mut self, key: String, value: Value) -> Option<ChildEvent> {
        if value.is_null() {
            self.known.remove(&key);
            return None;
        }
        if self.known.insert(key.clone()) {
            Some(ChildEvent { key, value })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(events: &[ChildEvent]) -> Vec<&str> {
        events.iter().map(|e| e.key.as_str()).collect()
    }

    #[test]
    fn test_initial_snapshot() {
        let mut tracker = ChildTracker::default();
        let events = tracker
            .apply(
                "put",
                r#"{"path":"/","data":{"-Nb":{"status":"pending"},"-Na":{"status":"processed"}}}"#,
            )
            .unwrap();
        assert_eq!(keys(&events), vec!["-Na", "-Nb"]);
        assert_eq!(events[1].value, json!({"status": "pending"}));
    }

    #[test]
    fn test_empty_snapshot() {
        let mut tracker = ChildTracker::default();
        assert!(tracker.apply("put", r#"{"path":"/","data":null}"#).unwrap().is_empty());
    }

    #[test]
    fn test_new_child_and_nested_updates() {
        let mut tracker = ChildTracker::default();
        tracker.apply("put", r#"{"path":"/","data":null}"#).unwrap();

        let events = tracker
            .apply("put", r#"{"path":"/-Nc","data":{"conversationId":"a","message":"hi"}}"#)
            .unwrap();
        assert_eq!(keys(&events), vec!["-Nc"]);

        // Status update on the same child is not a new child
        let events = tracker
            .apply("patch", r#"{"path":"/-Nc","data":{"status":"processed"}}"#)
            .unwrap();
        assert!(events.is_empty());
        let events = tracker
            .apply("put", r#"{"path":"/-Nc/status","data":"error"}"#)
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_removed_child_can_return() {
        let mut tracker = ChildTracker::default();
        tracker.apply("put", r#"{"path":"/-Nd","data":{"n":1}}"#).unwrap();
        tracker.apply("put", r#"{"path":"/-Nd","data":null}"#).unwrap();
        let events = tracker.apply("put", r#"{"path":"/-Nd","data":{"n":2}}"#).unwrap();
        assert_eq!(events[0].value, json!({"n": 2}));
    }

    #[test]
    fn test_root_patch_adds_children() {
        let mut tracker = ChildTracker::default();
        tracker.apply("put", r#"{"path":"/","data":{"-Na":{}}}"#).unwrap();
        let events = tracker
            .apply("patch", r#"{"path":"/","data":{"-Na":{"x":1},"-Nb":{"x":2}}}"#)
            .unwrap();
        assert_eq!(keys(&events), vec!["-Nb"]);
    }

    #[test]
    fn test_keep_alive_and_cancel() {
        let mut tracker = ChildTracker::default();
        assert!(tracker.apply("keep-alive", "null").unwrap().is_empty());
        assert!(matches!(
            tracker.apply("cancel", r#""Permission denied""#),
            Err(RemoteError::Cancelled(reason)) if reason == "Permission denied"
        ));
        assert!(tracker.apply("auth_revoked", "null").is_err());
        assert!(tracker.apply("put", "not json").is_err());
    }

    #[test]
    fn test_url_and_token() {
        let remote = FirebaseChannel::new(
            "https://demo-default-rtdb.firebaseio.com/",
            Some(String::new()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            remote.url("connection/status"),
            "https://demo-default-rtdb.firebaseio.com/connection/status.json"
        );
        assert!(remote.auth_token.is_none());
    }
}
