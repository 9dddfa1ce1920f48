//! Test utilities and common setup.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use serde_json::{Value, json};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use whatsclone::api::{self, AppState};
use whatsclone::bridge::{
    BridgeError, BridgeResult, ProtocolConnection, ProtocolConnector, ProtocolSession,
};
use whatsclone::db::Database;
use whatsclone::relay::Relay;
use whatsclone::remote::{MemoryChannel, SyncChannel};
use whatsclone::store::LocalStore;
use whatsclone::supervisor::StatusBoard;
use whatsclone_protocol::{BridgeEvent, WireMessage};

/// Relay wired to an in-memory database and remote tree.
pub struct TestRelay {
    pub relay: Arc<Relay>,
    pub store: LocalStore,
    pub memory: MemoryChannel,
}

pub async fn test_relay() -> TestRelay {
    let db = Database::in_memory().await.unwrap();
    let store = LocalStore::new(db);
    let memory = MemoryChannel::new();
    let sync = SyncChannel::new(Arc::new(memory.clone()));
    let relay = Arc::new(Relay::new(store.clone(), sync));
    TestRelay {
        relay,
        store,
        memory,
    }
}

/// Create a test application over an in-memory database.
pub async fn test_app() -> (Router, LocalStore, StatusBoard) {
    let db = Database::in_memory().await.unwrap();
    let store = LocalStore::new(db);
    let board = StatusBoard::new();
    let app = api::create_router(AppState::new(store.clone(), board.clone()));
    (app, store, board)
}

/// A text message as the bridge would deliver it.
pub fn text_message(jid: &str, text: &str, timestamp: i64) -> WireMessage {
    serde_json::from_value(json!({
        "key": { "remoteJid": jid, "fromMe": false },
        "message": { "conversation": text },
        "timestamp": timestamp,
    }))
    .unwrap()
}

/// Protocol session that records sends instead of talking to a network.
#[derive(Debug, Default)]
pub struct FakeSession {
    sent: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
    closed: AtomicBool,
    /// Remote to take offline right after a successful send.
    drop_remote: Mutex<Option<MemoryChannel>>,
}

impl FakeSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Make every send fail as if the protocol rejected it.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Cut `memory` off as soon as a send goes out, so every write that
    /// follows the send fails.
    pub fn take_offline_after_send(&self, memory: &MemoryChannel) {
        *self.drop_remote.lock().unwrap() = Some(memory.clone());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolSession for FakeSession {
    async fn send_text(&self, jid: &str, text: &str) -> BridgeResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BridgeError::Rejected("recipient unavailable".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((jid.to_string(), text.to_string()));
        if let Some(memory) = self.drop_remote.lock().unwrap().as_ref() {
            memory.set_offline(true);
        }
        Ok(())
    }

    async fn close(&self) -> BridgeResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// One connection handed out by [`FakeConnector`].
pub struct FakeLink {
    pub session: Arc<FakeSession>,
    pub events: mpsc::Sender<BridgeEvent>,
}

/// Connector whose connections are driven by the test.
///
/// Each `connect` creates a fresh [`FakeSession`] and passes the matching
/// event sender to the test through `links`.
pub struct FakeConnector {
    links: mpsc::UnboundedSender<FakeLink>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeLink>) {
        let (links, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            links,
            connects: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolConnector for FakeConnector {
    async fn connect(&self) -> BridgeResult<ProtocolConnection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let session = FakeSession::new();
        let (tx, rx) = mpsc::channel(16);
        self.links
            .send(FakeLink {
                session: Arc::clone(&session),
                events: tx,
            })
            .map_err(|_| BridgeError::ChannelClosed)?;
        Ok(ProtocolConnection {
            session,
            events: rx,
        })
    }
}

/// Poll `check` until it returns true, failing the test after two seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Copy of `value` with every `syncedAt` field removed.
pub fn without_sync_times(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| k.as_str() != "syncedAt")
                .map(|(k, v)| (k.clone(), without_sync_times(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
