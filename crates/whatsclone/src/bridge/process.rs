//! Bridge sidecar process client.
//!
//! Manages communication with the bridge via stdin/stdout.

use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use whatsclone_protocol::{AUTH_DIR_ENV, BridgeCommand, BridgeEvent, BridgeLine, BridgeResponse};

use super::traits::{ProtocolConnection, ProtocolConnector, ProtocolSession};
use super::{BridgeError, BridgeResult};

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

type PendingResponses = Arc<RwLock<HashMap<String, oneshot::Sender<BridgeResponse>>>>;

/// How to launch the bridge.
#[derive(Debug, Clone)]
pub struct ProcessConnectorConfig {
    /// Executable to run.
    pub command: String,
    pub args: Vec<String>,
    /// Directory the bridge keeps its credentials in.
    pub auth_dir: PathBuf,
    /// How long to wait for a command response.
    pub request_timeout: Duration,
}

/// Starts a fresh bridge process per connection attempt.
#[derive(Debug, Clone)]
pub struct ProcessConnector {
    config: ProcessConnectorConfig,
}

impl ProcessConnector {
    pub fn new(config: ProcessConnectorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ProtocolConnector for ProcessConnector {
    async fn connect(&self) -> BridgeResult<ProtocolConnection> {
        tokio::fs::create_dir_all(&self.config.auth_dir).await?;

        info!(
            "Starting bridge: {} {}",
            self.config.command,
            self.config.args.join(" ")
        );

        let child = Command::new(&self.config.command)
            .args(&self.config.args)
            .env(AUTH_DIR_ENV, &self.config.auth_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                command: self.config.command.clone(),
                source,
            })?;

        let (session, events) = ProcessSession::new(child, self.config.request_timeout)?;

        Ok(ProtocolConnection {
            session: Arc::new(session),
            events,
        })
    }
}

/// Session backed by a running bridge process.
pub struct ProcessSession {
    /// Channel to the stdin writer.
    command_tx: mpsc::Sender<String>,
    /// Senders waiting for a response, keyed by request id.
    pending: PendingResponses,
    /// Set once the bridge's stdout has ended.
    closed: Arc<AtomicBool>,
    request_counter: AtomicU64,
    request_timeout: Duration,
    child: Mutex<Option<Child>>,
}

impl ProcessSession {
    /// Take over a spawned bridge process.
    ///
    /// Returns the session and the stream of events read from its stdout.
    pub fn new(
        mut child: Child,
        request_timeout: Duration,
    ) -> BridgeResult<(Self, mpsc::Receiver<BridgeEvent>)> {
        let stdin = child.stdin.take().ok_or(BridgeError::ChannelClosed)?;
        let stdout = child.stdout.take().ok_or(BridgeError::ChannelClosed)?;

        let (command_tx, command_rx) = mpsc::channel::<String>(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel::<BridgeEvent>(EVENT_BUFFER);
        let pending: PendingResponses = Arc::new(RwLock::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(stdin_writer_task(stdin, command_rx));
        tokio::spawn(stdout_reader_task(
            stdout,
            event_tx,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(stderr_reader_task(stderr));
        }

        let session = Self {
            command_tx,
            pending,
            closed,
            request_counter: AtomicU64::new(0),
            request_timeout,
            child: Mutex::new(Some(child)),
        };

        Ok((session, event_rx))
    }

    fn next_request_id(&self) -> String {
        let n = self.request_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("req-{n}")
    }

    /// Send a command and wait for its response.
    pub async fn send_command(&self, command: BridgeCommand) -> BridgeResult<BridgeResponse> {
        let request_id = self.next_request_id();
        let line = serde_json::to_string(&command.with_id(request_id.clone()))?;

        let (response_tx, response_rx) = oneshot::channel();
        {
            let mut pending = self.pending.write().await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(BridgeError::ChannelClosed);
            }
            pending.insert(request_id.clone(), response_tx);
        }

        if self.command_tx.send(line).await.is_err() {
            self.pending.write().await.remove(&request_id);
            return Err(BridgeError::ChannelClosed);
        }

        let response = match tokio::time::timeout(self.request_timeout, response_rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(BridgeError::ChannelClosed),
            Err(_) => {
                self.pending.write().await.remove(&request_id);
                return Err(BridgeError::Timeout);
            }
        };

        if !response.ok {
            return Err(BridgeError::Rejected(
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl ProtocolSession for ProcessSession {
    async fn send_text(&self, jid: &str, text: &str) -> BridgeResult<()> {
        self.send_command(BridgeCommand::send_text(jid, text))
            .await
            .map(|_| ())
    }

    async fn close(&self) -> BridgeResult<()> {
        if let Err(e) = self.send_command(BridgeCommand::Close { id: None }).await {
            debug!("Bridge close command failed: {}", e);
        }

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.request_timeout, child.wait()).await {
            Ok(Ok(status)) => info!("Bridge exited with {}", status),
            Ok(Err(e)) => warn!("Failed to wait for bridge: {}", e),
            Err(_) => {
                warn!("Bridge did not exit in time, killing it");
                child.kill().await?;
            }
        }
        Ok(())
    }
}

async fn stdin_writer_task(mut stdin: ChildStdin, mut command_rx: mpsc::Receiver<String>) {
    debug!("Bridge stdin writer task started");
    while let Some(command) = command_rx.recv().await {
        let line = format!("{}\n", command);
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            error!("Failed to write to bridge stdin: {:?}", e);
            break;
        }
        if let Err(e) = stdin.flush().await {
            error!("Failed to flush bridge stdin: {:?}", e);
            break;
        }
    }
    debug!("Bridge stdin writer task ended");
}

async fn stdout_reader_task(
    stdout: ChildStdout,
    event_tx: mpsc::Sender<BridgeEvent>,
    pending: PendingResponses,
    closed: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();

    debug!("Bridge stdout reader task started");

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }

        match BridgeLine::parse(&line) {
            Ok(BridgeLine::Response(response)) => {
                match pending.write().await.remove(&response.id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => warn!("Received response for unknown request ID: {}", response.id),
                }
            }
            Ok(BridgeLine::Event(event)) => {
                if event_tx.send(event).await.is_err() {
                    debug!("Bridge event receiver dropped");
                    break;
                }
            }
            Err(e) => {
                let display_line: String = line.chars().take(200).collect();
                warn!("Failed to parse bridge line: {}, line: {}", e, display_line);
            }
        }
    }

    // Fail outstanding and future requests
    closed.store(true, Ordering::SeqCst);
    pending.write().await.clear();
    debug!("Bridge stdout reader task ended");
}

async fn stderr_reader_task(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            warn!("Bridge stderr: {}", line);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// A bridge that emits a QR and an open event, then answers every
    /// command with `ok` until stdin closes.
    const FAKE_BRIDGE: &str = r#"
echo '{"type":"qr","qr":"2@abc"}'
echo '{"type":"open","user":{"id":"5511000@s.whatsapp.net"}}'
n=0
while read -r line; do
  n=$((n+1))
  echo "{\"type\":\"response\",\"id\":\"req-$n\",\"ok\":true}"
  case "$line" in *'"close"'*) exit 0;; esac
done
"#;

    fn connector(script: &str, auth_dir: PathBuf) -> ProcessConnector {
        ProcessConnector::new(ProcessConnectorConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            auth_dir,
            request_timeout: Duration::from_secs(5),
        })
    }

    #[tokio::test]
    async fn test_process_session_round_trip() {
        let temp = tempfile::TempDir::new().unwrap();
        let auth_dir = temp.path().join("auth");
        let mut conn = connector(FAKE_BRIDGE, auth_dir.clone()).connect().await.unwrap();
        assert!(auth_dir.is_dir());

        assert!(matches!(conn.events.recv().await, Some(BridgeEvent::Qr { qr }) if qr == "2@abc"));
        assert!(matches!(conn.events.recv().await, Some(BridgeEvent::Open { user: Some(_) })));

        conn.session
            .send_text("5511999@s.whatsapp.net", "oi")
            .await
            .unwrap();
        conn.session.close().await.unwrap();

        // Stream ends once the process is gone
        assert!(conn.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_rejected_command() {
        let script = r#"
while read -r line; do
  echo '{"type":"response","id":"req-1","ok":false,"error":"not on whatsapp"}'
done
"#;
        let temp = tempfile::TempDir::new().unwrap();
        let conn = connector(script, temp.path().to_path_buf()).connect().await.unwrap();

        let err = conn.session.send_text("000@s.whatsapp.net", "oi").await.unwrap_err();
        assert!(matches!(err, BridgeError::Rejected(msg) if msg == "not on whatsapp"));
    }

    #[tokio::test]
    async fn test_exited_bridge_fails_requests() {
        let temp = tempfile::TempDir::new().unwrap();
        let conn = connector("exit 0", temp.path().to_path_buf()).connect().await.unwrap();

        let err = conn.session.send_text("x@s.whatsapp.net", "oi").await.unwrap_err();
        assert!(matches!(err, BridgeError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let temp = tempfile::TempDir::new().unwrap();
        let connector = ProcessConnector::new(ProcessConnectorConfig {
            command: "/nonexistent/whatsapp-bridge".to_string(),
            args: Vec::new(),
            auth_dir: temp.path().to_path_buf(),
            request_timeout: Duration::from_secs(1),
        });
        assert!(matches!(
            connector.connect().await,
            Err(BridgeError::Spawn { .. })
        ));
    }
}
