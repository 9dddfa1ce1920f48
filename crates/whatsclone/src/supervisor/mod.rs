//! Connection supervisor.
//!
//! Owns the protocol session lifecycle: connects with persisted credentials,
//! publishes pairing challenges and connection status, feeds inbound
//! messages to the relay in order, and reconnects after a lost connection.

mod qr;
mod state;

pub use qr::render_qr_data_url;
pub use state::{ConnectionState, StatusBoard, StatusSnapshot};

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use whatsclone_protocol::{BridgeEvent, LOGGED_OUT_STATUS};

use crate::bridge::{ProtocolConnection, ProtocolConnector, ProtocolSession};
use crate::relay::Relay;
use crate::remote::ConnectionStatus;

/// When and how often to reconnect after a lost connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// Consecutive failed connections tolerated before giving up. `None`
    /// retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

/// What to do after a session closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    Reconnect(Duration),
    Stop,
}

impl ReconnectPolicy {
    /// Decide on the next step. `failures` counts closes since the last open,
    /// including this one.
    pub fn on_close(&self, logged_out: bool, failures: u32) -> CloseAction {
        if logged_out {
            return CloseAction::Stop;
        }
        match self.max_attempts {
            Some(max) if failures > max => CloseAction::Stop,
            _ => CloseAction::Reconnect(self.delay),
        }
    }
}

/// Why the supervisor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// Cancelled from outside.
    Shutdown,
    /// The account was logged out; pairing is needed again.
    LoggedOut,
    /// Reconnect attempts exhausted.
    GaveUp,
}

/// How a single session ended.
enum SessionEnd {
    Closed { logged_out: bool },
    Shutdown(Arc<dyn ProtocolSession>),
}

/// Drives connect / pair / open / close cycles.
pub struct Supervisor {
    relay: Arc<Relay>,
    connector: Arc<dyn ProtocolConnector>,
    board: StatusBoard,
    policy: ReconnectPolicy,
    resync: Option<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(
        relay: Arc<Relay>,
        connector: Arc<dyn ProtocolConnector>,
        board: StatusBoard,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            relay,
            connector,
            board,
            policy,
            resync: None,
        }
    }

    /// Run until cancelled, logged out, or out of reconnect attempts.
    ///
    /// At most one connection and one reconnect timer exist at any time; a
    /// cancelled timer never fires.
    pub async fn run(mut self, cancel: CancellationToken) -> SupervisorExit {
        let mut failures = 0u32;

        loop {
            info!("Connecting to WhatsApp");
            let connector = Arc::clone(&self.connector);
            let connected = tokio::select! {
                _ = cancel.cancelled() => None,
                result = connector.connect() => Some(result),
            };
            let Some(connected) = connected else {
                self.shutdown(None).await;
                return SupervisorExit::Shutdown;
            };

            let end = match connected {
                Ok(connection) => self.drive(connection, &cancel, &mut failures).await,
                Err(e) => {
                    error!("Failed to start protocol session: {}", e);
                    SessionEnd::Closed { logged_out: false }
                }
            };

            let logged_out = match end {
                SessionEnd::Shutdown(session) => {
                    self.shutdown(Some(session)).await;
                    return SupervisorExit::Shutdown;
                }
                SessionEnd::Closed { logged_out } => logged_out,
            };

            failures += 1;
            let action = self.policy.on_close(logged_out, failures);
            let should_reconnect = matches!(action, CloseAction::Reconnect(_));

            self.board.set(ConnectionState::Disconnected);
            self.publish_status(ConnectionStatus::closed(should_reconnect))
                .await;

            match action {
                CloseAction::Stop if logged_out => {
                    warn!("Logged out; pairing required");
                    return SupervisorExit::LoggedOut;
                }
                CloseAction::Stop => {
                    warn!(failures, "Giving up reconnecting");
                    return SupervisorExit::GaveUp;
                }
                CloseAction::Reconnect(delay) => {
                    info!(delay_ms = delay.as_millis() as u64, "Reconnecting");
                    let cancelled = tokio::select! {
                        _ = cancel.cancelled() => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if cancelled {
                        self.shutdown(None).await;
                        return SupervisorExit::Shutdown;
                    }
                }
            }
        }
    }

    /// Consume one session's events until it closes or shutdown is requested.
    async fn drive(
        &mut self,
        connection: ProtocolConnection,
        cancel: &CancellationToken,
        failures: &mut u32,
    ) -> SessionEnd {
        let ProtocolConnection {
            session,
            mut events,
        } = connection;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return SessionEnd::Shutdown(session),
                event = events.recv() => event,
            };

            match event {
                Some(BridgeEvent::Qr { qr }) => self.on_qr(qr).await,
                Some(BridgeEvent::Open { user }) => {
                    *failures = 0;
                    self.on_open(Arc::clone(&session), user).await;
                }
                Some(BridgeEvent::Messages { messages }) => {
                    debug!(count = messages.len(), "Inbound batch");
                    self.relay.handle_inbound_batch(&messages).await;
                }
                Some(BridgeEvent::Close {
                    status_code,
                    reason,
                }) => {
                    let logged_out = status_code == Some(LOGGED_OUT_STATUS);
                    info!(?status_code, ?reason, logged_out, "Connection closed");
                    self.relay.detach_session().await;
                    return SessionEnd::Closed { logged_out };
                }
                None => {
                    warn!("Protocol event stream ended");
                    self.relay.detach_session().await;
                    return SessionEnd::Closed { logged_out: false };
                }
            }
        }
    }

    async fn on_qr(&self, qr: String) {
        info!("Pairing challenge received");
        self.board.set(ConnectionState::Pairing { qr: qr.clone() });

        let payload = match render_qr_data_url(&qr) {
            Ok(url) => url,
            Err(e) => {
                warn!("Failed to render QR code, publishing raw payload: {}", e);
                qr
            }
        };
        if let Err(e) = self.relay.sync().publish_qr(&payload).await {
            warn!("Failed to publish QR code: {}", e);
        }
    }

    async fn on_open(&mut self, session: Arc<dyn ProtocolSession>, user: Option<Value>) {
        info!("Connection open");
        self.relay.attach_session(session).await;
        self.board.set(ConnectionState::Open { user: user.clone() });
        self.publish_status(ConnectionStatus::open(user)).await;

        if let Err(e) = self.relay.sync().clear_qr().await {
            warn!("Failed to clear QR code: {}", e);
        }

        if let Some(previous) = self.resync.take() {
            previous.abort();
        }
        let relay = Arc::clone(&self.relay);
        self.resync = Some(tokio::spawn(async move {
            if let Err(e) = relay.resync_all().await {
                warn!("Resync failed: {}", e);
            }
        }));
    }

    async fn shutdown(&mut self, session: Option<Arc<dyn ProtocolSession>>) {
        info!("Shutting down connection");
        self.board.set(ConnectionState::Closing);

        if let Some(resync) = self.resync.take() {
            resync.abort();
        }

        let attached = self.relay.detach_session().await;
        if let Some(session) = session.or(attached) {
            if let Err(e) = session.close().await {
                warn!("Failed to close protocol session: {}", e);
            }
        }

        self.publish_status(ConnectionStatus::closed(false)).await;
        self.board.set(ConnectionState::Disconnected);
    }

    async fn publish_status(&self, status: ConnectionStatus) {
        if let Err(e) = self.relay.sync().publish_status(&status).await {
            warn!("Failed to publish connection status: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logged_out_never_reconnects() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.on_close(true, 1), CloseAction::Stop);
    }

    #[test]
    fn test_lost_connection_reconnects_after_delay() {
        let policy = ReconnectPolicy::default();
        assert_eq!(
            policy.on_close(false, 1),
            CloseAction::Reconnect(Duration::from_secs(5))
        );
        assert_eq!(
            policy.on_close(false, 1000),
            CloseAction::Reconnect(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_max_attempts() {
        let policy = ReconnectPolicy {
            delay: Duration::from_millis(10),
            max_attempts: Some(2),
        };
        assert!(matches!(policy.on_close(false, 1), CloseAction::Reconnect(_)));
        assert!(matches!(policy.on_close(false, 2), CloseAction::Reconnect(_)));
        assert_eq!(policy.on_close(false, 3), CloseAction::Stop);
    }
}
