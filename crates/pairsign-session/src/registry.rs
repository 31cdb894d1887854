//! Session registry: lazily spawns workers and routes commands to them

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendError};
use tokio::sync::RwLock;
use tracing::debug;

use crate::worker::{Connection, SessionCommand, SessionMap, SessionWorker};

/// Routes pairing traffic to per-session workers, spawning them on demand
pub struct SessionRegistry {
    sessions: SessionMap,
    idle: Duration,
}

impl SessionRegistry {
    /// Create a registry whose workers exit after `idle` without connections
    pub fn new(idle: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            idle,
        }
    }

    /// Attach a connection to its session, spawning the worker if needed
    pub async fn attach(&self, session_id: &str, connection: Connection) {
        let mut command = SessionCommand::Attach(connection);
        loop {
            {
                let sessions = self.sessions.read().await;
                if let Some(tx) = sessions.get(session_id) {
                    match tx.send(command) {
                        Ok(()) => return,
                        // Worker exited between lookup and send; respawn below.
                        Err(SendError(returned)) => command = returned,
                    }
                }
            }

            let mut sessions = self.sessions.write().await;
            match sessions.get(session_id) {
                // Another caller spawned it while we waited for the lock.
                Some(tx) if !tx.is_closed() => {}
                _ => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    let worker = SessionWorker::new(session_id.to_string(), self.sessions.clone(), rx);
                    sessions.insert(session_id.to_string(), tx);
                    tokio::spawn(worker.run(self.idle));
                    debug!("Spawned worker for session {}", session_id);
                }
            }
        }
    }

    /// Forward a device frame to its session worker, if one is running
    pub async fn message(&self, session_id: &str, connection_id: &str, text: String) {
        self.dispatch(
            session_id,
            SessionCommand::Message {
                connection_id: connection_id.to_string(),
                text,
            },
        )
        .await;
    }

    /// Tell the session worker a connection's socket closed
    pub async fn detach(&self, session_id: &str, connection_id: &str) {
        self.dispatch(
            session_id,
            SessionCommand::Detach {
                connection_id: connection_id.to_string(),
            },
        )
        .await;
    }

    /// Number of sessions with a live worker
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn dispatch(&self, session_id: &str, command: SessionCommand) {
        let sessions = self.sessions.read().await;
        if let Some(tx) = sessions.get(session_id) {
            // A failed send means the worker already shut down; for messages
            // and detaches there is nothing left to tell.
            let _ = tx.send(command);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairsign_core::protocol::{ConnectionType, OidcParams, SessionEvent};
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::{sleep, timeout};

    fn connection(id: &str, kind: ConnectionType) -> (Connection, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Connection {
                id: id.to_string(),
                kind,
                tx,
            },
            rx,
        )
    }

    async fn recv_event(rx: &mut UnboundedReceiver<String>) -> SessionEvent {
        let text = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("connection channel closed");
        serde_json::from_str(&text).expect("event should be valid JSON")
    }

    fn assert_no_event(rx: &mut UnboundedReceiver<String>) {
        assert!(rx.try_recv().is_err(), "expected no pending event");
    }

    #[tokio::test]
    async fn test_attach_receives_status_including_self() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let (primary, mut primary_rx) = connection("p1", ConnectionType::Primary);

        registry.attach("session-a", primary).await;

        assert_eq!(
            recv_event(&mut primary_rx).await,
            SessionEvent::Status {
                primary_connected: true,
                external_connected: false,
                has_code: false,
            }
        );
    }

    #[tokio::test]
    async fn test_attach_notifies_opposite_side() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let (primary, mut primary_rx) = connection("p1", ConnectionType::Primary);
        let (external, mut external_rx) = connection("e1", ConnectionType::External);

        registry.attach("session-a", primary).await;
        recv_event(&mut primary_rx).await; // own status

        registry.attach("session-a", external).await;

        assert_eq!(recv_event(&mut primary_rx).await, SessionEvent::ExternalConnected);
        assert_eq!(
            recv_event(&mut external_rx).await,
            SessionEvent::Status {
                primary_connected: true,
                external_connected: true,
                has_code: false,
            }
        );
    }

    #[tokio::test]
    async fn test_params_travel_external_to_primary_and_back() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let (primary, mut primary_rx) = connection("p1", ConnectionType::Primary);
        let (external, mut external_rx) = connection("e1", ConnectionType::External);

        registry.attach("session-a", primary).await;
        recv_event(&mut primary_rx).await;
        registry.attach("session-a", external).await;
        recv_event(&mut primary_rx).await;
        recv_event(&mut external_rx).await;

        registry
            .message("session-a", "e1", r#"{"type":"request_params"}"#.to_string())
            .await;
        assert_eq!(recv_event(&mut primary_rx).await, SessionEvent::RequestParams);
        assert_no_event(&mut external_rx);

        registry
            .message(
                "session-a",
                "p1",
                r#"{"type":"params_response","params":{"clientId":"web","redirectUri":"https://app/cb","state":"s1"}}"#
                    .to_string(),
            )
            .await;
        assert_eq!(
            recv_event(&mut external_rx).await,
            SessionEvent::ParamsResponse {
                params: OidcParams {
                    client_id: "web".to_string(),
                    redirect_uri: "https://app/cb".to_string(),
                    state: Some("s1".to_string()),
                }
            }
        );
        assert_no_event(&mut primary_rx);
    }

    #[tokio::test]
    async fn test_code_reaches_primary_and_replays_to_late_primary() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let (primary, mut primary_rx) = connection("p1", ConnectionType::Primary);
        let (external, mut external_rx) = connection("e1", ConnectionType::External);

        registry.attach("session-a", primary).await;
        recv_event(&mut primary_rx).await;
        registry.attach("session-a", external).await;
        recv_event(&mut primary_rx).await;
        recv_event(&mut external_rx).await;

        registry
            .message(
                "session-a",
                "e1",
                r#"{"type":"code_generated","code":"abc123","state":"s1"}"#.to_string(),
            )
            .await;
        assert_eq!(
            recv_event(&mut primary_rx).await,
            SessionEvent::CodeReceived {
                code: "abc123".to_string(),
                state: Some("s1".to_string()),
                redirect_uri: None,
            }
        );
        assert_no_event(&mut external_rx);

        // A primary that reconnects after the code arrived catches up.
        let (late, mut late_rx) = connection("p2", ConnectionType::Primary);
        registry.attach("session-a", late).await;
        assert_eq!(
            recv_event(&mut late_rx).await,
            SessionEvent::Status {
                primary_connected: true,
                external_connected: true,
                has_code: true,
            }
        );
        assert_eq!(
            recv_event(&mut late_rx).await,
            SessionEvent::CodeReceived {
                code: "abc123".to_string(),
                state: Some("s1".to_string()),
                redirect_uri: None,
            }
        );
    }

    #[tokio::test]
    async fn test_wrong_side_frames_are_dropped() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let (primary, mut primary_rx) = connection("p1", ConnectionType::Primary);
        let (external, mut external_rx) = connection("e1", ConnectionType::External);

        registry.attach("session-a", primary).await;
        recv_event(&mut primary_rx).await;
        registry.attach("session-a", external).await;
        recv_event(&mut primary_rx).await;
        recv_event(&mut external_rx).await;

        // Only the external side may request params or submit a code.
        registry
            .message("session-a", "p1", r#"{"type":"request_params"}"#.to_string())
            .await;
        registry
            .message(
                "session-a",
                "p1",
                r#"{"type":"code_generated","code":"stolen"}"#.to_string(),
            )
            .await;
        // Only the primary side may answer with params.
        registry
            .message(
                "session-a",
                "e1",
                r#"{"type":"params_response","params":{"clientId":"x","redirectUri":"y"}}"#.to_string(),
            )
            .await;

        // Give the worker a beat to process, then check nothing leaked.
        sleep(Duration::from_millis(50)).await;
        assert_no_event(&mut primary_rx);
        assert_no_event(&mut external_rx);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_frames_are_dropped() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let (primary, mut primary_rx) = connection("p1", ConnectionType::Primary);
        let (external, mut external_rx) = connection("e1", ConnectionType::External);

        registry.attach("session-a", primary).await;
        recv_event(&mut primary_rx).await;
        registry.attach("session-a", external).await;
        recv_event(&mut primary_rx).await;
        recv_event(&mut external_rx).await;

        registry.message("session-a", "e1", "not json".to_string()).await;
        registry
            .message("session-a", "e1", r#"{"type":"telemetry"}"#.to_string())
            .await;

        sleep(Duration::from_millis(50)).await;
        assert_no_event(&mut primary_rx);
        assert_no_event(&mut external_rx);
    }

    #[tokio::test]
    async fn test_disconnect_notice_only_when_side_empties() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let (p1, mut p1_rx) = connection("p1", ConnectionType::Primary);
        let (p2, mut p2_rx) = connection("p2", ConnectionType::Primary);
        let (external, mut external_rx) = connection("e1", ConnectionType::External);

        registry.attach("session-a", p1).await;
        recv_event(&mut p1_rx).await;
        registry.attach("session-a", p2).await;
        recv_event(&mut p2_rx).await;
        registry.attach("session-a", external).await;
        recv_event(&mut p1_rx).await;
        recv_event(&mut p2_rx).await;
        recv_event(&mut external_rx).await;

        registry.detach("session-a", "p1").await;
        sleep(Duration::from_millis(50)).await;
        assert_no_event(&mut external_rx);

        registry.detach("session-a", "p2").await;
        assert_eq!(recv_event(&mut external_rx).await, SessionEvent::PrimaryDisconnected);
    }

    #[tokio::test]
    async fn test_idle_worker_exits_and_session_respawns_fresh() {
        let registry = SessionRegistry::new(Duration::from_millis(50));
        let (external, mut external_rx) = connection("e1", ConnectionType::External);

        registry.attach("session-a", external).await;
        recv_event(&mut external_rx).await;
        registry
            .message(
                "session-a",
                "e1",
                r#"{"type":"code_generated","code":"abc123"}"#.to_string(),
            )
            .await;
        registry.detach("session-a", "e1").await;

        // Worker should notice it is empty and go away.
        sleep(Duration::from_millis(200)).await;
        assert_eq!(registry.session_count().await, 0);

        // Reusing the id spawns a fresh worker with no leftover code.
        let (primary, mut primary_rx) = connection("p1", ConnectionType::Primary);
        registry.attach("session-a", primary).await;
        assert_eq!(
            recv_event(&mut primary_rx).await,
            SessionEvent::Status {
                primary_connected: true,
                external_connected: false,
                has_code: false,
            }
        );
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let (primary, mut primary_rx) = connection("p1", ConnectionType::Primary);
        let (external, mut external_rx) = connection("e1", ConnectionType::External);

        registry.attach("session-a", primary).await;
        registry.attach("session-b", external).await;

        assert_eq!(
            recv_event(&mut primary_rx).await,
            SessionEvent::Status {
                primary_connected: true,
                external_connected: false,
                has_code: false,
            }
        );
        assert_eq!(
            recv_event(&mut external_rx).await,
            SessionEvent::Status {
                primary_connected: false,
                external_connected: true,
                has_code: false,
            }
        );
        assert_eq!(registry.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_stale_connections_are_reaped_on_idle_tick() {
        let registry = SessionRegistry::new(Duration::from_millis(50));
        let (external, mut external_rx) = connection("e1", ConnectionType::External);
        let (primary, primary_rx) = connection("p1", ConnectionType::Primary);

        registry.attach("session-a", external).await;
        recv_event(&mut external_rx).await;
        registry.attach("session-a", primary).await;
        recv_event(&mut external_rx).await; // primary_connected

        // Simulate a writer task dying without a clean detach.
        drop(primary_rx);

        assert_eq!(recv_event(&mut external_rx).await, SessionEvent::PrimaryDisconnected);
    }
}
