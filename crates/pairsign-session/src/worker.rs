//! The session worker task

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, error};

use pairsign_core::protocol::{ConnectionType, DeviceMessage, SessionEvent};

/// Handle to one WebSocket held by a session worker.
///
/// `tx` carries pre-serialized JSON frames to the socket's writer task.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: String,
    pub kind: ConnectionType,
    pub tx: UnboundedSender<String>,
}

/// Commands a session worker accepts
#[derive(Debug)]
pub enum SessionCommand {
    /// A device joined the session
    Attach(Connection),
    /// A device sent a text frame
    Message { connection_id: String, text: String },
    /// A device's socket closed
    Detach { connection_id: String },
}

#[derive(Debug, Clone)]
struct CodePayload {
    code: String,
    state: Option<String>,
    redirect_uri: Option<String>,
}

impl CodePayload {
    fn event(&self) -> SessionEvent {
        SessionEvent::CodeReceived {
            code: self.code.clone(),
            state: self.state.clone(),
            redirect_uri: self.redirect_uri.clone(),
        }
    }
}

pub(crate) type SessionMap = Arc<RwLock<HashMap<String, UnboundedSender<SessionCommand>>>>;

pub(crate) struct SessionWorker {
    session_id: String,
    sessions: SessionMap,
    rx: UnboundedReceiver<SessionCommand>,
    connections: Vec<Connection>,
    code: Option<CodePayload>,
}

impl SessionWorker {
    pub(crate) fn new(
        session_id: String,
        sessions: SessionMap,
        rx: UnboundedReceiver<SessionCommand>,
    ) -> Self {
        Self {
            session_id,
            sessions,
            rx,
            connections: Vec::new(),
            code: None,
        }
    }

    pub(crate) async fn run(mut self, idle: Duration) {
        debug!("Session worker started: {}", self.session_id);
        loop {
            match timeout(idle, self.rx.recv()).await {
                Ok(Some(command)) => self.handle_command(command),
                Ok(None) => break,
                Err(_) => {
                    // Idle tick. Drop connections whose writer task is gone,
                    // announcing the departure like a normal detach.
                    let stale: Vec<String> = self
                        .connections
                        .iter()
                        .filter(|c| c.tx.is_closed())
                        .map(|c| c.id.clone())
                        .collect();
                    for id in stale {
                        debug!("Session {}: reaping stale connection {}", self.session_id, id);
                        self.handle_detach(&id);
                    }
                    if self.connections.is_empty() && self.try_shutdown().await {
                        break;
                    }
                }
            }
        }
        debug!("Session worker stopped: {}", self.session_id);
    }

    /// Commit to shutting down, or bail if a device raced in.
    ///
    /// Registry dispatch sends while holding the map's read lock, so with the
    /// write lock held here nothing can enqueue; whatever is already pending
    /// gets handled before the decision. Removing the map entry before the
    /// receiver drops means the registry never hands out a dead sender.
    async fn try_shutdown(&mut self) -> bool {
        let sessions = Arc::clone(&self.sessions);
        let mut sessions = sessions.write().await;
        while let Ok(command) = self.rx.try_recv() {
            self.handle_command(command);
        }
        if self.connections.is_empty() {
            sessions.remove(&self.session_id);
            debug!("Session worker idle, shutting down: {}", self.session_id);
            true
        } else {
            false
        }
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Attach(connection) => self.handle_attach(connection),
            SessionCommand::Message {
                connection_id,
                text,
            } => self.handle_message(&connection_id, &text),
            SessionCommand::Detach { connection_id } => self.handle_detach(&connection_id),
        }
    }

    fn handle_attach(&mut self, connection: Connection) {
        let kind = connection.kind;
        let connection_id = connection.id.clone();
        let tx = connection.tx.clone();
        self.connections.push(connection);
        debug!(
            "Session {}: {} device attached ({})",
            self.session_id, kind, connection_id
        );

        // Tell the other side this side is now present.
        let joined = match kind {
            ConnectionType::Primary => SessionEvent::PrimaryConnected,
            ConnectionType::External => SessionEvent::ExternalConnected,
        };
        self.broadcast(kind.opposite(), &joined);

        // The snapshot counts the newcomer itself.
        self.send_to(&tx, &connection_id, &self.status());

        // A primary that attaches after the code arrived (reconnect mid-flow)
        // still has to be able to finish; replay the code to it.
        if kind == ConnectionType::Primary {
            if let Some(payload) = self.code.clone() {
                self.send_to(&tx, &connection_id, &payload.event());
            }
        }
    }

    fn handle_message(&mut self, connection_id: &str, text: &str) {
        let Some(sender) = self.connections.iter().find(|c| c.id == connection_id) else {
            debug!(
                "Session {}: message from unknown connection {}",
                self.session_id, connection_id
            );
            return;
        };
        let kind = sender.kind;

        let message: DeviceMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(err) => {
                debug!("Session {}: dropping malformed frame: {}", self.session_id, err);
                return;
            }
        };

        match message {
            DeviceMessage::RequestParams => {
                if kind != ConnectionType::External {
                    debug!("Session {}: ignoring request_params from {}", self.session_id, kind);
                    return;
                }
                self.broadcast(ConnectionType::Primary, &SessionEvent::RequestParams);
            }
            DeviceMessage::ParamsResponse { params } => {
                if kind != ConnectionType::Primary {
                    debug!("Session {}: ignoring params_response from {}", self.session_id, kind);
                    return;
                }
                self.broadcast(ConnectionType::External, &SessionEvent::ParamsResponse { params });
            }
            DeviceMessage::CodeGenerated {
                code,
                state,
                redirect_uri,
            } => {
                if kind != ConnectionType::External {
                    debug!("Session {}: ignoring code_generated from {}", self.session_id, kind);
                    return;
                }
                let payload = CodePayload {
                    code,
                    state,
                    redirect_uri,
                };
                self.code = Some(payload.clone());
                self.broadcast(ConnectionType::Primary, &payload.event());
            }
            DeviceMessage::Unknown => {
                debug!("Session {}: dropping frame with unknown type", self.session_id);
            }
        }
    }

    fn handle_detach(&mut self, connection_id: &str) {
        let Some(index) = self.connections.iter().position(|c| c.id == connection_id) else {
            return;
        };
        let kind = self.connections.remove(index).kind;
        debug!(
            "Session {}: {} device detached ({})",
            self.session_id, kind, connection_id
        );

        // Announce only when the whole side went away.
        if !self.is_connected(kind) {
            let left = match kind {
                ConnectionType::Primary => SessionEvent::PrimaryDisconnected,
                ConnectionType::External => SessionEvent::ExternalDisconnected,
            };
            self.broadcast(kind.opposite(), &left);
        }
    }

    fn is_connected(&self, kind: ConnectionType) -> bool {
        self.connections.iter().any(|c| c.kind == kind)
    }

    fn status(&self) -> SessionEvent {
        SessionEvent::Status {
            primary_connected: self.is_connected(ConnectionType::Primary),
            external_connected: self.is_connected(ConnectionType::External),
            has_code: self.code.is_some(),
        }
    }

    /// Send an event to every connection on one side. Frames are serialized
    /// once; failed sends mean the socket is on its way out and its detach
    /// will follow, so they are only logged.
    fn broadcast(&self, to: ConnectionType, event: &SessionEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(err) => {
                error!("Session {}: failed to serialize event: {}", self.session_id, err);
                return;
            }
        };
        for connection in self.connections.iter().filter(|c| c.kind == to) {
            if connection.tx.send(json.clone()).is_err() {
                debug!(
                    "Session {}: dropping frame for closed connection {}",
                    self.session_id, connection.id
                );
            }
        }
    }

    fn send_to(&self, tx: &UnboundedSender<String>, connection_id: &str, event: &SessionEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                if tx.send(json).is_err() {
                    debug!(
                        "Session {}: dropping frame for closed connection {}",
                        self.session_id, connection_id
                    );
                }
            }
            Err(err) => error!("Session {}: failed to serialize event: {}", self.session_id, err),
        }
    }
}
