//! Device WebSocket endpoints
//!
//! Each accepted socket splits into a writer task fed by an unbounded
//! channel and a read loop feeding the session registry. The channel sender
//! doubles as the connection handle the session worker broadcasts through.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use pairsign_core::protocol::ConnectionType;
use pairsign_session::Connection;

use crate::state::AppState;

/// Upgrade the primary device socket for a pairing session
pub async fn primary_ws(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| {
        handle_device_socket(state, session_id, ConnectionType::Primary, socket)
    })
}

/// Upgrade the external device socket for a pairing session
pub async fn external_ws(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| {
        handle_device_socket(state, session_id, ConnectionType::External, socket)
    })
}

async fn handle_device_socket(
    state: Arc<AppState>,
    session_id: String,
    kind: ConnectionType,
    socket: WebSocket,
) {
    let connection_id = Uuid::new_v4().to_string();
    debug!(
        "WebSocket connected: session={} type={} connection={}",
        session_id, kind, connection_id
    );

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Writer task: pumps session events (and pongs) out to the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    state
        .sessions
        .attach(
            &session_id,
            Connection {
                id: connection_id.clone(),
                kind,
                tx: tx.clone(),
            },
        )
        .await;

    let mut close_code: Option<u16> = None;
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!(
                    "WebSocket error: session={} connection={}: {}",
                    session_id, connection_id, err
                );
                break;
            }
        };

        match message {
            Message::Text(text) => {
                // Keepalive frames are answered here and never reach the
                // session worker.
                if text == "ping" {
                    if tx.send("pong".to_string()).is_err() {
                        break;
                    }
                    continue;
                }
                state
                    .sessions
                    .message(&session_id, &connection_id, text)
                    .await;
            }
            Message::Close(frame) => {
                close_code = frame.map(|f| f.code);
                break;
            }
            // Protocol-level pings are answered by the socket layer.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Binary(_) => {
                debug!(
                    "Ignoring binary frame: session={} connection={}",
                    session_id, connection_id
                );
            }
        }
    }

    // No close code (or the reserved 1005) means the peer vanished without
    // saying why; log it as 1001 going-away.
    let code = match close_code {
        None | Some(1005) => 1001,
        Some(code) => code,
    };
    debug!(
        "WebSocket closed: session={} type={} connection={} code={}",
        session_id, kind, connection_id, code
    );

    state.sessions.detach(&session_id, &connection_id).await;
    writer.abort();
}
