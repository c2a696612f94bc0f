//! WebSocket upgrade handler and message dispatch.
//!
//! Each connected client receives:
//! 1. A [`StateSnapshot`] on connect.
//! 2. Every [`WsMessage`] broadcast by the engine's event handler.
//!
//! Clients may send `{"type": "tool_call", "name", "arguments"}`; the
//! `tool_result` goes to that client only.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use ctxwin::ContextEngine;
use ctxwin::tools::ToolSet;
use futures::{SinkExt, StreamExt, stream::SplitSink};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::broadcast::WsMessage;
use crate::snapshot::StateSnapshot;

/// Per-connection queue for replies addressed to one client.
const DIRECT_QUEUE: usize = 32;

/// Shared state for WebSocket handlers.
#[derive(Clone)]
pub struct WsState {
    pub engine: ContextEngine,
    pub tools: Arc<ToolSet>,
    pub broadcast_tx: broadcast::Sender<WsMessage>,
}

/// A message received from a client.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    ToolCall {
        /// Echoed back on the result so clients can match replies.
        #[serde(default)]
        id: Option<String>,
        name: String,
        /// A JSON object, or a string holding one.
        #[serde(default)]
        arguments: serde_json::Value,
    },
    /// Ask for a fresh snapshot.
    Snapshot,
}

fn snapshot_message(engine: &ContextEngine) -> WsMessage {
    WsMessage::Snapshot {
        data: StateSnapshot::capture(engine).to_json(),
    }
}

/// GET /ws — WebSocket upgrade handler.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(ws_state): State<WsState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ws_state))
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, ws_state: WsState) {
    let (mut sink, mut stream) = socket.split();

    // Subscribe before the snapshot so no event falls between the two.
    let mut broadcast_rx = ws_state.broadcast_tx.subscribe();
    if ws_send(&mut sink, &snapshot_message(&ws_state.engine))
        .await
        .is_err()
    {
        return;
    }
    debug!("WebSocket client connected");

    let (direct_tx, mut direct_rx) = mpsc::channel::<WsMessage>(DIRECT_QUEUE);

    // Forward broadcasts and direct replies to this client.
    let engine = ws_state.engine.clone();
    let forward_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                received = broadcast_rx.recv() => match received {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged by {n} messages, resending snapshot");
                        snapshot_message(&engine)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                direct = direct_rx.recv() => match direct {
                    Some(msg) => msg,
                    None => break,
                },
            };
            if ws_send(&mut sink, &msg).await.is_err() {
                break; // Client disconnected.
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => handle_client_message(&text, &ws_state, &direct_tx),
            Message::Close(_) => break,
            _ => {} // Ignore binary, ping, pong.
        }
    }

    debug!("WebSocket client disconnected");
    forward_task.abort();
}

/// Process a JSON message received from a client.
fn handle_client_message(text: &str, ws_state: &WsState, direct_tx: &mpsc::Sender<WsMessage>) {
    let Ok(msg) = serde_json::from_str::<ClientMessage>(text) else {
        debug!("Ignoring malformed WebSocket message");
        return;
    };

    match msg {
        ClientMessage::ToolCall {
            id,
            name,
            arguments,
        } => {
            let arguments = match arguments {
                serde_json::Value::String(raw) => raw,
                serde_json::Value::Null => "{}".to_string(),
                other => other.to_string(),
            };
            let tools = ws_state.tools.clone();
            let direct_tx = direct_tx.clone();
            // Tool calls may wait on the model; keep reading other messages.
            tokio::spawn(async move {
                let result = tools.execute(&name, &arguments).await;
                let _ = direct_tx
                    .send(WsMessage::tool_result(id, name, result))
                    .await;
            });
        }
        ClientMessage::Snapshot => {
            let _ = direct_tx.try_send(snapshot_message(&ws_state.engine));
        }
    }
}

/// Serialize a `WsMessage` and send it over the WebSocket sink.
async fn ws_send(sink: &mut SplitSink<WebSocket, Message>, msg: &WsMessage) -> Result<(), ()> {
    let json = serde_json::to_string(msg).unwrap_or_default();
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}
