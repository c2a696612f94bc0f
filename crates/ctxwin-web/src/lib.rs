//! REST and WebSocket server for ctxwin context windows.
//!
//! `ctxwin-web` exposes a [`ContextEngine`] over an axum server: a REST API
//! with one route per engine operation, a tool-call endpoint for the function
//! catalog, and a WebSocket channel that streams engine events.
//!
//! # Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use ctxwin::prelude::*;
//! use ctxwin_web::{WebBroadcastHandler, WebConfig, WsMessage, spawn_web};
//!
//! let (ws_tx, _) = tokio::sync::broadcast::channel::<WsMessage>(256);
//! let engine = ContextEngine::builder(Arc::new(HeuristicBackend::new()))
//!     .with_event_handler(WebBroadcastHandler::new(ws_tx.clone()))
//!     .build();
//!
//! let addr = spawn_web(engine, ws_tx, WebConfig::default()).await?;
//! println!("API: http://{addr}/api/health");
//! ```
//!
//! # Architecture
//!
//! ```text
//! REST / tool calls ──▶ ContextEngine ──EngineEvent──▶ WebBroadcastHandler ──WsMessage──▶ WebSocket clients
//! ```
//!
//! The [`WebBroadcastHandler`] implements
//! [`EventHandler`](ctxwin::events::EventHandler). Pass the same broadcast
//! sender to it and to [`spawn_web`].

mod api;
pub mod broadcast;
mod server;
pub mod snapshot;
mod ws;

pub use api::status_for;
pub use broadcast::{WebBroadcastHandler, WsMessage};
pub use snapshot::StateSnapshot;

use std::net::SocketAddr;
use std::path::PathBuf;

use ctxwin::ContextEngine;
use ctxwin::tools::DEFAULT_MAX_RESULT_BYTES;

/// Configuration for the web server.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Address to bind to. Default: `127.0.0.1:3001`.
    pub bind_addr: SocketAddr,
    /// Directory of static dashboard files served for unmatched paths.
    /// If `None`, only API/WS endpoints are served.
    pub static_dir: Option<PathBuf>,
    /// WebSocket broadcast channel capacity. Default: 256.
    ///
    /// Clients that fall behind by this many messages receive a fresh
    /// snapshot to resynchronize.
    pub broadcast_capacity: usize,
    /// Tool results longer than this many bytes are truncated, for both the
    /// REST tool endpoint and WebSocket tool calls.
    /// Default: [`DEFAULT_MAX_RESULT_BYTES`].
    pub max_tool_result_bytes: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
            static_dir: None,
            broadcast_capacity: 256,
            max_tool_result_bytes: DEFAULT_MAX_RESULT_BYTES,
        }
    }
}

/// Spawn the web server on a Tokio task and return the bound address.
///
/// `broadcast_tx` must be the sender given to the engine's
/// [`WebBroadcastHandler`]. The server runs until the Tokio runtime shuts
/// down.
pub async fn spawn_web(
    engine: ContextEngine,
    broadcast_tx: tokio::sync::broadcast::Sender<WsMessage>,
    config: WebConfig,
) -> std::io::Result<SocketAddr> {
    let router = server::build_router(
        engine,
        broadcast_tx,
        config.static_dir,
        config.max_tool_result_bytes,
    );
    server::start_server(router, config.bind_addr).await
}
