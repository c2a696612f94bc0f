//! Axum server setup and router construction.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use ctxwin::ContextEngine;
use ctxwin::tools::ToolSet;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::api::{self, AppState};
use crate::broadcast::WsMessage;
use crate::ws::{self, WsState};

/// Build the full axum router.
///
/// The router serves:
/// - WebSocket at `/ws`
/// - REST API at `/api/*`
/// - Optional static files for a dashboard build
pub fn build_router(
    engine: ContextEngine,
    broadcast_tx: broadcast::Sender<WsMessage>,
    static_dir: Option<PathBuf>,
    max_tool_result_bytes: usize,
) -> Router {
    let tools = Arc::new(
        ToolSet::new()
            .with_max_result_bytes(max_tool_result_bytes)
            .with_arg_validation(true)
            .with_context_tools(&engine),
    );

    let app_state = AppState {
        engine: engine.clone(),
        tools: tools.clone(),
    };
    let ws_state = WsState {
        engine,
        tools,
        broadcast_tx,
    };

    // CORS layer for dashboards served from another origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let ws_routes = Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .with_state(ws_state);

    let api_routes = Router::new()
        .route("/api/health", get(api::health))
        .route("/api/stats", get(api::stats))
        .route(
            "/api/sessions",
            post(api::create_session).get(api::list_sessions),
        )
        .route(
            "/api/sessions/{id}",
            get(api::get_session).delete(api::delete_session),
        )
        .route("/api/sessions/{id}/windows", post(api::create_window))
        .route(
            "/api/contexts/{id}",
            get(api::get_window).delete(api::delete_window),
        )
        .route(
            "/api/contexts/{id}/elements",
            get(api::list_elements).post(api::add_element),
        )
        .route(
            "/api/contexts/{id}/elements/{element_id}",
            delete(api::remove_element),
        )
        .route("/api/contexts/{id}/analyze", post(api::analyze))
        .route("/api/contexts/{id}/optimize", post(api::optimize))
        .route("/api/contexts/{id}/auto-optimize", post(api::auto_optimize))
        .route("/api/optimization/{task_id}", get(api::get_task))
        .route(
            "/api/templates",
            post(api::create_template).get(api::list_templates),
        )
        .route("/api/templates/generate", post(api::generate_template))
        .route(
            "/api/templates/{id}",
            get(api::get_template).delete(api::delete_template),
        )
        .route("/api/templates/{id}/render", post(api::render_template))
        .route("/api/tools", get(api::list_tools))
        .route("/api/tools/{name}", post(api::call_tool))
        .with_state(app_state);

    let mut router = Router::new()
        .merge(ws_routes)
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    if let Some(dir) = static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
}

/// Bind the listener, spawn the server, and return the bound address.
pub async fn start_server(router: Router, bind_addr: SocketAddr) -> std::io::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("Web server stopped: {e}");
        }
    });

    Ok(addr)
}
