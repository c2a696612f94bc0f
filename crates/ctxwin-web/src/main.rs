//! Context window server: REST API, tool-call endpoint, and WebSocket events.
//!
//! Uses OpenRouter when `OPENROUTER_KEY` is set and falls back to the offline
//! heuristic backend otherwise.
//!
//! # Usage
//!
//! ```bash
//! OPENROUTER_KEY=sk-... cargo run -p ctxwin-web
//! OPENROUTER_KEY=sk-... cargo run -p ctxwin-web -- --model anthropic/claude-sonnet-4 \
//!     --analysis-model google/gemini-2.5-flash
//! cargo run -p ctxwin-web -- --port 8080    # heuristic backend
//! ```
//!
//! ## Example session
//!
//! ```bash
//! curl -X POST localhost:3001/api/sessions -d '{"name": "chat"}'
//! curl -X POST localhost:3001/api/sessions/$SESSION/windows -d '{"max_tokens": 4096}'
//! curl -X POST localhost:3001/api/contexts/$WINDOW/elements \
//!     -d '{"content": "You are terse.", "type": "system"}'
//! curl -X POST localhost:3001/api/contexts/$WINDOW/analyze
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ctxwin::model::router::DEFAULT_MODEL;
use ctxwin::prelude::*;
use ctxwin::tools::DEFAULT_MAX_RESULT_BYTES;
use ctxwin_web::{WebBroadcastHandler, WebConfig, WsMessage, spawn_web};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Context window server.
#[derive(Parser)]
#[command(about = "REST and WebSocket server for token-budgeted context windows")]
struct Args {
    /// Address to bind.
    #[arg(long, env = "CTXWIN_HOST", default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port to bind. 0 picks a free port.
    #[arg(long, env = "CTXWIN_PORT", default_value_t = 3001)]
    port: u16,

    /// OpenRouter API key. Without one the heuristic backend is used.
    #[arg(long, env = "OPENROUTER_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model for optimization and template generation (and everything else
    /// unless --analysis-model is set).
    #[arg(long, env = "CTXWIN_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Cheaper model for analysis and goal recommendation.
    #[arg(long, env = "CTXWIN_ANALYSIS_MODEL")]
    analysis_model: Option<String>,

    /// `max_tokens` for windows created without one.
    #[arg(long, env = "CTXWIN_DEFAULT_MAX_TOKENS", default_value_t = 8192)]
    default_max_tokens: usize,

    /// `reserved_tokens` for windows created without one.
    #[arg(long, env = "CTXWIN_DEFAULT_RESERVED_TOKENS", default_value_t = 512)]
    default_reserved_tokens: usize,

    /// Timeout for each model call, in seconds.
    #[arg(long, env = "CTXWIN_UPSTREAM_TIMEOUT", default_value_t = 60)]
    upstream_timeout_secs: u64,

    /// Characters per token for the default tokenizer.
    #[arg(long, env = "CTXWIN_CHARS_PER_TOKEN", default_value_t = 4.0)]
    chars_per_token: f64,

    /// Directory of static dashboard files to serve.
    #[arg(long, env = "CTXWIN_STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// WebSocket broadcast channel capacity.
    #[arg(long, default_value_t = 256)]
    broadcast_capacity: usize,

    /// Truncate tool results beyond this many bytes.
    #[arg(long, env = "CTXWIN_MAX_TOOL_RESULT_BYTES", default_value_t = DEFAULT_MAX_RESULT_BYTES)]
    max_tool_result_bytes: usize,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn build_backend(args: &Args) -> std::result::Result<Arc<dyn ModelBackend>, String> {
    match &args.api_key {
        Some(key) if !key.trim().is_empty() => {
            let router = ModelRouter::from_models(&args.model, args.analysis_model.clone());
            info!("Using OpenRouter backend ({router:?})");
            let backend = OpenRouterBackend::new(key.trim())
                .map_err(|e| format!("failed to create OpenRouter client: {e}"))?
                .with_router(router)
                .with_headers("https://github.com/ctxwin/ctxwin", "ctxwin");
            Ok(Arc::new(backend))
        }
        _ => {
            warn!("OPENROUTER_KEY not set; using the offline heuristic backend");
            Ok(Arc::new(HeuristicBackend::new()))
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let backend = match build_backend(&args) {
        Ok(b) => b,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    let config = EngineConfig::default()
        .with_default_max_tokens(args.default_max_tokens)
        .with_default_reserved_tokens(args.default_reserved_tokens)
        .with_upstream_timeout(Duration::from_secs(args.upstream_timeout_secs))
        .with_chars_per_token(args.chars_per_token);

    let web_config = WebConfig {
        bind_addr: (args.host, args.port).into(),
        static_dir: args.static_dir,
        broadcast_capacity: args.broadcast_capacity,
        max_tool_result_bytes: args.max_tool_result_bytes,
    };

    // Shared broadcast channel: engine events in, WebSocket clients out.
    let (ws_tx, _) =
        tokio::sync::broadcast::channel::<WsMessage>(web_config.broadcast_capacity.max(1));
    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with(WebBroadcastHandler::new(ws_tx.clone()));

    let engine = ContextEngine::builder(backend)
        .with_config(config)
        .with_event_handler(handler)
        .build();

    let addr = match spawn_web(engine, ws_tx, web_config).await {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to bind {}:{}: {e}", args.host, args.port);
            process::exit(1);
        }
    };
    info!("Listening on http://{addr} (WebSocket at ws://{addr}/ws)");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        process::exit(1);
    }
    info!("Shutting down");
}
