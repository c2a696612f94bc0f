//! Token-budgeted context windows for LLM prompts.
//!
//! `ctxwin` manages the content sent to a language model as named
//! [sessions](context::Session) of [context windows](context::ContextWindow).
//! Each window holds an ordered list of typed elements under a hard budget:
//! `current_tokens + reserved_tokens <= max_tokens` holds after every
//! operation. On top of that model sit model-backed operations:
//!
//! - **Analysis**: score a window's quality and list issues and recommendations.
//! - **Optimization**: background tasks that replace a window's elements with
//!   a model-proposed candidate set, atomically and only if it still fits.
//! - **Templates**: `{variable}` prompt templates, rendered locally or drafted
//!   by the model.
//!
//! Everything goes through one [`ContextEngine`], which owns the in-memory
//! [`ContextStore`](store::ContextStore) and a [`ModelBackend`](model::ModelBackend).
//!
//! ```ignore
//! use std::sync::Arc;
//! use ctxwin::prelude::*;
//!
//! let engine = ContextEngine::builder(Arc::new(HeuristicBackend::new()))
//!     .with_event_handler(LoggingHandler)
//!     .build();
//!
//! let session = engine.create_session(NewSession::named("support"))?;
//! let window = engine.create_window(&session.id, NewWindow::sized(4096, 512))?;
//! engine.add_element(&window.id, NewElement::new("You are terse.", ElementKind::System))?;
//!
//! let analysis = engine.analyze(&window.id, AnalyzeRequest::default()).await?;
//! println!("quality {:.0}/100", analysis.quality_score);
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`context`] | Elements, windows, sessions, tokenizers |
//! | [`engine`] | [`ContextEngine`], the operation surface |
//! | [`store`] | The single in-memory store |
//! | [`analysis`] | Analysis requests and result validation |
//! | [`optimize`] | Goals, candidates, and optimization tasks |
//! | [`template`] | Prompt templates and rendering |
//! | [`model`] | Model backends (OpenRouter, heuristic) |
//! | [`events`] | Engine events and handlers |
//! | [`tools`] | Function-calling catalog over the engine |
//! | [`config`] | [`EngineConfig`] |
//! | [`error`] | [`Error`] and [`Result`] |

pub mod analysis;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod model;
pub mod optimize;
pub mod prelude;
pub mod store;
pub mod template;
pub mod tools;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use config::EngineConfig;
pub use engine::{ContextEngine, ContextEngineBuilder, EngineStats};
pub use error::{Error, Result};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`.
///
/// ```
/// use ctxwin::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct WindowArgs {
///     context_id: String,
///     #[serde(default)]
///     tag: Option<String>,
/// }
///
/// let schema = json_schema_for::<WindowArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"context_id".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Tool definitions ───────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition in the OpenAI function-calling format.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}
