//! Convenience re-exports for common `ctxwin` types.
//!
//! ```ignore
//! use ctxwin::prelude::*;
//! ```
//!
//! Covers the engine, its request types, the bundled backends, and event
//! handlers. Lower-level pieces (the store, candidate building, wire types)
//! are imported from their modules directly.

// ── Engine ──────────────────────────────────────────────────────────
pub use crate::{ContextEngine, EngineConfig, Error, Result, ToolDef, json_schema_for};

// ── Data model ──────────────────────────────────────────────────────
pub use crate::context::{
    CharRatioTokenizer, ElementKind, Modality, NewElement, NewSession, NewWindow, Tokenizer,
};

// ── Operations ──────────────────────────────────────────────────────
pub use crate::analysis::AnalyzeRequest;
pub use crate::optimize::{OptimizationConstraints, OptimizationGoal, OptimizeRequest, TaskStatus};
pub use crate::template::{NewTemplate, TemplateRequest};

// ── Backends ────────────────────────────────────────────────────────
pub use crate::model::{HeuristicBackend, ModelBackend, ModelRouter, OpenRouterBackend};

// ── Events ──────────────────────────────────────────────────────────
pub use crate::events::{
    CompositeEventHandler, EngineEvent, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{FnTool, Tool, ToolSet, ToolSpec};
