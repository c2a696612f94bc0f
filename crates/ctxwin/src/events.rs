//! State-change events emitted by the [`ContextEngine`](crate::ContextEngine).
//!
//! The engine reports every successful mutation, analysis, and task
//! transition through [`EngineEvent`] variants. Events are emitted after the
//! relevant locks are released, so handlers may call back into the engine.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests, embedded use without observers |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |
//! | Custom `impl EventHandler` | Full control (WebSocket fan-out, metrics) |

use tracing::{debug, info, warn};

use crate::analysis::ContextAnalysis;
use crate::context::element::ContextElement;
use crate::context::session::SessionInfo;
use crate::context::window::{TokenUsage, WindowInfo};
use crate::optimize::{OptimizationOutcome, OptimizationTask, TaskStatus};
use crate::template::PromptTemplate;

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted by the engine.
#[derive(Debug)]
pub enum EngineEvent<'a> {
    SessionCreated(&'a SessionInfo),
    /// A session and all of its windows were destroyed.
    SessionDeleted {
        session_id: &'a str,
        window_ids: &'a [String],
    },
    WindowCreated(&'a WindowInfo),
    WindowDeleted {
        session_id: &'a str,
        window_id: &'a str,
    },
    ElementAdded {
        window_id: &'a str,
        element: &'a ContextElement,
        usage: &'a TokenUsage,
    },
    ElementRemoved {
        window_id: &'a str,
        element_id: &'a str,
        usage: &'a TokenUsage,
    },
    AnalysisCompleted(&'a ContextAnalysis),
    /// An optimization task was created or changed state.
    OptimizationStatus(&'a OptimizationTask),
    /// An optimization result was applied to a window.
    WindowOptimized {
        window_id: &'a str,
        outcome: &'a OptimizationOutcome,
        usage: &'a TokenUsage,
    },
    TemplateCreated(&'a PromptTemplate),
    TemplateDeleted { template_id: &'a str },
}

impl EngineEvent<'_> {
    /// Snake-case event name, as used on the WebSocket channel.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::SessionCreated(_) => "session_created",
            EngineEvent::SessionDeleted { .. } => "session_deleted",
            EngineEvent::WindowCreated(_) => "window_created",
            EngineEvent::WindowDeleted { .. } => "window_deleted",
            EngineEvent::ElementAdded { .. } => "element_added",
            EngineEvent::ElementRemoved { .. } => "element_removed",
            EngineEvent::AnalysisCompleted(_) => "analysis_completed",
            EngineEvent::OptimizationStatus(_) => "optimization_status",
            EngineEvent::WindowOptimized { .. } => "window_optimized",
            EngineEvent::TemplateCreated(_) => "template_created",
            EngineEvent::TemplateDeleted { .. } => "template_deleted",
        }
    }

    /// Window id the event concerns, if any.
    pub fn window_id(&self) -> Option<&str> {
        match self {
            EngineEvent::WindowCreated(info) => Some(info.id.as_str()),
            EngineEvent::WindowDeleted { window_id, .. }
            | EngineEvent::ElementAdded { window_id, .. }
            | EngineEvent::ElementRemoved { window_id, .. }
            | EngineEvent::WindowOptimized { window_id, .. } => Some(*window_id),
            EngineEvent::AnalysisCompleted(analysis) => Some(analysis.context_id.as_str()),
            EngineEvent::OptimizationStatus(task) => Some(task.context_id.as_str()),
            _ => None,
        }
    }
}

/// Observer of engine events.
///
/// The default implementation ignores everything. Handlers run synchronously
/// on the thread that performed the change and should return quickly.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &EngineEvent<'_>) {
        let _ = event;
    }
}

/// An event handler that ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// # Example
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let EngineEvent::ElementAdded { usage, .. } = event {
///         println!("{}", usage.to_log_string());
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&EngineEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&EngineEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&EngineEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &EngineEvent<'_>) {
        (self.0)(event)
    }
}

/// An event handler that delegates to multiple inner handlers in
/// registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with(WebBroadcastHandler::new(ws_tx.clone()));
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &EngineEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

// ── Logging ────────────────────────────────────────────────────────

/// Logs every event through `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &EngineEvent<'_>) {
        match event {
            EngineEvent::SessionCreated(info) => {
                info!("Session created: {} ({})", info.id, info.name);
            }
            EngineEvent::SessionDeleted {
                session_id,
                window_ids,
            } => {
                info!(
                    "Session deleted: {session_id} ({} window(s) dropped)",
                    window_ids.len()
                );
            }
            EngineEvent::WindowCreated(info) => {
                info!(
                    "Window created: {} in session {} (max={}, reserved={})",
                    info.id, info.session_id, info.max_tokens, info.reserved_tokens
                );
            }
            EngineEvent::WindowDeleted {
                session_id,
                window_id,
            } => {
                info!("Window deleted: {window_id} from session {session_id}");
            }
            EngineEvent::ElementAdded {
                window_id,
                element,
                usage,
            } => {
                let preview: String = element.content().chars().take(200).collect();
                debug!(
                    "Element {} added to {window_id} ({} tokens): {preview}{}",
                    element.id(),
                    element.token_count(),
                    if element.content().len() > 200 { "..." } else { "" }
                );
                debug!("  {}", usage.to_log_string());
            }
            EngineEvent::ElementRemoved {
                window_id,
                element_id,
                usage,
            } => {
                debug!(
                    "Element {element_id} removed from {window_id}; {}",
                    usage.to_log_string()
                );
            }
            EngineEvent::AnalysisCompleted(analysis) => {
                info!(
                    "Analysis of {} completed: quality {:.1}/100, {} recommendation(s)",
                    analysis.context_id,
                    analysis.quality_score,
                    analysis.recommendations.len()
                );
            }
            EngineEvent::OptimizationStatus(task) => match task.status {
                TaskStatus::Failed => {
                    let reason = task
                        .failure
                        .as_ref()
                        .map(|f| f.message.as_str())
                        .unwrap_or("unknown");
                    warn!("Optimization task {} failed: {reason}", task.id);
                }
                status => {
                    debug!(
                        "Optimization task {} for {}: {status:?} ({}%)",
                        task.id, task.context_id, task.progress
                    );
                }
            },
            EngineEvent::WindowOptimized {
                window_id,
                outcome,
                usage,
            } => {
                info!(
                    "Window {window_id} optimized: {} -> {} tokens ({} saved), {} -> {} elements",
                    outcome.original_tokens,
                    outcome.optimized_tokens,
                    outcome.tokens_saved,
                    outcome.original_element_count,
                    outcome.optimized_element_count,
                );
                debug!("  {}", usage.to_log_string());
            }
            EngineEvent::TemplateCreated(template) => {
                info!(
                    "Template created: {} ({}) with {} variable(s)",
                    template.id,
                    template.name,
                    template.variables().len()
                );
            }
            EngineEvent::TemplateDeleted { template_id } => {
                info!("Template deleted: {template_id}");
            }
        }
    }
}
