//! [`EventHandler`] that converts engine events into WebSocket messages.
//!
//! [`WebBroadcastHandler`] turns each [`EngineEvent`] into an owned
//! [`WsMessage`] and fans it out to every connected client through a
//! `tokio::sync::broadcast` channel.

use ctxwin::analysis::ContextAnalysis;
use ctxwin::context::{ContextElement, SessionInfo, TokenUsage, WindowInfo};
use ctxwin::events::{EngineEvent, EventHandler};
use ctxwin::optimize::{OptimizationOutcome, OptimizationTask};
use ctxwin::template::PromptTemplate;
use ctxwin::tools::truncate_result;
use serde::Serialize;
use tokio::sync::broadcast;

/// Maximum tool result size sent over WebSocket (8 KB).
pub const MAX_WS_TOOL_RESULT_BYTES: usize = 8 * 1024;

/// A message sent from the server to WebSocket clients.
///
/// Discriminated on the `type` field when serialized to JSON. State-change
/// variants share their names with [`EngineEvent::name`].
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Full state snapshot (sent on connect and after a client lags).
    Snapshot { data: serde_json::Value },
    SessionCreated { session: SessionInfo },
    SessionDeleted {
        session_id: String,
        window_ids: Vec<String>,
    },
    WindowCreated { window: WindowInfo },
    WindowDeleted {
        session_id: String,
        window_id: String,
    },
    ElementAdded {
        window_id: String,
        element: ContextElement,
        usage: TokenUsage,
    },
    ElementRemoved {
        window_id: String,
        element_id: String,
        usage: TokenUsage,
    },
    AnalysisCompleted { analysis: ContextAnalysis },
    OptimizationStatus { task: OptimizationTask },
    WindowOptimized {
        window_id: String,
        outcome: OptimizationOutcome,
        usage: TokenUsage,
    },
    TemplateCreated { template: PromptTemplate },
    TemplateDeleted { template_id: String },
    /// Reply to a client's `tool_call`, sent to that client only.
    ToolResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        result: String,
        is_error: bool,
    },
}

impl WsMessage {
    /// Build a tool reply, truncating large results for transport.
    pub fn tool_result(id: Option<String>, name: impl Into<String>, result: String) -> Self {
        let is_error = result.starts_with("Error");
        WsMessage::ToolResult {
            id,
            name: name.into(),
            result: truncate_result(result, MAX_WS_TOOL_RESULT_BYTES),
            is_error,
        }
    }
}

impl From<&EngineEvent<'_>> for WsMessage {
    fn from(event: &EngineEvent<'_>) -> Self {
        match event {
            EngineEvent::SessionCreated(info) => WsMessage::SessionCreated {
                session: (*info).clone(),
            },
            EngineEvent::SessionDeleted {
                session_id,
                window_ids,
            } => WsMessage::SessionDeleted {
                session_id: session_id.to_string(),
                window_ids: window_ids.to_vec(),
            },
            EngineEvent::WindowCreated(info) => WsMessage::WindowCreated {
                window: (*info).clone(),
            },
            EngineEvent::WindowDeleted {
                session_id,
                window_id,
            } => WsMessage::WindowDeleted {
                session_id: session_id.to_string(),
                window_id: window_id.to_string(),
            },
            EngineEvent::ElementAdded {
                window_id,
                element,
                usage,
            } => WsMessage::ElementAdded {
                window_id: window_id.to_string(),
                element: (*element).clone(),
                usage: **usage,
            },
            EngineEvent::ElementRemoved {
                window_id,
                element_id,
                usage,
            } => WsMessage::ElementRemoved {
                window_id: window_id.to_string(),
                element_id: element_id.to_string(),
                usage: **usage,
            },
            EngineEvent::AnalysisCompleted(analysis) => WsMessage::AnalysisCompleted {
                analysis: (*analysis).clone(),
            },
            EngineEvent::OptimizationStatus(task) => WsMessage::OptimizationStatus {
                task: (*task).clone(),
            },
            EngineEvent::WindowOptimized {
                window_id,
                outcome,
                usage,
            } => WsMessage::WindowOptimized {
                window_id: window_id.to_string(),
                outcome: (*outcome).clone(),
                usage: **usage,
            },
            EngineEvent::TemplateCreated(template) => WsMessage::TemplateCreated {
                template: (*template).clone(),
            },
            EngineEvent::TemplateDeleted { template_id } => WsMessage::TemplateDeleted {
                template_id: template_id.to_string(),
            },
        }
    }
}

/// Event handler that broadcasts engine events to WebSocket clients.
///
/// Compose alongside [`LoggingHandler`](ctxwin::events::LoggingHandler):
///
/// ```ignore
/// let (ws_tx, _) = tokio::sync::broadcast::channel(256);
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with(WebBroadcastHandler::new(ws_tx.clone()));
/// ```
pub struct WebBroadcastHandler {
    sender: broadcast::Sender<WsMessage>,
}

impl WebBroadcastHandler {
    pub fn new(sender: broadcast::Sender<WsMessage>) -> Self {
        Self { sender }
    }
}

impl EventHandler for WebBroadcastHandler {
    fn on_event(&self, event: &EngineEvent<'_>) {
        // No subscribers is fine.
        let _ = self.sender.send(WsMessage::from(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_type_matches_event_name() {
        let events = [
            EngineEvent::TemplateDeleted { template_id: "t" },
            EngineEvent::WindowDeleted {
                session_id: "s",
                window_id: "w",
            },
            EngineEvent::SessionDeleted {
                session_id: "s",
                window_ids: &[],
            },
        ];
        for event in &events {
            let json = serde_json::to_value(WsMessage::from(event)).unwrap();
            assert_eq!(json["type"], event.name());
        }
    }

    #[test]
    fn handler_broadcasts_to_subscribers() {
        let (tx, mut rx) = broadcast::channel(4);
        let handler = WebBroadcastHandler::new(tx);
        handler.on_event(&EngineEvent::TemplateDeleted { template_id: "t1" });
        match rx.try_recv().unwrap() {
            WsMessage::TemplateDeleted { template_id } => assert_eq!(template_id, "t1"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn tool_result_flags_errors_and_truncates() {
        let msg = WsMessage::tool_result(None, "get_stats", "Error: boom".into());
        assert!(matches!(msg, WsMessage::ToolResult { is_error: true, .. }));

        let big = "x".repeat(MAX_WS_TOOL_RESULT_BYTES * 2);
        let WsMessage::ToolResult { result, is_error, .. } =
            WsMessage::tool_result(Some("1".into()), "list_sessions", big)
        else {
            panic!("expected tool result");
        };
        assert!(!is_error);
        assert!(result.contains("[truncated"));
    }
}
