//! Serializable view of the engine for WebSocket and REST transport.
//!
//! A snapshot is what a client needs to render a dashboard from scratch:
//! engine statistics plus the session list. Window contents are fetched
//! per window over REST.

use ctxwin::ContextEngine;
use ctxwin::EngineStats;
use ctxwin::context::SessionInfo;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct StateSnapshot {
    pub stats: EngineStats,
    /// Sessions, oldest first.
    pub sessions: Vec<SessionInfo>,
}

impl StateSnapshot {
    pub fn capture(engine: &ContextEngine) -> Self {
        Self {
            stats: engine.stats(),
            sessions: engine.list_sessions(),
        }
    }

    /// JSON form used in [`WsMessage::Snapshot`](crate::WsMessage::Snapshot).
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ctxwin::context::NewSession;
    use ctxwin::model::HeuristicBackend;

    use super::*;

    #[test]
    fn snapshot_lists_sessions_and_stats() {
        let engine = ContextEngine::new(Arc::new(HeuristicBackend::new()));
        engine.create_session(NewSession::named("a")).unwrap();
        let json = StateSnapshot::capture(&engine).to_json();
        assert_eq!(json["stats"]["sessions"], 1);
        assert_eq!(json["sessions"][0]["name"], "a");
    }
}
