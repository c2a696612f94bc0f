//! Sessions: named groups of context windows.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::window::{ContextWindow, WindowId, WindowInfo};
use crate::error::{Error, Result};

/// Identifier of a session.
pub type SessionId = String;

/// A window behind its own lock. Mutations take the write side; reads
/// (utilization, serialization, views) share the read side.
pub type SharedWindow = Arc<RwLock<ContextWindow>>;

/// Caller-supplied parameters for a new session.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default)]
pub struct NewSession {
    /// Human-readable session name. Must not be blank.
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewSession {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidArgument("session name must not be empty".into()));
        }
        Ok(())
    }
}

/// Owns a set of windows. Dropping the session drops its windows.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    name: String,
    description: String,
    created_at: DateTime<Utc>,
    windows: HashMap<WindowId, SharedWindow>,
}

impl Session {
    pub fn new(params: NewSession) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: params.name,
            description: params.description.unwrap_or_default(),
            created_at: Utc::now(),
            windows: HashMap::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window(&self, id: &str) -> Option<&SharedWindow> {
        self.windows.get(id)
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn window_ids(&self) -> impl Iterator<Item = &WindowId> {
        self.windows.keys()
    }

    pub(crate) fn insert_window(&mut self, id: WindowId, window: SharedWindow) {
        self.windows.insert(id, window);
    }

    pub(crate) fn remove_window(&mut self, id: &str) -> Option<SharedWindow> {
        self.windows.remove(id)
    }

    /// Window summaries, oldest first.
    pub fn window_infos(&self) -> Vec<WindowInfo> {
        let mut infos: Vec<WindowInfo> = self
            .windows
            .values()
            .map(|w| w.read().unwrap_or_else(|e| e.into_inner()).info())
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    /// Aggregate counters over every window in the session.
    pub fn statistics(&self) -> SessionStats {
        let mut stats = SessionStats::default();
        let mut utilization_sum = 0.0;
        for window in self.windows.values() {
            let window = window.read().unwrap_or_else(|e| e.into_inner());
            stats.total_windows += 1;
            stats.total_elements += window.len();
            stats.total_tokens += window.current_tokens();
            utilization_sum += window.utilization();
        }
        if stats.total_windows > 0 {
            stats.average_utilization = utilization_sum / stats.total_windows as f64;
        }
        stats
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            window_count: self.windows.len(),
        }
    }

    pub fn detail(&self) -> SessionDetail {
        SessionDetail {
            info: self.info(),
            windows: self.window_infos(),
            statistics: self.statistics(),
        }
    }
}

/// Aggregate counters for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub total_windows: usize,
    pub total_elements: usize,
    pub total_tokens: usize,
    pub average_utilization: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub window_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub info: SessionInfo,
    pub windows: Vec<WindowInfo>,
    pub statistics: SessionStats,
}
