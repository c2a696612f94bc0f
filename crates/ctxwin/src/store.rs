//! The single in-memory store behind the engine.
//!
//! Lock order is always sessions map, then window index, then an individual
//! window. Map locks may be held while a window lock is taken, never the
//! reverse.
//!
//! Deleting a window retires it under its own write lock, so a task still
//! holding the handle sees the deletion instead of rewriting an orphan.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::context::session::{
    NewSession, Session, SessionDetail, SessionId, SessionInfo, SharedWindow,
};
use crate::context::tokenizer::Tokenizer;
use crate::context::window::{ContextWindow, NewWindow, WindowId, WindowInfo};
use crate::error::{Error, Result};
use crate::optimize::{TaskCounts, TaskRegistry};
use crate::template::{PromptTemplate, TemplateId};

/// Owns every session, window, template, and optimization task.
#[derive(Default)]
pub struct ContextStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    /// Direct window lookup; entries always point into a live session.
    windows: RwLock<HashMap<WindowId, SharedWindow>>,
    templates: RwLock<HashMap<TemplateId, PromptTemplate>>,
    tasks: TaskRegistry,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Sessions ──

    pub fn create_session(&self, params: NewSession) -> Result<SessionInfo> {
        let session = Session::new(params)?;
        let info = session.info();
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(info.id.clone(), session);
        Ok(info)
    }

    /// Session summaries, oldest first.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        let mut infos: Vec<SessionInfo> = sessions.values().map(Session::info).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    pub fn session_detail(&self, id: &str) -> Result<SessionDetail> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(id)
            .map(Session::detail)
            .ok_or_else(|| Error::not_found("session", id))
    }

    /// Remove a session and every window it owns. Returns the dropped window ids.
    pub fn delete_session(&self, id: &str) -> Result<Vec<WindowId>> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let session = sessions
            .remove(id)
            .ok_or_else(|| Error::not_found("session", id))?;
        let window_ids: Vec<WindowId> = session.window_ids().cloned().collect();
        let mut index = self.windows.write().unwrap_or_else(|e| e.into_inner());
        for window_id in &window_ids {
            if let Some(shared) = index.remove(window_id) {
                shared.write().unwrap_or_else(|e| e.into_inner()).retire();
            }
        }
        Ok(window_ids)
    }

    // ── Windows ──

    /// Create a window inside `session_id`. Both maps are updated under the
    /// sessions write lock, so a concurrent session delete cannot strand it.
    pub fn create_window(
        &self,
        session_id: &str,
        params: NewWindow,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<WindowInfo> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::not_found("session", session_id))?;
        let window = ContextWindow::new(session_id, params, tokenizer)?;
        let info = window.info();
        let shared: SharedWindow = Arc::new(RwLock::new(window));
        session.insert_window(info.id.clone(), shared.clone());
        self.windows
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(info.id.clone(), shared);
        Ok(info)
    }

    pub fn window(&self, id: &str) -> Result<SharedWindow> {
        self.windows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("context window", id))
    }

    /// Remove a window from its session. Returns the owning session id.
    pub fn delete_window(&self, id: &str) -> Result<SessionId> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let shared = self
            .windows
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .ok_or_else(|| Error::not_found("context window", id))?;
        let session_id = {
            let mut window = shared.write().unwrap_or_else(|e| e.into_inner());
            window.retire();
            window.session_id().to_string()
        };
        if let Some(session) = sessions.get_mut(&session_id) {
            session.remove_window(id);
        }
        Ok(session_id)
    }

    pub fn window_count(&self) -> usize {
        self.windows.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    // ── Templates ──

    pub fn insert_template(&self, template: PromptTemplate) -> PromptTemplate {
        self.templates
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(template.id.clone(), template.clone());
        template
    }

    pub fn template(&self, id: &str) -> Result<PromptTemplate> {
        self.templates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("template", id))
    }

    /// Templates, oldest first, optionally filtered by category.
    pub fn list_templates(&self, category: Option<&str>) -> Vec<PromptTemplate> {
        let map = self.templates.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<PromptTemplate> = map
            .values()
            .filter(|t| category.is_none_or(|c| t.category == c))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub fn delete_template(&self, id: &str) -> Result<()> {
        self.templates
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("template", id))
    }

    /// Run `f` against a template under the write lock.
    pub(crate) fn with_template_mut<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut PromptTemplate) -> Result<T>,
    ) -> Result<T> {
        let mut map = self.templates.write().unwrap_or_else(|e| e.into_inner());
        let template = map
            .get_mut(id)
            .ok_or_else(|| Error::not_found("template", id))?;
        f(template)
    }

    // ── Tasks ──

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    // ── Stats ──

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        let mut utilization_sum = 0.0;
        {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            stats.sessions = sessions.len();
            for session in sessions.values() {
                let s = session.statistics();
                stats.windows += s.total_windows;
                stats.elements += s.total_elements;
                stats.tokens += s.total_tokens;
                utilization_sum += s.average_utilization * s.total_windows as f64;
            }
        }
        if stats.windows > 0 {
            stats.average_utilization = utilization_sum / stats.windows as f64;
        }
        {
            let templates = self.templates.read().unwrap_or_else(|e| e.into_inner());
            stats.templates = templates.len();
            stats.template_renders = templates.values().map(|t| t.usage_count).sum();
        }
        stats.tasks = self.tasks.counts();
        stats
    }
}

/// Store-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub sessions: usize,
    pub windows: usize,
    pub elements: usize,
    pub tokens: usize,
    pub average_utilization: f64,
    pub templates: usize,
    pub template_renders: u64,
    pub tasks: TaskCounts,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::element::{ElementKind, NewElement};
    use crate::context::tokenizer::CharRatioTokenizer;
    use crate::template::NewTemplate;

    fn tokenizer() -> Arc<dyn Tokenizer> {
        Arc::new(CharRatioTokenizer::default())
    }

    #[test]
    fn window_lookup_by_id() {
        let store = ContextStore::new();
        let session = store.create_session(NewSession::named("s")).unwrap();
        let info = store
            .create_window(&session.id, NewWindow::sized(100, 10), tokenizer())
            .unwrap();
        let window = store.window(&info.id).unwrap();
        assert_eq!(window.read().unwrap().session_id(), session.id);
        assert_eq!(store.session_detail(&session.id).unwrap().windows.len(), 1);
    }

    #[test]
    fn window_in_unknown_session_is_not_found() {
        let store = ContextStore::new();
        let err = store
            .create_window("nope", NewWindow::default(), tokenizer())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(store.window_count(), 0);
    }

    #[test]
    fn deleting_session_drops_its_windows() {
        let store = ContextStore::new();
        let session = store.create_session(NewSession::named("s")).unwrap();
        let w1 = store
            .create_window(&session.id, NewWindow::default(), tokenizer())
            .unwrap();
        let w2 = store
            .create_window(&session.id, NewWindow::default(), tokenizer())
            .unwrap();
        let held = store.window(&w1.id).unwrap();
        let dropped = store.delete_session(&session.id).unwrap();
        assert_eq!(dropped.len(), 2);
        assert!(held.read().unwrap().is_retired());
        assert!(store.window(&w1.id).is_err());
        assert!(store.window(&w2.id).is_err());
        assert!(store.delete_session(&session.id).is_err());
    }

    #[test]
    fn deleting_window_updates_session() {
        let store = ContextStore::new();
        let session = store.create_session(NewSession::named("s")).unwrap();
        let w = store
            .create_window(&session.id, NewWindow::default(), tokenizer())
            .unwrap();
        let held = store.window(&w.id).unwrap();
        assert_eq!(store.delete_window(&w.id).unwrap(), session.id);
        assert!(held.read().unwrap().is_retired());
        assert_eq!(store.session_detail(&session.id).unwrap().windows.len(), 0);
        assert!(matches!(
            store.delete_window(&w.id),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn stats_aggregate_across_sessions() {
        let store = ContextStore::new();
        for name in ["a", "b"] {
            let s = store.create_session(NewSession::named(name)).unwrap();
            let w = store
                .create_window(&s.id, NewWindow::sized(100, 20), tokenizer())
                .unwrap();
            store
                .window(&w.id)
                .unwrap()
                .write()
                .unwrap()
                .add_element(NewElement::new("a".repeat(160), ElementKind::User))
                .unwrap();
        }
        store.insert_template(PromptTemplate::new(NewTemplate::new("t", "{x}")).unwrap());
        let stats = store.stats();
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.windows, 2);
        assert_eq!(stats.elements, 2);
        assert_eq!(stats.tokens, 80);
        assert!((stats.average_utilization - 0.5).abs() < 1e-9);
        assert_eq!(stats.templates, 1);
    }

    #[test]
    fn templates_filter_by_category() {
        let store = ContextStore::new();
        let mut code = NewTemplate::new("review", "Review {code}");
        code.category = "code".into();
        store.insert_template(PromptTemplate::new(code).unwrap());
        store.insert_template(PromptTemplate::new(NewTemplate::new("hi", "Hi {name}")).unwrap());
        assert_eq!(store.list_templates(None).len(), 2);
        assert_eq!(store.list_templates(Some("code")).len(), 1);
        assert_eq!(store.list_templates(Some("missing")).len(), 0);
    }
}
