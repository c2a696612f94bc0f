//! The engine: every operation the REST, WebSocket, and tool surfaces expose.
//!
//! [`ContextEngine`] is a cheap-to-clone handle over one [`ContextStore`], one
//! [`ModelBackend`], and one [`EventHandler`]. Synchronous operations finish
//! under short lock sections. Model-backed operations serialize the window
//! under its read lock, release it, and await the backend with the configured
//! timeout; optimization results are applied under the write lock only if the
//! window version has not moved.
//!
//! ```ignore
//! let engine = ContextEngine::builder(Arc::new(HeuristicBackend::new()))
//!     .with_event_handler(LoggingHandler)
//!     .build();
//! let session = engine.create_session(NewSession::named("chat"))?;
//! let window = engine.create_window(&session.id, NewWindow::sized(4096, 512))?;
//! engine.add_element(&window.id, NewElement::new("You are terse.", ElementKind::System))?;
//! let task = engine.optimize(&window.id, OptimizeRequest::new([OptimizationGoal::ReduceTokens]))?;
//! let done = engine.wait_for_task(&task.id).await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analysis::{AnalyzeRequest, ContextAnalysis, DEFAULT_ANALYSIS_TYPE, parse_analysis};
use crate::config::EngineConfig;
use crate::context::element::{ContextElement, NewElement};
use crate::context::session::{NewSession, SessionDetail, SessionInfo};
use crate::context::tokenizer::{CharRatioTokenizer, Tokenizer};
use crate::context::window::{AddedElement, NewWindow, WindowDetail, WindowInfo};
use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventHandler, NoopHandler};
use crate::model::{ModelBackend, ModelOperation, UsageSnapshot};
use crate::optimize::candidate::build_elements;
use crate::optimize::goals::{normalize_goals, parse_recommended_goals};
use crate::optimize::{
    OptimizationConstraints, OptimizationOutcome, OptimizationTask, OptimizeRequest,
};
use crate::store::{ContextStore, StoreStats};
use crate::template::{NewTemplate, PromptTemplate, RenderedTemplate, TemplateRequest};

/// Progress reported once goals are settled for an auto run.
const PROGRESS_GOALS_CHOSEN: u8 = 30;
/// Progress reported once the model has returned a candidate.
const PROGRESS_CANDIDATE_READY: u8 = 60;

struct EngineInner {
    config: EngineConfig,
    store: ContextStore,
    backend: Arc<dyn ModelBackend>,
    tokenizer: Arc<dyn Tokenizer>,
    handler: Arc<dyn EventHandler>,
}

/// Handle to the context engine. Clones share the same store.
#[derive(Clone)]
pub struct ContextEngine {
    inner: Arc<EngineInner>,
}

/// Builder for [`ContextEngine`].
pub struct ContextEngineBuilder {
    config: EngineConfig,
    backend: Arc<dyn ModelBackend>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    handler: Option<Arc<dyn EventHandler>>,
}

impl ContextEngineBuilder {
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default [`CharRatioTokenizer`].
    pub fn with_tokenizer(mut self, tokenizer: impl Tokenizer + 'static) -> Self {
        self.tokenizer = Some(Arc::new(tokenizer));
        self
    }

    pub fn with_event_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> ContextEngine {
        let tokenizer = self
            .tokenizer
            .unwrap_or_else(|| Arc::new(CharRatioTokenizer::new(self.config.chars_per_token)));
        ContextEngine {
            inner: Arc::new(EngineInner {
                config: self.config,
                store: ContextStore::new(),
                backend: self.backend,
                tokenizer,
                handler: self.handler.unwrap_or_else(|| Arc::new(NoopHandler)),
            }),
        }
    }
}

/// Engine-wide statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    #[serde(flatten)]
    pub store: StoreStats,
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_usage: Option<UsageSnapshot>,
}

impl ContextEngine {
    pub fn builder(backend: Arc<dyn ModelBackend>) -> ContextEngineBuilder {
        ContextEngineBuilder {
            config: EngineConfig::default(),
            backend,
            tokenizer: None,
            handler: None,
        }
    }

    /// Engine with default configuration and no event handler.
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self::builder(backend).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &ContextStore {
        &self.inner.store
    }

    pub fn backend_name(&self) -> &str {
        self.inner.backend.name()
    }

    fn emit(&self, event: EngineEvent<'_>) {
        self.inner.handler.on_event(&event);
    }

    // ── Sessions ──

    pub fn create_session(&self, params: NewSession) -> Result<SessionInfo> {
        let info = self.inner.store.create_session(params)?;
        self.emit(EngineEvent::SessionCreated(&info));
        Ok(info)
    }

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.inner.store.list_sessions()
    }

    pub fn get_session(&self, id: &str) -> Result<SessionDetail> {
        self.inner.store.session_detail(id)
    }

    pub fn delete_session(&self, id: &str) -> Result<()> {
        let window_ids = self.inner.store.delete_session(id)?;
        self.emit(EngineEvent::SessionDeleted {
            session_id: id,
            window_ids: &window_ids,
        });
        Ok(())
    }

    // ── Windows ──

    /// Create a window. Unset sizes come from the configuration; an omitted
    /// reserve is capped at a quarter of `max_tokens`.
    pub fn create_window(&self, session_id: &str, mut params: NewWindow) -> Result<WindowInfo> {
        let config = &self.inner.config;
        let max_tokens = *params.max_tokens.get_or_insert(config.default_max_tokens);
        params
            .reserved_tokens
            .get_or_insert(config.default_reserved_tokens.min(max_tokens / 4));
        let info = self.inner.store.create_window(
            session_id,
            params,
            Arc::clone(&self.inner.tokenizer),
        )?;
        self.emit(EngineEvent::WindowCreated(&info));
        Ok(info)
    }

    pub fn get_window(&self, id: &str) -> Result<WindowDetail> {
        let window = self.inner.store.window(id)?;
        let detail = window.read().unwrap_or_else(|e| e.into_inner()).detail();
        Ok(detail)
    }

    pub fn delete_window(&self, id: &str) -> Result<()> {
        let session_id = self.inner.store.delete_window(id)?;
        self.emit(EngineEvent::WindowDeleted {
            session_id: &session_id,
            window_id: id,
        });
        Ok(())
    }

    // ── Elements ──

    pub fn add_element(&self, window_id: &str, spec: NewElement) -> Result<AddedElement> {
        let window = self.inner.store.window(window_id)?;
        let (element, usage) = {
            let mut guard = window.write().unwrap_or_else(|e| e.into_inner());
            let element = guard.add_element(spec)?.clone();
            (element, guard.usage())
        };
        self.emit(EngineEvent::ElementAdded {
            window_id,
            element: &element,
            usage: &usage,
        });
        Ok(AddedElement {
            element_id: element.id().to_string(),
            token_count: element.token_count(),
            current_tokens: usage.current_tokens,
            utilization_ratio: usage.utilization_ratio,
        })
    }

    pub fn remove_element(&self, window_id: &str, element_id: &str) -> Result<ContextElement> {
        let window = self.inner.store.window(window_id)?;
        let (removed, usage) = {
            let mut guard = window.write().unwrap_or_else(|e| e.into_inner());
            let removed = guard.remove_element(element_id)?;
            (removed, guard.usage())
        };
        self.emit(EngineEvent::ElementRemoved {
            window_id,
            element_id,
            usage: &usage,
        });
        Ok(removed)
    }

    /// Elements in insertion order, optionally only those carrying `tag`.
    pub fn list_elements(&self, window_id: &str, tag: Option<&str>) -> Result<Vec<ContextElement>> {
        let window = self.inner.store.window(window_id)?;
        let guard = window.read().unwrap_or_else(|e| e.into_inner());
        Ok(match tag {
            Some(tag) => guard.elements_tagged(tag).into_iter().cloned().collect(),
            None => guard.elements().to_vec(),
        })
    }

    // ── Model calls ──

    /// Await a backend call under the configured timeout.
    async fn call_model<T>(
        &self,
        operation: ModelOperation,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let timeout = self.inner.config.upstream_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Model call {operation} timed out after {:.0}s",
                    timeout.as_secs_f64()
                );
                Err(Error::UpstreamTimeout(timeout))
            }
        }
    }

    // ── Analysis ──

    /// Score a window. Never modifies it.
    pub async fn analyze(&self, window_id: &str, request: AnalyzeRequest) -> Result<ContextAnalysis> {
        let window = self.inner.store.window(window_id)?;
        let (views, usage) = {
            let guard = window.read().unwrap_or_else(|e| e.into_inner());
            (guard.serialize(), guard.usage())
        };
        let analysis_type = request
            .analysis_type
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ANALYSIS_TYPE.to_string());
        debug!(
            "Analyzing {window_id} ({analysis_type}): {} element(s), {}",
            views.len(),
            usage.to_log_string()
        );
        let raw = self
            .call_model(ModelOperation::Analyze, self.inner.backend.score(&views))
            .await?;
        let analysis = parse_analysis(window_id, &analysis_type, &raw, views.len(), &usage)?;
        self.emit(EngineEvent::AnalysisCompleted(&analysis));
        Ok(analysis)
    }

    // ── Optimization ──

    /// Submit an optimization run and return its task immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn optimize(&self, window_id: &str, request: OptimizeRequest) -> Result<OptimizationTask> {
        self.inner.store.window(window_id)?;
        let goals = normalize_goals(&request.goals)?;
        self.submit(OptimizationTask::new(
            window_id,
            goals,
            request.constraints,
            false,
        ))
    }

    /// Submit a run whose goals are chosen by the model.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn auto_optimize(
        &self,
        window_id: &str,
        constraints: OptimizationConstraints,
    ) -> Result<OptimizationTask> {
        self.inner.store.window(window_id)?;
        self.submit(OptimizationTask::new(window_id, Vec::new(), constraints, true))
    }

    pub fn task(&self, id: &str) -> Result<OptimizationTask> {
        self.inner.store.tasks().get(id)
    }

    /// Resolve once the task completes or fails.
    pub async fn wait_for_task(&self, id: &str) -> Result<OptimizationTask> {
        self.inner.store.tasks().wait(id).await
    }

    fn submit(&self, task: OptimizationTask) -> Result<OptimizationTask> {
        let task_id = self.inner.store.tasks().insert(task.clone());
        info!(
            "Optimization task {task_id} submitted for {} (auto={})",
            task.context_id, task.auto
        );
        self.emit(EngineEvent::OptimizationStatus(&task));
        let engine = self.clone();
        tokio::spawn(async move { engine.run_task(task_id).await });
        Ok(task)
    }

    fn update_task(
        &self,
        id: &str,
        f: impl FnOnce(&mut OptimizationTask),
    ) -> Option<OptimizationTask> {
        let snapshot = self.inner.store.tasks().update(id, f)?;
        self.emit(EngineEvent::OptimizationStatus(&snapshot));
        Some(snapshot)
    }

    async fn run_task(&self, task_id: String) {
        let Some(task) = self.update_task(&task_id, OptimizationTask::start) else {
            return;
        };
        match self.execute(&task).await {
            Ok(outcome) => {
                self.update_task(&task_id, |t| t.complete(outcome));
            }
            Err(err) => {
                self.update_task(&task_id, |t| t.fail(&err));
            }
        }
    }

    async fn execute(&self, task: &OptimizationTask) -> Result<OptimizationOutcome> {
        let window = self.inner.store.window(&task.context_id)?;
        let (views, version) = {
            let guard = window.read().unwrap_or_else(|e| e.into_inner());
            (guard.serialize(), guard.version())
        };

        let goals = if task.auto {
            let recommendation = self
                .call_model(
                    ModelOperation::RecommendGoals,
                    self.inner.backend.recommend_goals(&views),
                )
                .await?;
            let goals = parse_recommended_goals(&recommendation.goals)?;
            debug!(
                "Task {}: model chose {goals:?} ({})",
                task.id, recommendation.reasoning
            );
            let chosen = goals.clone();
            self.update_task(&task.id, move |t| {
                t.goals = chosen;
                t.reasoning = Some(recommendation.reasoning);
                t.advance(PROGRESS_GOALS_CHOSEN);
            });
            goals
        } else {
            task.goals.clone()
        };

        let candidate = self
            .call_model(
                ModelOperation::Optimize,
                self.inner.backend.optimize(&views, &goals),
            )
            .await?;
        self.update_task(&task.id, |t| t.advance(PROGRESS_CANDIDATE_READY));

        let (outcome, usage) = {
            let mut guard = window.write().unwrap_or_else(|e| e.into_inner());
            if guard.is_retired() {
                return Err(Error::not_found("context window", &task.context_id));
            }
            if guard.version() != version {
                return Err(Error::OptimizationStale {
                    expected: version,
                    found: guard.version(),
                });
            }
            let original = (guard.current_tokens(), guard.len());
            let elements = build_elements(&guard, &candidate, &task.constraints)?;
            guard.replace_elements(version, elements)?;
            let outcome = OptimizationOutcome::new(
                original,
                (guard.current_tokens(), guard.len()),
                candidate.explanation.clone(),
            );
            (outcome, guard.usage())
        };
        self.emit(EngineEvent::WindowOptimized {
            window_id: &task.context_id,
            outcome: &outcome,
            usage: &usage,
        });
        Ok(outcome)
    }

    // ── Templates ──

    pub fn create_template(&self, params: NewTemplate) -> Result<PromptTemplate> {
        let template = self
            .inner
            .store
            .insert_template(PromptTemplate::new(params)?);
        self.emit(EngineEvent::TemplateCreated(&template));
        Ok(template)
    }

    pub fn list_templates(&self, category: Option<&str>) -> Vec<PromptTemplate> {
        self.inner.store.list_templates(category)
    }

    pub fn get_template(&self, id: &str) -> Result<PromptTemplate> {
        self.inner.store.template(id)
    }

    pub fn delete_template(&self, id: &str) -> Result<()> {
        self.inner.store.delete_template(id)?;
        self.emit(EngineEvent::TemplateDeleted { template_id: id });
        Ok(())
    }

    /// Render a template. `usage_count` only grows on success.
    pub fn render_template(
        &self,
        id: &str,
        vars: &HashMap<String, String>,
    ) -> Result<RenderedTemplate> {
        let rendered_content = self.inner.store.with_template_mut(id, |template| {
            let out = template.render(vars)?;
            template.record_use();
            Ok(out)
        })?;
        Ok(RenderedTemplate {
            template_id: id.to_string(),
            rendered_content,
        })
    }

    /// Ask the model for a template and register it.
    pub async fn generate_template(&self, request: TemplateRequest) -> Result<PromptTemplate> {
        request.validate()?;
        let generated = self
            .call_model(
                ModelOperation::GenerateTemplate,
                self.inner.backend.generate_template(&request),
            )
            .await?;
        let params = generated.into_new_template(&request.purpose);
        let template = PromptTemplate::new(params)
            .map_err(|e| Error::UpstreamError(format!("model produced an unusable template: {e}")))?;
        let template = self.inner.store.insert_template(template);
        self.emit(EngineEvent::TemplateCreated(&template));
        Ok(template)
    }

    // ── Stats ──

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            store: self.inner.store.stats(),
            backend: self.inner.backend.name().to_string(),
            model_usage: self.inner.backend.usage(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use futures::future::BoxFuture;
    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::context::element::{ElementKind, ElementView};
    use crate::events::FnEventHandler;
    use crate::model::GoalRecommendation;
    use crate::optimize::{
        CandidateElement, OptimizationCandidate, OptimizationGoal, TaskStatus,
    };
    use crate::template::GeneratedTemplate;

    type CandidateFn = Box<dyn Fn(&[ElementView]) -> OptimizationCandidate + Send + Sync>;

    /// Backend with canned replies and optional gating.
    struct ScriptedBackend {
        score: serde_json::Value,
        candidate: CandidateFn,
        goals: Vec<String>,
        delay: Duration,
        /// (started, release): optimize signals `started`, then waits for `release`.
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl ScriptedBackend {
        fn new() -> Self {
            Self {
                score: json!({
                    "quality_score": 82,
                    "metrics": {"coherence": 0.9},
                    "insights": ["Clear"],
                    "recommendations": ["Add examples"]
                }),
                candidate: Box::new(|views| OptimizationCandidate {
                    elements: views.iter().skip(1).map(keep).collect(),
                    explanation: "dropped the first element".into(),
                }),
                goals: vec!["remove_redundancy".into()],
                delay: Duration::ZERO,
                gate: None,
            }
        }
    }

    fn keep(view: &ElementView) -> CandidateElement {
        CandidateElement {
            source_id: Some(view.id.clone()),
            content: view.content.clone(),
            kind: Some(view.kind),
            priority: Some(view.priority),
            modality: view.modality,
            tags: Some(view.tags.clone()),
            token_count: Some(view.token_count),
        }
    }

    impl ModelBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn score<'a>(
            &'a self,
            _elements: &'a [ElementView],
        ) -> BoxFuture<'a, Result<serde_json::Value>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                Ok(self.score.clone())
            })
        }

        fn optimize<'a>(
            &'a self,
            elements: &'a [ElementView],
            _goals: &'a [OptimizationGoal],
        ) -> BoxFuture<'a, Result<OptimizationCandidate>> {
            Box::pin(async move {
                if let Some((started, release)) = &self.gate {
                    started.notify_one();
                    release.notified().await;
                }
                Ok((self.candidate)(elements))
            })
        }

        fn recommend_goals<'a>(
            &'a self,
            _elements: &'a [ElementView],
        ) -> BoxFuture<'a, Result<GoalRecommendation>> {
            Box::pin(async move {
                Ok(GoalRecommendation {
                    goals: self.goals.clone(),
                    reasoning: "repeated content".into(),
                })
            })
        }

        fn generate_template<'a>(
            &'a self,
            request: &'a TemplateRequest,
        ) -> BoxFuture<'a, Result<GeneratedTemplate>> {
            Box::pin(async move {
                Ok(GeneratedTemplate {
                    name: String::new(),
                    template: format!("For {}: {{input}} with {{tone}}", request.purpose),
                    description: String::new(),
                    kind: None,
                    category: None,
                    tags: vec![],
                })
            })
        }
    }

    fn engine_with(backend: ScriptedBackend) -> ContextEngine {
        ContextEngine::new(Arc::new(backend))
    }

    fn window(engine: &ContextEngine, max: usize, reserved: usize) -> String {
        let session = engine.create_session(NewSession::named("test")).unwrap();
        engine
            .create_window(&session.id, NewWindow::sized(max, reserved))
            .unwrap()
            .id
    }

    fn text(tokens: usize) -> String {
        "x".repeat(tokens * 4)
    }

    #[test]
    fn capacity_scenario() {
        let engine = engine_with(ScriptedBackend::new());
        let w = window(&engine, 100, 20);
        let added = engine
            .add_element(&w, NewElement::new(text(70), ElementKind::User))
            .unwrap();
        assert_eq!(added.current_tokens, 70);
        assert_eq!(added.utilization_ratio, 0.875);

        let err = engine
            .add_element(&w, NewElement::new(text(15), ElementKind::User))
            .unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { requested: 15, .. }));
        assert_eq!(engine.get_window(&w).unwrap().info.current_tokens, 70);
    }

    #[test]
    fn remove_then_readd_restores_tokens() {
        let engine = engine_with(ScriptedBackend::new());
        let w = window(&engine, 1000, 0);
        let a = engine
            .add_element(&w, NewElement::new(text(10), ElementKind::User))
            .unwrap();
        engine
            .add_element(&w, NewElement::new(text(5), ElementKind::User))
            .unwrap();
        engine.remove_element(&w, &a.element_id).unwrap();
        assert_eq!(engine.get_window(&w).unwrap().info.current_tokens, 5);
        engine
            .add_element(&w, NewElement::new(text(10), ElementKind::User))
            .unwrap();
        assert_eq!(engine.get_window(&w).unwrap().info.current_tokens, 15);
        assert!(matches!(
            engine.remove_element(&w, &a.element_id),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn omitted_sizes_use_config_defaults() {
        let engine = engine_with(ScriptedBackend::new());
        let s = engine.create_session(NewSession::named("s")).unwrap();
        let info = engine.create_window(&s.id, NewWindow::default()).unwrap();
        assert_eq!(info.max_tokens, 8192);
        assert_eq!(info.reserved_tokens, 512);

        let small = NewWindow {
            max_tokens: Some(100),
            ..Default::default()
        };
        let info = engine.create_window(&s.id, small).unwrap();
        assert_eq!(info.reserved_tokens, 25);
    }

    #[test]
    fn list_elements_filters_by_tag() {
        let engine = engine_with(ScriptedBackend::new());
        let w = window(&engine, 1000, 0);
        engine
            .add_element(&w, NewElement::new("a", ElementKind::User).with_tag("faq"))
            .unwrap();
        engine
            .add_element(&w, NewElement::new("b", ElementKind::User))
            .unwrap();
        assert_eq!(engine.list_elements(&w, None).unwrap().len(), 2);
        let tagged = engine.list_elements(&w, Some("faq")).unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].content(), "a");
    }

    #[test]
    fn events_follow_mutations() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let engine = ContextEngine::builder(Arc::new(ScriptedBackend::new()))
            .with_event_handler(FnEventHandler::new(move |event| {
                sink.lock().unwrap().push(event.name());
            }))
            .build();
        let w = window(&engine, 1000, 0);
        let added = engine
            .add_element(&w, NewElement::new("hi", ElementKind::User))
            .unwrap();
        engine.remove_element(&w, &added.element_id).unwrap();
        engine.delete_window(&w).unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            [
                "session_created",
                "window_created",
                "element_added",
                "element_removed",
                "window_deleted"
            ]
        );
    }

    #[test]
    fn deleting_session_makes_windows_unreachable() {
        let engine = engine_with(ScriptedBackend::new());
        let s = engine.create_session(NewSession::named("s")).unwrap();
        let w = engine.create_window(&s.id, NewWindow::default()).unwrap();
        engine.delete_session(&s.id).unwrap();
        assert!(matches!(engine.get_window(&w.id), Err(Error::NotFound { .. })));
        assert!(matches!(engine.get_session(&s.id), Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn analysis_adds_local_metrics_and_leaves_window_alone() {
        let engine = engine_with(ScriptedBackend::new());
        let w = window(&engine, 100, 20);
        engine
            .add_element(&w, NewElement::new(text(40), ElementKind::User))
            .unwrap();
        let before = engine.get_window(&w).unwrap().info.version;
        let analysis = engine.analyze(&w, AnalyzeRequest::default()).await.unwrap();
        assert_eq!(analysis.analysis_type, "comprehensive");
        assert_eq!(analysis.quality_score, 82.0);
        assert_eq!(analysis.metrics["element_count"], 1.0);
        assert_eq!(analysis.metrics["utilization_ratio"], 0.5);
        assert_eq!(engine.get_window(&w).unwrap().info.version, before);
    }

    #[tokio::test]
    async fn malformed_analysis_is_reported() {
        let mut backend = ScriptedBackend::new();
        backend.score = json!({"quality_score": "great", "metrics": {}, "insights": [], "recommendations": []});
        let engine = engine_with(backend);
        let w = window(&engine, 100, 0);
        let err = engine.analyze(&w, AnalyzeRequest::default()).await.unwrap_err();
        assert!(matches!(err, Error::MalformedAnalysisResult(_)));
    }

    #[tokio::test]
    async fn slow_model_times_out() {
        let mut backend = ScriptedBackend::new();
        backend.delay = Duration::from_secs(5);
        let engine = ContextEngine::builder(Arc::new(backend))
            .with_config(EngineConfig::default().with_upstream_timeout(Duration::from_millis(50)))
            .build();
        let w = window(&engine, 100, 0);
        let err = engine.analyze(&w, AnalyzeRequest::default()).await.unwrap_err();
        assert_eq!(err, Error::UpstreamTimeout(Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn optimization_applies_candidate() {
        let engine = engine_with(ScriptedBackend::new());
        let w = window(&engine, 1000, 0);
        for n in [10, 20, 30] {
            engine
                .add_element(&w, NewElement::new(text(n), ElementKind::User))
                .unwrap();
        }
        let kept: Vec<String> = engine.get_window(&w).unwrap().elements[1..]
            .iter()
            .map(|e| e.id().to_string())
            .collect();

        let task = engine
            .optimize(&w, OptimizeRequest::new([OptimizationGoal::ReduceTokens]))
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        let done = engine.wait_for_task(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.progress, 100);
        let outcome = done.result.unwrap();
        assert_eq!(outcome.original_tokens, 60);
        assert_eq!(outcome.optimized_tokens, 50);
        assert_eq!(outcome.tokens_saved, 10);

        let detail = engine.get_window(&w).unwrap();
        let ids: Vec<String> = detail.elements.iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids, kept);
        assert_eq!(detail.info.current_tokens, 50);
    }

    #[tokio::test]
    async fn oversized_candidate_fails_task_and_keeps_window() {
        let mut backend = ScriptedBackend::new();
        backend.candidate = Box::new(|_| OptimizationCandidate {
            elements: vec![CandidateElement::new("y".repeat(400))],
            explanation: "expanded".into(),
        });
        let engine = engine_with(backend);
        let w = window(&engine, 100, 20);
        engine
            .add_element(&w, NewElement::new(text(10), ElementKind::User))
            .unwrap();
        let before = engine.get_window(&w).unwrap();

        let task = engine
            .optimize(&w, OptimizeRequest::new([OptimizationGoal::ImproveClarity]))
            .unwrap();
        let done = engine.wait_for_task(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Failed);
        assert_eq!(done.failure.unwrap().code, "candidate_exceeds_capacity");

        let after = engine.get_window(&w).unwrap();
        assert_eq!(after.info.version, before.info.version);
        assert_eq!(after.info.current_tokens, 10);
    }

    #[tokio::test]
    async fn target_tokens_prunes_candidate() {
        let mut backend = ScriptedBackend::new();
        backend.candidate = Box::new(|views| OptimizationCandidate {
            elements: views.iter().map(keep).collect(),
            explanation: "kept all".into(),
        });
        let engine = engine_with(backend);
        let w = window(&engine, 1000, 0);
        for (n, p) in [(10, 8), (10, 2), (10, 5)] {
            engine
                .add_element(
                    &w,
                    NewElement::new(text(n), ElementKind::User).with_priority(p),
                )
                .unwrap();
        }
        let task = engine
            .optimize(
                &w,
                OptimizeRequest::new([OptimizationGoal::ReduceTokens]).with_target_tokens(20),
            )
            .unwrap();
        let done = engine.wait_for_task(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        let priorities: Vec<u8> = engine
            .list_elements(&w, None)
            .unwrap()
            .iter()
            .map(ContextElement::priority)
            .collect();
        assert_eq!(priorities, [8, 5]);
    }

    #[tokio::test]
    async fn concurrent_edit_makes_optimization_stale() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut backend = ScriptedBackend::new();
        backend.gate = Some((started.clone(), release.clone()));
        let engine = engine_with(backend);
        let w = window(&engine, 1000, 0);
        engine
            .add_element(&w, NewElement::new(text(5), ElementKind::User))
            .unwrap();

        let task = engine
            .optimize(&w, OptimizeRequest::new([OptimizationGoal::ReduceTokens]))
            .unwrap();
        started.notified().await;
        engine
            .add_element(&w, NewElement::new(text(5), ElementKind::User))
            .unwrap();
        release.notify_one();

        let done = engine.wait_for_task(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Failed);
        assert_eq!(done.failure.unwrap().code, "optimization_stale");
        assert_eq!(engine.list_elements(&w, None).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn window_deleted_mid_optimization_fails_task() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut backend = ScriptedBackend::new();
        backend.gate = Some((started.clone(), release.clone()));
        let (tx, rx) = std::sync::mpsc::channel();
        let engine = ContextEngine::builder(Arc::new(backend))
            .with_event_handler(FnEventHandler::new(move |event: &EngineEvent<'_>| {
                if let EngineEvent::WindowOptimized { window_id, .. } = event {
                    let _ = tx.send(window_id.to_string());
                }
            }))
            .build();
        let w = window(&engine, 1000, 0);
        engine
            .add_element(&w, NewElement::new(text(5), ElementKind::User))
            .unwrap();

        let task = engine
            .optimize(&w, OptimizeRequest::new([OptimizationGoal::ReduceTokens]))
            .unwrap();
        started.notified().await;
        engine.delete_window(&w).unwrap();
        release.notify_one();

        let done = engine.wait_for_task(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Failed);
        assert_eq!(done.failure.unwrap().code, "not_found");
        assert!(done.result.is_none());
        assert!(matches!(engine.get_window(&w), Err(Error::NotFound { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_goals_are_rejected_up_front() {
        let engine = engine_with(ScriptedBackend::new());
        let w = window(&engine, 100, 0);
        let err = engine.optimize(&w, OptimizeRequest::new([])).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(engine.store().tasks().is_empty());
    }

    #[tokio::test]
    async fn auto_optimize_records_goals_and_reasoning() {
        let engine = engine_with(ScriptedBackend::new());
        let w = window(&engine, 1000, 0);
        engine
            .add_element(&w, NewElement::new("dup", ElementKind::User))
            .unwrap();
        engine
            .add_element(&w, NewElement::new("dup", ElementKind::User))
            .unwrap();
        let task = engine.auto_optimize(&w, Default::default()).unwrap();
        assert!(task.auto);
        let done = engine.wait_for_task(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.goals, [OptimizationGoal::RemoveRedundancy]);
        assert_eq!(done.reasoning.as_deref(), Some("repeated content"));
    }

    #[tokio::test]
    async fn auto_optimize_rejects_unknown_goals() {
        let mut backend = ScriptedBackend::new();
        backend.goals = vec!["make_it_pop".into()];
        let engine = engine_with(backend);
        let w = window(&engine, 1000, 0);
        let task = engine.auto_optimize(&w, Default::default()).unwrap();
        let done = engine.wait_for_task(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Failed);
        assert_eq!(done.failure.unwrap().code, "upstream_error");
    }

    #[tokio::test]
    async fn optimize_unknown_window_is_not_found() {
        let engine = engine_with(ScriptedBackend::new());
        let err = engine
            .optimize("missing", OptimizeRequest::new([OptimizationGoal::ReduceTokens]))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(matches!(engine.task("missing"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn render_counts_only_successful_uses() {
        let engine = engine_with(ScriptedBackend::new());
        let t = engine
            .create_template(NewTemplate::new("greet", "Hello {name}!"))
            .unwrap();
        let err = engine.render_template(&t.id, &HashMap::new()).unwrap_err();
        assert_eq!(err, Error::MissingVariable(vec!["name".into()]));

        let vars = HashMap::from([("name".to_string(), "Ada".to_string())]);
        let out = engine.render_template(&t.id, &vars).unwrap();
        assert_eq!(out.rendered_content, "Hello Ada!");
        assert_eq!(engine.get_template(&t.id).unwrap().usage_count, 1);

        engine.delete_template(&t.id).unwrap();
        assert!(matches!(
            engine.render_template(&t.id, &vars),
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn generated_template_is_registered() {
        let engine = engine_with(ScriptedBackend::new());
        let t = engine
            .generate_template(TemplateRequest {
                purpose: "support replies".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(t.variables(), ["input", "tone"]);
        assert!(t.tags.contains(&"ai-generated".to_string()));
        assert_eq!(engine.list_templates(None).len(), 1);

        let err = engine
            .generate_template(TemplateRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn stats_name_backend() {
        let engine = engine_with(ScriptedBackend::new());
        window(&engine, 100, 0);
        let stats = engine.stats();
        assert_eq!(stats.backend, "scripted");
        assert_eq!(stats.store.sessions, 1);
        assert_eq!(stats.store.windows, 1);
        assert!(stats.model_usage.is_none());
    }
}
