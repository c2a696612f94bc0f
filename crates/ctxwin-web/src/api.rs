//! REST API endpoint handlers.
//!
//! Every engine operation has a route. Failures are rendered as
//! `{"error": {"code", "message"}}` with a status derived from the error kind.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ctxwin::analysis::{AnalyzeRequest, ContextAnalysis};
use ctxwin::context::{
    AddedElement, ContextElement, NewElement, NewSession, NewWindow, SessionDetail, SessionInfo,
    WindowDetail, WindowInfo,
};
use ctxwin::optimize::{OptimizationConstraints, OptimizationTask, OptimizeRequest};
use ctxwin::template::{
    NewTemplate, PromptTemplate, RenderRequest, RenderedTemplate, TemplateRequest,
    variables_from_json,
};
use ctxwin::tools::ToolSet;
use ctxwin::{ContextEngine, EngineStats, Error, ToolDef};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

/// Shared application state passed to all handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub engine: ContextEngine,
    pub tools: Arc<ToolSet>,
}

// ── Errors ─────────────────────────────────────────────────────────

/// An error response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_argument",
            message: message.into(),
        }
    }
}

/// HTTP status for an engine error.
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        Error::CapacityExceeded { .. }
        | Error::OptimizationStale { .. }
        | Error::CandidateExceedsCapacity { .. } => StatusCode::CONFLICT,
        Error::MissingVariable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::MalformedAnalysisResult(_) | Error::UpstreamError(_) => StatusCode::BAD_GATEWAY,
        Error::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self {
            status: status_for(&error),
            code: error.code(),
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!("{} {}: {}", self.status.as_u16(), self.code, self.message);
        } else {
            debug!("{} {}: {}", self.status.as_u16(), self.code, self.message);
        }
        let body = json!({"error": {"code": self.code, "message": self.message}});
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Parse a JSON request body. An empty body means "all defaults".
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid request body: {e}")))
}

// ── Health & stats ─────────────────────────────────────────────────

/// GET /api/health
pub async fn health(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "backend": app.engine.backend_name()}))
}

/// GET /api/stats
pub async fn stats(State(app): State<AppState>) -> Json<EngineStats> {
    Json(app.engine.stats())
}

// ── Sessions ───────────────────────────────────────────────────────

/// POST /api/sessions
pub async fn create_session(
    State(app): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SessionInfo>)> {
    let params: NewSession = parse_body(&body)?;
    Ok((StatusCode::CREATED, Json(app.engine.create_session(params)?)))
}

/// GET /api/sessions
pub async fn list_sessions(State(app): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(app.engine.list_sessions())
}

/// GET /api/sessions/{id}
pub async fn get_session(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionDetail>> {
    Ok(Json(app.engine.get_session(&id)?))
}

/// DELETE /api/sessions/{id}
pub async fn delete_session(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    app.engine.delete_session(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Windows ────────────────────────────────────────────────────────

/// POST /api/sessions/{id}/windows
pub async fn create_window(
    State(app): State<AppState>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<WindowInfo>)> {
    let params: NewWindow = parse_body(&body)?;
    Ok((
        StatusCode::CREATED,
        Json(app.engine.create_window(&session_id, params)?),
    ))
}

/// GET /api/contexts/{id}
pub async fn get_window(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WindowDetail>> {
    Ok(Json(app.engine.get_window(&id)?))
}

/// DELETE /api/contexts/{id}
pub async fn delete_window(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    app.engine.delete_window(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Elements ───────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ElementQuery {
    pub tag: Option<String>,
}

/// GET /api/contexts/{id}/elements?tag=
pub async fn list_elements(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ElementQuery>,
) -> ApiResult<Json<Vec<ContextElement>>> {
    Ok(Json(app.engine.list_elements(&id, query.tag.as_deref())?))
}

/// POST /api/contexts/{id}/elements
pub async fn add_element(
    State(app): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<AddedElement>)> {
    let spec: NewElement = parse_body(&body)?;
    Ok((StatusCode::CREATED, Json(app.engine.add_element(&id, spec)?)))
}

/// DELETE /api/contexts/{id}/elements/{element_id}
pub async fn remove_element(
    State(app): State<AppState>,
    Path((id, element_id)): Path<(String, String)>,
) -> ApiResult<Json<ContextElement>> {
    Ok(Json(app.engine.remove_element(&id, &element_id)?))
}

// ── Analysis & optimization ────────────────────────────────────────

/// POST /api/contexts/{id}/analyze
pub async fn analyze(
    State(app): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<ContextAnalysis>> {
    let request: AnalyzeRequest = parse_body(&body)?;
    Ok(Json(app.engine.analyze(&id, request).await?))
}

/// POST /api/contexts/{id}/optimize
pub async fn optimize(
    State(app): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<OptimizationTask>)> {
    let request: OptimizeRequest = parse_body(&body)?;
    Ok((StatusCode::ACCEPTED, Json(app.engine.optimize(&id, request)?)))
}

#[derive(Deserialize, Default)]
pub struct AutoOptimizeBody {
    #[serde(default)]
    pub constraints: OptimizationConstraints,
}

/// POST /api/contexts/{id}/auto-optimize
pub async fn auto_optimize(
    State(app): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<OptimizationTask>)> {
    let request: AutoOptimizeBody = parse_body(&body)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(app.engine.auto_optimize(&id, request.constraints)?),
    ))
}

/// GET /api/optimization/{task_id}
pub async fn get_task(
    State(app): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<OptimizationTask>> {
    Ok(Json(app.engine.task(&task_id)?))
}

// ── Templates ──────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct TemplateQuery {
    pub category: Option<String>,
}

/// POST /api/templates
pub async fn create_template(
    State(app): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<PromptTemplate>)> {
    let params: NewTemplate = parse_body(&body)?;
    Ok((StatusCode::CREATED, Json(app.engine.create_template(params)?)))
}

/// GET /api/templates?category=
pub async fn list_templates(
    State(app): State<AppState>,
    Query(query): Query<TemplateQuery>,
) -> Json<Vec<PromptTemplate>> {
    Json(app.engine.list_templates(query.category.as_deref()))
}

/// POST /api/templates/generate
pub async fn generate_template(
    State(app): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<PromptTemplate>)> {
    let request: TemplateRequest = parse_body(&body)?;
    Ok((
        StatusCode::CREATED,
        Json(app.engine.generate_template(request).await?),
    ))
}

/// GET /api/templates/{id}
pub async fn get_template(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PromptTemplate>> {
    Ok(Json(app.engine.get_template(&id)?))
}

/// DELETE /api/templates/{id}
pub async fn delete_template(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    app.engine.delete_template(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/templates/{id}/render
pub async fn render_template(
    State(app): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<RenderedTemplate>> {
    let request: RenderRequest = parse_body(&body)?;
    let vars: HashMap<String, String> = variables_from_json(&request.variables);
    Ok(Json(app.engine.render_template(&id, &vars)?))
}

// ── Tools ──────────────────────────────────────────────────────────

/// GET /api/tools
pub async fn list_tools(State(app): State<AppState>) -> Json<Vec<ToolDef>> {
    Json(app.tools.definitions())
}

/// POST /api/tools/{name}
///
/// The body is the tool's JSON arguments. The tool's own failures come back
/// with status 200 and `is_error: true`; only an unknown name is a 404.
pub async fn call_tool(
    State(app): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    if !app.tools.contains(&name) {
        return Err(Error::NotFound {
            entity: "tool",
            id: name,
        }
        .into());
    }
    let arguments = std::str::from_utf8(&body)
        .map_err(|e| ApiError::bad_request(format!("arguments are not UTF-8: {e}")))?;
    let result = app.tools.execute(&name, arguments).await;
    let is_error = result.starts_with("Error");
    Ok(Json(json!({"name": name, "result": result, "is_error": is_error})))
}
