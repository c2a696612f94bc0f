//! The generative model behind analysis, optimization, and template
//! generation.
//!
//! The engine only talks to a model through [`ModelBackend`]. Two backends
//! ship with the crate:
//!
//! | Backend | Use case |
//! |---------|----------|
//! | [`OpenRouterBackend`] | Chat-completions API with per-operation model routing |
//! | [`HeuristicBackend`] | Offline, deterministic; used when no API key is configured |

pub mod heuristic;
pub mod openrouter;
pub mod router;
pub mod usage;

use std::fmt;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::context::element::ElementView;
use crate::error::{Error, Result};
use crate::optimize::{OptimizationCandidate, OptimizationGoal};
use crate::template::{GeneratedTemplate, TemplateRequest};

pub use heuristic::HeuristicBackend;
pub use openrouter::OpenRouterBackend;
pub use router::ModelRouter;
pub use usage::{UsageSnapshot, UsageTracker};

/// The four model-backed operations. Used for routing and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelOperation {
    Analyze,
    Optimize,
    RecommendGoals,
    GenerateTemplate,
}

impl fmt::Display for ModelOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelOperation::Analyze => "analyze",
            ModelOperation::Optimize => "optimize",
            ModelOperation::RecommendGoals => "recommend_goals",
            ModelOperation::GenerateTemplate => "generate_template",
        };
        f.write_str(s)
    }
}

/// Goals proposed by the model for an auto-optimization run. Goal names are
/// raw strings; the engine validates them against [`OptimizationGoal`].
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct GoalRecommendation {
    #[serde(default, alias = "recommended_goals")]
    pub goals: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

/// A generative model capable of the engine's four AI operations.
///
/// Every method is fallible with [`Error::UpstreamError`]. Implementations
/// should not apply their own timeouts; the engine bounds each call with
/// `EngineConfig::upstream_timeout`.
pub trait ModelBackend: Send + Sync {
    /// Short label for logs and stats.
    fn name(&self) -> &str;

    /// Score a serialized window. Returns the raw response object, which the
    /// analyzer validates.
    fn score<'a>(&'a self, elements: &'a [ElementView]) -> BoxFuture<'a, Result<serde_json::Value>>;

    /// Propose a replacement element set for the given goals.
    fn optimize<'a>(
        &'a self,
        elements: &'a [ElementView],
        goals: &'a [OptimizationGoal],
    ) -> BoxFuture<'a, Result<OptimizationCandidate>>;

    /// Suggest optimization goals for a window.
    fn recommend_goals<'a>(
        &'a self,
        elements: &'a [ElementView],
    ) -> BoxFuture<'a, Result<GoalRecommendation>>;

    /// Draft a prompt template for a purpose.
    fn generate_template<'a>(
        &'a self,
        request: &'a TemplateRequest,
    ) -> BoxFuture<'a, Result<GeneratedTemplate>>;

    /// Cumulative usage, when the backend tracks it.
    fn usage(&self) -> Option<UsageSnapshot> {
        None
    }
}

/// Parse a model's JSON reply, tolerating Markdown code fences and leading
/// or trailing prose around a single top-level object.
pub fn parse_json_reply(text: &str) -> Result<serde_json::Value> {
    let trimmed = strip_code_fence(text.trim());
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => {
            let object = trimmed.get(start..=end).unwrap_or(trimmed);
            serde_json::from_str(object)
                .map_err(|e| Error::UpstreamError(format!("model reply is not valid JSON: {e}")))
        }
        _ => Err(Error::UpstreamError("model reply contains no JSON object".into())),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Skip an optional language tag on the opening fence line.
    let body = rest
        .find('\n')
        .and_then(|i| rest.get(i + 1..))
        .unwrap_or(rest);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Decode a reply into a typed value.
pub(crate) fn decode_reply<T: serde::de::DeserializeOwned>(text: &str, what: &str) -> Result<T> {
    let value = parse_json_reply(text)?;
    serde_json::from_value(value)
        .map_err(|e| Error::UpstreamError(format!("unexpected {what} reply shape: {e}")))
}
