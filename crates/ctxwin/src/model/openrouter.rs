//! OpenRouter chat-completions backend.
//!
//! Every operation is a single JSON-mode completion: a fixed system prompt,
//! the serialized window (or template request) as the user message, and a
//! reply parsed with [`parse_json_reply`](super::parse_json_reply).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::router::ModelRouter;
use super::usage::{UsageSnapshot, UsageTracker, pricing_for_model};
use super::{GoalRecommendation, ModelBackend, ModelOperation, decode_reply, parse_json_reply};
use crate::context::element::ElementView;
use crate::error::{Error, Result};
use crate::optimize::{OptimizationCandidate, OptimizationGoal};
use crate::template::{GeneratedTemplate, TemplateRequest};

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default completion budget per call.
pub const DEFAULT_MAX_COMPLETION_TOKENS: u32 = 4096;

// ── Prompts ────────────────────────────────────────────────────────

const ANALYSIS_PROMPT: &str = "\
You evaluate the quality of a prompt context window. The user message is a JSON \
array of context elements in order, each with id, kind, priority (1-10), content, \
and token_count.

Reply with a single JSON object:
{
  \"quality_score\": number from 0 to 100,
  \"metrics\": object mapping metric names (coherence, relevance, completeness, \
density) to numbers between 0 and 1,
  \"insights\": array of short strings,
  \"issues\": array of short strings,
  \"strengths\": array of short strings,
  \"recommendations\": array of short strings
}
Do not include any other text.";

const OPTIMIZATION_PROMPT: &str = "\
You optimize a prompt context window. The user message contains the goals and a \
JSON array of context elements in order.

Return the replacement element list as a single JSON object:
{
  \"elements\": [
    {\"source_id\": id of the element this derives from or null for new content,
     \"content\": string, \"kind\": element kind, \"priority\": 1-10}
  ],
  \"explanation\": short description of the changes
}

Rules:
- Copy unchanged elements exactly, including their source_id.
- Never raise an element's priority.
- Omit elements you remove.
- Do not include any other text.";

const GOALS_PROMPT: &str = "\
You decide how a prompt context window should be optimized. The user message is a \
JSON array of context elements.

Choose one or more goals from exactly this list: reduce_tokens, improve_clarity, \
enhance_relevance, remove_redundancy, improve_structure.

Reply with a single JSON object:
{\"goals\": [goal names], \"reasoning\": short explanation}
Do not include any other text.";

const TEMPLATE_PROMPT: &str = "\
You write reusable prompt templates. Use {variable_name} placeholders (letters, \
digits, underscores) for every part that changes between uses.

Reply with a single JSON object:
{
  \"name\": short title,
  \"description\": one sentence,
  \"template\": template text,
  \"kind\": one of completion, chat, few_shot, system, custom,
  \"category\": single word,
  \"tags\": array of strings
}
Do not include any other text.";

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize, Debug)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize, Debug)]
struct ResponseFormat {
    #[serde(rename = "type")]
    fmt_type: &'static str,
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

#[derive(Deserialize, Debug, Clone, Copy)]
struct UsageInfo {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

// ── Backend ────────────────────────────────────────────────────────

/// Model backend over the OpenRouter chat completions API.
pub struct OpenRouterBackend {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    referer: String,
    title: String,
    router: ModelRouter,
    max_tokens: u32,
    temperature: f32,
    usage: Mutex<UsageTracker>,
}

impl OpenRouterBackend {
    /// Create a backend with default headers and routing.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ctxwin/", env!("CARGO_PKG_VERSION")))
            // Outer bound only; the engine applies the configured timeout.
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| Error::UpstreamError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: OPENROUTER_URL.to_string(),
            referer: "https://github.com/ctxwin/ctxwin".to_string(),
            title: "ctxwin".to_string(),
            router: ModelRouter::default(),
            max_tokens: DEFAULT_MAX_COMPLETION_TOKENS,
            temperature: 0.3,
            usage: Mutex::new(UsageTracker::new()),
        })
    }

    pub fn with_router(mut self, router: ModelRouter) -> Self {
        self.router = router;
        self
    }

    /// Point at a different chat-completions URL (proxies, compatible APIs).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_headers(mut self, referer: impl Into<String>, title: impl Into<String>) -> Self {
        self.referer = referer.into();
        self.title = title.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    /// Send one JSON-mode completion and return the reply text.
    async fn complete(&self, operation: ModelOperation, system: &str, user: &str) -> Result<String> {
        let model = self.router.model_for(operation);
        let body = ChatRequest {
            model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: ResponseFormat {
                fmt_type: "json_object",
            },
        };
        debug!(
            "Model request: op={operation}, model={model}, input={} chars",
            user.len()
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(&body).map_or(0, |s| s.len())
        );

        let start = Instant::now();
        let result = self.send(&body).await;
        let elapsed = start.elapsed();

        match result {
            Ok((text, usage)) => {
                let prompt = usage.and_then(|u| u.prompt_tokens).unwrap_or(0);
                let completion = usage.and_then(|u| u.completion_tokens).unwrap_or(0);
                debug!(
                    "Model response: op={operation} in {:.1}s, {} chars, tokens: prompt={prompt}, completion={completion}",
                    elapsed.as_secs_f64(),
                    text.len(),
                );
                self.usage
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .record(prompt, completion, &pricing_for_model(model));
                Ok(text)
            }
            Err(e) => {
                warn!("Model call failed: op={operation}, model={model}: {e}");
                self.usage
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .record_failure();
                Err(e)
            }
        }
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<(String, Option<UsageInfo>)> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::UpstreamError(format!("request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::UpstreamError(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(Error::UpstreamError(format!("OpenRouter API HTTP {status}: {text}")));
        }
        extract_content(&text)
    }
}

/// Pull the first choice's content out of a raw API response body.
fn extract_content(body: &str) -> Result<(String, Option<UsageInfo>)> {
    let parsed: RawChatResponse = serde_json::from_str(body)
        .map_err(|e| Error::UpstreamError(format!("failed to parse response: {e}")))?;
    if let Some(err) = parsed.error {
        return Err(Error::UpstreamError(format!(
            "OpenRouter API error: {}",
            err.message
        )));
    }
    let content = parsed
        .choices
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| Error::UpstreamError("empty model response".into()))?;
    Ok((content, parsed.usage))
}

fn elements_json(elements: &[ElementView]) -> Result<String> {
    serde_json::to_string_pretty(elements)
        .map_err(|e| Error::UpstreamError(format!("failed to serialize window: {e}")))
}

fn optimization_input(elements: &[ElementView], goals: &[OptimizationGoal]) -> Result<String> {
    let mut input = String::from("Goals:\n");
    for goal in goals {
        input.push_str(&format!("- {goal}: {}\n", goal.instruction()));
    }
    input.push_str("\nElements:\n");
    input.push_str(&elements_json(elements)?);
    Ok(input)
}

fn template_input(request: &TemplateRequest) -> String {
    let mut input = format!("Purpose: {}\n", request.purpose);
    if !request.examples.is_empty() {
        input.push_str("\nExamples:\n");
        for example in &request.examples {
            input.push_str(&format!("- {example}\n"));
        }
    }
    if !request.constraints.is_empty() {
        input.push_str("\nConstraints:\n");
        for constraint in &request.constraints {
            input.push_str(&format!("- {constraint}\n"));
        }
    }
    input
}

impl ModelBackend for OpenRouterBackend {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn score<'a>(&'a self, elements: &'a [ElementView]) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(async move {
            let input = elements_json(elements)?;
            let reply = self
                .complete(ModelOperation::Analyze, ANALYSIS_PROMPT, &input)
                .await?;
            parse_json_reply(&reply)
        })
    }

    fn optimize<'a>(
        &'a self,
        elements: &'a [ElementView],
        goals: &'a [OptimizationGoal],
    ) -> BoxFuture<'a, Result<OptimizationCandidate>> {
        Box::pin(async move {
            let input = optimization_input(elements, goals)?;
            let reply = self
                .complete(ModelOperation::Optimize, OPTIMIZATION_PROMPT, &input)
                .await?;
            decode_reply(&reply, "optimization")
        })
    }

    fn recommend_goals<'a>(
        &'a self,
        elements: &'a [ElementView],
    ) -> BoxFuture<'a, Result<GoalRecommendation>> {
        Box::pin(async move {
            let input = elements_json(elements)?;
            let reply = self
                .complete(ModelOperation::RecommendGoals, GOALS_PROMPT, &input)
                .await?;
            decode_reply(&reply, "goal recommendation")
        })
    }

    fn generate_template<'a>(
        &'a self,
        request: &'a TemplateRequest,
    ) -> BoxFuture<'a, Result<GeneratedTemplate>> {
        Box::pin(async move {
            let input = template_input(request);
            let reply = self
                .complete(ModelOperation::GenerateTemplate, TEMPLATE_PROMPT, &input)
                .await?;
            decode_reply(&reply, "template")
        })
    }

    fn usage(&self) -> Option<UsageSnapshot> {
        Some(self.usage.lock().unwrap_or_else(|e| e.into_inner()).snapshot())
    }
}
