//! Read-only quality analysis of a window.
//!
//! The model scores the serialized window; this module validates the raw
//! response, clamps the score, and folds in locally computed metrics. The
//! window itself is never touched.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::window::TokenUsage;
use crate::error::{Error, Result};

/// Analysis type used when the caller does not name one.
pub const DEFAULT_ANALYSIS_TYPE: &str = "comprehensive";

/// Parameters of an analysis request.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default)]
pub struct AnalyzeRequest {
    /// Free-form label recorded on the result. Default: `comprehensive`.
    #[serde(default)]
    pub analysis_type: Option<String>,
}

/// Validated analysis result.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ContextAnalysis {
    pub context_id: String,
    pub analysis_type: String,
    /// Always within `[0, 100]`.
    pub quality_score: f64,
    pub metrics: BTreeMap<String, f64>,
    pub insights: Vec<String>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ContextAnalysis {
    /// Multi-line plain-text rendering.
    pub fn summary(&self) -> String {
        let mut out = format!("Quality Score: {:.1}/100\n", self.quality_score);
        let sections: [(&str, &[String]); 4] = [
            ("Insights", self.insights.as_slice()),
            ("Strengths", self.strengths.as_slice()),
            ("Issues", self.issues.as_slice()),
            ("Recommendations", self.recommendations.as_slice()),
        ];
        for (title, items) in sections {
            if items.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{title}:");
            for item in items {
                let _ = writeln!(out, "  - {item}");
            }
        }
        if !self.metrics.is_empty() {
            out.push_str("Metrics:\n");
            for (name, value) in &self.metrics {
                let _ = writeln!(out, "  {name}: {value}");
            }
        }
        out
    }
}

/// Validate a raw model response and build the analysis.
pub(crate) fn parse_analysis(
    context_id: &str,
    analysis_type: &str,
    raw: &Value,
    element_count: usize,
    usage: &TokenUsage,
) -> Result<ContextAnalysis> {
    let obj = raw
        .as_object()
        .ok_or_else(|| malformed("response is not a JSON object"))?;

    let quality_score = obj
        .get("quality_score")
        .and_then(Value::as_f64)
        .ok_or_else(|| malformed("quality_score must be a number"))?
        .clamp(0.0, 100.0);

    let mut metrics = BTreeMap::new();
    let raw_metrics = obj
        .get("metrics")
        .and_then(Value::as_object)
        .ok_or_else(|| malformed("metrics must be an object"))?;
    for (name, value) in raw_metrics {
        let value = value
            .as_f64()
            .ok_or_else(|| malformed(format!("metric `{name}` must be a number")))?;
        metrics.insert(name.clone(), value);
    }
    metrics.insert("element_count".into(), element_count as f64);
    metrics.insert("current_tokens".into(), usage.current_tokens as f64);
    metrics.insert("utilization_ratio".into(), usage.utilization_ratio);

    Ok(ContextAnalysis {
        context_id: context_id.to_string(),
        analysis_type: analysis_type.to_string(),
        quality_score,
        metrics,
        insights: string_list(obj.get("insights"), "insights", true)?,
        issues: string_list(obj.get("issues"), "issues", false)?,
        strengths: string_list(obj.get("strengths"), "strengths", false)?,
        recommendations: string_list(obj.get("recommendations"), "recommendations", true)?,
        created_at: Utc::now(),
    })
}

fn string_list(value: Option<&Value>, field: &str, required: bool) -> Result<Vec<String>> {
    match value {
        None | Some(Value::Null) if !required => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| malformed(format!("{field} must contain only strings")))
            })
            .collect(),
        _ => Err(malformed(format!("{field} must be an array of strings"))),
    }
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::MalformedAnalysisResult(msg.into())
}
