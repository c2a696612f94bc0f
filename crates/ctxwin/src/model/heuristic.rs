//! Offline backend built from simple text heuristics.
//!
//! Useful for tests, demos, and deployments without an API key. Every
//! operation is deterministic for a given input.

use std::collections::HashSet;

use futures::future::BoxFuture;
use serde_json::json;

use super::{GoalRecommendation, ModelBackend};
use crate::context::element::ElementView;
use crate::error::Result;
use crate::optimize::{CandidateElement, OptimizationCandidate, OptimizationGoal};
use crate::template::{GeneratedTemplate, TemplateKind, TemplateRequest};

/// Average element size above which `reduce_tokens` is recommended.
const LARGE_ELEMENT_TOKENS: f64 = 256.0;

/// Deterministic backend that never leaves the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicBackend;

impl HeuristicBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Lowercased, whitespace-collapsed form used for duplicate detection.
fn normalize(content: &str) -> String {
    content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn collapse_whitespace(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Indices of elements whose normalized content already appeared earlier.
fn duplicate_indices(elements: &[ElementView]) -> HashSet<usize> {
    let mut seen = HashSet::new();
    elements
        .iter()
        .enumerate()
        .filter(|(_, e)| !seen.insert(normalize(&e.content)))
        .map(|(i, _)| i)
        .collect()
}

/// Fraction of characters that are redundant whitespace.
fn whitespace_waste(elements: &[ElementView]) -> f64 {
    let total: usize = elements.iter().map(|e| e.content.chars().count()).sum();
    if total == 0 {
        return 0.0;
    }
    let collapsed: usize = elements
        .iter()
        .map(|e| collapse_whitespace(&e.content).chars().count())
        .sum();
    (total - collapsed) as f64 / total as f64
}

fn average_tokens(elements: &[ElementView]) -> f64 {
    if elements.is_empty() {
        return 0.0;
    }
    let total: usize = elements.iter().map(|e| e.token_count).sum();
    total as f64 / elements.len() as f64
}

fn score_elements(elements: &[ElementView]) -> serde_json::Value {
    if elements.is_empty() {
        return json!({
            "quality_score": 10.0,
            "metrics": {"redundancy_ratio": 0.0, "whitespace_ratio": 0.0, "average_element_tokens": 0.0},
            "insights": ["The window is empty."],
            "issues": ["No content to evaluate."],
            "strengths": [],
            "recommendations": ["Add system instructions and user content before analyzing."]
        });
    }

    let duplicates = duplicate_indices(elements).len();
    let redundancy = duplicates as f64 / elements.len() as f64;
    let waste = whitespace_waste(elements);
    let avg = average_tokens(elements);
    let has_system = elements
        .iter()
        .any(|e| e.kind == crate::context::element::ElementKind::System);

    let mut score = 90.0 - redundancy * 50.0 - waste * 40.0;
    let mut insights = vec![format!(
        "{} elements averaging {avg:.0} tokens each.",
        elements.len()
    )];
    let mut issues = Vec::new();
    let mut strengths = Vec::new();
    let mut recommendations = Vec::new();

    if duplicates > 0 {
        issues.push(format!("{duplicates} element(s) repeat earlier content."));
        recommendations.push("Run remove_redundancy to drop repeated elements.".to_string());
    } else {
        strengths.push("No duplicated elements.".to_string());
    }
    if waste > 0.1 {
        issues.push("Content carries a lot of redundant whitespace.".to_string());
        recommendations.push("Run reduce_tokens to compact whitespace.".to_string());
    }
    if has_system {
        strengths.push("Includes system instructions.".to_string());
    } else {
        score -= 10.0;
        insights.push("No system element sets the model's role.".to_string());
        recommendations.push("Add a system element describing the assistant's role.".to_string());
    }
    if avg > LARGE_ELEMENT_TOKENS {
        insights.push("Elements are large; consider splitting or condensing them.".to_string());
    }
    if recommendations.is_empty() {
        recommendations.push("No changes needed.".to_string());
    }

    json!({
        "quality_score": score.clamp(0.0, 100.0),
        "metrics": {
            "redundancy_ratio": redundancy,
            "whitespace_ratio": waste,
            "average_element_tokens": avg,
        },
        "insights": insights,
        "issues": issues,
        "strengths": strengths,
        "recommendations": recommendations,
    })
}

fn optimize_elements(elements: &[ElementView], goals: &[OptimizationGoal]) -> OptimizationCandidate {
    let dedupe = goals.iter().any(|g| {
        matches!(
            g,
            OptimizationGoal::RemoveRedundancy | OptimizationGoal::ReduceTokens
        )
    });
    let compact = goals.iter().any(|g| {
        matches!(
            g,
            OptimizationGoal::ReduceTokens | OptimizationGoal::ImproveClarity
        )
    });
    let duplicates = if dedupe {
        duplicate_indices(elements)
    } else {
        HashSet::new()
    };

    let mut rewritten = 0;
    let candidates: Vec<CandidateElement> = elements
        .iter()
        .enumerate()
        .filter(|(i, _)| !duplicates.contains(i))
        .map(|(_, e)| {
            let content = if compact && e.modality.is_none() {
                let collapsed = collapse_whitespace(&e.content);
                if collapsed != e.content {
                    rewritten += 1;
                }
                collapsed
            } else {
                e.content.clone()
            };
            CandidateElement {
                source_id: Some(e.id.clone()),
                content,
                kind: Some(e.kind),
                priority: Some(e.priority),
                modality: e.modality,
                tags: Some(e.tags.clone()),
                token_count: None,
            }
        })
        .collect();

    let mut explanation = Vec::new();
    if !duplicates.is_empty() {
        explanation.push(format!("removed {} duplicate element(s)", duplicates.len()));
    }
    if rewritten > 0 {
        explanation.push(format!("compacted whitespace in {rewritten} element(s)"));
    }
    OptimizationCandidate {
        elements: candidates,
        explanation: if explanation.is_empty() {
            "no changes".to_string()
        } else {
            explanation.join("; ")
        },
    }
}

fn recommend(elements: &[ElementView]) -> GoalRecommendation {
    let mut goals = Vec::new();
    let mut reasons = Vec::new();
    if !duplicate_indices(elements).is_empty() {
        goals.push(OptimizationGoal::RemoveRedundancy.as_str().to_string());
        reasons.push("some elements repeat earlier content");
    }
    if whitespace_waste(elements) > 0.1 || average_tokens(elements) > LARGE_ELEMENT_TOKENS {
        goals.push(OptimizationGoal::ReduceTokens.as_str().to_string());
        reasons.push("content can be compacted");
    }
    if goals.is_empty() {
        goals.push(OptimizationGoal::ImproveClarity.as_str().to_string());
        reasons.push("no structural problems found, so tidy wording");
    }
    GoalRecommendation {
        goals,
        reasoning: reasons.join("; "),
    }
}

fn draft_template(request: &TemplateRequest) -> GeneratedTemplate {
    let purpose = request.purpose.trim();
    let mut template = format!("You are helping with {purpose}.\n\nContext:\n{{context}}\n");
    if !request.constraints.is_empty() {
        template.push_str("\nRequirements:\n");
        for constraint in &request.constraints {
            template.push_str(&format!("- {constraint}\n"));
        }
    }
    template.push_str("\nInput:\n{input}\n");
    GeneratedTemplate {
        name: String::new(),
        template,
        description: format!("Template for {purpose}"),
        kind: Some(TemplateKind::Completion),
        category: None,
        tags: vec!["heuristic".to_string()],
    }
}

impl ModelBackend for HeuristicBackend {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn score<'a>(&'a self, elements: &'a [ElementView]) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(async move { Ok(score_elements(elements)) })
    }

    fn optimize<'a>(
        &'a self,
        elements: &'a [ElementView],
        goals: &'a [OptimizationGoal],
    ) -> BoxFuture<'a, Result<OptimizationCandidate>> {
        Box::pin(async move { Ok(optimize_elements(elements, goals)) })
    }

    fn recommend_goals<'a>(
        &'a self,
        elements: &'a [ElementView],
    ) -> BoxFuture<'a, Result<GoalRecommendation>> {
        Box::pin(async move { Ok(recommend(elements)) })
    }

    fn generate_template<'a>(
        &'a self,
        request: &'a TemplateRequest,
    ) -> BoxFuture<'a, Result<GeneratedTemplate>> {
        Box::pin(async move { Ok(draft_template(request)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::element::ElementKind;

    fn view(id: &str, kind: ElementKind, content: &str) -> ElementView {
        ElementView {
            id: id.into(),
            kind,
            priority: 5,
            content: content.into(),
            modality: None,
            tags: vec![],
            token_count: content.len().div_ceil(4),
        }
    }

    #[tokio::test]
    async fn scores_duplicates_lower() {
        let backend = HeuristicBackend::new();
        let clean = [
            view("a", ElementKind::System, "You are helpful."),
            view("b", ElementKind::User, "What is Rust?"),
        ];
        let dup = [
            view("a", ElementKind::System, "You are helpful."),
            view("b", ElementKind::User, "What is Rust?"),
            view("c", ElementKind::User, "what is   rust?"),
        ];
        let clean_score = backend.score(&clean).await.unwrap()["quality_score"]
            .as_f64()
            .unwrap();
        let dup_score = backend.score(&dup).await.unwrap()["quality_score"]
            .as_f64()
            .unwrap();
        assert!(clean_score > dup_score);
    }

    #[tokio::test]
    async fn empty_window_scores_low() {
        let raw = HeuristicBackend.score(&[]).await.unwrap();
        assert!(raw["quality_score"].as_f64().unwrap() < 50.0);
        assert!(raw["recommendations"].as_array().is_some_and(|r| !r.is_empty()));
    }

    #[tokio::test]
    async fn optimize_removes_duplicates_and_keeps_sources() {
        let elements = [
            view("a", ElementKind::User, "same text"),
            view("b", ElementKind::User, "Same   text"),
            view("c", ElementKind::User, "other"),
        ];
        let candidate = HeuristicBackend
            .optimize(&elements, &[OptimizationGoal::RemoveRedundancy])
            .await
            .unwrap();
        let sources: Vec<_> = candidate
            .elements
            .iter()
            .filter_map(|c| c.source_id.as_deref())
            .collect();
        assert_eq!(sources, ["a", "c"]);
        assert!(candidate.explanation.contains("duplicate"));
    }

    #[tokio::test]
    async fn reduce_tokens_compacts_whitespace() {
        let elements = [view("a", ElementKind::User, "lots    of\n\n\n   space")];
        let candidate = HeuristicBackend
            .optimize(&elements, &[OptimizationGoal::ReduceTokens])
            .await
            .unwrap();
        assert_eq!(candidate.elements[0].content, "lots of space");
    }

    #[tokio::test]
    async fn recommendation_is_never_empty() {
        let rec = HeuristicBackend.recommend_goals(&[]).await.unwrap();
        assert_eq!(rec.goals, ["improve_clarity"]);

        let dup = [
            view("a", ElementKind::User, "x"),
            view("b", ElementKind::User, "x"),
        ];
        let rec = HeuristicBackend.recommend_goals(&dup).await.unwrap();
        assert!(rec.goals.contains(&"remove_redundancy".to_string()));
        for goal in &rec.goals {
            assert!(goal.parse::<OptimizationGoal>().is_ok());
        }
    }

    #[tokio::test]
    async fn template_has_placeholders() {
        let generated = HeuristicBackend
            .generate_template(&TemplateRequest {
                purpose: "code review".into(),
                examples: vec![],
                constraints: vec!["Be concise".into()],
            })
            .await
            .unwrap();
        assert!(generated.template.contains("{context}"));
        assert!(generated.template.contains("{input}"));
        assert!(generated.template.contains("- Be concise"));
    }
}
