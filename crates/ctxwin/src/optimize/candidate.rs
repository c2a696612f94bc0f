//! Turning a model-proposed candidate set into window elements.
//!
//! The model proposes a replacement element list. Before it touches the
//! window the core:
//!
//! 1. recomputes every token count with the window's tokenizer;
//! 2. clamps priorities so no candidate outranks the element it came from,
//!    and brand-new candidates never outrank the highest original priority;
//! 3. reorders so retained elements keep their original relative order and
//!    new elements stay anchored after the element they followed;
//! 4. keeps the identity of candidates that are unchanged copies;
//! 5. prunes lowest-priority elements until `target_tokens` is met.
//!
//! The capacity check happens afterwards, under the window lock.

use std::collections::{HashMap, HashSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::element::{
    ContextElement, ElementKind, Modality, NewElement, DEFAULT_PRIORITY, MAX_PRIORITY,
    MIN_PRIORITY,
};
use crate::context::window::ContextWindow;
use crate::error::{Error, Result};

/// Optional limits applied on top of the model's proposal.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default, PartialEq)]
pub struct OptimizationConstraints {
    /// Upper bound on the optimized window's `current_tokens`. Elements are
    /// pruned lowest priority first until the set fits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_tokens: Option<usize>,
}

/// One element of a proposed replacement set.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CandidateElement {
    /// Id of the original element this candidate derives from, if any.
    #[serde(default, alias = "original_id", skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub content: String,
    /// Defaults to the source element's kind, or `user`.
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ElementKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modality: Option<Modality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Informational only; always recomputed locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
}

impl CandidateElement {
    pub fn from_source(source: &ContextElement) -> Self {
        Self {
            source_id: Some(source.id().to_string()),
            content: source.content().to_string(),
            kind: Some(source.kind()),
            priority: Some(source.priority()),
            modality: source.modality(),
            tags: Some(source.tags().iter().cloned().collect()),
            token_count: Some(source.token_count()),
        }
    }

    pub fn new(content: impl Into<String>) -> Self {
        Self {
            source_id: None,
            content: content.into(),
            kind: None,
            priority: None,
            modality: None,
            tags: None,
            token_count: None,
        }
    }
}

/// A model's proposed replacement element set.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OptimizationCandidate {
    #[serde(default, alias = "optimized_elements")]
    pub elements: Vec<CandidateElement>,
    /// Short description of what was changed.
    #[serde(default)]
    pub explanation: String,
}

/// Sort key: retained elements sit at their original index with `seq == 0`;
/// new elements follow their anchor in proposal order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Slot {
    anchor: Option<usize>,
    seq: usize,
}

/// Build the replacement element list for `window`.
pub(crate) fn build_elements(
    window: &ContextWindow,
    candidate: &OptimizationCandidate,
    constraints: &OptimizationConstraints,
) -> Result<Vec<ContextElement>> {
    let originals: HashMap<&str, (usize, &ContextElement)> = window
        .elements()
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id(), (i, e)))
        .collect();
    let max_original_priority = window
        .elements()
        .iter()
        .map(ContextElement::priority)
        .max()
        .unwrap_or(DEFAULT_PRIORITY);

    let mut claimed: HashSet<&str> = HashSet::new();
    let mut anchor: Option<usize> = None;
    let mut slotted: Vec<(Slot, ContextElement)> = Vec::with_capacity(candidate.elements.len());

    for (pos, cand) in candidate.elements.iter().enumerate() {
        let source = cand
            .source_id
            .as_deref()
            .and_then(|id| originals.get(id).copied());

        let entry = match source {
            Some((index, src)) => {
                let first_claim = claimed.insert(src.id());
                let kind = cand.kind.unwrap_or(src.kind());
                let priority = cand.priority.unwrap_or(src.priority()).min(src.priority());
                let unchanged = first_claim
                    && cand.content == src.content()
                    && kind == src.kind()
                    && priority == src.priority();
                let element = if unchanged {
                    src.clone()
                } else {
                    let spec = NewElement {
                        content: cand.content.clone(),
                        kind,
                        priority: priority.max(MIN_PRIORITY),
                        tags: cand
                            .tags
                            .clone()
                            .unwrap_or_else(|| src.tags().iter().cloned().collect()),
                        modality: cand.modality.or(src.modality()),
                        metadata: src.metadata().clone(),
                    };
                    materialize(window, spec)?
                };
                // A repeated source is new content placed right after it.
                let seq = if first_claim { 0 } else { pos + 1 };
                anchor = Some(index);
                (
                    Slot {
                        anchor: Some(index),
                        seq,
                    },
                    element,
                )
            }
            None => {
                let spec = NewElement {
                    content: cand.content.clone(),
                    kind: cand.kind.unwrap_or_default(),
                    priority: cand
                        .priority
                        .unwrap_or(DEFAULT_PRIORITY)
                        .clamp(MIN_PRIORITY, MAX_PRIORITY)
                        .min(max_original_priority),
                    tags: cand.tags.clone().unwrap_or_default(),
                    modality: cand.modality,
                    metadata: Default::default(),
                };
                (
                    Slot {
                        anchor,
                        seq: pos + 1,
                    },
                    materialize(window, spec)?,
                )
            }
        };
        slotted.push(entry);
    }

    slotted.sort_by_key(|(slot, _)| *slot);
    let mut elements: Vec<ContextElement> = slotted.into_iter().map(|(_, e)| e).collect();

    if let Some(target) = constraints.target_tokens {
        prune_to_target(&mut elements, target);
    }
    Ok(elements)
}

fn materialize(window: &ContextWindow, spec: NewElement) -> Result<ContextElement> {
    spec.validate()
        .map_err(|e| Error::UpstreamError(format!("invalid candidate element: {e}")))?;
    let tokens = window.count_tokens(&spec.content);
    Ok(ContextElement::create(spec, tokens))
}

/// Drop lowest-priority elements until the total fits `target`. Among equal
/// priorities the later element goes first.
pub(crate) fn prune_to_target(elements: &mut Vec<ContextElement>, target: usize) {
    let mut total: usize = elements.iter().map(ContextElement::token_count).sum();
    while total > target && !elements.is_empty() {
        let Some((victim, _)) = elements
            .iter()
            .enumerate()
            .min_by(|(ia, a), (ib, b)| a.priority().cmp(&b.priority()).then(ib.cmp(ia)))
        else {
            break;
        };
        let removed = elements.remove(victim);
        total -= removed.token_count();
        debug!(
            "Pruned element {} (priority {}, {} tokens) to meet target {target}",
            removed.id(),
            removed.priority(),
            removed.token_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::tokenizer::CharRatioTokenizer;
    use crate::context::window::NewWindow;

    fn window_with(items: &[(&str, u8)]) -> ContextWindow {
        let mut w = ContextWindow::new(
            "s",
            NewWindow::sized(10_000, 0),
            Arc::new(CharRatioTokenizer::default()),
        )
        .unwrap();
        for (content, priority) in items {
            w.add_element(NewElement::new(*content, ElementKind::User).with_priority(*priority))
                .unwrap();
        }
        w
    }

    fn ids(w: &ContextWindow) -> Vec<String> {
        w.elements().iter().map(|e| e.id().to_string()).collect()
    }

    #[test]
    fn unchanged_candidates_keep_identity() {
        let w = window_with(&[("alpha alpha", 5), ("beta beta", 7)]);
        let candidate = OptimizationCandidate {
            elements: w.elements().iter().map(CandidateElement::from_source).collect(),
            explanation: String::new(),
        };
        let built = build_elements(&w, &candidate, &Default::default()).unwrap();
        let built_ids: Vec<&str> = built.iter().map(|e| e.id()).collect();
        assert_eq!(built_ids, ids(&w));
    }

    #[test]
    fn token_counts_are_recomputed() {
        let w = window_with(&[("short", 5)]);
        let mut cand = CandidateElement::from_source(&w.elements()[0]);
        cand.content = "x".repeat(40);
        cand.token_count = Some(1);
        let built = build_elements(
            &w,
            &OptimizationCandidate {
                elements: vec![cand],
                explanation: String::new(),
            },
            &Default::default(),
        )
        .unwrap();
        assert_eq!(built[0].token_count(), 10);
        assert_ne!(built[0].id(), w.elements()[0].id());
    }

    #[test]
    fn priority_cannot_exceed_source() {
        let w = window_with(&[("keep me", 4)]);
        let mut cand = CandidateElement::from_source(&w.elements()[0]);
        cand.content = "kept".into();
        cand.priority = Some(10);
        let built = build_elements(
            &w,
            &OptimizationCandidate {
                elements: vec![cand],
                explanation: String::new(),
            },
            &Default::default(),
        )
        .unwrap();
        assert_eq!(built[0].priority(), 4);
    }

    #[test]
    fn new_candidates_capped_at_highest_original() {
        let w = window_with(&[("a", 3), ("b", 6)]);
        let mut fresh = CandidateElement::new("summary of a and b");
        fresh.priority = Some(10);
        let built = build_elements(
            &w,
            &OptimizationCandidate {
                elements: vec![fresh],
                explanation: String::new(),
            },
            &Default::default(),
        )
        .unwrap();
        assert_eq!(built[0].priority(), 6);
    }

    #[test]
    fn retained_order_is_restored_and_new_elements_stay_anchored() {
        let w = window_with(&[("one", 5), ("two", 5), ("three", 5)]);
        let [one, two, three] = [0, 1, 2].map(|i| CandidateElement::from_source(&w.elements()[i]));
        // Model shuffled the retained elements and inserted a note after "three".
        let candidate = OptimizationCandidate {
            elements: vec![three, CandidateElement::new("note"), one, two],
            explanation: String::new(),
        };
        let built = build_elements(&w, &candidate, &Default::default()).unwrap();
        let contents: Vec<&str> = built.iter().map(|e| e.content()).collect();
        assert_eq!(contents, ["one", "two", "three", "note"]);
    }

    #[test]
    fn leading_new_elements_stay_first() {
        let w = window_with(&[("one", 5)]);
        let candidate = OptimizationCandidate {
            elements: vec![
                CandidateElement::new("preface"),
                CandidateElement::from_source(&w.elements()[0]),
            ],
            explanation: String::new(),
        };
        let built = build_elements(&w, &candidate, &Default::default()).unwrap();
        assert_eq!(built[0].content(), "preface");
        assert_eq!(built[1].content(), "one");
    }

    #[test]
    fn unknown_source_is_treated_as_new() {
        let w = window_with(&[("one", 2)]);
        let mut cand = CandidateElement::new("ghost");
        cand.source_id = Some("missing".into());
        let built = build_elements(
            &w,
            &OptimizationCandidate {
                elements: vec![cand],
                explanation: String::new(),
            },
            &Default::default(),
        )
        .unwrap();
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].priority(), 2);
    }

    #[test]
    fn invalid_candidate_is_upstream_error() {
        let w = window_with(&[("one", 5)]);
        let mut cand = CandidateElement::new("img");
        cand.kind = Some(ElementKind::Multimodal);
        let err = build_elements(
            &w,
            &OptimizationCandidate {
                elements: vec![cand],
                explanation: String::new(),
            },
            &Default::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UpstreamError(_)));
    }

    #[test]
    fn target_tokens_prunes_lowest_priority_later_first() {
        // Each element is 10 tokens.
        let [a, b, c, d] = ["a", "b", "c", "d"].map(|s| s.repeat(40));
        let w = window_with(&[(a.as_str(), 5), (b.as_str(), 2), (c.as_str(), 2), (d.as_str(), 9)]);
        let candidate = OptimizationCandidate {
            elements: w.elements().iter().map(CandidateElement::from_source).collect(),
            explanation: String::new(),
        };
        let built = build_elements(
            &w,
            &candidate,
            &OptimizationConstraints {
                target_tokens: Some(30),
            },
        )
        .unwrap();
        let firsts: Vec<char> = built
            .iter()
            .filter_map(|e| e.content().chars().next())
            .collect();
        assert_eq!(firsts, ['a', 'b', 'd']);

        let built = build_elements(
            &w,
            &candidate,
            &OptimizationConstraints {
                target_tokens: Some(20),
            },
        )
        .unwrap();
        let firsts: Vec<char> = built
            .iter()
            .filter_map(|e| e.content().chars().next())
            .collect();
        assert_eq!(firsts, ['a', 'd']);
    }

    #[test]
    fn candidate_deserializes_aliases() {
        let candidate: OptimizationCandidate = serde_json::from_str(
            r#"{"optimized_elements":[{"original_id":"e1","content":"x","type":"system"}],
                "explanation":"merged"}"#,
        )
        .unwrap();
        assert_eq!(candidate.elements[0].source_id.as_deref(), Some("e1"));
        assert_eq!(candidate.elements[0].kind, Some(ElementKind::System));
    }
}
