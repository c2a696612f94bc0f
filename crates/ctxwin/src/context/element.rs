//! Context elements: the immutable units of content held by a window.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier of an element within its window.
pub type ElementId = String;

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;
pub const DEFAULT_PRIORITY: u8 = 5;

/// What an element represents in the conversation sent to the model.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    System,
    #[default]
    User,
    Assistant,
    Function,
    Tool,
    Multimodal,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElementKind::System => "system",
            ElementKind::User => "user",
            ElementKind::Assistant => "assistant",
            ElementKind::Function => "function",
            ElementKind::Tool => "tool",
            ElementKind::Multimodal => "multimodal",
        };
        f.write_str(s)
    }
}

/// Payload modality of a multimodal element. The element's `content` is a
/// reference (URL, path, handle) to the payload.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Image,
    Audio,
    Video,
    Document,
}

/// Caller-supplied description of an element to insert.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default)]
pub struct NewElement {
    /// Text payload, or a payload reference for multimodal elements.
    #[serde(default)]
    pub content: String,
    /// Element kind. Accepts `type` as an alias.
    #[serde(default, alias = "type")]
    pub kind: ElementKind,
    /// Importance from 1 (lowest) to 10 (highest). Defaults to 5.
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Free-form labels used for filtering.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Required for multimodal elements, forbidden otherwise.
    #[serde(default)]
    pub modality: Option<Modality>,
    /// Arbitrary JSON object carried alongside the element.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

impl NewElement {
    pub fn new(content: impl Into<String>, kind: ElementKind) -> Self {
        Self {
            content: content.into(),
            kind,
            priority: DEFAULT_PRIORITY,
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_modality(mut self, modality: Modality) -> Self {
        self.modality = Some(modality);
        self
    }

    /// Check priority range and the kind/modality pairing.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(Error::InvalidArgument(format!(
                "priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}, got {}",
                self.priority
            )));
        }
        match (self.kind, self.modality) {
            (ElementKind::Multimodal, None) => Err(Error::InvalidArgument(
                "multimodal elements require a modality".into(),
            )),
            (ElementKind::Multimodal, Some(_)) => Ok(()),
            (kind, Some(_)) => Err(Error::InvalidArgument(format!(
                "modality is only valid for multimodal elements, not {kind}"
            ))),
            (_, None) => Ok(()),
        }
    }
}

/// A unit of content owned by exactly one window.
///
/// Elements never change after insertion; `token_count` is computed once by
/// the window's tokenizer and cached.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ContextElement {
    pub(crate) id: ElementId,
    pub(crate) content: String,
    pub(crate) kind: ElementKind,
    pub(crate) priority: u8,
    pub(crate) tags: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) modality: Option<Modality>,
    pub(crate) metadata: serde_json::Map<String, serde_json::Value>,
    pub(crate) token_count: usize,
    pub(crate) created_at: DateTime<Utc>,
}

impl ContextElement {
    /// Build an element from validated input with a precomputed token count.
    pub(crate) fn create(spec: NewElement, token_count: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: spec.content,
            kind: spec.kind,
            priority: spec.priority,
            tags: spec.tags.into_iter().collect(),
            modality: spec.modality,
            metadata: spec.metadata,
            token_count,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn modality(&self) -> Option<Modality> {
        self.modality
    }

    pub fn metadata(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.metadata
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// The AI-facing projection of this element.
    pub fn view(&self) -> ElementView {
        ElementView {
            id: self.id.clone(),
            kind: self.kind,
            priority: self.priority,
            content: self.content.clone(),
            modality: self.modality,
            tags: self.tags.iter().cloned().collect(),
            token_count: self.token_count,
        }
    }
}

/// Serialized element as handed to the model backend and returned to callers.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ElementView {
    pub id: ElementId,
    pub kind: ElementKind,
    pub priority: u8,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modality: Option<Modality>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub token_count: usize,
}
