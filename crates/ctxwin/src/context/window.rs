//! Token-budgeted context windows.
//!
//! A [`ContextWindow`] holds an ordered sequence of [`ContextElement`]s and
//! enforces `current_tokens + reserved_tokens <= max_tokens` on every
//! mutation. The reserve is headroom kept back for the model's response.
//!
//! # Example
//!
//! ```ignore
//! let mut window = ContextWindow::new("session-1", NewWindow::sized(100, 20), tokenizer)?;
//! window.add_element(NewElement::new("a".repeat(280), ElementKind::User))?;
//! assert_eq!(window.utilization(), 0.875);
//! println!("{}", window.usage().to_log_string());
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::element::{ContextElement, ElementId, ElementView, NewElement};
use super::tokenizer::Tokenizer;
use crate::error::{Error, Result};

/// Identifier of a window. Unique across the store.
pub type WindowId = String;

/// Default window size when the caller does not supply one.
pub const DEFAULT_MAX_TOKENS: usize = 8192;
/// Default response reserve when the caller does not supply one.
pub const DEFAULT_RESERVED_TOKENS: usize = 512;

/// Caller-supplied parameters for a new window. Unset sizes fall back to the
/// engine configuration.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default)]
pub struct NewWindow {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Total token capacity of the window.
    #[serde(default)]
    pub max_tokens: Option<usize>,
    /// Tokens kept free for the model's response.
    #[serde(default)]
    pub reserved_tokens: Option<usize>,
}

impl NewWindow {
    pub fn sized(max_tokens: usize, reserved_tokens: usize) -> Self {
        Self {
            max_tokens: Some(max_tokens),
            reserved_tokens: Some(reserved_tokens),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Snapshot of a window's token accounting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TokenUsage {
    pub current_tokens: usize,
    pub max_tokens: usize,
    pub reserved_tokens: usize,
    pub available_tokens: usize,
    pub utilization_ratio: f64,
}

impl TokenUsage {
    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "window: {} tokens ({:.0}% of {} usable, {} reserved)",
            self.current_tokens,
            self.utilization_ratio * 100.0,
            self.max_tokens.saturating_sub(self.reserved_tokens),
            self.reserved_tokens,
        )
    }
}

/// An ordered, token-budgeted collection of context elements.
pub struct ContextWindow {
    id: WindowId,
    session_id: String,
    name: String,
    description: String,
    max_tokens: usize,
    reserved_tokens: usize,
    elements: Vec<ContextElement>,
    /// Always equal to the sum of `elements[*].token_count`.
    current_tokens: usize,
    /// Bumped by every successful mutation.
    version: u64,
    /// Set once the window is removed from the store.
    retired: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl fmt::Debug for ContextWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextWindow")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("max_tokens", &self.max_tokens)
            .field("reserved_tokens", &self.reserved_tokens)
            .field("current_tokens", &self.current_tokens)
            .field("elements", &self.elements.len())
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl ContextWindow {
    /// Create an empty window. Unset sizes fall back to
    /// [`DEFAULT_MAX_TOKENS`] and [`DEFAULT_RESERVED_TOKENS`]; the engine
    /// normally fills them from its configuration first.
    pub fn new(
        session_id: impl Into<String>,
        params: NewWindow,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<Self> {
        let max_tokens = params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let reserved_tokens = params.reserved_tokens.unwrap_or(DEFAULT_RESERVED_TOKENS);
        if max_tokens == 0 {
            return Err(Error::InvalidArgument(
                "max_tokens must be greater than zero".into(),
            ));
        }
        if reserved_tokens > max_tokens {
            return Err(Error::InvalidArgument(format!(
                "reserved_tokens ({reserved_tokens}) cannot exceed max_tokens ({max_tokens})"
            )));
        }
        let now = Utc::now();
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            name: params.name.unwrap_or_default(),
            description: params.description.unwrap_or_default(),
            max_tokens,
            reserved_tokens,
            elements: Vec::new(),
            current_tokens: 0,
            version: 0,
            retired: false,
            created_at: now,
            updated_at: now,
            tokenizer,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn reserved_tokens(&self) -> usize {
        self.reserved_tokens
    }

    pub fn current_tokens(&self) -> usize {
        self.current_tokens
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether the window has been deleted. A retired window refuses every
    /// mutation with [`Error::NotFound`].
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Mark the window deleted. Called by the store under the write lock so
    /// holders of a stale handle cannot mutate it afterwards.
    pub(crate) fn retire(&mut self) {
        self.retired = true;
        self.touch();
    }

    fn ensure_live(&self) -> Result<()> {
        if self.retired {
            return Err(Error::not_found("context window", &self.id));
        }
        Ok(())
    }

    pub fn elements(&self) -> &[ContextElement] {
        &self.elements
    }

    pub fn element(&self, id: &str) -> Option<&ContextElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Tokens usable by elements: `max_tokens - reserved_tokens`.
    pub fn budget(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserved_tokens)
    }

    /// Tokens still free for new elements.
    pub fn available_tokens(&self) -> usize {
        self.budget().saturating_sub(self.current_tokens)
    }

    /// `current / (max - reserved)`, or `0.0` when nothing is usable.
    pub fn utilization(&self) -> f64 {
        let budget = self.budget();
        if budget == 0 {
            0.0
        } else {
            self.current_tokens as f64 / budget as f64
        }
    }

    pub fn usage(&self) -> TokenUsage {
        TokenUsage {
            current_tokens: self.current_tokens,
            max_tokens: self.max_tokens,
            reserved_tokens: self.reserved_tokens,
            available_tokens: self.available_tokens(),
            utilization_ratio: self.utilization(),
        }
    }

    /// Count tokens with this window's tokenizer.
    pub fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer.count_tokens(text)
    }

    /// Validate, tokenize, and append an element.
    ///
    /// Fails with [`Error::CapacityExceeded`] when the element does not fit;
    /// the window is left untouched on any error.
    pub fn add_element(&mut self, spec: NewElement) -> Result<&ContextElement> {
        self.ensure_live()?;
        spec.validate()?;
        let token_count = self.tokenizer.count_tokens(&spec.content);
        let required = self
            .current_tokens
            .checked_add(token_count)
            .and_then(|n| n.checked_add(self.reserved_tokens));
        if required.is_none_or(|n| n > self.max_tokens) {
            return Err(Error::CapacityExceeded {
                requested: token_count,
                available: self.available_tokens(),
            });
        }
        self.elements.push(ContextElement::create(spec, token_count));
        self.current_tokens += token_count;
        self.touch();
        Ok(&self.elements[self.elements.len() - 1])
    }

    /// Remove an element by id, preserving the order of the rest.
    pub fn remove_element(&mut self, id: &str) -> Result<ContextElement> {
        self.ensure_live()?;
        let pos = self
            .elements
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| Error::not_found("element", id))?;
        let removed = self.elements.remove(pos);
        self.current_tokens -= removed.token_count;
        self.touch();
        Ok(removed)
    }

    /// Elements carrying `tag`, in insertion order.
    pub fn elements_tagged(&self, tag: &str) -> Vec<&ContextElement> {
        self.elements.iter().filter(|e| e.has_tag(tag)).collect()
    }

    /// AI-facing representation of the window, in insertion order.
    pub fn serialize(&self) -> Vec<ElementView> {
        self.elements.iter().map(ContextElement::view).collect()
    }

    /// Replace every element in one step.
    ///
    /// Fails with [`Error::NotFound`] on a retired window, then checks
    /// `expected_version`, then the capacity invariant against the new set.
    /// Nothing changes unless all pass.
    pub(crate) fn replace_elements(
        &mut self,
        expected_version: u64,
        elements: Vec<ContextElement>,
    ) -> Result<()> {
        self.ensure_live()?;
        if self.version != expected_version {
            return Err(Error::OptimizationStale {
                expected: expected_version,
                found: self.version,
            });
        }
        let candidate_tokens = elements
            .iter()
            .try_fold(0usize, |acc, e| acc.checked_add(e.token_count));
        let candidate_tokens = match candidate_tokens {
            Some(total) if total.saturating_add(self.reserved_tokens) <= self.max_tokens => total,
            total => {
                return Err(Error::CandidateExceedsCapacity {
                    candidate_tokens: total.unwrap_or(usize::MAX),
                    budget: self.budget(),
                });
            }
        };
        self.elements = elements;
        self.current_tokens = candidate_tokens;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Summary without element bodies.
    pub fn info(&self) -> WindowInfo {
        WindowInfo {
            id: self.id.clone(),
            session_id: self.session_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            max_tokens: self.max_tokens,
            reserved_tokens: self.reserved_tokens,
            current_tokens: self.current_tokens,
            available_tokens: self.available_tokens(),
            utilization_ratio: self.utilization(),
            element_count: self.elements.len(),
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Summary plus every element.
    pub fn detail(&self) -> WindowDetail {
        WindowDetail {
            info: self.info(),
            elements: self.elements.clone(),
        }
    }
}

/// Serializable window summary.
#[derive(Debug, Clone, Serialize)]
pub struct WindowInfo {
    pub id: WindowId,
    pub session_id: String,
    pub name: String,
    pub description: String,
    pub max_tokens: usize,
    pub reserved_tokens: usize,
    pub current_tokens: usize,
    pub available_tokens: usize,
    pub utilization_ratio: f64,
    pub element_count: usize,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Serializable window with its elements.
#[derive(Debug, Clone, Serialize)]
pub struct WindowDetail {
    #[serde(flatten)]
    pub info: WindowInfo,
    pub elements: Vec<ContextElement>,
}

/// Result of a successful insertion, as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct AddedElement {
    pub element_id: ElementId,
    pub token_count: usize,
    pub current_tokens: usize,
    pub utilization_ratio: f64,
}
