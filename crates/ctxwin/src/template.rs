//! Prompt templates with `{variable}` placeholders.
//!
//! Variables are extracted once, when the template is registered, in order of
//! first appearance. Rendering is a single flat pass: substituted values are
//! never re-scanned, so a value containing `{other}` is emitted verbatim.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier of a template.
pub type TemplateId = String;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// Broad use of a template.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    #[default]
    Completion,
    Chat,
    FewShot,
    System,
    Custom,
}

/// Caller-supplied template definition.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default)]
pub struct NewTemplate {
    pub name: String,
    /// Template text with `{variable}` placeholders.
    pub template: String,
    #[serde(default)]
    pub description: String,
    /// Accepts `type` as an alias.
    #[serde(default, alias = "type")]
    pub kind: TemplateKind,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_category() -> String {
    "general".into()
}

impl NewTemplate {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            category: default_category(),
            ..Default::default()
        }
    }
}

/// A registered template.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct PromptTemplate {
    pub id: TemplateId,
    pub name: String,
    pub description: String,
    pub kind: TemplateKind,
    pub category: String,
    pub tags: Vec<String>,
    pub template: String,
    variables: Vec<String>,
    pub usage_count: u64,
    pub created_at: DateTime<Utc>,
}

impl PromptTemplate {
    /// Validate the definition and extract its variables.
    pub fn new(params: NewTemplate) -> Result<Self> {
        if params.name.trim().is_empty() {
            return Err(Error::InvalidArgument("template name must not be empty".into()));
        }
        if params.template.trim().is_empty() {
            return Err(Error::InvalidArgument("template text must not be empty".into()));
        }
        let variables = extract_variables(&params.template);
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: params.name,
            description: params.description,
            kind: params.kind,
            category: params.category,
            tags: params.tags,
            template: params.template,
            variables,
            usage_count: 0,
            created_at: Utc::now(),
        })
    }

    /// Placeholder names in first-appearance order.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Substitute every placeholder. Fails without partial output if any
    /// variable is missing; extra entries in `vars` are ignored.
    pub fn render(&self, vars: &HashMap<String, String>) -> Result<String> {
        let missing: Vec<String> = self
            .variables
            .iter()
            .filter(|name| !vars.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingVariable(missing));
        }
        let rendered = PLACEHOLDER.replace_all(&self.template, |caps: &regex::Captures<'_>| {
            vars.get(&caps[1]).cloned().unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }

    pub(crate) fn record_use(&mut self) {
        self.usage_count += 1;
    }
}

/// Placeholder names in `text`, deduplicated, in first-appearance order.
pub fn extract_variables(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    PLACEHOLDER
        .captures_iter(text)
        .filter_map(|caps| {
            let name = caps[1].to_string();
            seen.insert(name.clone()).then_some(name)
        })
        .collect()
}

/// Convert JSON variable values to strings. Strings pass through unquoted;
/// other values use their JSON text.
pub fn variables_from_json(map: &serde_json::Map<String, serde_json::Value>) -> HashMap<String, String> {
    map.iter()
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

/// Render request body.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default)]
pub struct RenderRequest {
    /// Values for the template's placeholders.
    #[serde(default)]
    pub variables: serde_json::Map<String, serde_json::Value>,
}

/// Result of a successful render.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RenderedTemplate {
    pub template_id: TemplateId,
    pub rendered_content: String,
}

/// Request for a model-generated template.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default)]
pub struct TemplateRequest {
    /// What the template is for.
    pub purpose: String,
    /// Example inputs or situations the template should handle.
    #[serde(default)]
    pub examples: Vec<String>,
    /// Requirements the generated text must respect.
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl TemplateRequest {
    pub fn validate(&self) -> Result<()> {
        if self.purpose.trim().is_empty() {
            return Err(Error::InvalidArgument("purpose must not be empty".into()));
        }
        Ok(())
    }
}

/// Template as proposed by a model. Variables it reports are ignored and
/// re-extracted locally.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct GeneratedTemplate {
    #[serde(default)]
    pub name: String,
    pub template: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "type")]
    pub kind: Option<TemplateKind>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl GeneratedTemplate {
    pub(crate) fn into_new_template(self, purpose: &str) -> NewTemplate {
        let name = if self.name.trim().is_empty() {
            let short: String = purpose.chars().take(40).collect();
            format!("Generated: {short}")
        } else {
            self.name
        };
        let mut tags = self.tags;
        if !tags.iter().any(|t| t == "ai-generated") {
            tags.push("ai-generated".into());
        }
        NewTemplate {
            name,
            template: self.template,
            description: if self.description.is_empty() {
                purpose.to_string()
            } else {
                self.description
            },
            kind: self.kind.unwrap_or_default(),
            category: self.category.unwrap_or_else(default_category),
            tags,
        }
    }
}
