//! Structured tool descriptions with usage guidance.
//!
//! `ToolSpec` replaces free-form description strings with structured
//! metadata: purpose, when to use, when not to use, examples, and pointers
//! to neighbouring tools that are easy to confuse.

use crate::ToolDef;

/// A structured tool specification.
///
/// ```ignore
/// let def = ToolSpec::builder("get_context_window")
///     .purpose("Fetch a window with its elements and token usage")
///     .when_to_use("Before deciding what to add or remove")
///     .parameters_for::<WindowArgs>()
///     .to_tool_def();
/// ```
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub purpose: String,
    pub when_to_use: Option<String>,
    pub when_not_to_use: Option<String>,
    pub parameters: serde_json::Value,
    pub examples: Vec<UsageExample>,
    pub output_format: String,
    pub disambiguation: Vec<DisambiguationExample>,
}

/// Points the caller at a different tool for a specific scenario.
#[derive(Debug, Clone)]
pub struct DisambiguationExample {
    pub scenario: String,
    pub correct_tool: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct UsageExample {
    pub input: String,
    pub output: String,
}

impl ToolSpec {
    pub fn builder(name: impl Into<String>) -> ToolSpecBuilder {
        ToolSpecBuilder {
            name: name.into(),
            purpose: None,
            when_to_use: None,
            when_not_to_use: None,
            parameters: None,
            examples: Vec::new(),
            output_format: None,
            disambiguation: Vec::new(),
        }
    }

    /// Render the spec as a single description string.
    pub fn to_description(&self) -> String {
        let mut desc = format!("{}.", self.purpose.trim_end_matches('.'));
        if let Some(when) = &self.when_to_use {
            desc.push_str(&format!("\nWhen to use: {when}"));
        }
        if let Some(when_not) = &self.when_not_to_use {
            desc.push_str(&format!("\nWhen NOT to use: {when_not}"));
        }

        if !self.examples.is_empty() {
            desc.push_str("\nExamples:");
            for ex in &self.examples {
                desc.push_str(&format!("\n  - Input: {} -> {}", ex.input, ex.output));
            }
        }

        if !self.output_format.is_empty() {
            desc.push_str(&format!("\nOutput format: {}", self.output_format));
        }

        if !self.disambiguation.is_empty() {
            desc.push_str("\nDisambiguation:");
            for d in &self.disambiguation {
                desc.push_str(&format!(
                    "\n  - {}: use '{}' instead; {}",
                    d.scenario, d.correct_tool, d.reason
                ));
            }
        }

        desc
    }

    pub fn to_tool_def(&self) -> ToolDef {
        ToolDef::new(
            self.name.clone(),
            self.to_description(),
            self.parameters.clone(),
        )
    }
}

pub struct ToolSpecBuilder {
    name: String,
    purpose: Option<String>,
    when_to_use: Option<String>,
    when_not_to_use: Option<String>,
    parameters: Option<serde_json::Value>,
    examples: Vec<UsageExample>,
    output_format: Option<String>,
    disambiguation: Vec<DisambiguationExample>,
}

impl ToolSpecBuilder {
    pub fn purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn when_to_use(mut self, when: impl Into<String>) -> Self {
        self.when_to_use = Some(when.into());
        self
    }

    pub fn when_not_to_use(mut self, when_not: impl Into<String>) -> Self {
        self.when_not_to_use = Some(when_not.into());
        self
    }

    pub fn parameters(mut self, params: serde_json::Value) -> Self {
        self.parameters = Some(params);
        self
    }

    /// Generate the parameter schema from a `JsonSchema` type.
    pub fn parameters_for<T: schemars::JsonSchema>(self) -> Self {
        self.parameters(crate::json_schema_for::<T>())
    }

    pub fn example(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.examples.push(UsageExample {
            input: input.into(),
            output: output.into(),
        });
        self
    }

    pub fn output_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = Some(format.into());
        self
    }

    pub fn disambiguate(
        mut self,
        scenario: impl Into<String>,
        correct_tool: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        self.disambiguation.push(DisambiguationExample {
            scenario: scenario.into(),
            correct_tool: correct_tool.into(),
            reason: reason.into(),
        });
        self
    }

    pub fn to_tool_def(self) -> ToolDef {
        self.build().to_tool_def()
    }

    /// Finish the spec. A missing purpose falls back to the tool name and a
    /// missing schema to an empty object.
    pub fn build(self) -> ToolSpec {
        ToolSpec {
            purpose: self
                .purpose
                .unwrap_or_else(|| self.name.replace('_', " ")),
            name: self.name,
            when_to_use: self.when_to_use,
            when_not_to_use: self.when_not_to_use,
            parameters: self
                .parameters
                .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
            examples: self.examples,
            output_format: self.output_format.unwrap_or_else(|| "JSON".into()),
            disambiguation: self.disambiguation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_includes_every_section() {
        let spec = ToolSpec::builder("optimize_context")
            .purpose("Submit an optimization pass")
            .when_to_use("When you know which goals to apply")
            .when_not_to_use("When unsure which goals fit")
            .parameters(serde_json::json!({"type": "object", "properties": {}}))
            .example(r#"{"goals": ["reduce_tokens"]}"#, "a pending task")
            .disambiguate(
                "No goals in mind",
                "auto_optimize_context",
                "it picks goals for you",
            )
            .build();

        let desc = spec.to_description();
        assert!(desc.starts_with("Submit an optimization pass."));
        assert!(desc.contains("When NOT to use: When unsure"));
        assert!(desc.contains("Input: {\"goals\""));
        assert!(desc.contains("Output format: JSON"));
        assert!(desc.contains("use 'auto_optimize_context' instead"));
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let def = ToolSpec::builder("get_stats").to_tool_def();
        assert_eq!(def.function.name, "get_stats");
        assert!(def.function.description.starts_with("get stats."));
        assert!(!def.function.description.contains("When to use"));
        assert_eq!(def.function.parameters["type"], "object");
    }
}
