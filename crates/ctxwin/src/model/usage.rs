//! Cumulative model usage and cost tracking.

use serde::Serialize;

/// Per-model pricing for cost estimation (USD per 1M tokens).
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    pub fn estimate_cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        (prompt_tokens as f64 / 1_000_000.0) * self.input_per_million
            + (completion_tokens as f64 / 1_000_000.0) * self.output_per_million
    }
}

impl Default for ModelPricing {
    fn default() -> Self {
        Self {
            input_per_million: 3.0,
            output_per_million: 15.0,
        }
    }
}

/// Approximate pricing by model family. Matches on the segment after the
/// last `/` so org prefixes do not cause false hits.
pub fn pricing_for_model(model: &str) -> ModelPricing {
    let name = model.rsplit('/').next().unwrap_or(model).to_lowercase();
    let (input, output) = if name.contains("gemini") && name.contains("flash") {
        (0.30, 2.50)
    } else if name.contains("gemini") {
        (1.25, 10.0)
    } else if name.contains("haiku") {
        (0.80, 4.0)
    } else if name.contains("sonnet") {
        (3.0, 15.0)
    } else if name.contains("opus") {
        (15.0, 75.0)
    } else if name.contains("4o-mini") {
        (0.15, 0.60)
    } else {
        return ModelPricing::default();
    };
    ModelPricing {
        input_per_million: input,
        output_per_million: output,
    }
}

/// Running totals across every model call a backend makes.
#[derive(Debug, Default)]
pub struct UsageTracker {
    calls: u64,
    failures: u64,
    prompt_tokens: u64,
    completion_tokens: u64,
    estimated_cost_usd: f64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful call.
    pub fn record(&mut self, prompt_tokens: u32, completion_tokens: u32, pricing: &ModelPricing) {
        self.calls += 1;
        self.prompt_tokens += prompt_tokens as u64;
        self.completion_tokens += completion_tokens as u64;
        self.estimated_cost_usd += pricing.estimate_cost(prompt_tokens, completion_tokens);
    }

    pub fn record_failure(&mut self) {
        self.calls += 1;
        self.failures += 1;
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            calls: self.calls,
            failures: self.failures,
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            estimated_cost_usd: self.estimated_cost_usd,
        }
    }
}

/// Serializable copy of a [`UsageTracker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub calls: u64,
    pub failures: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub estimated_cost_usd: f64,
}

impl UsageSnapshot {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Format as a short summary string.
    pub fn summary(&self) -> String {
        format!(
            "model calls: {} ({} failed), tokens: {} prompt + {} completion, est. cost: ${:.4}",
            self.calls,
            self.failures,
            self.prompt_tokens,
            self.completion_tokens,
            self.estimated_cost_usd,
        )
    }
}
