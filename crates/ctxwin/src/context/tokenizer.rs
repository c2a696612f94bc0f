//! Token counting for context elements.
//!
//! The window computes an element's `token_count` once, at insertion, through
//! a [`Tokenizer`]. Implementations must be deterministic for identical input
//! within a process run; counts may differ between tokenizer versions.

/// Default characters per token. Matches the rough "one token per four
/// characters" estimate most chat models land near for English text.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 4.0;

/// Counts tokens for a piece of text.
pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

impl<F> Tokenizer for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn count_tokens(&self, text: &str) -> usize {
        self(text)
    }
}

/// Character-ratio estimator: `floor(chars / chars_per_token)`.
///
/// Counts Unicode scalar values rather than bytes so multi-byte scripts are
/// not over-charged. Empty text is zero tokens.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioTokenizer {
    chars_per_token: f64,
}

impl CharRatioTokenizer {
    /// Create an estimator with a calibrated ratio. Non-positive or
    /// non-finite ratios fall back to [`DEFAULT_CHARS_PER_TOKEN`].
    pub fn new(chars_per_token: f64) -> Self {
        let chars_per_token = if chars_per_token.is_finite() && chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self { chars_per_token }
    }

    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }
}

impl Default for CharRatioTokenizer {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN)
    }
}

impl Tokenizer for CharRatioTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        let chars = text.chars().count();
        (chars as f64 / self.chars_per_token) as usize
    }
}
