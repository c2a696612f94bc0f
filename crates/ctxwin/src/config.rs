//! Engine configuration.
//!
//! ```ignore
//! let config = EngineConfig::default()
//!     .with_default_max_tokens(16_384)
//!     .with_upstream_timeout(Duration::from_secs(30));
//! ```

use std::time::Duration;

use crate::context::tokenizer::DEFAULT_CHARS_PER_TOKEN;
use crate::context::window::{DEFAULT_MAX_TOKENS, DEFAULT_RESERVED_TOKENS};

/// Default bound on a single model call.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings shared by every operation of a [`ContextEngine`](crate::ContextEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `max_tokens` for windows created without one. Default: 8192.
    pub default_max_tokens: usize,
    /// `reserved_tokens` for windows created without one. Default: 512.
    pub default_reserved_tokens: usize,
    /// Timeout applied to every model call. Default: 60 s.
    pub upstream_timeout: Duration,
    /// Ratio used by the default tokenizer. Default: 4.0.
    pub chars_per_token: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_tokens: DEFAULT_MAX_TOKENS,
            default_reserved_tokens: DEFAULT_RESERVED_TOKENS,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl EngineConfig {
    pub fn with_default_max_tokens(mut self, tokens: usize) -> Self {
        self.default_max_tokens = tokens;
        self
    }

    pub fn with_default_reserved_tokens(mut self, tokens: usize) -> Self {
        self.default_reserved_tokens = tokens;
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    pub fn with_chars_per_token(mut self, ratio: f64) -> Self {
        self.chars_per_token = ratio;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_max_tokens, 8192);
        assert_eq!(config.default_reserved_tokens, 512);
        assert_eq!(config.upstream_timeout, Duration::from_secs(60));
        assert_eq!(config.chars_per_token, 4.0);
    }

    #[test]
    fn builder_overrides() {
        let config = EngineConfig::default()
            .with_default_max_tokens(100)
            .with_default_reserved_tokens(10)
            .with_upstream_timeout(Duration::from_millis(50))
            .with_chars_per_token(3.0);
        assert_eq!(config.default_max_tokens, 100);
        assert_eq!(config.default_reserved_tokens, 10);
        assert_eq!(config.upstream_timeout, Duration::from_millis(50));
        assert_eq!(config.chars_per_token, 3.0);
    }
}
