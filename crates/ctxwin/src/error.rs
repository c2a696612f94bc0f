//! Error taxonomy for context-window operations.
//!
//! Every failure is local to the operation that raised it and leaves the
//! store untouched. [`Error::code`] gives a stable snake_case identifier that
//! the REST layer, tool results, and failed optimization tasks all report.

use std::time::Duration;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the engine, the store, and the model backends.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// Inserting the element would break `current + reserved <= max`.
    #[error("capacity exceeded: element needs {requested} tokens but only {available} are available")]
    CapacityExceeded { requested: usize, available: usize },

    /// A referenced session, window, element, template, or task does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Template rendering was missing one or more substitutions.
    #[error("missing template variable(s): {}", .0.join(", "))]
    MissingVariable(Vec<String>),

    /// Caller-supplied input failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The model's analysis response did not have the required shape.
    #[error("malformed analysis result: {0}")]
    MalformedAnalysisResult(String),

    /// The model call failed.
    #[error("upstream error: {0}")]
    UpstreamError(String),

    /// The model call did not complete within the configured timeout.
    #[error("upstream call timed out after {:.0}s", .0.as_secs_f64())]
    UpstreamTimeout(Duration),

    /// The optimization candidate set does not fit the window budget.
    #[error("optimization candidate needs {candidate_tokens} tokens but the window budget is {budget}")]
    CandidateExceedsCapacity {
        candidate_tokens: usize,
        budget: usize,
    },

    /// The window changed between serialization and result application.
    #[error("window changed during optimization (expected version {expected}, found {found})")]
    OptimizationStale { expected: u64, found: u64 },
}

impl Error {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::CapacityExceeded { .. } => "capacity_exceeded",
            Error::NotFound { .. } => "not_found",
            Error::MissingVariable(_) => "missing_variable",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::MalformedAnalysisResult(_) => "malformed_analysis_result",
            Error::UpstreamError(_) => "upstream_error",
            Error::UpstreamTimeout(_) => "upstream_timeout",
            Error::CandidateExceedsCapacity { .. } => "candidate_exceeds_capacity",
            Error::OptimizationStale { .. } => "optimization_stale",
        }
    }

    /// Whether the failure originated from the model call.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::MalformedAnalysisResult(_) | Error::UpstreamError(_) | Error::UpstreamTimeout(_)
        )
    }
}
