//! Goal-directed window optimization.
//!
//! Optimization runs asynchronously: [`ContextEngine::optimize`] returns a
//! task immediately and a spawned job serializes the window, asks the model
//! for a candidate element set, normalizes it locally, and swaps it in only
//! if the window has not changed in the meantime and the candidate fits.
//!
//! [`ContextEngine::optimize`]: crate::ContextEngine::optimize

pub mod candidate;
pub mod goals;
pub mod task;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use candidate::{CandidateElement, OptimizationCandidate, OptimizationConstraints};
pub use goals::OptimizationGoal;
pub use task::{
    OptimizationOutcome, OptimizationTask, TaskCounts, TaskFailure, TaskId, TaskRegistry,
    TaskStatus,
};

/// Parameters of an explicit optimization request.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default)]
pub struct OptimizeRequest {
    /// One or more goals for the pass.
    pub goals: Vec<OptimizationGoal>,
    #[serde(default)]
    pub constraints: OptimizationConstraints,
}

impl OptimizeRequest {
    pub fn new(goals: impl IntoIterator<Item = OptimizationGoal>) -> Self {
        Self {
            goals: goals.into_iter().collect(),
            constraints: OptimizationConstraints::default(),
        }
    }

    pub fn with_target_tokens(mut self, target: usize) -> Self {
        self.constraints.target_tokens = Some(target);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_rejects_unknown_goal() {
        let parsed = serde_json::from_str::<OptimizeRequest>(r#"{"goals":["be_better"]}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn request_constraints_default() {
        let req: OptimizeRequest = serde_json::from_str(r#"{"goals":["reduce_tokens"]}"#).unwrap();
        assert_eq!(req.constraints, OptimizationConstraints::default());
        let req = OptimizeRequest::new([OptimizationGoal::ReduceTokens]).with_target_tokens(50);
        assert_eq!(req.constraints.target_tokens, Some(50));
    }
}
