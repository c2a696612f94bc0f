//! The closed set of optimization goals.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What an optimization pass should aim for. Unknown strings are rejected
/// when the request is deserialized.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationGoal {
    ReduceTokens,
    ImproveClarity,
    EnhanceRelevance,
    RemoveRedundancy,
    ImproveStructure,
}

impl OptimizationGoal {
    pub const ALL: [OptimizationGoal; 5] = [
        OptimizationGoal::ReduceTokens,
        OptimizationGoal::ImproveClarity,
        OptimizationGoal::EnhanceRelevance,
        OptimizationGoal::RemoveRedundancy,
        OptimizationGoal::ImproveStructure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationGoal::ReduceTokens => "reduce_tokens",
            OptimizationGoal::ImproveClarity => "improve_clarity",
            OptimizationGoal::EnhanceRelevance => "enhance_relevance",
            OptimizationGoal::RemoveRedundancy => "remove_redundancy",
            OptimizationGoal::ImproveStructure => "improve_structure",
        }
    }

    /// One-line instruction used when prompting a model.
    pub fn instruction(&self) -> &'static str {
        match self {
            OptimizationGoal::ReduceTokens => {
                "Reduce total token usage while preserving essential information."
            }
            OptimizationGoal::ImproveClarity => "Rewrite unclear content so it reads plainly.",
            OptimizationGoal::EnhanceRelevance => {
                "Drop or condense content that is not relevant to the conversation."
            }
            OptimizationGoal::RemoveRedundancy => {
                "Remove duplicated or repeated information."
            }
            OptimizationGoal::ImproveStructure => {
                "Organize content so related information sits together."
            }
        }
    }
}

impl fmt::Display for OptimizationGoal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationGoal {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        OptimizationGoal::ALL
            .into_iter()
            .find(|g| g.as_str() == s.trim())
            .ok_or_else(|| Error::InvalidArgument(format!("unknown optimization goal: {s}")))
    }
}

/// Ensure a goal list is non-empty, dropping repeats but keeping order.
pub fn normalize_goals(goals: &[OptimizationGoal]) -> Result<Vec<OptimizationGoal>> {
    let mut out = Vec::with_capacity(goals.len());
    for goal in goals {
        if !out.contains(goal) {
            out.push(*goal);
        }
    }
    if out.is_empty() {
        return Err(Error::InvalidArgument(
            "at least one optimization goal is required".into(),
        ));
    }
    Ok(out)
}

/// Parse goal strings proposed by a model. Anything outside the closed set,
/// or an empty list, is an upstream failure rather than a caller error.
pub fn parse_recommended_goals(raw: &[String]) -> Result<Vec<OptimizationGoal>> {
    let mut goals = Vec::with_capacity(raw.len());
    for name in raw {
        let goal = name.parse::<OptimizationGoal>().map_err(|_| {
            Error::UpstreamError(format!("model recommended unknown goal: {name}"))
        })?;
        goals.push(goal);
    }
    normalize_goals(&goals)
        .map_err(|_| Error::UpstreamError("model recommended no optimization goals".into()))
}
