//! Per-operation model routing.
//!
//! Scoring and goal recommendation only read the window, so a cheaper model
//! is usually enough; optimization and template generation write content and
//! benefit from a more capable one.

use super::ModelOperation;

/// Default model for every operation.
pub const DEFAULT_MODEL: &str = "google/gemini-2.5-flash";

/// Model routing strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelRouter {
    /// Use a single model for every operation.
    Single(String),
    /// Use one model for read-only operations and another for generation.
    Split {
        analysis_model: String,
        generation_model: String,
    },
}

impl ModelRouter {
    /// The model to use for an operation.
    pub fn model_for(&self, operation: ModelOperation) -> &str {
        match self {
            ModelRouter::Single(model) => model,
            ModelRouter::Split {
                analysis_model,
                generation_model,
            } => match operation {
                ModelOperation::Analyze | ModelOperation::RecommendGoals => analysis_model,
                ModelOperation::Optimize | ModelOperation::GenerateTemplate => generation_model,
            },
        }
    }

    /// Build a router from an optional override for read-only operations.
    pub fn from_models(main: impl Into<String>, analysis: Option<String>) -> Self {
        let main = main.into();
        match analysis {
            Some(analysis_model) if analysis_model != main => ModelRouter::Split {
                analysis_model,
                generation_model: main,
            },
            _ => ModelRouter::Single(main),
        }
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        ModelRouter::Single(DEFAULT_MODEL.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_model() {
        let router = ModelRouter::Single("flash".into());
        assert_eq!(router.model_for(ModelOperation::Analyze), "flash");
        assert_eq!(router.model_for(ModelOperation::GenerateTemplate), "flash");
    }

    #[test]
    fn split_routes_by_operation() {
        let router = ModelRouter::Split {
            analysis_model: "haiku".into(),
            generation_model: "sonnet".into(),
        };
        assert_eq!(router.model_for(ModelOperation::Analyze), "haiku");
        assert_eq!(router.model_for(ModelOperation::RecommendGoals), "haiku");
        assert_eq!(router.model_for(ModelOperation::Optimize), "sonnet");
        assert_eq!(router.model_for(ModelOperation::GenerateTemplate), "sonnet");
    }

    #[test]
    fn from_models_collapses_identical() {
        assert_eq!(
            ModelRouter::from_models("m", Some("m".into())),
            ModelRouter::Single("m".into())
        );
        assert!(matches!(
            ModelRouter::from_models("big", Some("small".into())),
            ModelRouter::Split { .. }
        ));
        assert_eq!(ModelRouter::from_models("m", None), ModelRouter::Single("m".into()));
    }
}
