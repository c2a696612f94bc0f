//! Function-calling surface over the engine.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`core`] | [`Tool`] trait, [`ToolSet`] dispatch, [`FnTool`], argument helpers |
//! | [`spec`] | [`ToolSpec`] structured descriptions |
//! | [`names`] | Tool name constants |
//! | [`catalog`] | The context-window catalog, one tool per operation |

pub mod catalog;
pub mod core;
pub mod names;
pub mod spec;

pub use self::core::{
    DEFAULT_MAX_RESULT_BYTES, FnTool, Tool, ToolFuture, ToolSet, log_tool_call, parse_tool_args,
    truncate_result, validate_tool_arguments,
};
pub use catalog::context_tools;
pub use spec::{ToolSpec, ToolSpecBuilder};
