//! Canonical tool name constants.
//!
//! Every reference to a catalog tool by name goes through these constants.

pub const CREATE_SESSION: &str = "create_session";
pub const LIST_SESSIONS: &str = "list_sessions";
pub const GET_SESSION: &str = "get_session";
pub const DELETE_SESSION: &str = "delete_session";

pub const CREATE_CONTEXT_WINDOW: &str = "create_context_window";
pub const GET_CONTEXT_WINDOW: &str = "get_context_window";
pub const DELETE_CONTEXT_WINDOW: &str = "delete_context_window";
pub const ADD_CONTEXT_ELEMENT: &str = "add_context_element";
pub const REMOVE_CONTEXT_ELEMENT: &str = "remove_context_element";
pub const LIST_CONTEXT_ELEMENTS: &str = "list_context_elements";

pub const ANALYZE_CONTEXT: &str = "analyze_context";
pub const OPTIMIZE_CONTEXT: &str = "optimize_context";
pub const AUTO_OPTIMIZE_CONTEXT: &str = "auto_optimize_context";
pub const GET_OPTIMIZATION_TASK: &str = "get_optimization_task";

pub const CREATE_TEMPLATE: &str = "create_template";
pub const LIST_TEMPLATES: &str = "list_templates";
pub const GET_TEMPLATE: &str = "get_template";
pub const RENDER_TEMPLATE: &str = "render_template";
pub const GENERATE_TEMPLATE: &str = "generate_template";
pub const DELETE_TEMPLATE: &str = "delete_template";

pub const GET_STATS: &str = "get_stats";

/// Every catalog tool, in catalog order.
pub const ALL: [&str; 21] = [
    CREATE_SESSION,
    LIST_SESSIONS,
    GET_SESSION,
    DELETE_SESSION,
    CREATE_CONTEXT_WINDOW,
    GET_CONTEXT_WINDOW,
    DELETE_CONTEXT_WINDOW,
    ADD_CONTEXT_ELEMENT,
    REMOVE_CONTEXT_ELEMENT,
    LIST_CONTEXT_ELEMENTS,
    ANALYZE_CONTEXT,
    OPTIMIZE_CONTEXT,
    AUTO_OPTIMIZE_CONTEXT,
    GET_OPTIMIZATION_TASK,
    CREATE_TEMPLATE,
    LIST_TEMPLATES,
    GET_TEMPLATE,
    RENDER_TEMPLATE,
    GENERATE_TEMPLATE,
    DELETE_TEMPLATE,
    GET_STATS,
];
