//! The context-window tool catalog: one tool per engine operation.
//!
//! Each tool captures a clone of the [`ContextEngine`] handle, parses its
//! typed arguments, and returns the operation's result as a JSON string.
//! Failures come back as `"Error: [code] message"`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::core::FnTool;
use super::names;
use super::spec::ToolSpec;
use crate::analysis::AnalyzeRequest;
use crate::context::element::NewElement;
use crate::context::session::NewSession;
use crate::context::window::NewWindow;
use crate::engine::ContextEngine;
use crate::error::Result;
use crate::optimize::{OptimizationConstraints, OptimizeRequest};
use crate::template::{NewTemplate, TemplateRequest, variables_from_json};

// ── Arguments ──────────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct NoArgs {}

#[derive(Deserialize, JsonSchema)]
struct SessionArgs {
    /// Id returned by `create_session`.
    session_id: String,
}

#[derive(Deserialize, JsonSchema)]
struct CreateWindowArgs {
    /// Session that will own the window.
    session_id: String,
    #[serde(flatten)]
    window: NewWindow,
}

#[derive(Deserialize, JsonSchema)]
struct WindowArgs {
    /// Id of the context window.
    context_id: String,
}

#[derive(Deserialize, JsonSchema)]
struct AddElementArgs {
    /// Id of the context window.
    context_id: String,
    #[serde(flatten)]
    element: NewElement,
}

#[derive(Deserialize, JsonSchema)]
struct RemoveElementArgs {
    /// Id of the context window.
    context_id: String,
    /// Id of the element to remove.
    element_id: String,
}

#[derive(Deserialize, JsonSchema)]
struct ListElementsArgs {
    /// Id of the context window.
    context_id: String,
    /// Only return elements carrying this tag.
    #[serde(default)]
    tag: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
struct AnalyzeArgs {
    /// Id of the context window.
    context_id: String,
    #[serde(flatten)]
    request: AnalyzeRequest,
}

#[derive(Deserialize, JsonSchema)]
struct OptimizeArgs {
    /// Id of the context window.
    context_id: String,
    #[serde(flatten)]
    request: OptimizeRequest,
}

#[derive(Deserialize, JsonSchema)]
struct AutoOptimizeArgs {
    /// Id of the context window.
    context_id: String,
    #[serde(default)]
    constraints: OptimizationConstraints,
}

#[derive(Deserialize, JsonSchema)]
struct TaskArgs {
    /// Id returned by `optimize_context` or `auto_optimize_context`.
    task_id: String,
}

#[derive(Deserialize, JsonSchema)]
struct ListTemplatesArgs {
    /// Only return templates in this category.
    #[serde(default)]
    category: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
struct TemplateArgs {
    /// Id of the template.
    template_id: String,
}

#[derive(Deserialize, JsonSchema)]
struct RenderArgs {
    /// Id of the template.
    template_id: String,
    /// Values for the template's placeholders.
    #[serde(default)]
    variables: serde_json::Map<String, serde_json::Value>,
}

// ── Results ────────────────────────────────────────────────────────

fn respond<T: Serialize>(result: Result<T>) -> String {
    match result {
        Ok(value) => serde_json::to_string_pretty(&value)
            .unwrap_or_else(|e| format!("Error: failed to encode result: {e}")),
        Err(e) => format!("Error: [{}] {e}", e.code()),
    }
}

fn deleted(id: &str) -> serde_json::Value {
    json!({"deleted": true, "id": id})
}

// ── Catalog ────────────────────────────────────────────────────────

/// Build every catalog tool against `engine`.
pub fn context_tools(engine: &ContextEngine) -> Vec<FnTool> {
    let mut tools = session_tools(engine);
    tools.extend(window_tools(engine));
    tools.extend(optimization_tools(engine));
    tools.extend(template_tools(engine));

    let e = engine.clone();
    tools.push(FnTool::new(
        ToolSpec::builder(names::GET_STATS)
            .purpose("Report store-wide counters and model usage")
            .when_to_use("To see how many sessions, windows, templates and tasks exist")
            .parameters_for::<NoArgs>()
            .to_tool_def(),
        move |_: NoArgs| {
            let engine = e.clone();
            async move { respond(Ok(engine.stats())) }
        },
    ));
    tools
}

fn session_tools(engine: &ContextEngine) -> Vec<FnTool> {
    let (create, list, get, delete) = (
        engine.clone(),
        engine.clone(),
        engine.clone(),
        engine.clone(),
    );
    vec![
        FnTool::new(
            ToolSpec::builder(names::CREATE_SESSION)
                .purpose("Create a session that groups context windows")
                .when_to_use("Before creating the first window for a conversation")
                .parameters_for::<NewSession>()
                .example(r#"{"name": "support chat"}"#, "session with a generated id")
                .to_tool_def(),
            move |args: NewSession| {
                let engine = create.clone();
                async move { respond(engine.create_session(args)) }
            },
        ),
        FnTool::new(
            ToolSpec::builder(names::LIST_SESSIONS)
                .purpose("List every session, oldest first")
                .parameters_for::<NoArgs>()
                .to_tool_def(),
            move |_: NoArgs| {
                let engine = list.clone();
                async move { respond(Ok(engine.list_sessions())) }
            },
        ),
        FnTool::new(
            ToolSpec::builder(names::GET_SESSION)
                .purpose("Fetch a session with its window summaries and statistics")
                .parameters_for::<SessionArgs>()
                .to_tool_def(),
            move |args: SessionArgs| {
                let engine = get.clone();
                async move { respond(engine.get_session(&args.session_id)) }
            },
        ),
        FnTool::new(
            ToolSpec::builder(names::DELETE_SESSION)
                .purpose("Delete a session and every window it owns")
                .when_not_to_use("To drop a single window")
                .parameters_for::<SessionArgs>()
                .disambiguate(
                    "Removing one window",
                    names::DELETE_CONTEXT_WINDOW,
                    "it leaves the rest of the session intact",
                )
                .to_tool_def(),
            move |args: SessionArgs| {
                let engine = delete.clone();
                async move {
                    respond(
                        engine
                            .delete_session(&args.session_id)
                            .map(|()| deleted(&args.session_id)),
                    )
                }
            },
        ),
    ]
}

fn window_tools(engine: &ContextEngine) -> Vec<FnTool> {
    let (create, get, delete, add, remove, list) = (
        engine.clone(),
        engine.clone(),
        engine.clone(),
        engine.clone(),
        engine.clone(),
        engine.clone(),
    );
    vec![
        FnTool::new(
            ToolSpec::builder(names::CREATE_CONTEXT_WINDOW)
                .purpose("Create a token-budgeted context window inside a session")
                .when_to_use("When a session needs a new prompt context")
                .parameters_for::<CreateWindowArgs>()
                .example(
                    r#"{"session_id": "...", "max_tokens": 4096, "reserved_tokens": 512}"#,
                    "window summary with id and utilization",
                )
                .output_format("JSON window summary. Unset sizes use the server defaults")
                .to_tool_def(),
            move |args: CreateWindowArgs| {
                let engine = create.clone();
                async move { respond(engine.create_window(&args.session_id, args.window)) }
            },
        ),
        FnTool::new(
            ToolSpec::builder(names::GET_CONTEXT_WINDOW)
                .purpose("Fetch a window with its elements and token usage")
                .when_to_use("Before deciding what to add, remove, or optimize")
                .parameters_for::<WindowArgs>()
                .to_tool_def(),
            move |args: WindowArgs| {
                let engine = get.clone();
                async move { respond(engine.get_window(&args.context_id)) }
            },
        ),
        FnTool::new(
            ToolSpec::builder(names::DELETE_CONTEXT_WINDOW)
                .purpose("Delete a context window")
                .parameters_for::<WindowArgs>()
                .to_tool_def(),
            move |args: WindowArgs| {
                let engine = delete.clone();
                async move {
                    respond(
                        engine
                            .delete_window(&args.context_id)
                            .map(|()| deleted(&args.context_id)),
                    )
                }
            },
        ),
        FnTool::new(
            ToolSpec::builder(names::ADD_CONTEXT_ELEMENT)
                .purpose("Append an element to a window if it fits the token budget")
                .when_to_use("To add system instructions, turns, tool output, or multimodal references")
                .when_not_to_use("To edit an existing element; remove it and add a new one instead")
                .parameters_for::<AddElementArgs>()
                .example(
                    r#"{"context_id": "...", "content": "You are terse.", "type": "system", "priority": 9}"#,
                    "the stored element with its token count and the window utilization",
                )
                .output_format("JSON with the stored element and updated token usage. Fails with capacity_exceeded when the element does not fit")
                .to_tool_def(),
            move |args: AddElementArgs| {
                let engine = add.clone();
                async move { respond(engine.add_element(&args.context_id, args.element)) }
            },
        ),
        FnTool::new(
            ToolSpec::builder(names::REMOVE_CONTEXT_ELEMENT)
                .purpose("Remove one element from a window and release its tokens")
                .parameters_for::<RemoveElementArgs>()
                .to_tool_def(),
            move |args: RemoveElementArgs| {
                let engine = remove.clone();
                async move { respond(engine.remove_element(&args.context_id, &args.element_id)) }
            },
        ),
        FnTool::new(
            ToolSpec::builder(names::LIST_CONTEXT_ELEMENTS)
                .purpose("List a window's elements in insertion order, optionally by tag")
                .parameters_for::<ListElementsArgs>()
                .disambiguate(
                    "You also need the window's token usage",
                    names::GET_CONTEXT_WINDOW,
                    "it returns the elements together with the budget",
                )
                .to_tool_def(),
            move |args: ListElementsArgs| {
                let engine = list.clone();
                async move { respond(engine.list_elements(&args.context_id, args.tag.as_deref())) }
            },
        ),
    ]
}

fn optimization_tools(engine: &ContextEngine) -> Vec<FnTool> {
    let (analyze, optimize, auto, task) = (
        engine.clone(),
        engine.clone(),
        engine.clone(),
        engine.clone(),
    );
    vec![
        FnTool::new(
            ToolSpec::builder(names::ANALYZE_CONTEXT)
                .purpose("Score a window's quality and list issues and recommendations")
                .when_to_use("Before optimizing, to see what is wrong with the window")
                .parameters_for::<AnalyzeArgs>()
                .output_format("JSON analysis with quality_score (0-100), metrics, insights, issues, strengths, recommendations")
                .to_tool_def(),
            move |args: AnalyzeArgs| {
                let engine = analyze.clone();
                async move { respond(engine.analyze(&args.context_id, args.request).await) }
            },
        ),
        FnTool::new(
            ToolSpec::builder(names::OPTIMIZE_CONTEXT)
                .purpose("Submit a background optimization pass with explicit goals")
                .when_to_use("When you know which goals to apply")
                .parameters_for::<OptimizeArgs>()
                .example(
                    r#"{"context_id": "...", "goals": ["remove_redundancy"], "constraints": {"target_tokens": 2000}}"#,
                    "a pending task to poll",
                )
                .disambiguate(
                    "No particular goal in mind",
                    names::AUTO_OPTIMIZE_CONTEXT,
                    "it asks the model to choose goals first",
                )
                .output_format("JSON optimization task. Poll it with get_optimization_task")
                .to_tool_def(),
            move |args: OptimizeArgs| {
                let engine = optimize.clone();
                async move { respond(engine.optimize(&args.context_id, args.request)) }
            },
        ),
        FnTool::new(
            ToolSpec::builder(names::AUTO_OPTIMIZE_CONTEXT)
                .purpose("Submit a background optimization pass whose goals the model picks")
                .parameters_for::<AutoOptimizeArgs>()
                .disambiguate(
                    "You already know the goals",
                    names::OPTIMIZE_CONTEXT,
                    "it skips the recommendation call",
                )
                .output_format("JSON optimization task. Poll it with get_optimization_task")
                .to_tool_def(),
            move |args: AutoOptimizeArgs| {
                let engine = auto.clone();
                async move { respond(engine.auto_optimize(&args.context_id, args.constraints)) }
            },
        ),
        FnTool::new(
            ToolSpec::builder(names::GET_OPTIMIZATION_TASK)
                .purpose("Poll an optimization task for status, progress, and result")
                .parameters_for::<TaskArgs>()
                .to_tool_def(),
            move |args: TaskArgs| {
                let engine = task.clone();
                async move { respond(engine.task(&args.task_id)) }
            },
        ),
    ]
}

fn template_tools(engine: &ContextEngine) -> Vec<FnTool> {
    let (create, list, get, render, generate, delete) = (
        engine.clone(),
        engine.clone(),
        engine.clone(),
        engine.clone(),
        engine.clone(),
        engine.clone(),
    );
    vec![
        FnTool::new(
            ToolSpec::builder(names::CREATE_TEMPLATE)
                .purpose("Register a prompt template with {placeholder} variables")
                .parameters_for::<NewTemplate>()
                .example(
                    r#"{"name": "review", "template": "Review this {language} code: {code}"}"#,
                    "template with variables [language, code]",
                )
                .disambiguate(
                    "You only have a description of what the template should do",
                    names::GENERATE_TEMPLATE,
                    "it drafts the text with the model",
                )
                .to_tool_def(),
            move |args: NewTemplate| {
                let engine = create.clone();
                async move { respond(engine.create_template(args)) }
            },
        ),
        FnTool::new(
            ToolSpec::builder(names::LIST_TEMPLATES)
                .purpose("List registered templates, optionally by category")
                .parameters_for::<ListTemplatesArgs>()
                .to_tool_def(),
            move |args: ListTemplatesArgs| {
                let engine = list.clone();
                async move { respond(Ok(engine.list_templates(args.category.as_deref()))) }
            },
        ),
        FnTool::new(
            ToolSpec::builder(names::GET_TEMPLATE)
                .purpose("Fetch a template with its variables and usage count")
                .parameters_for::<TemplateArgs>()
                .to_tool_def(),
            move |args: TemplateArgs| {
                let engine = get.clone();
                async move { respond(engine.get_template(&args.template_id)) }
            },
        ),
        FnTool::new(
            ToolSpec::builder(names::RENDER_TEMPLATE)
                .purpose("Substitute variables into a template")
                .when_to_use("When every placeholder has a value")
                .parameters_for::<RenderArgs>()
                .output_format("JSON with rendered_content. Fails with missing_variable naming every unfilled placeholder")
                .to_tool_def(),
            move |args: RenderArgs| {
                let engine = render.clone();
                async move {
                    let vars = variables_from_json(&args.variables);
                    respond(engine.render_template(&args.template_id, &vars))
                }
            },
        ),
        FnTool::new(
            ToolSpec::builder(names::GENERATE_TEMPLATE)
                .purpose("Have the model draft and register a template for a purpose")
                .parameters_for::<TemplateRequest>()
                .to_tool_def(),
            move |args: TemplateRequest| {
                let engine = generate.clone();
                async move { respond(engine.generate_template(args).await) }
            },
        ),
        FnTool::new(
            ToolSpec::builder(names::DELETE_TEMPLATE)
                .purpose("Delete a registered template")
                .parameters_for::<TemplateArgs>()
                .to_tool_def(),
            move |args: TemplateArgs| {
                let engine = delete.clone();
                async move {
                    respond(
                        engine
                            .delete_template(&args.template_id)
                            .map(|()| deleted(&args.template_id)),
                    )
                }
            },
        ),
    ]
}
