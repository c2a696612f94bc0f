//! Offline helpers for working with ctxwin templates and token budgets.
//!
//! # Examples
//!
//! ```sh
//! # Count tokens of a string or of stdin
//! ctxwin tokens "How many tokens is this?"
//! cat prompt.md | ctxwin tokens
//!
//! # Render a template
//! ctxwin render "Review this {language} code: {code}" --var language=rust --var code="fn main() {}"
//!
//! # List a template's variables
//! ctxwin variables "Hello {name}, welcome to {place}"
//!
//! # Print the tool catalog
//! ctxwin tools > tools.json
//! ```

use std::collections::HashMap;
use std::io::{self, Read};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use ctxwin::context::{CharRatioTokenizer, DEFAULT_CHARS_PER_TOKEN, Tokenizer};
use ctxwin::model::HeuristicBackend;
use ctxwin::template::{NewTemplate, PromptTemplate, extract_variables};
use ctxwin::tools::ToolSet;
use ctxwin::ContextEngine;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

/// Offline helpers for ctxwin templates and token budgets.
#[derive(Parser)]
#[command(name = "ctxwin")]
struct Cli {
    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Count the tokens of TEXT (or stdin).
    Tokens {
        text: Option<String>,
        /// Characters per token for the ratio tokenizer.
        #[arg(long, default_value_t = DEFAULT_CHARS_PER_TOKEN)]
        chars_per_token: f64,
    },
    /// Render a template string.
    Render {
        /// Template text with {variable} placeholders (or stdin).
        template: Option<String>,
        /// Substitution as key=value. Repeatable.
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
    },
    /// List the variables of a template string.
    Variables { template: Option<String> },
    /// Print the tool catalog as JSON.
    Tools,
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

/// Use the argument if present, otherwise read all of stdin.
fn text_or_stdin(text: Option<String>) -> io::Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

fn run(command: Command) -> Result<String, String> {
    match command {
        Command::Tokens {
            text,
            chars_per_token,
        } => {
            let text = text_or_stdin(text).map_err(|e| format!("failed to read stdin: {e}"))?;
            let tokenizer = CharRatioTokenizer::new(chars_per_token);
            debug!("Counting {} chars at {chars_per_token} chars/token", text.chars().count());
            Ok(tokenizer.count_tokens(&text).to_string())
        }
        Command::Render { template, vars } => {
            let text = text_or_stdin(template).map_err(|e| format!("failed to read stdin: {e}"))?;
            let template =
                PromptTemplate::new(NewTemplate::new("cli", text)).map_err(|e| e.to_string())?;
            let vars: HashMap<String, String> = vars.into_iter().collect();
            template.render(&vars).map_err(|e| e.to_string())
        }
        Command::Variables { template } => {
            let text = text_or_stdin(template).map_err(|e| format!("failed to read stdin: {e}"))?;
            Ok(extract_variables(&text).join("\n"))
        }
        Command::Tools => {
            let engine = ContextEngine::new(Arc::new(HeuristicBackend::new()));
            let tools = ToolSet::new().with_context_tools(&engine);
            serde_json::to_string_pretty(&tools.definitions())
                .map_err(|e| format!("failed to encode tool definitions: {e}"))
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(cli.command) {
        Ok(output) => println!("{output}"),
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
