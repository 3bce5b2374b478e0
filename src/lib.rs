//! Linnea compiles detection rules for algorithmically-generated DNS domains
//! into a single analytical SQL query over a wide DNS-reply table.
//!
//! A rule is a comma-separated list of predicate sets. The innermost set
//! filters raw replies with regex and time predicates; each further set
//! becomes one wrapping SQL layer running windowed counts over the inner
//! result; an optional outermost wrap counts suspect clients.
mod ast;
mod builder;
#[cfg(feature = "cli")]
mod cli;
#[cfg(feature = "cli")]
mod config;
mod context;
mod error;
mod parser;
mod visitor;

pub use anyhow::Result;
pub use ast::{Item, Node};
#[cfg(feature = "cli")]
pub use cli::Cli;
#[cfg(feature = "cli")]
pub use config::Config;
pub use context::{FuncTemplate, TemplatePart};
pub use error::{print_error, Error, Reason, Span};
pub use parser::parse;

use std::collections::HashMap;

use chrono::NaiveDateTime;

/// The wall-clock format of `t0` and of all timestamps fed to the CLI.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Everything a compile call needs besides the rule source.
#[derive(Debug, Clone)]
pub struct Options {
    pub table_name: String,
    /// Logical names to SQL column expressions; `t0` is overridden per
    /// compile from [Options::timestamp].
    pub identifier_map: HashMap<String, String>,
    pub function_map: HashMap<String, FuncTemplate>,
    /// The baseline moment substituted for `t0`.
    pub timestamp: NaiveDateTime,
    /// Wrap the query in the outermost suspect-client aggregation.
    pub with_group_by: bool,
    /// Replacements for the `<...>` window parameters of the rendered query.
    pub placeholders: HashMap<String, String>,
}

impl Options {
    pub fn new(timestamp: NaiveDateTime) -> Self {
        Options {
            table_name: "hplDNSReplies".to_string(),
            identifier_map: standard_identifiers(),
            function_map: standard_functions(),
            timestamp,
            with_group_by: false,
            placeholders: HashMap::new(),
        }
    }
}

/// The standard mapping from logical names to physical DNS-reply columns.
pub fn standard_identifiers() -> HashMap<String, String> {
    [
        ("domain", "request"),
        ("client", "dst"),
        ("timestamp", "timestamp"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// The standard emission templates: regex match and regex occurrence count.
pub fn standard_functions() -> HashMap<String, FuncTemplate> {
    use TemplatePart::{Param, Text};
    let text = |s: &str| Text(s.to_string());
    HashMap::from([
        (
            "match".to_string(),
            vec![text("(REGEXP_INSTR("), Param(0), text(","), Param(1), text(")>0)")],
        ),
        (
            "count".to_string(),
            vec![text("REGEXP_COUNT("), Param(0), text(","), Param(1), text(")")],
        ),
    ])
}

/// Compile a rule into a SQL string.
///
/// This has two stages:
/// - [parse] — Build an AST from the rule source.
/// - [translate] — Visit the AST into layer buffers and render the query.
pub fn compile(source: &str, options: &Options) -> Result<String> {
    parse(source).and_then(|ast| translate(&ast, options))
}

/// Render an already-parsed rule with the given options.
pub fn translate(ast: &Node, options: &Options) -> Result<String> {
    let mut identifier_map = options.identifier_map.clone();
    identifier_map.insert(
        "t0".to_string(),
        format!(
            "(TIMESTAMP '{}')",
            options.timestamp.format(TIMESTAMP_FORMAT)
        ),
    );

    let mut context = context::Context::new(&identifier_map, &options.function_map);
    visitor::visit(ast, &mut context)?;

    builder::SqlBuilder::new(
        &context.layers,
        &context.used_columns,
        &options.table_name,
        &identifier_map,
    )
    .build(options.with_group_by, &options.placeholders)
}
