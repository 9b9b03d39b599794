//! Response renderer: maps each streamed fragment to display blocks.
//!
//! Rendering is pure. The only side effect is storing the full result set of
//! a data fragment into the caller's `last_result` slot so that it can be
//! reused after the display copy has been truncated.
//!
//! Output is a list of [`Block`]s; the terminal layer decides how to paint
//! them. Markdown-ish strings use `**bold**` for labels.

pub mod chart;
pub mod sql;
pub mod table;
pub mod text;

use serde_json::Value;
use tracing::warn;

use crate::types::{
    ChartMessage, ChatMessage, DataMessage, DataResult, Datasource, Fragment, SchemaMessage,
    TextMessage,
};

pub use chart::normalize_chart_spec;
pub use sql::extract_referenced_tables;
pub use table::{result_table, Table, DEFAULT_ROW_LIMIT};
pub use text::format_user_breakdown;

/// One unit of rendered output.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// Text typed by the user.
    UserText(String),
    /// Formatted (markdown-style) text.
    Markdown(String),
    /// Section label, e.g. "Schema" or "SQL generated".
    Heading(String),
    Code { language: String, body: String },
    Table(Table),
    /// Informational note: truncation, or content that could not be rendered.
    Notice(String),
    /// Plain JSON chart specification (Vega-Lite).
    Chart(Value),
}

/// Render any cached or streamed message.
pub fn render_message(
    message: &ChatMessage,
    row_limit: usize,
    last_result: &mut Option<DataResult>,
) -> Vec<Block> {
    match message {
        ChatMessage::User { text } => vec![Block::UserText(text.clone())],
        ChatMessage::System(fragment) => render_fragment(fragment, row_limit, last_result),
    }
}

/// Dispatch one fragment by kind.
pub fn render_fragment(
    fragment: &Fragment,
    row_limit: usize,
    last_result: &mut Option<DataResult>,
) -> Vec<Block> {
    match fragment {
        Fragment::Text(t) => render_text(t),
        Fragment::Schema(s) => render_schema(s),
        Fragment::Data(d) => render_data(d, row_limit, last_result),
        Fragment::Chart(c) => render_chart(c),
        Fragment::Unknown(raw) => {
            let keys: Vec<String> = raw
                .as_object()
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default();
            warn!(?keys, "unknown fragment kind");
            vec![Block::Notice(format!(
                "unknown fragment kind ({})",
                if keys.is_empty() {
                    "empty".to_string()
                } else {
                    keys.join(", ")
                }
            ))]
        }
    }
}

// ── text ──────────────────────────────────────────────────────────

fn render_text(t: &TextMessage) -> Vec<Block> {
    let joined = t.parts.concat();
    vec![Block::Markdown(format_user_breakdown(&joined))]
}

// ── schema ────────────────────────────────────────────────────────

fn render_schema(s: &SchemaMessage) -> Vec<Block> {
    if let Some(query) = &s.query {
        return vec![Block::Markdown(format!("**Query:** {}", query.question))];
    }
    let Some(result) = &s.result else {
        return Vec::new();
    };
    let mut blocks = vec![Block::Markdown("**Schema resolved.**".to_string())];
    for ds in &result.datasources {
        blocks.extend(render_datasource(ds));
    }
    blocks
}

fn render_datasource(ds: &Datasource) -> Vec<Block> {
    let columns = ["Column", "Type", "Description", "Mode"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let rows = ds
        .schema
        .fields
        .iter()
        .map(|f| {
            vec![
                f.name.clone(),
                f.field_type.clone(),
                f.description
                    .clone()
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| "-".to_string()),
                f.mode.clone(),
            ]
        })
        .collect();

    vec![
        Block::Markdown(format!("**Data source**: {}", ds.descriptor())),
        Block::Heading("Schema".to_string()),
        Block::Table(Table { columns, rows }),
    ]
}

// ── data ──────────────────────────────────────────────────────────

fn render_data(
    d: &DataMessage,
    row_limit: usize,
    last_result: &mut Option<DataResult>,
) -> Vec<Block> {
    if let Some(query) = &d.query {
        let mut blocks = vec![
            Block::Markdown("**Retrieval query**".to_string()),
            Block::Markdown(format!("**Query name:** {}", query.name)),
            Block::Markdown(format!("**Question:** {}", query.question)),
        ];
        for ds in &query.datasources {
            blocks.extend(render_datasource(ds));
        }
        return blocks;
    }

    if let Some(sql) = &d.generated_sql {
        let mut blocks = vec![Block::Heading("SQL generated".to_string())];
        let tables = extract_referenced_tables(sql);
        if !tables.is_empty() {
            let list: Vec<String> = tables.iter().map(|t| format!("- `{}`", t)).collect();
            blocks.push(Block::Markdown(format!(
                "**Referenced tables:**\n{}",
                list.join("\n")
            )));
        }
        blocks.push(Block::Code {
            language: "sql".to_string(),
            body: sql.clone(),
        });
        return blocks;
    }

    if let Some(result) = &d.result {
        let (table, total) = result_table(result, row_limit);
        let mut blocks = vec![
            Block::Markdown("**Data retrieved:**".to_string()),
            Block::Table(table),
        ];
        if total > row_limit {
            blocks.push(Block::Notice(format!(
                "Showing {} / {} rows",
                row_limit, total
            )));
        }
        *last_result = Some(result.clone());
        return blocks;
    }

    Vec::new()
}

// ── chart ─────────────────────────────────────────────────────────

fn render_chart(c: &ChartMessage) -> Vec<Block> {
    if let Some(query) = &c.query {
        return vec![Block::Markdown(query.instructions.clone())];
    }
    match &c.result {
        Some(result) => vec![Block::Chart(normalize_chart_spec(&result.vega_config))],
        None => Vec::new(),
    }
}
