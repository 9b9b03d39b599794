use std::fmt;

use comfy_table::presets::ASCII_MARKDOWN;
use serde_json::Value;

use crate::types::DataResult;

/// Rows shown per data fragment unless configured otherwise.
pub const DEFAULT_ROW_LIMIT: usize = 20;

/// A rendered table: header plus stringified cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Build the display table for a result set, truncated to `row_limit`.
/// Returns the table and the total row count.
pub fn result_table(result: &DataResult, row_limit: usize) -> (Table, usize) {
    let mut columns = result.column_names();
    if columns.is_empty() {
        // No schema: fall back to the keys of the first row.
        if let Some(first) = result.data.first() {
            columns = first.keys().cloned().collect();
        }
    }

    let rows = result
        .data
        .iter()
        .take(row_limit)
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(c).map(cell_text).unwrap_or_default())
                .collect()
        })
        .collect();

    (Table { columns, rows }, result.row_count())
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.columns.is_empty() {
            return writeln!(f, "(empty)");
        }

        let mut table = comfy_table::Table::new();
        table
            .load_preset(ASCII_MARKDOWN)
            .set_header(self.columns.iter().map(String::as_str));
        for row in &self.rows {
            // Short rows are padded so every line spans all columns.
            let cells = (0..self.columns.len()).map(|i| row.get(i).map(String::as_str).unwrap_or(""));
            table.add_row(cells);
        }
        writeln!(f, "{}", table)
    }
}
