//! Best-effort table reference extraction from generated SQL.
//!
//! This is a regex scan, not a parser: identifiers following `FROM` or
//! `JOIN` are collected. Subqueries are skipped because `(` never matches;
//! `EXTRACT(x FROM col)` will report `col`. Good enough for a hint list.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

static TABLE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:from|join)\s+(`?[\w\-]+`?(?:\.`?[\w\-]+`?){0,2})")
        .expect("table reference pattern is valid")
});

/// Distinct `[project.]dataset.table` references, sorted.
pub fn extract_referenced_tables(sql: &str) -> Vec<String> {
    TABLE_REF
        .captures_iter(sql)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().replace('`', ""))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
