//! Text fragment post-processing.
//!
//! Agents summarising per-user activity tend to emit it as one run-on line:
//!
//! ```text
//! user_id:3fa9c0 (ログイン: 5回)(購入: 2回) user_id:77b1 (ログイン: 1回)
//! ```
//!
//! which is reshaped into a nested bullet list, one user per bullet and one
//! count per sub-bullet. Text without such runs passes through untouched.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static USER_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"user_id\s*[:：]\s*([0-9a-fA-F]+)[\s,、:：\-]*((?:[(（][^()（）]*?[:：]\s*\d+\s*回\s*[)）][\s,、]*)+)",
    )
    .expect("user run pattern is valid")
});

static COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[(（]\s*([^()（）:：]+?)\s*[:：]\s*(\d+)\s*回\s*[)）]")
        .expect("count pattern is valid")
});

/// Reshape `user_id:<hex> (label: N回)…` runs into nested bullets.
pub fn format_user_breakdown(text: &str) -> String {
    if !USER_RUN.is_match(text) {
        return text.to_string();
    }

    let mut last_end = 0;
    USER_RUN
        .replace_all(text, |caps: &Captures| {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or_default();
            // Break the line only when the run does not already start one.
            let starts_line =
                whole.start == 0 || whole.start == last_end || text[..whole.start].ends_with('\n');
            last_end = whole.end;

            let mut block = if starts_line { String::new() } else { "\n".to_string() };
            block.push_str(&format!("- user_id:{}\n", &caps[1]));
            for count in COUNT.captures_iter(&caps[2]) {
                block.push_str(&format!("  - {}: {}回\n", count[1].trim(), &count[2]));
            }
            block
        })
        .into_owned()
}
