use chrono::{DateTime, Utc};

/// "2 days, 3 hours, 15 minutes ago" style elapsed time between `past` and
/// `now`. Zero units are skipped; an elapsed time of zero (or a timestamp in
/// the future) yields `no_change`.
pub fn humanize_elapsed(past: DateTime<Utc>, now: DateTime<Utc>, no_change: &str) -> String {
    let total = (now - past).num_seconds();
    if total <= 0 {
        return no_change.to_string();
    }

    let units = [
        (total / 86_400, "day"),
        (total % 86_400 / 3_600, "hour"),
        (total % 3_600 / 60, "minute"),
        (total % 60, "second"),
    ];

    let parts: Vec<String> = units
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| format!("{} {}{}", n, unit, if *n > 1 { "s" } else { "" }))
        .collect();

    format!("{} ago", parts.join(", "))
}

/// Elapsed time until now, or `no_change` when the timestamp is unknown.
pub fn humanize_since(past: Option<DateTime<Utc>>, no_change: &str) -> String {
    match past {
        Some(t) => humanize_elapsed(t, Utc::now(), no_change),
        None => no_change.to_string(),
    }
}
