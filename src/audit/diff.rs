//! One-line change summaries for audit update entries

use serde_json::Value;

const MAX_STRING_CHARS: usize = 40;

/// Summarize the top-level fields that differ between two snapshots
///
/// Returns `None` when nothing changed. Nested objects and arrays are
/// summarized by size rather than expanded.
pub fn generate_diff(before: &Value, after: &Value) -> Option<String> {
    let changes: Vec<String> = match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            let mut changes: Vec<String> = b
                .iter()
                .filter_map(|(key, old)| match a.get(key) {
                    Some(new) if new == old => None,
                    Some(new) => Some(format!("{}: {} -> {}", key, format_value(old), format_value(new))),
                    None => Some(format!("{}: {} -> (removed)", key, format_value(old))),
                })
                .collect();
            changes.extend(
                a.iter()
                    .filter(|(key, _)| !b.contains_key(*key))
                    .map(|(key, new)| format!("{}: (added) -> {}", key, format_value(new))),
            );
            changes
        }
        _ if before != after => vec![format!("{} -> {}", format_value(before), format_value(after))],
        _ => Vec::new(),
    };

    if changes.is_empty() {
        None
    } else {
        Some(changes.join(", "))
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) if s.chars().count() > MAX_STRING_CHARS => {
            let head: String = s.chars().take(MAX_STRING_CHARS - 3).collect();
            format!("\"{}...\"", head)
        }
        Value::String(s) => format!("\"{}\"", s),
        Value::Array(arr) => format!("[{} items]", arr.len()),
        Value::Object(obj) => format!("{{{} fields}}", obj.len()),
    }
}
