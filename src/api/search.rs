//! Bounded search for string fields in loosely shaped JSON responses.
//!
//! At every object the candidate keys are tried in order; the first
//! non-empty string value wins. If none match, the known container keys are
//! descended in order. Arrays are walked element by element. Non-string
//! values under a candidate key are skipped, not returned.

use serde_json::Value;

/// Nesting deeper than this is ignored.
pub const MAX_DEPTH: usize = 8;

/// Finds the first string value under any of `keys`, looking through
/// `containers` for nested objects.
pub fn search<K, C>(body: &Value, keys: &[K], containers: &[C]) -> Option<String>
where
    K: AsRef<str>,
    C: AsRef<str>,
{
    walk(body, keys, containers, 0).map(str::to_string)
}

fn walk<'v, K, C>(value: &'v Value, keys: &[K], containers: &[C], depth: usize) -> Option<&'v str>
where
    K: AsRef<str>,
    C: AsRef<str>,
{
    if depth > MAX_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            for key in keys {
                if let Some(Value::String(s)) = map.get(key.as_ref()) {
                    if !s.trim().is_empty() {
                        return Some(s.as_str());
                    }
                }
            }
            containers
                .iter()
                .filter_map(|c| map.get(c.as_ref()))
                .find_map(|child| walk(child, keys, containers, depth + 1))
        }
        Value::Array(items) => items
            .iter()
            .find_map(|item| walk(item, keys, containers, depth + 1)),
        _ => None,
    }
}
