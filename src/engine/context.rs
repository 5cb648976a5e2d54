// ABOUTME: Instance context type and dotted-path lookup helpers
// ABOUTME: The dynamic key-value mapping carried by every workflow instance

use indexmap::IndexMap;
use serde_json::Value;

/// The mutable data an instance accumulates as it moves through its
/// workflow: form submissions, script results, and the seeded instance ID.
/// Insertion order is preserved so context snapshots diff cleanly.
pub type Context = IndexMap<String, Value>;

/// Resolve a dotted path like `user.age` against the context, descending
/// through nested objects. Returns None when any segment is missing or a
/// non-final segment is not an object.
pub fn get_path<'a>(ctx: &'a Context, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = ctx.get(first)?;

    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

pub fn to_json(ctx: &Context) -> serde_json::Result<String> {
    serde_json::to_string(ctx)
}

pub fn from_json(raw: &str) -> serde_json::Result<Context> {
    if raw.trim().is_empty() {
        return Ok(Context::new());
    }
    serde_json::from_str(raw)
}
