//! Dotted element paths over JSON resources.

use serde_json::Value;

/// Resolves a dotted path (`subject.reference`) against `value`.
///
/// Arrays met along the way, including at the end of the path, are fanned
/// out, so the result holds every non-array value the path reaches.
pub fn values_at_path<'a>(value: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![value];

    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = current
            .into_iter()
            .flat_map(flatten)
            .filter_map(|v| v.as_object().and_then(|obj| obj.get(segment)))
            .collect();
    }

    current.into_iter().flat_map(flatten).collect()
}

/// Collects every scalar (string, number, boolean) below `value`.
pub fn scalar_leaves(value: &Value) -> Vec<&Value> {
    let mut leaves = Vec::new();
    collect_leaves(value, &mut leaves);
    leaves
}

fn collect_leaves<'a>(value: &'a Value, leaves: &mut Vec<&'a Value>) {
    match value {
        Value::Object(obj) => obj.values().for_each(|v| collect_leaves(v, leaves)),
        Value::Array(items) => items.iter().for_each(|v| collect_leaves(v, leaves)),
        Value::Null => {}
        scalar => leaves.push(scalar),
    }
}

fn flatten(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().flat_map(flatten).collect(),
        other => vec![other],
    }
}
