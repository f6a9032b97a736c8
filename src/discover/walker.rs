use serde_json::Value;

use crate::core::{CandidateSet, EvidenceSource};

/// Visits every string leaf under `node`. Object keys are not visited.
pub fn walk_strings<'a>(node: &'a Value, visit: &mut dyn FnMut(&'a str)) {
    match node {
        Value::String(text) => visit(text),
        Value::Array(items) => {
            for item in items {
                walk_strings(item, visit);
            }
        }
        Value::Object(map) => {
            for value in map.values() {
                walk_strings(value, visit);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Adds every string leaf of `node` that looks like a media URL to `sink`.
/// Returns how many were new.
pub fn collect_urls(node: &Value, sink: &mut CandidateSet, source: EvidenceSource) -> usize {
    let mut added = 0;
    walk_strings(node, &mut |text| {
        if sink.insert(text, source) {
            added += 1;
        }
    });
    added
}
