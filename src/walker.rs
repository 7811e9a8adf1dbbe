//! Generic search over untyped JSON trees.
//!
//! Embedded page data (Next.js `__NEXT_DATA__` payloads, search API
//! responses) nests item records at unpredictable depths. Instead of
//! hard-coding a path, we walk the whole tree and collect every object that
//! looks like an item record.

use serde_json::{Map, Value};

/// Maximum nesting depth visited. Matches serde_json's parse recursion limit,
/// so anything produced by `serde_json::from_str` is fully covered.
pub const MAX_WALK_DEPTH: usize = 128;

/// Collect every object node for which `predicate` holds.
///
/// Traversal is depth-first in document order. A matching object is treated
/// as a leaf: it is collected and its children are not visited. Non-matching
/// objects and arrays are descended into; scalars are ignored.
pub fn find_leaves<'a, P>(root: &'a Value, predicate: P) -> Vec<&'a Map<String, Value>>
where
    P: Fn(&Map<String, Value>) -> bool,
{
    let mut leaves = Vec::new();
    walk(root, &predicate, 0, &mut leaves);
    leaves
}

fn walk<'a, P>(node: &'a Value, predicate: &P, depth: usize, out: &mut Vec<&'a Map<String, Value>>)
where
    P: Fn(&Map<String, Value>) -> bool,
{
    if depth > MAX_WALK_DEPTH {
        return;
    }

    match node {
        Value::Object(map) => {
            if predicate(map) {
                out.push(map);
                return;
            }
            for child in map.values() {
                walk(child, predicate, depth + 1, out);
            }
        }
        Value::Array(items) => {
            for child in items {
                walk(child, predicate, depth + 1, out);
            }
        }
        _ => {}
    }
}

/// Predicate used by the JSON extraction strategy: the object has a field
/// named `price` holding a number.
pub fn has_numeric_price(node: &Map<String, Value>) -> bool {
    matches!(node.get("price"), Some(Value::Number(_)))
}
