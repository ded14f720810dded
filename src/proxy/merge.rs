// src/proxy/merge.rs
//! Path-scoped merging of remote responses into a target's local tree.
//!
//! Merging is shallow at the addressed node: each top-level key of the
//! response replaces the local value under that key wholesale. Nested objects
//! are never merged key by key with prior state.

use crate::path;
use serde_json::{Map, Value};

/// Merge `body` into `root` at `path`.
///
/// Intermediate nodes for all but the last segment are created as needed.
/// A body whose only key is the last segment (`{"b": ..}` for `a/b`) is
/// merged at the parent node; any other object body is the state of the last segment itself
/// and is merged into that node. Scalars replace the last segment's value.
pub fn merge_at(root: &mut Value, path: &str, body: Value) {
    let segments = path::segments(path);
    let Some((last, parents)) = segments.split_last() else {
        merge_keys(root, body);
        return;
    };

    let parent = descend_mut(root, parents);
    match body {
        Value::Object(entries) if entries.len() == 1 && entries.contains_key(*last) => {
            merge_keys(parent, Value::Object(entries));
        }
        Value::Object(entries) => {
            let node = ensure_object(parent)
                .entry(last.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            merge_keys(node, Value::Object(entries));
        }
        scalar => {
            ensure_object(parent).insert(last.to_string(), scalar);
        }
    }
}

/// Look up the subtree at `path`, if present.
pub fn subtree_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path::segments(path)
        .into_iter()
        .try_fold(root, |node, segment| node.get(segment))
}

fn descend_mut<'a>(root: &'a mut Value, segments: &[&str]) -> &'a mut Value {
    segments.iter().fold(root, |node, segment| {
        let child = ensure_object(node)
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !child.is_object() {
            *child = Value::Object(Map::new());
        }
        child
    })
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}

fn merge_keys(node: &mut Value, body: Value) {
    match body {
        Value::Object(entries) => {
            let target = ensure_object(node);
            for (key, value) in entries {
                target.insert(key, value);
            }
        }
        other => *node = other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_wrapped_response_merges_at_parent() {
        let mut data = json!({});
        merge_at(&mut data, "a/b", json!({"b": 1}));
        merge_at(&mut data, "a/c", json!({"c": 2}));
        assert_eq!(data, json!({"a": {"b": 1, "c": 2}}));
    }

    #[test]
    fn test_unwrapped_response_merges_into_last_segment() {
        let mut data = json!({"state": {"on": false, "error": "none"}});
        merge_at(&mut data, "state", json!({"on": true, "mode": "idle"}));
        assert_eq!(data["state"], json!({"on": true, "mode": "idle", "error": "none"}));
    }

    #[test]
    fn test_unwrapped_response_sharing_segment_name_stays_under_it() {
        let mut data = json!({"a": {"keep": true}});
        merge_at(&mut data, "a/state", json!({"state": "idle", "since": 12}));
        assert_eq!(
            data,
            json!({"a": {"keep": true, "state": {"state": "idle", "since": 12}}})
        );
    }

    #[test]
    fn test_nested_values_are_replaced_not_deep_merged() {
        let mut data = json!({"a": {"b": {"x": 1, "y": 2}, "keep": true}});
        merge_at(&mut data, "a/b", json!({"b": {"x": 10}}));
        assert_eq!(data, json!({"a": {"b": {"x": 10}, "keep": true}}));
    }

    #[test]
    fn test_root_merge_overwrites_top_level_keys_only() {
        let mut data = json!({"a": {"deep": 1}, "b": 2});
        merge_at(&mut data, "", json!({"a": {"other": 3}}));
        assert_eq!(data, json!({"a": {"other": 3}, "b": 2}));
    }

    #[test]
    fn test_scalar_response_replaces_leaf() {
        let mut data = json!({"a": {"count": 1}});
        merge_at(&mut data, "a/count/", json!(5));
        assert_eq!(data, json!({"a": {"count": 5}}));
    }

    #[test]
    fn test_intermediate_scalar_is_replaced_by_mapping() {
        let mut data = json!({"a": 7});
        merge_at(&mut data, "a/b", json!({"b": true}));
        assert_eq!(data, json!({"a": {"b": true}}));
    }

    #[test]
    fn test_subtree_at() {
        let data = json!({"a": {"b": {"c": 1}}});
        assert_eq!(subtree_at(&data, "a/b"), Some(&json!({"c": 1})));
        assert_eq!(subtree_at(&data, ""), Some(&data));
        assert_eq!(subtree_at(&data, "a/missing"), None);
    }

    proptest! {
        #[test]
        fn merge_is_idempotent(key in "[a-z]{1,6}", value in any::<i64>()) {
            let body = json!({ key.clone(): value });
            let mut once = json!({});
            merge_at(&mut once, &format!("section/{}", key), body.clone());
            let mut twice = once.clone();
            merge_at(&mut twice, &format!("section/{}", key), body);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn sibling_keys_survive_merges(left in "[a-m]{1,6}", right in "[n-z]{1,6}") {
            let mut data = json!({});
            merge_at(&mut data, &format!("a/{}", left), json!({ left.clone(): 1 }));
            merge_at(&mut data, &format!("a/{}", right), json!({ right.clone(): 2 }));
            prop_assert_eq!(&data["a"][&left], &json!(1));
            prop_assert_eq!(&data["a"][&right], &json!(2));
        }
    }
}
