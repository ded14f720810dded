// src/parameter/tree.rs
use crate::path;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type Getter = Arc<dyn Fn() -> Result<Value, TreeError> + Send + Sync>;
pub type Setter = Arc<dyn Fn(Value) -> Result<(), TreeError> + Send + Sync>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TreeError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Parameter {0} is read-only")]
    ReadOnly(String),

    #[error("Invalid value for parameter {path}: {reason}")]
    InvalidValue { path: String, reason: String },

    #[error("Binding for parameter {path} failed: {reason}")]
    Binding { path: String, reason: String },
}

enum Node {
    Leaf {
        get: Getter,
        set: Option<Setter>,
    },
    Branch(BTreeMap<String, Node>),
}

impl Node {
    /// A failing leaf inside a branch renders as `{"error": msg}` so its
    /// siblings stay readable. Only a leaf addressed directly fails the read.
    fn render(&self) -> Result<Value, TreeError> {
        match self {
            Node::Leaf { get, .. } => get(),
            Node::Branch(children) => {
                let mut object = Map::new();
                for (name, child) in children {
                    object.insert(name.clone(), child.render().unwrap_or_else(error_value));
                }
                Ok(Value::Object(object))
            }
        }
    }

    fn assign(&self, full_path: &str, value: Value) -> Result<(), TreeError> {
        match self {
            Node::Leaf { set: Some(set), .. } => set(value),
            Node::Leaf { set: None, .. } => Err(TreeError::ReadOnly(full_path.to_string())),
            Node::Branch(children) => {
                let Value::Object(entries) = value else {
                    return Err(TreeError::InvalidValue {
                        path: full_path.to_string(),
                        reason: "expected an object for a branch".to_string(),
                    });
                };
                for (key, value) in entries {
                    let child_path = path::join(full_path, &key);
                    let child = children
                        .get(&key)
                        .ok_or_else(|| TreeError::InvalidPath(child_path.clone()))?;
                    child.assign(&child_path, value)?;
                }
                Ok(())
            }
        }
    }
}

/// Addressable tree of parameters with per-leaf getter/setter bindings.
pub struct ParameterTree {
    root: Node,
}

impl ParameterTree {
    pub fn builder() -> ParameterTreeBuilder {
        ParameterTreeBuilder::default()
    }

    /// Read the value at `path`.
    ///
    /// An empty path renders the whole tree; any other path renders the
    /// addressed node wrapped under its own name, e.g. `{"enable": true}`.
    pub fn get(&self, path: &str) -> Result<Value, TreeError> {
        let segments = path::segments(path);
        let node = self.lookup(&segments, path)?;
        match segments.last() {
            None => node.render(),
            Some(last) => {
                let mut wrapped = Map::new();
                wrapped.insert(last.to_string(), node.render()?);
                Ok(Value::Object(wrapped))
            }
        }
    }

    /// Like `get`, but a failing leaf reads as `{"error": msg}` in place of its
    /// value. Still fails for a path that does not exist.
    pub fn snapshot(&self, path: &str) -> Result<Value, TreeError> {
        let segments = path::segments(path);
        let node = self.lookup(&segments, path)?;
        let value = node.render().unwrap_or_else(error_value);
        match segments.last() {
            None => Ok(value),
            Some(last) => {
                let mut wrapped = Map::new();
                wrapped.insert(last.to_string(), value);
                Ok(Value::Object(wrapped))
            }
        }
    }

    /// Write `value` at `path`. Objects written to a branch are applied key by key.
    pub fn set(&self, path: &str, value: Value) -> Result<(), TreeError> {
        let segments = path::segments(path);
        let node = self.lookup(&segments, path)?;
        node.assign(path::normalize(path), value)
    }

    fn lookup(&self, segments: &[&str], path: &str) -> Result<&Node, TreeError> {
        let mut node = &self.root;
        for segment in segments {
            node = match node {
                Node::Branch(children) => children
                    .get(*segment)
                    .ok_or_else(|| TreeError::InvalidPath(path::normalize(path).to_string()))?,
                Node::Leaf { .. } => {
                    return Err(TreeError::InvalidPath(path::normalize(path).to_string()))
                }
            };
        }
        Ok(node)
    }
}

fn error_value(err: TreeError) -> Value {
    json!({ "error": err.to_string() })
}

#[derive(Default)]
pub struct ParameterTreeBuilder {
    nodes: BTreeMap<String, Node>,
}

impl ParameterTreeBuilder {
    pub fn read_only<G>(mut self, name: &str, get: G) -> Self
    where
        G: Fn() -> Result<Value, TreeError> + Send + Sync + 'static,
    {
        self.nodes.insert(
            name.to_string(),
            Node::Leaf {
                get: Arc::new(get),
                set: None,
            },
        );
        self
    }

    pub fn read_write<G, S>(mut self, name: &str, get: G, set: S) -> Self
    where
        G: Fn() -> Result<Value, TreeError> + Send + Sync + 'static,
        S: Fn(Value) -> Result<(), TreeError> + Send + Sync + 'static,
    {
        self.nodes.insert(
            name.to_string(),
            Node::Leaf {
                get: Arc::new(get),
                set: Some(Arc::new(set)),
            },
        );
        self
    }

    /// Nest another tree under `name`.
    pub fn branch(mut self, name: &str, tree: ParameterTree) -> Self {
        self.nodes.insert(name.to_string(), tree.root);
        self
    }

    pub fn build(self) -> ParameterTree {
        ParameterTree {
            root: Node::Branch(self.nodes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn sample_tree(flag: Arc<AtomicBool>) -> ParameterTree {
        let reader = flag.clone();
        let nested = ParameterTree::builder()
            .read_only("depth", || Ok(json!(2)))
            .build();
        ParameterTree::builder()
            .read_only("name", || Ok(json!("daq")))
            .read_write(
                "enable",
                move || Ok(json!(reader.load(Ordering::SeqCst))),
                move |value| {
                    let enable = value.as_bool().ok_or_else(|| TreeError::InvalidValue {
                        path: "enable".to_string(),
                        reason: "expected a bool".to_string(),
                    })?;
                    flag.store(enable, Ordering::SeqCst);
                    Ok(())
                },
            )
            .branch("nested", nested)
            .build()
    }

    #[test]
    fn test_get_root_renders_whole_tree() {
        let tree = sample_tree(Arc::new(AtomicBool::new(true)));
        assert_eq!(
            tree.get("").unwrap(),
            json!({"name": "daq", "enable": true, "nested": {"depth": 2}})
        );
    }

    #[test]
    fn test_get_wraps_leaf_under_its_name() {
        let tree = sample_tree(Arc::new(AtomicBool::new(false)));
        assert_eq!(tree.get("enable").unwrap(), json!({"enable": false}));
        assert_eq!(tree.get("nested/depth/").unwrap(), json!({"depth": 2}));
        assert_eq!(tree.get("nested").unwrap(), json!({"nested": {"depth": 2}}));
    }

    #[test]
    fn test_get_missing_leaf_fails() {
        let tree = sample_tree(Arc::new(AtomicBool::new(false)));
        assert!(matches!(tree.get("missing"), Err(TreeError::InvalidPath(p)) if p == "missing"));
        assert!(matches!(tree.get("name/deeper"), Err(TreeError::InvalidPath(_))));
    }

    #[test]
    fn test_set_leaf_and_branch() {
        let flag = Arc::new(AtomicBool::new(false));
        let tree = sample_tree(flag.clone());

        tree.set("enable", json!(true)).unwrap();
        assert!(flag.load(Ordering::SeqCst));

        tree.set("", json!({"enable": false})).unwrap();
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_set_read_only_and_invalid_value() {
        let tree = sample_tree(Arc::new(AtomicBool::new(false)));
        assert!(matches!(tree.set("name", json!("x")), Err(TreeError::ReadOnly(_))));
        assert!(matches!(
            tree.set("enable", json!("yes")),
            Err(TreeError::InvalidValue { .. })
        ));
        assert!(matches!(
            tree.set("nested", json!({"missing": 1})),
            Err(TreeError::InvalidPath(p)) if p == "nested/missing"
        ));
    }

    fn tree_with_broken_leaf() -> ParameterTree {
        ParameterTree::builder()
            .read_only("name", || Ok(json!("daq")))
            .read_write(
                "peer_mode",
                || {
                    Err(TreeError::Binding {
                        path: "peer_mode".to_string(),
                        reason: "peer offline".to_string(),
                    })
                },
                |_| Ok(()),
            )
            .build()
    }

    #[test]
    fn test_failing_leaf_does_not_hide_siblings() {
        let tree = tree_with_broken_leaf();

        let root = tree.get("").unwrap();
        assert_eq!(root["name"], json!("daq"));
        assert!(root["peer_mode"]["error"].as_str().unwrap().contains("peer offline"));

        assert!(matches!(tree.get("peer_mode"), Err(TreeError::Binding { .. })));
    }

    #[test]
    fn test_snapshot_embeds_leaf_errors() {
        let tree = tree_with_broken_leaf();

        let leaf = tree.snapshot("peer_mode").unwrap();
        assert!(leaf["peer_mode"]["error"].as_str().unwrap().contains("peer offline"));
        assert_eq!(tree.snapshot("name").unwrap(), json!({"name": "daq"}));
        assert!(matches!(tree.snapshot("missing"), Err(TreeError::InvalidPath(_))));
    }
}
