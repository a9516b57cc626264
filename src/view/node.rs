//! View AST nodes
//!
//! Nodes are immutable and shared through [`NodeRef`]. Every node carries a
//! process-unique [`NodeId`]; caches and plugin state are keyed by it instead
//! of holding parent pointers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::binding::PathSegment;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    Asset,
    View,
    Applicability,
    Template,
    Value,
    MultiNode,
    Switch,
    Async,
    Unknown,
    Empty,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeType::Asset => "asset",
            NodeType::View => "view",
            NodeType::Applicability => "applicability",
            NodeType::Template => "template",
            NodeType::Value => "value",
            NodeType::MultiNode => "multi-node",
            NodeType::Switch => "switch",
            NodeType::Async => "async",
            NodeType::Unknown => "unknown",
            NodeType::Empty => "empty",
        })
    }
}

/// Per-node plugin settings lifted out of the authored `plugins` key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePluginOptions {
    /// `plugins.stringResolver.propertiesToSkip`
    pub properties_to_skip: Option<Vec<String>>,
}

/// A node placed at `path` inside its parent's value
#[derive(Debug, Clone)]
pub struct Child {
    pub path: Vec<PathSegment>,
    pub value: NodeRef,
}

/// Payload of asset, view and value nodes
#[derive(Debug, Clone, Default)]
pub struct ValueNode {
    /// Static part of the value; `Null` when only children contribute
    pub value: Value,
    pub children: Vec<Child>,
    pub plugins: Option<NodePluginOptions>,
}

impl ValueNode {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    /// Expression, or `true`
    pub case: Value,
    pub value: NodeRef,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Asset(ValueNode),
    View(ValueNode),
    Value(ValueNode),
    Applicability {
        expression: Value,
        value: NodeRef,
    },
    Template {
        /// Binding of the array to iterate
        data: String,
        template: Value,
        depth: usize,
        dynamic: bool,
    },
    MultiNode {
        /// Replace the target value instead of appending to it
        override_values: bool,
        /// Splice this node's items into an enclosing multi-node
        flatten: bool,
        values: Vec<NodeRef>,
    },
    Switch {
        dynamic: bool,
        cases: Vec<SwitchCase>,
    },
    Async {
        id: String,
        value: NodeRef,
    },
    Unknown,
    Empty,
}

#[derive(Debug)]
pub struct Node {
    id: NodeId,
    pub kind: NodeKind,
}

pub type NodeRef = Arc<Node>;

impl Node {
    pub fn new(kind: NodeKind) -> NodeRef {
        Arc::new(Node { id: NodeId::next(), kind })
    }

    pub fn empty() -> NodeRef {
        Self::new(NodeKind::Empty)
    }

    /// An asset, view or value node of `node_type` (anything else becomes a value node)
    pub fn with_value(node_type: NodeType, value: ValueNode) -> NodeRef {
        Self::new(match node_type {
            NodeType::Asset => NodeKind::Asset(value),
            NodeType::View => NodeKind::View(value),
            _ => NodeKind::Value(value),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn node_type(&self) -> NodeType {
        match &self.kind {
            NodeKind::Asset(_) => NodeType::Asset,
            NodeKind::View(_) => NodeType::View,
            NodeKind::Value(_) => NodeType::Value,
            NodeKind::Applicability { .. } => NodeType::Applicability,
            NodeKind::Template { .. } => NodeType::Template,
            NodeKind::MultiNode { .. } => NodeType::MultiNode,
            NodeKind::Switch { .. } => NodeType::Switch,
            NodeKind::Async { .. } => NodeType::Async,
            NodeKind::Unknown => NodeType::Unknown,
            NodeKind::Empty => NodeType::Empty,
        }
    }

    pub fn value_node(&self) -> Option<&ValueNode> {
        match &self.kind {
            NodeKind::Asset(v) | NodeKind::View(v) | NodeKind::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn children(&self) -> &[Child] {
        self.value_node().map_or(&[], |v| v.children.as_slice())
    }

    /// The authored `id` of an asset, view or value node
    pub fn node_id(&self) -> Option<&str> {
        self.value_node()?.value.get("id")?.as_str()
    }

    /// Same node (same id) with resolved children
    pub fn with_children(&self, children: Vec<Child>) -> NodeRef {
        let kind = match &self.kind {
            NodeKind::Asset(v) => NodeKind::Asset(ValueNode { children, ..v.clone() }),
            NodeKind::View(v) => NodeKind::View(ValueNode { children, ..v.clone() }),
            NodeKind::Value(v) => NodeKind::Value(ValueNode { children, ..v.clone() }),
            other => other.clone(),
        };
        Arc::new(Node { id: self.id, kind })
    }

    /// Same multi-node (same id) with resolved values
    pub fn with_values(&self, values: Vec<NodeRef>) -> NodeRef {
        let kind = match &self.kind {
            NodeKind::MultiNode {
                override_values,
                flatten,
                ..
            } => NodeKind::MultiNode {
                override_values: *override_values,
                flatten: *flatten,
                values,
            },
            other => other.clone(),
        };
        Arc::new(Node { id: self.id, kind })
    }

    /// Nodes directly below this one (children or multi-node values)
    pub fn sub_nodes(&self) -> Vec<NodeRef> {
        match &self.kind {
            NodeKind::Asset(v) | NodeKind::View(v) | NodeKind::Value(v) => {
                v.children.iter().map(|child| Arc::clone(&child.value)).collect()
            }
            NodeKind::MultiNode { values, .. } => values.clone(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_unique_and_kept_by_rebuilds() {
        let a = Node::with_value(NodeType::Asset, ValueNode::new(json!({"id": "a"})));
        let b = Node::with_value(NodeType::Asset, ValueNode::new(json!({"id": "a"})));
        assert_ne!(a.id(), b.id());

        let rebuilt = a.with_children(vec![Child {
            path: vec![PathSegment::Key("label".into())],
            value: Node::empty(),
        }]);
        assert_eq!(rebuilt.id(), a.id());
        assert_eq!(rebuilt.children().len(), 1);
        assert_eq!(rebuilt.node_id(), Some("a"));
    }

    #[test]
    fn only_value_nodes_have_authored_ids() {
        let inner = Node::with_value(NodeType::Value, ValueNode::new(json!({"id": "x"})));
        let wrapped = Node::new(NodeKind::Async {
            id: "x".into(),
            value: inner,
        });
        assert_eq!(wrapped.node_id(), None);
        assert_eq!(wrapped.node_type(), NodeType::Async);
    }
}
