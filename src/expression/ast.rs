//! Expression AST
//!
//! Nodes are immutable once parsed and carry the `[start, end]` character span
//! they were parsed from.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

/// Character span of a node in its source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeLocation {
    pub start: usize,
    pub end: usize,
}

impl NodeLocation {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Span covering both locations
    pub fn spanning(start: NodeLocation, end: NodeLocation) -> Self {
        Self {
            start: start.start,
            end: end.end,
        }
    }

    pub fn contains(&self, position: usize) -> bool {
        position >= self.start && position <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectAttribute {
    pub key: ExpressionNode,
    pub value: ExpressionNode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ExpressionNode {
    Literal {
        value: Value,
        raw: String,
        location: NodeLocation,
    },
    Identifier {
        name: String,
        location: NodeLocation,
    },
    BinaryExpression {
        operator: String,
        left: Box<ExpressionNode>,
        right: Box<ExpressionNode>,
        location: NodeLocation,
    },
    LogicalExpression {
        operator: String,
        left: Box<ExpressionNode>,
        right: Box<ExpressionNode>,
        location: NodeLocation,
    },
    UnaryExpression {
        operator: String,
        argument: Box<ExpressionNode>,
        location: NodeLocation,
    },
    ThisExpression {
        location: NodeLocation,
    },
    ModelRef {
        #[serde(rename = "ref")]
        reference: String,
        location: NodeLocation,
    },
    MemberExpression {
        object: Box<ExpressionNode>,
        property: Box<ExpressionNode>,
        computed: bool,
        location: NodeLocation,
    },
    ConditionalExpression {
        test: Box<ExpressionNode>,
        consequent: Box<ExpressionNode>,
        alternate: Box<ExpressionNode>,
        location: NodeLocation,
    },
    Compound {
        body: Vec<ExpressionNode>,
        location: NodeLocation,
    },
    CallExpression {
        callee: Box<ExpressionNode>,
        args: Vec<ExpressionNode>,
        location: NodeLocation,
    },
    ArrayExpression {
        elements: Vec<ExpressionNode>,
        location: NodeLocation,
    },
    Assignment {
        left: Box<ExpressionNode>,
        right: Box<ExpressionNode>,
        location: NodeLocation,
    },
    Modification {
        operator: String,
        left: Box<ExpressionNode>,
        right: Box<ExpressionNode>,
        location: NodeLocation,
    },
    Object {
        attributes: Vec<ObjectAttribute>,
        location: NodeLocation,
    },
}

impl ExpressionNode {
    pub fn location(&self) -> NodeLocation {
        match self {
            ExpressionNode::Literal { location, .. }
            | ExpressionNode::Identifier { location, .. }
            | ExpressionNode::BinaryExpression { location, .. }
            | ExpressionNode::LogicalExpression { location, .. }
            | ExpressionNode::UnaryExpression { location, .. }
            | ExpressionNode::ThisExpression { location }
            | ExpressionNode::ModelRef { location, .. }
            | ExpressionNode::MemberExpression { location, .. }
            | ExpressionNode::ConditionalExpression { location, .. }
            | ExpressionNode::Compound { location, .. }
            | ExpressionNode::CallExpression { location, .. }
            | ExpressionNode::ArrayExpression { location, .. }
            | ExpressionNode::Assignment { location, .. }
            | ExpressionNode::Modification { location, .. }
            | ExpressionNode::Object { location, .. } => *location,
        }
    }

    /// Node kind name, as used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            ExpressionNode::Literal { .. } => "Literal",
            ExpressionNode::Identifier { .. } => "Identifier",
            ExpressionNode::BinaryExpression { .. } => "BinaryExpression",
            ExpressionNode::LogicalExpression { .. } => "LogicalExpression",
            ExpressionNode::UnaryExpression { .. } => "UnaryExpression",
            ExpressionNode::ThisExpression { .. } => "ThisExpression",
            ExpressionNode::ModelRef { .. } => "ModelRef",
            ExpressionNode::MemberExpression { .. } => "MemberExpression",
            ExpressionNode::ConditionalExpression { .. } => "ConditionalExpression",
            ExpressionNode::Compound { .. } => "Compound",
            ExpressionNode::CallExpression { .. } => "CallExpression",
            ExpressionNode::ArrayExpression { .. } => "ArrayExpression",
            ExpressionNode::Assignment { .. } => "Assignment",
            ExpressionNode::Modification { .. } => "Modification",
            ExpressionNode::Object { .. } => "Object",
        }
    }

    /// Build the node for a binary operator token
    ///
    /// `||`/`&&` are logical, `=` assigns, compound assignments modify.
    pub fn binary(operator: &str, left: ExpressionNode, right: ExpressionNode) -> Self {
        let location = NodeLocation::spanning(left.location(), right.location());
        let left = Box::new(left);
        let right = Box::new(right);
        let operator = operator.to_string();

        match operator.as_str() {
            "||" | "&&" => ExpressionNode::LogicalExpression {
                operator,
                left,
                right,
                location,
            },
            "=" => ExpressionNode::Assignment {
                left,
                right,
                location,
            },
            "+=" | "-=" | "&=" | "|=" => ExpressionNode::Modification {
                operator,
                left,
                right,
                location,
            },
            _ => ExpressionNode::BinaryExpression {
                operator,
                left,
                right,
                location,
            },
        }
    }
}

/// Anything the evaluator accepts
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Source text, optionally wrapped in `@[ ]@`
    Source(String),
    /// Evaluated in order; the last value wins
    Sequence(Vec<Expression>),
    /// Pre-parsed AST
    Node(Arc<ExpressionNode>),
    /// Non-string literal, returned as-is
    Literal(Value),
}

impl Expression {
    /// Interpret a JSON value as an expression
    ///
    /// `{"value": ...}` objects are unwrapped, arrays become sequences.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => Expression::Source(s.clone()),
            Value::Array(items) => Expression::Sequence(items.iter().map(Expression::from_value).collect()),
            Value::Object(map) if map.contains_key("value") => {
                Expression::from_value(map.get("value").unwrap_or(&Value::Null))
            }
            other => Expression::Literal(other.clone()),
        }
    }
}

impl From<&str> for Expression {
    fn from(source: &str) -> Self {
        Expression::Source(source.to_string())
    }
}

impl From<String> for Expression {
    fn from(source: String) -> Self {
        Expression::Source(source)
    }
}

impl From<&String> for Expression {
    fn from(source: &String) -> Self {
        Expression::Source(source.clone())
    }
}

impl From<ExpressionNode> for Expression {
    fn from(node: ExpressionNode) -> Self {
        Expression::Node(Arc::new(node))
    }
}

impl From<&Value> for Expression {
    fn from(value: &Value) -> Self {
        Expression::from_value(value)
    }
}

impl<T: Into<Expression>> From<Vec<T>> for Expression {
    fn from(items: Vec<T>) -> Self {
        Expression::Sequence(items.into_iter().map(Into::into).collect())
    }
}
