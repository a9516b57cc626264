//! AST tooling

use super::ast::ExpressionNode;

/// Deepest node whose span contains `position`
///
/// Children are searched before the node itself, so the innermost match wins.
pub fn find_closest_node_at_position(node: &ExpressionNode, position: usize) -> Option<&ExpressionNode> {
    let child = match node {
        ExpressionNode::Modification { left, right, .. }
        | ExpressionNode::Assignment { left, right, .. }
        | ExpressionNode::LogicalExpression { left, right, .. }
        | ExpressionNode::BinaryExpression { left, right, .. } => {
            find_closest_node_at_position(left, position)
                .or_else(|| find_closest_node_at_position(right, position))
        }
        ExpressionNode::UnaryExpression { argument, .. } => {
            find_closest_node_at_position(argument, position)
        }
        ExpressionNode::MemberExpression {
            object, property, ..
        } => find_closest_node_at_position(object, position)
            .or_else(|| find_closest_node_at_position(property, position)),
        ExpressionNode::ConditionalExpression {
            test,
            consequent,
            alternate,
            ..
        } => find_closest_node_at_position(test, position)
            .or_else(|| find_closest_node_at_position(consequent, position))
            .or_else(|| find_closest_node_at_position(alternate, position)),
        ExpressionNode::ArrayExpression { elements: items, .. }
        | ExpressionNode::Compound { body: items, .. } => items
            .iter()
            .find_map(|item| find_closest_node_at_position(item, position)),
        ExpressionNode::Object { attributes, .. } => attributes.iter().find_map(|attr| {
            find_closest_node_at_position(&attr.key, position)
                .or_else(|| find_closest_node_at_position(&attr.value, position))
        }),
        ExpressionNode::CallExpression { callee, args, .. } => args
            .iter()
            .find_map(|arg| find_closest_node_at_position(arg, position))
            .or_else(|| find_closest_node_at_position(callee, position)),
        ExpressionNode::Literal { .. }
        | ExpressionNode::Identifier { .. }
        | ExpressionNode::ThisExpression { .. }
        | ExpressionNode::ModelRef { .. } => None,
    };

    child.or_else(|| node.location().contains(position).then_some(node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parse_expression;

    #[test]
    fn finds_innermost_node() {
        let node = parse_expression("foo + {{bar.baz}}").unwrap();

        let found = find_closest_node_at_position(&node, 9).unwrap();
        assert_eq!(found.kind(), "ModelRef");

        let found = find_closest_node_at_position(&node, 1).unwrap();
        assert_eq!(found.kind(), "Identifier");
    }

    #[test]
    fn returns_none_outside_the_source() {
        let node = parse_expression("foo").unwrap();
        assert!(find_closest_node_at_position(&node, 10).is_none());
    }
}
