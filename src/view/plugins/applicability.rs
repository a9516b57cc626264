//! `applicability`: an object is rendered unless its expression is `false`

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use super::ViewPlugin;
use crate::view::parser::object_has_key;
use crate::view::{Node, NodeKind, NodeType, Parser, ParseNodeRequest, ParsedNode, ViewInstance};

pub struct ApplicabilityPlugin;

impl ApplicabilityPlugin {
    fn parse_applicability(parser: &Parser, request: &ParseNodeRequest) -> ParsedNode {
        let mut body = request.raw.clone();
        let expression = body
            .as_object_mut()
            .and_then(|map| map.remove("applicability"))
            .unwrap_or(Value::Null);

        let Some(value) = parser.parse_object(&body, request.node_type, request.options)? else {
            return Ok(None);
        };

        parser.create_ast_node(Ok(Some(Node::new(NodeKind::Applicability { expression, value }))), &request.raw)
    }
}

impl ViewPlugin for ApplicabilityPlugin {
    fn apply(self: Arc<Self>, view: &ViewInstance) {
        view.hooks.parser.tap("applicability", |parser, _| {
            parser.hooks.determine_node_type.tap("applicability", |raw, _| {
                object_has_key(raw, "applicability").then_some(NodeType::Applicability)
            });

            parser.hooks.parse_node.tap("applicability", |request, parser| {
                (request.determined == NodeType::Applicability).then(|| Self::parse_applicability(parser, request))
            });
        });

        view.hooks.resolver.tap("applicability", |resolver, _| {
            resolver.hooks.before_resolve.tap("applicability", |node, options, _| {
                let Some(n) = node? else {
                    return Ok(None);
                };
                let NodeKind::Applicability { expression, value } = &n.kind else {
                    return Ok(Some(n));
                };

                let eval = options.evaluate(expression)?;
                if eval.is_pending() {
                    warn!("Async applicability expression; keeping the node");
                    return Ok(Some(Arc::clone(value)));
                }

                match eval.ready() {
                    Some(Value::Bool(false)) => Ok(None),
                    _ => Ok(Some(Arc::clone(value))),
                }
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::ParseObjectOptions;
    use serde_json::json;

    #[test]
    fn applicability_wraps_the_rest_of_the_object() {
        let parser = Parser::new();
        parser.hooks.determine_node_type.tap("applicability", |raw, _| {
            object_has_key(raw, "applicability").then_some(NodeType::Applicability)
        });
        parser.hooks.parse_node.tap("applicability", |request, parser| {
            (request.determined == NodeType::Applicability)
                .then(|| ApplicabilityPlugin::parse_applicability(parser, request))
        });

        let node = parser
            .parse_object(
                &json!({"applicability": "{{show}}", "id": "a", "type": "text"}),
                NodeType::Asset,
                ParseObjectOptions::default(),
            )
            .unwrap()
            .unwrap();

        let NodeKind::Applicability { expression, value } = &node.kind else {
            panic!("expected applicability");
        };
        assert_eq!(expression, &json!("{{show}}"));
        assert_eq!(value.node_type(), NodeType::Asset);
        assert_eq!(value.node_id(), Some("a"));
    }
}
