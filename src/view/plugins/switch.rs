//! `staticSwitch` / `dynamicSwitch`: the first case that evaluates truthy wins
//!
//! Static switches are decided once at parse time against the flow data;
//! dynamic ones are re-decided on every resolve.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use super::{PluginOptions, ViewPlugin};
use crate::error::Result;
use crate::expression::Eval;
use crate::util::is_truthy;
use crate::view::parser::object_has_key;
use crate::view::{Node, NodeKind, NodeRef, NodeType, Parser, ParseNodeRequest, ParsedNode, SwitchCase, ViewInstance};

pub struct SwitchPlugin {
    options: PluginOptions,
}

impl SwitchPlugin {
    pub fn new(options: PluginOptions) -> Self {
        Self { options }
    }

    fn parse_switch(parser: &Parser, request: &ParseNodeRequest) -> ParsedNode {
        let dynamic = object_has_key(&request.raw, "dynamicSwitch");
        let key = if dynamic { "dynamicSwitch" } else { "staticSwitch" };

        let mut cases = Vec::new();
        for case in request.raw.get(key).and_then(Value::as_array).into_iter().flatten() {
            let mut body = case.clone();
            let condition = body
                .as_object_mut()
                .and_then(|map| map.remove("case"))
                .unwrap_or(Value::Null);

            if let Some(value) = parser.parse_object(&body, NodeType::Value, request.options)? {
                cases.push(SwitchCase { case: condition, value });
            }
        }

        let node = parser.create_ast_node(Ok(Some(Node::new(NodeKind::Switch { dynamic, cases }))), &request.raw)?;
        Ok(node.filter(|n| !matches!(n.kind, NodeKind::Empty)))
    }
}

/// Pick the first applicable case, or an empty node
fn resolve_switch(node: &NodeRef, evaluate: impl Fn(&Value) -> Result<Eval>) -> Result<NodeRef> {
    let NodeKind::Switch { cases, .. } = &node.kind else {
        return Ok(Arc::clone(node));
    };

    for case in cases {
        let eval = evaluate(&case.case)?;
        if eval.is_pending() {
            warn!("Async switch case skipped");
            continue;
        }
        if eval.ready().is_some_and(|v| is_truthy(&v)) {
            return Ok(Arc::clone(&case.value));
        }
    }

    Ok(Node::empty())
}

impl ViewPlugin for SwitchPlugin {
    fn apply(self: Arc<Self>, view: &ViewInstance) {
        let plugin = Arc::clone(&self);
        view.hooks.parser.tap("switch", move |parser, _| {
            let static_plugin = Arc::clone(&plugin);
            parser.hooks.on_create_ast_node.tap("switch", move |node, _, _| match node {
                Ok(Some(n)) if matches!(n.kind, NodeKind::Switch { dynamic: false, .. }) => {
                    let evaluator = &static_plugin.options.evaluator;
                    let options = evaluator.default_options().with_model(Arc::clone(&static_plugin.options.model));
                    resolve_switch(&n, |case| evaluator.evaluate_with(case, options.clone())).map(Some)
                }
                other => other,
            });

            parser.hooks.determine_node_type.tap("switch", |raw, _| {
                (object_has_key(raw, "dynamicSwitch") || object_has_key(raw, "staticSwitch")).then_some(NodeType::Switch)
            });

            parser.hooks.parse_node.tap("switch", |request, parser| {
                (request.determined == NodeType::Switch).then(|| Self::parse_switch(parser, request))
            });
        });

        view.hooks.resolver.tap("switch", |resolver, _| {
            resolver.hooks.before_resolve.tap("switch", |node, options, _| match node {
                Ok(Some(n)) if matches!(n.kind, NodeKind::Switch { dynamic: true, .. }) => {
                    resolve_switch(&n, |case| options.evaluate(case)).map(Some)
                }
                other => other,
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingParser;
    use crate::data::DataController;
    use crate::expression::ExpressionEvaluator;
    use crate::view::ParseObjectOptions;
    use serde_json::json;

    fn parser_with_switch(data: Value) -> Parser {
        let controller = DataController::new(data, Arc::new(BindingParser::new()), Vec::new());
        let evaluator = ExpressionEvaluator::new(controller.clone());
        let plugin = Arc::new(SwitchPlugin::new(PluginOptions {
            model: controller,
            evaluator,
        }));

        let parser = Parser::new();
        let static_plugin = Arc::clone(&plugin);
        parser.hooks.on_create_ast_node.tap("switch", move |node, _, _| match node {
            Ok(Some(n)) if matches!(n.kind, NodeKind::Switch { dynamic: false, .. }) => {
                let evaluator = &static_plugin.options.evaluator;
                resolve_switch(&n, |case| evaluator.evaluate(case)).map(Some)
            }
            other => other,
        });
        parser.hooks.determine_node_type.tap("switch", |raw, _| {
            object_has_key(raw, "staticSwitch").then_some(NodeType::Switch)
        });
        parser.hooks.parse_node.tap("switch", |request, parser| {
            (request.determined == NodeType::Switch).then(|| SwitchPlugin::parse_switch(parser, request))
        });
        parser
    }

    #[test]
    fn static_switch_picks_first_truthy_case() {
        let parser = parser_with_switch(json!({"lang": "fr"}));
        let raw = json!({"staticSwitch": [
            {"case": "{{lang}} == 'en'", "asset": {"id": "en"}},
            {"case": "{{lang}} == 'fr'", "asset": {"id": "fr"}},
            {"case": true, "asset": {"id": "fallback"}}
        ]});

        let node = parser
            .parse_object(&raw, NodeType::Value, ParseObjectOptions::default())
            .unwrap()
            .unwrap();

        let asset = &node.children()[0].value;
        assert_eq!(asset.node_id(), Some("fr"));
    }

    #[test]
    fn static_switch_without_match_produces_nothing() {
        let parser = parser_with_switch(json!({}));
        let raw = json!({"staticSwitch": [{"case": false, "asset": {"id": "never"}}]});

        let node = parser
            .parse_object(&raw, NodeType::Value, ParseObjectOptions::default())
            .unwrap();
        assert!(node.is_none());
    }
}
