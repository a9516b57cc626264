//! Template expansion
//!
//! A `template` entry repeats its `value` once per item of the `data` array,
//! writing the results to `output`. `_index_` in the template becomes the
//! item index (`_index1_`, `_index2_`, ... for nested templates).
//!
//! Static templates expand once at parse time; `dynamic: true` templates
//! expand on every resolve and follow changes to the array.

use std::sync::Arc;

use regex::{NoExpand, Regex};
use serde_json::Value;

use super::{PluginOptions, ViewPlugin};
use crate::data::{DataModelOptions, DataModelWithParser};
use crate::error::PlayerError;
use crate::hooks::SyncWaterfallHook;
use crate::util::is_truthy;
use crate::view::{Node, NodeKind, NodeRef, NodeType, ParseObjectOptions, ParsedNode, ViewInstance};

/// The item a template is being expanded for
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateItemInfo {
    pub index: usize,
    pub data: Value,
    pub depth: usize,
}

/// Replace every match of `expression` (a regex) in the serialized template
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateSubstitution {
    pub expression: String,
    pub value: String,
}

#[derive(Default)]
pub struct TemplatePluginHooks {
    /// Starts with the `_index_` substitution of the item
    pub resolve_template_substitutions: SyncWaterfallHook<Vec<TemplateSubstitution>, TemplateItemInfo>,
}

pub struct TemplatePlugin {
    pub hooks: TemplatePluginHooks,
    options: PluginOptions,
}

impl TemplatePlugin {
    pub fn new(options: PluginOptions) -> Self {
        Self {
            hooks: TemplatePluginHooks::default(),
            options,
        }
    }

    /// Expand a template node into a multi-node of parsed items
    fn parse_template(
        &self,
        parse: &dyn Fn(&Value, NodeType, ParseObjectOptions) -> ParsedNode,
        node: &NodeRef,
        model: &dyn DataModelWithParser,
    ) -> ParsedNode {
        let NodeKind::Template {
            data,
            template,
            depth,
            ..
        } = &node.kind
        else {
            return Ok(Some(Arc::clone(node)));
        };

        let items = match model.get(data.as_str().into(), &DataModelOptions::default())? {
            Some(Value::Array(items)) => items,
            Some(value) if is_truthy(&value) => {
                return Err(PlayerError::TemplateNotArray { binding: data.clone() })
            }
            _ => return Ok(None),
        };

        let serialized = serde_json::to_string(template)?;
        let index_token = match depth {
            0 => "_index_".to_string(),
            d => format!("_index{d}_"),
        };

        let mut values = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let substitutions = self.hooks.resolve_template_substitutions.call(
                vec![TemplateSubstitution {
                    expression: regex::escape(&index_token),
                    value: index.to_string(),
                }],
                &TemplateItemInfo {
                    index,
                    data: item,
                    depth: *depth,
                },
                &(),
            );

            let mut expanded = serialized.clone();
            for substitution in substitutions {
                let pattern = Regex::new(&substitution.expression).map_err(|err| PlayerError::TemplateSubstitution {
                    pattern: substitution.expression.clone(),
                    details: err.to_string(),
                })?;
                expanded = pattern.replace_all(&expanded, NoExpand(&substitution.value)).into_owned();
            }

            let raw: Value = serde_json::from_str(&expanded)?;
            let parsed = parse(
                &raw,
                NodeType::Value,
                ParseObjectOptions {
                    template_depth: depth + 1,
                },
            )?;
            values.extend(parsed);
        }

        Ok(Some(Node::new(NodeKind::MultiNode {
            override_values: false,
            flatten: false,
            values,
        })))
    }
}

impl ViewPlugin for TemplatePlugin {
    fn apply(self: Arc<Self>, view: &ViewInstance) {
        view.set_template_plugin(Arc::clone(&self));

        let plugin = Arc::clone(&self);
        view.hooks.parser.tap("template", move |parser, _| {
            parser.hooks.determine_node_type.tap("template", |raw, _| {
                (raw.as_str() == Some("template")).then_some(NodeType::Template)
            });

            let plugin = Arc::clone(&plugin);
            parser.hooks.on_create_ast_node.tap("template", move |node, _raw, parser| match node {
                Ok(Some(n)) if matches!(n.kind, NodeKind::Template { dynamic: false, .. }) => {
                    let parse = |raw: &Value, node_type: NodeType, options: ParseObjectOptions| {
                        parser.parse_object(raw, node_type, options)
                    };
                    plugin.parse_template(&parse, &n, plugin.options.model.as_ref())
                }
                other => other,
            });
        });

        let plugin = self;
        view.hooks.resolver.tap("template", move |resolver, _| {
            let plugin = Arc::clone(&plugin);
            resolver.hooks.before_resolve.tap("template", move |node, options, _| match node {
                Ok(Some(n)) if matches!(n.kind, NodeKind::Template { dynamic: true, .. }) => {
                    let Some(parse_node) = options.parse_node.clone() else {
                        return Ok(Some(n));
                    };
                    let parse = move |raw: &Value, node_type: NodeType, opts: ParseObjectOptions| {
                        parse_node(raw, node_type, opts)
                    };
                    plugin.parse_template(&parse, &n, options.model.as_ref())
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
    use crate::view::Parser;
    use serde_json::json;

    fn plugin(data: Value) -> TemplatePlugin {
        let controller = DataController::new(data, Arc::new(BindingParser::new()), Vec::new());
        let evaluator = ExpressionEvaluator::new(controller.clone());
        TemplatePlugin::new(PluginOptions {
            model: controller,
            evaluator,
        })
    }

    fn template(data: &str, value: Value, depth: usize) -> NodeRef {
        Node::new(NodeKind::Template {
            data: data.to_string(),
            template: value,
            depth,
            dynamic: false,
        })
    }

    fn expand(plugin: &TemplatePlugin, node: &NodeRef) -> ParsedNode {
        let parser = Parser::new();
        let parse = |raw: &Value, t: NodeType, o: ParseObjectOptions| parser.parse_object(raw, t, o);
        plugin.parse_template(&parse, node, plugin.options.model.as_ref())
    }

    #[test]
    fn expands_one_value_per_item_with_index_substitution() {
        let plugin = plugin(json!({"people": ["a", "b"]}));
        let node = template("people", json!({"label": "people._index_"}), 0);

        let expanded = expand(&plugin, &node).unwrap().unwrap();
        let NodeKind::MultiNode { values, override_values, .. } = &expanded.kind else {
            panic!("expected a multi-node");
        };

        assert!(!override_values);
        assert_eq!(values.len(), 2);
        assert_eq!(values[1].value_node().unwrap().value, json!({"label": "people.1"}));
    }

    #[test]
    fn nested_templates_use_depth_suffixed_tokens() {
        let plugin = plugin(json!({"rows": [1]}));
        let node = template("rows", json!("_index_/_index1_"), 1);

        let expanded = expand(&plugin, &node).unwrap().unwrap();
        assert_eq!(expanded.sub_nodes()[0].value_node().unwrap().value, json!("_index_/0"));
    }

    #[test]
    fn missing_data_yields_no_node_and_scalars_fail() {
        let plugin = plugin(json!({"count": 3}));

        assert!(expand(&plugin, &template("nothing", json!("x"), 0)).unwrap().is_none());
        assert!(matches!(
            expand(&plugin, &template("count", json!("x"), 0)),
            Err(PlayerError::TemplateNotArray { .. })
        ));
    }

    #[test]
    fn custom_substitutions_can_be_added() {
        let plugin = plugin(json!({"items": [{"name": "x"}]}));
        plugin
            .hooks
            .resolve_template_substitutions
            .tap("names", |mut subs, info, _| {
                if let Some(name) = info.data.get("name").and_then(Value::as_str) {
                    subs.push(TemplateSubstitution {
                        expression: "_name_".into(),
                        value: name.to_string(),
                    });
                }
                subs
            });

        let expanded = expand(&plugin, &template("items", json!("_name_-_index_"), 0)).unwrap().unwrap();
        assert_eq!(expanded.sub_nodes()[0].value_node().unwrap().value, json!("x-0"));
    }
}
