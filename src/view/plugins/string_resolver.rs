//! Resolves `{{refs}}` and `@[ expressions ]@` inside node values
//!
//! Keys listed in `plugins.stringResolver.propertiesToSkip` of an asset or
//! view (default `exp`) are left as authored, and so is any node placed
//! under such a key.

use std::cell::Cell;
use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::warn;

use super::ViewPlugin;
use crate::error::Result;
use crate::string_resolver::{has_something_to_resolve, resolve_data_refs_in_string, StringResolveOptions};
use crate::view::{NodeKind, NodeResolveOptions, NodeRef, ViewInstance};

const DEFAULT_SKIP: &str = "exp";

#[derive(Default)]
pub struct StringResolverPlugin {
    /// Asset/view id → its properties to skip
    properties_to_skip_cache: DashMap<String, Arc<HashSet<String>>>,
}

impl StringResolverPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve(&self, value: Result<serde_json::Value>, node: &NodeRef, options: &NodeResolveOptions) -> Result<Value> {
        let skip = match &node.kind {
            NodeKind::Empty | NodeKind::Unknown => return Ok(Value::Null),
            NodeKind::Asset(v) | NodeKind::View(v) => {
                let skip: Arc<HashSet<String>> = Arc::new(
                    v.plugins
                        .as_ref()
                        .and_then(|p| p.properties_to_skip.clone())
                        .unwrap_or_else(|| vec![DEFAULT_SKIP.to_string()])
                        .into_iter()
                        .collect(),
                );
                if let Some(id) = node.node_id() {
                    self.properties_to_skip_cache.insert(id.to_string(), Arc::clone(&skip));
                }
                skip
            }
            NodeKind::Value(_) => self.inherited_skip(options),
            _ => return value,
        };

        let Some(v) = node.value_node() else {
            return value;
        };

        if options.base_path.iter().any(|segment| skip.contains(&segment.to_string())) {
            return Ok(v.value.clone());
        }

        resolve_all_refs(&v.value, options, &skip)
    }

    /// Skip list of the asset/view owning the multi-node this value sits in
    fn inherited_skip(&self, options: &NodeResolveOptions) -> Arc<HashSet<String>> {
        let default = || Arc::new(HashSet::from([DEFAULT_SKIP.to_string()]));

        let [.., grandparent, parent] = options.ancestors.as_slice() else {
            return default();
        };
        if !matches!(parent.kind, NodeKind::MultiNode { .. }) {
            return default();
        }
        if !matches!(grandparent.kind, NodeKind::Asset(_) | NodeKind::View(_)) {
            return default();
        }

        grandparent
            .node_id()
            .and_then(|id| self.properties_to_skip_cache.get(id).map(|e| Arc::clone(e.value())))
            .unwrap_or_else(default)
    }
}

/// Resolve every string of a value, leaving skipped keys untouched
fn resolve_all_refs(value: &Value, options: &NodeResolveOptions, skip: &HashSet<String>) -> Result<Value> {
    match value {
        Value::String(s) => resolve_string(s, options),
        Value::Object(map) => {
            let mut resolved = Map::with_capacity(map.len());
            for (key, item) in map {
                let item = if skip.contains(key) {
                    item.clone()
                } else {
                    resolve_all_refs(item, options, skip)?
                };
                resolved.insert(key.clone(), item);
            }
            Ok(Value::Object(resolved))
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                if skip.contains(&index.to_string()) {
                    Ok(item.clone())
                } else {
                    resolve_all_refs(item, options, skip)
                }
            })
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

/// A string whose expressions are still pending keeps its authored text
fn resolve_string(s: &str, options: &NodeResolveOptions) -> Result<Value> {
    if !has_something_to_resolve(s) {
        return Ok(Value::String(s.to_string()));
    }

    let pending = Cell::new(false);
    let evaluate = |exp: &str| -> Result<Value> {
        let eval = options.evaluate(exp)?;
        if eval.is_pending() {
            pending.set(true);
        }
        Ok(eval.ready().unwrap_or(Value::Null))
    };

    let resolved = resolve_data_refs_in_string(
        s,
        &StringResolveOptions {
            model: options.model.as_ref(),
            evaluate: &evaluate,
        },
    )?;

    if pending.get() {
        warn!("Async expression in view string '{s}' left unresolved");
        return Ok(Value::String(s.to_string()));
    }

    Ok(resolved)
}

impl ViewPlugin for StringResolverPlugin {
    fn apply(self: Arc<Self>, view: &ViewInstance) {
        view.hooks.resolver.tap("string-resolver", move |resolver, _| {
            let plugin = Arc::clone(&self);
            resolver
                .hooks
                .resolve
                .tap("string-resolver", move |value, node, options| plugin.resolve(value, node, options));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingParser;
    use crate::data::DataController;
    use crate::expression::ExpressionEvaluator;
    use crate::view::{Parser, Resolver, ResolverOptions};
    use serde_json::json;

    fn resolve_view(data: Value, view: Value) -> Value {
        let controller = DataController::new(data, Arc::new(BindingParser::new()), Vec::new());
        let evaluator = ExpressionEvaluator::new(controller.clone());
        let root = Parser::new().parse_view(&view).unwrap();
        let resolver = Resolver::new(
            root,
            ResolverOptions {
                model: controller.clone(),
                parse_binding: controller.parse_binding_fn(),
                evaluator,
                schema: None,
                validation: None,
                parse_node: None,
            },
        );
        let plugin = Arc::new(StringResolverPlugin::new());
        resolver
            .hooks
            .resolve
            .tap("string-resolver", move |value, node, options| plugin.resolve(value, node, options));
        resolver.update(None, None).unwrap()
    }

    #[test]
    fn refs_and_expressions_resolve() {
        let resolved = resolve_view(
            json!({"name": "ada", "count": 2}),
            json!({
                "id": "v",
                "title": "Hi {{name}}",
                "count": "{{count}}",
                "double": "@[ {{count}} * 2 ]@"
            }),
        );

        assert_eq!(resolved["title"], json!("Hi ada"));
        assert_eq!(resolved["count"], json!(2));
        assert_eq!(resolved["double"], json!(4));
    }

    #[test]
    fn exp_properties_are_skipped_by_default() {
        let resolved = resolve_view(
            json!({"a": 1}),
            json!({"id": "v", "exp": "{{a}} = 2", "label": "{{a}}"}),
        );

        assert_eq!(resolved["exp"], json!("{{a}} = 2"));
        assert_eq!(resolved["label"], json!(1));
    }

    #[test]
    fn custom_skip_lists_apply_to_nested_nodes() {
        let resolved = resolve_view(
            json!({"a": 1}),
            json!({
                "id": "v",
                "plugins": {"stringResolver": {"propertiesToSkip": ["raw"]}},
                "raw": {"asset": {"id": "inner", "label": "{{a}}"}},
                "exp": "{{a}}"
            }),
        );

        assert_eq!(resolved["raw"]["asset"]["label"], json!("{{a}}"));
        assert_eq!(resolved["exp"], json!(1));
    }
}
