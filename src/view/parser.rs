//! View parser: authored JSON → node tree
//!
//! ```text
//! {"id": "v", "fields": {"asset": {...}}, "template": [...]}
//!        ↓ determine_node_type / parse_node (plugins first)
//!        ↓ walk the object: asset keys, templates, switches, async,
//!        ↓ arrays, applicability, nested objects, primitives
//! View(value, children: [fields.asset → Asset, items → Template])
//! ```
//!
//! Plugins hook in at four points:
//! - `on_parse_object`: rewrite (or drop) an object before it is walked
//! - `on_create_ast_node`: replace a freshly built node
//! - `determine_node_type`: classify an object or a key, first answer wins
//! - `parse_node`: take over parsing of a classified object

use serde_json::{Map, Value};
use tracing::trace;

use super::node::{Child, Node, NodeKind, NodePluginOptions, NodeRef, NodeType, ValueNode};
use crate::binding::PathSegment;
use crate::error::{PlayerError, Result};
use crate::hooks::{SyncBailHook, SyncWaterfallHook};
use crate::util::{get_in, is_truthy, set_in};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseObjectOptions {
    /// How many templates enclose the object being parsed
    pub template_depth: usize,
}

/// An object a plugin classified, handed to `parse_node`
#[derive(Debug, Clone)]
pub struct ParseNodeRequest {
    pub raw: Value,
    /// Type the caller asked for (asset, view or value)
    pub node_type: NodeType,
    pub options: ParseObjectOptions,
    /// What `determine_node_type` said
    pub determined: NodeType,
}

/// Outcome of parsing; `Ok(None)` means "no node"
pub type ParsedNode = Result<Option<NodeRef>>;

#[derive(Default)]
pub struct ParserHooks {
    /// Returning `None` stops parsing of the object
    pub on_parse_object: SyncWaterfallHook<Option<Value>, NodeType>,
    pub on_create_ast_node: SyncWaterfallHook<ParsedNode, Value, Parser>,
    /// Called with whole objects and with object keys (as strings)
    pub determine_node_type: SyncBailHook<NodeType, Value>,
    pub parse_node: SyncBailHook<ParsedNode, ParseNodeRequest, Parser>,
}

#[derive(Default)]
pub struct Parser {
    pub hooks: ParserHooks,
}

/// Value and children collected while walking one object
struct NestedObject {
    value: Option<Value>,
    children: Vec<Child>,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_view(&self, raw: &Value) -> Result<NodeRef> {
        self.parse_object(raw, NodeType::View, ParseObjectOptions::default())?
            .ok_or(PlayerError::ViewParse)
    }

    /// Run `on_create_ast_node` over a node built outside the walker
    pub fn create_ast_node(&self, node: ParsedNode, raw: &Value) -> ParsedNode {
        self.hooks.on_create_ast_node.call(node, raw, self)
    }

    /// Wrap an object with `async: true` into an async node keyed by its id
    ///
    /// Objects without an `id` produce no node.
    pub fn parse_async(&self, raw: &Value, node_type: NodeType, options: ParseObjectOptions) -> ParsedNode {
        let mut without_async = raw.clone();
        if let Some(map) = without_async.as_object_mut() {
            map.remove("async");
        }

        let Some(parsed) = self.parse_object(&without_async, node_type, options)? else {
            return Ok(None);
        };
        let Some(id) = parsed.node_id().map(str::to_string) else {
            return Ok(None);
        };

        self.create_ast_node(Ok(Some(Node::new(NodeKind::Async { id, value: parsed }))), raw)
    }

    pub fn parse_object(&self, raw: &Value, node_type: NodeType, options: ParseObjectOptions) -> ParsedNode {
        if let Some(determined) = self.hooks.determine_node_type.call(raw, &()) {
            let request = ParseNodeRequest {
                raw: raw.clone(),
                node_type,
                options,
                determined,
            };
            if let Some(parsed) = self.hooks.parse_node.call(&request, self) {
                return parsed;
            }
        }

        let NestedObject { value, children } = self.parse_local_object(None, raw, &[], node_type, options)?;

        let base = if value.is_none() && children.is_empty() {
            None
        } else {
            let mut value = value.unwrap_or(Value::Null);
            let plugins = match node_type {
                NodeType::Asset | NodeType::View => take_plugin_options(&mut value),
                _ => None,
            };
            Some(Node::with_value(
                node_type,
                ValueNode {
                    value,
                    children,
                    plugins,
                },
            ))
        };

        self.create_ast_node(Ok(base), raw)
    }

    fn parse_local_object(
        &self,
        current: Option<Value>,
        raw: &Value,
        path: &[PathSegment],
        node_type: NodeType,
        options: ParseObjectOptions,
    ) -> Result<NestedObject> {
        if !raw.is_object() && !raw.is_array() {
            return Ok(NestedObject {
                value: Some(raw.clone()),
                children: Vec::new(),
            });
        }

        let Some(local) = self.hooks.on_parse_object.call(Some(raw.clone()), &node_type, &()) else {
            return Ok(NestedObject {
                value: current,
                children: Vec::new(),
            });
        };

        let entries: Vec<(PathSegment, &Value)> = match &local {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (PathSegment::Index(i), v))
                .collect(),
            Value::Object(map) => map.iter().map(|(k, v)| (PathSegment::Key(k.clone()), v)).collect(),
            _ => Vec::new(),
        };

        let mut acc = NestedObject {
            value: current,
            children: Vec::new(),
        };

        for (key, local_value) in entries {
            let key_path = with_segment(path, key.clone());
            let key_name = key.to_string();

            if key_name == "asset" && local_value.is_object() {
                if let Some(asset) = self.parse_object(local_value, NodeType::Asset, options)? {
                    acc.children.push(Child {
                        path: key_path,
                        value: asset,
                    });
                }
                continue;
            }

            if local_value.is_array()
                && self.hooks.determine_node_type.call(&Value::String(key_name.clone()), &())
                    == Some(NodeType::Template)
            {
                for template in local_value.as_array().into_iter().flatten() {
                    if let Some(child) = self.parse_template_entry(template, path, options)? {
                        acc.children.push(child);
                    }
                }
                continue;
            }

            if is_truthy(local_value) && self.hooks.determine_node_type.call(local_value, &()) == Some(NodeType::Switch) {
                let request = ParseNodeRequest {
                    raw: local_value.clone(),
                    node_type: NodeType::Value,
                    options,
                    determined: NodeType::Switch,
                };
                if let Some(switch) = self.hooks.parse_node.call(&request, self).transpose()?.flatten() {
                    acc.children.push(hoist_single_child(key_path, switch));
                }
                continue;
            }

            if has_async(local_value) {
                if let Some(node) = self.parse_async(local_value, NodeType::Value, options)? {
                    acc.children.push(Child {
                        path: key_path,
                        value: node,
                    });
                }
                continue;
            }

            if let Some(items) = local_value.as_array() {
                let values = self.parse_values(items, options)?;
                if !values.is_empty() {
                    let multi = Node::new(NodeKind::MultiNode {
                        override_values: !has_template_values(&local, &key_name),
                        flatten: false,
                        values,
                    });
                    if let Some(multi) = self.create_ast_node(Ok(Some(multi)), local_value)? {
                        acc.children.push(Child {
                            path: key_path,
                            value: multi,
                        });
                    }
                }
                continue;
            }

            if let Some(items) = flatten_values(local_value) {
                let values = self.parse_values(items, options)?;
                let multi = Node::new(NodeKind::MultiNode {
                    override_values: true,
                    flatten: true,
                    values,
                });
                if let Some(multi) = self.create_ast_node(Ok(Some(multi)), local_value)? {
                    acc.children.push(Child {
                        path: key_path,
                        value: multi,
                    });
                }
                continue;
            }

            if local_value.is_object() {
                if self.hooks.determine_node_type.call(local_value, &()) == Some(NodeType::Applicability) {
                    let request = ParseNodeRequest {
                        raw: local_value.clone(),
                        node_type: NodeType::Value,
                        options,
                        determined: NodeType::Applicability,
                    };
                    if let Some(node) = self.hooks.parse_node.call(&request, self).transpose()?.flatten() {
                        acc.children.push(Child {
                            path: key_path,
                            value: node,
                        });
                    }
                } else {
                    let nested = self.parse_local_object(acc.value.take(), local_value, &key_path, node_type, options)?;
                    acc.value = nested.value;
                    acc.children.extend(nested.children);
                }
                continue;
            }

            let mut value = acc.value.take().unwrap_or(Value::Null);
            set_in(&mut value, &key_path, local_value.clone());
            acc.value = Some(value);
        }

        Ok(acc)
    }

    fn parse_values(&self, items: &[Value], options: ParseObjectOptions) -> Result<Vec<NodeRef>> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            if let Some(node) = self.parse_object(item, NodeType::Value, options)? {
                values.push(node);
            }
        }
        Ok(values)
    }

    fn parse_template_entry(
        &self,
        template: &Value,
        path: &[PathSegment],
        options: ParseObjectOptions,
    ) -> Result<Option<Child>> {
        let Some(output) = template.get("output").and_then(Value::as_str) else {
            trace!("Skipping template without an output key");
            return Ok(None);
        };

        let node = Node::new(NodeKind::Template {
            data: template.get("data").and_then(Value::as_str).unwrap_or_default().to_string(),
            template: template.get("value").cloned().unwrap_or(Value::Null),
            depth: options.template_depth,
            dynamic: template.get("dynamic").and_then(Value::as_bool).unwrap_or(false),
        });

        Ok(self.create_ast_node(Ok(Some(node)), template)?.map(|value| Child {
            path: with_segment(path, PathSegment::Key(output.to_string())),
            value,
        }))
    }
}

fn with_segment(path: &[PathSegment], segment: PathSegment) -> Vec<PathSegment> {
    let mut next = path.to_vec();
    next.push(segment);
    next
}

/// A switch that produced a bare value node with one child lands at that child's path
fn hoist_single_child(path: Vec<PathSegment>, switch: NodeRef) -> Child {
    if let NodeKind::Value(inner) = &switch.kind {
        if inner.children.len() == 1 && inner.value.is_null() {
            let first = &inner.children[0];
            let mut hoisted = path;
            hoisted.extend(first.path.iter().cloned());
            return Child {
                path: hoisted,
                value: first.value.clone(),
            };
        }
    }

    Child { path, value: switch }
}

pub(crate) fn has_async(value: &Value) -> bool {
    value.get("async").and_then(Value::as_bool) == Some(true)
}

/// `true` when a template of `obj` writes into `key`
fn has_template_values(obj: &Value, key: &str) -> bool {
    obj.get("template")
        .and_then(Value::as_array)
        .is_some_and(|templates| {
            templates
                .iter()
                .any(|t| t.get("output").and_then(Value::as_str) == Some(key))
        })
}

/// `{"flatten": true, "values": [...]}`
fn flatten_values(value: &Value) -> Option<&Vec<Value>> {
    if value.get("flatten").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    value.get("values").and_then(Value::as_array)
}

/// Move `plugins.stringResolver` settings out of the value
fn take_plugin_options(value: &mut Value) -> Option<NodePluginOptions> {
    let path = [
        PathSegment::Key("plugins".into()),
        PathSegment::Key("stringResolver".into()),
        PathSegment::Key("propertiesToSkip".into()),
    ];
    let skip = get_in(value, &path)?.as_array()?;
    let properties_to_skip = skip.iter().filter_map(Value::as_str).map(str::to_string).collect();

    if let Some(map) = value.as_object_mut() {
        map.remove("plugins");
    }

    Some(NodePluginOptions {
        properties_to_skip: Some(properties_to_skip),
    })
}

/// Object keys, for plugins that classify raw objects
pub(crate) fn object_has_key(value: &Value, key: &str) -> bool {
    value.as_object().is_some_and(|map: &Map<String, Value>| map.contains_key(key))
}
