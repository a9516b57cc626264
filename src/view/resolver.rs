//! Resolver: node tree + data → resolved JSON, with per-node caching
//!
//! ```text
//! update(changes)
//!   └─ compute_tree(node)
//!        resolve_options → cached? → skip_resolve ─ yes → reuse subtree
//!                                      └─ no → before_resolve → resolve
//!                                              → children (merged by path)
//!                                              → after_resolve → after_node_update
//! ```
//!
//! Every node reads through its own [`DependencyModel`]; a node is reused on
//! the next update when none of the changed bindings touches what it (or any
//! child) read.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{error, info};

use super::node::{Child, Node, NodeId, NodeKind, NodeRef, NodeType};
use super::parser::ParseObjectOptions;
use crate::binding::{Binding, PathSegment};
use crate::data::{
    DataModelWithParser, DependencyModel, DependencySubset, ParseBindingFn, WithParser,
};
use crate::error::Result;
use crate::expression::{Eval, Expression, ExpressionEvaluator};
use crate::hooks::{SyncHook, SyncWaterfallHook};
use crate::schema::SchemaController;
use crate::util::{add_last, deep_equal, set_in};
use crate::validation::{cares_about_data_changes, ViewValidation};

/// Parses raw JSON into a node (used by dynamic templates and async content)
pub type ParseNodeFn = Arc<dyn Fn(&Value, NodeType, ParseObjectOptions) -> Result<Option<NodeRef>> + Send + Sync>;

/// What the resolver needs from the flow
#[derive(Clone)]
pub struct ResolverOptions {
    pub model: Arc<dyn DataModelWithParser>,
    pub parse_binding: ParseBindingFn,
    pub evaluator: ExpressionEvaluator,
    pub schema: Option<Arc<SchemaController>>,
    pub validation: Option<Arc<dyn ViewValidation>>,
    pub parse_node: Option<ParseNodeFn>,
}

/// Options a single node is resolved with
#[derive(Clone)]
pub struct NodeResolveOptions {
    /// Dependency-recording model of this node
    pub model: Arc<dyn DataModelWithParser>,
    pub parse_binding: ParseBindingFn,
    pub evaluator: ExpressionEvaluator,
    pub schema: Option<Arc<SchemaController>>,
    pub validation: Option<Arc<dyn ViewValidation>>,
    pub parse_node: Option<ParseNodeFn>,
    /// The node being resolved (after `before_resolve`, once it ran)
    pub node: Option<NodeRef>,
    /// Source ancestors, root first
    pub lineage: Vec<NodeRef>,
    /// Resolved ancestors, root first
    pub ancestors: Vec<NodeRef>,
    /// Path of this node inside the nearest asset/view/value ancestor
    pub base_path: Vec<PathSegment>,
    pub dependencies: Option<Arc<DependencyModel>>,
}

impl NodeResolveOptions {
    fn root(options: &ResolverOptions) -> Self {
        Self {
            model: Arc::clone(&options.model),
            parse_binding: Arc::clone(&options.parse_binding),
            evaluator: options.evaluator.clone(),
            schema: options.schema.clone(),
            validation: options.validation.clone(),
            parse_node: options.parse_node.clone(),
            node: None,
            lineage: Vec::new(),
            ancestors: Vec::new(),
            base_path: Vec::new(),
            dependencies: None,
        }
    }

    /// Evaluate against this node's model so reads become dependencies
    pub fn evaluate(&self, expression: impl Into<Expression>) -> Result<Eval> {
        let options = self.evaluator.default_options().with_model(Arc::clone(&self.model));
        self.evaluator.evaluate_with(expression, options)
    }

    /// Bindings read so far, optionally for one subset
    pub fn get_dependencies(&self, subset: Option<DependencySubset>) -> HashSet<Binding> {
        self.dependencies
            .as_ref()
            .map(|deps| deps.get_dependencies(subset))
            .unwrap_or_default()
    }
}

/// Result of resolving one node
#[derive(Debug, Clone)]
pub struct NodeUpdate {
    /// The resolved node, with resolved children
    pub node: NodeRef,
    /// Value differs from the previous update
    pub updated: bool,
    pub value: Value,
    pub dependencies: HashSet<Binding>,
}

#[derive(Default)]
pub struct ResolverHooks {
    /// Starts as "nothing this node read changed"; `true` reuses the cached result
    pub skip_resolve: SyncWaterfallHook<bool, NodeRef, NodeResolveOptions>,
    pub before_update: SyncHook<Option<HashSet<Binding>>>,
    pub after_update: SyncHook<Value>,
    pub resolve_options: SyncWaterfallHook<NodeResolveOptions, NodeRef>,
    /// `Ok(None)` drops the node
    pub before_resolve: SyncWaterfallHook<Result<Option<NodeRef>>, NodeResolveOptions>,
    /// Runs before children are resolved
    pub resolve: SyncWaterfallHook<Result<Value>, NodeRef, NodeResolveOptions>,
    /// Runs after children are merged in
    pub after_resolve: SyncWaterfallHook<Result<Value>, NodeRef, NodeResolveOptions>,
    /// Source node and its update, children first, root last
    pub after_node_update: SyncHook<NodeRef, NodeUpdate>,
}

#[derive(Default)]
struct ResolverState {
    /// Source node id → last result
    cache: HashMap<NodeId, NodeUpdate>,
    /// Resolved node id → source node
    ast_map: HashMap<NodeId, NodeRef>,
    /// Async node id → source ids from the root down to the async node
    async_lineage: HashMap<String, Vec<NodeId>>,
}

/// Bookkeeping for one `update` call
struct UpdatePass {
    changes: Option<HashSet<Binding>>,
    first_update: bool,
    previous: HashMap<NodeId, NodeUpdate>,
    next: HashMap<NodeId, NodeUpdate>,
    ids_seen: HashSet<String>,
    prev_ast: HashMap<NodeId, NodeRef>,
    next_ast: HashMap<NodeId, NodeRef>,
    prev_async: HashMap<String, Vec<NodeId>>,
    next_async: HashMap<String, Vec<NodeId>>,
}

impl UpdatePass {
    /// Cached result for a source node, unless its authored id was already seen this pass
    fn previous_result(&mut self, node: &NodeRef) -> Option<NodeUpdate> {
        if let Some(id) = node.node_id() {
            if self.ids_seen.contains(id) {
                if self.first_update {
                    match node.node_type() {
                        NodeType::Asset | NodeType::View => error!(
                            "Cache conflict: Found Asset/View nodes that have conflicting ids: {id}, may cause cache issues."
                        ),
                        NodeType::Value => info!(
                            "Cache conflict: Found Value nodes that have conflicting ids: {id}, may cause cache issues. To improve performance make value node IDs globally unique."
                        ),
                        _ => {}
                    }
                }
                return None;
            }
            self.ids_seen.insert(id.to_string());
        }

        self.previous.get(&node.id()).cloned()
    }
}

pub struct Resolver {
    pub hooks: ResolverHooks,
    root: NodeRef,
    options: ResolverOptions,
    state: Mutex<ResolverState>,
}

impl Resolver {
    pub fn new(root: NodeRef, options: ResolverOptions) -> Self {
        Self {
            hooks: ResolverHooks::default(),
            root,
            options,
            state: Mutex::new(ResolverState::default()),
        }
    }

    pub fn root(&self) -> &NodeRef {
        &self.root
    }

    /// Source node a resolved node came from
    pub fn get_source_node(&self, resolved: NodeId) -> Option<NodeRef> {
        self.state.lock().ast_map.get(&resolved).cloned()
    }

    /// Last result per source node
    pub fn get_resolve_cache(&self) -> HashMap<NodeId, NodeUpdate> {
        self.state.lock().cache.clone()
    }

    /// Resolve the tree, reusing nodes unaffected by `changes`
    ///
    /// `None` re-resolves everything. `async_changes` names async nodes whose
    /// content arrived; their ancestors are recomputed.
    pub fn update(
        &self,
        changes: Option<&HashSet<Binding>>,
        async_changes: Option<&HashSet<String>>,
    ) -> Result<Value> {
        self.hooks.before_update.call(&changes.cloned(), &());

        let ResolverState {
            mut cache,
            ast_map,
            async_lineage,
        } = std::mem::take(&mut *self.state.lock());

        for id in async_changes.into_iter().flatten() {
            for source in async_lineage.get(id).into_iter().flatten() {
                cache.remove(source);
            }
        }

        let mut pass = UpdatePass {
            changes: changes.cloned(),
            first_update: cache.is_empty(),
            previous: cache,
            next: HashMap::new(),
            ids_seen: HashSet::new(),
            prev_ast: ast_map,
            next_ast: HashMap::new(),
            prev_async: async_lineage,
            next_async: HashMap::new(),
        };

        let root = Arc::clone(&self.root);
        let computed = self.compute_tree(&root, &NodeResolveOptions::root(&self.options), &mut pass);

        let update = match computed {
            Ok(update) => update,
            Err(err) => {
                *self.state.lock() = ResolverState {
                    cache: pass.previous,
                    ast_map: pass.prev_ast,
                    async_lineage: pass.prev_async,
                };
                return Err(err);
            }
        };

        *self.state.lock() = ResolverState {
            cache: pass.next,
            ast_map: pass.next_ast,
            async_lineage: pass.next_async,
        };

        self.hooks.after_update.call(&update.value, &());
        Ok(update.value)
    }

    fn compute_tree(&self, node: &NodeRef, options: &NodeResolveOptions, pass: &mut UpdatePass) -> Result<NodeUpdate> {
        let dependency_model = Arc::new(DependencyModel::new(Arc::clone(&options.model)));
        dependency_model.track_subset(DependencySubset::Core);

        let model: Arc<dyn DataModelWithParser> = Arc::new(WithParser::new(
            dependency_model.clone(),
            Arc::clone(&self.options.parse_binding),
        ));

        let mut resolve_options = self.hooks.resolve_options.call(
            NodeResolveOptions {
                model,
                node: Some(Arc::clone(node)),
                dependencies: Some(Arc::clone(&dependency_model)),
                ..options.clone()
            },
            node,
            &(),
        );

        let previous = pass.previous_result(node);
        let data_changed = cares_about_data_changes(
            pass.changes.as_ref(),
            previous.as_ref().map(|p| &p.dependencies),
        );
        let skip = self.hooks.skip_resolve.call(!data_changed, node, &resolve_options);

        if let (Some(previous), true) = (&previous, skip) {
            self.repopulate_from_cache(previous, node, pass);
            return Ok(NodeUpdate {
                updated: false,
                ..previous.clone()
            });
        }

        let resolved_node = self
            .hooks
            .before_resolve
            .call(Ok(Some(Arc::clone(node))), &resolve_options, &())?
            .unwrap_or_else(Node::empty);

        if let NodeKind::Async { id, .. } = &node.kind {
            let mut lineage: Vec<NodeId> = resolve_options.lineage.iter().map(|n| n.id()).collect();
            lineage.push(node.id());
            pass.next_async.insert(id.clone(), lineage);
        }

        resolve_options.node = Some(Arc::clone(&resolved_node));
        pass.next_ast.insert(resolved_node.id(), Arc::clone(node));

        let mut resolved = self.hooks.resolve.call(Ok(Value::Null), &resolved_node, &resolve_options)?;

        let mut updated = previous.as_ref().map_or(true, |p| !deep_equal(&p.value, &resolved));
        if let (Some(previous), false) = (&previous, updated) {
            resolved = previous.value.clone();
        }

        let mut child_dependencies: HashSet<Binding> = HashSet::new();
        dependency_model.track_subset(DependencySubset::Children);

        let mut child_options = resolve_options.clone();
        child_options.lineage.push(Arc::clone(node));
        child_options.ancestors.push(Arc::clone(&resolved_node));

        let resolved_node = match &resolved_node.kind {
            NodeKind::Asset(v) | NodeKind::View(v) | NodeKind::Value(v) => {
                let mut children = Vec::with_capacity(v.children.len());

                for child in &v.children {
                    let options = NodeResolveOptions {
                        base_path: child.path.clone(),
                        ..child_options.clone()
                    };
                    let computed = self.compute_tree(&child.value, &options, pass)?;
                    child_dependencies.extend(computed.dependencies.iter().cloned());

                    if !computed.value.is_null() {
                        match &computed.node.kind {
                            NodeKind::MultiNode {
                                override_values: false,
                                ..
                            } => add_last(&mut resolved, &child.path, computed.value.clone()),
                            _ => set_in(&mut resolved, &child.path, computed.value.clone()),
                        }
                    }

                    updated |= computed.updated;
                    children.push(Child {
                        path: child.path.clone(),
                        value: computed.node,
                    });
                }

                resolved_node.with_children(children)
            }
            NodeKind::MultiNode { values, .. } => {
                let mut items = Vec::with_capacity(values.len());
                let mut resolved_values = Vec::with_capacity(values.len());

                for value in values {
                    let computed = self.compute_tree(value, &child_options, pass)?;

                    if !computed.value.is_null() {
                        child_dependencies.extend(computed.dependencies.iter().cloned());
                        updated |= computed.updated;

                        match (&computed.node.kind, &computed.value) {
                            (NodeKind::MultiNode { flatten: true, .. }, Value::Array(inner)) => {
                                items.extend(inner.iter().cloned())
                            }
                            _ => items.push(computed.value.clone()),
                        }
                    }

                    resolved_values.push(computed.node);
                }

                resolved = Value::Array(items);
                resolved_node.with_values(resolved_values)
            }
            _ => Arc::clone(&resolved_node),
        };

        for binding in &child_dependencies {
            dependency_model.add_child_read_dep(binding);
        }
        dependency_model.track_subset(DependencySubset::Core);

        if let (Some(previous), false) = (&previous, updated) {
            resolved = previous.value.clone();
        }

        resolve_options.node = Some(Arc::clone(&resolved_node));
        let resolved = self.hooks.after_resolve.call(Ok(resolved), &resolved_node, &resolve_options)?;

        let mut dependencies = dependency_model.get_dependencies(None);
        dependencies.extend(child_dependencies);

        let update = NodeUpdate {
            node: resolved_node,
            updated,
            value: resolved,
            dependencies,
        };

        self.hooks.after_node_update.call(node, &update);
        pass.next.insert(node.id(), update.clone());

        Ok(update)
    }

    /// Carry a reused subtree over into this pass
    fn repopulate_from_cache(&self, resolved: &NodeUpdate, source: &NodeRef, pass: &mut UpdatePass) {
        pass.next_ast.insert(resolved.node.id(), Arc::clone(source));

        let update = NodeUpdate {
            updated: false,
            ..resolved.clone()
        };
        pass.next.insert(source.id(), update.clone());

        if let NodeKind::Async { id, .. } = &source.kind {
            if let Some(lineage) = pass.prev_async.get(id).cloned() {
                pass.next_async.insert(id.clone(), lineage);
            }
        }

        for child in resolved.node.sub_nodes() {
            let original = pass.prev_ast.get(&child.id()).cloned().unwrap_or(child);
            let Some(previous_child) = pass.previous_result(&original) else {
                continue;
            };
            self.repopulate_from_cache(&previous_child, &original, pass);
        }

        self.hooks.after_node_update.call(source, &update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingParser;
    use crate::data::{DataController, DataModelOptions};
    use crate::view::node::ValueNode;
    use parking_lot::Mutex as PlMutex;
    use serde_json::json;

    fn setup(data: Value) -> (Arc<DataController>, ResolverOptions) {
        let controller = DataController::new(data, Arc::new(BindingParser::new()), Vec::new());
        let evaluator = ExpressionEvaluator::new(controller.clone());
        controller.set_evaluator(&evaluator);
        let options = ResolverOptions {
            model: controller.clone(),
            parse_binding: controller.parse_binding_fn(),
            evaluator,
            schema: None,
            validation: None,
            parse_node: None,
        };
        (controller, options)
    }

    /// Resolves value nodes by reading `{{path}}` strings straight from the model
    fn reading_resolver(root: NodeRef, options: ResolverOptions) -> Resolver {
        let resolver = Resolver::new(root, options);
        resolver.hooks.resolve.tap("read", |value, node, options| {
            let Some(v) = node.value_node() else {
                return value;
            };
            match v.value.as_str().and_then(|s| s.strip_prefix("{{")).and_then(|s| s.strip_suffix("}}")) {
                Some(path) => Ok(options
                    .model
                    .get(path.into(), &DataModelOptions::default())?
                    .unwrap_or(Value::Null)),
                None => Ok(v.value.clone()),
            }
        });
        resolver
    }

    fn tree() -> NodeRef {
        let name = Node::with_value(NodeType::Value, ValueNode::new(json!("{{name}}")));
        let age = Node::with_value(NodeType::Value, ValueNode::new(json!("{{age}}")));
        Node::with_value(
            NodeType::View,
            ValueNode {
                value: json!({"id": "root"}),
                children: vec![
                    Child {
                        path: vec![PathSegment::Key("name".into())],
                        value: name,
                    },
                    Child {
                        path: vec![PathSegment::Key("age".into())],
                        value: age,
                    },
                ],
                plugins: None,
            },
        )
    }

    #[test]
    fn resolves_children_into_parent_value() {
        let (_, options) = setup(json!({"name": "ada", "age": 36}));
        let resolver = reading_resolver(tree(), options);

        assert_eq!(
            resolver.update(None, None).unwrap(),
            json!({"id": "root", "name": "ada", "age": 36})
        );
    }

    #[test]
    fn unrelated_changes_reuse_cached_nodes() {
        let (controller, options) = setup(json!({"name": "ada", "age": 36}));
        let resolver = reading_resolver(tree(), options);
        let updated = Arc::new(PlMutex::new(Vec::new()));
        let sink = updated.clone();
        resolver.hooks.after_node_update.tap("record", move |_, update| {
            sink.lock().push((update.value.clone(), update.updated));
        });

        resolver.update(None, None).unwrap();
        updated.lock().clear();

        controller
            .set(vec![("age".into(), json!(37))], &DataModelOptions::default())
            .unwrap();
        let changes = HashSet::from([Binding::from_dotted("age")]);
        let value = resolver.update(Some(&changes), None).unwrap();

        assert_eq!(value, json!({"id": "root", "name": "ada", "age": 37}));
        let log = updated.lock();
        assert!(log.contains(&(json!("ada"), false)));
        assert!(log.contains(&(json!(37), true)));
    }

    #[test]
    fn multi_nodes_skip_nulls_and_append_when_not_overriding() {
        let (_, options) = setup(json!({"a": 1}));
        let items = Node::new(NodeKind::MultiNode {
            override_values: false,
            flatten: false,
            values: vec![
                Node::with_value(NodeType::Value, ValueNode::new(json!("{{a}}"))),
                Node::with_value(NodeType::Value, ValueNode::new(json!("{{missing}}"))),
            ],
        });
        let root = Node::with_value(
            NodeType::View,
            ValueNode {
                value: json!({"id": "v", "list": [0]}),
                children: vec![Child {
                    path: vec![PathSegment::Key("list".into())],
                    value: items,
                }],
                plugins: None,
            },
        );

        let resolver = reading_resolver(root, options);
        assert_eq!(resolver.update(None, None).unwrap(), json!({"id": "v", "list": [0, 1]}));
    }

    #[test]
    fn dropped_nodes_resolve_to_nothing() {
        let (_, options) = setup(json!({}));
        let resolver = reading_resolver(tree(), options);
        resolver.hooks.before_resolve.tap("drop-age", |node, _, _| match node {
            Ok(Some(n)) if n.value_node().is_some_and(|v| v.value == json!("{{age}}")) => Ok(None),
            other => other,
        });

        assert_eq!(resolver.update(None, None).unwrap(), json!({"id": "root"}));
    }

    #[test]
    fn flattened_multi_nodes_splice_into_their_parent() {
        let (_, options) = setup(json!({"a": 1, "b": 2, "c": 3}));
        let value = |raw: &str| Node::with_value(NodeType::Value, ValueNode::new(json!(raw)));
        let inner = Node::new(NodeKind::MultiNode {
            override_values: true,
            flatten: true,
            values: vec![value("{{a}}"), value("{{b}}")],
        });
        let outer = Node::new(NodeKind::MultiNode {
            override_values: true,
            flatten: false,
            values: vec![inner, value("{{c}}")],
        });
        let root = Node::with_value(
            NodeType::View,
            ValueNode {
                value: json!({"id": "v"}),
                children: vec![Child {
                    path: vec![PathSegment::Key("list".into())],
                    value: outer,
                }],
                plugins: None,
            },
        );

        let resolver = reading_resolver(root, options);
        assert_eq!(resolver.update(None, None).unwrap(), json!({"id": "v", "list": [1, 2, 3]}));
    }

    #[test]
    fn conflicting_ids_still_resolve_each_node() {
        let (controller, options) = setup(json!({"a": 1, "b": 2}));
        let asset = |read: &str| {
            Node::with_value(
                NodeType::Asset,
                ValueNode {
                    value: json!({"id": "dup"}),
                    children: vec![Child {
                        path: vec![PathSegment::Key("value".into())],
                        value: Node::with_value(NodeType::Value, ValueNode::new(json!(read))),
                    }],
                    plugins: None,
                },
            )
        };
        let root = Node::with_value(
            NodeType::View,
            ValueNode {
                value: json!({"id": "v"}),
                children: vec![
                    Child {
                        path: vec![PathSegment::Key("first".into())],
                        value: asset("{{a}}"),
                    },
                    Child {
                        path: vec![PathSegment::Key("second".into())],
                        value: asset("{{b}}"),
                    },
                ],
                plugins: None,
            },
        );

        let resolver = reading_resolver(root, options);
        assert_eq!(
            resolver.update(None, None).unwrap(),
            json!({"id": "v", "first": {"id": "dup", "value": 1}, "second": {"id": "dup", "value": 2}})
        );

        controller
            .set(vec![("b".into(), json!(3))], &DataModelOptions::default())
            .unwrap();
        let changes = HashSet::from([Binding::from_dotted("b")]);
        assert_eq!(
            resolver.update(Some(&changes), None).unwrap(),
            json!({"id": "v", "first": {"id": "dup", "value": 1}, "second": {"id": "dup", "value": 3}})
        );
    }
}
