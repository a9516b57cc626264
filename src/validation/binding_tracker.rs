//! View plugin that records which bindings the rendered view shows
//!
//! Each node gets its own validation surface: tracking a binding through it
//! ties the binding to that node, and bindings roll up through the resolved
//! tree so `get_children` can answer for any subtree. Sections registered by
//! a node collect the bindings tracked by their descendants.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use super::controller::ViewValidation;
use super::{DisplayTarget, ValidationResponse};
use crate::binding::Binding;
use crate::data::ParseBindingFn;
use crate::schema::DataType;
use crate::view::{NodeId, NodeKind, Resolver, ViewInstance, ViewPlugin};

/// Anything that knows the bindings of the current view
pub trait BindingTracker: Send + Sync {
    fn get_bindings(&self) -> HashSet<Binding>;

    fn track_binding(&self, binding: &Binding);
}

/// Called every time a node tracks a binding
pub type OnAddBinding = Arc<dyn Fn(&Binding) + Send + Sync>;

#[derive(Default)]
struct TreeState {
    /// Source node → bindings it tracked directly during this pass
    tracked: HashMap<NodeId, HashSet<Binding>>,
    /// Section source node → source nodes tracking inside it
    sections: HashMap<NodeId, HashSet<NodeId>>,
    last_view_update_change_set: Option<HashSet<Binding>>,
    /// Source node → every binding in its subtree, as of the last pass
    last_computed_binding_tree: HashMap<NodeId, HashSet<Binding>>,
    /// Resolved node → every binding in its subtree, for the pass in flight
    current_binding_tree: HashMap<NodeId, HashSet<Binding>>,
    last_section_binding_tree: HashMap<NodeId, HashSet<Binding>>,
    /// Resolved node → source node
    resolved_node_map: HashMap<NodeId, NodeId>,
}

pub struct ValidationBindingTrackerPlugin {
    parse_binding: ParseBindingFn,
    on_add: Option<OnAddBinding>,
    tracked_bindings: Mutex<HashSet<Binding>>,
}

impl ValidationBindingTrackerPlugin {
    pub fn new(parse_binding: ParseBindingFn, on_add: Option<OnAddBinding>) -> Self {
        Self {
            parse_binding,
            on_add,
            tracked_bindings: Mutex::new(HashSet::new()),
        }
    }

    fn record(&self, binding: &Binding) {
        self.tracked_bindings.lock().insert(binding.clone());
        if let Some(on_add) = &self.on_add {
            on_add(binding);
        }
    }

    /// Attach to a freshly built resolver
    pub fn apply_resolver(self: &Arc<Self>, resolver: &Resolver) {
        self.tracked_bindings.lock().clear();

        let tree = Arc::new(Mutex::new(TreeState::default()));
        let root_id = resolver.root().id();

        let state = tree.clone();
        resolver.hooks.before_update.tap("validation-binding-tracker", move |changes, _| {
            state.lock().last_view_update_change_set = changes.clone();
        });

        let state = tree.clone();
        resolver
            .hooks
            .skip_resolve
            .tap("validation-binding-tracker", move |should_skip, node, _| {
                if !should_skip {
                    return false;
                }
                let state = state.lock();
                match (
                    &state.last_view_update_change_set,
                    state.last_computed_binding_tree.get(&node.id()),
                ) {
                    (Some(changes), Some(tracked)) => changes.is_disjoint(tracked),
                    _ => should_skip,
                }
            });

        let state = tree.clone();
        let plugin = Arc::clone(self);
        resolver
            .hooks
            .resolve_options
            .tap("validation-binding-tracker", move |mut options, node, _| {
                let Some(base) = options.validation.clone() else {
                    return options;
                };

                state.lock().tracked.remove(&node.id());

                options.validation = Some(Arc::new(NodeValidation {
                    base,
                    plugin: Arc::clone(&plugin),
                    tree: Arc::clone(&state),
                    node: node.id(),
                    lineage: options.lineage.iter().map(|n| n.id()).collect(),
                }));
                options
            });

        let plugin = Arc::clone(self);
        resolver
            .hooks
            .resolve
            .tap("validation-binding-tracker", move |value, node, options| {
                let mut value = value?;
                let (NodeKind::Asset(_), Some(validation)) = (&node.kind, &options.validation) else {
                    return Ok(value);
                };
                let Some(raw) = value.get("binding").and_then(Value::as_str) else {
                    return Ok(value);
                };

                let binding = match (plugin.parse_binding)(raw.into(), true) {
                    Ok(binding) => binding,
                    Err(err) => {
                        warn!("Unable to track binding '{raw}': {err}");
                        return Ok(value);
                    }
                };

                if let (Some(response), Value::Object(map)) = (validation.get(&binding, true), &mut value) {
                    map.insert("validation".to_string(), serde_json::to_value(response)?);
                }
                Ok(value)
            });

        let state = tree;
        let plugin = Arc::clone(self);
        resolver
            .hooks
            .after_node_update
            .tap("validation-binding-tracker", move |source, update| {
                let mut state = state.lock();
                let resolved = update.node.id();
                state.resolved_node_map.insert(resolved, source.id());

                let subtree = if update.updated {
                    let mut newly = state.tracked.get(&source.id()).cloned().unwrap_or_default();
                    for sub in update.node.sub_nodes() {
                        if let Some(bindings) = state.current_binding_tree.get(&sub.id()) {
                            newly.extend(bindings.iter().cloned());
                        }
                    }
                    newly
                } else {
                    state
                        .last_computed_binding_tree
                        .get(&source.id())
                        .cloned()
                        .unwrap_or_default()
                };
                state.current_binding_tree.insert(resolved, subtree);

                if source.id() != root_id {
                    return;
                }

                *plugin.tracked_bindings.lock() = state.current_binding_tree.get(&resolved).cloned().unwrap_or_default();

                let current = std::mem::take(&mut state.current_binding_tree);
                let computed: HashMap<NodeId, HashSet<Binding>> = current
                    .into_iter()
                    .filter_map(|(node, bindings)| state.resolved_node_map.get(&node).map(|src| (*src, bindings)))
                    .collect();
                state.last_computed_binding_tree = computed;

                let sections: HashMap<NodeId, HashSet<Binding>> = state
                    .sections
                    .iter()
                    .map(|(section, nodes)| {
                        let bindings = nodes
                            .iter()
                            .filter_map(|n| state.tracked.get(n))
                            .flatten()
                            .cloned()
                            .collect();
                        (*section, bindings)
                    })
                    .collect();
                state.last_section_binding_tree = sections;

                state.tracked.clear();
                state.sections.clear();
            });
    }
}

impl BindingTracker for ValidationBindingTrackerPlugin {
    fn get_bindings(&self) -> HashSet<Binding> {
        self.tracked_bindings.lock().clone()
    }

    fn track_binding(&self, binding: &Binding) {
        if self.tracked_bindings.lock().contains(binding) {
            return;
        }
        self.record(binding);
    }
}

impl ViewPlugin for ValidationBindingTrackerPlugin {
    fn apply(self: Arc<Self>, view: &ViewInstance) {
        view.hooks
            .resolver
            .tap("validation-binding-tracker", move |resolver, _| self.apply_resolver(resolver));
    }
}

/// Validation surface of one node
struct NodeValidation {
    base: Arc<dyn ViewValidation>,
    plugin: Arc<ValidationBindingTrackerPlugin>,
    tree: Arc<Mutex<TreeState>>,
    node: NodeId,
    /// Source ancestors, root first
    lineage: Vec<NodeId>,
}

impl NodeValidation {
    fn collect(&self, bindings: Option<HashSet<Binding>>, keep: impl Fn(&ValidationResponse) -> bool) -> Vec<ValidationResponse> {
        bindings
            .into_iter()
            .flatten()
            .filter_map(|b| self.base.blocking_validation_for(&b))
            .filter(|v| keep(v))
            .collect()
    }
}

impl ViewValidation for NodeValidation {
    fn validations_for(&self, binding: &Binding) -> Vec<ValidationResponse> {
        self.base.validations_for(binding)
    }

    fn blocking_validation_for(&self, binding: &Binding) -> Option<ValidationResponse> {
        self.base.blocking_validation_for(binding)
    }

    fn get_all(&self) -> HashMap<Binding, ValidationResponse> {
        self.base.get_all()
    }

    fn get_children(&self, target: Option<DisplayTarget>) -> Vec<ValidationResponse> {
        let bindings = self.tree.lock().last_computed_binding_tree.get(&self.node).cloned();
        self.collect(bindings, |v| target.map_or(true, |t| t == v.display_target))
    }

    fn get_validations_for_section(&self) -> Vec<ValidationResponse> {
        let bindings = self.tree.lock().last_section_binding_tree.get(&self.node).cloned();
        self.collect(bindings, |v| v.display_target == DisplayTarget::Section)
    }

    fn register(&self, target: DisplayTarget) {
        if target == DisplayTarget::Section {
            self.tree.lock().sections.entry(self.node).or_default();
        }
    }

    fn track(&self, binding: &Binding) {
        {
            let mut tree = self.tree.lock();
            tree.tracked.entry(self.node).or_default().insert(binding.clone());

            if let Some(section) = self.lineage.iter().rev().find(|n| tree.sections.contains_key(*n)).copied() {
                tree.sections.entry(section).or_default().insert(self.node);
            }
        }

        self.plugin.record(binding);
    }

    fn binding_type(&self, binding: &Binding) -> Option<DataType> {
        self.base.binding_type(binding)
    }
}
