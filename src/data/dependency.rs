//! Read/write dependency tracking
//!
//! The resolver wraps the data model once per node; every read made while
//! resolving lands in the active subset (`core` for the node itself,
//! `children` for reads reported by child nodes).

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use super::{DataModelImpl, DataModelOptions, DataModelWithParser, Updates};
use crate::binding::{Binding, BindingLike};
use crate::error::Result;

/// Named dependency subsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencySubset {
    Core,
    Children,
}

#[derive(Default)]
struct DepSet {
    reads: HashSet<Binding>,
    writes: HashSet<Binding>,
}

struct TrackerState {
    all: DepSet,
    core: DepSet,
    children: DepSet,
    active: DependencySubset,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self {
            all: DepSet::default(),
            core: DepSet::default(),
            children: DepSet::default(),
            active: DependencySubset::Core,
        }
    }
}

impl TrackerState {
    fn subset(&mut self, name: DependencySubset) -> &mut DepSet {
        match name {
            DependencySubset::Core => &mut self.core,
            DependencySubset::Children => &mut self.children,
        }
    }
}

/// Records every binding read from or written to
#[derive(Default)]
pub struct DependencyTracker {
    state: Mutex<TrackerState>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route further reads and writes into `name` (as well as the full set)
    pub fn track_subset(&self, name: DependencySubset) {
        self.state.lock().active = name;
    }

    pub fn track_default(&self) {
        self.track_subset(DependencySubset::Core);
    }

    /// Bindings read, either overall or within one subset
    pub fn get_dependencies(&self, name: Option<DependencySubset>) -> HashSet<Binding> {
        let mut state = self.state.lock();
        match name {
            Some(name) => state.subset(name).reads.clone(),
            None => state.all.reads.clone(),
        }
    }

    /// Bindings written, either overall or within one subset
    pub fn get_modified(&self, name: Option<DependencySubset>) -> HashSet<Binding> {
        let mut state = self.state.lock();
        match name {
            Some(name) => state.subset(name).writes.clone(),
            None => state.all.writes.clone(),
        }
    }

    pub fn reads_binding(&self, binding: &Binding) -> bool {
        self.state.lock().all.reads.contains(binding)
    }

    pub fn writes_binding(&self, binding: &Binding) -> bool {
        self.state.lock().all.writes.contains(binding)
    }

    pub fn reset(&self) {
        *self.state.lock() = TrackerState::default();
    }

    pub fn add_read_dep(&self, binding: &Binding) {
        let mut state = self.state.lock();
        let active = state.active;
        state.subset(active).reads.insert(binding.clone());
        state.all.reads.insert(binding.clone());
    }

    pub fn add_write_dep(&self, binding: &Binding) {
        let mut state = self.state.lock();
        let active = state.active;
        state.subset(active).writes.insert(binding.clone());
        state.all.writes.insert(binding.clone());
    }

    pub fn add_child_read_dep(&self, binding: &Binding) {
        let mut state = self.state.lock();
        state.children.reads.insert(binding.clone());
        state.all.reads.insert(binding.clone());
    }
}

/// A binding-keyed view of a model that records what it touches
pub struct DependencyModel {
    tracker: DependencyTracker,
    root: Arc<dyn DataModelWithParser>,
}

impl DependencyModel {
    pub fn new(root: Arc<dyn DataModelWithParser>) -> Self {
        Self {
            tracker: DependencyTracker::new(),
            root,
        }
    }

    pub fn tracker(&self) -> &DependencyTracker {
        &self.tracker
    }
}

impl std::ops::Deref for DependencyModel {
    type Target = DependencyTracker;

    fn deref(&self) -> &Self::Target {
        &self.tracker
    }
}

impl DataModelImpl for DependencyModel {
    fn get(&self, binding: &Binding, options: &DataModelOptions) -> Option<Value> {
        self.tracker.add_read_dep(binding);
        match self.root.get(BindingLike::from(binding.clone()), options) {
            Ok(value) => value,
            Err(err) => {
                warn!(binding = %binding, error = %err, "Read failed while tracking dependencies");
                None
            }
        }
    }

    fn set(&self, transaction: &[(Binding, Value)], options: &DataModelOptions) -> Result<Updates> {
        for (binding, _) in transaction {
            self.tracker.add_write_dep(binding);
        }
        let transaction = transaction
            .iter()
            .map(|(binding, value)| (BindingLike::from(binding.clone()), value.clone()))
            .collect();
        self.root.set(transaction, options)
    }

    fn delete(&self, binding: &Binding, options: &DataModelOptions) -> Result<()> {
        self.root.delete(BindingLike::from(binding.clone()), options)
    }
}
