//! Data controller
//!
//! Entry point for every read and write a flow makes:
//! - raw paths are parsed (and interned) through the [`BindingParser`]
//! - values pass through `format`/`deformat` hooks when asked
//! - undefined reads fall back to `resolve_default_value`
//! - effective changes are announced once per batch on `on_update`
//!
//! ```text
//! set([("foo.bar", 1)]) → parse → deformat? → diff vs current
//!                       → pipeline.set → on_set → on_update(changed)
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    BatchSetTransaction, DataModelImpl, DataModelMiddleware, DataModelOptions, DataModelWithParser,
    LocalModel, ParseBindingFn, PipelinedDataModel, Update, Updates,
};
use crate::binding::{Binding, BindingLike, BindingParser, ParseOptions, PathResolver};
use crate::error::Result;
use crate::expression::{ExpressionEvaluator, WeakEvaluator};
use crate::hooks::{SyncBailHook, SyncHook, SyncWaterfallHook};
use crate::util::deep_equal;

/// Extension points of the [`DataController`]
#[derive(Default)]
pub struct DataControllerHooks {
    /// Final say over the middleware stack, called once when the pipeline is built
    pub resolve_data_stages: SyncWaterfallHook<Vec<Arc<dyn DataModelMiddleware>>>,
    /// Supplies a value for undefined reads
    pub resolve_default_value: SyncBailHook<Value, Binding>,
    pub on_delete: SyncHook<Binding>,
    pub on_set: SyncHook<[(Binding, Value)]>,
    pub on_get: SyncHook<BindingLike, Option<Value>>,
    /// Effective changes of one set, skipped when nothing changed
    pub on_update: SyncHook<[Update], DataModelOptions>,
    pub format: SyncWaterfallHook<Value, Binding>,
    pub deformat: SyncWaterfallHook<Value, Binding>,
    pub serialize: SyncWaterfallHook<Value>,
}

/// The orchestrator for flow data
pub struct DataController {
    pub hooks: DataControllerHooks,
    model: OnceCell<PipelinedDataModel>,
    base_middleware: Vec<Arc<dyn DataModelMiddleware>>,
    local: Arc<LocalModel>,
    trash: Mutex<HashSet<Binding>>,
    parser: Arc<BindingParser>,
    evaluator: RwLock<Option<WeakEvaluator>>,
    me: Weak<DataController>,
}

impl DataController {
    pub fn new(
        model: Value,
        parser: Arc<BindingParser>,
        middleware: Vec<Arc<dyn DataModelMiddleware>>,
    ) -> Arc<Self> {
        let local = Arc::new(LocalModel::new(model));
        let mut base_middleware: Vec<Arc<dyn DataModelMiddleware>> = vec![local.clone()];
        base_middleware.extend(middleware);

        Arc::new_cyclic(|me| Self {
            hooks: DataControllerHooks::default(),
            model: OnceCell::new(),
            base_middleware,
            local,
            trash: Mutex::new(HashSet::new()),
            parser,
            evaluator: RwLock::new(None),
            me: me.clone(),
        })
    }

    /// Evaluator used for `` `expr` `` segments inside bindings
    pub fn set_evaluator(&self, evaluator: &ExpressionEvaluator) {
        *self.evaluator.write() = Some(evaluator.downgrade());
    }

    pub fn parser(&self) -> &Arc<BindingParser> {
        &self.parser
    }

    /// The middleware pipeline, built on first use
    pub fn get_model(&self) -> &PipelinedDataModel {
        self.model.get_or_init(|| {
            let stages = self.hooks.resolve_data_stages.call(self.base_middleware.clone(), &(), &());
            PipelinedDataModel::new(stages)
        })
    }

    /// The in-memory tree at the bottom of the pipeline
    pub fn local_model(&self) -> &LocalModel {
        &self.local
    }

    /// Parse a raw path, resolving nested refs against this controller
    pub fn parse_binding(&self, binding: impl Into<BindingLike>, read_only: bool) -> Result<Binding> {
        self.parser.parse(
            binding,
            ParseOptions {
                resolver: Some(self),
                read_only,
            },
        )
    }

    /// A parse function that does not keep the controller alive
    pub fn parse_binding_fn(&self) -> ParseBindingFn {
        let me = self.me.clone();
        let parser = self.parser.clone();
        Arc::new(move |binding, read_only| match me.upgrade() {
            Some(controller) => controller.parse_binding(binding, read_only),
            None => parser.parse(binding, ParseOptions { resolver: None, read_only }),
        })
    }

    pub fn set(&self, transaction: Vec<(BindingLike, Value)>, options: &DataModelOptions) -> Result<Updates> {
        let deformat = options.formatted == Some(true);
        let normalized: BatchSetTransaction = transaction
            .into_iter()
            .map(|(binding, value)| {
                let parsed = self.parse_binding(binding, false)?;
                let value = if deformat {
                    self.hooks.deformat.call(value, &parsed, &())
                } else {
                    value
                };
                Ok((parsed, value))
            })
            .collect::<Result<_>>()?;

        let mut set_updates: Updates = Vec::new();
        for (binding, new_value) in &normalized {
            let old_value = self.get(binding, &DataModelOptions::include_invalid())?;
            if old_value.as_ref().is_some_and(|old| deep_equal(old, new_value)) {
                debug!(
                    "Skipping update for path: {}. Value was unchanged: {}",
                    binding,
                    describe(&old_value)
                );
            } else {
                debug!(
                    "Setting path: {} from: {} to: {}",
                    binding,
                    describe(&old_value),
                    new_value
                );
                set_updates.push(Update::new(binding.clone(), old_value, Some(new_value.clone())));
            }
        }

        let result = self.get_model().set(&normalized, options)?;

        let set_bindings: HashSet<Binding> = set_updates.iter().map(|u| u.binding.clone()).collect();
        for update in &result {
            if !set_bindings.contains(&update.binding)
                && (update.force || !option_equal(&update.old_value, &update.new_value))
            {
                debug!(
                    "Path: {} was changed from: {} to: {}",
                    update.binding,
                    describe(&update.old_value),
                    describe(&update.new_value)
                );
                set_updates.push(update.clone());
            }
        }

        self.hooks.on_set.call(&normalized, &());

        if !set_updates.is_empty() {
            self.hooks.on_update.call(&set_updates, options);
        }

        Ok(result)
    }

    pub fn get(&self, binding: impl Into<BindingLike>, options: &DataModelOptions) -> Result<Option<Value>> {
        let binding = binding.into();
        let resolved = self.parse_binding(binding.clone(), true)?;
        let mut result = self.get_model().get(&resolved, options);

        if result.is_none() && !options.ignore_default_value {
            result = self.hooks.resolve_default_value.call(&resolved, &());
        }

        result = match options.formatted {
            Some(true) => result.map(|value| self.hooks.format.call(value, &resolved, &())),
            Some(false) => result.map(|value| self.hooks.deformat.call(value, &resolved, &())),
            None => result,
        };

        self.hooks.on_get.call(&binding, &result);

        Ok(result)
    }

    pub fn delete(&self, binding: impl Into<BindingLike>, options: &DataModelOptions) -> Result<()> {
        let resolved = self.parse_binding(binding, false)?;

        let existed_before_delete = match (resolved.key(), self.get(resolved.parent(), &DataModelOptions::default())?) {
            (Some(key), Some(Value::Object(map))) => map.contains_key(&key.to_string()),
            (Some(key), Some(Value::Array(items))) => key.as_index().is_some_and(|i| i < items.len()),
            _ => false,
        };

        self.get_model().delete(&resolved, options)?;

        if existed_before_delete {
            let remaining = self.get(&resolved, &DataModelOptions::default())?;
            if !remaining.as_ref().is_some_and(crate::util::is_truthy) {
                self.trash.lock().insert(resolved.clone());
            }
        }

        self.hooks.on_delete.call(&resolved, &());

        Ok(())
    }

    /// Bindings that held a value before being deleted
    pub fn trash(&self) -> HashSet<Binding> {
        self.trash.lock().clone()
    }

    pub fn serialize(&self) -> Result<Value> {
        let data = self.get("", &DataModelOptions::default())?.unwrap_or(Value::Null);
        Ok(self.hooks.serialize.call(data, &(), &()))
    }
}

impl DataModelWithParser for DataController {
    fn get(&self, binding: BindingLike, options: &DataModelOptions) -> Result<Option<Value>> {
        DataController::get(self, binding, options)
    }

    fn set(&self, transaction: Vec<(BindingLike, Value)>, options: &DataModelOptions) -> Result<Updates> {
        DataController::set(self, transaction, options)
    }

    fn delete(&self, binding: BindingLike, options: &DataModelOptions) -> Result<()> {
        DataController::delete(self, binding, options)
    }
}

impl PathResolver for DataController {
    fn get(&self, binding: &Binding) -> Option<Value> {
        self.get_model().get(binding, &DataModelOptions::default())
    }

    fn set(&self, transaction: Vec<(Binding, Value)>) -> Result<()> {
        let transaction = transaction
            .into_iter()
            .map(|(binding, value)| (BindingLike::from(binding), value))
            .collect();
        DataController::set(self, transaction, &DataModelOptions::default()).map(drop)
    }

    fn evaluate(&self, expression: &str) -> Result<Value> {
        let evaluator = self.evaluator.read().as_ref().and_then(WeakEvaluator::upgrade);
        let (Some(evaluator), Some(me)) = (evaluator, self.me.upgrade()) else {
            warn!(expression, "No expression evaluator attached to the data controller");
            return Ok(Value::Null);
        };

        let options = evaluator.default_options().with_model(me);
        let result = evaluator.evaluate_with(expression, options)?;
        Ok(result.ready().unwrap_or_else(|| {
            warn!(expression, "Binding segment evaluated to a pending value");
            Value::Null
        }))
    }
}

fn option_equal(a: &Option<Value>, b: &Option<Value>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => deep_equal(a, b),
        (None, None) => true,
        _ => false,
    }
}

fn describe(value: &Option<Value>) -> String {
    value.as_ref().map_or_else(|| "undefined".to_string(), Value::to_string)
}
