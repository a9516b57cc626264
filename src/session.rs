//! Flow session: one flow document wired into a live view
//!
//! ```text
//! FlowDocument { views, schema, data }
//!   SchemaController ── defaults / formatters ──► DataController
//!   ValidationController ── middleware ─────────► DataController
//!   ExpressionEvaluator ◄── model ──────────────── DataController
//!   ViewInstance (default plugins + async nodes + binding tracker)
//!
//! set / delete / evaluate ─► on_update ─► pending bindings (deduplicated)
//!                                          └─► flush ─► ViewInstance::update
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::binding::{Binding, BindingLike, BindingParser, PathSegment};
use crate::config::PlayerConfig;
use crate::data::{DataController, DataModelOptions, Updates};
use crate::error::{PlayerError, Result};
use crate::expression::{EvaluateOptions, Eval, Expression, ExpressionEvaluator};
use crate::schema::{FormatType, Schema, SchemaController};
use crate::validation::{Trigger, ValidationController, ValidatorOptions, ViewValidationResult};
use crate::view::plugins::{default_plugins, AsyncNodeHandler, AsyncNodePlugin, PluginOptions};
use crate::view::{ResolverOptions, ViewInstance, ViewPlugin};

/// The parts of a flow this engine understands
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowDocument {
    pub id: String,
    pub views: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
    pub data: Value,
}

impl FlowDocument {
    /// Parse JSON, falling back to YAML
    pub fn parse(source: &str) -> Result<Self> {
        match serde_json::from_str(source) {
            Ok(doc) => Ok(doc),
            Err(json_err) => serde_yaml::from_str(source).map_err(|yaml_err| {
                debug!("Flow is neither JSON ({json_err}) nor YAML");
                PlayerError::from(yaml_err)
            }),
        }
    }

    pub fn view(&self, id: Option<&str>) -> Option<&Value> {
        match id {
            Some(id) => self
                .views
                .iter()
                .find(|v| v.get("id").and_then(Value::as_str) == Some(id)),
            None => self.views.first(),
        }
    }
}

/// Bindings changed since the view last updated
#[derive(Default)]
struct PendingUpdate {
    changed: HashSet<Binding>,
    /// A non-silent change arrived
    scheduled: bool,
}

pub struct FlowSession {
    pub data: Arc<DataController>,
    pub schema: Arc<SchemaController>,
    pub evaluator: ExpressionEvaluator,
    pub validation: Arc<ValidationController>,
    document: FlowDocument,
    async_nodes: Arc<AsyncNodePlugin>,
    view: RwLock<Option<Arc<ViewInstance>>>,
    pending: Arc<Mutex<PendingUpdate>>,
}

impl FlowSession {
    pub fn new(document: FlowDocument, config: &PlayerConfig) -> Result<Self> {
        let schema = Arc::new(SchemaController::new(document.schema.as_ref())?);
        let validation = ValidationController::new(Arc::clone(&schema), None);

        let initial = match &document.data {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        let data = DataController::new(initial, Arc::new(BindingParser::new()), validation.get_data_middleware());

        let defaults = Arc::clone(&schema);
        data.hooks
            .resolve_default_value
            .tap("schema", move |binding, _| defaults.get_default_value(binding));

        let formats = Arc::clone(&schema);
        data.hooks.format.tap("schema", move |value, binding, _| match formats.get_formatter(binding) {
            Some(formatter) => formatter.format(&value),
            None => value,
        });

        let deformats = Arc::clone(&schema);
        data.hooks.deformat.tap("schema", move |value, binding, _| match deformats.get_formatter(binding) {
            Some(formatter) => formatter.deformat(&value),
            None => value,
        });

        let mut defaults = EvaluateOptions::new(data.clone());
        defaults.throw_errors = config.throw_errors;
        defaults.strict = config.strict_expressions;
        let evaluator = ExpressionEvaluator::with_options(defaults);
        data.set_evaluator(&evaluator);

        validation.set_options(ValidatorOptions {
            model: data.clone(),
            evaluator: evaluator.clone(),
            parse_binding: data.parse_binding_fn(),
        });

        let pending = Arc::new(Mutex::new(PendingUpdate::default()));
        let queue = Arc::clone(&pending);
        data.hooks.on_update.tap("view-updates", move |updates, options| {
            let mut pending = queue.lock();
            pending.changed.extend(updates.iter().map(|u| u.binding.clone()));
            pending.scheduled |= !options.silent;
        });

        // Removing an array element moves every later sibling
        let queue = Arc::clone(&pending);
        let forget = Arc::downgrade(&validation);
        data.hooks.on_delete.tap("view-updates", move |binding, _| {
            if let Some(validation) = forget.upgrade() {
                validation.on_delete(binding);
            }
            let changed = match binding.key() {
                Some(PathSegment::Index(_)) => binding.parent(),
                _ => binding.clone(),
            };
            let mut pending = queue.lock();
            pending.changed.insert(changed);
            pending.scheduled = true;
        });

        // Validation shown on a binding can change because another binding did
        for hook in [&validation.hooks.on_add_validation, &validation.hooks.on_remove_validation] {
            let queue = Arc::clone(&pending);
            hook.tap("view-updates", move |response, binding, _| {
                let mut pending = queue.lock();
                pending.changed.insert(binding.clone());
                pending.scheduled = true;
                response
            });
        }

        Ok(Self {
            data,
            schema,
            evaluator,
            validation,
            document,
            async_nodes: Arc::new(AsyncNodePlugin::new()),
            view: RwLock::new(None),
            pending,
        })
    }

    pub fn document(&self) -> &FlowDocument {
        &self.document
    }

    pub fn add_formatters(&self, formatters: impl IntoIterator<Item = FormatType>) {
        self.schema.add_formatters(formatters);
    }

    pub fn add_async_handler(&self, handler: Arc<dyn AsyncNodeHandler>) {
        self.async_nodes.add_handler(handler);
    }

    pub fn current_view(&self) -> Option<Arc<ViewInstance>> {
        self.view.read().clone()
    }

    /// Build and resolve a view of the flow (the first one when `id` is `None`)
    pub fn start(&self, id: Option<&str>) -> Result<Value> {
        let raw = self
            .document
            .view(id)
            .cloned()
            .ok_or_else(|| PlayerError::Config {
                path: format!("views.{}", id.unwrap_or("0")),
                details: "no such view in the flow".to_string(),
            })?;

        let view = ViewInstance::new(
            raw,
            ResolverOptions {
                model: self.data.clone(),
                parse_binding: self.data.parse_binding_fn(),
                evaluator: self.evaluator.clone(),
                schema: Some(Arc::clone(&self.schema)),
                validation: Some(self.validation.for_view()),
                parse_node: None,
            },
        );

        let plugin_options = PluginOptions {
            model: self.data.clone(),
            evaluator: self.evaluator.clone(),
        };
        for plugin in default_plugins(&plugin_options) {
            view.apply_plugin(plugin);
        }
        let async_nodes: Arc<dyn ViewPlugin> = self.async_nodes.clone();
        view.apply_plugin(async_nodes);
        self.validation.on_view(&view);

        info!(view = view.id(), "Starting view");
        *self.view.write() = Some(Arc::clone(&view));
        *self.pending.lock() = PendingUpdate::default();

        view.update(None)
    }

    pub fn get(&self, binding: impl Into<BindingLike>, options: &DataModelOptions) -> Result<Option<Value>> {
        self.data.get(binding, options)
    }

    /// Write a batch, then refresh the view
    pub fn set(&self, transaction: Vec<(BindingLike, Value)>, options: &DataModelOptions) -> Result<Updates> {
        let updates = self.data.set(transaction, options)?;
        self.flush()?;
        Ok(updates)
    }

    pub fn delete(&self, binding: impl Into<BindingLike>) -> Result<()> {
        self.data.delete(binding, &DataModelOptions::default())?;
        self.flush()?;
        Ok(())
    }

    /// Evaluate against the flow data; assignments refresh the view
    pub fn evaluate(&self, expression: impl Into<Expression>) -> Result<Eval> {
        let result = self.evaluator.evaluate(expression)?;
        self.flush()?;
        Ok(result)
    }

    /// Update the view with every binding changed since the last flush
    pub fn flush(&self) -> Result<Option<Value>> {
        let changed = {
            let mut pending = self.pending.lock();
            if !pending.scheduled {
                return Ok(None);
            }
            std::mem::take(&mut *pending).changed
        };

        let Some(view) = self.current_view() else {
            return Ok(None);
        };
        debug!(count = changed.len(), "Updating view for changed bindings");
        view.update(Some(&changed)).map(Some)
    }

    /// Run navigation validations; the view refreshes to show the outcome
    pub fn attempt_transition(&self) -> Result<ViewValidationResult> {
        let result = self.validation.validate_view(Trigger::Navigation)?;

        if let Some(view) = self.current_view() {
            view.update(Some(&self.validation.get_bindings()))?;
        }
        if !result.can_transition {
            info!(
                blocking = result.validations.as_ref().map_or(0, |v| v.len()),
                "Transition blocked by validation"
            );
        }

        Ok(result)
    }

    /// Fetch content for queued async nodes and re-resolve around them
    pub async fn resolve_async_nodes(&self) -> Result<Option<Value>> {
        let changed = self.async_nodes.resolve_pending().await?;
        if changed.is_empty() {
            return Ok(None);
        }

        let Some(view) = self.current_view() else {
            return Ok(None);
        };
        view.update_async(&changed).map(Some)
    }

    /// Data as it would be handed back to the host
    pub fn serialize(&self) -> Result<Value> {
        self.data.serialize()
    }
}
