//! One live view: builds its parser and resolver on first update
//!
//! ```text
//! ViewInstance::new(view json, resolver options)
//!   apply_plugin(..)*          plugins tap hooks.parser / hooks.resolver
//!   update(None)               first call builds:
//!     CrossfieldProvider ← view["validation"]
//!     hooks.template_plugin → Parser → hooks.parser → parse_view
//!     Resolver → hooks.resolver
//!   update(Some(changes))      Resolver::update → hooks.on_update (when different)
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use super::parser::Parser;
use super::plugins::{TemplatePlugin, ViewPlugin};
use super::resolver::{ParseNodeFn, Resolver, ResolverOptions};
use crate::binding::Binding;
use crate::data::ParseBindingFn;
use crate::error::Result;
use crate::hooks::SyncHook;
use crate::util::deep_equal;
use crate::validation::{Severity, Trigger, ValidationObject, ValidationProvider};

#[derive(Default)]
pub struct ViewHooks {
    /// Resolved view, only when it differs from the previous one
    pub on_update: SyncHook<Value>,
    pub parser: SyncHook<Parser>,
    pub resolver: SyncHook<Resolver>,
    pub template_plugin: SyncHook<TemplatePlugin>,
}

/// Cross-field validations declared in the view's `validation` array
///
/// Entries default to `navigation` / `error` and are grouped by their `ref`.
#[derive(Debug, Default)]
pub struct CrossfieldProvider {
    by_binding: HashMap<Binding, Vec<ValidationObject>>,
}

impl CrossfieldProvider {
    pub fn new(view: &Value, parse_binding: &ParseBindingFn) -> Self {
        let mut provider = Self::default();

        let Some(declared) = view.get("validation") else {
            return provider;
        };
        let Some(entries) = declared.as_array() else {
            let id = view.get("id").and_then(Value::as_str).unwrap_or_default();
            warn!("Unable to register view validations for id: {id}. 'validation' property must be an Array.");
            return provider;
        };

        for entry in entries {
            let mut validation: ValidationObject = match serde_json::from_value(entry.clone()) {
                Ok(v) => v,
                Err(err) => {
                    warn!("Skipping malformed view validation: {err}");
                    continue;
                }
            };
            validation.trigger.get_or_insert(Trigger::Navigation);
            validation.severity.get_or_insert(Severity::Error);

            let Some(reference) = validation.reference.clone() else {
                debug!(validator = %validation.validator, "View validation without a ref ignored");
                continue;
            };

            match parse_binding(reference.as_str().into(), true) {
                Ok(binding) => provider.by_binding.entry(binding).or_default().push(validation),
                Err(err) => warn!("Unable to parse validation ref '{reference}': {err}"),
            }
        }

        provider
    }
}

impl ValidationProvider for CrossfieldProvider {
    fn get_validations_for_binding(&self, binding: &Binding) -> Option<Vec<ValidationObject>> {
        self.by_binding.get(binding).cloned()
    }
}

struct Built {
    resolver: Resolver,
}

pub struct ViewInstance {
    pub hooks: ViewHooks,
    initial_view: Value,
    resolver_options: ResolverOptions,
    template_plugin: RwLock<Option<Arc<TemplatePlugin>>>,
    crossfield: OnceCell<CrossfieldProvider>,
    built: OnceCell<Built>,
    last_update: RwLock<Option<Value>>,
}

impl ViewInstance {
    pub fn new(initial_view: Value, resolver_options: ResolverOptions) -> Arc<Self> {
        Arc::new(Self {
            hooks: ViewHooks::default(),
            initial_view,
            resolver_options,
            template_plugin: RwLock::new(None),
            crossfield: OnceCell::new(),
            built: OnceCell::new(),
            last_update: RwLock::new(None),
        })
    }

    /// Authored id of the view
    pub fn id(&self) -> &str {
        self.initial_view.get("id").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn initial_view(&self) -> &Value {
        &self.initial_view
    }

    /// Has no effect on the view once it has rendered
    pub fn apply_plugin(&self, plugin: Arc<dyn ViewPlugin>) {
        plugin.apply(self);
    }

    pub fn set_template_plugin(&self, plugin: Arc<TemplatePlugin>) {
        *self.template_plugin.write() = Some(plugin);
    }

    pub fn last_update(&self) -> Option<Value> {
        self.last_update.read().clone()
    }

    /// Resolve the view; `None` recomputes every node
    pub fn update(&self, changes: Option<&HashSet<Binding>>) -> Result<Value> {
        let built = self.built.get_or_try_init(|| self.build())?;
        let resolved = built.resolver.update(changes, None)?;
        Ok(self.publish(resolved))
    }

    /// Re-resolve the ancestors of async nodes whose content arrived
    pub fn update_async(&self, async_nodes: &HashSet<String>) -> Result<Value> {
        let Some(built) = self.built.get() else {
            return self.update(None);
        };
        let resolved = built.resolver.update(Some(&HashSet::new()), Some(async_nodes))?;
        Ok(self.publish(resolved))
    }

    fn build(&self) -> Result<Built> {
        if self.crossfield.get().is_none() {
            let provider = CrossfieldProvider::new(&self.initial_view, &self.resolver_options.parse_binding);
            let _ = self.crossfield.set(provider);
        }

        match self.template_plugin.read().clone() {
            Some(plugin) => self.hooks.template_plugin.call(&plugin, &()),
            None => warn!("templatePlugin not set for View, legacy templates may not work"),
        }

        let parser = Arc::new(Parser::new());
        self.hooks.parser.call(&parser, &());
        let root = parser.parse_view(&self.initial_view)?;

        let parse_node: ParseNodeFn = Arc::new(move |raw, node_type, options| parser.parse_object(raw, node_type, options));
        let resolver = Resolver::new(
            root,
            ResolverOptions {
                parse_node: Some(parse_node),
                ..self.resolver_options.clone()
            },
        );
        self.hooks.resolver.call(&resolver, &());

        Ok(Built { resolver })
    }

    fn publish(&self, resolved: Value) -> Value {
        let changed = {
            let mut last = self.last_update.write();
            if last.as_ref().is_some_and(|prev| deep_equal(prev, &resolved)) {
                false
            } else {
                *last = Some(resolved.clone());
                true
            }
        };

        if changed {
            self.hooks.on_update.call(&resolved, &());
        }
        resolved
    }
}

impl ValidationProvider for ViewInstance {
    fn get_validations_for_binding(&self, binding: &Binding) -> Option<Vec<ValidationObject>> {
        self.crossfield.get()?.get_validations_for_binding(binding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingParser;
    use crate::data::{DataController, DataModelOptions};
    use crate::expression::ExpressionEvaluator;
    use crate::view::plugins::{default_plugins, PluginOptions};
    use parking_lot::Mutex;
    use serde_json::json;

    fn view_with_data(data: Value, view: Value) -> (Arc<DataController>, Arc<ViewInstance>) {
        let controller = DataController::new(data, Arc::new(BindingParser::new()), Vec::new());
        let evaluator = ExpressionEvaluator::new(controller.clone());
        controller.set_evaluator(&evaluator);

        let instance = ViewInstance::new(
            view,
            ResolverOptions {
                model: controller.clone(),
                parse_binding: controller.parse_binding_fn(),
                evaluator: evaluator.clone(),
                schema: None,
                validation: None,
                parse_node: None,
            },
        );
        for plugin in default_plugins(&PluginOptions {
            model: controller.clone(),
            evaluator,
        }) {
            instance.apply_plugin(plugin);
        }
        (controller, instance)
    }

    #[test]
    fn on_update_fires_only_for_new_content() {
        let (controller, view) = view_with_data(
            json!({"name": "ada", "other": 1}),
            json!({"id": "v", "title": {"asset": {"id": "t", "type": "text", "value": "{{name}}"}}}),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        view.hooks.on_update.tap("record", move |value, _| sink.lock().push(value.clone()));

        view.update(None).unwrap();
        controller
            .set(vec![("other".into(), json!(2))], &DataModelOptions::default())
            .unwrap();
        view.update(Some(&HashSet::from([Binding::from_dotted("other")]))).unwrap();
        controller
            .set(vec![("name".into(), json!("grace"))], &DataModelOptions::default())
            .unwrap();
        let last = view.update(Some(&HashSet::from([Binding::from_dotted("name")]))).unwrap();

        assert_eq!(last["title"]["asset"]["value"], json!("grace"));
        assert_eq!(seen.lock().len(), 2);
        assert_eq!(view.last_update(), Some(last));
    }

    #[test]
    fn templates_and_applicability_render_together() {
        let (_, view) = view_with_data(
            json!({"people": ["a", "b"], "show": false}),
            json!({
                "id": "v",
                "hidden": {"asset": {"id": "h", "type": "text", "applicability": "{{show}}"}},
                "template": [{
                    "data": "people",
                    "output": "list",
                    "value": {"asset": {"id": "p-_index_", "type": "text", "value": "{{people._index_}}"}}
                }]
            }),
        );

        let resolved = view.update(None).unwrap();
        assert!(resolved.get("hidden").is_none());
        assert_eq!(resolved["list"][1]["asset"]["value"], json!("b"));
        assert_eq!(resolved["list"][0]["asset"]["id"], json!("p-0"));
    }

    #[test]
    fn crossfield_validations_group_by_ref_with_navigation_defaults() {
        let parser = Arc::new(BindingParser::new());
        let parse: ParseBindingFn = Arc::new(move |b, _| parser.parse(b, Default::default()));
        let provider = CrossfieldProvider::new(
            &json!({
                "id": "v",
                "validation": [
                    {"type": "expression", "ref": "a.b", "exp": "{{a.b}} > 1"},
                    {"type": "required", "ref": "a.b", "severity": "warning"},
                    {"type": "required"}
                ]
            }),
            &parse,
        );

        let found = provider
            .get_validations_for_binding(&Binding::from_dotted("a.b"))
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].trigger, Some(Trigger::Navigation));
        assert_eq!(found[0].severity, Some(Severity::Error));
        assert_eq!(found[1].severity, Some(Severity::Warning));
    }

    #[test]
    fn non_array_validation_is_ignored() {
        let parser = Arc::new(BindingParser::new());
        let parse: ParseBindingFn = Arc::new(move |b, _| parser.parse(b, Default::default()));
        let provider = CrossfieldProvider::new(&json!({"id": "v", "validation": {"type": "x"}}), &parse);
        assert!(provider.by_binding.is_empty());
    }
}
