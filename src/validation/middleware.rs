//! Data-model stage that holds back invalid values
//!
//! Every set lands in a shadow model first. The checker decides per binding:
//! valid values are committed to the next stage, invalid ones stay in the
//! shadow model and are reported as forced updates so views refresh. Reads
//! with `include_invalid` see the shadow values overlaid on the committed data.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use super::ValidationResponse;
use crate::binding::{remove_binding_and_children_from_map, Binding};
use crate::data::{DataModelImpl, DataModelMiddleware, DataModelOptions, Update, Updates};
use crate::error::Result;
use crate::util::set_in;

/// A binding flagged by the checker and whether it owns the failing validation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StrongOrWeakBinding {
    pub binding: Binding,
    pub is_strong: bool,
}

/// Checker outcome for one binding
#[derive(Debug, Clone)]
pub enum MiddlewareVerdict {
    /// The binding's own validation failed
    Invalid(ValidationResponse),
    /// The binding is read by failing validations of other bindings
    Related(HashSet<StrongOrWeakBinding>),
}

pub type MiddlewareChecker =
    Arc<dyn Fn(&Binding, &dyn DataModelImpl) -> Result<Option<MiddlewareVerdict>> + Send + Sync>;

pub struct ValidationMiddleware {
    validator: MiddlewareChecker,
    shadow: Mutex<HashMap<Binding, Value>>,
}

/// The middleware seen as a model, always including invalid values
struct ShadowView<'a> {
    middleware: &'a ValidationMiddleware,
    options: DataModelOptions,
    next: &'a dyn DataModelImpl,
}

impl DataModelImpl for ShadowView<'_> {
    fn get(&self, binding: &Binding, _options: &DataModelOptions) -> Option<Value> {
        DataModelMiddleware::get(self.middleware, binding, &self.options, self.next)
    }

    fn set(&self, transaction: &[(Binding, Value)], _options: &DataModelOptions) -> Result<Updates> {
        DataModelMiddleware::set(self.middleware, transaction, &self.options, self.next)
    }

    fn delete(&self, binding: &Binding, _options: &DataModelOptions) -> Result<()> {
        DataModelMiddleware::delete(self.middleware, binding, &self.options, self.next)
    }
}

impl ValidationMiddleware {
    pub fn new(validator: MiddlewareChecker) -> Self {
        Self {
            validator,
            shadow: Mutex::new(HashMap::new()),
        }
    }

    /// Bindings currently held back
    pub fn shadow_bindings(&self) -> Vec<Binding> {
        self.shadow.lock().keys().cloned().collect()
    }
}

impl DataModelMiddleware for ValidationMiddleware {
    fn name(&self) -> &str {
        "validation-middleware"
    }

    fn get(&self, binding: &Binding, options: &DataModelOptions, next: &dyn DataModelImpl) -> Option<Value> {
        let mut value = next.get(binding, options);

        if !options.include_invalid {
            return value;
        }

        for (shadow_binding, shadow_value) in self.shadow.lock().iter() {
            if shadow_binding == binding {
                value = Some(shadow_value.clone());
                continue;
            }

            if binding.contains(shadow_binding) {
                let mut base = value.take().unwrap_or(Value::Null);
                set_in(&mut base, &shadow_binding.relative(binding), shadow_value.clone());
                value = Some(base);
            }
        }

        value
    }

    fn set(
        &self,
        transaction: &[(Binding, Value)],
        options: &DataModelOptions,
        next: &dyn DataModelImpl,
    ) -> Result<Updates> {
        let as_model = ShadowView {
            middleware: self,
            options: DataModelOptions {
                include_invalid: true,
                ..options.clone()
            },
            next,
        };

        let included: HashSet<Binding> = transaction.iter().map(|(binding, _)| binding.clone()).collect();

        let pending: Vec<(Binding, Value)> = {
            let mut shadow = self.shadow.lock();
            for (binding, value) in transaction {
                shadow.insert(binding.clone(), value.clone());
            }
            shadow.iter().map(|(b, v)| (b.clone(), v.clone())).collect()
        };

        let mut next_transaction: Vec<(Binding, Value)> = Vec::new();
        let mut invalid: Vec<Binding> = Vec::new();

        for (binding, value) in pending {
            match (self.validator)(&binding, &as_model)? {
                None => next_transaction.push((binding, value)),
                Some(MiddlewareVerdict::Related(related)) => {
                    for flagged in related {
                        if !flagged.is_strong && flagged.binding == binding {
                            next_transaction.push((flagged.binding.clone(), value.clone()));
                        }
                        invalid.push(flagged.binding);
                    }
                }
                Some(MiddlewareVerdict::Invalid(response)) => {
                    if included.contains(&binding) {
                        debug!(
                            "Invalid value for path: {} - {:?} - {}",
                            binding, response.severity, response.message
                        );
                        invalid.push(binding);
                    }
                }
            }
        }

        let mut results: Updates = Vec::new();

        if !next_transaction.is_empty() {
            {
                let mut shadow = self.shadow.lock();
                for (binding, _) in &next_transaction {
                    shadow.remove(binding);
                }
            }

            let committed = next.set(&next_transaction, options)?;
            if invalid.is_empty() {
                return Ok(committed);
            }
            results = committed;
        }

        results.extend(invalid.into_iter().map(|binding| {
            let current = as_model.get(&binding, &DataModelOptions::include_invalid());
            Update {
                binding,
                old_value: current.clone(),
                new_value: current,
                force: true,
            }
        }));

        Ok(results)
    }

    fn delete(&self, binding: &Binding, options: &DataModelOptions, next: &dyn DataModelImpl) -> Result<()> {
        {
            let mut shadow = self.shadow.lock();
            let current = std::mem::take(&mut *shadow);
            *shadow = remove_binding_and_children_from_map(current, binding);
        }
        next.delete(binding, options)
    }

    fn reset(&self) {
        self.shadow.lock().clear();
    }
}
