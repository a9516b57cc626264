//! In-memory JSON model

use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::{DataModelImpl, DataModelMiddleware, DataModelOptions, Update, Updates};
use crate::binding::Binding;
use crate::error::Result;
use crate::util::{delete_in, get_in, set_in};

/// Base of every data pipeline: a JSON tree behind a lock
///
/// As a middleware stage it ignores `next`.
pub struct LocalModel {
    model: RwLock<Value>,
}

impl Default for LocalModel {
    fn default() -> Self {
        Self::new(Value::Object(Map::new()))
    }
}

impl LocalModel {
    pub fn new(model: Value) -> Self {
        Self {
            model: RwLock::new(model),
        }
    }

    /// Replace the whole tree
    pub fn reset(&self, model: Value) {
        *self.model.write() = model;
    }

    /// Snapshot of the whole tree
    pub fn snapshot(&self) -> Value {
        self.model.read().clone()
    }
}

impl DataModelImpl for LocalModel {
    fn get(&self, binding: &Binding, _options: &DataModelOptions) -> Option<Value> {
        get_in(&self.model.read(), binding.as_array()).cloned()
    }

    fn set(&self, transaction: &[(Binding, Value)], _options: &DataModelOptions) -> Result<Updates> {
        let mut model = self.model.write();

        Ok(transaction
            .iter()
            .map(|(binding, value)| {
                let old_value = get_in(&model, binding.as_array()).cloned();
                set_in(&mut model, binding.as_array(), value.clone());
                Update::new(binding.clone(), old_value, Some(value.clone()))
            })
            .collect())
    }

    fn delete(&self, binding: &Binding, _options: &DataModelOptions) -> Result<()> {
        delete_in(&mut self.model.write(), binding.as_array());
        Ok(())
    }
}

impl DataModelMiddleware for LocalModel {
    fn name(&self) -> &str {
        "local-model"
    }

    fn get(&self, binding: &Binding, options: &DataModelOptions, _next: &dyn DataModelImpl) -> Option<Value> {
        DataModelImpl::get(self, binding, options)
    }

    fn set(
        &self,
        transaction: &[(Binding, Value)],
        options: &DataModelOptions,
        _next: &dyn DataModelImpl,
    ) -> Result<Updates> {
        DataModelImpl::set(self, transaction, options)
    }

    fn delete(&self, binding: &Binding, options: &DataModelOptions, _next: &dyn DataModelImpl) -> Result<()> {
        DataModelImpl::delete(self, binding, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_reports_old_and_new_values() {
        let model = LocalModel::new(json!({"foo": {"bar": 1}}));
        let binding = Binding::from_dotted("foo.bar");

        let updates = DataModelImpl::set(&model, &[(binding.clone(), json!(2))], &DataModelOptions::default()).unwrap();

        assert_eq!(updates, vec![Update::new(binding.clone(), Some(json!(1)), Some(json!(2)))]);
        assert_eq!(DataModelImpl::get(&model, &binding, &DataModelOptions::default()), Some(json!(2)));
    }

    #[test]
    fn delete_splices_array_elements() {
        let model = LocalModel::new(json!({"list": [1, 2, 3]}));

        DataModelImpl::delete(&model, &Binding::from_dotted("list.0"), &DataModelOptions::default()).unwrap();

        assert_eq!(model.snapshot(), json!({"list": [2, 3]}));
    }

    #[test]
    fn root_binding_reads_everything() {
        let model = LocalModel::new(json!({"a": 1}));
        assert_eq!(
            DataModelImpl::get(&model, &Binding::root(), &DataModelOptions::default()),
            Some(json!({"a": 1}))
        );
    }
}
