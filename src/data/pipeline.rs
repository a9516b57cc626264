//! Middleware pipeline
//!
//! ```text
//! [LocalModel, ValidationMiddleware, Tracker]
//!   get → Tracker → ValidationMiddleware → LocalModel
//! ```

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use super::{DataModelImpl, DataModelMiddleware, DataModelOptions, NoopModel, Updates};
use crate::binding::Binding;
use crate::error::Result;

/// The remainder of a pipeline below some stage
struct Next<'a> {
    stages: &'a [Arc<dyn DataModelMiddleware>],
}

impl<'a> Next<'a> {
    fn split(&self) -> Option<(&'a Arc<dyn DataModelMiddleware>, Next<'a>)> {
        let (last, rest) = self.stages.split_last()?;
        Some((last, Next { stages: rest }))
    }
}

impl DataModelImpl for Next<'_> {
    fn get(&self, binding: &Binding, options: &DataModelOptions) -> Option<Value> {
        match self.split() {
            Some((stage, next)) => stage.get(binding, options, &next),
            None => NoopModel.get(binding, options),
        }
    }

    fn set(&self, transaction: &[(Binding, Value)], options: &DataModelOptions) -> Result<Updates> {
        match self.split() {
            Some((stage, next)) => stage.set(transaction, options, &next),
            None => NoopModel.set(transaction, options),
        }
    }

    fn delete(&self, binding: &Binding, options: &DataModelOptions) -> Result<()> {
        match self.split() {
            Some((stage, next)) => stage.delete(binding, options, &next),
            None => NoopModel.delete(binding, options),
        }
    }
}

/// A model made of middleware stages
#[derive(Default)]
pub struct PipelinedDataModel {
    pipeline: RwLock<Vec<Arc<dyn DataModelMiddleware>>>,
}

impl PipelinedDataModel {
    pub fn new(pipeline: Vec<Arc<dyn DataModelMiddleware>>) -> Self {
        Self {
            pipeline: RwLock::new(pipeline),
        }
    }

    pub fn set_middleware(&self, handlers: Vec<Arc<dyn DataModelMiddleware>>) {
        *self.pipeline.write() = handlers;
    }

    pub fn add_middleware(&self, handler: Arc<dyn DataModelMiddleware>) {
        self.pipeline.write().push(handler);
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.pipeline.read().iter().map(|m| m.name().to_string()).collect()
    }

    /// Reset every stage
    pub fn reset(&self) {
        for stage in self.stages() {
            stage.reset();
        }
    }

    fn stages(&self) -> Vec<Arc<dyn DataModelMiddleware>> {
        self.pipeline.read().clone()
    }
}

impl DataModelImpl for PipelinedDataModel {
    fn get(&self, binding: &Binding, options: &DataModelOptions) -> Option<Value> {
        let stages = self.stages();
        Next { stages: &stages }.get(binding, options)
    }

    fn set(&self, transaction: &[(Binding, Value)], options: &DataModelOptions) -> Result<Updates> {
        let stages = self.stages();
        Next { stages: &stages }.set(transaction, options)
    }

    fn delete(&self, binding: &Binding, options: &DataModelOptions) -> Result<()> {
        let stages = self.stages();
        Next { stages: &stages }.delete(binding, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{LocalModel, Update};
    use serde_json::json;

    /// Doubles numbers on the way in, records calls on the way through
    struct Doubler {
        calls: RwLock<Vec<String>>,
    }

    impl DataModelMiddleware for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }

        fn get(&self, binding: &Binding, options: &DataModelOptions, next: &dyn DataModelImpl) -> Option<Value> {
            self.calls.write().push(format!("get:{binding}"));
            next.get(binding, options)
        }

        fn set(
            &self,
            transaction: &[(Binding, Value)],
            options: &DataModelOptions,
            next: &dyn DataModelImpl,
        ) -> Result<Updates> {
            let doubled: Vec<_> = transaction
                .iter()
                .map(|(b, v)| (b.clone(), json!(v.as_i64().unwrap_or(0) * 2)))
                .collect();
            next.set(&doubled, options)
        }
    }

    #[test]
    fn last_stage_sees_calls_first() {
        let local: Arc<dyn DataModelMiddleware> = Arc::new(LocalModel::default());
        let doubler = Arc::new(Doubler {
            calls: RwLock::new(Vec::new()),
        });
        let model = PipelinedDataModel::new(vec![local, doubler.clone()]);
        let binding = Binding::from_dotted("count");

        let updates = model.set(&[(binding.clone(), json!(2))], &DataModelOptions::default()).unwrap();

        assert_eq!(updates, vec![Update::new(binding.clone(), None, Some(json!(4)))]);
        assert_eq!(model.get(&binding, &DataModelOptions::default()), Some(json!(4)));
        assert_eq!(*doubler.calls.read(), vec!["get:count"]);
        assert_eq!(model.stage_names(), vec!["local-model", "doubler"]);
    }

    #[test]
    fn empty_pipeline_is_a_noop() {
        let model = PipelinedDataModel::default();
        let binding = Binding::from_dotted("x");

        assert!(model.set(&[(binding.clone(), json!(1))], &DataModelOptions::default()).unwrap().is_empty());
        assert_eq!(model.get(&binding, &DataModelOptions::default()), None);
    }
}
