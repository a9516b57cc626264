//! Data Module - the mutable model behind a flow
//!
//! Layers, innermost first:
//! - `local`: in-memory JSON tree addressed by [`Binding`]
//! - `pipeline`: middleware chain (`get`/`set`/`delete` with `next`)
//! - `dependency`: read/write tracking wrappers used by the resolver and validators
//! - `controller`: parsing, defaults, format/deformat, update notifications
//!
//! Key types:
//! - [`DataModelImpl`]: binding-keyed model
//! - [`DataModelMiddleware`]: a pipeline stage
//! - [`DataModelWithParser`]: raw-path model (`"foo.bar[0]"`)

mod controller;
mod dependency;
mod local;
mod pipeline;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::binding::{Binding, BindingLike};
use crate::error::Result;

pub use controller::{DataController, DataControllerHooks};
pub use dependency::{DependencyModel, DependencySubset, DependencyTracker};
pub use local::LocalModel;
pub use pipeline::PipelinedDataModel;

/// One applied change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Update {
    pub binding: Binding,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    /// Report the update even when old and new values are equal
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub force: bool,
}

impl Update {
    pub fn new(binding: Binding, old_value: Option<Value>, new_value: Option<Value>) -> Self {
        Self {
            binding,
            old_value,
            new_value,
            force: false,
        }
    }
}

pub type Updates = Vec<Update>;

/// Parsed set transaction
pub type BatchSetTransaction = Vec<(Binding, Value)>;

/// Options threaded through every model call
#[derive(Debug, Clone, Default)]
pub struct DataModelOptions {
    /// `Some(true)`: run values through `format`; `Some(false)`: through `deformat`
    pub formatted: Option<bool>,
    /// Include values vetoed by validation middleware
    pub include_invalid: bool,
    /// Do not substitute default values for undefined reads
    pub ignore_default_value: bool,
    /// Apply the change without triggering view updates
    pub silent: bool,
}

impl DataModelOptions {
    pub fn formatted() -> Self {
        Self {
            formatted: Some(true),
            ..Self::default()
        }
    }

    pub fn include_invalid() -> Self {
        Self {
            include_invalid: true,
            ..Self::default()
        }
    }

    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }
}

/// A model addressed by parsed bindings
pub trait DataModelImpl: Send + Sync {
    fn get(&self, binding: &Binding, options: &DataModelOptions) -> Option<Value>;
    fn set(&self, transaction: &[(Binding, Value)], options: &DataModelOptions) -> Result<Updates>;
    fn delete(&self, binding: &Binding, options: &DataModelOptions) -> Result<()>;
}

/// One stage of a [`PipelinedDataModel`]
///
/// Stages are chained so that the last registered middleware sees calls first;
/// `next` is everything below it.
pub trait DataModelMiddleware: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, binding: &Binding, options: &DataModelOptions, next: &dyn DataModelImpl) -> Option<Value> {
        next.get(binding, options)
    }

    fn set(
        &self,
        transaction: &[(Binding, Value)],
        options: &DataModelOptions,
        next: &dyn DataModelImpl,
    ) -> Result<Updates> {
        next.set(transaction, options)
    }

    fn delete(&self, binding: &Binding, options: &DataModelOptions, next: &dyn DataModelImpl) -> Result<()> {
        next.delete(binding, options)
    }

    /// Clear any state kept by the stage
    fn reset(&self) {}
}

/// A model addressed by raw paths
pub trait DataModelWithParser: Send + Sync {
    fn get(&self, binding: BindingLike, options: &DataModelOptions) -> Result<Option<Value>>;
    fn set(&self, transaction: Vec<(BindingLike, Value)>, options: &DataModelOptions) -> Result<Updates>;
    fn delete(&self, binding: BindingLike, options: &DataModelOptions) -> Result<()>;
}

/// Turns a raw path into a binding (read-only when the flag is set)
pub type ParseBindingFn = Arc<dyn Fn(BindingLike, bool) -> Result<Binding> + Send + Sync>;

/// Model that stores nothing
pub struct NoopModel;

impl DataModelImpl for NoopModel {
    fn get(&self, _binding: &Binding, _options: &DataModelOptions) -> Option<Value> {
        None
    }

    fn set(&self, _transaction: &[(Binding, Value)], _options: &DataModelOptions) -> Result<Updates> {
        Ok(Vec::new())
    }

    fn delete(&self, _binding: &Binding, _options: &DataModelOptions) -> Result<()> {
        Ok(())
    }
}

/// Adapts a binding-keyed model to raw paths
pub struct WithParser {
    model: Arc<dyn DataModelImpl>,
    parse: ParseBindingFn,
}

impl WithParser {
    pub fn new(model: Arc<dyn DataModelImpl>, parse: ParseBindingFn) -> Self {
        Self { model, parse }
    }
}

impl DataModelWithParser for WithParser {
    fn get(&self, binding: BindingLike, options: &DataModelOptions) -> Result<Option<Value>> {
        let binding = (self.parse)(binding, true)?;
        Ok(self.model.get(&binding, options))
    }

    fn set(&self, transaction: Vec<(BindingLike, Value)>, options: &DataModelOptions) -> Result<Updates> {
        let parsed = transaction
            .into_iter()
            .map(|(binding, value)| Ok(((self.parse)(binding, false)?, value)))
            .collect::<Result<Vec<_>>>()?;
        self.model.set(&parsed, options)
    }

    fn delete(&self, binding: BindingLike, options: &DataModelOptions) -> Result<()> {
        let binding = (self.parse)(binding, false)?;
        self.model.delete(&binding, options)
    }
}
