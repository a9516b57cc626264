//! Validation Module - validators, their state machine and the data middleware
//!
//! Submodules:
//! - `registry`: named validator functions and the built-in set
//! - `middleware`: data-model stage that keeps invalid values in a shadow model
//! - `binding_tracker`: view plugin recording which bindings the view shows
//! - `controller`: per-binding phase state machine and view validation
//!
//! ```text
//! set("age", -1) → ValidationMiddleware → checker → ValidationController
//!                        ↓ invalid                      ↓ runs validators
//!                  shadow model               ValidatedBinding (load → change → navigation)
//! ```

mod binding_tracker;
mod controller;
mod middleware;
mod registry;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::binding::Binding;
use crate::data::{DataModelOptions, DataModelWithParser};
use crate::error::Result;
use crate::expression::{Expression, ExpressionEvaluator};

pub use binding_tracker::{BindingTracker, ValidationBindingTrackerPlugin};
pub use controller::{
    ValidatedBinding, ValidationController, ValidationControllerHooks, ValidatorOptions, ViewValidation,
    ViewValidationResult,
};
pub use middleware::{MiddlewareChecker, MiddlewareVerdict, StrongOrWeakBinding, ValidationMiddleware};
pub use registry::{ValidatorFunction, ValidatorRegistry};

// ═══════════════════════════════════════════════════════════════
// Validation declarations
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// The phase that first runs a validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Load,
    Change,
    Navigation,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Trigger::Load => "load",
            Trigger::Change => "change",
            Trigger::Navigation => "navigation",
        })
    }
}

/// Where a failing validation is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayTarget {
    #[default]
    Field,
    Section,
    Page,
}

/// Which representation of the value a validator receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataTarget {
    Formatted,
    Deformatted,
}

/// `true`, `false` or `"once"` (block only the first navigation attempt)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BlockingRepr", into = "BlockingRepr")]
pub enum Blocking {
    Always,
    Never,
    Once,
}

impl Blocking {
    pub fn blocks_navigation(self) -> bool {
        !matches!(self, Blocking::Never)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum BlockingRepr {
    Flag(bool),
    Named(String),
}

impl TryFrom<BlockingRepr> for Blocking {
    type Error = String;

    fn try_from(repr: BlockingRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            BlockingRepr::Flag(true) => Ok(Blocking::Always),
            BlockingRepr::Flag(false) => Ok(Blocking::Never),
            BlockingRepr::Named(name) if name == "once" => Ok(Blocking::Once),
            BlockingRepr::Named(other) => Err(format!("unknown blocking mode: {other}")),
        }
    }
}

impl From<Blocking> for BlockingRepr {
    fn from(blocking: Blocking) -> Self {
        match blocking {
            Blocking::Always => BlockingRepr::Flag(true),
            Blocking::Never => BlockingRepr::Flag(false),
            Blocking::Once => BlockingRepr::Named("once".to_string()),
        }
    }
}

/// One declared validation (schema or view `validation` entry)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationObject {
    /// Name of the validator to run
    #[serde(rename = "type")]
    pub validator: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_target: Option<DisplayTarget>,

    /// Overrides the validator's message; may hold `{{refs}}` and `%params`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocking: Option<Blocking>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_target: Option<DataTarget>,

    /// Binding a view-level validation is attached to
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    /// Validator-specific options (`min`, `regex`, `exp`, ...)
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl ValidationObject {
    pub fn new(validator: impl Into<String>) -> Self {
        Self {
            validator: validator.into(),
            severity: None,
            trigger: None,
            display_target: None,
            message: None,
            blocking: None,
            data_target: None,
            reference: None,
            options: Map::new(),
        }
    }

    pub fn severity(&self) -> Severity {
        self.severity.unwrap_or(Severity::Error)
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger.unwrap_or(Trigger::Change)
    }

    /// Declared blocking, else `once` for warnings and `true` for errors
    pub fn blocking(&self) -> Blocking {
        self.blocking.unwrap_or(match self.severity() {
            Severity::Warning => Blocking::Once,
            Severity::Error => Blocking::Always,
        })
    }

    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options.get(name)
    }
}

/// A failing validation, as shown to the user
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    #[serde(rename = "type")]
    pub validator: String,
    pub message: String,
    pub severity: Severity,
    pub trigger: Trigger,
    pub display_target: DisplayTarget,
    pub blocking: Blocking,
}

/// Anything that can declare validations for a binding
pub trait ValidationProvider: Send + Sync {
    fn get_validations_for_binding(&self, binding: &Binding) -> Option<Vec<ValidationObject>>;
}

// ═══════════════════════════════════════════════════════════════
// Validator API
// ═══════════════════════════════════════════════════════════════

/// What a validator returns when the value is invalid
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorResult {
    pub message: String,
    /// Values for `%name` tokens in a declared message
    pub parameters: Option<Map<String, Value>>,
}

impl ValidatorResult {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            parameters: None,
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.get_or_insert_with(Map::new).insert(name.into(), value);
        self
    }
}

/// Everything a validator may use besides the value
pub struct ValidatorContext<'a> {
    /// Reads here are recorded as weak bindings of the validation
    pub model: Arc<dyn DataModelWithParser>,
    pub evaluator: &'a ExpressionEvaluator,
    pub validation: &'a ValidationObject,
}

impl ValidatorContext<'_> {
    /// Evaluate against the recording model; a pending result counts as `null`
    pub fn evaluate(&self, expression: impl Into<Expression>) -> Result<Value> {
        let options = self.evaluator.default_options().with_model(Arc::clone(&self.model));
        let eval = self.evaluator.evaluate_with(expression, options)?;
        if eval.is_pending() {
            warn!(validator = %self.validation.validator, "Validator expression is async; treating it as null");
            return Ok(Value::Null);
        }
        Ok(eval.ready().unwrap_or(Value::Null))
    }

    pub fn get(&self, binding: &str) -> Result<Option<Value>> {
        self.model.get(binding.into(), &DataModelOptions::include_invalid())
    }
}

/// `true` when any changed binding touches (or is touched by) a dependency
///
/// Missing information means "yes".
pub fn cares_about_data_changes(
    changes: Option<&HashSet<Binding>>,
    dependencies: Option<&HashSet<Binding>>,
) -> bool {
    let (Some(changes), Some(dependencies)) = (changes, dependencies) else {
        return true;
    };

    dependencies.iter().any(|dep| {
        changes
            .iter()
            .any(|change| change == dep || change.contains(dep) || dep.contains(change))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blocking_accepts_flags_and_once() {
        let parsed: Vec<Blocking> = serde_json::from_value(json!([true, false, "once"])).unwrap();
        assert_eq!(parsed, vec![Blocking::Always, Blocking::Never, Blocking::Once]);
        assert!(serde_json::from_value::<Blocking>(json!("twice")).is_err());
        assert_eq!(serde_json::to_value(Blocking::Once).unwrap(), json!("once"));
    }

    #[test]
    fn validation_object_keeps_validator_options() {
        let obj: ValidationObject = serde_json::from_value(json!({
            "type": "length",
            "min": 2,
            "trigger": "navigation",
            "ref": "foo.bar"
        }))
        .unwrap();

        assert_eq!(obj.validator, "length");
        assert_eq!(obj.option("min"), Some(&json!(2)));
        assert_eq!(obj.trigger(), Trigger::Navigation);
        assert_eq!(obj.reference.as_deref(), Some("foo.bar"));
        assert_eq!(obj.blocking(), Blocking::Always);
    }

    #[test]
    fn warnings_block_once_by_default() {
        let mut obj = ValidationObject::new("required");
        obj.severity = Some(Severity::Warning);
        assert_eq!(obj.blocking(), Blocking::Once);
    }

    #[test]
    fn data_changes_match_parents_and_children() {
        let deps: HashSet<_> = [Binding::from_dotted("foo.bar")].into_iter().collect();
        let child: HashSet<_> = [Binding::from_dotted("foo.bar.baz")].into_iter().collect();
        let parent: HashSet<_> = [Binding::from_dotted("foo")].into_iter().collect();
        let other: HashSet<_> = [Binding::from_dotted("foo.other")].into_iter().collect();

        assert!(cares_about_data_changes(Some(&child), Some(&deps)));
        assert!(cares_about_data_changes(Some(&parent), Some(&deps)));
        assert!(!cares_about_data_changes(Some(&other), Some(&deps)));
        assert!(cares_about_data_changes(None, Some(&deps)));
    }
}
