//! Validator registry and the built-in validators
//!
//! Built-ins: `required`, `expression`, `regex`, `length`, `min`, `max`,
//! `enum` (alias `oneOf`) and `integer`. Everything except `required` and
//! `expression` passes on `null`/undefined values.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use tracing::warn;

use super::{ValidationObject, ValidatorContext, ValidatorResult};
use crate::error::{PlayerError, Result};
use crate::string_resolver::{resolve_data_refs_in_string, StringResolveOptions};
use crate::util::{deep_equal, is_truthy, to_display_string};

pub type ValidatorFunction = Arc<
    dyn Fn(&ValidatorContext<'_>, Option<&Value>, &ValidationObject) -> Result<Option<ValidatorResult>>
        + Send
        + Sync,
>;

/// Named validators available to a flow
#[derive(Default)]
pub struct ValidatorRegistry {
    registry: RwLock<HashMap<String, ValidatorFunction>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in validators
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("required", required);
        registry.register("expression", expression);
        registry.register("regex", regex_validator);
        registry.register("length", length);
        registry.register("min", min);
        registry.register("max", max);
        registry.register("enum", one_of);
        registry.register("oneOf", one_of);
        registry.register("integer", integer);
        registry
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&ValidatorContext<'_>, Option<&Value>, &ValidationObject) -> Result<Option<ValidatorResult>>
            + Send
            + Sync
            + 'static,
    ) {
        self.registry.write().insert(name.into(), Arc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<ValidatorFunction> {
        self.registry.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.registry.read().keys().cloned().collect();
        names.sort();
        names
    }
}

// ─────────────────────────────────────────────────────────────
// Built-ins
// ─────────────────────────────────────────────────────────────

/// Unwrap the value or pass (`Ok(None)`) for null/undefined
macro_rules! skip_nullish {
    ($value:expr) => {
        match $value {
            None | Some(Value::Null) => return Ok(None),
            Some(value) => value,
        }
    };
}

fn evaluates_truthy(context: &ValidatorContext<'_>, exp: &Value) -> Result<bool> {
    Ok(is_truthy(&context.evaluate(exp)?))
}

fn required(
    context: &ValidatorContext<'_>,
    value: Option<&Value>,
    options: &ValidationObject,
) -> Result<Option<ValidatorResult>> {
    if let Some(condition) = options.option("if") {
        if !evaluates_truthy(context, condition)? {
            return Ok(None);
        }
    }
    if let Some(condition) = options.option("ifNot") {
        if evaluates_truthy(context, condition)? {
            return Ok(None);
        }
    }

    match value {
        None | Some(Value::Null) => Ok(Some(ValidatorResult::new("A value is required"))),
        Some(Value::String(s)) if s.is_empty() => Ok(Some(ValidatorResult::new("A value is required"))),
        _ => Ok(None),
    }
}

fn expression(
    context: &ValidatorContext<'_>,
    _value: Option<&Value>,
    options: &ValidationObject,
) -> Result<Option<ValidatorResult>> {
    let Some(exp) = options.option("exp") else {
        warn!("No expression defined for validation");
        return Ok(None);
    };

    if evaluates_truthy(context, exp)? {
        return Ok(None);
    }
    Ok(Some(ValidatorResult::new("Expression evaluation failed")))
}

static REGEX_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/(.*)/(\w*)$").expect("valid regex"));

/// Compile `pattern` or a `/pattern/flags` literal
fn compile_pattern(source: &str) -> Result<Regex> {
    let (pattern, flags) = match REGEX_LITERAL.captures(source) {
        Some(caps) => (
            caps.get(1).map_or("", |m| m.as_str()).to_string(),
            caps.get(2).map_or("", |m| m.as_str()).to_string(),
        ),
        None => (source.to_string(), String::new()),
    };

    RegexBuilder::new(&pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .build()
        .map_err(|err| PlayerError::Validator {
            name: "regex".to_string(),
            details: err.to_string(),
        })
}

fn regex_validator(
    context: &ValidatorContext<'_>,
    value: Option<&Value>,
    options: &ValidationObject,
) -> Result<Option<ValidatorResult>> {
    let value = skip_nullish!(value);
    if value.as_str() == Some("") {
        return Ok(None);
    }
    let Some(source) = options.option("regex").and_then(Value::as_str) else {
        return Ok(None);
    };

    let evaluate = |exp: &str| context.evaluate(exp);
    let resolved = resolve_data_refs_in_string(
        source,
        &StringResolveOptions {
            model: context.model.as_ref(),
            evaluate: &evaluate,
        },
    )?;

    let pattern = compile_pattern(&to_display_string(&resolved))?;
    if pattern.is_match(&to_display_string(value)) {
        return Ok(None);
    }
    Ok(Some(ValidatorResult::new("Invalid entry")))
}

fn length(
    _context: &ValidatorContext<'_>,
    value: Option<&Value>,
    options: &ValidationObject,
) -> Result<Option<ValidatorResult>> {
    let value = skip_nullish!(value);

    let (actual, item_name) = match value {
        Value::String(s) => (s.chars().count(), "characters"),
        Value::Array(items) => (items.len(), "items"),
        Value::Object(map) => (map.len(), "items"),
        other => {
            warn!(value = %other, "Unable to determine a length for value");
            return Ok(None);
        }
    };

    let bound = |name: &str| options.option(name).and_then(Value::as_f64);
    let failed = |message: String| {
        Ok(Some(
            ValidatorResult::new(message).with_parameter("validationLength", Value::from(actual)),
        ))
    };

    if let Some(exact) = options.option("exact") {
        if exact.as_f64() != Some(actual as f64) {
            return failed(format!("Must be exactly {} {item_name} long", to_display_string(exact)));
        }
        return Ok(None);
    }

    if let Some(min) = bound("min") {
        if (actual as f64) < min {
            return failed(format!("At least {} {item_name} needed", to_display_string(&options.options["min"])));
        }
    }

    if let Some(max) = bound("max") {
        if (actual as f64) > max {
            return failed(format!("Up to {} {item_name} allowed", to_display_string(&options.options["max"])));
        }
    }

    Ok(None)
}

fn compare_number(
    value: Option<&Value>,
    options: &ValidationObject,
    fails: impl Fn(f64, f64) -> bool,
    message: impl Fn(&Value) -> String,
) -> Result<Option<ValidatorResult>> {
    let value = skip_nullish!(value);
    let (Some(actual), Some(limit)) = (value.as_f64(), options.option("value")) else {
        return Ok(None);
    };
    let Some(limit_number) = limit.as_f64() else {
        return Ok(None);
    };

    if fails(actual, limit_number) {
        return Ok(Some(ValidatorResult::new(message(limit))));
    }
    Ok(None)
}

fn min(
    _context: &ValidatorContext<'_>,
    value: Option<&Value>,
    options: &ValidationObject,
) -> Result<Option<ValidatorResult>> {
    compare_number(value, options, |actual, limit| actual < limit, |limit| {
        format!("Must be at least {}", to_display_string(limit))
    })
}

fn max(
    _context: &ValidatorContext<'_>,
    value: Option<&Value>,
    options: &ValidationObject,
) -> Result<Option<ValidatorResult>> {
    compare_number(value, options, |actual, limit| actual > limit, |limit| {
        format!("Cannot exceed {}", to_display_string(limit))
    })
}

fn one_of(
    _context: &ValidatorContext<'_>,
    value: Option<&Value>,
    options: &ValidationObject,
) -> Result<Option<ValidatorResult>> {
    let value = skip_nullish!(value);
    let Some(Value::Array(allowed)) = options.option("options") else {
        return Ok(None);
    };

    if allowed.iter().any(|candidate| deep_equal(candidate, value)) {
        return Ok(None);
    }
    Ok(Some(ValidatorResult::new("Invalid entry")))
}

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

fn integer(
    _context: &ValidatorContext<'_>,
    value: Option<&Value>,
    _options: &ValidationObject,
) -> Result<Option<ValidatorResult>> {
    let value = skip_nullish!(value);
    if !is_truthy(value) {
        return Ok(None);
    }

    let valid = value
        .as_f64()
        .is_some_and(|n| n.floor() == n && n.abs() <= MAX_SAFE_INTEGER);
    if valid {
        return Ok(None);
    }

    let mut result = ValidatorResult::new("Value must be an integer")
        .with_parameter("type", Value::from(crate::util::type_of(value)));
    if let Some(n) = value.as_f64() {
        result = result.with_parameter("flooredValue", crate::util::number_value(n.floor()));
    }
    Ok(Some(result))
}
