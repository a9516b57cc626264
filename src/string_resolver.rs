//! String interpolation of `{{binding}}` refs and `@[ expression ]@` blocks
//!
//! A string that is exactly one ref or one expression resolves to the raw
//! value (numbers stay numbers); anything else is interpolated as text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::binding::BindingLike;
use crate::data::{DataModelOptions, DataModelWithParser};
use crate::error::{PlayerError, Result};
use crate::util::to_display_string;

const DOUBLE_OPEN_CURLY: &str = "{{";
const DOUBLE_CLOSE_CURLY: &str = "}}";

static EXPRESSION_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"@\[.*?\]@").expect("valid regex"));

/// What interpolation needs from its surroundings
pub struct StringResolveOptions<'a> {
    pub model: &'a dyn DataModelWithParser,
    pub evaluate: &'a dyn Fn(&str) -> Result<Value>,
}

/// Byte span of a `{{ ... }}` block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpLocation {
    pub start: usize,
    pub end: usize,
}

/// Locate the next outermost `{{ ... }}` block, honoring nesting
pub fn find_next_exp(s: &str) -> Result<Option<ExpLocation>> {
    let Some(exp_start) = s.find(DOUBLE_OPEN_CURLY) else {
        return Ok(None);
    };

    let mut count = 1;
    let mut offset = exp_start + DOUBLE_OPEN_CURLY.len();
    let mut working = &s[offset..];

    while count > 0 && !working.is_empty() {
        let Some(next_close) = working.find(DOUBLE_CLOSE_CURLY) else {
            break;
        };

        match working.find(DOUBLE_OPEN_CURLY) {
            Some(next_open) if next_open < next_close => {
                count += 1;
                working = &working[next_open + DOUBLE_OPEN_CURLY.len()..];
                offset += next_open + DOUBLE_OPEN_CURLY.len();
            }
            _ => {
                count -= 1;
                working = &working[next_close + DOUBLE_CLOSE_CURLY.len()..];
                offset += next_close + DOUBLE_CLOSE_CURLY.len();
            }
        }
    }

    if count != 0 {
        return Err(PlayerError::UnbalancedExpression {
            expression: s.to_string(),
        });
    }

    Ok(Some(ExpLocation {
        start: exp_start,
        end: offset,
    }))
}

/// Evaluate every `@[ ... ]@` block in the string
pub fn resolve_expressions_in_string(val: &str, options: &StringResolveOptions<'_>) -> Result<Value> {
    let mut working = val.to_string();

    while let Some(found) = EXPRESSION_BLOCK.find(&working) {
        let (start, end) = (found.start(), found.end());
        let block = found.as_str();
        let expression = &block[2..block.len() - 2];
        let value = (options.evaluate)(expression)?;

        if start == 0 && block == val && !value.is_string() {
            return Ok(value);
        }

        working = format!("{}{}{}", &working[..start], to_display_string(&value), &working[end..]);
    }

    Ok(Value::String(working))
}

/// Resolve expressions, then every `{{binding}}` ref (read formatted)
pub fn resolve_data_refs_in_string(val: &str, options: &StringResolveOptions<'_>) -> Result<Value> {
    let mut working = match resolve_expressions_in_string(val, options)? {
        Value::String(s) => s,
        other => return Ok(other),
    };

    while working.contains(DOUBLE_OPEN_CURLY) {
        let Some(ExpLocation { start, end }) = find_next_exp(&working)? else {
            break;
        };

        let binding = working[start + DOUBLE_OPEN_CURLY.len()..end - DOUBLE_CLOSE_CURLY.len()].trim();
        let value = options
            .model
            .get(BindingLike::from(binding), &DataModelOptions::formatted())?
            .unwrap_or(Value::Null);

        if start == 0 && end == working.len() && !value.is_string() {
            return Ok(value);
        }

        working = format!("{}{}{}", &working[..start], to_display_string(&value), &working[end..]);
    }

    Ok(Value::String(working))
}

/// Resolve refs in every string of a JSON tree
pub fn resolve_data_refs(val: &Value, options: &StringResolveOptions<'_>) -> Result<Value> {
    match val {
        Value::String(s) => resolve_data_refs_in_string(s, options),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_data_refs(item, options))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(key, item)| Ok((key.clone(), resolve_data_refs(item, options)?)))
            .collect::<Result<Map<_, _>>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// `true` when `s` has `start` somewhere before `end`
fn has_pattern(s: &str, start: &str, end: &str) -> bool {
    match (s.find(start), s.find(end)) {
        (Some(start), Some(end)) => start < end,
        _ => false,
    }
}

/// Cheap check for refs or expressions worth resolving
pub fn has_something_to_resolve(s: &str) -> bool {
    has_pattern(s, DOUBLE_OPEN_CURLY, DOUBLE_CLOSE_CURLY) || has_pattern(s, "@[", "]@")
}

/// Replace `%name` tokens with entries of `params`; unknown tokens stay
pub fn replace_params(message: &str, params: &Map<String, Value>) -> String {
    static PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"%([a-zA-Z]+)").expect("valid regex"));

    PARAM
        .replace_all(message, |caps: &regex::Captures<'_>| {
            params
                .get(&caps[1])
                .filter(|v| crate::util::is_truthy(v))
                .map(to_display_string)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Updates;
    use crate::util::get_in;
    use serde_json::json;

    struct StaticModel(Value);

    impl DataModelWithParser for StaticModel {
        fn get(&self, binding: BindingLike, _options: &DataModelOptions) -> Result<Option<Value>> {
            let BindingLike::Raw(raw) = binding else {
                return Ok(None);
            };
            let path: Vec<_> = raw.split('.').map(crate::binding::PathSegment::parse).collect();
            Ok(get_in(&self.0, &path).cloned())
        }

        fn set(&self, _transaction: Vec<(BindingLike, Value)>, _options: &DataModelOptions) -> Result<Updates> {
            Ok(Vec::new())
        }

        fn delete(&self, _binding: BindingLike, _options: &DataModelOptions) -> Result<()> {
            Ok(())
        }
    }

    fn resolve(model: &StaticModel, s: &str) -> Result<Value> {
        let evaluate = |exp: &str| -> Result<Value> {
            match exp.trim() {
                "1 + 1" => Ok(json!(2)),
                other => Ok(json!(other.to_uppercase())),
            }
        };
        resolve_data_refs_in_string(
            s,
            &StringResolveOptions {
                model,
                evaluate: &evaluate,
            },
        )
    }

    #[test]
    fn finds_nested_refs() {
        assert_eq!(find_next_exp("a {{b}} c").unwrap(), Some(ExpLocation { start: 2, end: 7 }));
        assert_eq!(find_next_exp("{{a.{{b}}}}").unwrap(), Some(ExpLocation { start: 0, end: 11 }));
        assert_eq!(find_next_exp("none").unwrap(), None);
    }

    #[test]
    fn unbalanced_refs_fail() {
        let err = find_next_exp("{{a.{{b}}").unwrap_err();
        assert_eq!(err.to_string(), "PLY-050: Unbalanced {{ and }} in exp: {{a.{{b}}");
    }

    #[test]
    fn single_ref_keeps_raw_value() {
        let model = StaticModel(json!({"count": 3, "name": "ada"}));

        assert_eq!(resolve(&model, "{{count}}").unwrap(), json!(3));
        assert_eq!(resolve(&model, "Hi {{name}}, {{count}}!").unwrap(), json!("Hi ada, 3!"));
        assert_eq!(resolve(&model, "{{missing}}").unwrap(), Value::Null);
    }

    #[test]
    fn expressions_are_evaluated_first() {
        let model = StaticModel(json!({}));

        assert_eq!(resolve(&model, "@[ 1 + 1 ]@").unwrap(), json!(2));
        assert_eq!(resolve(&model, "x @[ 1 + 1 ]@ @[abc]@").unwrap(), json!("x 2 ABC"));
    }

    #[test]
    fn pattern_detection() {
        assert!(has_something_to_resolve("a {{b}}"));
        assert!(has_something_to_resolve("@[ x ]@"));
        assert!(!has_something_to_resolve("}} {{"));
    }

    #[test]
    fn params_are_substituted() {
        let params = json!({"min": 3}).as_object().cloned().unwrap();
        assert_eq!(replace_params("At least %min, not %max", &params), "At least 3, not %max");
    }
}
