//! Binding parser with interning
//!
//! - Fast path: plain dotted paths (`foo.bar-baz.0`) skip the grammar
//! - Grammar ASTs are cached by raw string
//! - Resolved bindings are interned by normalized path
//! - Queries that match nothing record an update creating the element

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::grammar::{self, BindingAst};
use super::{find_in_array, Binding, BindingLike, PathSegment};
use crate::error::{PlayerError, Result};
use crate::hooks::SyncBailHook;
use crate::util::{to_display_string, type_of};

static SIMPLE_BINDING_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w\-@]+(\.[\w\-@]+)*$").expect("valid regex"));

/// Model access needed to resolve nested refs, expressions and queries
pub trait PathResolver: Send + Sync {
    fn get(&self, binding: &Binding) -> Option<Value>;
    fn set(&self, transaction: Vec<(Binding, Value)>) -> Result<()>;
    fn evaluate(&self, expression: &str) -> Result<Value>;
}

/// Per-call parse options
#[derive(Clone, Copy, Default)]
pub struct ParseOptions<'a> {
    /// Without a resolver, nested refs, expressions and queries fail to resolve
    pub resolver: Option<&'a dyn PathResolver>,
    /// Do not write the elements created by unmatched queries
    pub read_only: bool,
}

impl<'a> ParseOptions<'a> {
    pub fn with_resolver(resolver: &'a dyn PathResolver) -> Self {
        Self {
            resolver: Some(resolver),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

#[derive(Default)]
pub struct BindingParserHooks {
    /// Return `Some(true)` to force the grammar for a simple path
    pub skip_optimization: SyncBailHook<bool, str>,
}

#[derive(Default)]
struct Normalized {
    path: Vec<PathSegment>,
    updates: Vec<(String, Value)>,
}

/// Parser that turns raw paths into interned [`Binding`]s
#[derive(Default)]
pub struct BindingParser {
    cache: DashMap<String, Binding>,
    parse_cache: DashMap<String, Arc<std::result::Result<BindingAst, String>>>,
    pub hooks: BindingParserHooks,
}

impl BindingParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse without a model: plain and bracketed literal paths only
    pub fn parse_static(&self, raw: impl Into<BindingLike>) -> Result<Binding> {
        self.parse(raw, ParseOptions::default())
    }

    pub fn parse(&self, raw: impl Into<BindingLike>, options: ParseOptions<'_>) -> Result<Binding> {
        let joined = match raw.into() {
            BindingLike::Binding(binding) => return Ok(binding),
            BindingLike::Segments(segments) => segments
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("."),
            BindingLike::Raw(raw) => raw,
        };

        let normalized = self.normalize_path(&joined, &options)?;

        if !options.read_only && !normalized.updates.is_empty() {
            if let Some(resolver) = options.resolver {
                let transaction = normalized
                    .updates
                    .iter()
                    .map(|(path, value)| Ok((self.parse_static(path.as_str())?, value.clone())))
                    .collect::<Result<Vec<_>>>()?;
                resolver.set(transaction)?;
            }
        }

        Ok(self.intern(normalized.path))
    }

    /// Interned binding for already-normalized segments
    pub fn intern(&self, path: Vec<PathSegment>) -> Binding {
        let candidate = Binding::new(path);
        self.cache
            .entry(candidate.as_string().to_string())
            .or_insert(candidate)
            .clone()
    }

    /// Drop cached ASTs and interned bindings
    pub fn reset(&self) {
        self.cache.clear();
        self.parse_cache.clear();
    }

    fn normalize_path(&self, path: &str, options: &ParseOptions<'_>) -> Result<Normalized> {
        if SIMPLE_BINDING_REGEX.is_match(path) && self.hooks.skip_optimization.call(path, &()) != Some(true) {
            return Ok(Normalized {
                path: path.split('.').map(PathSegment::parse).collect(),
                updates: Vec::new(),
            });
        }

        let ast = match self.parse_cache.get(path) {
            Some(cached) => Arc::clone(&cached),
            None => {
                let parsed = Arc::new(grammar::parse(path));
                self.parse_cache.insert(path.to_string(), Arc::clone(&parsed));
                parsed
            }
        };

        let ast = match ast.as_ref() {
            Ok(ast) => ast,
            Err(reason) => {
                return Err(PlayerError::NormalizePath {
                    path: path.to_string(),
                    reason: reason.clone(),
                })
            }
        };

        let mut normalized = Normalized::default();
        let parts = match ast {
            BindingAst::Path(parts) => parts.as_slice(),
            other => std::slice::from_ref(other),
        };
        for part in parts {
            self.resolve_node(part, options, &mut normalized)
                .map_err(|e| PlayerError::ResolveBinding {
                    path: path.to_string(),
                    source: Box::new(e),
                })?;
        }

        Ok(normalized)
    }

    fn resolver<'a>(&self, options: &ParseOptions<'a>) -> Result<&'a dyn PathResolver> {
        options.resolver.ok_or_else(|| PlayerError::BindingConversion {
            details: "No data model available to resolve a dynamic binding".to_string(),
        })
    }

    fn get_value(&self, path: &[PathSegment], options: &ParseOptions<'_>) -> Result<Option<Value>> {
        let binding = self.intern(path.to_vec());
        Ok(self.resolver(options)?.get(&binding))
    }

    fn convert_to_path(
        &self,
        value: Option<Value>,
        options: &ParseOptions<'_>,
        context: &mut Normalized,
    ) -> Result<String> {
        let value = value.ok_or_else(|| PlayerError::BindingConversion {
            details: "Attempted to convert undefined value to binding path".to_string(),
        })?;

        let raw = match &value {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => to_display_string(&value),
            other => {
                return Err(PlayerError::BindingConversion {
                    details: format!("Attempting to convert {} to a binding path.", type_of(other)),
                })
            }
        };

        let nested = self.normalize_path(&raw, options)?;
        context.updates.extend(nested.updates);

        let joined = nested
            .path
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".");
        if joined.is_empty() {
            return Err(PlayerError::BindingConversion {
                details: "Nested path resolved to an empty path".to_string(),
            });
        }

        Ok(joined)
    }

    /// Resolve a value-like node to its string form
    fn value_for_node(
        &self,
        node: &BindingAst,
        options: &ParseOptions<'_>,
        context: &mut Normalized,
    ) -> Result<String> {
        match node {
            BindingAst::Value(value) => Ok(value.clone()),
            BindingAst::Path(parts) => {
                let mut nested = Normalized::default();
                for part in parts {
                    self.resolve_node(part, options, &mut nested)?;
                }
                context.updates.extend(nested.updates);

                let segment = nested
                    .path
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(".");
                self.get_value(&nested.path, options)
                    .and_then(|value| self.convert_to_path(value, options, context))
                    .map_err(|e| PlayerError::UnresolvedSegment {
                        segment,
                        source: Box::new(e),
                    })
            }
            BindingAst::Expression(exp) => self
                .resolver(options)
                .and_then(|resolver| resolver.evaluate(exp))
                .and_then(|value| {
                    let value = (!value.is_null()).then_some(value);
                    self.convert_to_path(value, options, context)
                })
                .map_err(|e| PlayerError::UnresolvedSegment {
                    segment: exp.clone(),
                    source: Box::new(e),
                }),
            BindingAst::Query { .. } | BindingAst::Concatenated(_) => {
                Err(PlayerError::BindingConversion {
                    details: "Unable to resolve value for nested query".to_string(),
                })
            }
        }
    }

    fn append_segments(segment: &str, context: &mut Normalized) {
        context.path.extend(segment.split('.').map(PathSegment::parse));
    }

    fn resolve_node(
        &self,
        node: &BindingAst,
        options: &ParseOptions<'_>,
        context: &mut Normalized,
    ) -> Result<()> {
        match node {
            BindingAst::Value(value) => Self::append_segments(value, context),
            BindingAst::Path(_) | BindingAst::Expression(_) => {
                let value = self.value_for_node(node, options, context)?;
                Self::append_segments(&value, context);
            }
            BindingAst::Query { key, value } => {
                let target = self.get_value(&context.path, options)?;
                let items = match target {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };

                let key = self.value_for_node(key, options, context)?;
                let value = value
                    .as_deref()
                    .map(|v| self.value_for_node(v, options, context))
                    .transpose()?;

                match find_in_array(&items, &key, value.as_deref()) {
                    Some(index) => context.path.push(PathSegment::Index(index)),
                    None => {
                        let mut created: Vec<String> =
                            context.path.iter().map(ToString::to_string).collect();
                        created.push(items.len().to_string());
                        created.push(key);
                        context
                            .updates
                            .push((created.join("."), value.map(Value::String).unwrap_or(Value::Null)));
                        context.path.push(PathSegment::Index(items.len()));
                    }
                }
            }
            BindingAst::Concatenated(parts) => {
                let mut joined = String::new();
                for part in parts {
                    joined.push_str(&self.value_for_node(part, options, context)?);
                }
                context.path.push(PathSegment::parse(&joined));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use serde_json::json;

    use crate::util::{get_in, set_in};

    struct JsonResolver(RwLock<Value>);

    impl PathResolver for JsonResolver {
        fn get(&self, binding: &Binding) -> Option<Value> {
            get_in(&self.0.read(), binding.as_array()).cloned()
        }

        fn set(&self, transaction: Vec<(Binding, Value)>) -> Result<()> {
            let mut data = self.0.write();
            for (binding, value) in transaction {
                set_in(&mut data, binding.as_array(), value);
            }
            Ok(())
        }

        fn evaluate(&self, expression: &str) -> Result<Value> {
            Ok(match expression {
                "1 + 1" => json!(2),
                _ => Value::Null,
            })
        }
    }

    #[test]
    fn equal_paths_share_one_instance() {
        let parser = BindingParser::new();

        let a = parser.parse_static("foo.bar[0]").unwrap();
        let b = parser.parse_static("foo.bar.0").unwrap();
        let c = parser.parse_static("foo['bar'].0").unwrap();

        assert!(Binding::ptr_eq(&a, &b));
        assert!(Binding::ptr_eq(&a, &c));
        assert_eq!(a.as_array()[2], PathSegment::Index(0));
    }

    #[test]
    fn parsed_bindings_pass_through() {
        let parser = BindingParser::new();
        let a = parser.parse_static("foo").unwrap();
        let b = parser.parse_static(&a).unwrap();

        assert!(Binding::ptr_eq(&a, &b));
    }

    #[test]
    fn empty_path_is_root() {
        let parser = BindingParser::new();
        assert!(parser.parse_static("").unwrap().is_root());
    }

    #[test]
    fn nested_refs_read_the_model() {
        let parser = BindingParser::new();
        let model = JsonResolver(RwLock::new(json!({"key": "bar", "idx": 1})));

        let binding = parser
            .parse("foo.{{key}}.list[{{idx}}]", ParseOptions::with_resolver(&model))
            .unwrap();
        assert_eq!(binding.as_string(), "foo.bar.list.1");

        let concatenated = parser
            .parse("foo.pre_{{key}}", ParseOptions::with_resolver(&model))
            .unwrap();
        assert_eq!(concatenated.as_string(), "foo.pre_bar");
    }

    #[test]
    fn expression_segments_evaluate() {
        let parser = BindingParser::new();
        let model = JsonResolver(RwLock::new(json!({})));

        let binding = parser
            .parse("foo.`1 + 1`", ParseOptions::with_resolver(&model))
            .unwrap();
        assert_eq!(binding.as_string(), "foo.2");
    }

    #[test]
    fn query_finds_existing_index() {
        let parser = BindingParser::new();
        let model = JsonResolver(RwLock::new(json!({
            "people": [{"name": "frodo"}, {"name": "sam"}]
        })));

        let binding = parser
            .parse("people[name='sam'].age", ParseOptions::with_resolver(&model))
            .unwrap();
        assert_eq!(binding.as_string(), "people.1.age");
    }

    #[test]
    fn unmatched_query_creates_element() {
        let parser = BindingParser::new();
        let model = JsonResolver(RwLock::new(json!({"people": [{"name": "frodo"}]})));

        let binding = parser
            .parse("people[name='pippin'].age", ParseOptions::with_resolver(&model))
            .unwrap();

        assert_eq!(binding.as_string(), "people.1.age");
        assert_eq!(
            *model.0.read(),
            json!({"people": [{"name": "frodo"}, {"name": "pippin"}]})
        );
    }

    #[test]
    fn read_only_queries_leave_model_alone() {
        let parser = BindingParser::new();
        let model = JsonResolver(RwLock::new(json!({"people": []})));

        let binding = parser
            .parse(
                "people[name='pippin']",
                ParseOptions::with_resolver(&model).read_only(),
            )
            .unwrap();

        assert_eq!(binding.as_string(), "people.0");
        assert_eq!(*model.0.read(), json!({"people": []}));
    }

    #[test]
    fn undefined_nested_value_is_an_error() {
        let parser = BindingParser::new();
        let model = JsonResolver(RwLock::new(json!({})));

        let err = parser
            .parse("foo.{{missing}}", ParseOptions::with_resolver(&model))
            .unwrap_err();

        assert!(err.to_string().contains("Cannot resolve binding: foo.{{missing}}"));
        assert!(err
            .root_cause()
            .to_string()
            .contains("Attempted to convert undefined value to binding path"));
    }

    #[test]
    fn object_nested_value_is_an_error() {
        let parser = BindingParser::new();
        let model = JsonResolver(RwLock::new(json!({"obj": {"a": 1}})));

        let err = parser
            .parse("foo.{{obj}}", ParseOptions::with_resolver(&model))
            .unwrap_err();

        assert!(err
            .root_cause()
            .to_string()
            .contains("Attempting to convert object to a binding path."));
    }

    #[test]
    fn grammar_errors_name_the_path() {
        let parser = BindingParser::new();
        let err = parser.parse_static("foo[]").unwrap_err();

        assert_eq!(
            err.to_string(),
            "PLY-021: Cannot normalize path \"foo[]\": Expected identifier"
        );
    }

    #[test]
    fn skip_optimization_forces_grammar() {
        let parser = BindingParser::new();
        parser.hooks.skip_optimization.tap("always", |_, _| Some(true));

        assert_eq!(parser.parse_static("a.b").unwrap().as_string(), "a.b");
    }
}
