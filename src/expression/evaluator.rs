//! Expression evaluator
//!
//! ```text
//! evaluate(expr) → resolve_options → before_evaluate
//!               → strip @[ ]@ → AST cache / parse
//!               → exec node (builtin handler, then `resolve` hook)
//!               → errors: on_error claims them, otherwise wrapped and returned
//! ```
//!
//! Evaluation is synchronous until a handler returns [`Eval::Pending`]; from
//! there every enclosing node becomes pending as well.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::ast::{Expression, ExpressionNode};
use super::maybe_async::Eval;
use super::operators::{
    default_binary_operators, default_expression_functions, default_unary_operators, BinaryOperator,
    ExpressionFunction, UnaryOperator,
};
use super::parser::{parse_expression, parse_expression_lenient};
use crate::binding::BindingLike;
use crate::data::{DataModelOptions, DataModelWithParser};
use crate::error::{PlayerError, Result};
use crate::hooks::{SyncBailHook, SyncWaterfallHook};
use crate::util::{is_truthy, to_display_string};

static WRAPPED_EXPRESSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^@\[(.*)\]@$").expect("valid regex"));

/// Per-evaluation options
#[derive(Clone)]
pub struct EvaluateOptions {
    pub model: Arc<dyn DataModelWithParser>,
    /// Return errors even when an `on_error` tap claims them
    pub throw_errors: bool,
    /// Fail on syntax errors instead of evaluating what parsed
    pub strict: bool,
    /// Allow `await`; set by [`ExpressionEvaluator::evaluate_async`]
    pub is_async: bool,
}

impl EvaluateOptions {
    pub fn new(model: Arc<dyn DataModelWithParser>) -> Self {
        Self {
            model,
            throw_errors: false,
            strict: true,
            is_async: false,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn DataModelWithParser>) -> Self {
        self.model = model;
        self
    }

    pub fn with_async(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub fn throwing(mut self) -> Self {
        self.throw_errors = true;
        self
    }
}

impl fmt::Debug for EvaluateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluateOptions")
            .field("throw_errors", &self.throw_errors)
            .field("strict", &self.strict)
            .field("is_async", &self.is_async)
            .finish_non_exhaustive()
    }
}

/// What operators and functions see while evaluating
#[derive(Clone)]
pub struct ExpressionContext {
    pub evaluator: ExpressionEvaluator,
    pub options: EvaluateOptions,
}

impl ExpressionContext {
    pub fn model(&self) -> &Arc<dyn DataModelWithParser> {
        &self.options.model
    }

    /// Evaluate a nested expression with the same options
    pub fn evaluate(&self, expression: impl Into<Expression>) -> Result<Eval> {
        self.evaluator.evaluate_with(expression, self.options.clone())
    }

    pub fn resolve_node(&self, node: &ExpressionNode) -> Result<Eval> {
        self.evaluator.exec_ast(node, &self.options)
    }
}

#[derive(Default)]
pub struct ExpressionEvaluatorHooks {
    /// Post-processes the value of every node
    pub resolve: SyncWaterfallHook<Eval, ExpressionNode, EvaluateOptions>,
    pub resolve_options: SyncWaterfallHook<EvaluateOptions>,
    /// Rewrites the expression before it is parsed
    pub before_evaluate: SyncWaterfallHook<Expression, EvaluateOptions>,
    /// Return `Some(true)` to swallow an error
    pub on_error: SyncBailHook<bool, PlayerError>,
}

struct EvaluatorInner {
    hooks: ExpressionEvaluatorHooks,
    vars: RwLock<HashMap<String, Value>>,
    cache: DashMap<String, Arc<ExpressionNode>>,
    binary: RwLock<HashMap<String, BinaryOperator>>,
    unary: RwLock<HashMap<String, UnaryOperator>>,
    functions: RwLock<HashMap<String, ExpressionFunction>>,
    defaults: RwLock<EvaluateOptions>,
}

/// Shared handle to an evaluator; clones see the same registries and cache
#[derive(Clone)]
pub struct ExpressionEvaluator {
    inner: Arc<EvaluatorInner>,
}

/// Non-owning handle, see [`ExpressionEvaluator::downgrade`]
#[derive(Clone)]
pub struct WeakEvaluator(Weak<EvaluatorInner>);

impl WeakEvaluator {
    pub fn upgrade(&self) -> Option<ExpressionEvaluator> {
        self.0.upgrade().map(|inner| ExpressionEvaluator { inner })
    }
}

enum Failure {
    Parse,
    Evaluate,
}

impl ExpressionEvaluator {
    pub fn new(model: Arc<dyn DataModelWithParser>) -> Self {
        Self::with_options(EvaluateOptions::new(model))
    }

    pub fn with_options(defaults: EvaluateOptions) -> Self {
        Self {
            inner: Arc::new(EvaluatorInner {
                hooks: ExpressionEvaluatorHooks::default(),
                vars: RwLock::new(HashMap::new()),
                cache: DashMap::new(),
                binary: RwLock::new(default_binary_operators()),
                unary: RwLock::new(default_unary_operators()),
                functions: RwLock::new(default_expression_functions()),
                defaults: RwLock::new(defaults),
            }),
        }
    }

    pub fn hooks(&self) -> &ExpressionEvaluatorHooks {
        &self.inner.hooks
    }

    pub fn downgrade(&self) -> WeakEvaluator {
        WeakEvaluator(Arc::downgrade(&self.inner))
    }

    pub fn default_options(&self) -> EvaluateOptions {
        self.inner.defaults.read().clone()
    }

    pub fn set_default_options(&self, options: EvaluateOptions) {
        *self.inner.defaults.write() = options;
    }

    /// Drop cached ASTs
    pub fn reset(&self) {
        self.inner.cache.clear();
    }

    // ─────────────────────────────────────────────────────────────
    // Registries
    // ─────────────────────────────────────────────────────────────

    pub fn add_binary_operator(&self, operator: impl Into<String>, handler: BinaryOperator) {
        self.inner.binary.write().insert(operator.into(), handler);
    }

    pub fn add_unary_operator(&self, operator: impl Into<String>, handler: UnaryOperator) {
        self.inner.unary.write().insert(operator.into(), handler);
    }

    pub fn add_expression_function(&self, name: impl Into<String>, handler: ExpressionFunction) {
        self.inner.functions.write().insert(name.into(), handler);
    }

    pub fn has_expression_function(&self, name: &str) -> bool {
        self.inner.functions.read().contains_key(name)
    }

    pub fn set_expression_variable(&self, name: impl Into<String>, value: Value) {
        self.inner.vars.write().insert(name.into(), value);
    }

    pub fn get_expression_variable(&self, name: &str) -> Option<Value> {
        self.inner.vars.read().get(name).cloned()
    }

    // ─────────────────────────────────────────────────────────────
    // Evaluation
    // ─────────────────────────────────────────────────────────────

    /// Evaluate with the default options
    pub fn evaluate(&self, expression: impl Into<Expression>) -> Result<Eval> {
        self.evaluate_with(expression, self.default_options())
    }

    pub fn evaluate_with(&self, expression: impl Into<Expression>, options: EvaluateOptions) -> Result<Eval> {
        let options = self.inner.hooks.resolve_options.call(options, &(), &());
        let expression = self.inner.hooks.before_evaluate.call(expression.into(), &options, &());

        match expression {
            Expression::Literal(value) => Ok(Eval::Ready(value)),
            Expression::Node(node) => self.exec_ast(&node, &options),
            Expression::Source(source) => self.exec_string(&source, &options),
            Expression::Sequence(items) => {
                let results = items
                    .into_iter()
                    .map(|item| self.evaluate_with(item, options.clone()))
                    .collect::<Result<Vec<_>>>()?;
                Eval::join(results, |mut values| Ok(Eval::Ready(values.pop().unwrap_or(Value::Null))))
            }
        }
    }

    /// Evaluate with `await` allowed and wait for the result
    pub async fn evaluate_async(&self, expression: impl Into<Expression>, options: EvaluateOptions) -> Result<Value> {
        self.evaluate_with(expression, options.with_async())?.resolve().await
    }

    fn exec_string(&self, source: &str, options: &EvaluateOptions) -> Result<Eval> {
        if source.is_empty() {
            return Ok(Eval::Ready(Value::String(String::new())));
        }

        let matched = WRAPPED_EXPRESSION
            .captures(source)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .filter(|m| !m.is_empty())
            .unwrap_or(source);

        let ast = match self.parse_cached(matched, options.strict) {
            Ok(ast) => ast,
            Err(err) => return self.handle_error(err, source, Failure::Parse, options),
        };

        match self.exec_ast(&ast, options) {
            Ok(Eval::Pending(fut)) => {
                let evaluator = self.clone();
                let options = options.clone();
                let source = source.to_string();
                Ok(Eval::pending(async move {
                    match fut.await {
                        Ok(value) => Ok(value),
                        Err(err) => evaluator
                            .handle_error(err, &source, Failure::Evaluate, &options)
                            .map(|_| Value::Null),
                    }
                }))
            }
            Ok(ready) => Ok(ready),
            Err(err) => self.handle_error(err, source, Failure::Evaluate, options),
        }
    }

    fn parse_cached(&self, source: &str, strict: bool) -> Result<Arc<ExpressionNode>> {
        if let Some(cached) = self.inner.cache.get(source) {
            return Ok(Arc::clone(&cached));
        }

        let node = if strict {
            parse_expression(source)?
        } else {
            let parsed = parse_expression_lenient(source);
            match (parsed.node, parsed.error) {
                (Some(node), error) => {
                    if let Some(error) = error {
                        debug!(expression = source, error = %error, "Evaluating partially parsed expression");
                    }
                    node
                }
                (None, Some(error)) => return Err(error),
                (None, None) => return Err(PlayerError::ExpressionSyntax {
                    message: "Empty expression".to_string(),
                    index: 0,
                }),
            }
        };

        let node = Arc::new(node);
        self.inner.cache.insert(source.to_string(), Arc::clone(&node));
        Ok(node)
    }

    fn handle_error(
        &self,
        err: PlayerError,
        source: &str,
        failure: Failure,
        options: &EvaluateOptions,
    ) -> Result<Eval> {
        let handled = self.inner.hooks.on_error.call(&err, &()) == Some(true);
        if options.throw_errors || !handled {
            let expression = source.to_string();
            let source = Box::new(err);
            return Err(match failure {
                Failure::Parse => PlayerError::ExpressionParse { expression, source },
                Failure::Evaluate => PlayerError::ExpressionEvaluate { expression, source },
            });
        }
        Ok(Eval::Ready(Value::Null))
    }

    pub(crate) fn exec_ast(&self, node: &ExpressionNode, options: &EvaluateOptions) -> Result<Eval> {
        let value = self.resolve_node(node, options)?;
        Ok(self.inner.hooks.resolve.call(value, node, options))
    }

    fn context(&self, options: &EvaluateOptions) -> ExpressionContext {
        ExpressionContext {
            evaluator: self.clone(),
            options: options.clone(),
        }
    }

    fn resolve_node(&self, node: &ExpressionNode, options: &EvaluateOptions) -> Result<Eval> {
        match node {
            ExpressionNode::Literal { value, .. } => Ok(Eval::Ready(value.clone())),
            ExpressionNode::Identifier { name, .. } => {
                Ok(Eval::Ready(self.get_expression_variable(name).unwrap_or(Value::Null)))
            }
            ExpressionNode::Compound { .. } | ExpressionNode::ThisExpression { .. } => {
                Err(PlayerError::UnsupportedExpression {
                    kind: node.kind().to_string(),
                })
            }
            ExpressionNode::BinaryExpression {
                operator, left, right, ..
            }
            | ExpressionNode::LogicalExpression {
                operator, left, right, ..
            } => {
                let handler = self.inner.binary.read().get(operator).cloned();
                match handler {
                    Some(handler) => self.apply_binary(handler, left, right, options),
                    None => Ok(Eval::Ready(Value::Null)),
                }
            }
            ExpressionNode::UnaryExpression { operator, argument, .. } => {
                let handler = self.inner.unary.read().get(operator).cloned();
                match handler {
                    Some(UnaryOperator::Lazy(f)) => f(&self.context(options), argument),
                    Some(UnaryOperator::Eager(f)) => {
                        let ctx = self.context(options);
                        self.exec_ast(argument, options)?.and_then(move |arg| f(&ctx, arg).map(Eval::Ready))
                    }
                    None => Ok(Eval::Ready(Value::Null)),
                }
            }
            ExpressionNode::Object { attributes, .. } => {
                let mut parts = Vec::with_capacity(attributes.len() * 2);
                for attribute in attributes {
                    parts.push(self.exec_ast(&attribute.key, options)?);
                    parts.push(self.exec_ast(&attribute.value, options)?);
                }
                Eval::join(parts, |values| {
                    let mut object = Map::new();
                    let mut values = values.into_iter();
                    while let (Some(key), Some(value)) = (values.next(), values.next()) {
                        object.insert(to_display_string(&key), value);
                    }
                    Ok(Eval::Ready(Value::Object(object)))
                })
            }
            ExpressionNode::CallExpression { callee, args, .. } => self.call_function(callee, args, options),
            ExpressionNode::ModelRef { reference, .. } => {
                let value = options
                    .model
                    .get(BindingLike::from(reference.as_str()), &DataModelOptions::default())?;
                Ok(Eval::Ready(value.unwrap_or(Value::Null)))
            }
            ExpressionNode::MemberExpression {
                object,
                property,
                computed,
                ..
            } => {
                let object = self.exec_ast(object, options)?;
                let property = match (computed, property.as_ref()) {
                    (false, ExpressionNode::Identifier { name, .. }) => Eval::Ready(Value::String(name.clone())),
                    _ => self.exec_ast(property, options)?,
                };
                Eval::join(vec![object, property], |values| {
                    Ok(Eval::Ready(member(&values[0], &values[1])))
                })
            }
            ExpressionNode::Assignment { left, right, .. } => {
                let value = self.exec_ast(right, options)?;
                self.assign(left, value, options)
            }
            ExpressionNode::ConditionalExpression {
                test,
                consequent,
                alternate,
                ..
            } => match self.exec_ast(test, options)? {
                Eval::Ready(value) => {
                    let branch = if is_truthy(&value) { consequent } else { alternate };
                    self.exec_ast(branch, options)
                }
                pending => {
                    let ctx = self.context(options);
                    let consequent = consequent.as_ref().clone();
                    let alternate = alternate.as_ref().clone();
                    pending.and_then(move |value| {
                        ctx.resolve_node(if is_truthy(&value) { &consequent } else { &alternate })
                    })
                }
            },
            ExpressionNode::ArrayExpression { elements, .. } => {
                let items = elements
                    .iter()
                    .map(|element| self.exec_ast(element, options))
                    .collect::<Result<Vec<_>>>()?;
                Eval::join(items, |values| Ok(Eval::Ready(Value::Array(values))))
            }
            ExpressionNode::Modification {
                operator, left, right, ..
            } => {
                let handler = self.inner.binary.read().get(operator).cloned();
                match handler {
                    Some(handler) => {
                        let value = self.apply_binary(handler, left, right, options)?;
                        self.assign(left, value, options)
                    }
                    None => self.exec_ast(left, options),
                }
            }
        }
    }

    fn apply_binary(
        &self,
        handler: BinaryOperator,
        left: &ExpressionNode,
        right: &ExpressionNode,
        options: &EvaluateOptions,
    ) -> Result<Eval> {
        let ctx = self.context(options);
        match handler {
            BinaryOperator::Lazy(f) => f(&ctx, left, right),
            BinaryOperator::Eager(f) => {
                let left = self.exec_ast(left, options)?;
                let right = self.exec_ast(right, options)?;
                Eval::join(vec![left, right], move |mut values| {
                    let right = values.pop().unwrap_or(Value::Null);
                    let left = values.pop().unwrap_or(Value::Null);
                    f(&ctx, left, right).map(Eval::Ready)
                })
            }
        }
    }

    fn call_function(&self, callee: &ExpressionNode, args: &[ExpressionNode], options: &EvaluateOptions) -> Result<Eval> {
        let ExpressionNode::Identifier { name, .. } = callee else {
            return Err(PlayerError::UnsupportedExpression {
                kind: callee.kind().to_string(),
            });
        };

        let handler = self.inner.functions.read().get(name).cloned();
        let Some(handler) = handler else {
            return Err(PlayerError::UnknownFunction { name: name.clone() });
        };

        match handler {
            ExpressionFunction::Await => {
                if !options.is_async {
                    return Err(PlayerError::AwaitOutsideAsync);
                }
                match args.first() {
                    Some(arg) => self.exec_ast(arg, options),
                    None => Ok(Eval::Ready(Value::Null)),
                }
            }
            ExpressionFunction::Lazy(f) => f(&self.context(options), args),
            ExpressionFunction::Eager(f) => {
                let resolved = args
                    .iter()
                    .map(|arg| self.exec_ast(arg, options))
                    .collect::<Result<Vec<_>>>()?;
                let ctx = self.context(options);
                Eval::join(resolved, move |values| f(&ctx, values))
            }
        }
    }

    /// Write a (possibly pending) value to a model ref or variable
    fn assign(&self, target: &ExpressionNode, value: Eval, options: &EvaluateOptions) -> Result<Eval> {
        match target {
            ExpressionNode::ModelRef { reference, .. } => {
                if value.is_pending() && !options.is_async {
                    warn!(
                        binding = %reference,
                        "Unawaited promise written to model, this behavior is undefined and may change in future releases"
                    );
                }
                let model = Arc::clone(&options.model);
                let reference = reference.clone();
                value.and_then(move |value| {
                    model.set(
                        vec![(BindingLike::from(reference), value.clone())],
                        &DataModelOptions::default(),
                    )?;
                    Ok(Eval::Ready(value))
                })
            }
            ExpressionNode::Identifier { name, .. } => {
                let evaluator = self.clone();
                let name = name.clone();
                value.and_then(move |value| {
                    evaluator.set_expression_variable(name, value.clone());
                    Ok(Eval::Ready(value))
                })
            }
            _ => Ok(value),
        }
    }
}

/// `object[property]` for JSON values
fn member(object: &Value, property: &Value) -> Value {
    match object {
        Value::Object(map) => map.get(&to_display_string(property)).cloned().unwrap_or(Value::Null),
        Value::Array(items) => match property {
            Value::String(s) if s == "length" => Value::from(items.len()),
            other => index_of(other).and_then(|i| items.get(i).cloned()).unwrap_or(Value::Null),
        },
        Value::String(s) => match property {
            Value::String(p) if p == "length" => Value::from(s.chars().count()),
            other => index_of(other)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null),
        },
        _ => Value::Null,
    }
}

fn index_of(property: &Value) -> Option<usize> {
    match property {
        Value::Number(n) => n.as_u64().map(|i| i as usize),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingParser;
    use crate::data::DataController;
    use parking_lot::Mutex;
    use serde_json::json;

    fn setup(data: Value) -> (Arc<DataController>, ExpressionEvaluator) {
        let controller = DataController::new(data, Arc::new(BindingParser::new()), Vec::new());
        let evaluator = ExpressionEvaluator::new(controller.clone());
        controller.set_evaluator(&evaluator);
        (controller, evaluator)
    }

    fn eval(evaluator: &ExpressionEvaluator, source: &str) -> Value {
        evaluator.evaluate(source).unwrap().ready().unwrap()
    }

    #[test]
    fn arithmetic_and_logic() {
        let (_, evaluator) = setup(json!({}));

        assert_eq!(eval(&evaluator, "1 + 2"), json!(3));
        assert_eq!(eval(&evaluator, "true && false"), json!(false));
        assert_eq!(eval(&evaluator, "2 * 3 - 1"), json!(5));
        assert_eq!(eval(&evaluator, "'a' + 'b'"), json!("ab"));
        assert_eq!(eval(&evaluator, "1 == '1'"), json!(true));
        assert_eq!(eval(&evaluator, "1 === '1'"), json!(false));
        assert_eq!(eval(&evaluator, "!0"), json!(true));
        assert_eq!(eval(&evaluator, "5 | 2"), json!(7));
    }

    #[test]
    fn model_refs_read_and_write() {
        let (data, evaluator) = setup(json!({"foo": {"bar": 2}}));

        assert_eq!(eval(&evaluator, "{{foo.bar}} * 2"), json!(4));
        assert_eq!(eval(&evaluator, "{{foo}} = 3"), json!(3));
        assert_eq!(data.get("foo", &DataModelOptions::default()).unwrap(), Some(json!(3)));

        eval(&evaluator, "{{foo}} += 2");
        assert_eq!(data.get("foo", &DataModelOptions::default()).unwrap(), Some(json!(5)));
    }

    #[test]
    fn short_circuit_skips_side_effects() {
        let (data, evaluator) = setup(json!({}));

        eval(&evaluator, "false && setDataVal('touched', true)");
        eval(&evaluator, "true || setDataVal('touched', true)");
        assert_eq!(data.get("touched", &DataModelOptions::default()).unwrap(), None);

        assert_eq!(eval(&evaluator, "conditional(true, 'yes', setDataVal('touched', 1))"), json!("yes"));
        assert_eq!(data.get("touched", &DataModelOptions::default()).unwrap(), None);
    }

    #[test]
    fn variables_and_members() {
        let (_, evaluator) = setup(json!({}));
        evaluator.set_expression_variable("user", json!({"name": "ada", "tags": ["x", "y"]}));

        assert_eq!(eval(&evaluator, "user.name"), json!("ada"));
        assert_eq!(eval(&evaluator, "user.tags[1]"), json!("y"));
        assert_eq!(eval(&evaluator, "user.tags.length"), json!(2));

        eval(&evaluator, "count = 4");
        assert_eq!(evaluator.get_expression_variable("count"), Some(json!(4)));
    }

    #[test]
    fn sequences_return_the_last_value() {
        let (data, evaluator) = setup(json!({}));

        let result = evaluator
            .evaluate(vec!["{{a}} = 1", "{{b}} = {{a}} + 1"])
            .unwrap()
            .ready();

        assert_eq!(result, Some(json!(2)));
        assert_eq!(data.get("b", &DataModelOptions::default()).unwrap(), Some(json!(2)));
    }

    #[test]
    fn wrapped_and_literal_expressions() {
        let (_, evaluator) = setup(json!({}));

        assert_eq!(eval(&evaluator, "@[ 1 + 1 ]@"), json!(2));
        assert_eq!(eval(&evaluator, ""), json!(""));
        assert_eq!(
            evaluator.evaluate(&json!({"value": true})).unwrap().ready(),
            Some(json!(true))
        );
    }

    #[test]
    fn unsupported_nodes_and_unknown_functions_fail() {
        let (_, evaluator) = setup(json!({}));

        let err = evaluator.evaluate("a; b").unwrap_err();
        assert_eq!(
            err.root_cause().to_string(),
            "PLY-013: Expression type: Compound is not supported"
        );

        let err = evaluator.evaluate("nope()").unwrap_err();
        assert!(matches!(err, PlayerError::ExpressionEvaluate { .. }));
        assert!(matches!(err.root_cause(), PlayerError::UnknownFunction { name } if name == "nope"));

        let err = evaluator.evaluate("1 +").unwrap_err();
        assert!(matches!(err, PlayerError::ExpressionParse { .. }));
    }

    #[test]
    fn on_error_can_swallow_errors() {
        let (_, evaluator) = setup(json!({}));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        evaluator.hooks().on_error.tap("test", move |err, _| {
            sink.lock().push(err.to_string());
            Some(true)
        });

        assert_eq!(evaluator.evaluate("nope()").unwrap().ready(), Some(Value::Null));
        assert_eq!(seen.lock().len(), 1);

        let throwing = evaluator.default_options().throwing();
        assert!(evaluator.evaluate_with("nope()", throwing).is_err());
    }

    #[test]
    fn await_requires_async_mode() {
        let (_, evaluator) = setup(json!({}));

        let err = evaluator.evaluate("await(1)").unwrap_err();
        assert!(matches!(err.root_cause(), PlayerError::AwaitOutsideAsync));
    }

    #[test]
    fn pending_values_are_contagious() {
        let (_, evaluator) = setup(json!({}));
        evaluator.add_expression_function(
            "later",
            ExpressionFunction::eager(|_, args| {
                let value = args.into_iter().next().unwrap_or(Value::Null);
                Ok(Eval::pending(async move { Ok(value) }))
            }),
        );

        assert!(evaluator.evaluate("later(true) ? 1 : 2").unwrap().is_pending());
        assert!(evaluator.evaluate("[1, later(2)]").unwrap().is_pending());
        assert!(!evaluator.evaluate("true ? 1 : later(2)").unwrap().is_pending());
    }

    #[tokio::test]
    async fn async_evaluation_resolves_pending_values() {
        let (data, evaluator) = setup(json!({}));
        evaluator.add_expression_function(
            "later",
            ExpressionFunction::eager(|_, args| {
                let value = args.into_iter().next().unwrap_or(Value::Null);
                Ok(Eval::pending(async move { Ok(value) }))
            }),
        );

        let options = evaluator.default_options();
        let value = evaluator
            .evaluate_async("await(later(1)) + 1", options.clone())
            .await
            .unwrap();
        assert_eq!(value, json!(2));

        let value = evaluator
            .evaluate_async("later(false) ? 'a' : 'b'", options.clone())
            .await
            .unwrap();
        assert_eq!(value, json!("b"));

        evaluator
            .evaluate_async("{{result}} = later('done')", options)
            .await
            .unwrap();
        assert_eq!(data.get("result", &DataModelOptions::default()).unwrap(), Some(json!("done")));
    }

    #[test]
    fn custom_operators_and_resolve_hook() {
        let (_, evaluator) = setup(json!({}));
        evaluator.add_binary_operator("^", BinaryOperator::simple(|a, b| {
            json!(a.as_i64().unwrap_or(0).pow(b.as_u64().unwrap_or(0) as u32))
        }));
        assert_eq!(eval(&evaluator, "2 ^ 3"), json!(8));

        evaluator.hooks().resolve.tap("shout", |value, node, _| match (value, node) {
            (Eval::Ready(Value::String(s)), ExpressionNode::Literal { .. }) => Eval::Ready(json!(s.to_uppercase())),
            (value, _) => value,
        });
        assert_eq!(eval(&evaluator, "'hi'"), json!("HI"));
    }

    #[test]
    fn cache_is_cleared_by_reset() {
        let (_, evaluator) = setup(json!({}));
        eval(&evaluator, "1 + 1");
        assert_eq!(evaluator.inner.cache.len(), 1);

        evaluator.reset();
        assert!(evaluator.inner.cache.is_empty());
    }
}
