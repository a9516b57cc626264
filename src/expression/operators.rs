//! Operator and function registries
//!
//! Eager handlers receive resolved operands; lazy handlers receive the AST
//! nodes and decide what to evaluate (`&&`, `||`, `conditional`).

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::ast::ExpressionNode;
use super::evaluator::ExpressionContext;
use super::maybe_async::Eval;
use crate::binding::{BindingLike, PathSegment};
use crate::data::DataModelOptions;
use crate::error::{PlayerError, Result};
use crate::util::{is_truthy, loose_eq, number_value, strict_eq, to_display_string, to_number};

type EagerBinaryFn = dyn Fn(&ExpressionContext, Value, Value) -> Result<Value> + Send + Sync;
type LazyBinaryFn = dyn Fn(&ExpressionContext, &ExpressionNode, &ExpressionNode) -> Result<Eval> + Send + Sync;
type EagerUnaryFn = dyn Fn(&ExpressionContext, Value) -> Result<Value> + Send + Sync;
type LazyUnaryFn = dyn Fn(&ExpressionContext, &ExpressionNode) -> Result<Eval> + Send + Sync;
type EagerFunctionFn = dyn Fn(&ExpressionContext, Vec<Value>) -> Result<Eval> + Send + Sync;
type LazyFunctionFn = dyn Fn(&ExpressionContext, &[ExpressionNode]) -> Result<Eval> + Send + Sync;

#[derive(Clone)]
pub enum BinaryOperator {
    Eager(Arc<EagerBinaryFn>),
    /// Operands are handed over unevaluated
    Lazy(Arc<LazyBinaryFn>),
}

impl BinaryOperator {
    pub fn eager(f: impl Fn(&ExpressionContext, Value, Value) -> Result<Value> + Send + Sync + 'static) -> Self {
        BinaryOperator::Eager(Arc::new(f))
    }

    pub fn lazy(
        f: impl Fn(&ExpressionContext, &ExpressionNode, &ExpressionNode) -> Result<Eval> + Send + Sync + 'static,
    ) -> Self {
        BinaryOperator::Lazy(Arc::new(f))
    }

    /// Infallible operator that ignores the context
    pub fn simple(f: impl Fn(&Value, &Value) -> Value + Send + Sync + 'static) -> Self {
        Self::eager(move |_, a, b| Ok(f(&a, &b)))
    }
}

#[derive(Clone)]
pub enum UnaryOperator {
    Eager(Arc<EagerUnaryFn>),
    Lazy(Arc<LazyUnaryFn>),
}

impl UnaryOperator {
    pub fn eager(f: impl Fn(&ExpressionContext, Value) -> Result<Value> + Send + Sync + 'static) -> Self {
        UnaryOperator::Eager(Arc::new(f))
    }

    pub fn lazy(f: impl Fn(&ExpressionContext, &ExpressionNode) -> Result<Eval> + Send + Sync + 'static) -> Self {
        UnaryOperator::Lazy(Arc::new(f))
    }

    pub fn simple(f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        Self::eager(move |_, a| Ok(f(&a)))
    }
}

/// A function callable from expressions
#[derive(Clone)]
pub enum ExpressionFunction {
    Eager(Arc<EagerFunctionFn>),
    Lazy(Arc<LazyFunctionFn>),
    /// Waits for its argument; only callable in async evaluation
    Await,
}

impl ExpressionFunction {
    pub fn eager(f: impl Fn(&ExpressionContext, Vec<Value>) -> Result<Eval> + Send + Sync + 'static) -> Self {
        ExpressionFunction::Eager(Arc::new(f))
    }

    pub fn lazy(f: impl Fn(&ExpressionContext, &[ExpressionNode]) -> Result<Eval> + Send + Sync + 'static) -> Self {
        ExpressionFunction::Lazy(Arc::new(f))
    }

    /// Synchronous function over resolved arguments
    pub fn sync(f: impl Fn(&ExpressionContext, Vec<Value>) -> Result<Value> + Send + Sync + 'static) -> Self {
        Self::eager(move |ctx, args| f(ctx, args).map(Eval::Ready))
    }
}

// ═══════════════════════════════════════════════════════════════════
// Defaults
// ═══════════════════════════════════════════════════════════════════

pub(crate) fn default_binary_operators() -> HashMap<String, BinaryOperator> {
    let mut ops: HashMap<String, BinaryOperator> = HashMap::new();
    let mut add = |name: &str, op: BinaryOperator| {
        ops.insert(name.to_string(), op);
    };

    add("+", BinaryOperator::simple(plus));
    add("-", BinaryOperator::simple(|a, b| number_value(to_number(a) - to_number(b))));
    add("*", BinaryOperator::simple(|a, b| number_value(to_number(a) * to_number(b))));
    add("/", BinaryOperator::simple(|a, b| number_value(to_number(a) / to_number(b))));
    add("%", BinaryOperator::simple(|a, b| number_value(to_number(a) % to_number(b))));

    add("==", BinaryOperator::simple(|a, b| Value::Bool(loose_eq(a, b))));
    add("!=", BinaryOperator::simple(|a, b| Value::Bool(!loose_eq(a, b))));
    add("===", BinaryOperator::simple(|a, b| Value::Bool(strict_eq(a, b))));
    add("!==", BinaryOperator::simple(|a, b| Value::Bool(!strict_eq(a, b))));
    add(">", BinaryOperator::simple(|a, b| Value::Bool(compare(a, b) == Some(Ordering::Greater))));
    add("<", BinaryOperator::simple(|a, b| Value::Bool(compare(a, b) == Some(Ordering::Less))));
    add(
        ">=",
        BinaryOperator::simple(|a, b| Value::Bool(matches!(compare(a, b), Some(Ordering::Greater | Ordering::Equal)))),
    );
    add(
        "<=",
        BinaryOperator::simple(|a, b| Value::Bool(matches!(compare(a, b), Some(Ordering::Less | Ordering::Equal)))),
    );

    add("&&", BinaryOperator::lazy(and));
    add("||", BinaryOperator::lazy(or));

    add("|", BinaryOperator::simple(|a, b| Value::from(to_int32(a) | to_int32(b))));
    add("&", BinaryOperator::simple(|a, b| Value::from(to_int32(a) & to_int32(b))));
    add("+=", BinaryOperator::simple(plus));
    add("-=", BinaryOperator::simple(|a, b| number_value(to_number(a) - to_number(b))));
    add("&=", BinaryOperator::simple(|a, b| Value::from(to_int32(a) & to_int32(b))));
    add("|=", BinaryOperator::simple(|a, b| Value::from(to_int32(a) | to_int32(b))));

    ops
}

pub(crate) fn default_unary_operators() -> HashMap<String, UnaryOperator> {
    HashMap::from([
        ("-".to_string(), UnaryOperator::simple(|a| number_value(-to_number(a)))),
        ("+".to_string(), UnaryOperator::simple(|a| number_value(to_number(a)))),
        ("!".to_string(), UnaryOperator::simple(|a| Value::Bool(!is_truthy(a)))),
    ])
}

pub(crate) fn default_expression_functions() -> HashMap<String, ExpressionFunction> {
    HashMap::from([
        ("conditional".to_string(), ExpressionFunction::lazy(conditional)),
        ("getDataVal".to_string(), ExpressionFunction::sync(get_data_val)),
        ("setDataVal".to_string(), ExpressionFunction::sync(set_data_val)),
        ("deleteDataVal".to_string(), ExpressionFunction::sync(delete_data_val)),
        ("waitFor".to_string(), ExpressionFunction::Await),
        ("await".to_string(), ExpressionFunction::Await),
    ])
}

/// `+`: concatenates when either side is textual, adds otherwise
fn plus(a: &Value, b: &Value) -> Value {
    let textual = |v: &Value| matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_));
    if textual(a) || textual(b) {
        Value::String(format!("{}{}", to_display_string(a), to_display_string(b)))
    } else {
        number_value(to_number(a) + to_number(b))
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => to_number(a).partial_cmp(&to_number(b)),
    }
}

fn to_int32(value: &Value) -> i32 {
    let n = to_number(value);
    if n.is_finite() {
        n.trunc() as i64 as i32
    } else {
        0
    }
}

fn and(ctx: &ExpressionContext, left: &ExpressionNode, right: &ExpressionNode) -> Result<Eval> {
    match ctx.resolve_node(left)? {
        Eval::Ready(value) if !is_truthy(&value) => Ok(Eval::Ready(value)),
        Eval::Ready(_) => ctx.resolve_node(right),
        pending => {
            let ctx = ctx.clone();
            let right = right.clone();
            pending.and_then(move |value| {
                if is_truthy(&value) {
                    ctx.resolve_node(&right)
                } else {
                    Ok(Eval::Ready(value))
                }
            })
        }
    }
}

fn or(ctx: &ExpressionContext, left: &ExpressionNode, right: &ExpressionNode) -> Result<Eval> {
    match ctx.resolve_node(left)? {
        Eval::Ready(value) if is_truthy(&value) => Ok(Eval::Ready(value)),
        Eval::Ready(_) => ctx.resolve_node(right),
        pending => {
            let ctx = ctx.clone();
            let right = right.clone();
            pending.and_then(move |value| {
                if is_truthy(&value) {
                    Ok(Eval::Ready(value))
                } else {
                    ctx.resolve_node(&right)
                }
            })
        }
    }
}

/// `conditional(test, ifTrue, ifFalse?)`
fn conditional(ctx: &ExpressionContext, args: &[ExpressionNode]) -> Result<Eval> {
    let Some(test) = args.first() else {
        return Ok(Eval::Ready(Value::Null));
    };
    let if_true = args.get(1).cloned();
    let if_false = args.get(2).cloned();

    let ctx_for_branch = ctx.clone();
    let branch = move |test: Value| -> Result<Eval> {
        let chosen = if is_truthy(&test) { if_true } else { if_false };
        match chosen {
            Some(node) => ctx_for_branch.resolve_node(&node),
            None => Ok(Eval::Ready(Value::Null)),
        }
    };

    ctx.resolve_node(test)?.and_then(branch)
}

/// Interpret an argument as a data path
pub(crate) fn to_binding_like(value: &Value) -> Option<BindingLike> {
    match value {
        Value::String(s) => Some(BindingLike::from(s.as_str())),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Some(PathSegment::parse(s)),
                Value::Number(n) => n.as_u64().map(|i| PathSegment::Index(i as usize)),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(BindingLike::from),
        _ => None,
    }
}

fn binding_arg(name: &str, args: &[Value]) -> Result<BindingLike> {
    let arg = args.first().unwrap_or(&Value::Null);
    to_binding_like(arg).ok_or_else(|| PlayerError::FunctionFailed {
        name: name.to_string(),
        details: format!("expected a data path, got {arg}"),
    })
}

fn get_data_val(ctx: &ExpressionContext, args: Vec<Value>) -> Result<Value> {
    let binding = binding_arg("getDataVal", &args)?;
    Ok(ctx.model().get(binding, &DataModelOptions::default())?.unwrap_or(Value::Null))
}

fn set_data_val(ctx: &ExpressionContext, mut args: Vec<Value>) -> Result<Value> {
    let binding = binding_arg("setDataVal", &args)?;
    let value = if args.len() > 1 { args.swap_remove(1) } else { Value::Null };
    ctx.model().set(vec![(binding, value)], &DataModelOptions::default())?;
    Ok(Value::Null)
}

fn delete_data_val(ctx: &ExpressionContext, args: Vec<Value>) -> Result<Value> {
    let binding = args
        .first()
        .and_then(to_binding_like)
        .ok_or(PlayerError::InvalidDelete)?;
    ctx.model().delete(binding, &DataModelOptions::default())?;
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plus_concatenates_strings() {
        assert_eq!(plus(&json!("a"), &json!(1)), json!("a1"));
        assert_eq!(plus(&json!(1), &json!(2)), json!(3));
        assert_eq!(plus(&json!(0.1), &json!(0.2)), json!(0.30000000000000004));
    }

    #[test]
    fn comparison_of_mixed_types_uses_numbers() {
        assert_eq!(compare(&json!("10"), &json!(9)), Some(Ordering::Greater));
        assert_eq!(compare(&json!("b"), &json!("a")), Some(Ordering::Greater));
        assert_eq!(compare(&json!("x"), &json!(1)), None);
    }

    #[test]
    fn bitwise_truncates() {
        assert_eq!(to_int32(&json!(5.9)), 5);
        assert_eq!(to_int32(&json!("abc")), 0);
    }

    #[test]
    fn path_arguments() {
        assert!(matches!(to_binding_like(&json!("a.b")), Some(BindingLike::Raw(_))));
        assert!(matches!(to_binding_like(&json!(["a", 0])), Some(BindingLike::Segments(_))));
        assert!(to_binding_like(&json!(5)).is_none());
    }
}
