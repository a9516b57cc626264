//! Expression Module - parsing and evaluating the flow expression language
//!
//! Submodules:
//! - `ast`: node types and the [`Expression`] input enum
//! - `parser`: source text → [`ExpressionNode`]
//! - `maybe_async`: [`Eval`], the ready-or-pending result type
//! - `operators`: operator/function registries and defaults
//! - `evaluator`: [`ExpressionEvaluator`]
//! - `utils`: AST tooling for editors
//!
//! ```text
//! "{{count}} + 1" → parse → BinaryExpression(ModelRef, Literal) → Eval::Ready(4)
//! ```

mod ast;
mod evaluator;
mod maybe_async;
mod operators;
mod parser;
mod utils;

pub use ast::{Expression, ExpressionNode, NodeLocation, ObjectAttribute};
pub use evaluator::{
    EvaluateOptions, ExpressionContext, ExpressionEvaluator, ExpressionEvaluatorHooks, WeakEvaluator,
};
pub use maybe_async::{Eval, EvalFuture};
pub use operators::{BinaryOperator, ExpressionFunction, UnaryOperator};
pub use parser::{binary_precedence, parse_expression, parse_expression_lenient, LenientParse};
pub use utils::find_closest_node_at_position;
