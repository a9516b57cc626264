//! Maybe-async evaluation results
//!
//! Every composite evaluation site goes through [`Eval`]: when all inputs are
//! ready the result is ready, as soon as one input is pending the enclosing
//! result becomes pending too.

use std::fmt;
use std::future::Future;

use futures::future::{self, BoxFuture, FutureExt};
use serde_json::Value;

use crate::error::Result;

pub type EvalFuture = BoxFuture<'static, Result<Value>>;

/// Result of evaluating an expression node
pub enum Eval {
    Ready(Value),
    Pending(EvalFuture),
}

impl Eval {
    pub fn pending<F>(fut: F) -> Self
    where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        Eval::Pending(fut.boxed())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Eval::Pending(_))
    }

    /// The ready value, if any
    pub fn ready(self) -> Option<Value> {
        match self {
            Eval::Ready(value) => Some(value),
            Eval::Pending(_) => None,
        }
    }

    /// Wait for the value
    pub async fn resolve(self) -> Result<Value> {
        match self {
            Eval::Ready(value) => Ok(value),
            Eval::Pending(fut) => fut.await,
        }
    }

    /// Chain a continuation that may itself be pending
    pub fn and_then<F>(self, f: F) -> Result<Eval>
    where
        F: FnOnce(Value) -> Result<Eval> + Send + 'static,
    {
        match self {
            Eval::Ready(value) => f(value),
            Eval::Pending(fut) => Ok(Eval::pending(async move {
                let value = fut.await?;
                f(value)?.resolve().await
            })),
        }
    }

    pub fn map<F>(self, f: F) -> Eval
    where
        F: FnOnce(Value) -> Value + Send + 'static,
    {
        match self {
            Eval::Ready(value) => Eval::Ready(f(value)),
            Eval::Pending(fut) => Eval::pending(fut.map(|r| r.map(f))),
        }
    }

    /// Wait for every item, then hand the values to `f`
    ///
    /// Runs `f` immediately when nothing is pending.
    pub fn join<F>(items: Vec<Eval>, f: F) -> Result<Eval>
    where
        F: FnOnce(Vec<Value>) -> Result<Eval> + Send + 'static,
    {
        if !items.iter().any(Eval::is_pending) {
            let values = items.into_iter().filter_map(Eval::ready).collect();
            return f(values);
        }

        Ok(Eval::pending(async move {
            let values = future::try_join_all(items.into_iter().map(Eval::resolve)).await?;
            f(values)?.resolve().await
        }))
    }
}

impl From<Value> for Eval {
    fn from(value: Value) -> Self {
        Eval::Ready(value)
    }
}

impl fmt::Debug for Eval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eval::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Eval::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}
