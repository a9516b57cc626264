//! Player core - data-driven view resolution engine
//!
//! ```text
//! flow { views, schema, data }
//!   binding / expression languages ─► DataController (middleware, formats, defaults)
//!   view JSON ─► Parser ─► node tree ─► Resolver (+ plugins) ─► resolved view
//!   ValidationController ─ load → change → navigation, per tracked binding
//! ```

pub mod binding;
pub mod config;
pub mod data;
pub mod error;
pub mod expression;
pub mod hooks;
pub mod schema;
pub mod session;
pub mod string_resolver;
pub mod util;
pub mod validation;
pub mod view;

pub use binding::{Binding, BindingLike, BindingParser, PathSegment};
pub use config::PlayerConfig;
pub use data::{DataController, DataModelOptions};
pub use error::{FixSuggestion, PlayerError, Result};
pub use expression::{Eval, Expression, ExpressionEvaluator};
pub use schema::SchemaController;
pub use session::{FlowDocument, FlowSession};
pub use validation::{Trigger, ValidationController};
pub use view::ViewInstance;
