//! View Module - authored view JSON → node tree → resolved JSON
//!
//! Submodules:
//! - `node`: the immutable node tree
//! - `parser`: JSON → nodes, with plugin hooks
//! - `resolver`: nodes + data → JSON, cached per node by dependencies
//! - `plugins`: templates, switches, applicability, async content, strings
//! - `instance`: one live view (parser, resolver and view-level validations)
//!
//! ```text
//! ViewInstance::update(changes)
//!   first call: hooks.parser → Parser::parse_view → hooks.resolver
//!   every call: Resolver::update(changes) → hooks.on_update(value)
//! ```

mod instance;
mod node;
mod parser;
pub mod plugins;
mod resolver;

pub use instance::{CrossfieldProvider, ViewHooks, ViewInstance};
pub use node::{Child, Node, NodeId, NodeKind, NodePluginOptions, NodeRef, NodeType, SwitchCase, ValueNode};
pub use parser::{ParseNodeRequest, ParseObjectOptions, ParsedNode, Parser, ParserHooks};
pub use plugins::ViewPlugin;
pub use resolver::{NodeResolveOptions, NodeUpdate, ParseNodeFn, Resolver, ResolverHooks, ResolverOptions};
