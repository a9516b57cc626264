//! View plugins
//!
//! A plugin taps the view's `parser` and `resolver` hooks when the view
//! first renders. The default set (in application order):
//! - `template`: expands `template` entries over data arrays
//! - `string-resolver`: resolves `{{refs}}` and `@[ expr ]@` in node values
//! - `applicability`: drops nodes whose `applicability` is `false`
//! - `switch`: picks the first matching case of static/dynamic switches
//!
//! `async-node` is opt-in since it needs a content handler.

mod applicability;
mod async_node;
mod string_resolver;
mod switch;
mod template;

use std::sync::Arc;

use super::ViewInstance;
use crate::data::DataModelWithParser;
use crate::expression::ExpressionEvaluator;

pub use applicability::ApplicabilityPlugin;
pub use async_node::{AsyncNodeHandler, AsyncNodePlugin};
pub use string_resolver::StringResolverPlugin;
pub use switch::SwitchPlugin;
pub use template::{TemplateItemInfo, TemplatePlugin, TemplatePluginHooks, TemplateSubstitution};

/// Something that extends a view
pub trait ViewPlugin: Send + Sync {
    fn apply(self: Arc<Self>, view: &ViewInstance);
}

/// What plugins need to resolve things at parse time
#[derive(Clone)]
pub struct PluginOptions {
    pub model: Arc<dyn DataModelWithParser>,
    pub evaluator: ExpressionEvaluator,
}

/// The plugins every view gets
pub fn default_plugins(options: &PluginOptions) -> Vec<Arc<dyn ViewPlugin>> {
    vec![
        Arc::new(TemplatePlugin::new(options.clone())),
        Arc::new(StringResolverPlugin::new()),
        Arc::new(ApplicabilityPlugin),
        Arc::new(SwitchPlugin::new(options.clone())),
    ]
}
