//! Async nodes: `{"id": "...", "async": true}` placeholders filled in later
//!
//! ```text
//! resolve ─► before_resolve(async node) ─► queued, renders nothing
//! resolve_pending().await ─► handlers ─► parse content ─► mapping[id]
//! ViewInstance::update_async(ids) ─► ancestors recomputed ─► mapped node
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, warn};

use super::ViewPlugin;
use crate::error::{PlayerError, Result};
use crate::view::parser::has_async;
use crate::view::{NodeKind, NodeRef, NodeType, ParseNodeFn, ParseObjectOptions, ViewInstance};

/// Supplies the content of async nodes
#[async_trait]
pub trait AsyncNodeHandler: Send + Sync {
    /// Raw view JSON for the node, or `None` to leave it to other handlers
    async fn on_async_node(&self, node: &NodeRef) -> Result<Option<Value>>;
}

struct PendingNode {
    id: String,
    node: NodeRef,
    parse: Option<ParseNodeFn>,
}

#[derive(Default)]
pub struct AsyncNodePlugin {
    handlers: RwLock<Vec<Arc<dyn AsyncNodeHandler>>>,
    resolved: DashMap<String, NodeRef>,
    pending: Mutex<Vec<PendingNode>>,
}

impl AsyncNodePlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn AsyncNodeHandler>) {
        self.handlers.write().push(handler);
    }

    /// Ids of async nodes waiting for content
    pub fn pending_ids(&self) -> Vec<String> {
        self.pending.lock().iter().map(|p| p.id.clone()).collect()
    }

    fn queue(&self, id: &str, node: &NodeRef, parse: Option<ParseNodeFn>) {
        let mut pending = self.pending.lock();
        if pending.iter().any(|p| p.id == id) {
            return;
        }
        pending.push(PendingNode {
            id: id.to_string(),
            node: Arc::clone(node),
            parse,
        });
    }

    /// Ask the handlers for every queued node; returns the ids that got content
    pub async fn resolve_pending(&self) -> Result<HashSet<String>> {
        let pending = std::mem::take(&mut *self.pending.lock());
        let handlers = self.handlers.read().clone();

        let results = join_all(pending.into_iter().map(|p| {
            let handlers = handlers.clone();
            async move {
                for handler in &handlers {
                    match handler.on_async_node(&p.node).await {
                        Ok(Some(content)) => return (p, Ok(Some(content))),
                        Ok(None) => continue,
                        Err(err) => return (p, Err(err)),
                    }
                }
                (p, Ok(None))
            }
        }))
        .await;

        let mut changed = HashSet::new();
        for (pending, content) in results {
            let content = content.map_err(|err| PlayerError::AsyncNode {
                id: pending.id.clone(),
                details: err.to_string(),
            })?;

            let Some(content) = content else {
                debug!(id = %pending.id, "No handler produced content for async node");
                continue;
            };
            let Some(parse) = &pending.parse else {
                warn!(id = %pending.id, "Async node content arrived without a parser");
                continue;
            };

            if let Some(node) = parse(&content, NodeType::Value, ParseObjectOptions::default())? {
                self.resolved.insert(pending.id.clone(), node);
                changed.insert(pending.id);
            }
        }

        Ok(changed)
    }
}

impl ViewPlugin for AsyncNodePlugin {
    fn apply(self: Arc<Self>, view: &ViewInstance) {
        view.hooks.parser.tap("async-node", |parser, _| {
            parser
                .hooks
                .determine_node_type
                .tap("async-node", |raw, _| has_async(raw).then_some(NodeType::Async));

            parser.hooks.parse_node.tap("async-node", |request, parser| {
                (request.determined == NodeType::Async)
                    .then(|| parser.parse_async(&request.raw, request.node_type, request.options))
            });
        });

        view.hooks.resolver.tap("async-node", move |resolver, _| {
            let plugin = Arc::clone(&self);
            resolver.hooks.before_resolve.tap("async-node", move |node, options, _| {
                let Some(n) = node? else {
                    return Ok(None);
                };
                let NodeKind::Async { id, .. } = &n.kind else {
                    return Ok(Some(n));
                };

                if let Some(mapped) = plugin.resolved.get(id) {
                    return Ok(Some(Arc::clone(mapped.value())));
                }

                plugin.queue(id, &n, options.parse_node.clone());
                Ok(Some(n))
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{Node, Parser, ValueNode};
    use serde_json::json;

    struct Fixed(Value);

    #[async_trait]
    impl AsyncNodeHandler for Fixed {
        async fn on_async_node(&self, _node: &NodeRef) -> Result<Option<Value>> {
            Ok(Some(self.0.clone()))
        }
    }

    struct Failing;

    #[async_trait]
    impl AsyncNodeHandler for Failing {
        async fn on_async_node(&self, _node: &NodeRef) -> Result<Option<Value>> {
            Err(PlayerError::Config {
                path: "handler".into(),
                details: "offline".into(),
            })
        }
    }

    fn async_node(id: &str) -> NodeRef {
        Node::new(NodeKind::Async {
            id: id.to_string(),
            value: Node::with_value(NodeType::Value, ValueNode::new(json!({"id": id}))),
        })
    }

    fn parse_fn() -> ParseNodeFn {
        let parser = Arc::new(Parser::new());
        Arc::new(move |raw, node_type, options| parser.parse_object(raw, node_type, options))
    }

    #[tokio::test]
    async fn handler_content_is_parsed_and_mapped() {
        let plugin = AsyncNodePlugin::new();
        plugin.add_handler(Arc::new(Fixed(json!({"id": "loaded", "text": "hi"}))));
        plugin.queue("slot", &async_node("slot"), Some(parse_fn()));
        plugin.queue("slot", &async_node("slot"), Some(parse_fn()));
        assert_eq!(plugin.pending_ids(), vec!["slot".to_string()]);

        let changed = plugin.resolve_pending().await.unwrap();

        assert!(changed.contains("slot"));
        assert!(plugin.pending_ids().is_empty());
        assert_eq!(plugin.resolved.get("slot").unwrap().node_id(), Some("loaded"));
    }

    #[tokio::test]
    async fn handler_errors_name_the_node() {
        let plugin = AsyncNodePlugin::new();
        plugin.add_handler(Arc::new(Failing));
        plugin.queue("slot", &async_node("slot"), Some(parse_fn()));

        let err = plugin.resolve_pending().await.unwrap_err();
        assert!(matches!(err, PlayerError::AsyncNode { ref id, .. } if id == "slot"));
    }
}
