//! The pluggable node-type (binding) lookup seam.
//!
//! Vendor binding catalogs live outside this crate; the model only asks
//! them to classify a node and to name its required properties, and
//! forwards the answers into diagnostics. Lookups are memoized per node.

use std::sync::Arc;

use dt_syntax::NodeName;

use crate::{node::NodeId, runtime::Runtime};

/// The classification a binding catalog assigns to one node.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NodeType {
    /// The binding's name, when it has one.
    pub name: Option<String>,
    /// Properties the binding mandates on matching nodes.
    pub required: Vec<String>,
}

/// The external binding/type lookup.
///
/// Queried read-only by every node of every runtime, possibly from
/// parallel resolution passes, hence the `Send + Sync` bound.
pub trait BindingResolver: Send + Sync {
    /// Classifies a node from its name and `compatible` strings.
    fn node_type(&self, name: &NodeName, compatible: &[String]) -> Option<NodeType>;
}

impl Runtime {
    /// The node's `compatible` strings, in source order.
    pub fn compatible(&self, node: NodeId) -> Vec<String> {
        self.nodes[node]
            .property("compatible")
            .map(|id| self.props[id].strings().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    /// The node's binding classification, memoized.
    pub fn node_type(&self, node: NodeId) -> Option<Arc<NodeType>> {
        if let Some(cached) = self.nodes[node].caches.node_type.borrow().clone() {
            return cached;
        }

        let computed = self.bindings().and_then(|resolver| {
            resolver
                .node_type(&self.nodes[node].node_name(), &self.compatible(node))
                .map(Arc::new)
        });
        *self.nodes[node].caches.node_type.borrow_mut() = Some(computed.clone());
        computed
    }
}
