//! The node entity: the hardware model's tree vertex.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use dt_syntax::{Label, NodeName, Span};
use indexmap::IndexMap;

use crate::{
    addr::{MappedReg, RangeEntry, RegEntry},
    arena::new_key_type,
    bindings::NodeType,
    nexus::NexusMap,
    property::PropertyId,
};

new_key_type!(
    /// Uniquely identifies a [`Node`] within one runtime.
    pub struct NodeId;
);

/// A span plus the total-order stamp of the fragment it came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FragRef {
    /// Source location of the fragment.
    pub span: Span,
    /// Total-order stamp; later stamps win override races.
    pub(crate) order: u64,
}

/// A child removed by a delete directive.
///
/// Never mutated after creation; the node itself stays in the arena with
/// its subtree intact so history tooling can still walk it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeletedNode {
    /// The removed child.
    pub node: NodeId,
    /// The span of the delete directive.
    pub by: Span,
    pub(crate) order: u64,
}

/// A property removed by a delete directive.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeletedProperty {
    /// The removed property.
    pub property: PropertyId,
    /// The span of the delete directive.
    pub by: Span,
}

/// One entity in the hardware tree.
///
/// Identified by `(name, unit address)` among its live siblings. Owned by
/// its parent through the runtime arena; every cross-link (labels,
/// phandles, delete records, override chains) is a non-owning id.
#[derive(Debug)]
pub struct Node {
    /// The node name, without unit address.
    pub name: String,
    /// The unit-address words, most significant first.
    pub address: Option<Vec<u64>>,
    /// The parent node; `None` only for the root.
    pub parent: Option<NodeId>,
    /// Fragments that defined this node by name, in link order.
    pub definitions: Vec<FragRef>,
    /// Fragments that attached to this node via a label, in link order.
    pub references: Vec<FragRef>,
    /// Labels accumulated from definitions, deduplicated per node.
    pub labels: Vec<Label>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) properties: IndexMap<String, PropertyId>,
    pub(crate) deleted_children: Vec<DeletedNode>,
    pub(crate) deleted_properties: Vec<DeletedProperty>,
    pub(crate) caches: NodeCaches,
}

impl Node {
    pub(crate) fn new(name: impl Into<String>, address: Option<Vec<u64>>, parent: Option<NodeId>) -> Self {
        Self {
            name: name.into(),
            address,
            parent,
            definitions: Vec::new(),
            references: Vec::new(),
            labels: Vec::new(),
            children: Vec::new(),
            properties: IndexMap::new(),
            deleted_children: Vec::new(),
            deleted_properties: Vec::new(),
            caches: NodeCaches::default(),
        }
    }

    /// The node's name plus unit address.
    pub fn node_name(&self) -> NodeName {
        NodeName {
            name: self.name.clone(),
            address: self.address.clone(),
        }
    }

    /// Live children, in first-definition order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Live properties, name-unique, in insertion order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, PropertyId)> {
        self.properties.iter().map(|(name, id)| (name.as_str(), *id))
    }

    /// Looks up a live property by name.
    pub fn property(&self, name: &str) -> Option<PropertyId> {
        self.properties.get(name).copied()
    }

    /// Children removed by delete directives, oldest first.
    pub fn deleted_children(&self) -> &[DeletedNode] {
        &self.deleted_children
    }

    /// Properties removed by delete directives, oldest first.
    pub fn deleted_properties(&self) -> &[DeletedProperty] {
        &self.deleted_properties
    }

    /// Records a label claim; returns false if this node already carries
    /// the same text (re-declaration through another fragment is silent).
    pub(crate) fn add_label(&mut self, label: Label) -> bool {
        if self.labels.iter().any(|l| l.matches(&label)) {
            return false;
        }
        self.labels.push(label);
        true
    }

    /// The earliest order stamp attached to this node.
    pub(crate) fn first_order(&self) -> Option<u64> {
        let def = self.definitions.first().map(|f| f.order);
        let refr = self.references.first().map(|f| f.order);
        match (def, refr) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Memoized derived views, recomputed lazily and cleared wholesale when a
/// feeding property changes.
#[derive(Debug, Default)]
pub(crate) struct NodeCaches {
    /// Decoded `reg` entries.
    pub reg: RefCell<Option<Arc<Vec<RegEntry>>>>,
    /// Decoded `ranges`; inner `None` records "property absent".
    pub ranges: RefCell<Option<Option<Arc<Vec<RangeEntry>>>>>,
    /// Decoded `dma-ranges`; inner `None` records "property absent".
    pub dma_ranges: RefCell<Option<Option<Arc<Vec<RangeEntry>>>>>,
    /// Root-relative translation of `reg`.
    pub mapped: RefCell<Option<Arc<Vec<MappedReg>>>>,
    /// Parsed `<specifier>-map` tables, keyed by specifier.
    pub nexus: RefCell<HashMap<String, Option<Arc<NexusMap>>>>,
    /// Binding classification.
    pub node_type: RefCell<Option<Option<Arc<NodeType>>>>,
}

impl NodeCaches {
    /// Clears views derived from this node's own addressing properties.
    pub fn clear_addressing(&self) {
        self.reg.borrow_mut().take();
        self.ranges.borrow_mut().take();
        self.dma_ranges.borrow_mut().take();
        self.mapped.borrow_mut().take();
    }

    /// Clears every cached view.
    pub fn clear_all(&self) {
        self.clear_addressing();
        self.nexus.borrow_mut().clear();
        self.node_type.borrow_mut().take();
    }
}
