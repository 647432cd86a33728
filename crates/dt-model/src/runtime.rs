//! The runtime: fragment linking and whole-tree resolution.
//!
//! A runtime is rebuilt from the ordered fragment list on every
//! resolution pass and never mutated afterwards; tooling cancels by
//! dropping an in-flight runtime, not by poking at one.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use buggy::{Bug, BugExt};
use dt_syntax::{DeleteTarget, Fragment, FragmentKind, Label, NodeName, Span, Value};
use tracing::{debug, trace};

use crate::{
    arena::Arena,
    bindings::BindingResolver,
    diag::{Diagnostic, IssueKind},
    node::{DeletedNode, DeletedProperty, FragRef, Node, NodeId},
    property::{Property, PropertyId},
};

type Result<T, E = Bug> = std::result::Result<T, E>;

/// One claim of a label text by a node.
#[derive(Clone, Debug)]
struct LabelClaim {
    node: NodeId,
    label: Label,
}

/// Whether a top-level fragment could be linked yet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Linked {
    Done,
    /// The fragment targets a label no node has claimed so far.
    Deferred,
}

/// The unified hardware model built from one ordered fragment sequence.
pub struct Runtime {
    pub(crate) nodes: Arena<NodeId, Node>,
    pub(crate) props: Arena<PropertyId, Property>,
    root: NodeId,
    fragments: Vec<Fragment>,
    bindings: Option<Arc<dyn BindingResolver>>,
    /// Every label claim, in link order, keyed by label text.
    labels: HashMap<String, Vec<LabelClaim>>,
    /// Resolved label-to-path mappings; cleared whenever labels change.
    label_paths: RefCell<HashMap<String, String>>,
    /// Label references that never found an owner.
    unresolved: Vec<Label>,
    /// Monotonic walk counter feeding order stamps.
    seq: u64,
}

impl Runtime {
    /// Builds a model from fragments in their caller-supplied total order.
    ///
    /// Linking is total over user input; the only error is an internal
    /// invariant violation.
    pub fn build(fragments: Vec<Fragment>) -> Result<Self> {
        Self::build_with_bindings(fragments, None)
    }

    /// Builds a model with an external binding/type lookup attached.
    pub fn build_with_bindings(
        fragments: Vec<Fragment>,
        bindings: Option<Arc<dyn BindingResolver>>,
    ) -> Result<Self> {
        let mut nodes = Arena::new();
        let root = nodes.insert(Node::new("/", None, None));
        let mut rt = Self {
            nodes,
            props: Arena::new(),
            root,
            fragments: Vec::new(),
            bindings,
            labels: HashMap::new(),
            label_paths: RefCell::new(HashMap::new()),
            unresolved: Vec::new(),
            seq: 0,
        };

        // First pass in total order; label references whose owner is not
        // known yet go onto the worklist.
        let mut deferred = Vec::new();
        for (top, fragment) in fragments.iter().enumerate() {
            if rt.link_top(top, fragment)? == Linked::Deferred {
                deferred.push(top);
            }
        }

        // Drain forward references to fixpoint: each round can define
        // labels that unblock earlier entries.
        while !deferred.is_empty() {
            debug!(pending = deferred.len(), "draining deferred fragments");
            let mut next = Vec::new();
            for top in &deferred {
                if rt.link_top(*top, &fragments[*top])? == Linked::Deferred {
                    next.push(*top);
                }
            }
            if next.len() == deferred.len() {
                break;
            }
            deferred = next;
        }

        for top in deferred {
            match &fragments[top].kind {
                FragmentKind::Ref { label, .. } => rt.unresolved.push(label.clone()),
                // Deleting a node that never existed is a silent no-op.
                FragmentKind::DeleteNode { .. } => {}
                _ => {}
            }
        }

        rt.fragments = fragments;
        rt.invalidate_subtree(rt.root);
        Ok(rt)
    }

    /// The tree root.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Borrows a node; the id must come from this runtime.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Borrows a property; the id must come from this runtime.
    pub fn property(&self, id: PropertyId) -> &Property {
        &self.props[id]
    }

    /// The top-level fragments this model was built from.
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub(crate) fn bindings(&self) -> Option<&dyn BindingResolver> {
        self.bindings.as_deref()
    }

    fn make_order(&mut self, top: usize) -> u64 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        ((top as u64) << 32) | (seq & 0xffff_ffff)
    }

    fn link_top(&mut self, top: usize, fragment: &Fragment) -> Result<Linked> {
        match &fragment.kind {
            FragmentKind::Root { body } => {
                let order = self.make_order(top);
                self.nodes
                    .get_mut(self.root)
                    .assume("root node exists")?
                    .definitions
                    .push(FragRef {
                        span: fragment.span,
                        order,
                    });
                self.link_body(self.root, top, body)?;
                Ok(Linked::Done)
            }
            FragmentKind::Ref { label, body } => match self.resolve_label(&label.name) {
                Some(owner) => {
                    trace!(label = %label.name, "linking label reference");
                    let order = self.make_order(top);
                    self.nodes
                        .get_mut(owner)
                        .assume("label owner exists")?
                        .references
                        .push(FragRef {
                            span: fragment.span,
                            order,
                        });
                    self.link_body(owner, top, body)?;
                    Ok(Linked::Done)
                }
                None => {
                    trace!(label = %label.name, "deferring unresolved label reference");
                    Ok(Linked::Deferred)
                }
            },
            FragmentKind::DeleteNode {
                target: DeleteTarget::Label(label),
            } => match self.resolve_label(&label.name) {
                Some(owner) => {
                    let order = self.make_order(top);
                    self.delete_node_by_id(owner, fragment.span, order)?;
                    Ok(Linked::Done)
                }
                None => Ok(Linked::Deferred),
            },
            // Anything else at the top level is tolerated as root content.
            _ => {
                self.link_item(self.root, top, fragment)?;
                Ok(Linked::Done)
            }
        }
    }

    fn link_body(&mut self, node: NodeId, top: usize, body: &[Fragment]) -> Result<()> {
        for fragment in body {
            self.link_item(node, top, fragment)?;
        }
        Ok(())
    }

    fn link_item(&mut self, node: NodeId, top: usize, fragment: &Fragment) -> Result<()> {
        match &fragment.kind {
            FragmentKind::Node { name, labels, body } => {
                let order = self.make_order(top);
                let child = self.ensure_child(node, name)?;
                self.nodes
                    .get_mut(child)
                    .assume("child node exists")?
                    .definitions
                    .push(FragRef {
                        span: fragment.span,
                        order,
                    });
                for label in labels {
                    self.claim_label(child, label.clone())?;
                }
                self.link_body(child, top, body)?;
            }
            FragmentKind::Property { name, values } => {
                let order = self.make_order(top);
                self.add_property(node, name, values.clone(), fragment.span, order)?;
            }
            FragmentKind::DeleteProperty { name } => {
                self.delete_property(node, name, fragment.span)?;
            }
            FragmentKind::DeleteNode { target } => {
                let order = self.make_order(top);
                match target {
                    DeleteTarget::Name(name) => {
                        self.delete_node(node, name, fragment.span, order)?;
                    }
                    DeleteTarget::Label(label) => {
                        if let Some(owner) = self.resolve_label(&label.name) {
                            self.delete_node_by_id(owner, fragment.span, order)?;
                        }
                        // Unknown label: silent no-op.
                    }
                }
            }
            FragmentKind::Ref { label, body } => {
                // Nested label references are unusual but tolerated.
                match self.resolve_label(&label.name) {
                    Some(owner) => {
                        let order = self.make_order(top);
                        self.nodes
                            .get_mut(owner)
                            .assume("label owner exists")?
                            .references
                            .push(FragRef {
                                span: fragment.span,
                                order,
                            });
                        self.link_body(owner, top, body)?;
                    }
                    None => self.unresolved.push(label.clone()),
                }
            }
            FragmentKind::Root { body } => {
                // Parsers do not nest root definitions; keep the contents
                // rather than dropping them.
                self.link_body(self.root, top, body)?;
            }
        }
        Ok(())
    }

    /// Finds or creates the live child identified by `name`.
    fn ensure_child(&mut self, parent: NodeId, name: &NodeName) -> Result<NodeId> {
        let existing = self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].node_name().matches(name));
        if let Some(id) = existing {
            return Ok(id);
        }

        trace!(parent = %self.node_path(parent), name = %name, "creating node");
        let id = self
            .nodes
            .insert(Node::new(name.name.clone(), name.address.clone(), Some(parent)));
        self.nodes
            .get_mut(parent)
            .assume("parent node exists")?
            .children
            .push(id);
        Ok(id)
    }

    fn claim_label(&mut self, node: NodeId, label: Label) -> Result<()> {
        let added = self
            .nodes
            .get_mut(node)
            .assume("labeled node exists")?
            .add_label(label.clone());
        if added {
            self.labels
                .entry(label.name.clone())
                .or_default()
                .push(LabelClaim { node, label });
            self.label_paths.borrow_mut().clear();
        }
        Ok(())
    }

    /// Attaches a property assignment, moving any live same-name property
    /// into the override chain.
    ///
    /// "Most recent" is decided by the order stamp, not by link sequence:
    /// a deferred fragment from an earlier file slots into the chain at
    /// its ordered position instead of going live.
    fn add_property(
        &mut self,
        node: NodeId,
        name: &str,
        values: Vec<Value>,
        span: Span,
        order: u64,
    ) -> Result<()> {
        let id = self
            .props
            .insert(Property::new(name, node, values, span, order));

        match self.nodes[node].property(name) {
            None => {
                self.nodes
                    .get_mut(node)
                    .assume("node exists")?
                    .properties
                    .insert(name.to_owned(), id);
            }
            Some(live) => {
                let live_order = self.props.get(live).assume("live property exists")?.order;
                if order >= live_order {
                    // Newest wins; the live property becomes history.
                    self.props
                        .get_mut(id)
                        .assume("new property exists")?
                        .set_replaces(live)?;
                    self.props
                        .get_mut(live)
                        .assume("live property exists")?
                        .set_replaced_by(id)?;
                    // IndexMap keeps the original slot for an existing
                    // key, preserving property order across overrides.
                    self.nodes
                        .get_mut(node)
                        .assume("node exists")?
                        .properties
                        .insert(name.to_owned(), id);
                } else {
                    // A late-linked older assignment goes straight into
                    // history at its ordered chain position.
                    let mut anchor = live;
                    while let Some(older) = self.props[anchor].replaces() {
                        if self.props[older].order <= order {
                            break;
                        }
                        anchor = older;
                    }
                    let tail = self.props[anchor].replaces();
                    self.props
                        .get_mut(id)
                        .assume("new property exists")?
                        .set_replaced_by(anchor)?;
                    if let Some(tail) = tail {
                        self.props
                            .get_mut(id)
                            .assume("new property exists")?
                            .set_replaces(tail)?;
                        self.props
                            .get_mut(tail)
                            .assume("chain tail exists")?
                            .relink_replaced_by(Some(id));
                    }
                    self.props
                        .get_mut(anchor)
                        .assume("chain anchor exists")?
                        .relink_replaces(Some(id));
                }
            }
        }

        self.invalidate_subtree(node);
        Ok(())
    }

    /// Removes a live property into the delete history.
    ///
    /// Deleting a property that is not live is legal and silent.
    fn delete_property(&mut self, node: NodeId, name: &str, by: Span) -> Result<()> {
        let n = self.nodes.get_mut(node).assume("node exists")?;
        if let Some(id) = n.properties.shift_remove(name) {
            trace!(property = name, "deleting property");
            n.deleted_properties.push(DeletedProperty { property: id, by });
            self.invalidate_subtree(node);
        }
        Ok(())
    }

    /// Removes a live child into the delete history.
    ///
    /// Deleting a child that is not live is legal and silent, as is a
    /// delete that precedes the target's creation in total order.
    fn delete_node(
        &mut self,
        parent: NodeId,
        name: &NodeName,
        by: Span,
        order: u64,
    ) -> Result<()> {
        let target = self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].node_name().matches(name));
        if let Some(target) = target {
            self.delete_node_by_id(target, by, order)?;
        }
        Ok(())
    }

    fn delete_node_by_id(&mut self, node: NodeId, by: Span, order: u64) -> Result<()> {
        let Some(parent) = self.nodes[node].parent else {
            // The root is not deletable.
            return Ok(());
        };
        if !self.nodes[parent].children.contains(&node) {
            return Ok(());
        }
        if self.nodes[node].first_order().is_none_or(|first| first > order) {
            return Ok(());
        }

        trace!(node = %self.node_path(node), "deleting node");
        let p = self.nodes.get_mut(parent).assume("parent node exists")?;
        p.children.retain(|&c| c != node);
        p.deleted_children.push(DeletedNode { node, by, order });
        self.invalidate_subtree(parent);
        Ok(())
    }

    /// Clears every cached derived view in the subtree.
    ///
    /// Derived views depend on the node's own properties, on the parent's
    /// cell counts, and on ancestor ranges, so any mutation clears the
    /// whole subtree below the mutated node.
    fn invalidate_subtree(&self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            self.nodes[id].caches.clear_all();
            stack.extend(self.nodes[id].children.iter().copied());
        }
    }

    /// Reports whether the node is reachable from the root through live
    /// children.
    pub fn is_live(&self, node: NodeId) -> bool {
        let mut cur = node;
        while let Some(parent) = self.nodes[cur].parent {
            if !self.nodes[parent].children.contains(&cur) {
                return false;
            }
            cur = parent;
        }
        cur == self.root
    }

    /// Resolves a label to its current owner.
    ///
    /// The owner is the earliest claimant that is still live; a node
    /// deleted and re-created by an overlay hands its labels to the new
    /// claimant.
    pub fn resolve_label(&self, name: &str) -> Option<NodeId> {
        let claims = self.labels.get(name)?;
        claims.iter().find(|c| self.is_live(c.node)).map(|c| c.node)
    }

    /// The canonical absolute path of a node.
    pub fn node_path(&self, node: NodeId) -> String {
        let mut segments = Vec::new();
        let mut cur = node;
        while let Some(parent) = self.nodes[cur].parent {
            segments.push(self.nodes[cur].node_name().to_string());
            cur = parent;
        }
        if segments.is_empty() {
            return "/".to_owned();
        }
        segments.reverse();
        let mut path = String::new();
        for segment in segments {
            path.push('/');
            path.push_str(&segment);
        }
        path
    }

    /// Resolves leading label sigils to a plain absolute path.
    ///
    /// Labels map directly to nodes, so resolution terminates after one
    /// hop per sigil. Successful lookups are cached until labels change.
    pub fn resolve_path(&self, path: &str) -> Option<String> {
        let Some(rest) = path.strip_prefix('&') else {
            return Some(path.to_owned());
        };
        let (label, tail) = match rest.split_once('/') {
            Some((label, tail)) => (label, Some(tail)),
            None => (rest, None),
        };

        let cached = self.label_paths.borrow().get(label).cloned();
        let base = match cached {
            Some(cached) => cached,
            None => {
                let owner = self.resolve_label(label)?;
                let resolved = self.node_path(owner);
                self.label_paths
                    .borrow_mut()
                    .insert(label.to_owned(), resolved.clone());
                resolved
            }
        };

        let full = match tail {
            Some(tail) if !tail.is_empty() => {
                if base == "/" {
                    format!("/{tail}")
                } else {
                    format!("{base}/{tail}")
                }
            }
            _ => base,
        };
        self.resolve_path(&full)
    }

    /// Looks up a node by path.
    ///
    /// With `strict`, a segment must carry the exact unit address when
    /// several same-named siblings exist; without it, a single unambiguous
    /// name match is tolerated.
    pub fn get_child(&self, path: &str, strict: bool) -> Option<NodeId> {
        let path = self.resolve_path(path)?;
        let mut cur = self.root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let name: NodeName = segment.parse().ok()?;
            cur = self.match_child(cur, &name, strict)?;
        }
        Some(cur)
    }

    fn match_child(&self, parent: NodeId, name: &NodeName, strict: bool) -> Option<NodeId> {
        let children = &self.nodes[parent].children;
        if let Some(exact) = children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].node_name().matches(name))
        {
            return Some(exact);
        }
        let by_name: Vec<NodeId> = children
            .iter()
            .copied()
            .filter(|&c| self.nodes[c].name == name.name)
            .collect();
        match by_name.as_slice() {
            [only] if name.address.is_none() => Some(*only),
            [only] if !strict => Some(*only),
            _ => None,
        }
    }

    /// The first numeric word of the node's `phandle` property.
    pub fn phandle_value(&self, node: NodeId) -> Option<u64> {
        self.nodes[node]
            .property("phandle")
            .and_then(|id| self.props[id].first_word())
    }

    /// Finds the first node with the given phandle value, depth first.
    pub fn get_phandle(&self, value: u64) -> Option<NodeId> {
        self.find_phandle(self.root, value)
    }

    fn find_phandle(&self, node: NodeId, value: u64) -> Option<NodeId> {
        if self.phandle_value(node) == Some(value) {
            return Some(node);
        }
        self.nodes[node]
            .children
            .iter()
            .find_map(|&c| self.find_phandle(c, value))
    }

    /// Finds every node with the given phandle value, depth first.
    ///
    /// Duplicate phandle values are tolerated; this is how tooling sees
    /// all claimants.
    pub fn get_all_phandle(&self, value: u64) -> Vec<NodeId> {
        let mut out = Vec::new();
        for node in self.live_nodes() {
            if self.phandle_value(node) == Some(value) {
                out.push(node);
            }
        }
        out
    }

    /// Reports whether the node's `status` property disables it.
    pub fn is_disabled(&self, node: NodeId) -> bool {
        self.nodes[node]
            .property("status")
            .and_then(|id| self.props[id].strings().next())
            .is_some_and(|s| s == "disabled")
    }

    /// The full override history of a property, most recent first.
    pub fn all_replaced(&self, property: PropertyId) -> Vec<PropertyId> {
        let mut out = Vec::new();
        let mut cur = self.props[property].replaces();
        while let Some(id) = cur {
            out.push(id);
            cur = self.props[id].replaces();
        }
        out
    }

    /// Live nodes in preorder.
    pub(crate) fn live_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            for &c in self.nodes[id].children.iter().rev() {
                stack.push(c);
            }
        }
        out
    }

    /// Aggregates every diagnostic: whole-tree checks first, then each
    /// live node in preorder.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let mut out = Vec::new();

        self.label_diagnostics(&mut out);
        self.root_diagnostics(&mut out);
        for label in &self.unresolved {
            out.push(
                Diagnostic::new(IssueKind::UnresolvedReference, label.span).with_arg(&label.name),
            );
        }

        for node in self.live_nodes() {
            self.overlap_diagnostics(node, &mut out);
            self.node_diagnostics(node, &mut out);
        }
        out
    }

    fn label_diagnostics(&self, out: &mut Vec<Diagnostic>) {
        let mut names: Vec<&String> = self.labels.keys().collect();
        names.sort();
        for name in names {
            let live: Vec<&LabelClaim> = self.labels[name]
                .iter()
                .filter(|c| self.is_live(c.node))
                .collect();
            let Some(first) = live.first() else { continue };
            for claim in &live[1..] {
                if claim.node != first.node {
                    out.push(
                        Diagnostic::new(IssueKind::LabelAlreadyInUse, claim.label.span)
                            .with_related(first.label.span)
                            .with_arg(name),
                    );
                }
            }
        }
    }

    fn root_diagnostics(&self, out: &mut Vec<Diagnostic>) {
        let root = &self.nodes[self.root];
        let Some(last) = root.definitions.last() else {
            return;
        };
        let has_cpus = root
            .children
            .iter()
            .any(|&c| self.nodes[c].name == "cpus");
        if !has_cpus {
            let mut diag = Diagnostic::new(IssueKind::MissingCpusNode, last.span);
            for earlier in &root.definitions[..root.definitions.len().saturating_sub(1)] {
                diag = diag.with_related(earlier.span);
            }
            out.push(diag);
        }
    }

    fn node_diagnostics(&self, node: NodeId, out: &mut Vec<Diagnostic>) {
        let n = &self.nodes[node];

        // Unit-address arity against this node's own cell count.
        let expected = self.address_cells(node) as usize;
        for &child in n.children.iter() {
            let c = &self.nodes[child];
            if let Some(address) = &c.address {
                if address.len() != expected {
                    let span = c.definitions.last().map_or_else(Span::dummy, |d| d.span);
                    out.push(
                        Diagnostic::new(IssueKind::UnitAddressMismatch, span)
                            .with_arg(c.node_name())
                            .with_arg(address.len())
                            .with_arg(expected),
                    );
                }
            }
        }

        for (name, id) in n.properties() {
            // Shadowed assignments along the override chain.
            for old in self.all_replaced(id) {
                let old_prop = &self.props[old];
                let superseded_by = old_prop
                    .replaced_by()
                    .map_or_else(Span::dummy, |r| self.props[r].span);
                out.push(
                    Diagnostic::new(IssueKind::DuplicateProperty, old_prop.span)
                        .with_related(superseded_by)
                        .with_arg(name),
                );
            }

            // Unresolvable references used as property values.
            for value in &self.props[id].values {
                match value {
                    Value::LabelRef(label) if self.resolve_label(&label.name).is_none() => {
                        out.push(
                            Diagnostic::new(IssueKind::UnresolvedReference, label.span)
                                .with_arg(&label.name),
                        );
                    }
                    Value::PathRef { path, span } if self.get_child(path, false).is_none() => {
                        out.push(
                            Diagnostic::new(IssueKind::UnresolvedReference, *span).with_arg(path),
                        );
                    }
                    _ => {}
                }
            }
        }

        // Deleted entities, as history hints.
        for rec in n.deleted_properties() {
            let prop = &self.props[rec.property];
            out.push(
                Diagnostic::new(IssueKind::PropertyDeleted, prop.span)
                    .with_related(rec.by)
                    .with_arg(&prop.name),
            );
        }
        for rec in n.deleted_children() {
            let deleted = &self.nodes[rec.node];
            let span = deleted
                .definitions
                .last()
                .map_or_else(Span::dummy, |d| d.span);
            out.push(
                Diagnostic::new(IssueKind::NodeDeleted, span)
                    .with_related(rec.by)
                    .with_arg(deleted.node_name()),
            );
        }

        // Addresses an ancestor bus cannot translate.
        for entry in self.mapped_reg(node).iter() {
            if entry.missing_mapping {
                out.push(
                    Diagnostic::new(IssueKind::MissingMapping, entry.span)
                        .with_arg(&entry.start)
                        .with_arg(n.node_name()),
                );
            }
        }

        // Required properties from the binding classification.
        if let Some(ty) = self.node_type(node) {
            let span = n.definitions.last().map_or_else(Span::dummy, |d| d.span);
            for required in &ty.required {
                if n.property(required).is_none() {
                    let ty_name = ty.name.clone().unwrap_or_else(|| n.name.clone());
                    out.push(
                        Diagnostic::new(IssueKind::RequiredPropertyMissing, span)
                            .with_arg(required)
                            .with_arg(ty_name),
                    );
                }
            }
        }
    }
}
