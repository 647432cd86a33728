//! Generic specifier-map ("nexus") resolution.
//!
//! Properties of the `<specifier>-map` family route a local specifier
//! tuple to a target node and that target's own tuple; interrupt routing
//! is the canonical instance. The table layout depends on cell counts of
//! both the nexus node and every referenced target, so parsing resolves
//! phandles as it walks the word stream.

use std::sync::Arc;

use dt_syntax::{Span, Spanned, Value};

use crate::{node::NodeId, runtime::Runtime};

/// One word of a specifier tuple.
///
/// Masking applies to numeric words only; anything the evaluator cannot
/// produce a number for keeps its textual identity and compares unmasked.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum NexusWord {
    /// An evaluated numeric word.
    Num(u64),
    /// A non-numeric or unresolved word, compared by textual form.
    Text(String),
}

impl NexusWord {
    /// Converts a property value into a specifier word.
    pub fn from_value(value: &Value) -> Self {
        match value.as_word() {
            Some(word) => NexusWord::Num(word),
            None => NexusWord::Text(value.word_text()),
        }
    }

    fn matches(&self, other: &Self, mask: u64) -> bool {
        match (self, other) {
            (NexusWord::Num(a), NexusWord::Num(b)) => (a & mask) == (b & mask),
            (NexusWord::Text(a), NexusWord::Text(b)) => a == b,
            _ => false,
        }
    }
}

/// One resolved row of a specifier map.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NexusEntry {
    /// The child specifier words (unit-address words first for
    /// address-carrying specifiers).
    pub child: Vec<NexusWord>,
    /// The phandle-resolved target node.
    pub target: NodeId,
    /// The target's specifier words.
    pub parent: Vec<NexusWord>,
    /// Span of the words this row was decoded from.
    pub span: Span,
}

/// A parsed `<specifier>-map` table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NexusMap {
    /// The specifier name (`interrupt`, `gpio`, ...).
    pub specifier: String,
    /// The child-specifier arity, including unit-address words.
    pub child_cells: u32,
    /// The mask applied to numeric words on both sides of a match.
    pub mask: Vec<u64>,
    /// The table rows, in source order.
    pub entries: Vec<NexusEntry>,
}

impl Runtime {
    /// The node's own `#<specifier>-cells` count.
    pub fn specifier_cells(&self, node: NodeId, specifier: &str) -> Option<u32> {
        let name = format!("#{specifier}-cells");
        let prop = self.nodes[node].property(&name)?;
        self.props[prop].first_word().map(|w| w as u32)
    }

    /// The child-key arity of a node's specifier map.
    ///
    /// Interrupt maps additionally key on the unit address, so the node's
    /// own address-cell count is added for that specifier.
    fn nexus_child_cells(&self, node: NodeId, specifier: &str) -> Option<u32> {
        let base = self.specifier_cells(node, specifier)?;
        if specifier == "interrupt" {
            Some(base.saturating_add(self.address_cells(node)))
        } else {
            Some(base)
        }
    }

    /// Parses the node's `<specifier>-map` table.
    ///
    /// Returns `None` when the map property is absent, an arity source is
    /// missing, or a phandle word fails to resolve; the table is unusable
    /// in every one of those cases. A stream ending mid-row truncates the
    /// table instead. The result, including failure, is memoized.
    pub fn nexus_map(&self, node: NodeId, specifier: &str) -> Option<Arc<NexusMap>> {
        if let Some(cached) = self.nodes[node].caches.nexus.borrow().get(specifier) {
            return cached.clone();
        }

        let computed = self.compute_nexus_map(node, specifier);
        self.nodes[node]
            .caches
            .nexus
            .borrow_mut()
            .insert(specifier.to_owned(), computed.clone());
        computed
    }

    fn compute_nexus_map(&self, node: NodeId, specifier: &str) -> Option<Arc<NexusMap>> {
        let child_cells = self.nexus_child_cells(node, specifier)?;
        let map_prop = self.nodes[node].property(&format!("{specifier}-map"))?;
        let values = self.props[map_prop].values.clone();

        let mut entries = Vec::new();
        let mut at = 0usize;
        loop {
            let Some(child_values) = values.get(at..at.saturating_add(child_cells as usize))
            else {
                break;
            };
            let Some(phandle_value) = values.get(at.saturating_add(child_cells as usize)) else {
                break;
            };
            // An unresolvable phandle poisons the whole table: later row
            // boundaries depend on the target's cell counts.
            let target = self.resolve_phandle_value(phandle_value)?;

            let mut parent_cells = self.specifier_cells(target, specifier)? as usize;
            if specifier == "interrupt" {
                parent_cells = parent_cells.saturating_add(self.address_cells(target) as usize);
            }

            let parent_at = at.saturating_add(child_cells as usize).saturating_add(1);
            let Some(parent_values) = values.get(parent_at..parent_at.saturating_add(parent_cells))
            else {
                break;
            };

            let row_span = child_values
                .iter()
                .chain(parent_values.iter())
                .map(Spanned::span)
                .chain([phandle_value.span()])
                .reduce(|acc, s| acc.merge(s))
                .unwrap_or_default();
            entries.push(NexusEntry {
                child: child_values.iter().map(NexusWord::from_value).collect(),
                target,
                parent: parent_values.iter().map(NexusWord::from_value).collect(),
                span: row_span,
            });
            at = parent_at.saturating_add(parent_cells);
        }

        let mask = self.nexus_mask(node, specifier, child_cells as usize);
        Some(Arc::new(NexusMap {
            specifier: specifier.to_owned(),
            child_cells,
            mask,
            entries,
        }))
    }

    /// Reads `<specifier>-map-mask`, padding every undeclared word to
    /// all-ones (no masking).
    fn nexus_mask(&self, node: NodeId, specifier: &str, child_cells: usize) -> Vec<u64> {
        let mut mask = vec![u64::MAX; child_cells];
        if let Some(prop) = self.nodes[node].property(&format!("{specifier}-map-mask")) {
            for (slot, value) in mask.iter_mut().zip(&self.props[prop].values) {
                if let Some(word) = value.as_word() {
                    *slot = word;
                }
            }
        }
        mask
    }

    /// Resolves one phandle-position value to its target node.
    fn resolve_phandle_value(&self, value: &Value) -> Option<NodeId> {
        match value {
            Value::LabelRef(label) => self.resolve_label(&label.name),
            Value::PathRef { path, .. } => self.get_child(path, false),
            other => other.as_word().and_then(|w| self.get_phandle(w)),
        }
    }

    /// Finds the first table row matching a caller-supplied key.
    ///
    /// The key is the node's unit-address words (for address-carrying
    /// specifiers) followed by the specifier words. Both key and row are
    /// masked before comparison; no match is an answer, not an error.
    pub fn nexus_map_entry_match(
        &self,
        node: NodeId,
        specifier: &str,
        address: &[u64],
        words: &[NexusWord],
    ) -> Option<NexusEntry> {
        let map = self.nexus_map(node, specifier)?;

        let key: Vec<NexusWord> = address
            .iter()
            .map(|&w| NexusWord::Num(w))
            .chain(words.iter().cloned())
            .collect();
        if key.len() != map.child_cells as usize {
            return None;
        }

        map.entries
            .iter()
            .find(|entry| {
                entry
                    .child
                    .iter()
                    .zip(&key)
                    .zip(&map.mask)
                    .all(|((row, key), &mask)| row.matches(key, mask))
            })
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_matching() {
        assert!(NexusWord::Num(0x15).matches(&NexusWord::Num(0x35), 0x1f));
        assert!(!NexusWord::Num(0x15).matches(&NexusWord::Num(0x35), u64::MAX));
        assert!(NexusWord::Text("&gic".into()).matches(&NexusWord::Text("&gic".into()), 0));
        // Mask never applies across the numeric/textual divide.
        assert!(!NexusWord::Num(0).matches(&NexusWord::Text("0x0".into()), u64::MAX));
    }
}
