//! Address and range resolution.
//!
//! `reg`/`ranges`/`dma-ranges` are word streams whose grouping is governed
//! by the declaring and parent nodes' cell counts. Combined addresses can
//! exceed any machine integer (three and four address cells appear in real
//! sources), so arithmetic and comparison run on [`CellValue`], an exact
//! base-2^32 multi-word unsigned integer.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use dt_syntax::{Span, Spanned, Value};

use crate::{
    diag::{Diagnostic, IssueKind},
    node::NodeId,
    runtime::Runtime,
};

pub(crate) const DEFAULT_ADDRESS_CELLS: u32 = 2;
pub(crate) const DEFAULT_SIZE_CELLS: u32 = 1;

/// An exact unsigned integer composed of 32-bit cells.
///
/// Limbs are stored least significant first with no high zero limbs; each
/// source word contributes one cell (its low 32 bits).
#[derive(Clone, Default, Eq, PartialEq, Hash)]
pub struct CellValue {
    limbs: Vec<u32>,
}

impl CellValue {
    /// The zero value.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Reports whether the value is zero.
    pub fn is_zero(&self) -> bool {
        self.limbs.is_empty()
    }

    /// Composes a value from words, most significant first.
    pub fn from_words<I>(words: I) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        let mut limbs: Vec<u32> = words.into_iter().map(|w| w as u32).collect();
        limbs.reverse();
        let mut value = Self { limbs };
        value.normalize();
        value
    }

    fn normalize(&mut self) {
        while self.limbs.last() == Some(&0) {
            self.limbs.pop();
        }
    }

    /// Exact addition.
    pub fn add(&self, other: &Self) -> Self {
        let n = self.limbs.len().max(other.limbs.len());
        let mut limbs = Vec::with_capacity(n.saturating_add(1));
        let mut carry: u64 = 0;
        for i in 0..n {
            let a = u64::from(self.limbs.get(i).copied().unwrap_or(0));
            let b = u64::from(other.limbs.get(i).copied().unwrap_or(0));
            let sum = a.wrapping_add(b).wrapping_add(carry);
            limbs.push(sum as u32);
            carry = sum >> 32;
        }
        if carry != 0 {
            limbs.push(carry as u32);
        }
        let mut value = Self { limbs };
        value.normalize();
        value
    }

    /// Exact subtraction; `None` if the result would be negative.
    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        if self < other {
            return None;
        }
        let mut limbs = Vec::with_capacity(self.limbs.len());
        let mut borrow: i64 = 0;
        for i in 0..self.limbs.len() {
            let a = i64::from(self.limbs[i]);
            let b = i64::from(other.limbs.get(i).copied().unwrap_or(0));
            let mut diff = a.wrapping_sub(b).wrapping_sub(borrow);
            if diff < 0 {
                diff = diff.wrapping_add(1 << 32);
                borrow = 1;
            } else {
                borrow = 0;
            }
            limbs.push(diff as u32);
        }
        let mut value = Self { limbs };
        value.normalize();
        Some(value)
    }

    /// Narrows to `u128` when the value fits.
    pub fn as_u128(&self) -> Option<u128> {
        if self.limbs.len() > 4 {
            return None;
        }
        let mut out: u128 = 0;
        for limb in self.limbs.iter().rev() {
            out = (out << 32) | u128::from(*limb);
        }
        Some(out)
    }
}

impl Ord for CellValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.limbs.len().cmp(&other.limbs.len()) {
            Ordering::Equal => {}
            ord => return ord,
        }
        for (a, b) in self.limbs.iter().rev().zip(other.limbs.iter().rev()) {
            match a.cmp(b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for CellValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<u64> for CellValue {
    fn from(value: u64) -> Self {
        Self::from_words([value >> 32, value & 0xffff_ffff])
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.limbs.split_last() {
            None => f.write_str("0x0"),
            Some((high, rest)) => {
                write!(f, "{high:#x}")?;
                for limb in rest.iter().rev() {
                    write!(f, "{limb:08x}")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// One decoded `reg` entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegEntry {
    /// Start address in the parent's address space.
    pub start: CellValue,
    /// Entry size.
    pub size: CellValue,
    /// Span of the words this entry was decoded from.
    pub span: Span,
}

impl RegEntry {
    /// The half-open end address.
    pub fn end(&self) -> CellValue {
        self.start.add(&self.size)
    }
}

/// Which range table of a node to decode.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RangeKind {
    /// The `ranges` property.
    Ranges,
    /// The `dma-ranges` property.
    DmaRanges,
}

impl RangeKind {
    /// The property name holding the table.
    pub fn property_name(&self) -> &'static str {
        match self {
            RangeKind::Ranges => "ranges",
            RangeKind::DmaRanges => "dma-ranges",
        }
    }
}

/// One decoded `ranges`/`dma-ranges` entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RangeEntry {
    /// Start address in the child address space.
    pub child: CellValue,
    /// Start address in the parent address space.
    pub parent: CellValue,
    /// Window size.
    pub size: CellValue,
    /// Span of the words this entry was decoded from.
    pub span: Span,
}

impl RangeEntry {
    /// The half-open end of the child window.
    pub fn child_end(&self) -> CellValue {
        self.child.add(&self.size)
    }

    /// Reports whether `addr` falls inside the child window.
    pub fn contains(&self, addr: &CellValue) -> bool {
        *addr >= self.child && *addr < self.child_end()
    }
}

/// One `reg` entry translated as far up the bus hierarchy as possible.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MappedReg {
    /// The translated start address (root-relative when every ancestor
    /// mapped; otherwise as far as translation got).
    pub start: CellValue,
    /// Entry size, unchanged by translation.
    pub size: CellValue,
    /// Whether every translated end stayed within its matched range.
    pub in_mapping_range: bool,
    /// Whether some ancestor's ranges had no window for this address.
    pub missing_mapping: bool,
    /// Span of the originating reg words.
    pub span: Span,
}

impl MappedReg {
    /// The half-open end address.
    pub fn end(&self) -> CellValue {
        self.start.add(&self.size)
    }
}

/// Flattens a value list into its leading numeric word run.
///
/// A word that is non-numeric or still unresolved ends the stream; short
/// tails are the normal state of a file mid-edit.
fn numeric_stream(values: &[Value]) -> Vec<(u64, Span)> {
    let mut words = Vec::with_capacity(values.len());
    for value in values {
        match value.as_word() {
            Some(word) => words.push((word, value.span())),
            None => break,
        }
    }
    words
}

/// Composes a word group big-endian; an empty group is zero.
fn compose(group: &[(u64, Span)]) -> CellValue {
    CellValue::from_words(group.iter().map(|(w, _)| *w))
}

/// The covering span of a word group.
fn group_span(group: &[(u64, Span)]) -> Span {
    group
        .iter()
        .map(|(_, s)| *s)
        .reduce(|acc, s| acc.merge(s))
        .unwrap_or_default()
}

impl Runtime {
    /// The node's own `#address-cells`, defaulting to 2.
    ///
    /// Deliberately not inherited: the devicetree spec reads the count
    /// from the node that owns the children being decoded.
    pub fn address_cells(&self, node: NodeId) -> u32 {
        self.cell_count(node, "#address-cells", DEFAULT_ADDRESS_CELLS)
    }

    /// The node's own `#size-cells`, defaulting to 1.
    pub fn size_cells(&self, node: NodeId) -> u32 {
        self.cell_count(node, "#size-cells", DEFAULT_SIZE_CELLS)
    }

    fn cell_count(&self, node: NodeId, name: &str, default: u32) -> u32 {
        self.nodes[node]
            .property(name)
            .and_then(|id| self.props[id].first_word())
            .map_or(default, |w| w as u32)
    }

    /// Decodes the node's `reg` property against the parent's cell counts.
    ///
    /// A trailing partial group is discarded silently. The result is
    /// memoized until a feeding property changes.
    pub fn reg_array(&self, node: NodeId) -> Arc<Vec<RegEntry>> {
        if let Some(cached) = self.nodes[node].caches.reg.borrow().clone() {
            return cached;
        }

        let mut entries = Vec::new();
        if let Some(parent) = self.nodes[node].parent {
            let address_cells = self.address_cells(parent) as usize;
            let size_cells = self.size_cells(parent) as usize;
            let total = address_cells.saturating_add(size_cells);
            if let Some(prop) = self.nodes[node].property("reg") {
                let words = numeric_stream(&self.props[prop].values);
                let mut at: usize = 0;
                while total > 0 {
                    let Some(group) = at
                        .checked_add(total)
                        .and_then(|end| words.get(at..end))
                    else {
                        // Short tail: discard the partial entry silently.
                        break;
                    };
                    entries.push(RegEntry {
                        start: compose(&group[..address_cells]),
                        size: compose(&group[address_cells..]),
                        span: group_span(group),
                    });
                    at = at.saturating_add(total);
                }
            }
        }

        let entries = Arc::new(entries);
        *self.nodes[node].caches.reg.borrow_mut() = Some(entries.clone());
        entries
    }

    /// Decodes a node's `ranges`/`dma-ranges` table.
    ///
    /// `None` means the property is absent (top of the addressing
    /// hierarchy); `Some` with no entries is the identity mapping.
    pub fn range_map(&self, node: NodeId, kind: RangeKind) -> Option<Arc<Vec<RangeEntry>>> {
        let cache = match kind {
            RangeKind::Ranges => &self.nodes[node].caches.ranges,
            RangeKind::DmaRanges => &self.nodes[node].caches.dma_ranges,
        };
        if let Some(cached) = cache.borrow().clone() {
            return cached;
        }

        let computed = self.compute_range_map(node, kind);
        *cache.borrow_mut() = Some(computed.clone());
        computed
    }

    fn compute_range_map(&self, node: NodeId, kind: RangeKind) -> Option<Arc<Vec<RangeEntry>>> {
        let prop = self.nodes[node].property(kind.property_name())?;
        let parent = self.nodes[node].parent;

        let child_cells = self.address_cells(node) as usize;
        let parent_cells = parent.map_or(DEFAULT_ADDRESS_CELLS as usize, |p| {
            self.address_cells(p) as usize
        });
        let size_cells = self.size_cells(node) as usize;

        let words = numeric_stream(&self.props[prop].values);
        let mut entries = Vec::new();
        let total = child_cells
            .saturating_add(parent_cells)
            .saturating_add(size_cells);
        let mut at: usize = 0;
        while total > 0 {
            let Some(group) = at.checked_add(total).and_then(|end| words.get(at..end)) else {
                break;
            };
            let split = child_cells.saturating_add(parent_cells);
            entries.push(RangeEntry {
                child: compose(&group[..child_cells]),
                parent: compose(&group[child_cells..split]),
                size: compose(&group[split..]),
                span: group_span(group),
            });
            at = at.saturating_add(total);
        }
        Some(Arc::new(entries))
    }

    /// Translates the node's `reg` entries through ancestor `ranges`
    /// tables to root-relative addresses.
    ///
    /// Translation stops at the first ancestor without a `ranges`
    /// property, and records a missing mapping when an ancestor has a
    /// table but no window containing the address.
    pub fn mapped_reg(&self, node: NodeId) -> Arc<Vec<MappedReg>> {
        if let Some(cached) = self.nodes[node].caches.mapped.borrow().clone() {
            return cached;
        }

        let regs = self.reg_array(node);
        let mut out = Vec::with_capacity(regs.len());
        for entry in regs.iter() {
            let mut addr = entry.start.clone();
            let mut in_mapping_range = true;
            let mut missing_mapping = false;

            let mut at = self.nodes[node].parent;
            while let Some(bus) = at {
                match self.range_map(bus, RangeKind::Ranges) {
                    // No ranges: top of the addressing hierarchy.
                    None => break,
                    // Empty ranges: identity mapping onto the parent.
                    Some(map) if map.is_empty() => {}
                    Some(map) => match map.iter().find(|r| r.contains(&addr)) {
                        Some(range) => {
                            let offset = addr
                                .checked_sub(&range.child)
                                .expect("contains() implies child <= addr");
                            let mapped = range.parent.add(&offset);
                            if mapped.add(&entry.size) > range.parent.add(&range.size) {
                                in_mapping_range = false;
                            }
                            addr = mapped;
                        }
                        None => {
                            missing_mapping = true;
                        }
                    },
                }
                if missing_mapping {
                    break;
                }
                at = self.nodes[bus].parent;
            }

            out.push(MappedReg {
                start: addr,
                size: entry.size.clone(),
                in_mapping_range,
                missing_mapping,
                span: entry.span,
            });
        }

        let out = Arc::new(out);
        *self.nodes[node].caches.mapped.borrow_mut() = Some(out.clone());
        out
    }

    /// Reports colliding `[start, end)` reg intervals among the node's
    /// live, enabled children. Each colliding pair yields a diagnostic on
    /// either side, cross-linked to the other.
    pub(crate) fn overlap_diagnostics(&self, parent: NodeId, out: &mut Vec<Diagnostic>) {
        let children: Vec<NodeId> = self.nodes[parent]
            .children()
            .iter()
            .copied()
            .filter(|&c| !self.is_disabled(c))
            .collect();
        let regs: Vec<Arc<Vec<RegEntry>>> =
            children.iter().map(|&c| self.reg_array(c)).collect();

        for i in 0..children.len() {
            for j in i.saturating_add(1)..children.len() {
                for ea in regs[i].iter() {
                    for eb in regs[j].iter() {
                        if ea.start < eb.end() && eb.start < ea.end() {
                            let a = self.nodes[children[i]].node_name();
                            let b = self.nodes[children[j]].node_name();
                            out.push(
                                Diagnostic::new(IssueKind::AddressRangeCollides, ea.span)
                                    .with_related(eb.span)
                                    .with_arg(&a)
                                    .with_arg(&b),
                            );
                            out.push(
                                Diagnostic::new(IssueKind::AddressRangeCollides, eb.span)
                                    .with_related(ea.span)
                                    .with_arg(&b)
                                    .with_arg(&a),
                            );
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cv(words: &[u64]) -> CellValue {
        CellValue::from_words(words.iter().copied())
    }

    #[test]
    fn test_cell_value_compose() {
        assert_eq!(cv(&[0, 0x1000]), CellValue::from(0x1000));
        assert_eq!(cv(&[1, 0]), CellValue::from(0x1_0000_0000));
        assert_eq!(cv(&[]).as_u128(), Some(0));
        assert_eq!(cv(&[1, 2, 3]).as_u128(), Some(0x1_00000002_00000003));
    }

    #[test]
    fn test_cell_value_add() {
        assert_eq!(cv(&[0xffff_ffff]).add(&CellValue::from(1)), cv(&[1, 0]));
        let big = cv(&[0xffff_ffff, 0xffff_ffff]);
        assert_eq!(big.add(&CellValue::from(1)), cv(&[1, 0, 0]));
        assert_eq!(CellValue::zero().add(&CellValue::zero()), CellValue::zero());
    }

    #[test]
    fn test_cell_value_sub() {
        assert_eq!(
            cv(&[1, 0]).checked_sub(&CellValue::from(1)),
            Some(cv(&[0xffff_ffff]))
        );
        assert_eq!(CellValue::from(5).checked_sub(&CellValue::from(9)), None);
        assert_eq!(
            CellValue::from(5).checked_sub(&CellValue::from(5)),
            Some(CellValue::zero())
        );
    }

    #[test]
    fn test_cell_value_ord() {
        // Crosses the 64-bit boundary: comparisons stay exact.
        assert!(cv(&[1, 0, 0]) > cv(&[0xffff_ffff, 0xffff_ffff]));
        assert!(cv(&[0, 0, 5]) < cv(&[0, 1, 0]));
        assert_eq!(cv(&[0, 0, 7]), cv(&[7]));
    }

    #[test]
    fn test_cell_value_display() {
        assert_eq!(CellValue::zero().to_string(), "0x0");
        assert_eq!(CellValue::from(0x1010).to_string(), "0x1010");
        assert_eq!(cv(&[1, 0]).to_string(), "0x100000000");
    }

    #[test]
    fn test_compose() {
        let span = Span::dummy();
        let words: Vec<(u64, Span)> = [1u64, 2, 3].iter().map(|&w| (w, span)).collect();
        assert_eq!(compose(&words[..2]), cv(&[1, 2]));
        assert_eq!(compose(&[]), CellValue::zero());
    }

    #[test]
    fn test_range_contains() {
        let range = RangeEntry {
            child: CellValue::from(0x1000),
            parent: CellValue::from(0x8000),
            size: CellValue::from(0x100),
            span: Span::dummy(),
        };
        assert!(range.contains(&CellValue::from(0x1000)));
        assert!(range.contains(&CellValue::from(0x10ff)));
        assert!(!range.contains(&CellValue::from(0x1100)));
        assert!(!range.contains(&CellValue::from(0xfff)));
    }
}
