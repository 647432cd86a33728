//! The devicetree semantic model.
//!
//! Consumes ordered syntax fragments (see [`dt_syntax`]) and builds one
//! queryable hardware tree: cross-references resolved, overlay edits
//! applied with full history, bus addressing and specifier maps computed
//! on demand, diagnostics aggregated tree-wide.
//!
//! One [`Runtime`] is one resolution pass over one fragment order;
//! independent runtimes share nothing mutable and may run in parallel.

#![warn(clippy::arithmetic_side_effects)]

mod addr;
mod arena;
mod bindings;
mod diag;
mod nexus;
mod node;
mod plain;
mod property;
mod runtime;

pub use addr::{CellValue, MappedReg, RangeEntry, RangeKind, RegEntry};
pub use bindings::{BindingResolver, NodeType};
pub use diag::{Diagnostic, IssueKind, Severity};
pub use nexus::{NexusEntry, NexusMap, NexusWord};
pub use node::{DeletedNode, DeletedProperty, FragRef, Node, NodeId};
pub use plain::{PlainNode, PlainProperty, PlainValue};
pub use property::{Property, PropertyId};
pub use runtime::Runtime;
