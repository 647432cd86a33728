//! Syntax-fragment vocabulary for the devicetree semantic model.
//!
//! The parsing and preprocessing layers produce [`Fragment`]s: already
//! macro-expanded pieces of a devicetree source, in the order mandated by
//! the file/include sequence. The semantic model consumes fragments and
//! never looks at source text itself; positions are carried as opaque
//! [`Span`]s used only for diagnostics.

mod ast;
mod span;

pub use ast::{
    ConstExpr, DeleteTarget, Evaluate, Fragment, FragmentKind, InvalidNodeName, Label, LazyExpr,
    NodeName, Value,
};
pub use span::{Span, Spanned, SrcId};
