//! Property entities and the override chain.

use buggy::{Bug, bug};
use dt_syntax::{Span, Spanned, Value};

use crate::{arena::new_key_type, node::NodeId};

new_key_type!(
    /// Uniquely identifies a [`Property`] within one runtime.
    pub struct PropertyId;
);

/// One named value slot on exactly one node.
///
/// A property is created when its assignment fragment is linked and is
/// retained forever: replacement moves it onto the override chain, deletion
/// moves it into the owning node's delete history. Tooling walks both.
#[derive(Clone, Debug)]
pub struct Property {
    /// The property name.
    pub name: String,
    /// The owning node.
    pub node: NodeId,
    /// The assigned values, in source order.
    pub values: Vec<Value>,
    /// The span of the assignment fragment.
    pub span: Span,
    /// Total-order stamp of the assignment; later stamps win.
    pub(crate) order: u64,
    pub(crate) replaces: Option<PropertyId>,
    pub(crate) replaced_by: Option<PropertyId>,
}

impl Property {
    pub(crate) fn new(
        name: impl Into<String>,
        node: NodeId,
        values: Vec<Value>,
        span: Span,
        order: u64,
    ) -> Self {
        Self {
            name: name.into(),
            node,
            values,
            span,
            order,
            replaces: None,
            replaced_by: None,
        }
    }

    /// The property this assignment overrode, if any.
    pub fn replaces(&self) -> Option<PropertyId> {
        self.replaces
    }

    /// The later assignment that overrode this one, if any.
    pub fn replaced_by(&self) -> Option<PropertyId> {
        self.replaced_by
    }

    /// Single-assignment setter; a second set is a linking bug.
    pub(crate) fn set_replaced_by(&mut self, id: PropertyId) -> Result<(), Bug> {
        if self.replaced_by.is_some() {
            bug!("replaced_by already set");
        }
        self.replaced_by = Some(id);
        Ok(())
    }

    /// Single-assignment setter; a second set is a linking bug.
    pub(crate) fn set_replaces(&mut self, id: PropertyId) -> Result<(), Bug> {
        if self.replaces.is_some() {
            bug!("replaces already set");
        }
        self.replaces = Some(id);
        Ok(())
    }

    /// Re-points the `replaces` link during order-aware chain insertion.
    ///
    /// Only the runtime's deferred-linking path may call this; everything
    /// else goes through the single-assignment setters.
    pub(crate) fn relink_replaces(&mut self, id: Option<PropertyId>) {
        self.replaces = id;
    }

    /// Re-points the `replaced_by` link during chain insertion.
    pub(crate) fn relink_replaced_by(&mut self, id: Option<PropertyId>) {
        self.replaced_by = id;
    }

    /// The first numeric word of the value list, if any.
    pub fn first_word(&self) -> Option<u64> {
        self.values.iter().find_map(Value::as_word)
    }

    /// Iterates over the string values of the property.
    pub fn strings(&self) -> impl Iterator<Item = &str> {
        self.values.iter().filter_map(|v| match v {
            Value::String { value, .. } => Some(value.as_str()),
            _ => None,
        })
    }
}

impl Spanned for Property {
    fn span(&self) -> Span {
        self.span
    }
}
