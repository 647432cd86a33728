//! Plain-data projection of the tree for external renderers.
//!
//! The model stops at serde data types; whether that becomes JSON, CBOR,
//! or text is the consumer's call.

use serde_derive::Serialize;

use dt_syntax::Value;

use crate::{node::NodeId, runtime::Runtime};

/// A node flattened to name, properties, and children.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PlainNode {
    /// `/` for the root, `name@unit` otherwise.
    pub name: String,
    /// Live properties, in insertion order.
    pub properties: Vec<PlainProperty>,
    /// Live children, in first-definition order.
    pub children: Vec<PlainNode>,
}

/// One live property.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PlainProperty {
    /// The property name.
    pub name: String,
    /// The values, in source order.
    pub values: Vec<PlainValue>,
}

/// A value with the syntax layer stripped away.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum PlainValue {
    /// A numeric cell, including evaluated expressions.
    Int(u64),
    /// A string.
    String(String),
    /// A byte sequence.
    Bytes(Vec<u8>),
    /// A label or path reference, in sigil form.
    Reference(String),
    /// An expression the evaluator could not resolve.
    Unresolved(String),
}

impl PlainValue {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Int { value, .. } => PlainValue::Int(*value),
            Value::String { value, .. } => PlainValue::String(value.clone()),
            Value::Bytes { value, .. } => PlainValue::Bytes(value.clone()),
            Value::LabelRef(label) => PlainValue::Reference(format!("&{}", label.name)),
            Value::PathRef { path, .. } => PlainValue::Reference(format!("&{{{path}}}")),
            Value::Expr(expr) => match expr.evaluate() {
                Some(word) => PlainValue::Int(word),
                None => PlainValue::Unresolved(value.word_text()),
            },
        }
    }
}

impl Runtime {
    /// Projects the live tree into plain nested data.
    pub fn to_plain(&self) -> PlainNode {
        self.plain_node(self.root())
    }

    fn plain_node(&self, node: NodeId) -> PlainNode {
        let n = self.node(node);
        PlainNode {
            name: if n.parent.is_none() {
                "/".to_owned()
            } else {
                n.node_name().to_string()
            },
            properties: n
                .properties()
                .map(|(name, id)| PlainProperty {
                    name: name.to_owned(),
                    values: self
                        .property(id)
                        .values
                        .iter()
                        .map(PlainValue::from_value)
                        .collect(),
                })
                .collect(),
            children: n
                .children()
                .iter()
                .map(|&c| self.plain_node(c))
                .collect(),
        }
    }
}
