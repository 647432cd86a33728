use core::fmt;
use core::str::FromStr;
use std::sync::Arc;

use serde_derive::{Deserialize, Serialize};

use crate::span::{Span, Spanned};

/// A user-defined alias bound to a node, referenced elsewhere via `&`.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Label {
    /// The label text, without the sigil.
    pub name: String,
    /// The source location of this label occurrence.
    pub span: Span,
}

impl Label {
    /// Creates a label.
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
        }
    }

    /// Reports whether the labels have the same text, ignoring spans.
    pub fn matches(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {:?}", self.name, self.span)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name.fmt(f)
    }
}

impl Spanned for Label {
    fn span(&self) -> Span {
        self.span
    }
}

/// A node name plus its optional unit address.
///
/// The address is the ordered word tuple written after `@`; its arity is
/// governed by the parent's `#address-cells`, which the model checks, not
/// this type.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NodeName {
    /// The node name before `@`.
    pub name: String,
    /// The unit-address words, most significant first.
    pub address: Option<Vec<u64>>,
}

impl NodeName {
    /// Creates a name with no unit address.
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
        }
    }

    /// Creates a name with a unit address.
    pub fn with_address(name: impl Into<String>, address: Vec<u64>) -> Self {
        Self {
            name: name.into(),
            address: Some(address),
        }
    }

    /// Reports whether both name and unit address are equal.
    pub fn matches(&self, other: &Self) -> bool {
        self.name == other.name && self.address == other.address
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(address) = &self.address {
            f.write_str("@")?;
            for (i, word) in address.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{word:x}")?;
            }
        }
        Ok(())
    }
}

/// An invalid node-name string was provided to [`NodeName::from_str`].
#[derive(Clone, Debug, thiserror::Error)]
#[error("invalid node name {0:?}")]
pub struct InvalidNodeName(pub String);

impl FromStr for NodeName {
    type Err = InvalidNodeName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, address) = match s.split_once('@') {
            Some((name, unit)) => {
                let words = unit
                    .split(',')
                    .map(|w| u64::from_str_radix(w, 16))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| InvalidNodeName(s.to_owned()))?;
                (name, Some(words))
            }
            None => (s, None),
        };
        if name.is_empty() {
            return Err(InvalidNodeName(s.to_owned()));
        }
        Ok(Self {
            name: name.to_owned(),
            address,
        })
    }
}

/// One syntax fragment handed to the model by the parsing layer.
#[derive(Clone, Debug)]
pub struct Fragment {
    /// The full source extent of the fragment.
    pub span: Span,
    /// What the fragment does.
    pub kind: FragmentKind,
}

impl Spanned for Fragment {
    fn span(&self) -> Span {
        self.span
    }
}

/// The closed set of fragment kinds.
#[derive(Clone, Debug)]
pub enum FragmentKind {
    /// `/ { ... };`: contents attach to the tree root.
    Root {
        /// Child fragments in source order.
        body: Vec<Fragment>,
    },
    /// `label: name@unit { ... };`: a named child definition.
    Node {
        /// The child's name and unit address.
        name: NodeName,
        /// Labels declared on this definition.
        labels: Vec<Label>,
        /// Child fragments in source order.
        body: Vec<Fragment>,
    },
    /// `&label { ... };`: contents attach to the label's owner.
    Ref {
        /// The referenced label.
        label: Label,
        /// Child fragments in source order.
        body: Vec<Fragment>,
    },
    /// `/delete-node/ target;`
    DeleteNode {
        /// The node to delete.
        target: DeleteTarget,
    },
    /// `/delete-property/ name;`
    DeleteProperty {
        /// The property name to delete.
        name: String,
    },
    /// `name = values;` or a boolean `name;`
    Property {
        /// The property name.
        name: String,
        /// The value list, already flattened to a single stream.
        values: Vec<Value>,
    },
}

/// The target of a `/delete-node/` directive.
#[derive(Clone, Debug)]
pub enum DeleteTarget {
    /// Deletes the named live child of the enclosing node.
    Name(NodeName),
    /// Deletes the node owning the label, wherever it lives.
    Label(Label),
}

/// One property value.
///
/// Everything arithmetic has already been folded by the preprocessor;
/// anything it could not fold arrives as a lazy [`Expr`](Value::Expr) the
/// model asks to evaluate on demand.
#[derive(Clone, Debug)]
pub enum Value {
    /// A resolved integer cell.
    Int {
        /// The cell value.
        value: u64,
        /// Source location.
        span: Span,
    },
    /// A string value.
    String {
        /// The string contents.
        value: String,
        /// Source location.
        span: Span,
    },
    /// A byte sequence (`[aa bb]`).
    Bytes {
        /// The bytes.
        value: Vec<u8>,
        /// Source location.
        span: Span,
    },
    /// `&label`: resolved by the model against the label table.
    LabelRef(Label),
    /// `&{/path}`: resolved by the model against the tree.
    PathRef {
        /// The absolute path, without the wrapper.
        path: String,
        /// Source location.
        span: Span,
    },
    /// An unevaluated expression behind the external evaluator seam.
    Expr(LazyExpr),
}

impl Value {
    /// Returns the value as a numeric word, evaluating lazily if needed.
    ///
    /// `None` means the value is non-numeric or still unresolved.
    pub fn as_word(&self) -> Option<u64> {
        match self {
            Value::Int { value, .. } => Some(*value),
            Value::Expr(expr) => expr.evaluate(),
            Value::String { .. }
            | Value::Bytes { .. }
            | Value::LabelRef(_)
            | Value::PathRef { .. } => None,
        }
    }

    /// A stable textual identity for non-numeric comparison.
    pub fn word_text(&self) -> String {
        match self {
            Value::Int { value, .. } => format!("{value:#x}"),
            Value::String { value, .. } => value.clone(),
            Value::Bytes { value, .. } => format!("{value:02x?}"),
            Value::LabelRef(label) => format!("&{}", label.name),
            Value::PathRef { path, .. } => format!("&{{{path}}}"),
            Value::Expr(expr) => match expr.evaluate() {
                Some(value) => format!("{value:#x}"),
                None => format!("{expr:?}"),
            },
        }
    }
}

impl Spanned for Value {
    fn span(&self) -> Span {
        match self {
            Value::Int { span, .. }
            | Value::String { span, .. }
            | Value::Bytes { span, .. }
            | Value::PathRef { span, .. } => *span,
            Value::LabelRef(label) => label.span,
            Value::Expr(expr) => expr.span,
        }
    }
}

/// The evaluation seam to the external preprocessor.
///
/// Implementations capture whatever macro context they need; the model
/// only ever asks for the final word.
pub trait Evaluate: fmt::Debug + Send + Sync {
    /// Returns the evaluated word, or `None` while unresolved.
    fn evaluate(&self) -> Option<u64>;
}

/// A lazily evaluated expression value.
#[derive(Clone)]
pub struct LazyExpr {
    /// Source location of the expression.
    pub span: Span,
    expr: Arc<dyn Evaluate>,
}

impl LazyExpr {
    /// Wraps an evaluator implementation.
    pub fn new(span: Span, expr: impl Evaluate + 'static) -> Self {
        Self {
            span,
            expr: Arc::new(expr),
        }
    }

    /// Asks the external evaluator for the word.
    pub fn evaluate(&self) -> Option<u64> {
        self.expr.evaluate()
    }
}

impl fmt::Debug for LazyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LazyExpr({:?} @ {:?})", self.expr, self.span)
    }
}

/// An [`Evaluate`] implementation with a fixed answer.
///
/// Useful for callers whose evaluator runs eagerly, and for tests.
#[derive(Clone, Copy, Debug)]
pub struct ConstExpr(pub Option<u64>);

impl Evaluate for ConstExpr {
    fn evaluate(&self) -> Option<u64> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_name_parse() {
        let name: NodeName = "uart@1000".parse().expect("parses");
        assert_eq!(name, NodeName::with_address("uart", vec![0x1000]));
        assert_eq!(name.to_string(), "uart@1000");

        let name: NodeName = "pci@1,0".parse().expect("parses");
        assert_eq!(name, NodeName::with_address("pci", vec![1, 0]));
        assert_eq!(name.to_string(), "pci@1,0");

        let name: NodeName = "cpus".parse().expect("parses");
        assert_eq!(name, NodeName::bare("cpus"));

        assert!("@1000".parse::<NodeName>().is_err());
        assert!("uart@xyz".parse::<NodeName>().is_err());
    }

    #[test]
    fn test_value_as_word() {
        let span = Span::dummy();
        assert_eq!(Value::Int { value: 7, span }.as_word(), Some(7));
        assert_eq!(Value::Expr(LazyExpr::new(span, ConstExpr(Some(9)))).as_word(), Some(9));
        assert_eq!(Value::Expr(LazyExpr::new(span, ConstExpr(None))).as_word(), None);
        assert_eq!(Value::LabelRef(Label::new("gic", span)).as_word(), None);
    }

    #[test]
    fn test_word_text() {
        let span = Span::dummy();
        assert_eq!(Value::Int { value: 16, span }.word_text(), "0x10");
        assert_eq!(Value::LabelRef(Label::new("gic", span)).word_text(), "&gic");
        assert_eq!(
            Value::PathRef {
                path: "/soc/gic".into(),
                span
            }
            .word_text(),
            "&{/soc/gic}"
        );
    }
}
