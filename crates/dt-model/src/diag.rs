//! Structured diagnostics emitted by the model.
//!
//! Diagnostics are plain data: the consumers are editor tools that render
//! them in their own UI, so nothing here formats to a terminal. Messages
//! are positional templates so hosts can localize or re-style them.

use std::fmt;

use dt_syntax::Span;
use serde_derive::{Deserialize, Serialize};

/// How bad a diagnostic is.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    /// Informational hint (shadowed/deleted entities).
    Hint,
    /// Informational note.
    Info,
    /// Likely a problem, resolution still succeeds.
    Warning,
    /// A real error in the source.
    Error,
}

/// The closed set of issue kinds the model reports.
///
/// Tags are stable across releases; tooling keys suppression and filtering
/// off them.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum IssueKind {
    /// Two distinct live nodes claim the same label text.
    LabelAlreadyInUse,
    /// Two sibling reg entries overlap.
    AddressRangeCollides,
    /// A property assignment shadowed an earlier one.
    DuplicateProperty,
    /// A property was removed by a delete directive.
    PropertyDeleted,
    /// A node was removed by a delete directive.
    NodeDeleted,
    /// The root has content but no `cpus` child.
    MissingCpusNode,
    /// A label or path reference has no target.
    UnresolvedReference,
    /// A reg entry could not be translated through an ancestor's ranges.
    MissingMapping,
    /// A unit address has the wrong number of words for the parent.
    UnitAddressMismatch,
    /// A property required by the node's binding is absent.
    RequiredPropertyMissing,
}

impl IssueKind {
    /// The stable machine-readable tag.
    pub fn tag(&self) -> &'static str {
        match self {
            IssueKind::LabelAlreadyInUse => "LABEL_ALREADY_IN_USE",
            IssueKind::AddressRangeCollides => "ADDRESS_RANGE_COLLIDES",
            IssueKind::DuplicateProperty => "DUPLICATE_PROPERTY",
            IssueKind::PropertyDeleted => "PROPERTY_DELETED",
            IssueKind::NodeDeleted => "NODE_DELETED",
            IssueKind::MissingCpusNode => "MISSING_CPUS_NODE",
            IssueKind::UnresolvedReference => "UNRESOLVED_REFERENCE",
            IssueKind::MissingMapping => "MISSING_MAPPING",
            IssueKind::UnitAddressMismatch => "UNIT_ADDRESS_MISMATCH",
            IssueKind::RequiredPropertyMissing => "REQUIRED_PROPERTY_MISSING",
        }
    }

    /// The positional message template for this kind.
    pub fn template(&self) -> &'static str {
        match self {
            IssueKind::LabelAlreadyInUse => "label '{0}' is already in use",
            IssueKind::AddressRangeCollides => {
                "reg range of '{0}' collides with sibling '{1}'"
            }
            IssueKind::DuplicateProperty => "property '{0}' is overridden by a later assignment",
            IssueKind::PropertyDeleted => "property '{0}' is deleted",
            IssueKind::NodeDeleted => "node '{0}' is deleted",
            IssueKind::MissingCpusNode => "root node requires a 'cpus' child node",
            IssueKind::UnresolvedReference => "unable to resolve reference to '{0}'",
            IssueKind::MissingMapping => {
                "address {0} of '{1}' has no mapping in the parent bus ranges"
            }
            IssueKind::UnitAddressMismatch => {
                "unit address of '{0}' has {1} words, parent declares #address-cells = {2}"
            }
            IssueKind::RequiredPropertyMissing => {
                "property '{0}' is required by node type '{1}'"
            }
        }
    }

    /// The severity this kind carries unless overridden.
    pub fn default_severity(&self) -> Severity {
        match self {
            IssueKind::LabelAlreadyInUse | IssueKind::UnresolvedReference => Severity::Error,
            IssueKind::AddressRangeCollides
            | IssueKind::MissingCpusNode
            | IssueKind::MissingMapping
            | IssueKind::UnitAddressMismatch
            | IssueKind::RequiredPropertyMissing => Severity::Warning,
            IssueKind::DuplicateProperty
            | IssueKind::PropertyDeleted
            | IssueKind::NodeDeleted => Severity::Hint,
        }
    }
}

/// One reported issue.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The stable issue kind.
    pub kind: IssueKind,
    /// The severity.
    pub severity: Severity,
    /// The primary span.
    pub span: Span,
    /// Cross-linked locations (the other side of a collision, the earlier
    /// definition, the deleting directive).
    pub related: Vec<Span>,
    /// Positional arguments for the message template.
    pub args: Vec<String>,
}

impl Diagnostic {
    /// Creates a diagnostic with the kind's default severity.
    pub fn new(kind: IssueKind, span: Span) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            span,
            related: Vec::new(),
            args: Vec::new(),
        }
    }

    /// Adds a template argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl fmt::Display) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// Adds a related location.
    #[must_use]
    pub fn with_related(mut self, span: Span) -> Self {
        self.related.push(span);
        self
    }

    /// Renders the message template with this diagnostic's arguments.
    pub fn message(&self) -> String {
        let template = self.kind.template();
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            rest = &rest[open..];
            match rest.find('}') {
                Some(close) => {
                    let idx: Option<usize> = rest[1..close].parse().ok();
                    match idx.and_then(|i| self.args.get(i)) {
                        Some(arg) => out.push_str(arg),
                        None => out.push_str(&rest[..=close]),
                    }
                    rest = &rest[close.saturating_add(1)..];
                }
                None => break,
            }
        }
        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_formatting() {
        let diag = Diagnostic::new(IssueKind::LabelAlreadyInUse, Span::dummy()).with_arg("gpio0");
        assert_eq!(diag.message(), "label 'gpio0' is already in use");
    }

    #[test]
    fn test_message_multiple_args() {
        let diag = Diagnostic::new(IssueKind::AddressRangeCollides, Span::dummy())
            .with_arg("uart@0")
            .with_arg("spi@8");
        assert_eq!(
            diag.message(),
            "reg range of 'uart@0' collides with sibling 'spi@8'"
        );
    }

    #[test]
    fn test_message_missing_arg_keeps_placeholder() {
        let diag = Diagnostic::new(IssueKind::LabelAlreadyInUse, Span::dummy());
        assert_eq!(diag.message(), "label '{0}' is already in use");
    }

    #[test]
    fn test_default_severities() {
        assert_eq!(
            IssueKind::LabelAlreadyInUse.default_severity(),
            Severity::Error
        );
        assert_eq!(
            IssueKind::DuplicateProperty.default_severity(),
            Severity::Hint
        );
        assert_eq!(
            IssueKind::AddressRangeCollides.default_severity(),
            Severity::Warning
        );
    }
}
