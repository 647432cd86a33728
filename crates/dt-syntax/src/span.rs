use core::fmt;
use std::ops::Range;

use serde_derive::{Deserialize, Serialize};

/// Identifies one source file in the caller's file table.
///
/// The model never dereferences this; it only threads it through to
/// diagnostics so tooling can map a [`Span`] back to a document.
#[derive(
    Copy, Clone, Default, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct SrcId(pub u32);

/// A `[start, end)` range in one source file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    src: SrcId,
    start: usize,
    end: usize,
}

impl Span {
    /// Creates a new span.
    pub fn new(src: SrcId, start: usize, end: usize) -> Self {
        debug_assert!(
            start <= end,
            "invalid span: start ({start}) must be <= end ({end})"
        );
        Span { src, start, end }
    }

    /// A span for synthesized entities with no source position.
    pub fn dummy() -> Self {
        Self::new(SrcId(0), 0, 0)
    }

    /// Returns the source file id.
    pub fn src(&self) -> SrcId {
        self.src
    }

    /// Returns the start position.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Returns the end position.
    pub fn end(&self) -> usize {
        self.end
    }

    /// Returns the length of the span.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Reports whether the span is empty.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Merges two spans into a single covering span.
    ///
    /// Spans from different files do not merge; the left-hand span wins.
    pub fn merge(&self, other: Span) -> Span {
        if self.src != other.src {
            return *self;
        }
        Span::new(
            self.src,
            self.start.min(other.start),
            self.end.max(other.end),
        )
    }

    /// Reports whether `pos` falls inside the span.
    pub fn contains(&self, pos: usize) -> bool {
        self.start <= pos && pos < self.end
    }

    /// Converts the span into a [`Range`].
    pub fn into_range(self) -> Range<usize> {
        self.start..self.end
    }
}

impl Default for Span {
    fn default() -> Self {
        Self::dummy()
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}..{}", self.src.0, self.start, self.end)
    }
}

/// A trait for types that can provide a source span.
pub trait Spanned {
    /// Returns a span covering the contents of the item.
    fn span(&self) -> Span;
}

impl Spanned for Span {
    fn span(&self) -> Span {
        *self
    }
}

impl<T: Spanned> Spanned for &T {
    fn span(&self) -> Span {
        (**self).span()
    }
}

impl<T: Spanned> Spanned for [T] {
    fn span(&self) -> Span {
        self.iter()
            .map(Spanned::span)
            .reduce(|acc, span| acc.merge(span))
            .unwrap_or_default()
    }
}

impl<T: Spanned> Spanned for Vec<T> {
    fn span(&self) -> Span {
        self.as_slice().span()
    }
}

impl<T: Spanned> Spanned for Option<T> {
    fn span(&self) -> Span {
        self.as_ref().map(Spanned::span).unwrap_or_default()
    }
}
