//! Fragments: renderable spans of a document

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// The kinds of fragment the engine knows how to preview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FragmentKind {
    InlineMath,
    BlockMath,
    Table,
    Image,
}

impl FragmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentKind::InlineMath => "inline-math",
            FragmentKind::BlockMath => "block-math",
            FragmentKind::Table => "table",
            FragmentKind::Image => "image",
        }
    }

    /// Whether fragments of this kind are typeset through the external renderer
    pub fn is_typeset(&self) -> bool {
        !matches!(self, FragmentKind::Image)
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Positional identity of a fragment within a document.
///
/// Fragments are re-parsed on every operation, so the only identity that
/// survives between calls is where the fragment starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FragmentKey(pub usize);

/// A parsed span of a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub kind: FragmentKind,
    /// Start of the whole span, delimiters included
    pub begin: usize,
    /// Start of the content, delimiters excluded
    pub begin_content: usize,
    /// End of the content, delimiters excluded
    pub end_content: usize,
    /// End of the whole span, delimiters included
    pub end: usize,
    /// `document[begin..end]`
    pub source: String,
}

impl Fragment {
    /// Build a fragment over `document`, validating the span ordering
    pub fn new(
        document: &str,
        kind: FragmentKind,
        span: Range<usize>,
        content: Range<usize>,
    ) -> Result<Self, ParseError> {
        let ordered = span.start <= content.start
            && content.start <= content.end
            && content.end <= span.end
            && span.end <= document.len();
        let on_boundaries = ordered
            && [span.start, content.start, content.end, span.end]
                .iter()
                .all(|&i| document.is_char_boundary(i));

        if !on_boundaries {
            return Err(ParseError::InvalidSpan {
                kind,
                begin: span.start,
                begin_content: content.start,
                end_content: content.end,
                end: span.end,
            });
        }

        Ok(Self {
            kind,
            begin: span.start,
            begin_content: content.start,
            end_content: content.end,
            end: span.end,
            source: document[span.clone()].to_string(),
        })
    }

    #[must_use]
    pub fn key(&self) -> FragmentKey {
        FragmentKey(self.begin)
    }

    /// The content between the delimiters
    #[must_use]
    pub fn content(&self) -> &str {
        let start = self.begin_content - self.begin;
        let end = self.end_content - self.begin;
        &self.source[start..end]
    }

    /// Empty (after trimming) math and tables are never sent to the renderer
    #[must_use]
    pub fn is_renderable(&self) -> bool {
        !self.content().trim().is_empty()
    }

    #[must_use]
    pub fn span(&self) -> Range<usize> {
        self.begin..self.end
    }

    #[must_use]
    pub fn contains(&self, offset: usize) -> bool {
        self.begin <= offset && offset < self.end
    }
}
