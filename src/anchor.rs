//! Source anchors for labels, bodies and diagnostics
//!
//! The expander attaches an `Anchor` to every label and call it produces.
//! Anchors point into sources registered with the session, so errors raised
//! deep inside the solver can still render the offending line.

use std::fmt;

/// Byte range inside a registered source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(&self, other: &Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Human-readable source position (1-indexed line and column)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// 1-indexed line number
    pub line: usize,
    /// 1-indexed column number (in characters, not bytes)
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A span with start and end positions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedSpan {
    pub start: Position,
    pub end: Position,
}

impl fmt::Display for LocatedSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start.line == self.end.line {
            write!(
                f,
                "{}:{}-{}",
                self.start.line, self.start.column, self.end.column
            )
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Maps byte offsets to line:column positions.
///
/// Line boundaries are computed once, so lookups are a binary search.
#[derive(Debug, Clone)]
pub struct SourceMap {
    name: String,
    source: String,
    /// Byte offset of the start of each line; `line_starts[0] == 0`
    line_starts: Vec<usize>,
}

impl SourceMap {
    pub fn new(name: impl Into<String>, source: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, c) in source.char_indices() {
            if c == '\n' {
                line_starts.push(i + 1);
            }
        }
        Self {
            name: name.into(),
            source: source.to_string(),
            line_starts,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Convert a byte offset to a Position (1-indexed line and column)
    pub fn position(&self, byte_offset: usize) -> Position {
        let byte_offset = byte_offset.min(self.source.len());
        let line_idx = match self.line_starts.binary_search(&byte_offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        let line_start = self.line_starts[line_idx];
        let column = self.source[line_start..byte_offset].chars().count() + 1;
        Position {
            line: line_idx + 1,
            column,
        }
    }

    pub fn locate(&self, span: &Span) -> LocatedSpan {
        LocatedSpan {
            start: self.position(span.start),
            end: self.position(span.end),
        }
    }

    /// Text of a line (1-indexed), without the trailing newline
    pub fn line(&self, line_num: usize) -> Option<&str> {
        if line_num == 0 || line_num > self.line_starts.len() {
            return None;
        }
        let line_idx = line_num - 1;
        let start = self.line_starts[line_idx];
        let end = if line_idx + 1 < self.line_starts.len() {
            self.line_starts[line_idx + 1] - 1
        } else {
            self.source.len()
        };
        Some(self.source[start..end].trim_end_matches('\r'))
    }

    pub fn span_text(&self, span: &Span) -> &str {
        let end = span.end.min(self.source.len());
        &self.source[span.start.min(end)..end]
    }
}

/// Handle of a source registered with the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u32);

/// A position in user code that errors and tracebacks can point at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Anchor {
    pub source: Option<SourceId>,
    pub span: Span,
}

impl Anchor {
    pub fn new(source: SourceId, span: Span) -> Self {
        Self {
            source: Some(source),
            span,
        }
    }

    /// Anchor for entities synthesized without a source location
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_unknown(&self) -> bool {
        self.source.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_lookup() {
        let map = SourceMap::new("t.sc", "fn f (x)\n  f (+ x 1)\n");
        assert_eq!(map.position(0), Position::new(1, 1));
        assert_eq!(map.position(11), Position::new(2, 3));
        assert_eq!(map.line(2), Some("  f (+ x 1)"));
        assert_eq!(map.line(9), None);
    }

    #[test]
    fn test_span_text_clamps() {
        let map = SourceMap::new("t.sc", "abc");
        assert_eq!(map.span_text(&Span::new(1, 10)), "bc");
    }

    #[test]
    fn test_unknown_anchor() {
        assert!(Anchor::unknown().is_unknown());
        assert!(!Anchor::new(SourceId(0), Span::new(0, 1)).is_unknown());
    }
}
