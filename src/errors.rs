//! Compile errors, tracebacks and their terminal rendering.
//!
//! This module provides:
//! - The `CompileError` taxonomy raised by the type table, mangler and solver
//! - `SolveError`, a compile error plus the call chain it unwound through
//! - ANSI color support
//! - Levenshtein distance for "did you mean?" suggestions
//! - Source snippet formatting with carets/underlines

use thiserror::Error;

use crate::anchor::{Anchor, SourceMap, Span};
use crate::session::Session;

// ============================================================================
// Error Taxonomy
// ============================================================================

/// Broad class of a compile error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// User-facing error anchored to a source position
    Location,
    /// Stack or recursion budget exhausted
    Resource,
    /// Corrupt graph; not recoverable by the user
    Internal,
}

/// A secondary location attached to an error
#[derive(Debug, Clone, PartialEq)]
pub struct Related {
    pub anchor: Anchor,
    pub note: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("{message}")]
    Location {
        message: String,
        anchor: Anchor,
        related: Vec<Related>,
        suggestions: Vec<String>,
    },
    #[error("stack overflow during specialization ({used} bytes used, limit is {limit})")]
    StackOverflow {
        anchor: Anchor,
        used: usize,
        limit: usize,
    },
    #[error("maximum number of recursions exceeded ({limit})")]
    MaxRecursions { anchor: Anchor, limit: usize },
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

pub type CompileResult<T> = Result<T, CompileError>;

impl CompileError {
    pub fn location(anchor: Anchor, message: impl Into<String>) -> Self {
        CompileError::Location {
            message: message.into(),
            anchor,
            related: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CompileError::Internal(message.into())
    }

    /// Attach a secondary anchor; only location errors carry them
    pub fn with_related(self, anchor: Anchor, note: impl Into<String>) -> Self {
        match self {
            CompileError::Location {
                message,
                anchor: primary,
                mut related,
                suggestions,
            } => {
                related.push(Related {
                    anchor,
                    note: note.into(),
                });
                CompileError::Location {
                    message,
                    anchor: primary,
                    related,
                    suggestions,
                }
            }
            other => other,
        }
    }

    pub fn with_suggestions(self, new: Vec<String>) -> Self {
        match self {
            CompileError::Location {
                message,
                anchor,
                related,
                ..
            } => CompileError::Location {
                message,
                anchor,
                related,
                suggestions: new,
            },
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::Location { .. } => ErrorKind::Location,
            CompileError::StackOverflow { .. } | CompileError::MaxRecursions { .. } => {
                ErrorKind::Resource
            }
            CompileError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn anchor(&self) -> Option<Anchor> {
        match self {
            CompileError::Location { anchor, .. }
            | CompileError::StackOverflow { anchor, .. }
            | CompileError::MaxRecursions { anchor, .. } => Some(*anchor),
            CompileError::Internal(_) => None,
        }
    }

    pub fn related(&self) -> &[Related] {
        match self {
            CompileError::Location { related, .. } => related,
            _ => &[],
        }
    }

    fn hint(&self) -> Option<&'static str> {
        match self {
            CompileError::MaxRecursions { .. } => Some(
                "a compile-time constant keeps changing on every recursive call; \
                 erase it with `unconst` so the function is specialized only once",
            ),
            _ => None,
        }
    }
}

/// One label the error unwound through
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEntry {
    pub anchor: Anchor,
    pub label: String,
}

/// Error returned by a toplevel `solve`, with the call chain that led to it
#[derive(Error, Debug, Clone)]
#[error("{error}")]
pub struct SolveError {
    #[source]
    pub error: CompileError,
    /// Innermost label first
    pub traceback: Vec<TraceEntry>,
}

impl SolveError {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

// ============================================================================
// Colors and Display Configuration
// ============================================================================

/// ANSI color codes for terminal output
#[derive(Debug, Clone)]
pub struct Colors {
    pub enabled: bool,
}

impl Colors {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn red(&self) -> &'static str {
        if self.enabled { "\x1b[31m" } else { "" }
    }

    pub fn cyan(&self) -> &'static str {
        if self.enabled { "\x1b[36m" } else { "" }
    }

    pub fn yellow(&self) -> &'static str {
        if self.enabled { "\x1b[33m" } else { "" }
    }

    pub fn bold(&self) -> &'static str {
        if self.enabled { "\x1b[1m" } else { "" }
    }

    pub fn reset(&self) -> &'static str {
        if self.enabled { "\x1b[0m" } else { "" }
    }
}

impl Default for Colors {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Configuration for error display
#[derive(Debug, Clone, Default)]
pub struct ErrorConfig {
    pub colors: Colors,
    /// Skip the traceback section
    pub hide_traceback: bool,
}

impl ErrorConfig {
    pub fn new(use_color: bool) -> Self {
        Self {
            colors: Colors::new(use_color),
            hide_traceback: false,
        }
    }

    pub fn without_traceback(mut self) -> Self {
        self.hide_traceback = true;
        self
    }
}

// ============================================================================
// Levenshtein Distance for "Did you mean?" suggestions
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        cur[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Up to 3 candidates within `max_distance`, closest first.
pub fn find_similar<'a>(
    name: &str,
    candidates: impl IntoIterator<Item = &'a str>,
    max_distance: usize,
) -> Vec<String> {
    let mut suggestions: Vec<(String, usize)> = candidates
        .into_iter()
        .filter_map(|c| {
            let dist = levenshtein_distance(name, c);
            if dist > 0 && dist <= max_distance {
                Some((c.to_string(), dist))
            } else {
                None
            }
        })
        .collect();

    suggestions.sort_by(|(a, da), (b, db)| da.cmp(db).then_with(|| a.cmp(b)));
    suggestions.dedup();
    suggestions.into_iter().map(|(s, _)| s).take(3).collect()
}

// ============================================================================
// Source Snippet Formatting
// ============================================================================

/// Format a source line with line number and caret underline.
///
/// ```text
/// 12 | (add2 x "hello")
///              ^^^^^^^
/// ```
pub fn format_snippet(source_map: &SourceMap, span: &Span, colors: &Colors) -> String {
    let loc = source_map.locate(span);
    let line_text = source_map.line(loc.start.line).unwrap_or("");
    let gutter = format!("{}", loc.start.line);

    let mut out = format!(
        "{}{} |{} {}\n",
        colors.cyan(),
        gutter,
        colors.reset(),
        line_text
    );

    let padding = " ".repeat(gutter.len() + 3 + loc.start.column - 1);
    let underline = if loc.start.line == loc.end.line {
        "^".repeat(loc.end.column.saturating_sub(loc.start.column).max(1))
    } else {
        "^".to_string()
    };
    out.push_str(&format!(
        "{}{}{}{}",
        padding,
        colors.red(),
        underline,
        colors.reset()
    ));
    out
}

pub fn format_suggestions(suggestions: &[String], colors: &Colors) -> String {
    match suggestions {
        [] => String::new(),
        [one] => format!("\n\nDid you mean {}{}{}?", colors.bold(), one, colors.reset()),
        many => {
            let formatted: Vec<String> = many
                .iter()
                .map(|s| format!("{}{}{}", colors.bold(), s, colors.reset()))
                .collect();
            format!("\n\nDid you mean one of: {}?", formatted.join(", "))
        }
    }
}

/// "-- SPECIALIZATION ERROR -------------------------------------"
pub fn format_header(error_kind: &str, colors: &Colors) -> String {
    let dashes = "-".repeat(60usize.saturating_sub(error_kind.len() + 4));
    format!(
        "{}-- {} {}{}",
        colors.cyan(),
        error_kind,
        dashes,
        colors.reset()
    )
}

/// "main.sc:12:15", or `<unknown>` for synthesized anchors
pub fn format_location(session: &Session, anchor: &Anchor, colors: &Colors) -> String {
    let place = match anchor.source.and_then(|id| session.source(id)) {
        Some(map) => format!("{}:{}", map.name(), map.position(anchor.span.start)),
        None => "<unknown>".to_string(),
    };
    format!("{}{}{}", colors.bold(), place, colors.reset())
}

fn format_anchor_block(session: &Session, anchor: &Anchor, colors: &Colors) -> String {
    let mut out = format_location(session, anchor, colors);
    if let Some(map) = anchor.source.and_then(|id| session.source(id)) {
        out.push('\n');
        out.push_str(&format_snippet(map, &anchor.span, colors));
    }
    out
}

fn header_for(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Location => "SPECIALIZATION ERROR",
        ErrorKind::Resource => "RESOURCE ERROR",
        ErrorKind::Internal => "INTERNAL ERROR",
    }
}

/// Render a solve failure the way the driver prints it
pub fn format_solve_error(session: &Session, err: &SolveError, config: &ErrorConfig) -> String {
    let colors = &config.colors;
    let mut out = format_header(header_for(err.kind()), colors);
    out.push_str("\n\n");

    if let Some(anchor) = err.error.anchor() {
        out.push_str(&format_anchor_block(session, &anchor, colors));
        out.push_str("\n\n");
    }
    out.push_str(&format!("{}error:{} {}", colors.red(), colors.reset(), err.error));

    for related in err.error.related() {
        out.push_str(&format!("\n\n{}:\n", related.note));
        out.push_str(&format_anchor_block(session, &related.anchor, colors));
    }
    if let CompileError::Location { suggestions, .. } = &err.error {
        out.push_str(&format_suggestions(suggestions, colors));
    }
    if let Some(hint) = err.error.hint() {
        out.push_str(&format!("\n\n{}hint:{} {}", colors.yellow(), colors.reset(), hint));
    }

    if !config.hide_traceback && !err.traceback.is_empty() {
        out.push_str("\n\ntraceback (innermost last):");
        for entry in err.traceback.iter().rev() {
            out.push_str(&format!(
                "\n  in {} at {}",
                entry.label,
                format_location(session, &entry.anchor, colors)
            ));
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
