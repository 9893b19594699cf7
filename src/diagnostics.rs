use std::fmt;

use thiserror::Error;

/// Represents a byte span within a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

impl SourceSpan {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// 1-based line and column of the span start within `source`.
    pub fn position(&self, source: &str) -> (usize, usize) {
        let start = self.start.min(source.len());
        let prefix = &source[..floor_char_boundary(source, start)];
        let line = prefix.bytes().filter(|b| *b == b'\n').count() + 1;
        let column = match prefix.rfind('\n') {
            Some(idx) => prefix[idx + 1..].chars().count() + 1,
            None => prefix.chars().count() + 1,
        };
        (line, column)
    }

    /// A trimmed window of up to 30 characters on either side of the span
    /// start, cut at line boundaries, for inline display.
    pub fn snippet(&self, source: &str) -> String {
        let at = floor_char_boundary(source, self.start.min(source.len()));
        let line_start = source[..at].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line_end = source[at..]
            .find('\n')
            .map(|i| at + i)
            .unwrap_or(source.len());
        let mut left = at;
        for _ in 0..30 {
            if left <= line_start {
                break;
            }
            left -= 1;
            while !source.is_char_boundary(left) {
                left -= 1;
            }
        }
        let mut right = at;
        for _ in 0..30 {
            if right >= line_end {
                break;
            }
            right += 1;
            while !source.is_char_boundary(right) {
                right += 1;
            }
        }
        source[left..right.min(line_end)].trim().to_string()
    }
}

fn floor_char_boundary(source: &str, mut index: usize) -> usize {
    while index > 0 && !source.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Classification of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Malformed tokens, unbalanced delimiters, unexpected token kinds.
    Syntax,
    /// Redeclaration, constant reassignment, undeclared names.
    Declaration,
    /// Wrong operand or argument type.
    Type,
    /// Unknown function, namespace, variable, or member.
    Resolution,
    /// Failures inside the expression evaluator.
    Expression,
}

impl DiagnosticKind {
    fn label(&self) -> &'static str {
        match self {
            DiagnosticKind::Syntax => "syntax",
            DiagnosticKind::Declaration => "declaration",
            DiagnosticKind::Type => "type",
            DiagnosticKind::Resolution => "resolution",
            DiagnosticKind::Expression => "expression",
        }
    }
}

/// Rich diagnostic information surfaced to end users.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Option<SourceSpan>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            notes: Vec::new(),
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Syntax, message)
    }

    pub fn declaration(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Declaration, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Type, message)
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Resolution, message)
    }

    pub fn expression(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Expression, message)
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Full rendering against the originating source, with file, line,
    /// column, and the surrounding snippet.
    pub fn render(&self, filename: &str, source: &str) -> String {
        let mut out = format!("error[{}]: {}", self.kind.label(), self.message);
        if let Some(span) = self.span {
            let (line, column) = span.position(source);
            out.push_str(&format!("\n --> {filename}:{line}:{column}"));
            let snippet = span.snippet(source);
            if !snippet.is_empty() {
                out.push_str(&format!("\n  | {snippet}"));
            }
        }
        for note in &self.notes {
            out.push_str(&format!("\n  note: {note}"));
        }
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error[{}]: {}", self.kind.label(), self.message)?;
        if let Some(span) = self.span {
            write!(f, " ({}..{})", span.start, span.end)?;
        }
        if !self.notes.is_empty() {
            writeln!(f)?;
            for note in &self.notes {
                writeln!(f, "  note: {note}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Unified error type for the Oleander toolchain.
#[derive(Debug, Error)]
pub enum OleanderError {
    #[error("{0}")]
    Diagnostic(#[from] Diagnostic),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, OleanderError>;
