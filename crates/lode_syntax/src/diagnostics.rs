//! Diagnostics reported by the backend, optionally tied to a source span.

use crate::span::{FileId, Location, Span};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
    /// Function being compiled when the problem was found.
    pub function: Option<String>,
    pub location: Option<Location>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warning => "warning",
        }
    }
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            message: message.into(),
            function: None,
            location: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: Level::Warning,
            ..Self::error(message)
        }
    }

    pub fn in_function(mut self, name: impl Into<String>) -> Self {
        self.function = Some(name.into());
        self
    }

    /// Attaches a span in the entry file. Empty spans are synthesized and
    /// carry no position.
    pub fn at(mut self, span: Span) -> Self {
        if !span.is_empty() {
            self.location = Some(Location::new(FileId::default(), span));
        }
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.level.as_str())?;
        if let Some(func) = &self.function {
            write!(f, " in `{}`", func)?;
        }
        if let Some(loc) = &self.location {
            write!(f, " at {}", loc.span)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Byte offset to 1-based line and column.
pub fn offset_to_line_col(source: &str, offset: u32) -> (u32, u32) {
    let offset = (offset as usize).min(source.len());
    let before = &source[..floor_char_boundary(source, offset)];
    let line = before.matches('\n').count() as u32 + 1;
    let col = before
        .rsplit('\n')
        .next()
        .map(|l| l.chars().count())
        .unwrap_or(0) as u32
        + 1;
    (line, col)
}

fn floor_char_boundary(s: &str, mut at: usize) -> usize {
    while at > 0 && !s.is_char_boundary(at) {
        at -= 1;
    }
    at
}

/// Renders a diagnostic with the offending source line underlined when the
/// source text is available.
pub fn format_diagnostic(source: Option<&str>, path: &str, diag: &Diagnostic) -> String {
    let (source, loc) = match (source, &diag.location) {
        (Some(s), Some(l)) => (s, l),
        _ => return format!("{}: {}", path, diag),
    };
    let (line, col) = offset_to_line_col(source, loc.span.start);
    let (end_line, end_col) = offset_to_line_col(source, loc.span.end);
    let text = source
        .lines()
        .nth((line as usize).saturating_sub(1))
        .unwrap_or("");
    let width = if end_line == line && end_col > col {
        (end_col - col) as usize
    } else {
        1
    };
    let gutter = " ".repeat(line.to_string().len());
    format!(
        "{}:{}:{}: {}\n{} |\n{} | {}\n{} | {}{}",
        path,
        line,
        col,
        diag,
        gutter,
        line,
        text,
        gutter,
        " ".repeat((col as usize).saturating_sub(1)),
        "^".repeat(width)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_and_column_are_one_based() {
        let src = "func main () () {\n  PrintInt(x)\n}\n";
        assert_eq!(offset_to_line_col(src, 0), (1, 1));
        assert_eq!(offset_to_line_col(src, 20), (2, 3));
        assert_eq!(offset_to_line_col(src, 10_000).0, 4);
    }

    #[test]
    fn underlines_the_span() {
        let src = "func main () () {\n  PrintInt(x)\n}\n";
        let diag = Diagnostic::error("undefined function `PrintInt`")
            .in_function("main")
            .at(Span::new(20, 28));
        let text = format_diagnostic(Some(src), "main.lode", &diag);
        assert!(text.starts_with("main.lode:2:3: error in `main` at 20..28:"));
        assert!(text.ends_with("|   ^^^^^^^^"), "{}", text);
    }

    #[test]
    fn without_source_prints_one_line() {
        let diag = Diagnostic::error("boom").at(Span::default());
        assert_eq!(format_diagnostic(None, "a.json", &diag), "a.json: error: boom");
    }
}
