// Error reporting for the Quaint compiler and VM.
// Spans are byte ranges into a single source file; rendering is Rust-style.

use colored::Colorize;
use std::fmt;

/// Source code location as a byte range, resolved to line/column on demand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn from_range(range: std::ops::Range<usize>) -> Self {
        Self {
            start: range.start,
            end: range.end,
        }
    }

    /// Join two spans into the smallest span covering both
    pub fn to(&self, other: &Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn unknown() -> Self {
        Self { start: 0, end: 0 }
    }

    /// 1-based line and column of the span start
    pub fn line_col(&self, source: &str) -> (usize, usize) {
        let upto = &source[..self.start.min(source.len())];
        let line = upto.chars().filter(|&c| c == '\n').count() + 1;
        let col = upto.rfind('\n').map_or(upto.len() + 1, |p| upto.len() - p);
        (line, col)
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    Error,
    Warning,
    Note,
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorLevel::Error => write!(f, "{}", "error".red().bold()),
            ErrorLevel::Warning => write!(f, "{}", "warning".yellow().bold()),
            ErrorLevel::Note => write!(f, "{}", "note".cyan().bold()),
        }
    }
}

/// Structured diagnostic message
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: ErrorLevel,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new(level: ErrorLevel, message: String, span: Span) -> Self {
        Self {
            level,
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorLevel::Error, message.into(), span)
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorLevel::Warning, message.into(), span)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Format in Rust style against the source the span points into
    pub fn render(&self, file: &str, source: &str) -> String {
        let (line, col) = self.span.line_col(source);
        let mut out = String::new();

        out.push_str(&format!("{}: {}\n", self.level, self.message.bold()));
        out.push_str(&format!(
            " {} {}:{}:{}\n",
            "-->".cyan().bold(),
            file,
            line,
            col
        ));

        if let Some(snippet) = self.snippet(source, line, col) {
            out.push_str(&snippet);
        }

        for note in &self.notes {
            out.push_str(&format!(" {} {}\n", "=".cyan().bold(), note.cyan()));
        }

        if let Some(help) = &self.help {
            out.push_str(&format!(" {} {}\n", "help:".green().bold(), help));
        }

        out
    }

    fn snippet(&self, source: &str, line: usize, col: usize) -> Option<String> {
        let text = source.lines().nth(line.checked_sub(1)?)?;
        let width = line.to_string().len().max(2);
        let len = (self.span.end - self.span.start).clamp(1, text.len() + 1 - col.min(text.len()));

        let mut out = String::new();
        out.push_str(&format!(" {}\n", " ".repeat(width + 1)));
        out.push_str(&format!(
            " {} {} {}\n",
            format!("{:>w$}", line, w = width).cyan().bold(),
            "|".cyan().bold(),
            text
        ));
        out.push_str(&format!(
            " {} {}{}{}\n",
            " ".repeat(width + 1),
            "|".cyan().bold(),
            " ".repeat(col),
            "^".repeat(len).red().bold()
        ));
        Some(out)
    }
}

/// Diagnostic collection engine shared by the compiler phases
#[derive(Debug, Default)]
pub struct DiagnosticEngine {
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
    warning_count: usize,
}

impl DiagnosticEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, diagnostic: Diagnostic) {
        match diagnostic.level {
            ErrorLevel::Error => self.error_count += 1,
            ErrorLevel::Warning => self.warning_count += 1,
            ErrorLevel::Note => {}
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn emit_error(&mut self, message: impl Into<String>, span: Span) {
        self.emit(Diagnostic::error(message, span));
    }

    pub fn emit_warning(&mut self, message: impl Into<String>, span: Span) {
        self.emit(Diagnostic::warning(message, span));
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Print all diagnostics to stderr
    pub fn print_all(&self, file: &str, source: &str) {
        for diag in &self.diagnostics {
            eprintln!("{}", diag.render(file, source));
        }
    }

    pub fn print_summary(&self) {
        if self.error_count > 0 {
            eprintln!(
                "{}: {} error{} emitted",
                "error".red().bold(),
                self.error_count,
                if self.error_count == 1 { "" } else { "s" }
            );
        }
    }
}

/// Fuzzy matching for "did you mean?" suggestions
pub mod fuzzy {
    use strsim::jaro_winkler;

    /// Up to `max_suggestions` candidate names with similarity > threshold,
    /// best first
    pub fn find_similar_names(
        target: &str,
        candidates: &[String],
        threshold: f64,
        max_suggestions: usize,
    ) -> Vec<String> {
        let mut scored: Vec<(String, f64)> = candidates
            .iter()
            .map(|candidate| (candidate.clone(), jaro_winkler(target, candidate)))
            .filter(|(_, score)| *score > threshold)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(max_suggestions)
            .map(|(name, _)| name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_col() {
        let source = "ab\ncde\nf";
        assert_eq!(Span::new(0, 1).line_col(source), (1, 1));
        assert_eq!(Span::new(4, 5).line_col(source), (2, 2));
        assert_eq!(Span::new(7, 8).line_col(source), (3, 1));
    }

    #[test]
    fn test_render_contains_location() {
        let source = "x: u32 = y;\n";
        let diag = Diagnostic::error("undefined symbol", Span::new(9, 10))
            .with_help("did you mean `x`?".to_string());
        let rendered = diag.render("test.qn", source);
        assert!(rendered.contains("test.qn:1:10"));
        assert!(rendered.contains("undefined symbol"));
    }

    #[test]
    fn test_engine_counts() {
        let mut engine = DiagnosticEngine::new();
        engine.emit_error("one", Span::unknown());
        engine.emit_warning("two", Span::unknown());
        assert!(engine.has_errors());
        assert_eq!(engine.error_count(), 1);
        assert_eq!(engine.warning_count(), 1);
    }

    #[test]
    fn test_fuzzy_suggestions() {
        let candidates = vec![
            "monotime".to_string(),
            "malloc".to_string(),
            "counter".to_string(),
        ];
        let found = fuzzy::find_similar_names("montime", &candidates, 0.7, 3);
        assert_eq!(found.first().map(String::as_str), Some("monotime"));
    }
}
