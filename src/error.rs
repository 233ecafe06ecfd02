// ABOUTME: Error kinds shared by the lexer, parser, evaluator and VM

use crate::token::Span;
use thiserror::Error;

pub const ARITY_ONE: &str = "1";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("undefined name '{0}'")]
    NameError(String),

    #[error("{function}: expected {expected}, got {actual} (argument {position})")]
    TypeError {
        function: String,
        expected: String,
        actual: String,
        position: usize,
    },

    #[error("{function}: expected {expected} argument{}, got {actual}", if *.expected == "1" { "" } else { "s" })]
    ArityError {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("index {index} out of range for list of length {len}")]
    IndexError { index: String, len: usize },

    #[error("division by zero")]
    DivideByZero,

    #[error("{function}: {message}")]
    ValueError { function: String, message: String },

    #[error("import error: {message}")]
    ImportError { message: String },

    #[error("stack overflow: recursion depth exceeded {limit}")]
    StackOverflow { limit: usize },
}

impl ErrorKind {
    pub fn type_mismatch(function: &str, expected: &str, actual: &str, position: usize) -> Self {
        ErrorKind::TypeError {
            function: function.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
            position,
        }
    }

    pub fn arity(function: &str, expected: impl Into<String>, actual: usize) -> Self {
        ErrorKind::ArityError {
            function: function.to_string(),
            expected: expected.into(),
            actual,
        }
    }

    pub fn value_error(function: &str, message: impl Into<String>) -> Self {
        ErrorKind::ValueError {
            function: function.to_string(),
            message: message.into(),
        }
    }

    /// Short, stable name used in stderr rendering and in tests that assert
    /// evaluator/VM error-kind parity.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::NameError(_) => "NameError",
            ErrorKind::TypeError { .. } => "TypeError",
            ErrorKind::ArityError { .. } => "ArityError",
            ErrorKind::IndexError { .. } => "IndexError",
            ErrorKind::DivideByZero => "DivideByZero",
            ErrorKind::ValueError { .. } => "ValueError",
            ErrorKind::ImportError { .. } => "ImportError",
            ErrorKind::StackOverflow { .. } => "StackOverflow",
        }
    }
}

/// One entry in a runtime stack trace: the function the call was in, and the
/// span of the call site (or the raising expression for the innermost frame).
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub function: String,
    pub span: Span,
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("{kind}")]
pub struct PyRafError {
    pub kind: ErrorKind,
    pub span: Span,
    pub trace: Vec<Frame>,
}

impl PyRafError {
    pub fn new(kind: ErrorKind, span: Span) -> Self {
        PyRafError {
            kind,
            span,
            trace: Vec::new(),
        }
    }

    pub fn with_trace(mut self, trace: Vec<Frame>) -> Self {
        self.trace = trace;
        self
    }

    /// Render the way the host CLI prints an uncaught error: kind, message,
    /// then innermost-frame-first stack trace.
    pub fn render(&self, source_name: &str) -> String {
        let mut out = format!("{}: {}", self.kind.label(), self.kind);
        out.push('\n');
        for frame in &self.trace {
            out.push_str(&format!(
                "  at {} ({}:{}:{})\n",
                frame.function, source_name, frame.span.line, frame.span.col
            ));
        }
        out.push_str(&format!("  at <script> ({}:{}:{})", source_name, self.span.line, self.span.col));
        out
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LoadError {
    #[error(transparent)]
    Lex(#[from] crate::lexer::LexError),
    #[error(transparent)]
    Parse(#[from] crate::parser::ParseError),
    #[error(transparent)]
    Runtime(#[from] PyRafError),
    #[error("could not read '{path}': {message}")]
    Io { path: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_message_pluralizes() {
        let err = ErrorKind::arity("f", "1", 2);
        assert_eq!(err.to_string(), "f: expected 1 argument, got 2");
        let err = ErrorKind::arity("f", "2", 1);
        assert_eq!(err.to_string(), "f: expected 2 arguments, got 1");
    }

    #[test]
    fn label_matches_kind() {
        assert_eq!(ErrorKind::DivideByZero.label(), "DivideByZero");
        assert_eq!(ErrorKind::NameError("x".into()).label(), "NameError");
    }
}
