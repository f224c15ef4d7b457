//! Recoverable compile errors. Internal invariant violations panic instead.

use lode_codegen_wasm::WasmError;
use lode_syntax::{Diagnostic, LayoutError, ResolveError, Span};
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Hlir,
    Mlir,
    Wasm,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Hlir => "hlir",
            Stage::Mlir => "mlir",
            Stage::Wasm => "wasm",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("undefined function `{0}`")]
    UndefinedFunction(String),
    #[error("`{name}` resolves to {count} signatures; multiple dispatch is not supported")]
    AmbiguousCall { name: String, count: usize },
    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),
    #[error("condition must be boolean, found {0}")]
    NonBooleanCondition(String),
    #[error("{context}: expected {expected} value(s), found {found}")]
    Arity {
        context: String,
        expected: usize,
        found: usize,
    },
    #[error("enum `{enum_name}` has no constructor `{constructor}`")]
    UnknownConstructor {
        enum_name: String,
        constructor: String,
    },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Wasm(#[from] WasmError),
}

impl From<ResolveError> for ErrorKind {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::Undefined(name) => ErrorKind::UndefinedFunction(name),
            ResolveError::Ambiguous { name, count } => ErrorKind::AmbiguousCall { name, count },
        }
    }
}

impl ErrorKind {
    pub fn arity(context: impl Into<String>, expected: usize, found: usize) -> Self {
        ErrorKind::Arity {
            context: context.into(),
            expected,
            found,
        }
    }
}

/// An error tied to the function and stage that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{stage} lowering of `{function}` failed: {kind}")]
pub struct CompileError {
    pub function: String,
    pub stage: Stage,
    pub kind: ErrorKind,
    pub span: Span,
}

impl CompileError {
    pub fn new(function: impl Into<String>, stage: Stage, kind: ErrorKind) -> Self {
        Self {
            function: function.into(),
            stage,
            kind,
            span: Span::default(),
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(format!("{} ({})", self.kind, self.stage))
            .in_function(self.function.clone())
            .at(self.span)
    }
}

impl From<CompileError> for Diagnostic {
    fn from(e: CompileError) -> Self {
        e.to_diagnostic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_name_function_and_stage() {
        let err = CompileError::new(
            "main",
            Stage::Hlir,
            ResolveError::Undefined("frob".to_string()).into(),
        )
        .at(Span::new(4, 8));
        let diag = err.to_diagnostic();
        assert_eq!(
            diag.to_string(),
            "error in `main` at 4..8: undefined function `frob` (hlir)"
        );
        assert_eq!(
            err.to_string(),
            "hlir lowering of `main` failed: undefined function `frob`"
        );
    }
}
