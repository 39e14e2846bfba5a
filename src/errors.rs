//! Error reporting with source spans.
//!
//! Uses miette for terminal error output with source code context and
//! underlines. The `Display` form of a [`CompileError`] is the stable
//! diagnostic surface: `[ERROR] (line:col) message`. Runtime failures
//! use a plain enum; the VM has no source positions to point at.

use crate::token::Span;
use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// A compile-time error (lex, parse, or type check) with source
/// location information.
#[derive(Error, Debug, Diagnostic)]
#[error("[ERROR] ({line}:{col}) {message}")]
pub struct CompileError {
    pub message: String,
    pub line: u32,
    pub col: u32,

    #[source_code]
    pub src: String,

    #[label("here")]
    pub span: SourceSpan,
}

impl CompileError {
    pub fn new(message: impl Into<String>, src: &str, span: Span, line: u32, col: u32) -> Self {
        Self {
            message: message.into(),
            line,
            col,
            src: src.to_string(),
            span: (span.start, span.end.saturating_sub(span.start)).into(),
        }
    }
}

/// A fatal error raised while executing bytecode. The VM performs no
/// unwinding; the driver prints the error and exits with code 1.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("tried to access invalid memory address {0}")]
    InvalidAddress(u64),

    #[error("cannot write to read-only memory at {0}")]
    WriteToReadOnly(u64),

    #[error("cannot delete a pointer to non-heap memory")]
    DeleteNonHeapPointer,

    #[error("stack underflow")]
    StackUnderflow,

    #[error("division by zero")]
    DivisionByZero,

    #[error("{0}")]
    AssertionFailed(String),
}
