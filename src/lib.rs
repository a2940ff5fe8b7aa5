//! A compiler front end for the Kaleidoscope language.
//!
//! The pipeline is driven one top-level unit at a time:
//! - the [parsing] module lexes and parses source text into AST units
//! - the [ast] module defines the tree those units are made of
//! - the [Codegen] lowers each unit into an LLVM module via inkwell
//!
//! State that must outlive a single unit (the operator-precedence table and
//! the function-signature registry) lives in a [CompilationSession] that is
//! threaded through both the parser and the code generator, so independent
//! compilations can run side by side.

pub mod ast;
mod codegen;
mod debug;
mod parsing;
mod session;

pub use codegen::{Codegen, CodegenError};
pub use debug::{DebugEventSink, NoopDebugSink};
pub use parsing::{parse, Parser, ParsingError, Token};
pub use session::{ArityConflict, CompilationSession};

/// A line/column position in the source text, 1-based.
///
/// Every AST node is stamped with the location of the token that introduced
/// it, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub col: u32,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A byte range in the source text, used to label diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

impl From<Span> for miette::SourceSpan {
    fn from(span: Span) -> Self {
        (span.start, span.end - span.start).into()
    }
}
