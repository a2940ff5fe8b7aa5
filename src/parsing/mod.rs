//! Parsing
//!
//! This module is responsible for turning source code from its string form
//! into AST units. Internally it works in two phases:
//! - the [lexer] scans the source text and produces one token at a time
//! - the [parser] pulls those tokens and builds the AST by recursive
//!   descent, with precedence climbing for binary expressions
//!
//! Unlike a whole-program parser, [Parser] yields one top-level unit per
//! call, so a driver can lower each unit before reading the next and keep
//! going after a failed one.

use miette::Diagnostic;
use thiserror::Error;

use crate::ast::Item;
use crate::session::CompilationSession;
use crate::Span;

mod lexer;
mod parser;

pub use lexer::Token;
pub use parser::Parser;

#[derive(Debug, Error, Diagnostic)]
pub enum ParsingError {
    #[error("Expected {expected} but found {found}")]
    UnexpectedToken {
        expected: String,
        found: String,

        #[label("here")]
        span: Span,
    },

    #[error("Unknown token when expecting an expression: {found}")]
    ExpectedExpression {
        found: String,

        #[label("not the start of an expression")]
        span: Span,
    },

    #[error("Invalid precedence {value}; must be between 1 and 100")]
    InvalidPrecedence {
        value: f64,

        #[label("declared here")]
        span: Span,
    },

    #[error("Operator definitions take exactly {expected} operands, found {found}")]
    InvalidOperandCount {
        expected: usize,
        found: usize,

        #[label("in this prototype")]
        span: Span,
    },
}

/// Parse an entire source string into its top-level units.
///
/// Stops at the first syntax error; callers that want recovery drive a
/// [Parser] directly.
pub fn parse(source: &str, session: &mut CompilationSession) -> Result<Vec<Item>, ParsingError> {
    let mut parser = Parser::new(source);
    let mut items = Vec::new();
    while let Some(item) = parser.next_item(session)? {
        items.push(item);
    }
    Ok(items)
}
