//! Session-wide compiler state.
//!
//! Two tables outlive any single top-level unit: the operator-precedence
//! table the parser consults (and extends, when a `binary` definition is
//! read) and the registry of every function signature seen so far, which
//! the code generator uses to resolve forward references. Both live in a
//! [CompilationSession] that callers pass into the parser and the code
//! generator, so independent sessions are fully isolated from each other.

use std::collections::HashMap;

use tracing::debug;

use crate::ast::{Ident, Prototype};

#[derive(Debug, Clone)]
pub struct CompilationSession {
    precedence: HashMap<char, u32>,
    prototypes: HashMap<Ident, Prototype>,
}

/// A prototype redeclaration that disagrees with the parameter count on
/// record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArityConflict {
    pub expected: usize,
    pub found: usize,
}

impl CompilationSession {
    /// A fresh session, seeded with the built-in binary operators.
    /// Precedence 1 is the weakest binding.
    pub fn new() -> Self {
        let precedence = HashMap::from([('=', 2), ('<', 10), ('+', 20), ('-', 20), ('*', 40)]);
        Self {
            precedence,
            prototypes: HashMap::new(),
        }
    }

    /// Binding strength of `op`, or `None` if it is not an infix operator
    /// in the current state of the session.
    pub fn precedence(&self, op: char) -> Option<u32> {
        self.precedence.get(&op).copied()
    }

    /// Install or override an infix operator. Called by the parser as soon
    /// as a `binary` prototype has been read.
    pub fn install_operator(&mut self, op: char, precedence: u32) {
        debug!(%op, precedence, "installing binary operator");
        self.precedence.insert(op, precedence);
    }

    /// The signature most recently recorded for `name`.
    pub fn prototype(&self, name: &str) -> Option<&Prototype> {
        self.prototypes.get(name)
    }

    /// Record `proto` as the current signature for its name.
    ///
    /// Re-registration is allowed as long as the parameter count is
    /// unchanged (an `extern` matching a later `def` is the common case);
    /// on a conflict the entry on record is kept.
    pub fn register_prototype(&mut self, proto: Prototype) -> Result<(), ArityConflict> {
        if let Some(existing) = self.prototypes.get(&proto.name) {
            if existing.params.len() != proto.params.len() {
                return Err(ArityConflict {
                    expected: existing.params.len(),
                    found: proto.params.len(),
                });
            }
        }
        self.prototypes.insert(proto.name.clone(), proto);
        Ok(())
    }
}

impl Default for CompilationSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Fixity;
    use crate::SourceLocation;

    fn proto(name: &str, params: &[&str]) -> Prototype {
        Prototype {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            fixity: Fixity::Function,
            loc: SourceLocation { line: 1, col: 1 },
        }
    }

    #[test]
    fn builtin_operators_are_seeded() {
        let session = CompilationSession::new();
        assert_eq!(session.precedence('*'), Some(40));
        assert_eq!(session.precedence('+'), Some(20));
        assert_eq!(session.precedence('-'), Some(20));
        assert_eq!(session.precedence('<'), Some(10));
        assert_eq!(session.precedence('='), Some(2));
        assert_eq!(session.precedence('^'), None);
    }

    #[test]
    fn installing_overrides_precedence() {
        let mut session = CompilationSession::new();
        session.install_operator('^', 50);
        assert_eq!(session.precedence('^'), Some(50));
        session.install_operator('^', 5);
        assert_eq!(session.precedence('^'), Some(5));
    }

    #[test]
    fn identical_signature_registers_twice() {
        let mut session = CompilationSession::new();
        session.register_prototype(proto("foo", &["a"])).unwrap();
        session.register_prototype(proto("foo", &["b"])).unwrap();
        assert_eq!(session.prototype("foo").unwrap().params, vec!["b"]);
    }

    #[test]
    fn conflicting_arity_keeps_the_original_entry() {
        let mut session = CompilationSession::new();
        session.register_prototype(proto("foo", &["a"])).unwrap();

        let err = session
            .register_prototype(proto("foo", &["a", "b"]))
            .unwrap_err();
        assert_eq!(
            err,
            ArityConflict {
                expected: 1,
                found: 2
            }
        );
        assert_eq!(session.prototype("foo").unwrap().params, vec!["a"]);
    }
}
