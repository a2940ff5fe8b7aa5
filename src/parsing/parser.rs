//! Recursive-descent parser with operator-precedence climbing.
//!
//! The parser holds a single token of lookahead and produces one top-level
//! unit at a time: a `def`, an `extern`, or a bare expression wrapped into
//! an anonymous function. Binary expressions are parsed by precedence
//! climbing against the session's operator table, which a `binary`
//! prototype extends the moment it is read, so a new operator is already
//! usable inside its own definition body.
//!
//! On malformed input the parser reports one error and leaves the offending
//! token in place; resynchronization (usually skipping a single token) is
//! the caller's business.

use super::lexer::{Lexer, Token};
use super::ParsingError;
use crate::ast::{Expression, ExpressionKind, Fixity, Function, Ident, Item, Prototype};
use crate::session::CompilationSession;
use crate::{SourceLocation, Span};

/// Name under which a bare top-level expression is compiled, so an emitted
/// object with one is directly linkable.
const TOP_LEVEL_NAME: &str = "main";

const DEFAULT_OPERATOR_PRECEDENCE: u32 = 30;

pub struct Parser<'src> {
    lexer: Lexer<'src>,
    current: Token,
    loc: SourceLocation,
    span: Span,
}

impl<'src> Parser<'src> {
    pub fn new(source: &'src str) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        let loc = lexer.token_location();
        let span = lexer.token_span();
        Self {
            lexer,
            current,
            loc,
            span,
        }
    }

    /// The token the parser is currently looking at.
    pub fn current_token(&self) -> &Token {
        &self.current
    }

    /// Drop the current token. Drivers call this to resynchronize after a
    /// failed unit.
    pub fn recover(&mut self) {
        self.advance();
    }

    /// Parse the next top-level unit, or `None` at end of input. Stray
    /// semicolons between units are skipped.
    pub fn next_item(
        &mut self,
        session: &mut CompilationSession,
    ) -> Result<Option<Item>, ParsingError> {
        loop {
            return match self.current {
                Token::Eof => Ok(None),
                Token::Op(';') => {
                    self.advance();
                    continue;
                }
                Token::Def => self.parse_definition(session).map(Item::Definition).map(Some),
                Token::Extern => self.parse_extern(session).map(Item::Extern).map(Some),
                _ => self
                    .parse_top_level_expr(session)
                    .map(Item::TopLevelExpr)
                    .map(Some),
            };
        }
    }

    /// definition ::= 'def' prototype expression
    pub fn parse_definition(
        &mut self,
        session: &mut CompilationSession,
    ) -> Result<Function, ParsingError> {
        self.expect(Token::Def, "'def'")?;
        let prototype = self.parse_prototype(session)?;
        let body = self.parse_expression(session)?;
        Ok(Function { prototype, body })
    }

    /// extern ::= 'extern' prototype
    pub fn parse_extern(
        &mut self,
        session: &mut CompilationSession,
    ) -> Result<Prototype, ParsingError> {
        self.expect(Token::Extern, "'extern'")?;
        self.parse_prototype(session)
    }

    /// A bare expression, wrapped into an anonymous nullary function so it
    /// goes through the ordinary code generation path.
    pub fn parse_top_level_expr(
        &mut self,
        session: &mut CompilationSession,
    ) -> Result<Function, ParsingError> {
        let loc = self.loc;
        let body = self.parse_expression(session)?;
        let prototype = Prototype {
            name: TOP_LEVEL_NAME.to_string(),
            params: Vec::new(),
            fixity: Fixity::Function,
            loc,
        };
        Ok(Function { prototype, body })
    }

    /// prototype ::= identifier '(' identifier* ')'
    ///           ::= 'unary' <op> '(' identifier ')'
    ///           ::= 'binary' <op> number? '(' identifier identifier ')'
    fn parse_prototype(
        &mut self,
        session: &mut CompilationSession,
    ) -> Result<Prototype, ParsingError> {
        let loc = self.loc;

        let (name, fixity) = match &self.current {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance();
                (name, Fixity::Function)
            }
            Token::Unary => {
                self.advance();
                let op = self.expect_operator_char()?;
                (format!("unary{op}"), Fixity::Unary(op))
            }
            Token::Binary => {
                self.advance();
                let op = self.expect_operator_char()?;
                let precedence = match self.current {
                    Token::Number(value) => {
                        if !(1.0..=100.0).contains(&value) {
                            return Err(ParsingError::InvalidPrecedence {
                                value,
                                span: self.span,
                            });
                        }
                        self.advance();
                        value as u32
                    }
                    _ => DEFAULT_OPERATOR_PRECEDENCE,
                };
                (format!("binary{op}"), Fixity::Binary { op, precedence })
            }
            _ => return Err(self.unexpected("a function name in prototype")),
        };

        self.expect_op('(', "'(' in prototype")?;
        let mut params = Vec::new();
        while let Token::Ident(param) = &self.current {
            params.push(param.clone());
            self.advance();
        }
        self.expect_op(')', "')' in prototype")?;

        match fixity {
            Fixity::Unary(_) if params.len() != 1 => {
                return Err(ParsingError::InvalidOperandCount {
                    expected: 1,
                    found: params.len(),
                    span: self.span,
                });
            }
            Fixity::Binary { .. } if params.len() != 2 => {
                return Err(ParsingError::InvalidOperandCount {
                    expected: 2,
                    found: params.len(),
                    span: self.span,
                });
            }
            _ => {}
        }

        // The operator becomes parsable as soon as its prototype has been
        // read, so it may appear inside its own definition body.
        if let Fixity::Binary { op, precedence } = fixity {
            session.install_operator(op, precedence);
        }

        Ok(Prototype {
            name,
            params,
            fixity,
            loc,
        })
    }

    /// expression ::= unary binoprhs
    pub(crate) fn parse_expression(
        &mut self,
        session: &CompilationSession,
    ) -> Result<Expression, ParsingError> {
        let lhs = self.parse_unary(session)?;
        self.parse_bin_op_rhs(session, 0, lhs)
    }

    /// binoprhs ::= (<op> unary)*
    ///
    /// Folds operator/operand pairs into `lhs` as long as the next operator
    /// binds at least as tightly as `min_prec`. The right-hand side claims
    /// only operators that bind strictly tighter, which makes operators of
    /// equal precedence left-associative.
    fn parse_bin_op_rhs(
        &mut self,
        session: &CompilationSession,
        min_prec: i32,
        mut lhs: Expression,
    ) -> Result<Expression, ParsingError> {
        loop {
            let prec = self.current_precedence(session);
            if prec < min_prec {
                return Ok(lhs);
            }

            let op = match self.current {
                Token::Op(op) => op,
                _ => return Ok(lhs),
            };
            let op_loc = self.loc;
            self.advance();

            let mut rhs = self.parse_unary(session)?;
            let next_prec = self.current_precedence(session);
            if prec < next_prec {
                rhs = self.parse_bin_op_rhs(session, prec + 1, rhs)?;
            }

            lhs = Expression::new(
                ExpressionKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                op_loc,
            );
        }
    }

    /// unary ::= primary | <op> unary
    fn parse_unary(&mut self, session: &CompilationSession) -> Result<Expression, ParsingError> {
        match self.current {
            // Any operator character that cannot start a primary expression
            // is a unary operator application.
            Token::Op(op) if op != '(' && op != ',' => {
                let loc = self.loc;
                self.advance();
                let operand = self.parse_unary(session)?;
                Ok(Expression::new(
                    ExpressionKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    loc,
                ))
            }
            _ => self.parse_primary(session),
        }
    }

    /// primary ::= number | identifierexpr | parenexpr | ifexpr | forexpr
    ///           | varexpr
    fn parse_primary(&mut self, session: &CompilationSession) -> Result<Expression, ParsingError> {
        match &self.current {
            Token::Number(value) => {
                let expr = Expression::new(ExpressionKind::Number(*value), self.loc);
                self.advance();
                Ok(expr)
            }
            Token::Ident(_) => self.parse_identifier(session),
            Token::Op('(') => {
                self.advance();
                let inner = self.parse_expression(session)?;
                self.expect_op(')', "')'")?;
                Ok(inner)
            }
            Token::If => self.parse_if(session),
            Token::For => self.parse_for(session),
            Token::Var => self.parse_var(session),
            _ => Err(ParsingError::ExpectedExpression {
                found: self.current.to_string(),
                span: self.span,
            }),
        }
    }

    /// identifierexpr ::= identifier | identifier '(' expression,* ')'
    fn parse_identifier(
        &mut self,
        session: &CompilationSession,
    ) -> Result<Expression, ParsingError> {
        let loc = self.loc;
        let name = self.expect_identifier("an identifier")?;

        if self.current != Token::Op('(') {
            return Ok(Expression::new(ExpressionKind::Variable(name), loc));
        }
        self.advance();

        let mut args = Vec::new();
        if self.current != Token::Op(')') {
            loop {
                args.push(self.parse_expression(session)?);
                if self.current == Token::Op(')') {
                    break;
                }
                self.expect_op(',', "')' or ',' in argument list")?;
            }
        }
        self.advance();

        Ok(Expression::new(
            ExpressionKind::Call { callee: name, args },
            loc,
        ))
    }

    /// ifexpr ::= 'if' expression 'then' expression 'else' expression
    fn parse_if(&mut self, session: &CompilationSession) -> Result<Expression, ParsingError> {
        let loc = self.loc;
        self.advance();

        let condition = self.parse_expression(session)?;
        self.expect(Token::Then, "'then'")?;
        let then_branch = self.parse_expression(session)?;
        self.expect(Token::Else, "'else'")?;
        let else_branch = self.parse_expression(session)?;

        Ok(Expression::new(
            ExpressionKind::If {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            },
            loc,
        ))
    }

    /// forexpr ::= 'for' identifier '=' expression ',' expression
    ///             (',' expression)? 'in' expression
    fn parse_for(&mut self, session: &CompilationSession) -> Result<Expression, ParsingError> {
        let loc = self.loc;
        self.advance();

        let var = self.expect_identifier("an identifier after 'for'")?;
        self.expect_op('=', "'=' after the loop variable")?;
        let start = self.parse_expression(session)?;
        self.expect_op(',', "',' after the loop start value")?;
        let end = self.parse_expression(session)?;

        let step = if self.current == Token::Op(',') {
            self.advance();
            Some(Box::new(self.parse_expression(session)?))
        } else {
            None
        };

        self.expect(Token::In, "'in' after 'for'")?;
        let body = self.parse_expression(session)?;

        Ok(Expression::new(
            ExpressionKind::For {
                var,
                start: Box::new(start),
                end: Box::new(end),
                step,
                body: Box::new(body),
            },
            loc,
        ))
    }

    /// varexpr ::= 'var' (identifier ('=' expression)?),+ 'in' expression
    fn parse_var(&mut self, session: &CompilationSession) -> Result<Expression, ParsingError> {
        let loc = self.loc;
        self.advance();

        let mut bindings = Vec::new();
        loop {
            let name = self.expect_identifier("an identifier after 'var'")?;
            let init = if self.current == Token::Op('=') {
                self.advance();
                Some(self.parse_expression(session)?)
            } else {
                None
            };
            bindings.push((name, init));

            if self.current != Token::Op(',') {
                break;
            }
            self.advance();
        }

        self.expect(Token::In, "'in' after 'var'")?;
        let body = self.parse_expression(session)?;

        Ok(Expression::new(
            ExpressionKind::VarIn {
                bindings,
                body: Box::new(body),
            },
            loc,
        ))
    }

    /// Binding strength of the current token, or -1 if it is not a known
    /// infix operator. An unknown operator character therefore silently
    /// ends the enclosing expression.
    fn current_precedence(&self, session: &CompilationSession) -> i32 {
        match self.current {
            Token::Op(op) => session.precedence(op).map_or(-1, |p| p as i32),
            _ => -1,
        }
    }

    fn advance(&mut self) {
        self.current = self.lexer.next_token();
        self.loc = self.lexer.token_location();
        self.span = self.lexer.token_span();
    }

    fn expect(&mut self, token: Token, expected: &str) -> Result<(), ParsingError> {
        if self.current == token {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_op(&mut self, op: char, expected: &str) -> Result<(), ParsingError> {
        self.expect(Token::Op(op), expected)
    }

    fn expect_identifier(&mut self, expected: &str) -> Result<Ident, ParsingError> {
        match &self.current {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn expect_operator_char(&mut self) -> Result<char, ParsingError> {
        match self.current {
            Token::Op(op) => {
                self.advance();
                Ok(op)
            }
            _ => Err(self.unexpected("an operator character")),
        }
    }

    fn unexpected(&self, expected: &str) -> ParsingError {
        ParsingError::UnexpectedToken {
            expected: expected.to_string(),
            found: self.current.to_string(),
            span: self.span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::parse;
    use super::*;

    fn loc(line: u32, col: u32) -> SourceLocation {
        SourceLocation { line, col }
    }

    fn num(value: f64, line: u32, col: u32) -> Expression {
        Expression::new(ExpressionKind::Number(value), loc(line, col))
    }

    fn bin(op: char, line: u32, col: u32, lhs: Expression, rhs: Expression) -> Expression {
        Expression::new(
            ExpressionKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            loc(line, col),
        )
    }

    fn parse_body(source: &str) -> Expression {
        let mut session = CompilationSession::new();
        let items = parse(source, &mut session).unwrap();
        assert_eq!(items.len(), 1, "expected exactly one unit in {source:?}");
        match items.into_iter().next().unwrap() {
            Item::TopLevelExpr(function) | Item::Definition(function) => function.body,
            Item::Extern(_) => panic!("expected a function body"),
        }
    }

    #[test]
    fn equal_precedence_is_left_associative() {
        assert_eq!(
            parse_body("1 - 2 - 3"),
            bin(
                '-',
                1,
                7,
                bin('-', 1, 3, num(1.0, 1, 1), num(2.0, 1, 5)),
                num(3.0, 1, 9),
            )
        );
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        assert_eq!(
            parse_body("1 + 2 * 3"),
            bin(
                '+',
                1,
                3,
                num(1.0, 1, 1),
                bin('*', 1, 7, num(2.0, 1, 5), num(3.0, 1, 9)),
            )
        );
    }

    #[test]
    fn parentheses_override_precedence() {
        assert_eq!(
            parse_body("(1 + 2) * 3"),
            bin(
                '*',
                1,
                9,
                bin('+', 1, 4, num(1.0, 1, 2), num(2.0, 1, 6)),
                num(3.0, 1, 11),
            )
        );
    }

    #[test]
    fn top_level_expression_wraps_into_anonymous_function() {
        let mut session = CompilationSession::new();
        let items = parse("42;", &mut session).unwrap();

        let Item::TopLevelExpr(function) = &items[0] else {
            panic!("expected a top-level expression");
        };
        assert_eq!(function.prototype.name, "main");
        assert!(function.prototype.params.is_empty());
        assert_eq!(function.body, num(42.0, 1, 1));
    }

    #[test]
    fn extern_yields_a_prototype() {
        let mut session = CompilationSession::new();
        let items = parse("extern sin(x);", &mut session).unwrap();

        let Item::Extern(proto) = &items[0] else {
            panic!("expected an extern");
        };
        assert_eq!(proto.name, "sin");
        assert_eq!(proto.params, vec!["x"]);
        assert_eq!(proto.fixity, Fixity::Function);
    }

    #[test]
    fn call_arguments_parse_in_order() {
        let body = parse_body("f(1, x, 2 + 3)");
        let ExpressionKind::Call { callee, args } = body.kind else {
            panic!("expected a call");
        };
        assert_eq!(callee, "f");
        assert_eq!(args.len(), 3);
        assert!(matches!(args[1].kind, ExpressionKind::Variable(ref v) if v == "x"));
        assert!(matches!(args[2].kind, ExpressionKind::Binary { op: '+', .. }));
    }

    #[test]
    fn unary_operator_applications_nest() {
        let body = parse_body("!!x");
        let ExpressionKind::Unary { op: '!', operand } = body.kind else {
            panic!("expected a unary application");
        };
        assert!(matches!(
            operand.kind,
            ExpressionKind::Unary { op: '!', .. }
        ));
    }

    #[test]
    fn if_requires_both_branches() {
        let body = parse_body("if x then 1 else 2");
        assert!(matches!(body.kind, ExpressionKind::If { .. }));

        let mut session = CompilationSession::new();
        assert!(matches!(
            parse("if x then 1", &mut session),
            Err(ParsingError::UnexpectedToken { .. })
        ));
    }

    #[test]
    fn for_step_is_optional() {
        let body = parse_body("for i = 1, i < 5 in i");
        let ExpressionKind::For { var, step, .. } = body.kind else {
            panic!("expected a for loop");
        };
        assert_eq!(var, "i");
        assert!(step.is_none());

        let body = parse_body("for i = 1, i < 5, 2 in i");
        let ExpressionKind::For { step, .. } = body.kind else {
            panic!("expected a for loop");
        };
        assert_eq!(step.as_deref(), Some(&num(2.0, 1, 19)));
    }

    #[test]
    fn var_bindings_keep_order_and_optional_initializers() {
        let body = parse_body("var x = 1, y in x + y");
        let ExpressionKind::VarIn { bindings, .. } = body.kind else {
            panic!("expected a var expression");
        };
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].0, "x");
        assert_eq!(bindings[0].1, Some(num(1.0, 1, 9)));
        assert_eq!(bindings[1].0, "y");
        assert_eq!(bindings[1].1, None);
    }

    #[test]
    fn binary_prototype_installs_its_precedence() {
        let mut session = CompilationSession::new();
        let items = parse(
            "def binary^ 50 (a b) a; def f(a b c) a * b ^ c;",
            &mut session,
        )
        .unwrap();

        assert_eq!(session.precedence('^'), Some(50));

        // ^ binds tighter than *, so the product keeps a * (b ^ c).
        let Item::Definition(function) = &items[1] else {
            panic!("expected a definition");
        };
        let ExpressionKind::Binary { op: '*', rhs, .. } = &function.body.kind else {
            panic!("expected a product at the top");
        };
        assert!(matches!(rhs.kind, ExpressionKind::Binary { op: '^', .. }));
    }

    #[test]
    fn operator_definition_defaults_to_precedence_30() {
        let mut session = CompilationSession::new();
        parse("def binary% (a b) a;", &mut session).unwrap();
        assert_eq!(session.precedence('%'), Some(30));
    }

    #[test]
    fn operator_is_usable_inside_its_own_body() {
        let mut session = CompilationSession::new();
        let items = parse("def binary$ 35 (a b) a $ b $ a;", &mut session).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn unknown_operator_char_silently_ends_the_expression() {
        let mut session = CompilationSession::new();
        let items = parse("x ^ y", &mut session).unwrap();

        // The undeclared ^ terminates the first expression; what follows
        // starts a second unit in which ^ reads as a unary application.
        assert_eq!(items.len(), 2);
        let Item::TopLevelExpr(first) = &items[0] else {
            panic!("expected a top-level expression");
        };
        assert!(matches!(first.body.kind, ExpressionKind::Variable(ref v) if v == "x"));
        let Item::TopLevelExpr(second) = &items[1] else {
            panic!("expected a top-level expression");
        };
        assert!(matches!(
            second.body.kind,
            ExpressionKind::Unary { op: '^', .. }
        ));
    }

    #[test]
    fn unary_prototype_takes_exactly_one_parameter() {
        let mut session = CompilationSession::new();
        assert!(matches!(
            parse("def unary! (a b) a;", &mut session),
            Err(ParsingError::InvalidOperandCount {
                expected: 1,
                found: 2,
                ..
            })
        ));
    }

    #[test]
    fn binary_prototype_takes_exactly_two_parameters() {
        let mut session = CompilationSession::new();
        assert!(matches!(
            parse("def binary^ 50 (a) a;", &mut session),
            Err(ParsingError::InvalidOperandCount {
                expected: 2,
                found: 1,
                ..
            })
        ));
    }

    #[test]
    fn operator_precedence_must_be_in_range() {
        let mut session = CompilationSession::new();
        assert!(matches!(
            parse("def binary^ 200 (a b) a;", &mut session),
            Err(ParsingError::InvalidPrecedence { .. })
        ));
    }

    #[test]
    fn semicolons_between_units_are_skipped() {
        let mut session = CompilationSession::new();
        let items = parse(";;; def f(x) x; ;; 1 + 2;", &mut session).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn parse_failure_leaves_the_offending_token_in_place() {
        let mut session = CompilationSession::new();
        let mut parser = Parser::new("def 42");

        assert!(parser.next_item(&mut session).is_err());
        assert_eq!(*parser.current_token(), Token::Number(42.0));
    }
}
