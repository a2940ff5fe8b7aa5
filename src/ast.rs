use crate::SourceLocation;

pub type Ident = String;

/// One fully parsed top-level unit, ready for code generation.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Definition(Function),
    Extern(Prototype),
    /// A bare expression, wrapped into an anonymous zero-parameter function.
    TopLevelExpr(Function),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub prototype: Prototype,
    pub body: Expression,
}

/// A function signature: its name, parameter names and, for operator
/// definitions, the operator's fixity.
#[derive(Debug, Clone, PartialEq)]
pub struct Prototype {
    /// Name under which the function is registered. Operator definitions
    /// encode their symbol as the last character (`unary!`, `binary^`).
    pub name: Ident,
    pub params: Vec<Ident>,
    pub fixity: Fixity,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fixity {
    /// An ordinary named function.
    Function,
    /// A unary operator definition; takes exactly one parameter.
    Unary(char),
    /// A binary operator definition; takes exactly two parameters.
    Binary { op: char, precedence: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub loc: SourceLocation,
}

impl Expression {
    pub fn new(kind: ExpressionKind, loc: SourceLocation) -> Self {
        Self { kind, loc }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind {
    Number(f64),
    Variable(Ident),

    Unary {
        op: char,
        operand: Box<Expression>,
    },

    Binary {
        op: char,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },

    Call {
        callee: Ident,
        args: Vec<Expression>,
    },

    If {
        condition: Box<Expression>,
        then_branch: Box<Expression>,
        else_branch: Box<Expression>,
    },

    For {
        var: Ident,
        start: Box<Expression>,
        end: Box<Expression>,
        /// Loop increment; 1.0 when omitted.
        step: Option<Box<Expression>>,
        body: Box<Expression>,
    },

    /// `var a = 1, b in body`: fresh mutable bindings scoped to `body`.
    /// A binding without an initializer starts out as 0.0.
    VarIn {
        bindings: Vec<(Ident, Option<Expression>)>,
        body: Box<Expression>,
    },
}

use ptree::{print_tree, Style, TreeItem};
use std::borrow::Cow;
use std::{fmt, io};

impl Item {
    /// Render this unit as a tree on standard output.
    pub fn pretty_print(&self) -> io::Result<()> {
        match self {
            Item::Definition(function) | Item::TopLevelExpr(function) => print_tree(function),
            Item::Extern(prototype) => {
                println!("extern {prototype}");
                Ok(())
            }
        }
    }
}

impl fmt::Display for Prototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ")")
    }
}

impl TreeItem for Function {
    type Child = Expression;

    fn write_self<W: io::Write>(&self, f: &mut W, style: &Style) -> io::Result<()> {
        write!(f, "{}", style.paint(&self.prototype))
    }

    fn children(&self) -> Cow<[Self::Child]> {
        Cow::from(vec![self.body.clone()])
    }
}

impl TreeItem for Expression {
    type Child = Self;

    fn write_self<W: io::Write>(&self, f: &mut W, style: &Style) -> io::Result<()> {
        match &self.kind {
            ExpressionKind::Number(value) => write!(f, "{}", style.paint(value)),
            ExpressionKind::Variable(name) => write!(f, "{}", style.paint(name)),
            ExpressionKind::Unary { op, .. } => {
                write!(f, "{}", style.paint(format!("UNARY {op}")))
            }
            ExpressionKind::Binary { op, .. } => write!(f, "{}", style.paint(op)),
            ExpressionKind::Call { callee, .. } => {
                write!(f, "{}", style.paint(format!("CALL {callee}")))
            }
            ExpressionKind::If { .. } => write!(f, "{}", style.paint("IF-THEN-ELSE")),
            ExpressionKind::For { var, .. } => write!(f, "{}", style.paint(format!("FOR {var}"))),
            ExpressionKind::VarIn { bindings, .. } => {
                let names: Vec<&str> = bindings.iter().map(|(name, _)| name.as_str()).collect();
                write!(f, "{}", style.paint(format!("VAR {}", names.join(", "))))
            }
        }
    }

    fn children(&self) -> Cow<[Self::Child]> {
        match &self.kind {
            ExpressionKind::Number(_) | ExpressionKind::Variable(_) => Cow::from(vec![]),
            ExpressionKind::Unary { operand, .. } => Cow::from(vec![operand.as_ref().clone()]),
            ExpressionKind::Binary { lhs, rhs, .. } => {
                Cow::from(vec![lhs.as_ref().clone(), rhs.as_ref().clone()])
            }
            ExpressionKind::Call { args, .. } => Cow::from(args.clone()),
            ExpressionKind::If {
                condition,
                then_branch,
                else_branch,
            } => Cow::from(vec![
                condition.as_ref().clone(),
                then_branch.as_ref().clone(),
                else_branch.as_ref().clone(),
            ]),
            ExpressionKind::For {
                start,
                end,
                step,
                body,
                ..
            } => {
                let mut children = vec![start.as_ref().clone(), end.as_ref().clone()];
                if let Some(step) = step {
                    children.push(step.as_ref().clone());
                }
                children.push(body.as_ref().clone());
                Cow::from(children)
            }
            ExpressionKind::VarIn { bindings, body } => {
                let mut children: Vec<Expression> = bindings
                    .iter()
                    .filter_map(|(_, init)| init.clone())
                    .collect();
                children.push(body.as_ref().clone());
                Cow::from(children)
            }
        }
    }
}
