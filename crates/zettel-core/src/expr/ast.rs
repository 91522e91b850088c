//! Expression syntax tree.
//!
//! The parser accepts a little more than the evaluator will run so that
//! constructs like attribute access or lambdas produce a precise
//! `DisallowedExpression` error instead of a generic syntax error.

use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Name(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `and` / `or` over two or more operands.
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    /// `a < b <= c`: evaluated pairwise, stops at the first false link.
    Compare {
        left: Box<Expr>,
        links: Vec<(CmpOp, Expr)>,
    },
    Ternary {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        target: Box<Expr>,
        start: Option<Box<Expr>>,
        stop: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
    },

    // Parsed, never evaluated.
    Attribute {
        target: Box<Expr>,
        name: String,
    },
    Lambda {
        params: Vec<String>,
        body: Box<Expr>,
    },
    Comprehension {
        element: Box<Expr>,
        target: String,
        iter: Box<Expr>,
    },
    /// `name = value` (keyword argument) or `name := value`.
    Assign {
        target: String,
        value: Box<Expr>,
    },
    Import(String),
    Dict(Vec<(Expr, Expr)>),
    Set(Vec<Expr>),
}

impl Expr {
    /// Short name of the node kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Literal(_) => "literal",
            Expr::Name(_) => "name",
            Expr::Unary { .. } => "unary operation",
            Expr::Binary { .. } => "binary operation",
            Expr::BoolOp { .. } => "boolean operation",
            Expr::Compare { .. } => "comparison",
            Expr::Ternary { .. } => "conditional expression",
            Expr::Index { .. } => "index",
            Expr::Slice { .. } => "slice",
            Expr::Tuple(_) => "tuple",
            Expr::List(_) => "list",
            Expr::Call { .. } => "call",
            Expr::Attribute { .. } => "attribute access",
            Expr::Lambda { .. } => "lambda",
            Expr::Comprehension { .. } => "comprehension",
            Expr::Assign { .. } => "assignment",
            Expr::Import(_) => "import",
            Expr::Dict(_) => "dict literal",
            Expr::Set(_) => "set literal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}
