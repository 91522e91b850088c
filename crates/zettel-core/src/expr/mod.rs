//! Sandboxed expression evaluator.
//!
//! User-supplied predicates and computed columns are written in a small,
//! Python-flavoured expression language:
//!
//! ```text
//! len(tags) > 2 and 'dev' in tags
//! upper(title[:1]) + title[1:]
//! 'overdue' if due < today else ''
//! ```
//!
//! Source text is tokenized, parsed into an [`ast::Expr`] tree, validated
//! against a fixed whitelist of node kinds, and only then interpreted. The
//! interpreter can reach nothing but the variables in its [`Scope`] and the
//! pure functions in [`functions`]: no attribute access, no imports, no
//! user-defined callables.
//!
//! Compile once with [`Expression::compile`] and evaluate per row, or use the
//! one-shot [`evaluate`].

pub mod ast;
mod eval;
pub mod functions;
mod lexer;
mod parser;
mod validate;

use thiserror::Error;

use crate::value::{FieldMap, Value};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("disallowed expression: {0}")]
    DisallowedExpression(String),
    #[error("unknown variable: {0}")]
    UnknownVariable(String),
    #[error("invalid expression: {0}")]
    InvalidExpression(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("division by zero")]
    DivisionByZero,
}

/// Variable bindings, optionally chained to an enclosing scope.
///
/// Lookups try the innermost bindings first. Query lookups and expansions
/// layer a child scope over the note's own variables instead of copying them.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    vars: &'a FieldMap,
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    pub fn new(vars: &'a FieldMap) -> Self {
        Self { vars, parent: None }
    }

    pub fn child(&'a self, vars: &'a FieldMap) -> Scope<'a> {
        Scope {
            vars,
            parent: Some(self),
        }
    }

    pub fn get(&self, name: &str) -> Option<&'a Value> {
        match self.vars.get(name) {
            Some(value) => Some(value),
            None => self.parent.and_then(|parent| parent.get(name)),
        }
    }
}

/// A parsed and validated expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    ast: ast::Expr,
}

impl Expression {
    /// Parse and validate. Fails before any evaluation if the expression
    /// uses a construct outside the whitelist.
    pub fn compile(source: &str) -> Result<Self, EvalError> {
        let ast = parser::parse(source)?;
        validate::validate(&ast)?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn evaluate(&self, scope: &Scope<'_>) -> Result<Value, EvalError> {
        eval::eval(&self.ast, scope)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &ast::Expr {
        &self.ast
    }
}

/// Compile and evaluate `source` against a flat set of variables.
pub fn evaluate(source: &str, variables: &FieldMap) -> Result<Value, EvalError> {
    Expression::compile(source)?.evaluate(&Scope::new(variables))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_rejects_host_access() {
        assert!(matches!(
            evaluate("__import__('x')", &FieldMap::new()),
            Err(EvalError::DisallowedExpression(_))
        ));

        let mut vars = FieldMap::new();
        vars.insert("x", Value::Int(1));
        assert!(matches!(
            evaluate("x.__class__", &vars),
            Err(EvalError::DisallowedExpression(_))
        ));
        assert!(matches!(
            evaluate("len.__globals__", &vars),
            Err(EvalError::DisallowedExpression(_))
        ));
    }

    #[test]
    fn test_validation_precedes_evaluation() {
        // The unknown variable would fail at runtime; validation fails first.
        assert!(matches!(
            evaluate("nope + (lambda: 1)", &FieldMap::new()),
            Err(EvalError::DisallowedExpression(_))
        ));
    }

    #[test]
    fn test_unknown_variable_and_syntax_errors() {
        assert_eq!(
            evaluate("missing + 1", &FieldMap::new()),
            Err(EvalError::UnknownVariable("missing".to_string()))
        );
        assert!(matches!(
            evaluate("1 +", &FieldMap::new()),
            Err(EvalError::InvalidExpression(_))
        ));
    }

    #[test]
    fn test_child_scope_shadows_parent() {
        let mut outer = FieldMap::new();
        outer.insert("a", Value::Int(1));
        outer.insert("b", Value::Int(2));
        let mut inner = FieldMap::new();
        inner.insert("a", Value::Int(10));

        let root = Scope::new(&outer);
        let scope = root.child(&inner);
        let expr = Expression::compile("a + b").unwrap();
        assert_eq!(expr.evaluate(&scope).unwrap(), Value::Int(12));
        assert_eq!(expr.evaluate(&root).unwrap(), Value::Int(3));
        assert_eq!(expr.source(), "a + b");
    }
}
