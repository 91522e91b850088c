//! Whitelist check run once per compiled expression, before any evaluation.

use super::ast::Expr;
use super::functions;
use super::EvalError;

pub(crate) fn validate(expr: &Expr) -> Result<(), EvalError> {
    match expr {
        Expr::Literal(_) => Ok(()),
        Expr::Name(name) => check_name(name),
        Expr::Unary { operand, .. } => validate(operand),
        Expr::Binary { left, right, .. } => {
            validate(left)?;
            validate(right)
        }
        Expr::BoolOp { values, .. } => values.iter().try_for_each(validate),
        Expr::Compare { left, links } => {
            validate(left)?;
            links.iter().try_for_each(|(_, right)| validate(right))
        }
        Expr::Ternary {
            condition,
            then,
            otherwise,
        } => {
            validate(condition)?;
            validate(then)?;
            validate(otherwise)
        }
        Expr::Index { target, index } => {
            validate(target)?;
            validate(index)
        }
        Expr::Slice {
            target,
            start,
            stop,
            step,
        } => {
            validate(target)?;
            [start, stop, step]
                .into_iter()
                .flatten()
                .try_for_each(|bound| validate(bound))
        }
        Expr::Tuple(items) | Expr::List(items) => items.iter().try_for_each(validate),
        Expr::Call { func, args } => {
            let Expr::Name(name) = func.as_ref() else {
                return Err(disallowed(format!("call to a {}", func.kind())));
            };
            check_name(name)?;
            let Some((min, max)) = functions::arity(name) else {
                return Err(disallowed(format!("call to unknown function `{name}`")));
            };
            args.iter().try_for_each(validate)?;
            if args.len() < min || max.is_some_and(|max| args.len() > max) {
                let expected = match max {
                    Some(max) if max == min => format!("{min}"),
                    Some(max) => format!("{min} to {max}"),
                    None => format!("at least {min}"),
                };
                return Err(EvalError::InvalidExpression(format!(
                    "{name}() takes {expected} argument(s), got {}",
                    args.len()
                )));
            }
            Ok(())
        }
        Expr::Attribute { name, .. } => Err(disallowed(format!("attribute access `.{name}`"))),
        Expr::Import(module) => Err(disallowed(format!("import of `{module}`"))),
        Expr::Lambda { .. }
        | Expr::Comprehension { .. }
        | Expr::Assign { .. }
        | Expr::Dict(_)
        | Expr::Set(_) => Err(disallowed(expr.kind().to_string())),
    }
}

fn check_name(name: &str) -> Result<(), EvalError> {
    if name.starts_with("__") {
        return Err(disallowed(format!("dunder name `{name}`")));
    }
    Ok(())
}

fn disallowed(what: String) -> EvalError {
    EvalError::DisallowedExpression(what)
}
