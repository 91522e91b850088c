//! Tree-walking interpreter over a validated [`Expr`].

use chrono::Days;

use super::ast::{BinOp, BoolOp, CmpOp, Expr, UnaryOp};
use super::functions;
use super::{EvalError, Scope};
use crate::value::Value;

/// Upper bound on the length produced by `str * n` / `list * n`.
const MAX_REPEAT: usize = 1 << 20;

pub(crate) fn eval(expr: &Expr, scope: &Scope<'_>) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Name(name) => scope
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnknownVariable(name.clone())),
        Expr::Unary { op, operand } => unary(*op, eval(operand, scope)?),
        Expr::Binary { op, left, right } => {
            let left = eval(left, scope)?;
            let right = eval(right, scope)?;
            binary(*op, left, right)
        }
        Expr::BoolOp { op, values } => {
            // Every operand is evaluated; the result is the deciding operand.
            let values = values
                .iter()
                .map(|v| eval(v, scope))
                .collect::<Result<Vec<_>, _>>()?;
            let deciding = match op {
                BoolOp::And => values.iter().position(|v| !v.is_truthy()),
                BoolOp::Or => values.iter().position(Value::is_truthy),
            };
            let idx = deciding.unwrap_or(values.len().saturating_sub(1));
            Ok(values.into_iter().nth(idx).unwrap_or_default())
        }
        Expr::Compare { left, links } => {
            let mut left = eval(left, scope)?;
            for (op, right) in links {
                let right = eval(right, scope)?;
                if !compare(*op, &left, &right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
        Expr::Ternary {
            condition,
            then,
            otherwise,
        } => {
            if eval(condition, scope)?.is_truthy() {
                eval(then, scope)
            } else {
                eval(otherwise, scope)
            }
        }
        Expr::Index { target, index } => index_value(eval(target, scope)?, eval(index, scope)?),
        Expr::Slice {
            target,
            start,
            stop,
            step,
        } => {
            let target = eval(target, scope)?;
            let bound = |b: &Option<Box<Expr>>| -> Result<Option<i64>, EvalError> {
                match b {
                    None => Ok(None),
                    Some(expr) => match eval(expr, scope)? {
                        Value::Null => Ok(None),
                        Value::Int(i) => Ok(Some(i)),
                        other => Err(EvalError::TypeMismatch(format!(
                            "slice bounds must be integers, not {}",
                            other.type_name()
                        ))),
                    },
                }
            };
            let (start, stop, step) = (bound(start)?, bound(stop)?, bound(step)?);
            slice_value(target, start, stop, step)
        }
        Expr::Tuple(items) | Expr::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|item| eval(item, scope))
                .collect::<Result<_, _>>()?,
        )),
        Expr::Call { func, args } => {
            let Expr::Name(name) = func.as_ref() else {
                return Err(EvalError::DisallowedExpression(format!("call to a {}", func.kind())));
            };
            let args = args
                .iter()
                .map(|arg| eval(arg, scope))
                .collect::<Result<Vec<_>, _>>()?;
            functions::call(name, args)
        }
        other => Err(EvalError::DisallowedExpression(other.kind().to_string())),
    }
}

fn mismatch(op: &str, left: &Value, right: &Value) -> EvalError {
    EvalError::TypeMismatch(format!(
        "unsupported operand types for {op}: {} and {}",
        left.type_name(),
        right.type_name()
    ))
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, EvalError> {
    match (op, value) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Plus, value @ (Value::Int(_) | Value::Float(_))) => Ok(value),
        (UnaryOp::Minus, Value::Int(i)) => Ok(i
            .checked_neg()
            .map(Value::Int)
            .unwrap_or(Value::Float(-(i as f64)))),
        (UnaryOp::Minus, Value::Float(f)) => Ok(Value::Float(-f)),
        (_, other) => Err(EvalError::TypeMismatch(format!(
            "bad operand type for unary operator: {}",
            other.type_name()
        ))),
    }
}

fn binary(op: BinOp, left: Value, right: Value) -> Result<Value, EvalError> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    match op {
        BinOp::Add => add(left, right),
        BinOp::Sub => sub(left, right),
        BinOp::Mul => mul(left, right),
        BinOp::Div => {
            let (a, b) = floats("/", &left, &right)?;
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(Value::Float(a / b))
        }
        BinOp::FloorDiv => floor_div(left, right),
        BinOp::Mod => modulo(left, right),
        BinOp::Pow => pow(left, right),
    }
}

fn floats(op: &str, left: &Value, right: &Value) -> Result<(f64, f64), EvalError> {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(mismatch(op, left, right)),
    }
}

fn int_or_float(
    a: i64,
    b: i64,
    checked: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
) -> Value {
    checked(a, b)
        .map(Value::Int)
        .unwrap_or_else(|| Value::Float(float(a as f64, b as f64)))
}

fn shift_days(value: &Value, days: i64) -> Result<Value, EvalError> {
    let step = Days::new(days.unsigned_abs());
    let shifted = match value {
        Value::Date(d) if days >= 0 => d.checked_add_days(step).map(Value::Date),
        Value::Date(d) => d.checked_sub_days(step).map(Value::Date),
        Value::DateTime(dt) if days >= 0 => dt.checked_add_days(step).map(Value::DateTime),
        Value::DateTime(dt) => dt.checked_sub_days(step).map(Value::DateTime),
        _ => None,
    };
    shifted.ok_or_else(|| EvalError::TypeMismatch("date arithmetic out of range".to_string()))
}

fn add(left: Value, right: Value) -> Result<Value, EvalError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(int_or_float(a, b, i64::checked_add, |x, y| x + y)),
        (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
        (Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (date @ (Value::Date(_) | Value::DateTime(_)), Value::Int(days))
        | (Value::Int(days), date @ (Value::Date(_) | Value::DateTime(_))) => {
            shift_days(&date, days)
        }
        (left, right) => {
            let (a, b) = floats("+", &left, &right)?;
            Ok(Value::Float(a + b))
        }
    }
}

fn sub(left: Value, right: Value) -> Result<Value, EvalError> {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => Ok(int_or_float(*a, *b, i64::checked_sub, |x, y| x - y)),
        (Value::Date(_) | Value::DateTime(_), Value::Int(days)) => {
            let days = days
                .checked_neg()
                .ok_or_else(|| EvalError::TypeMismatch("date arithmetic out of range".into()))?;
            shift_days(&left, days)
        }
        (Value::Date(_) | Value::DateTime(_), Value::Date(_) | Value::DateTime(_)) => {
            match (left.as_datetime(), right.as_datetime()) {
                (Some(a), Some(b)) => Ok(Value::Int((a - b).num_days())),
                _ => Err(mismatch("-", &left, &right)),
            }
        }
        _ => {
            let (a, b) = floats("-", &left, &right)?;
            Ok(Value::Float(a - b))
        }
    }
}

fn repeat_count(n: i64, unit: usize) -> Result<usize, EvalError> {
    let n = usize::try_from(n.max(0)).unwrap_or(usize::MAX);
    match n.checked_mul(unit) {
        Some(total) if total <= MAX_REPEAT => Ok(n),
        _ => Err(EvalError::InvalidExpression(
            "repetition result is too large".to_string(),
        )),
    }
}

fn mul(left: Value, right: Value) -> Result<Value, EvalError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(int_or_float(a, b, i64::checked_mul, |x, y| x * y)),
        (Value::String(s), Value::Int(n)) | (Value::Int(n), Value::String(s)) => {
            let n = repeat_count(n, s.len())?;
            Ok(Value::String(s.repeat(n)))
        }
        (Value::List(items), Value::Int(n)) | (Value::Int(n), Value::List(items)) => {
            let n = repeat_count(n, items.len())?;
            let mut out = Vec::with_capacity(items.len() * n);
            for _ in 0..n {
                out.extend(items.iter().cloned());
            }
            Ok(Value::List(out))
        }
        (left, right) => {
            let (a, b) = floats("*", &left, &right)?;
            Ok(Value::Float(a * b))
        }
    }
}

fn floor_div(left: Value, right: Value) -> Result<Value, EvalError> {
    if let (Value::Int(a), Value::Int(b)) = (&left, &right) {
        let (a, b) = (*a, *b);
        if b == 0 {
            return Err(EvalError::DivisionByZero);
        }
        return Ok(match (a.checked_div(b), a.checked_rem(b)) {
            (Some(q), Some(r)) if r != 0 && ((r < 0) != (b < 0)) => Value::Int(q - 1),
            (Some(q), Some(_)) => Value::Int(q),
            _ => Value::Float((a as f64 / b as f64).floor()),
        });
    }
    let (a, b) = floats("//", &left, &right)?;
    if b == 0.0 {
        return Err(EvalError::DivisionByZero);
    }
    Ok(Value::Float((a / b).floor()))
}

fn modulo(left: Value, right: Value) -> Result<Value, EvalError> {
    if let (Value::Int(a), Value::Int(b)) = (&left, &right) {
        let (a, b) = (*a, *b);
        if b == 0 {
            return Err(EvalError::DivisionByZero);
        }
        let r = a.checked_rem(b).unwrap_or(0);
        return Ok(Value::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }));
    }
    let (a, b) = floats("%", &left, &right)?;
    if b == 0.0 {
        return Err(EvalError::DivisionByZero);
    }
    let r = a % b;
    Ok(Value::Float(if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }))
}

fn pow(left: Value, right: Value) -> Result<Value, EvalError> {
    if let (Value::Int(base), Value::Int(exp)) = (&left, &right) {
        let (base, exp) = (*base, *exp);
        if exp >= 0 {
            let checked = u32::try_from(exp).ok().and_then(|e| base.checked_pow(e));
            return Ok(checked
                .map(Value::Int)
                .unwrap_or_else(|| Value::Float((base as f64).powf(exp as f64))));
        }
        if base == 0 {
            return Err(EvalError::DivisionByZero);
        }
        return Ok(Value::Float((base as f64).powf(exp as f64)));
    }
    let (a, b) = floats("**", &left, &right)?;
    if a == 0.0 && b < 0.0 {
        return Err(EvalError::DivisionByZero);
    }
    Ok(Value::Float(a.powf(b)))
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, EvalError> {
    use std::cmp::Ordering::{Greater, Less};

    match op {
        CmpOp::Eq => Ok(left.loose_eq(right)),
        CmpOp::Ne => Ok(!left.loose_eq(right)),
        CmpOp::In => contains(right, left),
        CmpOp::NotIn => contains(right, left).map(|found| !found),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            if left.is_null() || right.is_null() {
                return Ok(false);
            }
            let ordering = left.compare(right).ok_or_else(|| {
                EvalError::TypeMismatch(format!(
                    "cannot order {} and {}",
                    left.type_name(),
                    right.type_name()
                ))
            })?;
            Ok(match op {
                CmpOp::Lt => ordering == Less,
                CmpOp::Le => ordering != Greater,
                CmpOp::Gt => ordering == Greater,
                _ => ordering != Less,
            })
        }
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, EvalError> {
    match (container, item) {
        (Value::Null, _) => Ok(false),
        (Value::List(items), item) => Ok(items.iter().any(|v| v.loose_eq(item))),
        (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(needle.as_str())),
        (Value::String(_), Value::Null) => Ok(false),
        (Value::Map(map), Value::String(key)) => Ok(map.contains_key(key)),
        (Value::Map(_), _) => Ok(false),
        (container, item) => Err(mismatch("in", item, container)),
    }
}

/// Python-style index normalization; `None` when out of range.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let idx = if index < 0 { index + len } else { index };
    (0..len).contains(&idx).then_some(idx as usize)
}

fn index_value(target: Value, index: Value) -> Result<Value, EvalError> {
    match (target, index) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::List(mut items), Value::Int(i)) => Ok(resolve_index(i, items.len())
            .map(|idx| items.swap_remove(idx))
            .unwrap_or_default()),
        (Value::String(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(resolve_index(i, chars.len())
                .map(|idx| Value::String(chars[idx].to_string()))
                .unwrap_or_default())
        }
        (Value::Map(mut map), Value::String(key)) => Ok(map.remove(&key).unwrap_or_default()),
        (target, index) => Err(EvalError::TypeMismatch(format!(
            "cannot index {} with {}",
            target.type_name(),
            index.type_name()
        ))),
    }
}

/// Positions selected by `[start:stop:step]` over a sequence of `len`.
fn slice_positions(
    len: usize,
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
) -> Result<Vec<usize>, EvalError> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(EvalError::InvalidExpression(
            "slice step cannot be zero".to_string(),
        ));
    }
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let (lower, upper) = if step < 0 { (-1, len - 1) } else { (0, len) };
    let clamp = |bound: i64| {
        if bound < 0 {
            (bound + len).max(lower)
        } else {
            bound.min(upper)
        }
    };
    let start = start.map(clamp).unwrap_or(if step < 0 { upper } else { lower });
    let stop = stop.map(clamp).unwrap_or(if step < 0 { lower } else { upper });

    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i as usize);
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    Ok(out)
}

fn slice_value(
    target: Value,
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
) -> Result<Value, EvalError> {
    match target {
        Value::Null => Ok(Value::Null),
        Value::List(items) => {
            let picked = slice_positions(items.len(), start, stop, step)?;
            Ok(Value::List(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_positions(chars.len(), start, stop, step)?;
            Ok(Value::String(picked.into_iter().map(|i| chars[i]).collect()))
        }
        other => Err(EvalError::TypeMismatch(format!(
            "cannot slice {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use crate::expr::{evaluate, EvalError};
    use crate::value::{FieldMap, Value};
    use chrono::NaiveDate;

    fn vars() -> FieldMap {
        let mut vars = FieldMap::new();
        vars.insert("n", Value::Int(7));
        vars.insert("title", Value::from("Zettel"));
        vars.insert(
            "tags",
            Value::List(vec![Value::from("dev"), Value::from("sprint-1")]),
        );
        vars.insert("missing", Value::Null);
        vars.insert(
            "date",
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
        );
        vars
    }

    fn eval(source: &str) -> Value {
        evaluate(source, &vars()).unwrap()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1 + 2 * 3"), Value::Int(7));
        assert_eq!(eval("7 / 2"), Value::Float(3.5));
        assert_eq!(eval("-7 // 2"), Value::Int(-4));
        assert_eq!(eval("-7 % 3"), Value::Int(2));
        assert_eq!(eval("2 ** 10"), Value::Int(1024));
        assert_eq!(eval("2 ** -1"), Value::Float(0.5));
        assert_eq!(eval("-2 ** 2"), Value::Int(-4));
        assert_eq!(eval("9223372036854775807 + 1"), Value::Float(9223372036854775808.0));
        assert_eq!(eval("n + missing"), Value::Null);
    }

    #[test]
    fn test_division_by_zero() {
        for src in ["1 / 0", "1 // 0", "1 % 0", "1.0 / 0.0", "0 ** -1"] {
            assert!(
                matches!(evaluate(src, &vars()), Err(EvalError::DivisionByZero)),
                "{src:?}"
            );
        }
    }

    #[test]
    fn test_strings_lists_and_dates() {
        assert_eq!(eval("title + '!'"), Value::from("Zettel!"));
        assert_eq!(eval("'ab' * 2"), Value::from("abab"));
        assert_eq!(eval("tags + ['x']").as_list().map(<[Value]>::len), Some(3));
        assert_eq!(
            eval("date + 30"),
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 31).unwrap())
        );
        assert_eq!(
            eval("date - 1"),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert_eq!(eval("date - (date - 10)"), Value::Int(10));
        assert!(evaluate("'a' * 100000000", &vars()).is_err());
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval("1 < n <= 7"), Value::Bool(true));
        assert_eq!(eval("1 < n < 7"), Value::Bool(false));
        assert_eq!(eval("n == 7.0"), Value::Bool(true));
        assert_eq!(eval("missing < 3"), Value::Bool(false));
        assert_eq!(eval("missing == None"), Value::Bool(true));
        assert_eq!(eval("'dev' in tags"), Value::Bool(true));
        assert_eq!(eval("'ett' in title"), Value::Bool(true));
        assert_eq!(eval("'x' not in tags"), Value::Bool(true));
        assert_eq!(eval("'x' in missing"), Value::Bool(false));
        assert!(matches!(
            evaluate("title < 3", &vars()),
            Err(EvalError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_chained_comparison_short_circuits() {
        // `missing < 1` is false, so the incomparable right-hand link never runs.
        assert_eq!(eval("missing < 1 < title"), Value::Bool(false));
    }

    #[test]
    fn test_boolean_ops_are_eager() {
        assert_eq!(eval("0 or 'x'"), Value::from("x"));
        assert_eq!(eval("n and title"), Value::from("Zettel"));
        assert_eq!(eval("missing and n"), Value::Null);
        assert_eq!(eval("not tags"), Value::Bool(false));
        // The right operand runs even though `or` is already decided.
        assert!(matches!(
            evaluate("True or nope", &vars()),
            Err(EvalError::UnknownVariable(_))
        ));
    }

    #[test]
    fn test_ternary_evaluates_one_branch() {
        assert_eq!(eval("'big' if n > 5 else nope"), Value::from("big"));
    }

    #[test]
    fn test_indexing_and_slicing() {
        assert_eq!(eval("tags[0]"), Value::from("dev"));
        assert_eq!(eval("tags[-1]"), Value::from("sprint-1"));
        assert_eq!(eval("tags[5]"), Value::Null);
        assert_eq!(eval("missing[0]"), Value::Null);
        assert_eq!(eval("title[1:3]"), Value::from("et"));
        assert_eq!(eval("title[::-1]"), Value::from("lettez"));
        assert_eq!(eval("title[-3:]"), Value::from("tel"));
        assert_eq!(eval("tags[1:][0]"), Value::from("sprint-1"));
        assert!(matches!(
            evaluate("title[::0]", &vars()),
            Err(EvalError::InvalidExpression(_))
        ));
    }

    #[test]
    fn test_huge_bounds_clamp_instead_of_overflowing() {
        assert_eq!(eval("title[1::9223372036854775807]"), Value::from("e"));
        assert_eq!(eval("title[::-9223372036854775807]"), Value::from("l"));
        assert_eq!(eval("substr(title, 1, 9223372036854775807)"), Value::from("ettel"));
    }

    #[test]
    fn test_function_calls() {
        assert_eq!(eval("len(tags)"), Value::Int(2));
        assert_eq!(eval("upper(title)"), Value::from("ZETTEL"));
        assert_eq!(eval("year(date)"), Value::Int(2024));
        assert_eq!(eval("join(tags, '+')"), Value::from("dev+sprint-1"));
        assert_eq!(eval("str(n) + '%'"), Value::from("7%"));
    }
}
