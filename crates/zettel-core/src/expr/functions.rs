//! The fixed function registry. Every function is pure and null-safe.

use chrono::Datelike;

use super::EvalError;
use crate::value::Value;

/// Name, minimum arity, maximum arity (`None` = variadic).
const REGISTRY: [(&str, usize, Option<usize>); 15] = [
    ("len", 1, Some(1)),
    ("count", 1, Some(2)),
    ("upper", 1, Some(1)),
    ("lower", 1, Some(1)),
    ("concat", 1, None),
    ("join", 1, Some(2)),
    ("substr", 2, Some(3)),
    ("replace", 3, Some(3)),
    ("year", 1, Some(1)),
    ("month", 1, Some(1)),
    ("day", 1, Some(1)),
    ("format_date", 2, Some(2)),
    ("abs", 1, Some(1)),
    ("str", 1, Some(1)),
    ("int", 1, Some(1)),
];

/// Registered function names.
pub fn names() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(name, _, _)| *name)
}

pub(crate) fn arity(name: &str) -> Option<(usize, Option<usize>)> {
    REGISTRY
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|(_, min, max)| (*min, *max))
}

fn mismatch(func: &str, value: &Value) -> EvalError {
    EvalError::TypeMismatch(format!("{func}() does not accept {}", value.type_name()))
}

pub(crate) fn call(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    let given = args.len();
    let mut args = args.into_iter();
    let mut next = move || args.next().unwrap_or_default();
    match name {
        "len" => len(next()),
        "count" => {
            let target = next();
            let item = (given > 1).then(&mut next);
            count(target, item)
        }
        "upper" => Ok(map_text(next(), |s| s.to_uppercase())),
        "lower" => Ok(map_text(next(), |s| s.to_lowercase())),
        "concat" => Ok(concat((0..given).map(|_| next()).collect())),
        "join" => {
            let (list, sep) = (next(), next());
            join(list, sep)
        }
        "substr" => {
            let (text, start, length) = (next(), next(), next());
            substr(text, start, length)
        }
        "replace" => {
            let (text, old, new) = (next(), next(), next());
            Ok(replace(text, old, new))
        }
        "year" => date_part("year", next(), |d| d.year() as i64),
        "month" => date_part("month", next(), |d| d.month() as i64),
        "day" => date_part("day", next(), |d| d.day() as i64),
        "format_date" => {
            let (value, pattern) = (next(), next());
            format_date(value, pattern)
        }
        "abs" => abs(next()),
        "str" => Ok(Value::String(next().to_string())),
        "int" => int(next()),
        other => Err(EvalError::DisallowedExpression(format!(
            "call to unknown function `{other}`"
        ))),
    }
}

fn len(value: Value) -> Result<Value, EvalError> {
    let n = match &value {
        Value::Null => 0,
        Value::String(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Map(map) => map.len(),
        other => return Err(mismatch("len", other)),
    };
    Ok(Value::Int(n as i64))
}

fn count(target: Value, item: Option<Value>) -> Result<Value, EvalError> {
    let n = match (target, item) {
        (Value::Null, _) => 0,
        (Value::List(items), None) => items.iter().filter(|v| !v.is_null()).count(),
        (Value::List(items), Some(item)) => items.iter().filter(|v| v.loose_eq(&item)).count(),
        (Value::String(s), Some(Value::String(sub))) if !sub.is_empty() => s.matches(&sub).count(),
        (_, None) => 1,
        (other, Some(_)) => return Err(mismatch("count", &other)),
    };
    Ok(Value::Int(n as i64))
}

fn map_text(value: Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => Value::String(f(&s)),
        other => Value::String(f(&other.to_string())),
    }
}

fn replace(text: Value, old: Value, new: Value) -> Value {
    let text = match text {
        Value::Null => return Value::Null,
        Value::String(s) => s,
        other => other.to_string(),
    };
    let old = old.to_string();
    if old.is_empty() {
        return Value::String(text);
    }
    Value::String(text.replace(&old, &new.to_string()))
}

fn concat(values: Vec<Value>) -> Value {
    let present: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    if present.is_empty() {
        return Value::Null;
    }
    if present.iter().all(|v| matches!(v, Value::List(_))) {
        let mut out = Vec::new();
        for v in present {
            if let Value::List(items) = v {
                out.extend(items);
            }
        }
        return Value::List(out);
    }
    Value::String(present.iter().map(Value::to_string).collect())
}

fn join(list: Value, sep: Value) -> Result<Value, EvalError> {
    let sep = match sep {
        Value::Null => ", ".to_string(),
        Value::String(s) => s,
        other => return Err(mismatch("join", &other)),
    };
    Ok(Value::String(match list {
        Value::Null => String::new(),
        Value::List(items) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join(&sep),
        other => other.to_string(),
    }))
}

fn as_int(func: &str, value: &Value) -> Result<Option<i64>, EvalError> {
    match value {
        Value::Null => Ok(None),
        Value::Int(i) => Ok(Some(*i)),
        other => Err(mismatch(func, other)),
    }
}

fn substr(text: Value, start: Value, length: Value) -> Result<Value, EvalError> {
    let text = match text {
        Value::Null => return Ok(Value::Null),
        Value::String(s) => s,
        other => other.to_string(),
    };
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len() as i64;
    let start = as_int("substr", &start)?.unwrap_or(0);
    let start = if start < 0 { (len + start).max(0) } else { start.min(len) };
    let end = match as_int("substr", &length)? {
        Some(n) => start.saturating_add(n.max(0)).min(len),
        None => len,
    };
    Ok(Value::String(
        chars[start as usize..end as usize].iter().collect(),
    ))
}

fn date_part(
    func: &str,
    value: Value,
    part: impl Fn(chrono::NaiveDate) -> i64,
) -> Result<Value, EvalError> {
    let date = match &value {
        Value::Null => return Ok(Value::Null),
        Value::String(s) => Value::parse_iso(s).and_then(|v| v.as_date()),
        other => other.as_date(),
    };
    date.map(|d| Value::Int(part(d)))
        .ok_or_else(|| mismatch(func, &value))
}

fn format_date(value: Value, pattern: Value) -> Result<Value, EvalError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let Value::String(pattern) = pattern else {
        return Err(mismatch("format_date", &pattern));
    };
    value
        .format_date(&pattern)
        .map(Value::String)
        .ok_or_else(|| {
            EvalError::TypeMismatch(format!(
                "format_date() cannot render {} with {pattern:?}",
                value.type_name()
            ))
        })
}

fn abs(value: Value) -> Result<Value, EvalError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Int(i) => Ok(i
            .checked_abs()
            .map(Value::Int)
            .unwrap_or(Value::Float((i as f64).abs()))),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(mismatch("abs", &other)),
    }
}

fn int(value: Value) -> Result<Value, EvalError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Bool(b) => Ok(Value::Int(b as i64)),
        Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
        Value::String(ref s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f.trunc() as i64)
                })
                .map(Value::Int)
                .ok_or_else(|| {
                    EvalError::TypeMismatch(format!("int() cannot parse {s:?}"))
                })
        }
        other => Err(mismatch("int", &other)),
    }
}
