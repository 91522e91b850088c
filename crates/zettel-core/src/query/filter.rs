//! Filter trees: field conditions, expression leaves and `and`/`or`/`not`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde_yaml::Mapping;

use super::spec::{compile_expression, QuerySpecError};
use crate::expr::{EvalError, Expression, Scope};
use crate::note::{Note, DERIVED_FIELDS};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    Contains,
    Regex,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Eq => "eq",
            Op::Ne => "ne",
            Op::Gt => "gt",
            Op::Ge => "ge",
            Op::Lt => "lt",
            Op::Le => "le",
            Op::In => "in",
            Op::Contains => "contains",
            Op::Regex => "regex",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Op {
    type Err = QuerySpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "eq" => Op::Eq,
            "ne" => Op::Ne,
            "gt" => Op::Gt,
            "ge" => Op::Ge,
            "lt" => Op::Lt,
            "le" => Op::Le,
            "in" => Op::In,
            "contains" => Op::Contains,
            "regex" => Op::Regex,
            other => return Err(QuerySpecError::UnknownOperator(other.to_string())),
        })
    }
}

/// `field op value`.
#[derive(Debug, Clone)]
pub struct Condition {
    pub field: String,
    pub op: Op,
    pub value: Value,
    pattern: Option<Regex>,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: Op, value: Value) -> Result<Self, QuerySpecError> {
        let field = field.into();
        if field.trim().is_empty() {
            return Err(QuerySpecError::invalid("filter field is empty"));
        }
        let pattern = match op {
            Op::Regex => {
                let Value::String(source) = &value else {
                    return Err(QuerySpecError::invalid(format!(
                        "regex filter on `{field}` needs a string value"
                    )));
                };
                Some(Regex::new(source).map_err(|e| QuerySpecError::InvalidRegex {
                    field: field.clone(),
                    source: e,
                })?)
            }
            Op::In if !matches!(value, Value::List(_)) => {
                return Err(QuerySpecError::invalid(format!(
                    "`in` filter on `{field}` needs a list value"
                )))
            }
            _ => None,
        };
        Ok(Self {
            field,
            op,
            value,
            pattern,
        })
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: Op::Eq,
            value: value.into(),
            pattern: None,
        }
    }

    /// Test a resolved field value.
    pub fn test(&self, actual: &Value) -> bool {
        match self.op {
            Op::Eq => field_equals(actual, &self.value),
            Op::Ne => !field_equals(actual, &self.value),
            Op::Gt => ordering(actual, &self.value) == Some(Ordering::Greater),
            Op::Ge => matches!(
                ordering(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Op::Lt => ordering(actual, &self.value) == Some(Ordering::Less),
            Op::Le => matches!(
                ordering(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Op::In => {
                let options = self.value.as_list().unwrap_or_default();
                match actual {
                    Value::List(items) => items
                        .iter()
                        .any(|item| options.iter().any(|o| values_equal(item, o))),
                    scalar => options.iter().any(|o| values_equal(scalar, o)),
                }
            }
            Op::Contains => match actual {
                Value::List(items) => items.iter().any(|item| values_equal(item, &self.value)),
                Value::String(s) => s.contains(&self.value.to_string()),
                _ => false,
            },
            Op::Regex => match (&self.pattern, actual) {
                (_, Value::Null) => false,
                (Some(pattern), value) => pattern.is_match(&value.to_string()),
                (None, _) => false,
            },
        }
    }

    pub fn matches_note(&self, note: &Note) -> bool {
        self.test(&note.get(&self.field))
    }

    /// True when the condition can be checked on a record that has only
    /// been through base normalization without changing the outcome.
    fn is_pushable(&self) -> bool {
        let root = self.field.split('.').next().unwrap_or_default();
        self.op == Op::Eq && !DERIVED_FIELDS.contains(&root)
    }
}

/// Coerce a string towards the kind of `like`, if it parses as one.
fn coerce(text: &str, like: &Value) -> Option<Value> {
    let text = text.trim();
    match like {
        Value::Int(_) | Value::Float(_) => text
            .parse::<i64>()
            .map(Value::Int)
            .ok()
            .or_else(|| text.parse::<f64>().ok().map(Value::Float)),
        Value::Date(_) | Value::DateTime(_) => Value::parse_iso(text),
        Value::Bool(_) => match text.to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(Value::Bool(true)),
            "false" | "no" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a.loose_eq(b) {
        return true;
    }
    match (a, b) {
        (Value::String(s), other) | (other, Value::String(s)) => {
            coerce(s, other).is_some_and(|v| v.loose_eq(other))
        }
        _ => false,
    }
}

/// A list equals a scalar when it holds exactly that one value.
fn field_equals(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::List(items), scalar) if !matches!(scalar, Value::List(_)) => {
            items.len() == 1 && values_equal(&items[0], scalar)
        }
        _ => values_equal(actual, expected),
    }
}

fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    a.compare(b).or_else(|| match (a, b) {
        (Value::String(s), other) => coerce(s, other)?.compare(other),
        (other, Value::String(s)) => other.compare(&coerce(s, other)?),
        _ => None,
    })
}

/// A filter tree.
#[derive(Debug, Clone)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Expr(Expression),
    Condition(Condition),
}

impl Filter {
    /// Build from a decoded YAML node.
    pub fn from_yaml(node: &serde_yaml::Value) -> Result<Filter, QuerySpecError> {
        let map = node
            .as_mapping()
            .ok_or_else(|| QuerySpecError::invalid("a filter must be a mapping"))?;

        for combinator in ["and", "or", "not", "expr"] {
            let Some(inner) = map.get(combinator) else {
                continue;
            };
            if map.len() != 1 {
                return Err(QuerySpecError::invalid(format!(
                    "`{combinator}` cannot be combined with other filter keys"
                )));
            }
            return match combinator {
                "and" => Ok(Filter::And(children(inner, combinator)?)),
                "or" => Ok(Filter::Or(children(inner, combinator)?)),
                "not" => Ok(Filter::Not(Box::new(Filter::from_yaml(inner)?))),
                _ => {
                    let source = inner.as_str().ok_or_else(|| {
                        QuerySpecError::invalid("`expr` filter must be a string")
                    })?;
                    Ok(Filter::Expr(compile_expression(source)?))
                }
            };
        }
        condition(map).map(Filter::Condition)
    }

    /// Evaluate against one row. `resolve` maps a dotted field path to its
    /// value; `scope` binds expression leaves.
    pub fn matches<F>(&self, resolve: &F, scope: &Scope<'_>) -> Result<bool, EvalError>
    where
        F: Fn(&str) -> Value,
    {
        match self {
            Filter::And(children) => {
                for child in children {
                    if !child.matches(resolve, scope)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Filter::Or(children) => {
                for child in children {
                    if child.matches(resolve, scope)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Filter::Not(inner) => Ok(!inner.matches(resolve, scope)?),
            Filter::Expr(expr) => Ok(expr.evaluate(scope)?.is_truthy()),
            Filter::Condition(condition) => Ok(condition.test(&resolve(&condition.field))),
        }
    }

    /// Equality leaves a loader may apply early: those of a top-level `and`,
    /// or a lone equality leaf. Applying them never drops a row the full
    /// filter would keep.
    pub fn pushdown(&self) -> Vec<Condition> {
        match self {
            Filter::And(children) => children
                .iter()
                .filter_map(|child| match child {
                    Filter::Condition(c) if c.is_pushable() => Some(c.clone()),
                    _ => None,
                })
                .collect(),
            Filter::Condition(c) if c.is_pushable() => vec![c.clone()],
            _ => Vec::new(),
        }
    }
}

fn children(node: &serde_yaml::Value, combinator: &str) -> Result<Vec<Filter>, QuerySpecError> {
    let items = node.as_sequence().ok_or_else(|| {
        QuerySpecError::invalid(format!("`{combinator}` takes a list of filters"))
    })?;
    if items.is_empty() {
        return Err(QuerySpecError::invalid(format!("`{combinator}` list is empty")));
    }
    items.iter().map(Filter::from_yaml).collect()
}

fn condition(map: &Mapping) -> Result<Condition, QuerySpecError> {
    for key in map.keys() {
        match key.as_str() {
            Some("field" | "op" | "value") => {}
            Some(other) => {
                return Err(QuerySpecError::invalid(format!("unknown filter key `{other}`")))
            }
            None => return Err(QuerySpecError::invalid("filter keys must be strings")),
        }
    }
    let field = map
        .get("field")
        .and_then(serde_yaml::Value::as_str)
        .ok_or_else(|| QuerySpecError::invalid("filter condition needs a string `field`"))?;
    let op = map
        .get("op")
        .and_then(serde_yaml::Value::as_str)
        .ok_or_else(|| QuerySpecError::invalid(format!("filter on `{field}` needs an `op`")))?
        .parse::<Op>()?;
    let value = map.get("value").cloned().map(Value::from_yaml).unwrap_or_default();
    Condition::new(field, op, value)
}
