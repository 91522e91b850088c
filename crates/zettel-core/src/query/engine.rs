//! Query execution.
//!
//! Stages run in a fixed order over one [`QuerySpec`]:
//!
//! 1. Resolve the source directory.
//! 2. Load notes, passing the filter's pushdown conditions to the source.
//! 3. Re-apply the full filter.
//! 4. Bind lookups (correlated sub-queries) onto each row.
//! 5. Expand a list field into one row per element.
//! 6. Sort (stable, nulls last in both directions).
//! 7. Project columns.
//! 8. Truncate to `limit`, then sample, then group.
//!
//! Execution is synchronous and never mutates the notes it reads.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use thiserror::Error;

use super::source::{NoteSource, SourceRequest};
use super::spec::{ColumnValue, Direction, Lookup, QuerySpec, SourceSpec};
use crate::expr::{EvalError, Scope};
use crate::normalize::NormalizeContext;
use crate::note::Note;
use crate::value::{FieldMap, Value};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query has no source directory and no default directory is configured")]
    MissingDirectory,
    #[error("failed to load notes from {directory}: {reason:#}")]
    Load {
        directory: String,
        reason: anyhow::Error,
    },
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Advisory conditions raised while executing. They never stop a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryWarning {
    /// A lookup without a match expression joined its whole pool onto every row.
    CrossJoin { lookup: String, candidates: usize },
}

impl std::fmt::Display for QueryWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryWarning::CrossJoin { lookup, candidates } => write!(
                f,
                "lookup `{lookup}` has no match expression; cross-joining {candidates} candidate(s) onto every row"
            ),
        }
    }
}

/// Rows sharing one `group_by` value, by index into [`QueryResult::rows`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub key: Value,
    pub rows: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    /// Column labels in output order.
    pub columns: Vec<String>,
    /// One map per row, keyed by column label.
    pub rows: Vec<FieldMap>,
    /// Empty unless `output.group_by` is set.
    pub groups: Vec<Group>,
    pub warnings: Vec<QueryWarning>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Used when the spec's `source.directory` is absent.
    pub default_directory: Option<String>,
    pub ctx: NormalizeContext,
    /// Seed for `output.sample`. `None` draws from entropy.
    pub seed: Option<u64>,
}

/// A row before projection: which note it came from plus the names bound
/// by lookups and expansion.
#[derive(Debug, Clone)]
struct Row {
    note: usize,
    bindings: FieldMap,
}

/// Loaded notes with their expression variables, computed once per note.
struct Corpus {
    notes: Vec<Note>,
    vars: Vec<FieldMap>,
}

impl Corpus {
    fn new(notes: Vec<Note>) -> Self {
        let vars = notes.iter().map(Note::variables).collect();
        Self { notes, vars }
    }

    fn resolve(&self, row: &Row, path: &str) -> Value {
        let head = path.split('.').next().unwrap_or(path);
        match row.bindings.get(head) {
            Some(bound) => bound.get_path(&path[head.len()..]),
            None => self.notes[row.note].get(path),
        }
    }
}

/// Run `spec` against `source`.
pub fn execute<S>(spec: &QuerySpec, source: &S, options: &ExecuteOptions) -> Result<QueryResult, QueryError>
where
    S: NoteSource + ?Sized,
{
    let directory = spec
        .source
        .directory
        .clone()
        .or_else(|| options.default_directory.clone())
        .ok_or(QueryError::MissingDirectory)?;

    let conditions = spec
        .filter
        .as_ref()
        .map(|f| f.pushdown())
        .unwrap_or_default();
    let notes = load(source, &spec.source, &directory, &conditions, &options.ctx)?;
    let loaded = notes.len();
    let corpus = Corpus::new(notes);

    let mut rows = Vec::with_capacity(corpus.notes.len());
    for idx in 0..corpus.notes.len() {
        let row = Row {
            note: idx,
            bindings: FieldMap::new(),
        };
        let keep = match &spec.filter {
            None => true,
            Some(filter) => {
                let scope = Scope::new(&corpus.vars[idx]);
                filter.matches(&|path: &str| corpus.resolve(&row, path), &scope)?
            }
        };
        if keep {
            rows.push(row);
        }
    }
    tracing::debug!(directory = %directory, loaded, matched = rows.len(), "filtered notes");

    let mut warnings = Vec::new();
    for lookup in &spec.lookups {
        bind_lookup(lookup, source, &directory, options, &corpus, &mut rows, &mut warnings)?;
    }

    if let Some(expand) = &spec.expand {
        let mut expanded = Vec::with_capacity(rows.len());
        for row in rows {
            let items = match corpus.resolve(&row, &expand.field) {
                Value::Null => Vec::new(),
                Value::List(items) => items,
                other => vec![other],
            };
            for item in items {
                let mut bindings = row.bindings.clone();
                bindings.insert(expand.alias.as_str(), item);
                let candidate = Row {
                    note: row.note,
                    bindings,
                };
                let keep = match &expand.filter {
                    None => true,
                    Some(filter) => {
                        let base = Scope::new(&corpus.vars[candidate.note]);
                        let scope = base.child(&candidate.bindings);
                        filter.matches(&|path: &str| corpus.resolve(&candidate, path), &scope)?
                    }
                };
                if keep {
                    expanded.push(candidate);
                }
            }
        }
        tracing::debug!(field = %expand.field, rows = expanded.len(), "expanded rows");
        rows = expanded;
    }

    if !spec.sort.is_empty() {
        let mut keyed: Vec<(Vec<Value>, Row)> = rows
            .into_iter()
            .map(|row| {
                let keys = spec.sort.iter().map(|k| corpus.resolve(&row, &k.field)).collect();
                (keys, row)
            })
            .collect();
        keyed.sort_by(|(a, _), (b, _)| {
            spec.sort
                .iter()
                .zip(a.iter().zip(b))
                .map(|(key, (x, y))| compare_nulls_last(x, y, key.direction))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        rows = keyed.into_iter().map(|(_, row)| row).collect();
    }

    let columns = spec.effective_columns();
    let mut projected = Vec::with_capacity(rows.len());
    for row in rows {
        let mut out = FieldMap::with_capacity(columns.len());
        for column in &columns {
            let value = match &column.value {
                ColumnValue::Field(path) => corpus.resolve(&row, path),
                ColumnValue::Expr(expr) => {
                    let base = Scope::new(&corpus.vars[row.note]);
                    expr.evaluate(&base.child(&row.bindings))?
                }
            };
            let value = match &column.format {
                Some(pattern) => value
                    .format_date(pattern)
                    .map(Value::String)
                    .unwrap_or(value),
                None => value,
            };
            out.insert(column.label.as_str(), value);
        }
        projected.push((row, out));
    }

    if let Some(limit) = spec.output.limit {
        projected.truncate(limit);
    }
    if let Some(size) = spec.output.sample {
        projected = sample(projected, size, options.seed);
    }

    let groups = match &spec.output.group_by {
        None => Vec::new(),
        Some(field) => group(projected.iter().map(|(row, _)| corpus.resolve(row, field))),
    };

    Ok(QueryResult {
        columns: columns.into_iter().map(|c| c.label).collect(),
        rows: projected.into_iter().map(|(_, out)| out).collect(),
        groups,
        warnings,
    })
}

fn load<S>(
    source: &S,
    spec: &SourceSpec,
    directory: &str,
    conditions: &[super::filter::Condition],
    ctx: &NormalizeContext,
) -> Result<Vec<Note>, QueryError>
where
    S: NoteSource + ?Sized,
{
    let request = SourceRequest {
        directory,
        extensions: &spec.extensions,
        recursive: spec.recursive,
        conditions,
    };
    source.load(&request, ctx).map_err(|reason| QueryError::Load {
        directory: directory.to_string(),
        reason,
    })
}

/// Compact map of a note used for `row`, `candidate` and lookup results:
/// back matter overlaid by metadata, then location.
fn note_map(note: &Note) -> FieldMap {
    let mut map = FieldMap::with_capacity(note.metadata().len() + note.references().len() + 2);
    for (key, value) in note.references().iter() {
        map.insert(key, value.clone());
    }
    for (key, value) in note.metadata().iter() {
        map.insert(key, value.clone());
    }
    if let Some(path) = note.path() {
        map.insert("path", Value::from(path));
    }
    if let Some(name) = note.filename() {
        map.insert("filename", Value::from(name));
    }
    map
}

fn bind_lookup<S>(
    lookup: &Lookup,
    source: &S,
    outer_directory: &str,
    options: &ExecuteOptions,
    corpus: &Corpus,
    rows: &mut [Row],
    warnings: &mut Vec<QueryWarning>,
) -> Result<(), QueryError>
where
    S: NoteSource + ?Sized,
{
    let directory = lookup
        .source
        .directory
        .clone()
        .unwrap_or_else(|| outer_directory.to_string());
    let conditions = lookup
        .filter
        .as_ref()
        .map(|f| f.pushdown())
        .unwrap_or_default();
    let pool = Corpus::new(load(source, &lookup.source, &directory, &conditions, &options.ctx)?);

    let mut candidates = Vec::with_capacity(pool.notes.len());
    for (idx, note) in pool.notes.iter().enumerate() {
        let keep = match &lookup.filter {
            None => true,
            Some(filter) => {
                let row = Row {
                    note: idx,
                    bindings: FieldMap::new(),
                };
                filter.matches(&|path: &str| pool.resolve(&row, path), &Scope::new(&pool.vars[idx]))?
            }
        };
        if keep {
            candidates.push(Value::Map(note_map(note)));
        }
    }

    let Some(matcher) = &lookup.matcher else {
        tracing::warn!(
            lookup = %lookup.name,
            candidates = candidates.len(),
            "lookup has no match expression; cross-joining"
        );
        warnings.push(QueryWarning::CrossJoin {
            lookup: lookup.name.clone(),
            candidates: candidates.len(),
        });
        let all = Value::List(candidates);
        for row in rows.iter_mut() {
            row.bindings.insert(lookup.name.as_str(), all.clone());
        }
        return Ok(());
    };

    for row in rows.iter_mut() {
        let outer = Value::Map(note_map(&corpus.notes[row.note]));
        let base = Scope::new(&corpus.vars[row.note]);
        let with_bindings = base.child(&row.bindings);
        let mut matched = Vec::new();
        for candidate in &candidates {
            let mut pair = FieldMap::with_capacity(2);
            pair.insert("row", outer.clone());
            pair.insert("candidate", candidate.clone());
            if matcher.evaluate(&with_bindings.child(&pair))?.is_truthy() {
                matched.push(candidate.clone());
            }
        }
        row.bindings.insert(lookup.name.as_str(), Value::List(matched));
    }
    Ok(())
}

/// Nulls sort last whatever the direction.
fn compare_nulls_last(a: &Value, b: &Value, direction: Direction) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ordering = total_order(a, b);
            match direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            }
        }
    }
}

/// [`Value::compare`] extended to every pair: values of different kinds
/// order by [`kind_rank`], NaN sorts after every other number, and maps of
/// the same rank tie.
fn total_order(a: &Value, b: &Value) -> Ordering {
    if let Some(ordering) = a.compare(b) {
        return ordering;
    }
    match (a, b) {
        (Value::List(x), Value::List(y)) => x
            .iter()
            .zip(y)
            .map(|(p, q)| total_order(p, q))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => kind_rank(a)
            .cmp(&kind_rank(b))
            .then_with(|| is_nan(a).cmp(&is_nan(b))),
    }
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Bool(_) => 0,
        Value::Int(_) | Value::Float(_) => 1,
        Value::Date(_) | Value::DateTime(_) => 2,
        Value::String(_) => 3,
        Value::List(_) => 4,
        Value::Map(_) => 5,
        Value::Null => 6,
    }
}

fn is_nan(value: &Value) -> bool {
    matches!(value, Value::Float(f) if f.is_nan())
}

/// Keep `size` rows chosen at random, preserving their order.
fn sample<T>(rows: Vec<T>, size: usize, seed: Option<u64>) -> Vec<T> {
    if size >= rows.len() {
        return rows;
    }
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut picked = rand::seq::index::sample(&mut rng, rows.len(), size).into_vec();
    picked.sort_unstable();
    let mut picked = picked.into_iter().peekable();
    rows.into_iter()
        .enumerate()
        .filter_map(|(idx, row)| {
            if picked.peek() == Some(&idx) {
                picked.next();
                Some(row)
            } else {
                None
            }
        })
        .collect()
}

/// Group positions by key in first-appearance order.
fn group(keys: impl Iterator<Item = Value>) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    for (idx, key) in keys.enumerate() {
        match groups.iter_mut().find(|g| g.key.loose_eq(&key)) {
            Some(existing) => existing.rows.push(idx),
            None => groups.push(Group {
                key,
                rows: vec![idx],
            }),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nulls_sort_last_both_ways() {
        let mut values = vec![Value::Null, Value::Int(2), Value::Int(1)];
        values.sort_by(|a, b| compare_nulls_last(a, b, Direction::Asc));
        assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Null]);
        values.sort_by(|a, b| compare_nulls_last(a, b, Direction::Desc));
        assert_eq!(values, vec![Value::Int(2), Value::Int(1), Value::Null]);
    }

    #[test]
    fn test_mixed_kinds_sort_by_rank_with_nan_last() {
        let mut values = vec![
            Value::from("b"),
            Value::Float(f64::NAN),
            Value::Int(3),
            Value::Null,
            Value::Bool(true),
            Value::from("a"),
            Value::Float(1.5),
        ];
        values.sort_by(|a, b| compare_nulls_last(a, b, Direction::Asc));
        assert_eq!(values[0], Value::Bool(true));
        assert_eq!(values[1], Value::Float(1.5));
        assert_eq!(values[2], Value::Int(3));
        assert!(is_nan(&values[3]));
        assert_eq!(values[4..], [Value::from("a"), Value::from("b"), Value::Null]);

        values.sort_by(|a, b| compare_nulls_last(a, b, Direction::Desc));
        assert_eq!(values[0], Value::from("b"));
        assert!(is_nan(&values[2]));
        assert_eq!(values[3], Value::Int(3));
        assert_eq!(values[6], Value::Null);
    }

    #[test]
    fn test_lists_with_mixed_elements_order_elementwise() {
        let short = Value::List(vec![Value::Int(1)]);
        let mixed = Value::List(vec![Value::Int(1), Value::from("x")]);
        let numeric = Value::List(vec![Value::Int(1), Value::Int(9)]);
        assert_eq!(total_order(&short, &mixed), Ordering::Less);
        assert_eq!(total_order(&numeric, &mixed), Ordering::Less);
        assert_eq!(total_order(&mixed, &numeric), Ordering::Greater);
    }

    #[test]
    fn test_sample_preserves_order_and_is_seedable() {
        let rows: Vec<u32> = (0..20).collect();
        let a = sample(rows.clone(), 5, Some(7));
        let b = sample(rows.clone(), 5, Some(7));
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(sample(rows, 50, Some(7)).len(), 20);
    }

    #[test]
    fn test_group_first_appearance_order() {
        let groups = group(
            [Value::from("b"), Value::from("a"), Value::from("b")].into_iter(),
        );
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, Value::from("b"));
        assert_eq!(groups[0].rows, vec![0, 2]);
    }
}
