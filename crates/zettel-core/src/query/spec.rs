//! QuerySpec documents.
//!
//! A query is a YAML (or JSON) mapping:
//!
//! ```yaml
//! source:
//!   directory: ~/notes
//!   extensions: [md]
//! filter:
//!   and:
//!     - { field: type, op: eq, value: project }
//!     - { field: tags, op: contains, value: sprint-1 }
//! columns:
//!   - title
//!   - { expr: "len(tags)", label: tag count }
//! sort:
//!   - { field: date, direction: desc }
//! output:
//!   format: table
//!   limit: 20
//! ```
//!
//! Parsing is strict: unknown keys, unknown operators, unknown output
//! formats, bad regexes, bad date formats and disallowed expressions are
//! all rejected here, before any file is read.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::filter::Filter;
use crate::expr::{EvalError, Expression};
use crate::value::is_valid_date_format;

/// Columns shown when a query names none.
pub const DEFAULT_COLUMNS: [&str; 5] = ["id", "title", "type", "date", "tags"];

#[derive(Debug, Error)]
pub enum QuerySpecError {
    #[error("invalid query spec: {0}")]
    Invalid(String),
    #[error("unknown filter operator `{0}` (expected one of eq, ne, gt, ge, lt, le, in, contains, regex)")]
    UnknownOperator(String),
    #[error("unknown output format `{0}` (expected table, json, csv or markdown)")]
    UnknownFormat(String),
    #[error("invalid regex for field `{field}`: {source}")]
    InvalidRegex {
        field: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid expression `{expr}`: {source}")]
    InvalidExpression {
        expr: String,
        #[source]
        source: EvalError,
    },
    #[error("invalid date format `{0}`")]
    InvalidDateFormat(String),
}

impl QuerySpecError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        QuerySpecError::Invalid(message.into())
    }
}

pub(crate) fn compile_expression(source: &str) -> Result<Expression, QuerySpecError> {
    Expression::compile(source).map_err(|e| QuerySpecError::InvalidExpression {
        expr: source.to_string(),
        source: e,
    })
}

/// Where notes come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSpec {
    /// Root directory. Falls back to the caller's default when absent.
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    /// File extensions without the leading dot.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_recursive() -> bool {
    true
}

fn default_extensions() -> Vec<String> {
    vec!["md".to_string()]
}

impl Default for SourceSpec {
    fn default() -> Self {
        Self {
            directory: None,
            recursive: default_recursive(),
            extensions: default_extensions(),
        }
    }
}

impl SourceSpec {
    fn normalized(mut self) -> Result<Self, QuerySpecError> {
        self.extensions = self
            .extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_string())
            .filter(|ext| !ext.is_empty())
            .collect();
        if self.extensions.is_empty() {
            return Err(QuerySpecError::invalid("source.extensions is empty"));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub enum ColumnValue {
    /// Dotted field path, e.g. `title` or `owner.name`.
    Field(String),
    Expr(Expression),
}

#[derive(Debug, Clone)]
pub struct Column {
    pub label: String,
    pub value: ColumnValue,
    /// strftime pattern applied to date values.
    pub format: Option<String>,
    /// Hint for interactive front ends; the engine ignores it.
    pub editable: bool,
}

impl Column {
    pub fn field(name: &str) -> Self {
        Self {
            label: name.to_string(),
            value: ColumnValue::Field(name.to_string()),
            format: None,
            editable: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortKey {
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
}

/// Flatten a list field into one row per element.
#[derive(Debug, Clone)]
pub struct Expand {
    pub field: String,
    /// Name the element is bound to; defaults to the field name.
    pub alias: String,
    pub filter: Option<Filter>,
}

/// A named, per-row correlated sub-query.
#[derive(Debug, Clone)]
pub struct Lookup {
    pub name: String,
    pub source: SourceSpec,
    pub filter: Option<Filter>,
    /// Evaluated with the outer row's variables plus `row` and `candidate`.
    /// `None` joins every candidate onto every row.
    pub matcher: Option<Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
    Markdown,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Markdown => "markdown",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = QuerySpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            _ => Err(QuerySpecError::UnknownFormat(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSpec {
    /// `None` leaves the choice to the caller's configured default.
    pub format: Option<OutputFormat>,
    pub file: Option<PathBuf>,
    pub limit: Option<usize>,
    pub sample: Option<usize>,
    pub group_by: Option<String>,
}

/// A parsed, validated query. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub source: SourceSpec,
    pub filter: Option<Filter>,
    /// Empty means [`DEFAULT_COLUMNS`].
    pub columns: Vec<Column>,
    pub sort: Vec<SortKey>,
    pub expand: Option<Expand>,
    pub lookups: Vec<Lookup>,
    pub output: OutputSpec,
}

impl QuerySpec {
    /// Parse an inline YAML or JSON document.
    pub fn parse(text: &str) -> Result<Self, QuerySpecError> {
        if text.trim().is_empty() {
            return Err(QuerySpecError::invalid("empty document"));
        }
        let raw: RawQuerySpec =
            serde_yaml::from_str(text).map_err(|e| QuerySpecError::invalid(e.to_string()))?;
        raw.compile()
    }

    /// The columns to project, defaults included.
    pub fn effective_columns(&self) -> Vec<Column> {
        if self.columns.is_empty() {
            DEFAULT_COLUMNS.iter().map(|name| Column::field(name)).collect()
        } else {
            self.columns.clone()
        }
    }
}

impl FromStr for QuerySpec {
    type Err = QuerySpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QuerySpec::parse(s)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Wire shapes
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawQuerySpec {
    #[serde(default)]
    source: SourceSpec,
    #[serde(default)]
    filter: Option<serde_yaml::Value>,
    #[serde(default)]
    columns: Vec<RawColumn>,
    #[serde(default)]
    sort: Vec<SortKey>,
    #[serde(default)]
    expand: Option<RawExpand>,
    #[serde(default)]
    lookups: Vec<RawLookup>,
    #[serde(default)]
    output: RawOutput,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawColumn {
    Name(String),
    Full(RawColumnSpec),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawColumnSpec {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    expr: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    editable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExpand {
    field: String,
    #[serde(default, rename = "as")]
    alias: Option<String>,
    #[serde(default)]
    filter: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLookup {
    name: String,
    #[serde(default)]
    source: SourceSpec,
    #[serde(default)]
    filter: Option<serde_yaml::Value>,
    #[serde(default, rename = "match")]
    matcher: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOutput {
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    file: Option<PathBuf>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    sample: Option<usize>,
    #[serde(default)]
    group_by: Option<String>,
}

fn compile_filter(node: Option<serde_yaml::Value>) -> Result<Option<Filter>, QuerySpecError> {
    node.filter(|n| !n.is_null())
        .map(|n| Filter::from_yaml(&n))
        .transpose()
}

fn non_empty(value: &str, what: &str) -> Result<(), QuerySpecError> {
    if value.trim().is_empty() {
        return Err(QuerySpecError::invalid(format!("{what} is empty")));
    }
    Ok(())
}

impl RawQuerySpec {
    fn compile(self) -> Result<QuerySpec, QuerySpecError> {
        let columns = self
            .columns
            .into_iter()
            .map(RawColumn::compile)
            .collect::<Result<Vec<_>, _>>()?;

        for key in &self.sort {
            non_empty(&key.field, "sort.field")?;
        }

        let expand = match self.expand {
            None => None,
            Some(raw) => {
                non_empty(&raw.field, "expand.field")?;
                let alias = raw.alias.unwrap_or_else(|| raw.field.clone());
                non_empty(&alias, "expand.as")?;
                Some(Expand {
                    field: raw.field,
                    alias,
                    filter: compile_filter(raw.filter)?,
                })
            }
        };

        let mut lookups: Vec<Lookup> = Vec::with_capacity(self.lookups.len());
        for raw in self.lookups {
            non_empty(&raw.name, "lookups.name")?;
            if lookups.iter().any(|l| l.name == raw.name) {
                return Err(QuerySpecError::invalid(format!(
                    "duplicate lookup name `{}`",
                    raw.name
                )));
            }
            lookups.push(Lookup {
                name: raw.name,
                source: raw.source.normalized()?,
                filter: compile_filter(raw.filter)?,
                matcher: raw.matcher.as_deref().map(compile_expression).transpose()?,
            });
        }

        let output = OutputSpec {
            format: self.output.format.as_deref().map(str::parse).transpose()?,
            file: self.output.file,
            limit: self.output.limit,
            sample: self.output.sample,
            group_by: self.output.group_by,
        };

        Ok(QuerySpec {
            source: self.source.normalized()?,
            filter: compile_filter(self.filter)?,
            columns,
            sort: self.sort,
            expand,
            lookups,
            output,
        })
    }
}

impl RawColumn {
    fn compile(self) -> Result<Column, QuerySpecError> {
        let spec = match self {
            RawColumn::Name(name) => {
                non_empty(&name, "column name")?;
                return Ok(Column::field(&name));
            }
            RawColumn::Full(spec) => spec,
        };

        // With both set, the expression computes and the field names the column.
        let (value, default_label) = match (spec.expr, spec.field) {
            (Some(expr), field) => {
                let compiled = compile_expression(&expr)?;
                (ColumnValue::Expr(compiled), field.unwrap_or(expr))
            }
            (None, Some(field)) => {
                non_empty(&field, "column field")?;
                (ColumnValue::Field(field.clone()), field)
            }
            (None, None) => {
                return Err(QuerySpecError::invalid(
                    "column needs a `field` or an `expr`",
                ))
            }
        };

        if let Some(format) = &spec.format {
            if !is_valid_date_format(format) {
                return Err(QuerySpecError::InvalidDateFormat(format.clone()));
            }
        }

        Ok(Column {
            label: spec.label.unwrap_or(default_label),
            value,
            format: spec.format,
            editable: spec.editable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_document() {
        let spec = QuerySpec::parse(
            r#"
source:
  directory: /notes
  extensions: [.md, txt]
filter:
  and:
    - { field: type, op: eq, value: project }
    - { expr: "len(tags) > 0" }
columns:
  - title
  - { expr: "upper(title)", label: shout }
  - { field: date, format: "%Y" }
sort:
  - { field: date, direction: desc }
expand: { field: log, as: entry }
lookups:
  - name: related
    match: "candidate['project'] == id"
output: { format: csv, limit: 5, sample: 2, group_by: type }
"#,
        )
        .unwrap();

        assert_eq!(spec.source.directory.as_deref(), Some("/notes"));
        assert_eq!(spec.source.extensions, vec!["md", "txt"]);
        assert!(spec.filter.is_some());
        assert_eq!(spec.columns.len(), 3);
        assert_eq!(spec.columns[1].label, "shout");
        assert_eq!(spec.sort[0].direction, Direction::Desc);
        assert_eq!(spec.expand.as_ref().unwrap().alias, "entry");
        assert!(spec.lookups[0].matcher.is_some());
        assert_eq!(spec.output.format, Some(OutputFormat::Csv));
        assert_eq!(spec.output.limit, Some(5));
    }

    #[test]
    fn test_json_documents_are_accepted() {
        let spec = QuerySpec::parse(r#"{"columns": ["id"], "output": {"format": "json"}}"#).unwrap();
        assert_eq!(spec.output.format, Some(OutputFormat::Json));
        assert_eq!(spec.effective_columns().len(), 1);
    }

    #[test]
    fn test_default_columns() {
        let spec = QuerySpec::parse("source: {directory: x}").unwrap();
        let labels: Vec<String> = spec.effective_columns().into_iter().map(|c| c.label).collect();
        assert_eq!(labels, DEFAULT_COLUMNS);
    }

    #[test]
    fn test_rejections_happen_at_parse_time() {
        let cases = [
            ("bogus: 1", "unknown key"),
            ("output: {format: xml}", "unknown format"),
            ("filter: {field: a, op: like, value: b}", "unknown operator"),
            ("filter: {field: a, op: regex, value: '('}", "bad regex"),
            ("columns: [{label: nothing}]", "column without source"),
            ("columns: [{field: date, format: '%Q'}]", "bad date format"),
            ("columns: [{expr: 'x.y'}]", "disallowed expression"),
            ("sort: [{field: date, direction: sideways}]", "bad direction"),
            ("lookups: [{name: a}, {name: a}]", "duplicate lookup"),
            ("", "empty"),
        ];
        for (doc, why) in cases {
            assert!(QuerySpec::parse(doc).is_err(), "{why}: {doc:?} should fail");
        }
        assert!(matches!(
            QuerySpec::parse("output: {format: xml}"),
            Err(QuerySpecError::UnknownFormat(_))
        ));
        assert!(matches!(
            QuerySpec::parse("filter: {field: a, op: like, value: b}"),
            Err(QuerySpecError::UnknownOperator(_))
        ));
    }
}
