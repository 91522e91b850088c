//! Markdown note parsing and formatting.
//!
//! A note file has three parts:
//!
//! ```text
//! ---                      ┐
//! id: 20240105093000       │ front matter (YAML, `#tag` barewords allowed)
//! tags: #rust #notes       │
//! ---                      ┘
//! # Title                  ┐
//!                          │ body: sections split on `# ` (first only)
//! ## Log                   │ and `## ` heading lines
//! - [ ] 2024-01-05 - ...   ┘
//! ---                      ┐
//! - source:: https://...   │ back matter: `key:: value` references
//! - related:: [[other]]    ┘
//! ```
//!
//! There are two parsers that must agree on every fixture:
//!
//! | Parser | Used by | Approach |
//! |--------|---------|----------|
//! | [`parse`] / [`parse_with_source`] | single-file reads, the repository | owned line vector, regex matching, forward scan |
//! | [`fast::parse`] / [`fast::parse_with_source`] | bulk loads | borrowed line slices, hand-rolled matching, reverse back-matter scan |
//!
//! The only tolerated divergence is the date taken from a timestamped file
//! name (see [`reference::filename_date`]).
//!
//! [`format`] is the inverse of parsing: `format(parse(text))` is a fixed
//! point under re-formatting.

pub mod fast;
mod format;
pub mod reference;

pub use format::{format, render_inline};
pub use reference::{parse, parse_with_source};

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::record::NoteRecord;
use crate::value::{FieldMap, Value};

/// Line that opens and closes front matter, and opens back matter.
pub const SENTINEL: &str = "---";

/// Errors raised while turning text into a [`NoteRecord`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("malformed front matter in {}: {reason}", .path.as_deref().unwrap_or("<text>"))]
    MalformedFrontMatter {
        path: Option<String>,
        reason: String,
    },
}

impl ParseError {
    pub(crate) fn malformed(path: Option<&str>, reason: impl Into<String>) -> Self {
        ParseError::MalformedFrontMatter {
            path: path.map(str::to_string),
            reason: reason.into(),
        }
    }
}

/// Characters allowed after `#` in a bareword tag.
pub(crate) fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '/' || c == '-'
}

/// Decode normalized front-matter YAML into a metadata map.
pub(crate) fn decode_front_matter(yaml: &str, path: Option<&str>) -> Result<FieldMap, ParseError> {
    if yaml.trim().is_empty() {
        return Ok(FieldMap::new());
    }
    let decoded: serde_yaml::Value =
        serde_yaml::from_str(yaml).map_err(|e| ParseError::malformed(path, e.to_string()))?;
    match Value::from_yaml(decoded) {
        Value::Null => Ok(FieldMap::new()),
        Value::Map(map) => Ok(map),
        other => Err(ParseError::malformed(
            path,
            format!("expected a mapping, found {}", other.type_name()),
        )),
    }
}

/// Decode the value half of a `key:: value` back-matter line.
///
/// Values with a bare colon, a ` #`, or a leading `- ` are single-quoted
/// first so YAML reads them as plain strings.
pub(crate) fn decode_reference_value(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return Value::Null;
    }
    let already_quoted = raw.starts_with(['\'', '"', '[', '{']);
    let risky = raw.contains(':') || raw.contains(" #") || raw.starts_with("- ");
    let text = if risky && !already_quoted {
        format!("'{}'", raw.replace('\'', "''"))
    } else {
        raw.to_string()
    };
    match serde_yaml::from_str::<serde_yaml::Value>(&text) {
        Ok(serde_yaml::Value::Mapping(_)) | Err(_) => {
            Value::parse_iso(raw).unwrap_or_else(|| Value::String(raw.to_string()))
        }
        Ok(decoded) => Value::from_yaml(decoded),
    }
}

/// Add a reference, accumulating repeated keys into a list in first-seen
/// order.
pub(crate) fn push_reference(references: &mut FieldMap, key: &str, value: Value) {
    match references.get_mut(key) {
        None => {
            references.insert(key, value);
        }
        Some(Value::List(items)) => items.push(value),
        Some(existing) => {
            let first = std::mem::take(existing);
            *existing = Value::List(vec![first, value]);
        }
    }
}

/// File stem without the extension.
pub(crate) fn file_stem(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    }
}

/// Parse a 12 (`YYYYMMDDhhmm`) or 14 (`YYYYMMDDhhmmss`) digit timestamp.
pub(crate) fn parse_timestamp_digits(digits: &str) -> Option<NaiveDateTime> {
    match digits.len() {
        14 => NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S").ok(),
        12 => NaiveDateTime::parse_from_str(&format!("{digits}00"), "%Y%m%d%H%M%S").ok(),
        _ => None,
    }
}

/// Values a timestamped file name contributes when front matter lacks them.
#[derive(Debug, Default)]
pub(crate) struct FilenameDefaults {
    pub id: Option<i64>,
    pub date: Option<NaiveDateTime>,
    pub title: Option<String>,
}

impl FilenameDefaults {
    pub(crate) fn apply(self, record: &mut NoteRecord) {
        if let Some(id) = self.id {
            if !record.metadata.contains_key("id") {
                record.metadata.insert("id", Value::Int(id));
            }
        }
        if let Some(date) = self.date {
            if !record.metadata.contains_key("date") {
                record.metadata.insert("date", Value::DateTime(date));
            }
        }
        if let Some(title) = self.title {
            if !record.metadata.contains_key("title") {
                record.metadata.insert("title", Value::String(title));
            }
        }
    }
}

/// Remove at most one blank line from each end and join.
pub(crate) fn trim_one_blank<S: AsRef<str>>(lines: &[S]) -> String {
    let mut slice = lines;
    if slice.first().is_some_and(|l| l.as_ref().trim().is_empty()) {
        slice = &slice[1..];
    }
    if slice.last().is_some_and(|l| l.as_ref().trim().is_empty()) {
        slice = &slice[..slice.len() - 1];
    }
    let mut out = String::new();
    for (i, line) in slice.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line.as_ref());
    }
    out
}

/// Text after a heading marker, if the line is a heading of that level.
pub(crate) fn heading_text<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.strip_prefix(marker)
        .filter(|rest| !rest.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reference_value_quotes_colons() {
        assert_eq!(
            decode_reference_value("https://example.com/a"),
            Value::from("https://example.com/a")
        );
        assert_eq!(decode_reference_value("42"), Value::Int(42));
        assert_eq!(
            decode_reference_value("[a, b]"),
            Value::List(vec![Value::from("a"), Value::from("b")])
        );
        assert_eq!(decode_reference_value("  "), Value::Null);
        assert_eq!(
            decode_reference_value("see: this # and that"),
            Value::from("see: this # and that")
        );
    }

    #[test]
    fn test_push_reference_accumulates() {
        let mut refs = FieldMap::new();
        push_reference(&mut refs, "rel", Value::from("a"));
        push_reference(&mut refs, "rel", Value::from("b"));
        push_reference(&mut refs, "rel", Value::from("c"));
        assert_eq!(
            refs.get("rel"),
            Some(&Value::List(vec![
                Value::from("a"),
                Value::from("b"),
                Value::from("c")
            ]))
        );
    }

    #[test]
    fn test_decode_front_matter_rejects_scalar() {
        let err = decode_front_matter("just text", Some("x.md")).unwrap_err();
        assert!(err.to_string().contains("x.md"));
    }

    #[test]
    fn test_trim_one_blank() {
        assert_eq!(trim_one_blank(&["", "", "a", "", ""]), "\na\n");
        assert_eq!(trim_one_blank(&[""]), "");
        assert_eq!(trim_one_blank::<&str>(&[]), "");
    }

    #[test]
    fn test_parse_timestamp_digits() {
        assert!(parse_timestamp_digits("202401051230").is_some());
        assert!(parse_timestamp_digits("20240105123045").is_some());
        assert!(parse_timestamp_digits("20241305123045").is_none());
        assert!(parse_timestamp_digits("2024").is_none());
    }
}
