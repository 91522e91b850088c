//! Render a [`NoteRecord`] back to note text.
//!
//! Layout rules:
//!
//! - front matter keys `id`, `title`, `date`, `type`, `tags` first, the rest
//!   alphabetically; lists in flow style, maps as indented blocks
//! - one blank line after every heading and after every section body
//! - two trailing spaces on a body line followed by another non-blank line
//!   (markdown hard break), except inside code fences
//! - back matter as `- key:: value`, with falsy values written as `- key::`
//!
//! Formatting is idempotent: re-parsing and re-formatting the output yields
//! the same text.

use super::{decode_reference_value, SENTINEL};
use crate::record::NoteRecord;
use crate::value::{FieldMap, Value};

const TOP_KEYS: [&str; 5] = ["id", "title", "date", "type", "tags"];

const SPECIAL_LEAD: [char; 19] = [
    '-', '?', ':', ',', '[', ']', '{', '}', '#', '&', '*', '!', '|', '>', '\'', '"', '%', '@',
    '`',
];

/// Render a record as note text.
pub fn format(record: &NoteRecord) -> String {
    let mut out = String::new();
    out.push_str(SENTINEL);
    out.push('\n');
    for (key, value) in ordered_metadata(&record.metadata) {
        write_entry(&mut out, key, value, 0);
    }
    out.push_str(SENTINEL);
    out.push('\n');

    for section in &record.sections {
        let body = with_hard_breaks(&section.body);
        if section.heading.is_empty() {
            if body.trim().is_empty() {
                continue;
            }
            out.push('\n');
        } else {
            out.push_str(&section.heading);
            out.push_str("\n\n");
            if body.is_empty() {
                continue;
            }
        }
        out.push_str(&body);
        out.push_str("\n\n");
    }

    if !record.references.is_empty() {
        out.push_str(SENTINEL);
        out.push('\n');
        for (key, value) in record.references.iter() {
            let rendered = render_reference(value);
            if rendered.is_empty() {
                out.push_str(&format!("- {key}::\n"));
            } else {
                out.push_str(&format!("- {key}:: {rendered}\n"));
            }
        }
    }
    out
}

/// Render a value as a single-line YAML flow scalar or collection.
pub fn render_inline(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => render_float(*f),
        Value::String(s) => quote_string(s),
        Value::Date(_) | Value::DateTime(_) => value.to_string(),
        Value::List(items) => {
            let items: Vec<String> = items.iter().map(render_flow_item).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Map(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", render_key(k), render_flow_item(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
    }
}

/// Inside flow collections a datetime's `:` is ambiguous, so it stays quoted.
fn render_flow_item(value: &Value) -> String {
    match value {
        Value::DateTime(_) => quote_string(&value.to_string()),
        other => render_inline(other),
    }
}

fn ordered_metadata(metadata: &FieldMap) -> Vec<(&str, &Value)> {
    let mut entries: Vec<(&str, &Value)> = TOP_KEYS
        .iter()
        .filter_map(|key| metadata.get(key).map(|v| (*key, v)))
        .collect();
    let mut rest: Vec<(&str, &Value)> = metadata
        .iter()
        .filter(|(key, _)| !TOP_KEYS.contains(key))
        .collect();
    rest.sort_by(|a, b| a.0.cmp(b.0));
    entries.extend(rest);
    entries
}

fn write_entry(out: &mut String, key: &str, value: &Value, indent: usize) {
    let pad = " ".repeat(indent);
    let key = render_key(key);
    match value {
        Value::Null => out.push_str(&format!("{pad}{key}:\n")),
        Value::Map(map) if !map.is_empty() => {
            out.push_str(&format!("{pad}{key}:\n"));
            for (k, v) in map.iter() {
                write_entry(out, k, v, indent + 2);
            }
        }
        other => out.push_str(&format!("{pad}{key}: {}\n", render_inline(other))),
    }
}

fn render_key(key: &str) -> String {
    let plain = !key.is_empty()
        && !key.starts_with('-')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if plain {
        key.to_string()
    } else {
        quote_string(key)
    }
}

fn render_float(f: f64) -> String {
    if f.is_nan() {
        ".nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { ".inf" } else { "-.inf" }.to_string()
    } else {
        format!("{f:?}")
    }
}

fn quote_string(s: &str) -> String {
    if s.contains(|c: char| c.is_control()) {
        return serde_json::Value::String(s.to_string()).to_string();
    }
    if needs_quotes(s) {
        format!("'{}'", s.replace('\'', "''"))
    } else {
        s.to_string()
    }
}

fn needs_quotes(s: &str) -> bool {
    if s.is_empty() || s.trim() != s || s.starts_with(SPECIAL_LEAD) {
        return true;
    }
    if s.contains([':', '#', ',', '[', ']', '{', '}']) {
        return true;
    }
    !matches!(
        serde_yaml::from_str::<serde_yaml::Value>(s),
        Ok(serde_yaml::Value::String(ref decoded)) if decoded == s
    )
}

fn render_reference(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) if s.is_empty() => String::new(),
        Value::List(items) if items.is_empty() => String::new(),
        Value::List(_) | Value::Map(_) => render_inline(value),
        scalar => {
            let plain = scalar.to_string();
            if decode_reference_value(&plain) == *scalar {
                plain
            } else {
                render_inline(scalar)
            }
        }
    }
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

fn with_hard_breaks(body: &str) -> String {
    let lines: Vec<&str> = body.split('\n').collect();
    let mut out = String::with_capacity(body.len() + lines.len() * 2);
    let mut in_fence = false;
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line);
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        let next_is_text = lines
            .get(i + 1)
            .is_some_and(|next| !next.trim().is_empty() && !is_fence(next));
        if !in_fence && next_is_text && !line.trim().is_empty() && !line.ends_with("  ") {
            out.push_str("  ");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::parse;
    use crate::record::Section;

    #[test]
    fn test_front_matter_key_order() {
        let mut record = NoteRecord::new();
        record.metadata.insert("zeta", Value::Int(1));
        record.metadata.insert("tags", Value::List(vec![Value::from("a")]));
        record.metadata.insert("alpha", Value::Bool(true));
        record.metadata.insert("title", Value::from("T"));
        let text = format(&record);
        assert_eq!(text, "---\ntitle: T\ntags: [a]\nalpha: true\nzeta: 1\n---\n");
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_string("plain words"), "plain words");
        assert_eq!(quote_string("C# rocks"), "'C# rocks'");
        assert_eq!(quote_string("it's: here"), "'it''s: here'");
        assert_eq!(quote_string("true"), "'true'");
        assert_eq!(quote_string("42"), "'42'");
        assert_eq!(quote_string(""), "''");
        assert_eq!(quote_string("two\nlines"), "\"two\\nlines\"");
    }

    #[test]
    fn test_datetime_renders_unquoted_at_top_level() {
        let dt = Value::parse_iso("2024-01-05T12:30:00").unwrap();
        assert_eq!(render_inline(&dt), "2024-01-05T12:30:00");
        assert_eq!(
            render_inline(&Value::List(vec![dt.clone()])),
            "['2024-01-05T12:30:00']"
        );

        let mut record = NoteRecord::new();
        record.metadata.insert("date", dt.clone());
        let text = format(&record);
        assert_eq!(text, "---\ndate: 2024-01-05T12:30:00\n---\n");
        assert_eq!(parse(&text).unwrap().metadata.get("date"), Some(&dt));
    }

    #[test]
    fn test_render_float() {
        assert_eq!(render_inline(&Value::Float(2.0)), "2.0");
        assert_eq!(render_inline(&Value::Float(f64::NAN)), ".nan");
        assert_eq!(render_inline(&Value::Float(f64::NEG_INFINITY)), "-.inf");
    }

    #[test]
    fn test_hard_breaks_skip_fences() {
        assert_eq!(with_hard_breaks("a\nb\n\nc"), "a  \nb\n\nc");
        assert_eq!(with_hard_breaks("```\nx\ny\n```"), "```\nx\ny\n```");
        assert_eq!(with_hard_breaks("a  \nb"), "a  \nb");
    }

    #[test]
    fn test_falsy_references_are_bare() {
        let mut record = NoteRecord::new();
        record.references.insert("empty", Value::Null);
        record.references.insert("url", Value::from("https://x.org/a"));
        record.references.insert("count", Value::from("3"));
        let text = format(&record);
        assert!(text.ends_with("---\n- empty::\n- url:: https://x.org/a\n- count:: '3'\n"));
        let back = parse(&text).unwrap();
        assert_eq!(back.references.get("count"), Some(&Value::from("3")));
        assert_eq!(back.references.get("empty"), Some(&Value::Null));
    }

    #[test]
    fn test_format_is_a_fixed_point() {
        let mut record = NoteRecord::new();
        record.metadata.insert("title", Value::from("Notes: part 1"));
        let mut nested = FieldMap::new();
        nested.insert("owner", Value::from("me"));
        nested.insert("due", Value::parse_iso("2024-03-01").unwrap_or_default());
        record.metadata.insert("extra", Value::Map(nested));
        record.sections.push(Section::new("", "Preamble"));
        record.sections.push(Section::new("# Notes", "line one\nline two"));
        record.sections.push(Section::new("## Empty", ""));
        record.references.insert("rel", Value::List(vec![Value::from("a")]));

        let first = format(&record);
        let second = format(&parse(&first).unwrap());
        assert_eq!(first, second);
        let reparsed = parse(&second).unwrap();
        assert_eq!(reparsed.metadata, {
            let mut m = FieldMap::new();
            m.insert("title", Value::from("Notes: part 1"));
            m.insert("extra", record.metadata.get("extra").cloned().unwrap_or_default());
            m
        });
        assert_eq!(reparsed.sections.len(), 3);
        assert_eq!(reparsed.references, record.references);
    }
}
