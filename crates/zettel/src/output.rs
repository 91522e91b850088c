//! Renderers for query results.
//!
//! | Format | Shape |
//! |--------|-------|
//! | `table` | aligned columns, one block per group |
//! | `json` | array of row objects, or of `{key, rows}` when grouped |
//! | `csv` | RFC 4180 quoting, `group` column first when grouped |
//! | `markdown` | pipe table, one `##` section per group |
//!
//! Lists render as comma-separated text in the textual formats and as
//! arrays in JSON. Nulls render as empty cells.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

use crate::atomic::write_atomic;
use zettel_core::query::{OutputFormat, QueryResult};
use zettel_core::value::{FieldMap, Value};

pub fn render(result: &QueryResult, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Table => render_table(result),
        OutputFormat::Json => render_json(result)?,
        OutputFormat::Csv => render_csv(result),
        OutputFormat::Markdown => render_markdown(result),
    })
}

/// Write rendered output to `file`, or to stdout when `None`.
pub fn emit(text: &str, file: Option<&Path>) -> Result<()> {
    match file {
        Some(path) => write_atomic(path, text.as_bytes())
            .with_context(|| format!("Failed to write output file: {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            stdout.flush()?;
            Ok(())
        }
    }
}

/// Row blocks to print: one per group, or a single unnamed block.
fn blocks(result: &QueryResult) -> Vec<(Option<&Value>, Vec<&FieldMap>)> {
    if result.groups.is_empty() {
        return vec![(None, result.rows.iter().collect())];
    }
    result
        .groups
        .iter()
        .map(|g| {
            let rows = g.rows.iter().filter_map(|&i| result.rows.get(i)).collect();
            (Some(&g.key), rows)
        })
        .collect()
}

fn cell(row: &FieldMap, column: &str) -> String {
    let text = row.get(column).map(Value::to_string).unwrap_or_default();
    text.replace(['\n', '\r'], " ")
}

fn group_label(key: &Value) -> String {
    match key {
        Value::Null => "(none)".to_string(),
        other => other.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Table
// ═══════════════════════════════════════════════════════════════════════

fn render_table(result: &QueryResult) -> String {
    if result.rows.is_empty() {
        return "No results.\n".to_string();
    }
    let widths: Vec<usize> = result
        .columns
        .iter()
        .map(|c| {
            result
                .rows
                .iter()
                .map(|r| cell(r, c).chars().count())
                .chain(std::iter::once(c.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |cells: Vec<String>| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(text, width)| format!("{text:<width$}"))
            .collect();
        format!("{}\n", padded.join("  ").trim_end())
    };

    let mut out = String::new();
    for (i, (key, rows)) in blocks(result).into_iter().enumerate() {
        if let Some(key) = key {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&format!("{} ({})\n", group_label(key), rows.len()));
        }
        out.push_str(&line(result.columns.iter().map(|c| c.to_uppercase()).collect()));
        out.push_str(&line(widths.iter().map(|w| "-".repeat(*w)).collect()));
        for row in rows {
            out.push_str(&line(result.columns.iter().map(|c| cell(row, c)).collect()));
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════
// JSON
// ═══════════════════════════════════════════════════════════════════════

fn row_json(row: &FieldMap) -> serde_json::Value {
    Value::Map(row.clone()).to_json()
}

fn render_json(result: &QueryResult) -> Result<String> {
    let value = if result.groups.is_empty() {
        serde_json::Value::Array(result.rows.iter().map(row_json).collect())
    } else {
        serde_json::Value::Array(
            blocks(result)
                .into_iter()
                .map(|(key, rows)| {
                    serde_json::json!({
                        "key": key.map(Value::to_json).unwrap_or_default(),
                        "rows": rows.into_iter().map(row_json).collect::<Vec<_>>(),
                    })
                })
                .collect(),
        )
    };
    let mut text = serde_json::to_string_pretty(&value)?;
    text.push('\n');
    Ok(text)
}

// ═══════════════════════════════════════════════════════════════════════
// CSV
// ═══════════════════════════════════════════════════════════════════════

fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

fn render_csv(result: &QueryResult) -> String {
    let grouped = !result.groups.is_empty();
    let mut out = String::new();
    let mut header: Vec<String> = result.columns.iter().map(|c| csv_field(c)).collect();
    if grouped {
        header.insert(0, "group".to_string());
    }
    out.push_str(&header.join(","));
    out.push_str("\r\n");

    for (key, rows) in blocks(result) {
        for row in rows {
            let mut fields: Vec<String> = result
                .columns
                .iter()
                .map(|c| csv_field(&row.get(c).map(Value::to_string).unwrap_or_default()))
                .collect();
            if let Some(key) = key {
                fields.insert(0, csv_field(&key.to_string()));
            }
            out.push_str(&fields.join(","));
            out.push_str("\r\n");
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════
// Markdown
// ═══════════════════════════════════════════════════════════════════════

fn md_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

fn render_markdown(result: &QueryResult) -> String {
    let mut out = String::new();
    for (i, (key, rows)) in blocks(result).into_iter().enumerate() {
        if let Some(key) = key {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&format!("## {}\n\n", group_label(key)));
        }
        let header: Vec<String> = result.columns.iter().map(|c| md_cell(c)).collect();
        out.push_str(&format!("| {} |\n", header.join(" | ")));
        out.push_str(&format!("|{}\n", " --- |".repeat(result.columns.len())));
        for row in rows {
            let cells: Vec<String> = result.columns.iter().map(|c| md_cell(&cell(row, c))).collect();
            out.push_str(&format!("| {} |\n", cells.join(" | ")));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use zettel_core::query::Group;

    fn result() -> QueryResult {
        let mut a = FieldMap::new();
        a.insert("id", Value::Int(1));
        a.insert("title", Value::from("Alpha, \"quoted\""));
        a.insert("tags", Value::List(vec![Value::from("x"), Value::from("y")]));
        let mut b = FieldMap::new();
        b.insert("id", Value::Int(22));
        b.insert("title", Value::from("a|b"));
        b.insert("tags", Value::Null);
        QueryResult {
            columns: vec!["id".into(), "title".into(), "tags".into()],
            rows: vec![a, b],
            ..QueryResult::default()
        }
    }

    #[test]
    fn test_table_aligns_columns() {
        let text = render(&result(), OutputFormat::Table).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ID  TITLE            TAGS");
        assert_eq!(lines[1], "--  ---------------  ----");
        assert_eq!(lines[2], "1   Alpha, \"quoted\"  x, y");
        assert_eq!(lines[3], "22  a|b");
    }

    #[test]
    fn test_empty_table() {
        let empty = QueryResult::default();
        assert_eq!(render(&empty, OutputFormat::Table).unwrap(), "No results.\n");
    }

    #[test]
    fn test_json_rows_are_objects() {
        let text = render(&result(), OutputFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0]["id"], 1);
        assert_eq!(parsed[0]["tags"], serde_json::json!(["x", "y"]));
        assert!(parsed[1]["tags"].is_null());
    }

    #[test]
    fn test_csv_quotes_when_needed() {
        let text = render(&result(), OutputFormat::Csv).unwrap();
        assert_eq!(
            text,
            "id,title,tags\r\n1,\"Alpha, \"\"quoted\"\"\",\"x, y\"\r\n22,a|b,\r\n"
        );
    }

    #[test]
    fn test_markdown_escapes_pipes() {
        let text = render(&result(), OutputFormat::Markdown).unwrap();
        assert!(text.starts_with("| id | title | tags |\n| --- | --- | --- |\n"));
        assert!(text.contains("| 22 | a\\|b |  |"));
    }

    #[test]
    fn test_grouped_output() {
        let mut grouped = result();
        grouped.groups = vec![
            Group {
                key: Value::from("b"),
                rows: vec![1],
            },
            Group {
                key: Value::Null,
                rows: vec![0],
            },
        ];
        let table = render(&grouped, OutputFormat::Table).unwrap();
        assert!(table.starts_with("b (1)\n"));
        assert!(table.contains("\n(none) (1)\n"));

        let json: serde_json::Value =
            serde_json::from_str(&render(&grouped, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json[0]["key"], "b");
        assert_eq!(json[0]["rows"][0]["id"], 22);
        assert!(json[1]["key"].is_null());

        let csv = render(&grouped, OutputFormat::Csv).unwrap();
        assert!(csv.starts_with("group,id,title,tags\r\nb,22,a|b,\r\n,1,"));
    }

    #[test]
    fn test_emit_to_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("out/result.csv");
        emit("a,b\r\n", Some(&path)).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "a,b\r\n");
    }
}
