//! Fast parser for bulk loads.
//!
//! Works on borrowed line slices and matches structure by hand instead of
//! through regexes. Output is identical to [`super::reference`] except for
//! the file-name date, which is read positionally here.

use super::{
    decode_front_matter, decode_reference_value, file_stem, heading_text, is_tag_char,
    parse_timestamp_digits, push_reference, trim_one_blank, FilenameDefaults, ParseError,
    SENTINEL,
};
use crate::record::{NoteRecord, Section};
use crate::value::FieldMap;

pub fn parse(text: &str) -> Result<NoteRecord, ParseError> {
    parse_impl(text, None)
}

pub fn parse_with_source(text: &str, source_path: &str) -> Result<NoteRecord, ParseError> {
    parse_impl(text, Some(source_path))
}

fn parse_impl(text: &str, path: Option<&str>) -> Result<NoteRecord, ParseError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let lines: Vec<&str> = text.lines().collect();

    let mut body_start = 0;
    let mut metadata = FieldMap::new();
    if lines.first().is_some_and(|l| is_sentinel(l)) {
        let mut close = None;
        for (i, line) in lines.iter().enumerate().skip(1) {
            if is_sentinel(line) {
                close = Some(i);
                break;
            }
        }
        let close = close.ok_or_else(|| ParseError::malformed(path, "missing closing `---`"))?;
        let mut yaml = String::new();
        for (i, line) in lines[1..close].iter().enumerate() {
            if i > 0 {
                yaml.push('\n');
            }
            push_tag_line(&mut yaml, line);
        }
        metadata = decode_front_matter(&yaml, path)?;
        body_start = close + 1;
    }

    let body = &lines[body_start..];
    let (body, references) = match back_matter_start(body) {
        Some(start) => (&body[..start], collect_references(&body[start + 1..])),
        None => (body, FieldMap::new()),
    };

    let mut record = NoteRecord {
        metadata,
        references,
        sections: sections(body),
        source_path: path.map(str::to_string),
    };
    if let Some(file_name) = record.file_name().map(str::to_string) {
        filename_defaults(file_stem(&file_name)).apply(&mut record);
    }
    Ok(record)
}

fn is_sentinel(line: &str) -> bool {
    line.trim_end() == SENTINEL
}

// ═══════════════════════════════════════════════════════════════════════
// Front-matter tag barewords
// ═══════════════════════════════════════════════════════════════════════

fn push_tag_line(out: &mut String, line: &str) {
    let indent = line.len() - line.trim_start().len();
    let rest = &line[indent..];

    let (split, is_key) = if rest.starts_with("- ") {
        (indent + 2, false)
    } else {
        match key_end(rest) {
            Some(end) => (indent + end, true),
            None => {
                out.push_str(line);
                return;
            }
        }
    };
    let (prefix, value) = line.split_at(split);

    if value.trim_start().starts_with(['"', '\'']) {
        out.push_str(line);
        return;
    }

    out.push_str(prefix);
    if is_key && all_markers(value) {
        out.push_str(" [");
        for (i, token) in value.split_whitespace().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&token[1..]);
        }
        out.push(']');
        return;
    }

    let mut prev: Option<char> = None;
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        let opens = prev.map_or(true, |p| p.is_whitespace() || p == '[' || p == ',');
        let skip = c == '#' && opens && chars.peek().is_some_and(|n| is_tag_char(*n));
        if !skip {
            out.push(c);
        }
        prev = Some(c);
    }
}

/// Byte offset just past `key:` when `rest` is a mapping-key line.
fn key_end(rest: &str) -> Option<usize> {
    let key_len = rest
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-')
        .count();
    if key_len == 0 || rest.as_bytes().get(key_len) != Some(&b':') {
        return None;
    }
    let after = &rest[key_len + 1..];
    match after.chars().next() {
        None => Some(key_len + 1),
        Some(c) if c.is_whitespace() => Some(key_len + 1),
        Some(_) => None,
    }
}

fn all_markers(value: &str) -> bool {
    let mut any = false;
    for token in value.split_whitespace() {
        let Some(name) = token.strip_prefix('#') else {
            return false;
        };
        if name.is_empty() || !name.chars().all(is_tag_char) {
            return false;
        }
        any = true;
    }
    any
}

// ═══════════════════════════════════════════════════════════════════════
// Back matter
// ═══════════════════════════════════════════════════════════════════════

/// Index of the back-matter sentinel, scanning up from the end.
fn back_matter_start(body: &[&str]) -> Option<usize> {
    let mut seen = false;
    for (i, line) in body.iter().enumerate().rev() {
        if is_sentinel(line) {
            return seen.then_some(i);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        reference_parts(trimmed)?;
        seen = true;
    }
    None
}

fn collect_references(lines: &[&str]) -> FieldMap {
    let mut references = FieldMap::new();
    for line in lines {
        if let Some((key, raw)) = reference_parts(line.trim()) {
            push_reference(&mut references, key, decode_reference_value(raw));
        }
    }
    references
}

/// Split a trimmed `- key:: value` line into key and raw value.
fn reference_parts(line: &str) -> Option<(&str, &str)> {
    let line = match line.strip_prefix('-') {
        Some(rest) => {
            let stripped = rest.trim_start_matches([' ', '\t']);
            if stripped.len() == rest.len() {
                return None;
            }
            stripped
        }
        None => line,
    };
    let key_len = line
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-')
        .count();
    if key_len == 0 || line.starts_with('-') {
        return None;
    }
    let raw = line[key_len..].strip_prefix("::")?;
    Some((&line[..key_len], raw))
}

// ═══════════════════════════════════════════════════════════════════════
// Sections
// ═══════════════════════════════════════════════════════════════════════

fn sections(body: &[&str]) -> Vec<Section> {
    let mut out = Vec::new();
    let mut heading: Option<&str> = None;
    let mut start = 0;
    let mut seen_title = false;
    let mut in_fence = false;

    for (i, line) in body.iter().enumerate() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let is_title = !seen_title && heading_text(line, "# ").is_some();
        if is_title || heading_text(line, "## ").is_some() {
            push_section(&mut out, heading, &body[start..i]);
            heading = Some(line.trim_end());
            seen_title |= is_title;
            start = i + 1;
        }
    }
    push_section(&mut out, heading, &body[start..]);
    out
}

fn push_section(out: &mut Vec<Section>, heading: Option<&str>, lines: &[&str]) {
    match heading {
        Some(heading) => out.push(Section::new(heading, trim_one_blank(lines))),
        None => {
            if lines.iter().any(|l| !l.trim().is_empty()) {
                out.push(Section::new("", trim_one_blank(lines)));
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// File-name defaults
// ═══════════════════════════════════════════════════════════════════════

fn filename_defaults(stem: &str) -> FilenameDefaults {
    let digits = stem.bytes().take_while(u8::is_ascii_digit).count();
    let mut defaults = FilenameDefaults::default();
    let rest = if digits == 12 || digits == 14 {
        defaults.id = stem[..digits].parse().ok();
        defaults.date = parse_timestamp_digits(&stem[..digits]);
        &stem[digits..]
    } else {
        stem
    };
    let title = rest.trim_start_matches([' ', '-', '_']).trim();
    if !title.is_empty() {
        defaults.title = Some(title.to_string());
    }
    defaults
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn tag_line(line: &str) -> String {
        let mut out = String::new();
        push_tag_line(&mut out, line);
        out
    }

    #[test]
    fn test_tag_lines_match_reference() {
        for line in [
            "tags: #a #b/c",
            "tags: [#a, #b]",
            "  - #a",
            "title: 'Issue #4'",
            "# comment",
            "title: C# rocks",
            "key:value #x",
            "status: #open now",
            "tags:",
            "- key: #a #b",
        ] {
            assert_eq!(
                tag_line(line),
                super::super::reference::normalize_tag_line(line),
                "line {line:?}"
            );
        }
    }

    #[test]
    fn test_reference_parts() {
        assert_eq!(reference_parts("- source:: x"), Some(("source", " x")));
        assert_eq!(reference_parts("rel::"), Some(("rel", "")));
        assert_eq!(reference_parts("-source:: x"), None);
        assert_eq!(reference_parts("- -x:: y"), None);
        assert_eq!(reference_parts("plain text"), None);
    }

    #[test]
    fn test_back_matter_needs_a_reference() {
        let record = parse("body\n\n---\n\n").unwrap();
        assert!(record.references.is_empty());
        assert_eq!(record.sections[0].body, "body\n\n---");
    }

    #[test]
    fn test_positional_filename_date() {
        let record = parse_with_source("x\n", "202401051230 Retro 2024.md").unwrap();
        assert!(matches!(record.metadata.get("date"), Some(Value::DateTime(_))));
        let record = parse_with_source("x\n", "Meeting 2024 01 05 1230.md").unwrap();
        assert!(record.metadata.get("date").is_none());
        assert_eq!(
            record.metadata.get("title"),
            Some(&Value::from("Meeting 2024 01 05 1230"))
        );
    }

    #[test]
    fn test_front_matter_keeps_explicit_values() {
        let record =
            parse_with_source("---\nid: 7\n---\nbody\n", "20240105123000 Name.md").unwrap();
        assert_eq!(record.metadata.get("id"), Some(&Value::Int(7)));
        assert_eq!(record.metadata.get("title"), Some(&Value::from("Name")));
    }
}
