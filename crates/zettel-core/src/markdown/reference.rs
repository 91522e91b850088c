//! Reference parser.
//!
//! Written for clarity rather than speed: the text is copied into an owned
//! line vector and every structural decision is a regex match. The fast
//! parser in [`super::fast`] is checked against this one.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{
    decode_front_matter, decode_reference_value, file_stem, heading_text,
    parse_timestamp_digits, push_reference, trim_one_blank, FilenameDefaults, ParseError,
    SENTINEL,
};
use crate::record::{NoteRecord, Section};
use crate::value::FieldMap;

static KEY_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*[A-Za-z0-9_-]+:)(\s.*)?$").expect("valid regex"));
static LIST_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*- )(.*)$").expect("valid regex"));
static ALL_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*#[A-Za-z0-9_/-]+(?:\s+#[A-Za-z0-9_/-]+)*\s*$").expect("valid regex")
});
static MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[\s\[,])#([A-Za-z0-9_/-])").expect("valid regex"));
static REFERENCE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:-[ \t]+)?([A-Za-z0-9_][A-Za-z0-9_-]*)::(.*)$").expect("valid regex")
});
static LEADING_TIMESTAMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]{14}|[0-9]{12})([^0-9].*)?$").expect("valid regex"));

/// Parse note text that has no file behind it.
pub fn parse(text: &str) -> Result<NoteRecord, ParseError> {
    parse_impl(text, None)
}

/// Parse note text read from `source_path`; the file name supplies default
/// `id`, `date`, and `title`.
pub fn parse_with_source(text: &str, source_path: &str) -> Result<NoteRecord, ParseError> {
    parse_impl(text, Some(source_path))
}

fn parse_impl(text: &str, path: Option<&str>) -> Result<NoteRecord, ParseError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let lines: Vec<String> = text.lines().map(str::to_string).collect();

    let (front_matter, body_start) = split_front_matter(&lines, path)?;
    let yaml = front_matter
        .iter()
        .map(|line| normalize_tag_line(line))
        .collect::<Vec<_>>()
        .join("\n");
    let metadata = decode_front_matter(&yaml, path)?;

    let (body, references) = split_back_matter(&lines[body_start..]);
    let sections = split_sections(body);

    let mut record = NoteRecord {
        metadata,
        references,
        sections,
        source_path: path.map(str::to_string),
    };
    if let Some(file_name) = record.file_name().map(str::to_string) {
        filename_defaults(&file_name).apply(&mut record);
    }
    Ok(record)
}

fn split_front_matter<'a>(
    lines: &'a [String],
    path: Option<&str>,
) -> Result<(&'a [String], usize), ParseError> {
    match lines.first() {
        Some(first) if first.trim_end() == SENTINEL => {
            let close = lines[1..]
                .iter()
                .position(|l| l.trim_end() == SENTINEL)
                .ok_or_else(|| ParseError::malformed(path, "missing closing `---`"))?;
            Ok((&lines[1..=close], close + 2))
        }
        _ => Ok((&[], 0)),
    }
}

/// Rewrite `#tag` barewords in one front-matter line into YAML-safe text.
pub(crate) fn normalize_tag_line(line: &str) -> String {
    let (prefix, value, is_key) = if let Some(caps) = LIST_LINE.captures(line) {
        (caps[1].to_string(), caps[2].to_string(), false)
    } else if let Some(caps) = KEY_LINE.captures(line) {
        let value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        (caps[1].to_string(), value.to_string(), true)
    } else {
        return line.to_string();
    };

    if value.trim_start().starts_with(['"', '\'']) {
        return line.to_string();
    }

    if is_key && ALL_MARKERS.is_match(&value) {
        let tags: Vec<&str> = value
            .split_whitespace()
            .map(|t| t.trim_start_matches('#'))
            .collect();
        return format!("{prefix} [{}]", tags.join(", "));
    }

    format!("{prefix}{}", MARKER.replace_all(&value, "$1$2"))
}

fn split_back_matter(body: &[String]) -> (&[String], FieldMap) {
    let mut last_sentinel = None;
    for (i, line) in body.iter().enumerate() {
        if line.trim_end() == SENTINEL {
            last_sentinel = Some(i);
        }
    }
    let Some(start) = last_sentinel else {
        return (body, FieldMap::new());
    };

    let mut references = FieldMap::new();
    let mut seen = 0;
    for line in &body[start + 1..] {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match REFERENCE_LINE.captures(trimmed) {
            Some(caps) => {
                push_reference(&mut references, &caps[1], decode_reference_value(&caps[2]));
                seen += 1;
            }
            None => return (body, FieldMap::new()),
        }
    }

    if seen == 0 {
        return (body, FieldMap::new());
    }
    (&body[..start], references)
}

fn split_sections(body: &[String]) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut heading: Option<String> = None;
    let mut buffer: Vec<&str> = Vec::new();
    let mut seen_title = false;
    let mut in_fence = false;

    for line in body {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            buffer.push(line);
            continue;
        }
        if !in_fence {
            let is_section = heading_text(line, "## ").is_some();
            let is_title = !seen_title && heading_text(line, "# ").is_some();
            if is_section || is_title {
                flush(&mut sections, heading.take(), &buffer);
                buffer.clear();
                seen_title |= is_title;
                heading = Some(line.trim_end().to_string());
                continue;
            }
        }
        buffer.push(line);
    }
    flush(&mut sections, heading, &buffer);
    sections
}

fn flush(sections: &mut Vec<Section>, heading: Option<String>, buffer: &[&str]) {
    match heading {
        Some(heading) => sections.push(Section::new(heading, trim_one_blank(buffer))),
        None if buffer.iter().any(|l| !l.trim().is_empty()) => {
            sections.push(Section::new("", trim_one_blank(buffer)))
        }
        None => {}
    }
}

fn filename_defaults(file_name: &str) -> FilenameDefaults {
    let stem = file_stem(file_name);
    let mut defaults = FilenameDefaults {
        date: filename_date(stem),
        ..FilenameDefaults::default()
    };
    let rest = match LEADING_TIMESTAMP.captures(stem) {
        Some(caps) => {
            defaults.id = caps[1].parse().ok();
            caps.get(2).map(|m| m.as_str()).unwrap_or("")
        }
        None => stem,
    };
    let title = rest
        .trim_start_matches([' ', '-', '_'])
        .trim();
    if !title.is_empty() {
        defaults.title = Some(title.to_string());
    }
    defaults
}

/// Date from a file stem, taken from the first 14 (or 12) digits found
/// anywhere in the stem.
///
/// Counting digits instead of reading fixed positions means names such as
/// `202401051230 Retro 2024` read as `20240105123020`, taking seconds from
/// the title, and undated names with digits in the title can produce a date. The fast
/// parser reads positions 0..12/14 only. Both behaviours are kept until
/// downstream consumers confirm which one they rely on.
pub fn filename_date(stem: &str) -> Option<NaiveDateTime> {
    let digits: String = stem.chars().filter(char::is_ascii_digit).collect();
    if digits.len() >= 14 {
        parse_timestamp_digits(&digits[..14])
    } else if digits.len() >= 12 {
        parse_timestamp_digits(&digits[..12])
    } else {
        None
    }
}
