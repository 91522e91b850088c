//! The parsed, pre-normalization form of a note file.

use serde::{Deserialize, Serialize};

use crate::value::{FieldMap, Value};

/// One heading plus the text underneath it.
///
/// `heading` is the heading line verbatim, marker included (`# Title`,
/// `## Log`). The text before the first heading, when present, is stored
/// with an empty heading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub heading: String,
    pub body: String,
}

impl Section {
    pub fn new(heading: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            body: body.into(),
        }
    }

    /// Heading text without the `#`/`##` marker.
    pub fn name(&self) -> &str {
        heading_name(&self.heading)
    }
}

/// Strip the heading marker from a heading line.
pub fn heading_name(heading: &str) -> &str {
    heading
        .strip_prefix("## ")
        .or_else(|| heading.strip_prefix("# "))
        .unwrap_or(heading)
        .trim()
}

/// A parsed note: front matter, body sections, and back-matter references.
///
/// Section order is file order and survives a format/parse round trip.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NoteRecord {
    pub metadata: FieldMap,
    pub references: FieldMap,
    pub sections: Vec<Section>,
    pub source_path: Option<String>,
}

impl NoteRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name() == name)
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.name() == name)
    }

    /// Metadata first, then references, each by exact key.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key).or_else(|| self.references.get(key))
    }

    /// File name component of `source_path`.
    pub fn file_name(&self) -> Option<&str> {
        self.source_path
            .as_deref()
            .map(|p| p.rsplit(['/', '\\']).next().unwrap_or(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_name_strips_marker() {
        assert_eq!(Section::new("## Log", "").name(), "Log");
        assert_eq!(Section::new("# My Title", "").name(), "My Title");
        assert_eq!(Section::new("", "preamble").name(), "");
    }

    #[test]
    fn test_file_name() {
        let record = NoteRecord {
            source_path: Some("/notes/sub/202401011200 Foo.md".to_string()),
            ..NoteRecord::default()
        };
        assert_eq!(record.file_name(), Some("202401011200 Foo.md"));
    }
}
