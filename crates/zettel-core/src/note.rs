//! The note entity: typed accessors and variant dispatch over a normalized
//! [`NoteRecord`].
//!
//! Variants are an enum plus a registry from canonical `type` names. A
//! variant holds no data of its own; [`ProjectNote`] is a borrowed view that
//! interprets the `Log` section.
//!
//! # Field resolution
//!
//! [`Note::get`] resolves a dotted path. The first segment is looked up in
//! this order:
//!
//! 1. `references` (then the rest of the path indexes the back matter)
//! 2. front-matter metadata
//! 3. back-matter references
//! 4. derived properties: `path`, `filename`, `variant`, `headings`, `body`,
//!    and for projects `log` and `log_warnings`
//!
//! Remaining segments index into maps by key and into lists by position.
//! Anything unresolvable is [`Value::Null`].

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::log::{parse_log, LogEntry};
use crate::normalize::{normalize, NormalizeContext, LOG_SECTION};
use crate::record::{NoteRecord, Section};
use crate::value::{FieldMap, Value};

/// Names [`Note::derived`] can answer. `log` and `log_warnings` only
/// resolve for projects.
pub const DERIVED_FIELDS: [&str; 7] = [
    "path",
    "filename",
    "variant",
    "headings",
    "body",
    "log",
    "log_warnings",
];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NoteError {
    /// `id` must be an integer or a string of digits.
    #[error("note id must be numeric, got {0:?}")]
    NonNumericId(String),
}

/// Note subtypes, selected by the canonical `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Variant {
    #[default]
    Base,
    Project,
}

/// `type` value → variant. Types not listed here are [`Variant::Base`].
const REGISTRY: &[(&str, Variant)] = &[("project", Variant::Project)];

impl Variant {
    pub fn from_type(kind: Option<&str>) -> Variant {
        kind.and_then(|k| REGISTRY.iter().find(|(name, _)| *name == k))
            .map(|(_, variant)| *variant)
            .unwrap_or_default()
    }

    pub fn of(record: &NoteRecord) -> Variant {
        Variant::from_type(record.metadata.get("type").and_then(Value::as_str))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Base => "note",
            Variant::Project => "project",
        }
    }
}

/// A normalized note.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    record: NoteRecord,
    variant: Variant,
}

impl Note {
    /// Normalize `record` and wrap it.
    pub fn from_record(mut record: NoteRecord, ctx: &NormalizeContext) -> Note {
        let variant = normalize(&mut record, ctx);
        Note { record, variant }
    }

    /// Wrap a record that has already been normalized.
    pub fn from_normalized(record: NoteRecord) -> Note {
        let variant = Variant::of(&record);
        Note { record, variant }
    }

    pub fn record(&self) -> &NoteRecord {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut NoteRecord {
        &mut self.record
    }

    pub fn into_record(self) -> NoteRecord {
        self.record
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn metadata(&self) -> &FieldMap {
        &self.record.metadata
    }

    pub fn references(&self) -> &FieldMap {
        &self.record.references
    }

    pub fn id(&self) -> Option<i64> {
        match self.record.metadata.get("id")? {
            Value::Int(id) => Some(*id),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Set the id from an integer or a numeric string.
    ///
    /// # Errors
    ///
    /// [`NoteError::NonNumericId`] for anything else; the note is unchanged.
    pub fn set_id(&mut self, id: impl Into<Value>) -> Result<(), NoteError> {
        let id = match id.into() {
            Value::Int(id) => id,
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| NoteError::NonNumericId(s.clone()))?,
            other => return Err(NoteError::NonNumericId(other.to_string())),
        };
        self.record.metadata.insert("id", Value::Int(id));
        Ok(())
    }

    pub fn title(&self) -> Option<&str> {
        self.record.metadata.get("title").and_then(Value::as_str)
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.record
            .metadata
            .insert("title", Value::String(title.into()));
    }

    pub fn date(&self) -> Option<NaiveDateTime> {
        self.record.metadata.get("date").and_then(Value::as_datetime)
    }

    pub fn note_type(&self) -> Option<&str> {
        self.record.metadata.get("type").and_then(Value::as_str)
    }

    /// Tags as strings. A scalar is a one-element list.
    pub fn tags(&self) -> Vec<String> {
        match self.record.metadata.get("tags") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::List(items)) => items.iter().map(Value::to_string).collect(),
            Some(other) => vec![other.to_string()],
        }
    }

    pub fn publish(&self) -> bool {
        self.flag("publish")
    }

    pub fn processed(&self) -> bool {
        self.flag("processed")
    }

    fn flag(&self, key: &str) -> bool {
        self.record
            .metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.record.section(name)
    }

    pub fn path(&self) -> Option<&str> {
        self.record.source_path.as_deref()
    }

    pub fn filename(&self) -> Option<&str> {
        self.record.file_name()
    }

    /// Section names in file order, preamble excluded.
    pub fn headings(&self) -> Vec<&str> {
        self.record
            .sections
            .iter()
            .filter(|s| !s.heading.is_empty())
            .map(Section::name)
            .collect()
    }

    /// All section bodies joined by blank lines.
    pub fn body(&self) -> String {
        self.record
            .sections
            .iter()
            .map(|s| s.body.as_str())
            .filter(|b| !b.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn as_project(&self) -> Option<ProjectNote<'_>> {
        (self.variant == Variant::Project).then_some(ProjectNote { note: self })
    }

    /// Resolve a dotted field path. See the module docs for the lookup order.
    pub fn get(&self, path: &str) -> Value {
        let mut segments = path.split('.');
        let Some(head) = segments.next() else {
            return Value::Null;
        };

        let root = if head == "references" {
            Value::Map(self.record.references.clone())
        } else if let Some(value) = self.record.field(head) {
            value.clone()
        } else {
            self.derived(head).unwrap_or_default()
        };
        segments.fold(root, |value, segment| step_into(value, segment))
    }

    /// Derived property by name.
    pub fn derived(&self, name: &str) -> Option<Value> {
        let value = match name {
            "path" => self.path().map(Value::from).unwrap_or_default(),
            "filename" => self.filename().map(Value::from).unwrap_or_default(),
            "variant" => Value::from(self.variant.as_str()),
            "headings" => Value::List(self.headings().into_iter().map(Value::from).collect()),
            "body" => Value::String(self.body()),
            "log" => {
                let project = self.as_project()?;
                Value::List(project.log().iter().map(LogEntry::to_value).collect())
            }
            "log_warnings" => {
                let project = self.as_project()?;
                Value::List(project.warnings().into_iter().map(Value::from).collect())
            }
            _ => return None,
        };
        Some(value)
    }

    /// Expression binding: derived properties, then references (also
    /// available as `references`), then metadata. Later entries win.
    pub fn variables(&self) -> FieldMap {
        let mut vars = FieldMap::with_capacity(
            self.record.metadata.len() + self.record.references.len() + 8,
        );
        for name in DERIVED_FIELDS {
            if let Some(value) = self.derived(name) {
                vars.insert(name, value);
            }
        }
        vars.insert("references", Value::Map(self.record.references.clone()));
        for (key, value) in self.record.references.iter() {
            vars.insert(key, value.clone());
        }
        for (key, value) in self.record.metadata.iter() {
            vars.insert(key, value.clone());
        }
        vars
    }
}

fn step_into(value: Value, segment: &str) -> Value {
    match value {
        Value::Map(mut map) => map.remove(segment).unwrap_or_default(),
        Value::List(mut items) => match segment.parse::<usize>() {
            Ok(idx) if idx < items.len() => items.swap_remove(idx),
            _ => Value::Null,
        },
        _ => Value::Null,
    }
}

/// Project interpretation of a [`Note`].
#[derive(Debug, Clone, Copy)]
pub struct ProjectNote<'a> {
    note: &'a Note,
}

impl<'a> ProjectNote<'a> {
    pub fn note(&self) -> &'a Note {
        self.note
    }

    /// Entries parsed from the `Log` section. Empty when there is none.
    pub fn log(&self) -> Vec<LogEntry> {
        self.note
            .section(LOG_SECTION)
            .map(|s| parse_log(&s.body))
            .unwrap_or_default()
    }

    /// Every entry warning as `<timestamp> <action>: <warning>`.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        for entry in self.log() {
            for warning in &entry.warnings {
                out.push(format!(
                    "{} {}: {warning}",
                    Value::from(entry.timestamp),
                    entry.action
                ));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::parse;
    use chrono::NaiveDate;

    fn ctx() -> NormalizeContext {
        NormalizeContext::at(
            NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
        )
    }

    const PROJECT: &str = "---\nid: 1\ntitle: Parser work\ntype: Projects\ntags: #dev #sprint-1\nowner:\n  name: sam\n---\n# Parser work\n\nGoals.\n\n## Journal\n\n- [ ] 2024-01-05 - write tests #next 📅 2024-01-09\n- [x] 2024-01-04 - spike\n\n---\n- repo:: https://example.com/p\n";

    fn project() -> Note {
        Note::from_record(parse(PROJECT).unwrap(), &ctx())
    }

    #[test]
    fn test_variant_dispatch() {
        let note = project();
        assert_eq!(note.variant(), Variant::Project);
        assert_eq!(note.note_type(), Some("project"));
        assert!(note.as_project().is_some());

        let plain = Note::from_record(parse("---\ntype: recipe\n---\nx\n").unwrap(), &ctx());
        assert_eq!(plain.variant(), Variant::Base);
        assert!(plain.as_project().is_none());
    }

    #[test]
    fn test_typed_accessors() {
        let note = project();
        assert_eq!(note.id(), Some(1));
        assert_eq!(note.title(), Some("Parser work"));
        assert_eq!(note.tags(), vec!["dev", "sprint-1"]);
        assert!(!note.publish());
        assert_eq!(note.date(), Some(ctx().now));
        assert_eq!(note.headings(), vec!["Parser work", "Log"]);
    }

    #[test]
    fn test_set_id_rejects_non_numeric() {
        let mut note = project();
        assert!(note.set_id("0042").is_ok());
        assert_eq!(note.id(), Some(42));
        assert_eq!(
            note.set_id("abc"),
            Err(NoteError::NonNumericId("abc".to_string()))
        );
        assert!(note.set_id(1.5).is_err());
        assert_eq!(note.id(), Some(42));
    }

    #[test]
    fn test_dotted_get() {
        let note = project();
        assert_eq!(note.get("owner.name"), Value::from("sam"));
        assert_eq!(note.get("repo"), Value::from("https://example.com/p"));
        assert_eq!(note.get("references.repo"), Value::from("https://example.com/p"));
        assert_eq!(note.get("tags.1"), Value::from("sprint-1"));
        assert_eq!(note.get("log.0.list_tag"), Value::from("next"));
        assert_eq!(note.get("missing.path"), Value::Null);
    }

    #[test]
    fn test_project_log_and_warnings() {
        let note = project();
        let log = note.as_project().unwrap().log();
        assert_eq!(log.len(), 2);
        let warnings = note.as_project().unwrap().warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].ends_with("spike: done_no_completed"));
    }

    #[test]
    fn test_variables_binding() {
        let note = project();
        let vars = note.variables();
        assert_eq!(vars.get("id"), Some(&Value::Int(1)));
        assert_eq!(vars.get("variant"), Some(&Value::from("project")));
        assert!(vars.get("references").is_some());
        assert!(matches!(vars.get("log"), Some(Value::List(items)) if items.len() == 2));
    }
}
