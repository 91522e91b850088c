//! Note sources: the seam between the query engine and storage.
//!
//! The engine never walks a filesystem itself. It asks a [`NoteSource`] for
//! the notes under a directory, passing along the equality conditions it
//! was able to push down. The application crate implements the trait over
//! the bulk loader and its cache; [`MemorySource`] serves tests and
//! embedders that already hold records.

use std::collections::BTreeMap;

use anyhow::Result;

use super::filter::Condition;
use crate::normalize::{normalize_base, normalize_variant, NormalizeContext};
use crate::note::Note;
use crate::record::NoteRecord;

/// What the engine asks a source for.
#[derive(Debug, Clone, Copy)]
pub struct SourceRequest<'a> {
    pub directory: &'a str,
    /// Extensions without the leading dot.
    pub extensions: &'a [String],
    pub recursive: bool,
    /// Pushdown hint. A source may ignore it; the engine re-applies the
    /// full filter either way.
    pub conditions: &'a [Condition],
}

/// Anything that can produce normalized notes for a directory.
pub trait NoteSource {
    fn load(&self, request: &SourceRequest<'_>, ctx: &NormalizeContext) -> Result<Vec<Note>>;
}

impl<S: NoteSource + ?Sized> NoteSource for &S {
    fn load(&self, request: &SourceRequest<'_>, ctx: &NormalizeContext) -> Result<Vec<Note>> {
        (**self).load(request, ctx)
    }
}

/// Normalize raw records, dropping those that fail a pushdown condition
/// before paying for variant-specific normalization.
///
/// Conditions are checked after the base pipeline so migrated keys and the
/// canonical `type` are visible to them.
pub fn normalize_filtered<I>(records: I, conditions: &[Condition], ctx: &NormalizeContext) -> Vec<Note>
where
    I: IntoIterator<Item = NoteRecord>,
{
    let mut scanned = 0usize;
    let notes: Vec<Note> = records
        .into_iter()
        .filter_map(|mut record| {
            scanned += 1;
            normalize_base(&mut record, ctx);
            let view = Note::from_normalized(record);
            if !conditions.iter().all(|c| c.matches_note(&view)) {
                return None;
            }
            let mut record = view.into_record();
            normalize_variant(&mut record, ctx);
            Some(Note::from_normalized(record))
        })
        .collect();
    tracing::debug!(
        scanned,
        kept = notes.len(),
        conditions = conditions.len(),
        "normalized records"
    );
    notes
}

/// Records held in memory, grouped by directory.
///
/// `extensions` and `recursive` are not interpreted: a directory's records
/// are whatever was inserted under it.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    directories: BTreeMap<String, Vec<NoteRecord>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, directory: impl Into<String>, record: NoteRecord) {
        self.directories
            .entry(directory.into())
            .or_default()
            .push(record);
    }

    pub fn with(mut self, directory: impl Into<String>, record: NoteRecord) -> Self {
        self.insert(directory, record);
        self
    }

    pub fn len(&self) -> usize {
        self.directories.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NoteSource for MemorySource {
    fn load(&self, request: &SourceRequest<'_>, ctx: &NormalizeContext) -> Result<Vec<Note>> {
        let records = self
            .directories
            .get(request.directory)
            .cloned()
            .unwrap_or_default();
        Ok(normalize_filtered(records, request.conditions, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::parse;

    fn ctx() -> NormalizeContext {
        NormalizeContext::at(
            chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        )
    }

    #[test]
    fn test_conditions_see_migrated_fields() {
        let source = MemorySource::new()
            .with("n", parse("---\nid: 1\ntype: Projects\n---\n").unwrap())
            .with("n", parse("---\nid: 2\ntype: note\n---\n").unwrap());
        let conditions = [Condition::eq("type", "project")];
        let request = SourceRequest {
            directory: "n",
            extensions: &[],
            recursive: true,
            conditions: &conditions,
        };
        let notes = source.load(&request, &ctx()).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].id(), Some(1));
        assert!(notes[0].section("Log").is_some());
    }

    #[test]
    fn test_unknown_directory_is_empty() {
        let source = MemorySource::new();
        let request = SourceRequest {
            directory: "nowhere",
            extensions: &[],
            recursive: true,
            conditions: &[],
        };
        assert!(source.load(&request, &ctx()).unwrap().is_empty());
    }
}
