//! The note repository: the seam where CLI commands, dashboards and batch
//! tools read and write individual notes.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            NoteRepository                │
//! │  find_by_location   find_by_id           │
//! │  find_all           save      delete     │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!        FsNoteRepository (root directory)
//!   single files: reference parser
//!   bulk loads:   loader (fast parser + pushdown)
//! ```
//!
//! Notes come back normalized. `save` writes the formatted note atomically,
//! naming new files `<id> <title>.md` under the repository root.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::atomic::write_atomic;
use crate::loader;
use zettel_core::markdown::{self, ParseError};
use zettel_core::normalize::NormalizeContext;
use zettel_core::note::{Note, NoteError};
use zettel_core::query::Condition;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("note not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Note(#[from] NoteError),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to load notes: {0:#}")]
    Load(anyhow::Error),
}

/// Storage operations on whole notes.
pub trait NoteRepository {
    /// Read and normalize the note stored at `path`.
    fn find_by_location(&self, path: &Path) -> Result<Note, RepoError>;

    /// Every note under `dir`. `conditions` are pushdown hints: the result
    /// may contain notes that fail them only if the implementation ignores
    /// hints, never the other way round.
    fn find_all(
        &self,
        dir: &Path,
        extensions: &[String],
        conditions: &[Condition],
    ) -> Result<Vec<Note>, RepoError>;

    /// The first note under the repository root whose `id` is `id`.
    fn find_by_id(&self, id: i64) -> Result<Note, RepoError>;

    /// Persist `note`, assigning an id and a location when it has none.
    /// Returns where it was written.
    fn save(&self, note: &mut Note) -> Result<PathBuf, RepoError>;

    /// Remove the note's file.
    fn delete(&self, note: &Note) -> Result<(), RepoError>;
}

/// A repository over one directory tree.
#[derive(Debug, Clone)]
pub struct FsNoteRepository {
    root: PathBuf,
    extensions: Vec<String>,
    recursive: bool,
    ctx: NormalizeContext,
}

impl FsNoteRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: vec!["md".to_string()],
            recursive: true,
            ctx: NormalizeContext::now(),
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_context(mut self, ctx: NormalizeContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where a note without a location is written.
    fn new_location(&self, note: &Note) -> PathBuf {
        let id = note.id().map(|id| id.to_string()).unwrap_or_default();
        let title = note.title().map(file_safe).unwrap_or_default();
        let stem = match (id.is_empty(), title.is_empty()) {
            (false, false) => format!("{id} {title}"),
            (false, true) => id,
            (true, _) => title,
        };
        let ext = self.extensions.first().map(String::as_str).unwrap_or("md");
        self.root.join(format!("{stem}.{ext}"))
    }
}

impl NoteRepository for FsNoteRepository {
    fn find_by_location(&self, path: &Path) -> Result<Note, RepoError> {
        let text = std::fs::read_to_string(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => RepoError::NotFound(path.display().to_string()),
            _ => RepoError::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;
        let record = markdown::parse_with_source(&text, &path.to_string_lossy())?;
        Ok(Note::from_record(record, &self.ctx))
    }

    fn find_all(
        &self,
        dir: &Path,
        extensions: &[String],
        conditions: &[Condition],
    ) -> Result<Vec<Note>, RepoError> {
        loader::load_filtered(dir, extensions, self.recursive, conditions, &self.ctx)
            .map_err(RepoError::Load)
    }

    fn find_by_id(&self, id: i64) -> Result<Note, RepoError> {
        let wanted = [Condition::eq("id", id)];
        self.find_all(&self.root, &self.extensions, &wanted)?
            .into_iter()
            .find(|note| note.id() == Some(id))
            .ok_or_else(|| RepoError::NotFound(format!("id {id}")))
    }

    fn save(&self, note: &mut Note) -> Result<PathBuf, RepoError> {
        if note.id().is_none() {
            let stamp = note.date().unwrap_or(self.ctx.now).format("%Y%m%d%H%M").to_string();
            note.set_id(stamp)?;
        }
        let path = match note.path() {
            Some(path) => PathBuf::from(path),
            None => self.new_location(note),
        };
        let text = markdown::format(note.record());
        write_atomic(&path, text.as_bytes()).map_err(|source| RepoError::Io {
            path: path.clone(),
            source,
        })?;
        note.record_mut().source_path = Some(path.to_string_lossy().into_owned());
        tracing::debug!(path = %path.display(), "saved note");
        Ok(path)
    }

    fn delete(&self, note: &Note) -> Result<(), RepoError> {
        let path = note
            .path()
            .ok_or_else(|| RepoError::NotFound("note has no location".to_string()))?;
        std::fs::remove_file(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => RepoError::NotFound(path.to_string()),
            _ => RepoError::Io {
                path: PathBuf::from(path),
                source,
            },
        })?;
        tracing::debug!(path, "deleted note");
        Ok(())
    }
}

/// Drop characters that are awkward in file names.
fn file_safe(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::TempDir;
    use zettel_core::record::{NoteRecord, Section};
    use zettel_core::value::Value;

    fn ctx() -> NormalizeContext {
        NormalizeContext::at(
            NaiveDate::from_ymd_opt(2024, 7, 4)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
        )
    }

    fn repo(tmp: &TempDir) -> FsNoteRepository {
        FsNoteRepository::new(tmp.path()).with_context(ctx())
    }

    #[test]
    fn test_find_by_location_normalizes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("Legacy.md");
        fs::write(&path, "---\nzid: 5\ntag: x\n---\n# Legacy\n\nbody\n").unwrap();
        let note = repo(&tmp).find_by_location(&path).unwrap();
        assert_eq!(note.id(), Some(5));
        assert_eq!(note.tags(), vec!["x"]);
        assert_eq!(note.title(), Some("Legacy"));
        assert_eq!(note.path(), Some(path.to_string_lossy().as_ref()));
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let tmp = TempDir::new().unwrap();
        let repo = repo(&tmp);
        let missing = repo.find_by_location(&tmp.path().join("nope.md"));
        assert!(matches!(missing, Err(RepoError::NotFound(_))));

        let broken = tmp.path().join("broken.md");
        fs::write(&broken, "---\ntitle: x\n").unwrap();
        assert!(matches!(repo.find_by_location(&broken), Err(RepoError::Parse(_))));
    }

    #[test]
    fn test_save_new_note_then_find_by_id() {
        let tmp = TempDir::new().unwrap();
        let repo = repo(&tmp);
        let mut record = NoteRecord::new();
        record.metadata.insert("title", Value::from("Plans: Q3/Q4"));
        record.sections.push(Section::new("# Plans", "draft"));
        let mut note = Note::from_record(record, &ctx());

        let path = repo.save(&mut note).unwrap();
        assert_eq!(note.id(), Some(202407040930));
        assert_eq!(path, tmp.path().join("202407040930 Plans Q3 Q4.md"));
        assert_eq!(note.path(), Some(path.to_string_lossy().as_ref()));

        let found = repo.find_by_id(202407040930).unwrap();
        assert_eq!(found.title(), Some("Plans: Q3/Q4"));
        assert_eq!(found.section("Plans").map(|s| s.body.as_str()), Some("draft"));
        assert!(matches!(repo.find_by_id(1), Err(RepoError::NotFound(_))));
    }

    #[test]
    fn test_save_existing_note_in_place_and_delete() {
        let tmp = TempDir::new().unwrap();
        let repo = repo(&tmp);
        let path = tmp.path().join("note.md");
        fs::write(&path, "---\nid: 9\ntitle: Before\n---\n").unwrap();

        let mut note = repo.find_by_location(&path).unwrap();
        note.set_title("After");
        assert_eq!(repo.save(&mut note).unwrap(), path);
        assert_eq!(repo.find_by_location(&path).unwrap().title(), Some("After"));

        repo.delete(&note).unwrap();
        assert!(!path.exists());
        assert!(matches!(repo.delete(&note), Err(RepoError::NotFound(_))));
    }

    #[test]
    fn test_find_all_honours_conditions() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.md"), "---\nid: 1\ntype: project\n---\n").unwrap();
        fs::write(tmp.path().join("b.md"), "---\nid: 2\ntype: note\n---\n").unwrap();
        let notes = repo(&tmp)
            .find_all(tmp.path(), &["md".into()], &[Condition::eq("type", "project")])
            .unwrap();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].section("Log").is_some());
    }

    #[test]
    fn test_file_safe_titles() {
        assert_eq!(file_safe("a/b: c?"), "a b c");
        assert_eq!(file_safe("  plain  "), "plain");
    }
}
