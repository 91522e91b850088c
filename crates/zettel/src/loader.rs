//! Directory-wide note loading.
//!
//! Scans a root with `walkdir`, keeps files whose extension is wanted, and
//! parses them with the fast parser. Output is ordered by path so that
//! repeated loads of an unchanged tree are identical.
//!
//! A file that fails to read or parse is logged and skipped; it never
//! aborts the load of its siblings.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::{DirEntry, WalkDir};

use zettel_core::markdown::fast;
use zettel_core::normalize::NormalizeContext;
use zettel_core::note::Note;
use zettel_core::query::{normalize_filtered, Condition};
use zettel_core::record::NoteRecord;

/// Directory names never descended into.
const SKIPPED_DIRS: [&str; 2] = ["target", "node_modules"];

/// A matching file found by [`scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub len: u64,
}

/// List note files under `root`, sorted by path.
pub fn scan(root: &Path, extensions: &[String], recursive: bool) -> Result<Vec<ScannedFile>> {
    if !root.is_dir() {
        bail!("notes directory does not exist: {}", root.display());
    }
    let wanted = build_globset(extensions)?;

    let mut walker = WalkDir::new(root);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker.into_iter().filter_entry(|e| e.depth() == 0 || !is_skipped(e)) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if !wanted.is_match(relative) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                tracing::warn!(path = %entry.path().display(), error = %err, "skipping file");
                continue;
            }
        };
        files.push(ScannedFile {
            path: entry.into_path(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            len: metadata.len(),
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Read and parse one file with the fast parser.
pub fn parse_file(path: &Path) -> Result<NoteRecord> {
    let text = std::fs::read_to_string(path)?;
    Ok(fast::parse_with_source(&text, &path.to_string_lossy())?)
}

/// Parse a scanned file, logging and returning `None` on failure.
pub(crate) fn parse_or_skip(path: &Path) -> Option<NoteRecord> {
    match parse_file(path) {
        Ok(record) => Some(record),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "skipping note");
            None
        }
    }
}

/// Parse every note under `root`, in path order.
pub fn load_all(root: &Path, extensions: &[String], recursive: bool) -> Result<Vec<NoteRecord>> {
    let files = scan(root, extensions, recursive)?;
    let scanned = files.len();
    let records: Vec<NoteRecord> = files.iter().filter_map(|f| parse_or_skip(&f.path)).collect();
    tracing::debug!(
        root = %root.display(),
        scanned,
        parsed = records.len(),
        "loaded notes"
    );
    Ok(records)
}

/// Load and normalize notes, dropping those that fail `conditions` before
/// variant normalization. Callers must still apply their full filter.
pub fn load_filtered(
    root: &Path,
    extensions: &[String],
    recursive: bool,
    conditions: &[Condition],
    ctx: &NormalizeContext,
) -> Result<Vec<Note>> {
    let records = load_all(root, extensions, recursive)?;
    Ok(normalize_filtered(records, conditions, ctx))
}

fn is_skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref())
}

fn build_globset(extensions: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for ext in extensions {
        let ext = ext.trim().trim_start_matches('.');
        if ext.is_empty() {
            continue;
        }
        builder.add(Glob::new(&format!("**/*.{ext}"))?);
    }
    Ok(builder.build()?)
}
