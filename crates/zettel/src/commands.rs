//! Implementations behind each `zk` subcommand.
//!
//! Every function prints its own output and returns `Ok(())` on success,
//! so `main` stays a thin dispatcher.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::atomic::write_atomic;
use crate::cache::{default_cache_dir, spawn_refresh, CacheKey, NoteCache};
use crate::config::{expand_tilde, Config};
use crate::output;
use crate::query::{load_spec, QueryRunner, Staleness};
use crate::repository::{FsNoteRepository, NoteRepository};
use zettel_core::markdown;
use zettel_core::note::Note;
use zettel_core::query::OutputFormat;
use zettel_core::value::Value;

/// Options for `zk query` that override the spec and the config.
#[derive(Debug, Clone, Default)]
pub struct QueryArgs {
    pub format: Option<OutputFormat>,
    pub limit: Option<usize>,
    pub no_cache: bool,
}

/// `zk query`: run a spec, print the result, then report staleness.
pub async fn run_query(config: &Config, spec_arg: &str, args: &QueryArgs) -> Result<()> {
    let mut spec = load_spec(spec_arg)?;
    if args.limit.is_some() {
        spec.output.limit = args.limit;
    }
    let format = match args.format.or(spec.output.format) {
        Some(format) => format,
        None => config.default_format()?,
    };

    let runner = QueryRunner::from_config(config, !args.no_cache);
    let served = runner.run(&spec)?;

    for warning in &served.result.warnings {
        eprintln!("warning: {warning}");
    }
    let text = output::render(&served.result, format)?;
    output::emit(&text, spec.output.file.as_deref())?;
    if let Some(file) = &spec.output.file {
        eprintln!("Wrote {} row(s) to {}", served.result.rows.len(), file.display());
    }

    match served.check_staleness().await {
        Staleness::Fresh => {}
        Staleness::Stale { served, fresh } => {
            eprintln!(
                "note: notes changed while this ran ({served} row(s) shown, {fresh} now); rerun for current results"
            );
        }
        Staleness::Unchecked(reason) => {
            tracing::debug!(%reason, "staleness not checked");
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct SectionView<'a> {
    heading: &'a str,
    body: &'a str,
}

/// `zk show` response shape.
#[derive(Debug, Serialize)]
struct NoteView<'a> {
    path: Option<&'a str>,
    variant: &'static str,
    metadata: serde_json::Value,
    references: serde_json::Value,
    sections: Vec<SectionView<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    log: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
}

fn note_view(note: &Note) -> NoteView<'_> {
    let project = note.as_project();
    NoteView {
        path: note.path(),
        variant: note.variant().as_str(),
        metadata: Value::Map(note.metadata().clone()).to_json(),
        references: Value::Map(note.references().clone()).to_json(),
        sections: note
            .record()
            .sections
            .iter()
            .map(|s| SectionView {
                heading: &s.heading,
                body: &s.body,
            })
            .collect(),
        log: project.map(|p| p.log().iter().map(|e| e.to_value().to_json()).collect()),
        warnings: project.map(|p| p.warnings()),
    }
}

fn repository(config: &Config) -> FsNoteRepository {
    let root = config
        .notes
        .directory
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    FsNoteRepository::new(root)
        .with_extensions(config.notes.extensions.clone())
        .with_recursive(config.notes.recursive)
}

/// `zk show`: print the normalized note as JSON.
pub fn show_note(config: &Config, file: &Path) -> Result<()> {
    let note = repository(config).find_by_location(&expand_tilde(file))?;
    println!("{}", serde_json::to_string_pretty(&note_view(&note))?);
    Ok(())
}

/// `zk fmt`: print the canonical form, or rewrite the file in place.
pub fn format_note(file: &Path, write: bool) -> Result<()> {
    let path = expand_tilde(file);
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read note: {}", path.display()))?;
    let record = markdown::parse_with_source(&text, &path.to_string_lossy())?;
    let formatted = markdown::format(&record);

    if !write {
        print!("{formatted}");
        return Ok(());
    }
    if formatted == text {
        println!("unchanged  {}", path.display());
    } else {
        write_atomic(&path, formatted.as_bytes())
            .with_context(|| format!("Failed to write note: {}", path.display()))?;
        println!("formatted  {}", path.display());
    }
    Ok(())
}

/// `zk log`: list a project note's log entries and their warnings.
pub fn show_log(config: &Config, file: &Path) -> Result<()> {
    let note = repository(config).find_by_location(&expand_tilde(file))?;
    let Some(project) = note.as_project() else {
        bail!(
            "{} is a {} note, not a project note",
            file.display(),
            note.variant().as_str()
        );
    };

    let entries = project.log();
    if entries.is_empty() {
        println!("No log entries.");
    }
    for entry in &entries {
        let stamp = if entry.has_time {
            entry.timestamp.format("%Y-%m-%d %H:%M").to_string()
        } else {
            entry.timestamp.format("%Y-%m-%d").to_string()
        };
        println!(
            "{:<16}  {:<9}  {:<8}  {}",
            stamp,
            entry.status.as_str(),
            entry.list_tag,
            entry.action
        );
    }

    let warnings = project.warnings();
    if !warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in warnings {
            println!("  {warning}");
        }
    }
    Ok(())
}

/// `zk cache refresh`: rebuild the cache for one directory.
pub async fn refresh(config: &Config, dir: Option<&Path>) -> Result<()> {
    let directory = match dir.map(Path::to_path_buf).or_else(|| config.notes.directory.clone()) {
        Some(dir) => expand_tilde(&dir),
        None => bail!("No notes directory: pass --dir or set notes.directory in the config"),
    };
    let cache_dir = match &config.cache.path {
        Some(path) => path.clone(),
        None => default_cache_dir()?,
    };

    let key = CacheKey::new(&directory, &config.notes.extensions, config.notes.recursive);
    let cache = NoteCache::new(key, &cache_dir);
    let path = cache.path().to_path_buf();
    let records = spawn_refresh(cache)
        .wait()
        .await
        .with_context(|| format!("Failed to refresh cache for {}", directory.display()))?;

    println!("Cached {} note(s) from {}", records.len(), directory.display());
    println!("  cache: {}", path.display());
    Ok(())
}
