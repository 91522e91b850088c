//! Query runner: executes a [`QuerySpec`] against the filesystem, serving
//! from the note cache and checking afterwards whether the answer was stale.
//!
//! ```text
//! run(spec)
//!   ├─ snapshot every directory the spec touches (cache hit, or cold later)
//!   ├─ spawn_refresh for each directory        ──┐  blocking pool
//!   └─ execute(spec, snapshot) ──▶ Served        │
//!                                   │            │
//!         caller renders result     │            │
//!                                   ▼            ▼
//!                     Served::check_staleness().await
//!                       re-execute on refreshed records,
//!                       compare result fingerprints
//! ```
//!
//! The refresh never delays the served result; the caller decides when (and
//! whether) to await the staleness check.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::cache::{default_cache_dir, spawn_refresh, CacheKey, NoteCache, RefreshHandle};
use crate::config::{expand_tilde, Config};
use crate::loader;
use zettel_core::normalize::NormalizeContext;
use zettel_core::note::Note;
use zettel_core::query::{
    execute, normalize_filtered, ExecuteOptions, NoteSource, QueryError, QueryResult, QuerySpec,
    SourceRequest, SourceSpec,
};
use zettel_core::record::NoteRecord;

/// Read a spec from a file path, or parse the argument itself as an inline
/// YAML/JSON document when no such file exists.
pub fn load_spec(path_or_inline: &str) -> Result<QuerySpec> {
    let path = expand_tilde(Path::new(path_or_inline));
    if path.is_file() {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read query spec: {}", path.display()))?;
        return QuerySpec::parse(&text)
            .with_context(|| format!("Invalid query spec in {}", path.display()));
    }
    QuerySpec::parse(path_or_inline).with_context(|| "Invalid inline query spec")
}

fn key_for(directory: &str, extensions: &[String], recursive: bool) -> CacheKey {
    CacheKey::new(&expand_tilde(Path::new(directory)), extensions, recursive)
}

/// Records captured before execution, keyed by what they were loaded for.
/// Requests with no snapshot are loaded cold.
#[derive(Debug, Default)]
struct SnapshotSource {
    records: HashMap<CacheKey, Vec<NoteRecord>>,
}

impl NoteSource for SnapshotSource {
    fn load(&self, request: &SourceRequest<'_>, ctx: &NormalizeContext) -> Result<Vec<Note>> {
        let key = key_for(request.directory, request.extensions, request.recursive);
        let records = match self.records.get(&key) {
            Some(records) => records.clone(),
            None => loader::load_all(&key.directory, &key.extensions, key.recursive)?,
        };
        Ok(normalize_filtered(records, request.conditions, ctx))
    }
}

/// Outcome of comparing a served result with one computed from refreshed
/// notes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    /// The refreshed corpus gives a different multiset of rows.
    Stale { served: usize, fresh: usize },
    /// The refresh or the re-execution failed; nothing is known.
    Unchecked(String),
}

/// Work left for the staleness check.
#[derive(Debug)]
struct PendingCheck {
    spec: QuerySpec,
    options: ExecuteOptions,
    refreshes: Vec<RefreshHandle>,
}

/// A result that has been computed and may be shown immediately.
#[derive(Debug)]
pub struct Served {
    pub result: QueryResult,
    pending: Option<PendingCheck>,
}

impl Served {
    /// Wait for the background refresh and compare. Without a cache there is
    /// nothing to compare and the result is [`Staleness::Fresh`].
    pub async fn check_staleness(self) -> Staleness {
        let Some(pending) = self.pending else {
            return Staleness::Fresh;
        };
        let mut source = SnapshotSource::default();
        for handle in pending.refreshes {
            let key = handle.key().clone();
            match handle.wait().await {
                Ok(records) => {
                    source.records.insert(key, records);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "cache refresh failed; staleness unknown");
                    return Staleness::Unchecked(err.to_string());
                }
            }
        }
        match execute(&pending.spec, &source, &pending.options) {
            Ok(fresh) if self.result.differs_from(&fresh) => {
                tracing::warn!(
                    served = self.result.rows.len(),
                    fresh = fresh.rows.len(),
                    "served results were stale"
                );
                Staleness::Stale {
                    served: self.result.rows.len(),
                    fresh: fresh.rows.len(),
                }
            }
            Ok(_) => Staleness::Fresh,
            Err(err) => Staleness::Unchecked(err.to_string()),
        }
    }
}

/// Executes specs with the configured defaults.
#[derive(Debug, Clone)]
pub struct QueryRunner {
    default_directory: Option<PathBuf>,
    default_limit: Option<usize>,
    /// `None` disables the cache and the staleness check.
    cache_dir: Option<PathBuf>,
    ctx: NormalizeContext,
    seed: Option<u64>,
}

impl QueryRunner {
    /// A runner with no defaults and no cache.
    pub fn new() -> Self {
        Self {
            default_directory: None,
            default_limit: None,
            cache_dir: None,
            ctx: NormalizeContext::now(),
            seed: None,
        }
    }

    pub fn from_config(config: &Config, use_cache: bool) -> Self {
        let cache_dir = if use_cache && config.cache.enabled {
            match config.cache.path.clone().map(Ok).unwrap_or_else(default_cache_dir) {
                Ok(dir) => Some(dir),
                Err(err) => {
                    tracing::warn!(error = %err, "running without a cache");
                    None
                }
            }
        } else {
            None
        };
        Self {
            default_directory: config.notes.directory.clone(),
            default_limit: config.query.default_limit,
            cache_dir,
            ..Self::new()
        }
    }

    pub fn with_default_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_directory = Some(dir.into());
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_context(mut self, ctx: NormalizeContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Execute `spec`. With a cache configured this must be called inside a
    /// Tokio runtime, since it spawns the background refresh.
    pub fn run(&self, spec: &QuerySpec) -> Result<Served, QueryError> {
        let mut spec = spec.clone();
        if spec.output.limit.is_none() {
            spec.output.limit = self.default_limit;
        }
        let options = ExecuteOptions {
            default_directory: self
                .default_directory
                .as_ref()
                .map(|d| d.to_string_lossy().into_owned()),
            ctx: self.ctx,
            // Both executions must draw the same sample.
            seed: self.seed.or_else(|| spec.output.sample.map(|_| rand::random())),
        };

        let Some(cache_dir) = &self.cache_dir else {
            let result = execute(&spec, &SnapshotSource::default(), &options)?;
            return Ok(Served {
                result,
                pending: None,
            });
        };

        let mut snapshot = SnapshotSource::default();
        let mut refreshes = Vec::new();
        for key in touched_keys(&spec, options.default_directory.as_deref()) {
            let cache = NoteCache::new(key.clone(), cache_dir);
            if let Some(records) = cache.records() {
                snapshot.records.insert(key, records);
            }
            refreshes.push(spawn_refresh(cache));
        }

        let result = execute(&spec, &snapshot, &options)?;
        Ok(Served {
            result,
            pending: Some(PendingCheck {
                spec,
                options,
                refreshes,
            }),
        })
    }
}

impl Default for QueryRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Every (directory, extensions, recursive) the spec will load, deduplicated.
fn touched_keys(spec: &QuerySpec, default_directory: Option<&str>) -> Vec<CacheKey> {
    let Some(main) = spec.source.directory.as_deref().or(default_directory) else {
        return Vec::new();
    };
    let key = |dir: &str, source: &SourceSpec| key_for(dir, &source.extensions, source.recursive);

    let mut keys = vec![key(main, &spec.source)];
    for lookup in &spec.lookups {
        let dir = lookup.source.directory.as_deref().unwrap_or(main);
        let k = key(dir, &lookup.source);
        if !keys.contains(&k) {
            keys.push(k);
        }
    }
    keys
}
