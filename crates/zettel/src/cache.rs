//! On-disk cache of parsed notes.
//!
//! One bincode blob per (directory, extensions, recursive) key, stored as
//! `<cache dir>/<sha256 of key>.bin`. The blob is only ever replaced whole
//! (see [`crate::atomic::write_atomic`]), so a reader racing a refresh sees
//! either the previous generation or the next one.
//!
//! A cache that is missing, unreadable, from another version, or written for
//! a different key is ignored: the caller falls back to a cold scan. None of
//! those cases is an error.
//!
//! ```text
//! query ──▶ NoteCache::records() ──hit──▶ serve (possibly stale)
//!   │                      └──miss──▶ loader::load_all (cold)
//!   └──▶ spawn_refresh ──▶ refresh_cache ──▶ RefreshHandle::wait()
//!                           (reuses entries whose mtime and size match)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::atomic::write_atomic;
use crate::loader;
use zettel_core::record::NoteRecord;

/// Bumped whenever [`CacheFile`] or the record model changes shape.
pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no user cache directory is available; set [cache] path in the config")]
    NoCacheDir,
    #[error("failed to scan {directory}: {reason:#}")]
    Scan {
        directory: PathBuf,
        reason: anyhow::Error,
    },
    #[error("failed to encode cache: {0}")]
    Encode(#[from] bincode::Error),
    #[error("failed to write cache {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache refresh task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What a cache blob was built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub directory: PathBuf,
    pub extensions: Vec<String>,
    pub recursive: bool,
}

impl CacheKey {
    /// The directory is canonicalized when it exists so that `./notes` and
    /// `/home/me/notes` share a cache.
    pub fn new(directory: &Path, extensions: &[String], recursive: bool) -> Self {
        let directory = std::fs::canonicalize(directory).unwrap_or_else(|_| directory.to_path_buf());
        let mut extensions: Vec<String> = extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_string())
            .filter(|e| !e.is_empty())
            .collect();
        extensions.sort();
        extensions.dedup();
        Self {
            directory,
            extensions,
            recursive,
        }
    }

    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.directory.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(self.extensions.join(",").as_bytes());
        hasher.update([0]);
        hasher.update([u8::from(self.recursive)]);
        hex::encode(hasher.finalize())
    }

    fn matches(&self, file: &CacheFile) -> bool {
        file.directory == self.directory
            && file.extensions == self.extensions
            && file.recursive == self.recursive
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheFile {
    pub version: u32,
    pub directory: PathBuf,
    pub extensions: Vec<String>,
    pub recursive: bool,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<CacheEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub len: u64,
    pub record: NoteRecord,
}

/// `<user cache dir>/zk`.
pub fn default_cache_dir() -> Result<PathBuf, CacheError> {
    dirs::cache_dir()
        .map(|dir| dir.join("zk"))
        .ok_or(CacheError::NoCacheDir)
}

/// A cache blob location bound to its key.
#[derive(Debug, Clone)]
pub struct NoteCache {
    key: CacheKey,
    path: PathBuf,
}

impl NoteCache {
    pub fn new(key: CacheKey, cache_dir: &Path) -> Self {
        let path = cache_dir.join(format!("{}.bin", key.digest()));
        Self { key, path }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The blob, if present and built for this key by this version.
    pub fn read(&self) -> Option<CacheFile> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::debug!(path = %self.path.display(), error = %err, "no cache");
                return None;
            }
        };
        let file: CacheFile = match bincode::deserialize(&bytes) {
            Ok(file) => file,
            Err(err) => {
                tracing::debug!(path = %self.path.display(), error = %err, "ignoring unreadable cache");
                return None;
            }
        };
        if file.version != CACHE_VERSION {
            tracing::debug!(found = file.version, expected = CACHE_VERSION, "ignoring cache from another version");
            return None;
        }
        if !self.key.matches(&file) {
            tracing::debug!(path = %self.path.display(), "ignoring cache built for another key");
            return None;
        }
        Some(file)
    }

    /// Cached records in path order, or `None` on a miss.
    pub fn records(&self) -> Option<Vec<NoteRecord>> {
        let file = self.read()?;
        tracing::debug!(
            directory = %self.key.directory.display(),
            entries = file.entries.len(),
            generated_at = %file.generated_at,
            "cache hit"
        );
        Some(file.entries.into_iter().map(|e| e.record).collect())
    }

    /// Replace the blob with `entries`.
    pub fn write(&self, entries: Vec<CacheEntry>) -> Result<(), CacheError> {
        let file = CacheFile {
            version: CACHE_VERSION,
            directory: self.key.directory.clone(),
            extensions: self.key.extensions.clone(),
            recursive: self.key.recursive,
            generated_at: Utc::now(),
            entries,
        };
        let bytes = bincode::serialize(&file)?;
        write_atomic(&self.path, &bytes).map_err(|source| CacheError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Rescan the key's directory, reusing cached entries whose modification
/// time and size are unchanged, and rewrite the blob. Returns the records in
/// path order.
pub fn refresh_cache(cache: &NoteCache) -> Result<Vec<NoteRecord>, CacheError> {
    let key = cache.key();
    let files = loader::scan(&key.directory, &key.extensions, key.recursive).map_err(|reason| {
        CacheError::Scan {
            directory: key.directory.clone(),
            reason,
        }
    })?;

    let mut previous: HashMap<PathBuf, CacheEntry> = cache
        .read()
        .map(|file| file.entries.into_iter().map(|e| (e.path.clone(), e)).collect())
        .unwrap_or_default();

    let mut reused = 0usize;
    let mut entries = Vec::with_capacity(files.len());
    for file in files {
        if let Some(entry) = previous.remove(&file.path) {
            if entry.modified == file.modified && entry.len == file.len {
                reused += 1;
                entries.push(entry);
                continue;
            }
        }
        if let Some(record) = loader::parse_or_skip(&file.path) {
            entries.push(CacheEntry {
                path: file.path,
                modified: file.modified,
                len: file.len,
                record,
            });
        }
    }

    tracing::debug!(
        directory = %key.directory.display(),
        entries = entries.len(),
        reused,
        dropped = previous.len(),
        "refreshed cache"
    );
    let records = entries.iter().map(|e| e.record.clone()).collect();
    cache.write(entries)?;
    Ok(records)
}

/// A refresh running on the blocking pool.
///
/// Dropping the handle detaches the task; the blob is still replaced
/// atomically when it finishes.
#[derive(Debug)]
pub struct RefreshHandle {
    key: CacheKey,
    task: JoinHandle<Result<Vec<NoteRecord>, CacheError>>,
}

impl RefreshHandle {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Wait for the refreshed records.
    pub async fn wait(self) -> Result<Vec<NoteRecord>, CacheError> {
        self.task.await?
    }
}

/// Start [`refresh_cache`] without blocking the caller. Must be called from
/// within a Tokio runtime.
pub fn spawn_refresh(cache: NoteCache) -> RefreshHandle {
    let key = cache.key().clone();
    let task = tokio::task::spawn_blocking(move || refresh_cache(&cache));
    RefreshHandle { key, task }
}
