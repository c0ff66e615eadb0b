//! Incremental scan orchestration with Rayon-based parallel extraction.
//!
//! A scan walks the project, reuses cached extractions for files whose
//! fingerprint or content hash is unchanged and parses the rest in a worker
//! pool. The cache is only replaced once a scan completes; a cancelled or
//! failed scan leaves the previous state untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::errors::{CuratorError, CuratorResult};
use crate::indexer::filesystem::{compute_content_hash, iter_source_files, Fingerprint, SourceFile};
use crate::indexer::parser::parse_bytes;
use crate::indexer::symbols::extract_file;
use crate::models::{FileIndex, ScanWarning};

/// Cooperative cancellation flag shared with in-flight scans.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cached extraction for one file.
#[derive(Debug, Clone)]
pub struct CachedFile {
    pub fingerprint: Fingerprint,
    pub index: Arc<FileIndex>,
}

/// Result of one completed scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Every successfully indexed file, sorted by path.
    pub files: Vec<Arc<FileIndex>>,
    pub warnings: Vec<ScanWarning>,
    /// Files parsed in this scan that were not cached before.
    pub added: Vec<String>,
    /// Cached files whose content hash changed.
    pub modified: Vec<String>,
    /// Previously cached files that are gone or no longer parse.
    pub removed: Vec<String>,
    pub reused: usize,
    pub elapsed_ms: u64,
}

impl ScanOutcome {
    pub fn changed_paths(&self) -> impl Iterator<Item = &String> {
        self.added
            .iter()
            .chain(self.modified.iter())
            .chain(self.removed.iter())
    }

    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

/// A finished scan whose cache has not been committed yet.
#[derive(Debug)]
pub struct PendingScan {
    pub outcome: ScanOutcome,
    cache: HashMap<String, CachedFile>,
}

enum WorkerResult {
    Reused(String, CachedFile),
    Parsed(String, CachedFile),
    Failed(ScanWarning),
    Cancelled,
}

fn extract_file_worker(
    job: &SourceFile,
    previous: Option<&CachedFile>,
    cancel: &CancelToken,
) -> WorkerResult {
    if cancel.is_cancelled() {
        return WorkerResult::Cancelled;
    }
    let bytes = match std::fs::read(&job.absolute) {
        Ok(b) => b,
        Err(e) => {
            return WorkerResult::Failed(ScanWarning {
                path: job.relative.clone(),
                message: format!("Failed to read file: {e}"),
            })
        }
    };
    let content_hash = compute_content_hash(&bytes);
    if let Some(previous) = previous {
        if previous.index.content_hash == content_hash {
            return WorkerResult::Reused(
                job.relative.clone(),
                CachedFile {
                    fingerprint: job.fingerprint,
                    index: Arc::clone(&previous.index),
                },
            );
        }
    }
    match parse_bytes(&job.relative, &job.language, bytes) {
        Ok(unit) => WorkerResult::Parsed(
            job.relative.clone(),
            CachedFile {
                fingerprint: job.fingerprint,
                index: Arc::new(extract_file(&unit, &content_hash)),
            },
        ),
        Err(e) => WorkerResult::Failed(ScanWarning {
            path: job.relative.clone(),
            message: e.to_string(),
        }),
    }
}

fn parallel_extract(
    jobs: &[&SourceFile],
    cache: &HashMap<String, CachedFile>,
    workers: usize,
    cancel: &CancelToken,
) -> Vec<WorkerResult> {
    if jobs.is_empty() {
        return vec![];
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build();

    let run = |job: &&SourceFile| extract_file_worker(job, cache.get(&job.relative), cancel);
    match pool {
        Ok(pool) => pool.install(|| jobs.par_iter().map(run).collect()),
        Err(e) => {
            debug!(error = %e, "falling back to sequential extraction");
            jobs.iter().map(run).collect()
        }
    }
}

/// Walks a project root and maintains the per-file extraction cache.
#[derive(Debug)]
pub struct SourceIndexer {
    root: PathBuf,
    config: EngineConfig,
    cache: HashMap<String, CachedFile>,
}

impl SourceIndexer {
    pub fn new(root: impl Into<PathBuf>, config: EngineConfig) -> Self {
        Self {
            root: root.into(),
            config,
            cache: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cached_files(&self) -> usize {
        self.cache.len()
    }

    pub fn cached(&self, path: &str) -> Option<&CachedFile> {
        self.cache.get(path)
    }

    pub fn cache_entries(&self) -> impl Iterator<Item = &CachedFile> {
        self.cache.values()
    }

    /// Seed the cache from persisted extractions so the next scan only
    /// re-reads files whose fingerprint moved.
    pub fn restore<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (Fingerprint, FileIndex)>,
    {
        for (fingerprint, index) in entries {
            self.cache.insert(
                index.path.clone(),
                CachedFile {
                    fingerprint,
                    index: Arc::new(index),
                },
            );
        }
    }

    /// Scan and commit in one step.
    pub fn scan(&mut self, cancel: &CancelToken) -> CuratorResult<ScanOutcome> {
        let pending = self.prepare(cancel)?;
        Ok(self.commit(pending))
    }

    /// Replace the cache with the one `pending` was built against.
    pub fn commit(&mut self, pending: PendingScan) -> ScanOutcome {
        self.cache = pending.cache;
        let outcome = pending.outcome;
        info!(
            files = outcome.files.len(),
            added = outcome.added.len(),
            modified = outcome.modified.len(),
            removed = outcome.removed.len(),
            reused = outcome.reused,
            warnings = outcome.warnings.len(),
            elapsed_ms = outcome.elapsed_ms,
            "scan complete"
        );
        outcome
    }

    /// Scan the project root, re-parsing only what changed. The cache is
    /// left as it is until the result is passed to [`SourceIndexer::commit`].
    pub fn prepare(&self, cancel: &CancelToken) -> CuratorResult<PendingScan> {
        let started = Instant::now();
        if !self.root.is_dir() {
            return Err(CuratorError::NotFound(format!(
                "Project root {} does not exist or is not a directory",
                self.root.display()
            )));
        }

        let sources = iter_source_files(&self.root, &self.config);
        if cancel.is_cancelled() {
            return Err(CuratorError::Cancelled);
        }

        let mut next: HashMap<String, CachedFile> = HashMap::with_capacity(sources.len());
        let mut jobs: Vec<&SourceFile> = Vec::new();
        for source in &sources {
            match self.cache.get(&source.relative) {
                Some(cached) if cached.fingerprint == source.fingerprint => {
                    next.insert(source.relative.clone(), cached.clone());
                }
                _ => jobs.push(source),
            }
        }
        let mut reused = next.len();

        let mut outcome = ScanOutcome::default();
        for result in parallel_extract(&jobs, &self.cache, self.config.workers, cancel) {
            match result {
                WorkerResult::Reused(path, cached) => {
                    reused += 1;
                    next.insert(path, cached);
                }
                WorkerResult::Parsed(path, cached) => {
                    if self.cache.contains_key(&path) {
                        outcome.modified.push(path.clone());
                    } else {
                        outcome.added.push(path.clone());
                    }
                    next.insert(path, cached);
                }
                WorkerResult::Failed(warning) => {
                    warn!(path = %warning.path, "skipping unparsable file: {}", warning.message);
                    outcome.warnings.push(warning);
                }
                WorkerResult::Cancelled => {}
            }
        }
        if cancel.is_cancelled() {
            info!(root = %self.root.display(), "scan cancelled; keeping previous snapshot");
            return Err(CuratorError::Cancelled);
        }
        if next.is_empty() {
            return Err(CuratorError::NotFound(format!(
                "No parsable Python source files under {}",
                self.root.display()
            )));
        }

        outcome.removed = self
            .cache
            .keys()
            .filter(|path| !next.contains_key(*path))
            .cloned()
            .collect();
        outcome.added.sort();
        outcome.modified.sort();
        outcome.removed.sort();
        outcome.warnings.sort_by(|a, b| a.path.cmp(&b.path));

        let mut files: Vec<Arc<FileIndex>> = next.values().map(|c| Arc::clone(&c.index)).collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        outcome.files = files;
        outcome.reused = reused;
        outcome.elapsed_ms = started.elapsed().as_millis() as u64;

        Ok(PendingScan {
            outcome,
            cache: next,
        })
    }
}
