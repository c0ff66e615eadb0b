//! Filesystem scanning helpers for indexing passes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::EngineConfig;
use crate::errors::CuratorResult;

const LANGUAGE_BY_EXTENSION: &[(&str, &str)] = &[(".py", "python"), (".pyi", "python")];

const CUSTOM_IGNORE_FILE: &str = ".curatorignore";

/// Cheap change detector consulted before hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub mtime_ns: i64,
    pub size_bytes: u64,
}

/// A candidate source file discovered under the project root.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub absolute: PathBuf,
    /// Project-relative, `/`-separated.
    pub relative: String,
    pub language: String,
    pub fingerprint: Fingerprint,
}

pub fn detect_language(path: &str) -> Option<String> {
    let path = Path::new(path);
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))?;
    LANGUAGE_BY_EXTENSION
        .iter()
        .find(|(e, _)| *e == ext.as_str())
        .map(|(_, lang)| lang.to_string())
}

pub fn compute_content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub fn fingerprint(path: &Path) -> CuratorResult<Fingerprint> {
    let metadata = std::fs::metadata(path)?;
    let mtime_ns = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    Ok(Fingerprint {
        mtime_ns,
        size_bytes: metadata.len(),
    })
}

/// Project-relative `/` path for `path`, or `None` when it lies outside `root`.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let normalized = rel.to_string_lossy().replace('\\', "/");
    Some(normalized.trim_start_matches("./").to_string())
}

/// Normalize a caller-supplied path (absolute or relative) against `root`.
pub fn normalize_project_path(root: &Path, raw: &str) -> String {
    let candidate = Path::new(raw);
    if candidate.is_absolute() {
        if let Some(rel) = relative_path(root, candidate) {
            return rel;
        }
        if let (Ok(canonical_root), Ok(canonical)) =
            (std::fs::canonicalize(root), std::fs::canonicalize(candidate))
        {
            if let Some(rel) = relative_path(&canonical_root, &canonical) {
                return rel;
            }
        }
        return raw.replace('\\', "/");
    }
    normalize_posix_path(&raw.replace('\\', "/"))
}

pub fn normalize_posix_path(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            _ => stack.push(part),
        }
    }
    stack.join("/")
}

/// Walk `root` and return every analyzable source file, sorted by relative path.
pub fn iter_source_files(root: &Path, config: &EngineConfig) -> Vec<SourceFile> {
    let excluded: HashSet<String> = config.excluded_dirs.iter().cloned().collect();

    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .parents(false)
        .git_global(false)
        .git_exclude(false)
        .git_ignore(config.respect_gitignore)
        .ignore(config.respect_gitignore)
        .require_git(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir || entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !excluded.contains(name.as_ref())
        });
    if config.respect_gitignore {
        builder.add_custom_ignore_filename(CUSTOM_IGNORE_FILE);
    }

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                debug!(error = %err, "skipping unreadable walk entry");
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        let language = match detect_language(&path.to_string_lossy()) {
            Some(l) => l,
            None => continue,
        };
        let relative = match relative_path(root, path) {
            Some(r) => r,
            None => continue,
        };
        let fingerprint = match fingerprint(path) {
            Ok(f) => f,
            Err(err) => {
                debug!(path = %relative, error = %err, "skipping file without metadata");
                continue;
            }
        };
        files.push(SourceFile {
            absolute: path.to_path_buf(),
            relative,
            language,
            fingerprint,
        });
    }
    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    files
}
