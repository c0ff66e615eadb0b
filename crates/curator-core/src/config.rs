//! Engine configuration: defaults plus `CURATOR_*` environment overrides.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::query::guards::{
    clamp_budget, clamp_depth, clamp_workers, DEFAULT_CONTEXT_ITEMS, MAX_PROPAGATION_DEPTH,
    MAX_RELATED_DEPTH,
};

const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    "venv",
    "env",
    ".venv",
    "__pycache__",
    ".git",
    "build",
    "dist",
    "node_modules",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Size of the rayon pool used for per-file extraction.
    pub workers: usize,
    /// Directory names that are never descended into.
    pub excluded_dirs: Vec<String>,
    /// Graph depth used by `find_related` when building an index.
    pub related_depth: usize,
    /// Neighborhood depth a change event is checked against.
    pub propagation_depth: usize,
    /// Item budget per context index.
    pub max_items: usize,
    /// Honour `.gitignore` / `.curatorignore` files while walking.
    pub respect_gitignore: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|d| d.to_string()).collect(),
            related_depth: 2,
            propagation_depth: 2,
            max_items: DEFAULT_CONTEXT_ITEMS,
            respect_gitignore: true,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with whatever `CURATOR_*` variables are set.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup, then clamp.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = parse_usize(&lookup, "CURATOR_WORKERS") {
            self.workers = value;
        }
        if let Some(value) = parse_usize(&lookup, "CURATOR_RELATED_DEPTH") {
            self.related_depth = value;
        }
        if let Some(value) = parse_usize(&lookup, "CURATOR_PROPAGATION_DEPTH") {
            self.propagation_depth = value;
        }
        if let Some(value) = parse_usize(&lookup, "CURATOR_MAX_ITEMS") {
            self.max_items = value;
        }
        if let Some(raw) = lookup("CURATOR_EXCLUDE_DIRS") {
            for dir in raw.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                if !self.excluded_dirs.iter().any(|existing| existing == dir) {
                    self.excluded_dirs.push(dir.to_string());
                }
            }
        }
        if let Some(raw) = lookup("CURATOR_RESPECT_GITIGNORE") {
            let v = raw.trim().to_lowercase();
            self.respect_gitignore = !matches!(v.as_str(), "0" | "false" | "no" | "off");
        }
        self.clamped()
    }

    pub fn clamped(mut self) -> Self {
        self.workers = clamp_workers(self.workers);
        self.related_depth = clamp_depth(self.related_depth, MAX_RELATED_DEPTH);
        self.propagation_depth = clamp_depth(self.propagation_depth, MAX_PROPAGATION_DEPTH);
        self.max_items = clamp_budget(self.max_items);
        self
    }
}

fn parse_usize<F>(lookup: &F, key: &str) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<usize>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable configuration value");
            None
        }
    }
}
