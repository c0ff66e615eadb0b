//! `ContextEngine`: one project root, its graph snapshots and the context
//! indexes built against them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::context::builder::{BuildRequest, ContextIndexBuilder};
use crate::context::curator::{TurnCurator, TurnReport, TurnRequest};
use crate::context::index::{ContextIndex, ContextItem, IndexStatus};
use crate::context::propagator::{ChangeEvent, ChangePropagator, ChangeType, PropagationRecord};
use crate::context::render::render_markdown;
use crate::errors::{CuratorError, CuratorResult};
use crate::graph::builder::build_graph;
use crate::graph::snapshot::SnapshotHandle;
use crate::graph::DependencyGraph;
use crate::indexer::filesystem::{detect_language, normalize_project_path};
use crate::indexer::pipeline::{CancelToken, ScanOutcome, SourceIndexer};
use crate::models::{CodeElement, ProjectStructure};
use crate::query::slice;
use crate::query::structure::{project_structure, structure_map};
use crate::store::database::Database;

pub struct ContextEngine {
    config: EngineConfig,
    indexer: SourceIndexer,
    snapshot: SnapshotHandle,
    contexts: IndexMap<String, ContextIndex>,
    propagator: ChangePropagator,
    store: Option<Database>,
}

impl ContextEngine {
    /// Scan `root` and publish the first snapshot.
    ///
    /// Fails with `NotFound` when the root is missing or holds no parsable
    /// Python file.
    pub fn new(root: impl Into<PathBuf>, config: EngineConfig) -> CuratorResult<Self> {
        let mut engine = Self::unscanned(root.into(), config);
        engine.rescan()?;
        Ok(engine)
    }

    /// Like [`ContextEngine::new`], backed by a SQLite database at `db_path`.
    ///
    /// The persisted scan cache, context indexes and change log are restored
    /// first, so only files that moved since the last run are re-parsed.
    pub fn with_store(
        root: impl Into<PathBuf>,
        config: EngineConfig,
        db_path: impl AsRef<Path>,
    ) -> CuratorResult<Self> {
        let db = Database::open(db_path)?;
        let mut engine = Self::unscanned(root.into(), config);

        match db.load_scan() {
            Ok(entries) => engine.indexer.restore(entries),
            Err(e) => warn!("could not restore scan cache: {e}"),
        }
        match db.load_contexts() {
            Ok(indexes) => {
                for index in indexes {
                    engine.contexts.insert(index.ctx_id.clone(), index);
                }
            }
            Err(e) => warn!("could not restore context indexes: {e}"),
        }
        match db.load_change_events() {
            Ok(records) => engine.propagator.restore_log(records),
            Err(e) => warn!("could not restore change log: {e}"),
        }
        engine.store = Some(db);
        engine.rescan()?;
        info!(
            contexts = engine.contexts.len(),
            events = engine.propagator.log().len(),
            "engine restored from store"
        );
        Ok(engine)
    }

    fn unscanned(root: PathBuf, config: EngineConfig) -> Self {
        let config = config.clamped();
        Self {
            indexer: SourceIndexer::new(root, config.clone()),
            snapshot: SnapshotHandle::new(),
            contexts: IndexMap::new(),
            propagator: ChangePropagator::new(config.propagation_depth),
            store: None,
            config,
        }
    }

    pub fn root(&self) -> &Path {
        self.indexer.root()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The current immutable snapshot.
    pub fn graph(&self) -> Arc<DependencyGraph> {
        self.snapshot.load()
    }

    pub fn snapshot_generation(&self) -> u64 {
        self.snapshot.generation()
    }

    pub fn propagation_log(&self) -> &[PropagationRecord] {
        self.propagator.log()
    }

    // -- scanning ------------------------------------------------------------

    pub fn rescan(&mut self) -> CuratorResult<ScanOutcome> {
        self.rescan_with_cancel(&CancelToken::new())
    }

    /// Incremental re-scan. A new snapshot is published only when files or
    /// warnings changed; a cancelled scan leaves the current one in place.
    pub fn rescan_with_cancel(&mut self, cancel: &CancelToken) -> CuratorResult<ScanOutcome> {
        let pending = self.indexer.prepare(cancel)?;
        let current = self.snapshot.load();
        if self.snapshot.generation() > 0
            && pending.outcome.is_unchanged()
            && current.warnings() == pending.outcome.warnings.as_slice()
        {
            return Ok(self.indexer.commit(pending));
        }

        let graph = build_graph(&pending.outcome.files, pending.outcome.warnings.clone())?;
        if cancel.is_cancelled() {
            return Err(CuratorError::Cancelled);
        }
        // The cache only moves together with the snapshot built from it.
        self.snapshot.publish(graph);
        let outcome = self.indexer.commit(pending);
        if let Some(db) = &self.store {
            if let Err(e) = db.save_scan(self.indexer.cache_entries()) {
                warn!("failed to persist scan cache: {e}");
            }
        }
        Ok(outcome)
    }

    // -- queries -------------------------------------------------------------

    /// Elements matching `target` plus their neighborhood up to `max_depth`,
    /// nearest first. Unknown names yield an empty list.
    pub fn find_related_code(&self, target: &str, max_depth: usize) -> Vec<CodeElement> {
        self.snapshot
            .load()
            .find_related(target, max_depth)
            .into_iter()
            .map(|related| related.element)
            .collect()
    }

    pub fn slice_code<S: AsRef<str>>(
        &self,
        file_path: &str,
        element_names: &[S],
    ) -> CuratorResult<IndexMap<String, String>> {
        slice::slice_code(self.indexer.root(), file_path, element_names)
    }

    pub fn get_project_structure(&self) -> ProjectStructure {
        project_structure(&self.snapshot.load())
    }

    pub fn structure_map(&self, path_prefix: &str, include_signatures: bool) -> String {
        structure_map(&self.snapshot.load(), path_prefix, include_signatures)
    }

    // -- context indexes -----------------------------------------------------

    pub fn build_context_index<S: AsRef<str>>(
        &mut self,
        task_id: &str,
        focus_areas: &[S],
    ) -> CuratorResult<&ContextIndex> {
        self.build_context_index_with(&BuildRequest::new(task_id, focus_areas))
    }

    /// Re-scan, then build or rebuild the index for `request.task_id`.
    pub fn build_context_index_with(&mut self, request: &BuildRequest) -> CuratorResult<&ContextIndex> {
        self.rescan()?;
        let graph = self.snapshot.load();
        let ctx_id = ContextIndex::context_id(request.task_id.trim());
        let existing = self.contexts.get(&ctx_id).cloned();
        let index = ContextIndexBuilder::new(&graph, &self.config).build(request, existing, Utc::now())?;
        self.contexts.insert(ctx_id.clone(), index);
        self.persist_context(&ctx_id);
        self.contexts
            .get(&ctx_id)
            .ok_or_else(|| CuratorError::Index(format!("context {ctx_id} vanished after build")))
    }

    pub fn get_context(&self, ctx_id: &str) -> Option<&ContextIndex> {
        self.contexts.get(ctx_id)
    }

    /// Context ids in creation order.
    pub fn list_contexts(&self) -> Vec<String> {
        self.contexts.keys().cloned().collect()
    }

    pub fn render_context(&self, ctx_id: &str) -> Option<String> {
        self.contexts.get(ctx_id).map(render_markdown)
    }

    /// Freeze an index. Returns `false` when it is unknown or already archived.
    pub fn archive_context(&mut self, ctx_id: &str) -> bool {
        let Some(index) = self.contexts.get_mut(ctx_id) else {
            return false;
        };
        if index.is_archived() {
            return false;
        }
        index.status = IndexStatus::Archived;
        index.updated_at = Utc::now();
        info!(ctx_id, "context index archived");
        self.persist_context(ctx_id);
        true
    }

    // -- turns ---------------------------------------------------------------

    pub fn run_turn(&mut self, ctx_id: &str, request: &TurnRequest) -> CuratorResult<TurnReport> {
        let graph = self.snapshot.load();
        let index = self
            .contexts
            .get_mut(ctx_id)
            .ok_or_else(|| CuratorError::NotFound(format!("context index {ctx_id}")))?;
        let archived = index.is_archived();
        let report = TurnCurator::new(&graph, &self.config).run(index, request, Utc::now());
        if !archived {
            self.persist_context(ctx_id);
        }
        Ok(report)
    }

    /// One turn against the index's own focus areas; returns the curated items.
    pub fn evaluate_context_on_turn(&mut self, ctx_id: &str) -> CuratorResult<Vec<ContextItem>> {
        Ok(self.run_turn(ctx_id, &TurnRequest::default())?.items)
    }

    // -- change propagation --------------------------------------------------

    /// Record a change against one index.
    ///
    /// File events re-scan first and are matched against both the previous
    /// and the new snapshot. `affected_items` may be paths, element ids or
    /// element names for file events and artifact ids otherwise. An event
    /// that reaches none of the index's items or affected files is logged as
    /// a no-op. Returns `true` only when the index received a Change entry.
    pub fn update_context_on_change<S: AsRef<str>>(
        &mut self,
        ctx_id: &str,
        change_type: ChangeType,
        description: &str,
        affected_items: &[S],
    ) -> bool {
        match self.contexts.get(ctx_id) {
            Some(index) if !index.is_archived() => {}
            _ => return false,
        }
        let previous = self.snapshot.load();
        let paths = self.resolve_event_items(change_type, affected_items, &previous);
        let event = ChangeEvent::new(change_type, paths, description);
        let current = self.refresh_for(&event);

        let Some(index) = self.contexts.get_mut(ctx_id) else {
            return false;
        };
        let impact = self
            .propagator
            .impact(index, &event, &[previous.as_ref(), current.as_ref()]);
        if !impact.affected {
            self.propagator.record(event, Vec::new());
            self.persist_last_event();
            return false;
        }
        if !self.propagator.apply(index, &event, &impact, Utc::now()) {
            return false;
        }
        self.propagator.record(event, vec![ctx_id.to_string()]);
        self.persist_context(ctx_id);
        self.persist_last_event();
        true
    }

    /// Broadcast `event` to every active index; returns the affected ids.
    pub fn on_change(&mut self, mut event: ChangeEvent) -> Vec<String> {
        let previous = self.snapshot.load();
        event.paths = self.resolve_event_items(event.change_type, &event.paths, &previous);
        let current = self.refresh_for(&event);
        let affected = self.propagator.propagate(
            event,
            self.contexts.values_mut(),
            &[previous.as_ref(), current.as_ref()],
            Utc::now(),
        );
        for ctx_id in &affected {
            self.persist_context(ctx_id);
        }
        self.persist_last_event();
        affected
    }

    /// Re-scan for file events. A failed re-scan keeps the current snapshot.
    fn refresh_for(&mut self, event: &ChangeEvent) -> Arc<DependencyGraph> {
        if event.change_type.is_file_event() {
            if let Err(e) = self.rescan() {
                warn!(change = %event.change_type, "re-scan before propagation failed: {e}");
            }
        }
        self.snapshot.load()
    }

    /// Map caller-supplied items to event paths. Artifact ids pass through;
    /// for file events element ids and names are replaced by their files.
    fn resolve_event_items<S: AsRef<str>>(
        &self,
        change_type: ChangeType,
        items: &[S],
        graph: &DependencyGraph,
    ) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |value: String| {
            if !value.is_empty() && !out.contains(&value) {
                out.push(value);
            }
        };
        for item in items {
            let raw = item.as_ref().trim();
            if !change_type.is_file_event() {
                push(raw.to_string());
                continue;
            }
            if let Some(element) = graph.node(raw) {
                push(element.file_path.clone());
                continue;
            }
            let path = normalize_project_path(self.indexer.root(), raw);
            if detect_language(&path).is_some() || path.contains('/') {
                push(path);
                continue;
            }
            let matches = graph.find_related(raw, 0);
            if matches.is_empty() {
                push(path);
            }
            for related in matches {
                push(related.element.file_path);
            }
        }
        out
    }

    // -- persistence ---------------------------------------------------------

    fn persist_context(&self, ctx_id: &str) {
        let (Some(db), Some(index)) = (&self.store, self.contexts.get(ctx_id)) else {
            return;
        };
        if let Err(e) = db.save_context(index) {
            warn!(ctx_id, "failed to persist context index: {e}");
        }
    }

    fn persist_last_event(&self) {
        let (Some(db), Some(record)) = (&self.store, self.propagator.log().last()) else {
            return;
        };
        if let Err(e) = db.append_change_event(record) {
            warn!(seq = record.seq, "failed to persist change event: {e}");
        }
    }
}
