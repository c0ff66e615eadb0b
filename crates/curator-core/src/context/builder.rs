//! Context index construction from focus areas.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::EngineConfig;
use crate::context::index::{ContextIndex, ContextItem, CurationState, HistoryKind};
use crate::errors::{CuratorError, CuratorResult};
use crate::graph::{DependencyGraph, RelatedElement};
use crate::models::ArtifactKind;
use crate::query::guards::{clamp_budget, clamp_depth, truncate_focus, MAX_FOCUS_AREAS, MAX_RELATED_DEPTH};
use crate::query::scoring::Relevance;

/// Everything a caller can supply when a task starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub task_id: String,
    pub focus_areas: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub specs: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub active_file: Option<String>,
}

impl BuildRequest {
    pub fn new<S: AsRef<str>>(task_id: &str, focus_areas: &[S]) -> Self {
        Self {
            task_id: task_id.to_string(),
            focus_areas: focus_areas.iter().map(|f| f.as_ref().to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_decisions<S: AsRef<str>>(mut self, ids: &[S]) -> Self {
        self.decisions = ids.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn with_specs<S: AsRef<str>>(mut self, ids: &[S]) -> Self {
        self.specs = ids.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn with_patterns<S: AsRef<str>>(mut self, ids: &[S]) -> Self {
        self.patterns = ids.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn with_assumptions<S: AsRef<str>>(mut self, text: &[S]) -> Self {
        self.assumptions = text.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn with_active_file(mut self, path: &str) -> Self {
        self.active_file = Some(path.to_string());
        self
    }
}

/// A merged `find_related` hit with the best score seen for it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub related: RelatedElement,
    pub score: f64,
}

/// Normalize focus areas into a bounded ordered set.
pub fn normalize_focus<S: AsRef<str>>(raw: &[S]) -> IndexSet<String> {
    raw.iter()
        .map(|f| truncate_focus(f.as_ref()))
        .filter(|f| !f.is_empty())
        .take(MAX_FOCUS_AREAS)
        .collect()
}

fn dedup_ids(ids: &[String]) -> Vec<String> {
    let set: IndexSet<String> = ids
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    set.into_iter().collect()
}

pub struct ContextIndexBuilder<'g> {
    graph: &'g DependencyGraph,
    related_depth: usize,
    max_items: usize,
}

impl<'g> ContextIndexBuilder<'g> {
    pub fn new(graph: &'g DependencyGraph, config: &EngineConfig) -> Self {
        Self {
            graph,
            related_depth: clamp_depth(config.related_depth, MAX_RELATED_DEPTH),
            max_items: clamp_budget(config.max_items),
        }
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Run `find_related` per name and merge by element id, keeping the
    /// highest score and the shortest distance observed.
    ///
    /// Sorted by score descending, then distance, then qualified name.
    pub fn collect<S: AsRef<str>>(&self, names: &[S], active_file: Option<&str>) -> Vec<Candidate> {
        let mut merged: HashMap<String, Candidate> = HashMap::new();
        for name in names {
            for related in self.graph.find_related(name.as_ref(), self.related_depth) {
                let mut relevance = Relevance::from_distance(related.distance);
                if active_file == Some(related.element.file_path.as_str()) {
                    relevance = Relevance::Focus;
                }
                let score = relevance.score();
                match merged.get_mut(&related.element.id) {
                    Some(existing) => {
                        existing.score = existing.score.max(score);
                        if related.distance < existing.related.distance {
                            existing.related.distance = related.distance;
                        }
                    }
                    None => {
                        merged.insert(related.element.id.clone(), Candidate { related, score });
                    }
                }
            }
        }
        let mut candidates: Vec<Candidate> = merged.into_values().collect();
        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.related.distance.cmp(&b.related.distance))
                .then_with(|| {
                    a.related
                        .element
                        .qualified_name
                        .cmp(&b.related.element.qualified_name)
                })
                .then_with(|| a.related.element.id.cmp(&b.related.element.id))
        });
        candidates
    }

    /// Build (or rebuild) the index for `request.task_id`.
    ///
    /// A rebuild replaces items and sections but keeps the change history
    /// of `existing`, to which one build entry is appended.
    pub fn build(
        &self,
        request: &BuildRequest,
        existing: Option<ContextIndex>,
        now: DateTime<Utc>,
    ) -> CuratorResult<ContextIndex> {
        let task_id = request.task_id.trim();
        if task_id.is_empty() {
            return Err(CuratorError::InvalidInput(
                "task_id must not be empty".to_string(),
            ));
        }
        let mut index = match existing {
            Some(index) if index.is_archived() => {
                return Err(CuratorError::Archived(index.ctx_id));
            }
            Some(index) => index,
            None => ContextIndex::new(task_id, now),
        };
        let previous_added: HashMap<String, DateTime<Utc>> = index
            .items
            .iter()
            .map(|item| (item.id().to_string(), item.added_at))
            .collect();

        let focus = normalize_focus(&request.focus_areas);
        let focus_list: Vec<String> = focus.iter().cloned().collect();
        let active_file = request.active_file.as_deref();
        let candidates = self.collect(&focus_list, active_file);

        index.focus_areas = focus;
        index.decisions = dedup_ids(&request.decisions);
        index.specs = dedup_ids(&request.specs);
        index.patterns = dedup_ids(&request.patterns);
        index.assumptions = dedup_ids(&request.assumptions);
        index.active_file = request.active_file.clone();
        index.dependency_set = candidates
            .iter()
            .map(|c| c.related.element.id.clone())
            .collect::<BTreeSet<_>>();

        let mut items: Vec<ContextItem> = Vec::new();
        let linked = [
            (ArtifactKind::Decision, &index.decisions),
            (ArtifactKind::Spec, &index.specs),
            (ArtifactKind::Pattern, &index.patterns),
            (ArtifactKind::Assumption, &index.assumptions),
        ];
        for (kind, ids) in linked {
            for id in ids {
                items.push(ContextItem::artifact(
                    kind,
                    id,
                    Relevance::for_artifact(kind).score(),
                    now,
                ));
            }
        }
        let matched = candidates.len();
        items.extend(
            candidates
                .iter()
                .take(self.max_items)
                .map(|c| ContextItem::from_related(&c.related, c.score, now)),
        );
        for item in items.iter_mut() {
            if let Some(added) = previous_added.get(item.id()) {
                item.added_at = *added;
            }
        }

        index.items = items;
        index.sort_items();
        index.refresh_affected_files();
        index.curation_state = CurationState::Idle;
        index.pending_reevaluation = false;

        let impact: Vec<String> = index.items.iter().map(|i| i.id().to_string()).collect();
        let focus_text = focus_list.join(", ");
        index.record(
            HistoryKind::Build,
            None,
            format!("Built context for {task_id} with focus [{focus_text}]"),
            format!(
                "{} of {} related elements kept, {} linked artifacts",
                matched.min(self.max_items),
                matched,
                impact.len() - matched.min(self.max_items)
            ),
            impact,
            now,
        );

        info!(
            ctx_id = %index.ctx_id,
            focus = focus_list.len(),
            items = index.items.len(),
            related = matched,
            "context index built"
        );
        Ok(index)
    }
}
