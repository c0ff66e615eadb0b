//! Context index model: items, sections and the append-only change history.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::context::propagator::ChangeType;
use crate::graph::RelatedElement;
use crate::models::{ArtifactKind, ElementRef};
use crate::query::guards::clamp_score;

/// Section a context item is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextCategory {
    TaskScope,
    AffectedArea,
    TechnicalContext,
    Assumption,
    Dependency,
}

impl ContextCategory {
    pub const ALL: [ContextCategory; 5] = [
        ContextCategory::TaskScope,
        ContextCategory::AffectedArea,
        ContextCategory::TechnicalContext,
        ContextCategory::Assumption,
        ContextCategory::Dependency,
    ];

    pub fn title(self) -> &'static str {
        match self {
            ContextCategory::TaskScope => "Task Scope",
            ContextCategory::AffectedArea => "Affected Areas",
            ContextCategory::TechnicalContext => "Technical Context",
            ContextCategory::Assumption => "Assumptions",
            ContextCategory::Dependency => "Dependencies",
        }
    }

    pub fn for_distance(distance: usize) -> Self {
        match distance {
            0 => ContextCategory::TaskScope,
            1 => ContextCategory::AffectedArea,
            _ => ContextCategory::Dependency,
        }
    }

    pub fn for_artifact(kind: ArtifactKind) -> Self {
        match kind {
            ArtifactKind::Assumption => ContextCategory::Assumption,
            ArtifactKind::Decision | ArtifactKind::Spec | ArtifactKind::Pattern => {
                ContextCategory::TechnicalContext
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub item_ref: ElementRef,
    pub category: ContextCategory,
    pub score: f64,
    /// Qualified name for elements, the artifact id otherwise.
    pub label: String,
    pub signature: Option<String>,
    pub file_path: Option<String>,
    pub added_at: DateTime<Utc>,
    pub last_evaluated: DateTime<Utc>,
    pub needs_reevaluation: bool,
}

impl ContextItem {
    pub fn from_related(related: &RelatedElement, score: f64, now: DateTime<Utc>) -> Self {
        let element = &related.element;
        Self {
            item_ref: ElementRef::Element {
                id: element.id.clone(),
            },
            category: ContextCategory::for_distance(related.distance),
            score: clamp_score(score),
            label: element.qualified_name.clone(),
            signature: Some(element.signature_slice()),
            file_path: Some(element.file_path.clone()),
            added_at: now,
            last_evaluated: now,
            needs_reevaluation: false,
        }
    }

    pub fn artifact(kind: ArtifactKind, id: &str, score: f64, now: DateTime<Utc>) -> Self {
        Self {
            item_ref: ElementRef::Artifact {
                kind,
                id: id.to_string(),
            },
            category: ContextCategory::for_artifact(kind),
            score: clamp_score(score),
            label: id.to_string(),
            signature: None,
            file_path: None,
            added_at: now,
            last_evaluated: now,
            needs_reevaluation: false,
        }
    }

    pub fn id(&self) -> &str {
        self.item_ref.id()
    }

    pub fn is_element(&self) -> bool {
        self.item_ref.element_id().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Build,
    Change,
    Curation,
}

impl HistoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryKind::Build => "build",
            HistoryKind::Change => "change",
            HistoryKind::Curation => "curation",
        }
    }
}

/// One immutable line of an index's change history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeHistoryEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: HistoryKind,
    pub change_type: Option<ChangeType>,
    pub what: String,
    pub why: String,
    pub impact: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Active,
    Archived,
}

/// Per-index turn state: `Idle -> Evaluating -> Curated -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurationState {
    Idle,
    Evaluating,
    Curated,
}

/// The task-scoped working set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextIndex {
    pub ctx_id: String,
    pub task_id: String,
    pub focus_areas: IndexSet<String>,
    pub(crate) items: Vec<ContextItem>,
    pub decisions: Vec<String>,
    pub specs: Vec<String>,
    pub patterns: Vec<String>,
    pub assumptions: Vec<String>,
    /// Files defining Task Scope / Affected Areas items.
    pub affected_files: BTreeSet<String>,
    /// Every element id the builder or a turn reached for this task.
    pub dependency_set: BTreeSet<String>,
    pub active_file: Option<String>,
    change_history: Vec<ChangeHistoryEntry>,
    pub status: IndexStatus,
    pub curation_state: CurationState,
    pub pending_reevaluation: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContextIndex {
    pub fn context_id(task_id: &str) -> String {
        format!("CTX-{task_id}")
    }

    pub fn new(task_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            ctx_id: Self::context_id(task_id),
            task_id: task_id.to_string(),
            focus_areas: IndexSet::new(),
            items: Vec::new(),
            decisions: Vec::new(),
            specs: Vec::new(),
            patterns: Vec::new(),
            assumptions: Vec::new(),
            affected_files: BTreeSet::new(),
            dependency_set: BTreeSet::new(),
            active_file: None,
            change_history: Vec::new(),
            status: IndexStatus::Active,
            curation_state: CurationState::Idle,
            pending_reevaluation: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.status == IndexStatus::Archived
    }

    pub fn items(&self) -> &[ContextItem] {
        &self.items
    }

    pub fn item(&self, id: &str) -> Option<&ContextItem> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.item(id).is_some()
    }

    pub fn items_in(&self, category: ContextCategory) -> impl Iterator<Item = &ContextItem> {
        self.items.iter().filter(move |item| item.category == category)
    }

    pub fn element_ids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|item| item.item_ref.element_id())
    }

    pub fn flagged(&self) -> impl Iterator<Item = &ContextItem> {
        self.items.iter().filter(|item| item.needs_reevaluation)
    }

    pub fn history(&self) -> &[ChangeHistoryEntry] {
        &self.change_history
    }

    /// Whether `id` is linked as an artifact of `kind`.
    pub fn links(&self, kind: ArtifactKind, id: &str) -> bool {
        let linked = match kind {
            ArtifactKind::Decision => &self.decisions,
            ArtifactKind::Spec => &self.specs,
            ArtifactKind::Pattern => &self.patterns,
            ArtifactKind::Assumption => &self.assumptions,
        };
        linked.iter().any(|linked_id| linked_id == id)
    }

    /// Append a history entry; earlier entries are never touched.
    pub(crate) fn record(
        &mut self,
        kind: HistoryKind,
        change_type: Option<ChangeType>,
        what: String,
        why: String,
        impact: Vec<String>,
        now: DateTime<Utc>,
    ) -> u64 {
        let seq = self.change_history.last().map(|e| e.seq + 1).unwrap_or(1);
        self.change_history.push(ChangeHistoryEntry {
            seq,
            timestamp: now,
            kind,
            change_type,
            what,
            why,
            impact,
        });
        self.updated_at = now;
        seq
    }

    /// Stable section order, then score descending, then label.
    pub(crate) fn sort_items(&mut self) {
        self.items.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then_with(|| b.score.total_cmp(&a.score))
                .then_with(|| a.label.cmp(&b.label))
                .then_with(|| a.id().cmp(b.id()))
        });
    }

    pub(crate) fn refresh_affected_files(&mut self) {
        self.affected_files = self
            .items
            .iter()
            .filter(|item| {
                matches!(
                    item.category,
                    ContextCategory::TaskScope | ContextCategory::AffectedArea
                )
            })
            .filter_map(|item| item.file_path.clone())
            .collect();
    }
}
