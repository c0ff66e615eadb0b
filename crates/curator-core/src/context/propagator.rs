//! Change propagation from project events to affected context indexes.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::index::{ContextIndex, HistoryKind};
use crate::errors::CuratorError;
use crate::graph::{DependencyGraph, Direction};
use crate::models::ArtifactKind;
use crate::query::guards::{clamp_depth, MAX_PROPAGATION_DEPTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    FileAdded,
    FileModified,
    FileRemoved,
    DecisionChanged,
    SpecChanged,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::FileAdded => "file_added",
            ChangeType::FileModified => "file_modified",
            ChangeType::FileRemoved => "file_removed",
            ChangeType::DecisionChanged => "decision_changed",
            ChangeType::SpecChanged => "spec_changed",
        }
    }

    pub fn is_file_event(self) -> bool {
        matches!(
            self,
            ChangeType::FileAdded | ChangeType::FileModified | ChangeType::FileRemoved
        )
    }

    /// Artifact kind an artifact event refers to.
    pub fn artifact_kind(self) -> Option<ArtifactKind> {
        match self {
            ChangeType::DecisionChanged => Some(ArtifactKind::Decision),
            ChangeType::SpecChanged => Some(ArtifactKind::Spec),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = CuratorError;

    /// Accepts `file_modified`, `file-modified` and the short forms
    /// `added` / `modified` / `removed` / `decision` / `spec`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "file_added" | "added" | "created" => Ok(ChangeType::FileAdded),
            "file_modified" | "modified" | "changed" => Ok(ChangeType::FileModified),
            "file_removed" | "removed" | "deleted" => Ok(ChangeType::FileRemoved),
            "decision_changed" | "decision" => Ok(ChangeType::DecisionChanged),
            "spec_changed" | "spec" => Ok(ChangeType::SpecChanged),
            _ => Err(CuratorError::InvalidInput(format!(
                "Unknown change type: {raw}"
            ))),
        }
    }
}

/// A detected mutation. File events carry project-relative paths,
/// artifact events carry artifact ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub change_type: ChangeType,
    pub paths: Vec<String>,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(change_type: ChangeType, paths: Vec<String>, description: &str) -> Self {
        Self {
            change_type,
            paths,
            description: description.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// One logged propagation, kept even when nothing was affected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationRecord {
    pub seq: u64,
    pub event: ChangeEvent,
    pub affected: Vec<String>,
}

/// Impact of one event on one index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Impact {
    pub affected: bool,
    /// Item ids that must be re-evaluated, sorted.
    pub flagged: Vec<String>,
}

pub struct ChangePropagator {
    depth: usize,
    log: Vec<PropagationRecord>,
}

impl ChangePropagator {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: clamp_depth(depth, MAX_PROPAGATION_DEPTH),
            log: Vec::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn log(&self) -> &[PropagationRecord] {
        &self.log
    }

    pub(crate) fn restore_log(&mut self, records: Vec<PropagationRecord>) {
        self.log = records;
    }

    /// Work out whether `event` touches `index`, against every given
    /// snapshot (old and new, so removed elements are still seen).
    pub fn impact(
        &self,
        index: &ContextIndex,
        event: &ChangeEvent,
        graphs: &[&DependencyGraph],
    ) -> Impact {
        if let Some(kind) = event.change_type.artifact_kind() {
            let flagged: Vec<String> = event
                .paths
                .iter()
                .filter(|id| index.links(kind, id))
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            return Impact {
                affected: !flagged.is_empty(),
                flagged,
            };
        }

        let changed: HashSet<&str> = event.paths.iter().map(String::as_str).collect();
        let mut affected = changed
            .iter()
            .any(|path| index.affected_files.contains(*path));

        let mut reached: HashSet<String> = HashSet::new();
        for graph in graphs {
            let sources: Vec<usize> = changed
                .iter()
                .flat_map(|path| graph.slots_in_file(path).iter().copied())
                .collect();
            if sources.is_empty() {
                continue;
            }
            for slot in graph
                .distances_from(&sources, self.depth, Direction::Both)
                .into_keys()
            {
                reached.insert(graph.at(slot).id.clone());
            }
        }

        let flagged: BTreeSet<String> = index
            .items()
            .iter()
            .filter(|item| {
                item.file_path
                    .as_deref()
                    .is_some_and(|path| changed.contains(path))
                    || item
                        .item_ref
                        .element_id()
                        .is_some_and(|id| reached.contains(id))
            })
            .map(|item| item.id().to_string())
            .collect();
        // Budget-trimmed neighbours still belong to the index.
        affected |= !flagged.is_empty()
            || reached.iter().any(|id| index.dependency_set.contains(id));
        Impact {
            affected,
            flagged: flagged.into_iter().collect(),
        }
    }

    /// Apply an impact: flag items, mark the index and append one history
    /// entry. Archived indexes are left alone.
    pub fn apply(
        &self,
        index: &mut ContextIndex,
        event: &ChangeEvent,
        impact: &Impact,
        now: DateTime<Utc>,
    ) -> bool {
        if index.is_archived() {
            return false;
        }
        let flagged: HashSet<&str> = impact.flagged.iter().map(String::as_str).collect();
        for item in index.items.iter_mut() {
            if flagged.contains(item.id()) {
                item.needs_reevaluation = true;
            }
        }
        index.pending_reevaluation = true;
        let what = if event.paths.is_empty() {
            event.change_type.as_str().to_string()
        } else {
            format!("{}: {}", event.change_type, event.paths.join(", "))
        };
        index.record(
            HistoryKind::Change,
            Some(event.change_type),
            what,
            event.description.clone(),
            impact.flagged.clone(),
            now,
        );
        true
    }

    /// Propagate `event` to every affected, non-archived index and log it.
    pub fn propagate<'a, I>(
        &mut self,
        event: ChangeEvent,
        indexes: I,
        graphs: &[&DependencyGraph],
        now: DateTime<Utc>,
    ) -> Vec<String>
    where
        I: IntoIterator<Item = &'a mut ContextIndex>,
    {
        let mut affected = Vec::new();
        for index in indexes {
            if index.is_archived() {
                continue;
            }
            let impact = self.impact(index, &event, graphs);
            if !impact.affected {
                continue;
            }
            debug!(
                ctx_id = %index.ctx_id,
                flagged = impact.flagged.len(),
                change = %event.change_type,
                "change affects context index"
            );
            if self.apply(index, &event, &impact, now) {
                affected.push(index.ctx_id.clone());
            }
        }
        affected.sort();
        self.record(event, affected.clone())
    }

    /// Append `event` to the propagation log with its affected ids.
    pub(crate) fn record(&mut self, event: ChangeEvent, affected: Vec<String>) -> Vec<String> {
        let seq = self.log.last().map(|r| r.seq + 1).unwrap_or(1);
        if affected.is_empty() {
            debug!(change = %event.change_type, paths = ?event.paths, "change affected no context index");
        }
        self.log.push(PropagationRecord {
            seq,
            event,
            affected: affected.clone(),
        });
        affected
    }
}
