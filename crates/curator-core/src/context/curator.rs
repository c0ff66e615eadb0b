//! Per-turn evaluate / remove / load / proceed cycle.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::context::builder::{normalize_focus, ContextIndexBuilder};
use crate::context::index::{
    ContextCategory, ContextIndex, ContextItem, CurationState, HistoryKind,
};
use crate::graph::DependencyGraph;
use crate::query::guards::REMOVAL_THRESHOLD;
use crate::query::scoring::{RelevanceScorer, ScoringContext};

/// Inputs for one turn. Everything is optional; the default request
/// re-evaluates the index against its own focus areas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    /// Focus for this step; `None` uses the index's focus areas.
    #[serde(default)]
    pub focus: Option<Vec<String>>,
    /// Element names the agent asked for explicitly.
    #[serde(default)]
    pub requested: Vec<String>,
    /// File being modified in this step.
    #[serde(default)]
    pub active_file: Option<String>,
}

/// What one turn did, plus the curated items it returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnReport {
    pub ctx_id: String,
    pub items: Vec<ContextItem>,
    pub removed: Vec<String>,
    pub loaded: Vec<String>,
    pub evicted: Vec<String>,
}

impl TurnReport {
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty() && self.loaded.is_empty() && self.evicted.is_empty()
    }
}

pub struct TurnCurator<'g> {
    graph: &'g DependencyGraph,
    builder: ContextIndexBuilder<'g>,
}

impl<'g> TurnCurator<'g> {
    pub fn new(graph: &'g DependencyGraph, config: &EngineConfig) -> Self {
        Self {
            graph,
            builder: ContextIndexBuilder::new(graph, config),
        }
    }

    /// Run one full cycle against `index`. Archived indexes are returned
    /// as they are.
    pub fn run(
        &self,
        index: &mut ContextIndex,
        request: &TurnRequest,
        now: DateTime<Utc>,
    ) -> TurnReport {
        let mut report = TurnReport {
            ctx_id: index.ctx_id.clone(),
            items: Vec::new(),
            removed: Vec::new(),
            loaded: Vec::new(),
            evicted: Vec::new(),
        };
        if index.is_archived() {
            report.items = index.items.clone();
            return report;
        }

        index.curation_state = CurationState::Evaluating;
        let focus: Vec<String> = match &request.focus {
            Some(step_focus) => normalize_focus(step_focus).into_iter().collect(),
            None => index.focus_areas.iter().cloned().collect(),
        };
        let requested: Vec<String> = normalize_focus(&request.requested)
            .into_iter()
            .filter(|name| !focus.contains(name))
            .collect();
        let active_file = request
            .active_file
            .clone()
            .or_else(|| index.active_file.clone());

        // Requested names count as focus for this turn only.
        let mut seeds = focus.clone();
        seeds.extend(requested.iter().cloned());
        let context = ScoringContext::new(
            self.graph,
            &seeds,
            active_file.as_deref(),
            &index.dependency_set,
        );

        self.evaluate(index, &context);
        report.removed = self.remove(index);
        let (loaded, evicted) = self.load(index, &seeds, &context, active_file.as_deref(), now);
        report.loaded = loaded;
        report.evicted = evicted;
        index.curation_state = CurationState::Curated;

        self.proceed(index, &report, now);
        report.items = index.items.clone();
        report
    }

    fn evaluate(&self, index: &mut ContextIndex, context: &ScoringContext) {
        for item in index.items.iter_mut() {
            item.score = RelevanceScorer::score(self.graph, context, &item.item_ref);
            recategorize(item, context);
        }
    }

    fn remove(&self, index: &mut ContextIndex) -> Vec<String> {
        let mut removed = Vec::new();
        index.items.retain(|item| {
            let keep = item.score >= REMOVAL_THRESHOLD;
            if !keep {
                removed.push(item.id().to_string());
            }
            keep
        });
        removed.sort();
        removed
    }

    /// Pull in missing focus/requested elements within the item budget.
    ///
    /// Candidates go in best-first. Once the budget is full a candidate only
    /// displaces the weakest element item (lowest score, then oldest) when
    /// it scores strictly higher, so an unchanged turn loads nothing new.
    fn load(
        &self,
        index: &mut ContextIndex,
        seeds: &[String],
        context: &ScoringContext,
        active_file: Option<&str>,
        now: DateTime<Utc>,
    ) -> (Vec<String>, Vec<String>) {
        let budget = self.builder.max_items();
        let present: HashSet<String> = index.items.iter().map(|i| i.id().to_string()).collect();
        let mut candidates: Vec<ContextItem> = self
            .builder
            .collect(seeds, active_file)
            .into_iter()
            .filter(|c| !present.contains(&c.related.element.id))
            .map(|c| {
                let mut item = ContextItem::from_related(&c.related, 0.0, now);
                item.score = RelevanceScorer::score(self.graph, context, &item.item_ref);
                recategorize(&mut item, context);
                item
            })
            .filter(|item| item.score >= REMOVAL_THRESHOLD)
            .collect();
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id().cmp(b.id())));

        let mut loaded = Vec::new();
        let mut evicted = Vec::new();
        for candidate in candidates {
            let element_items = index.items.iter().filter(|i| i.is_element()).count();
            if element_items < budget {
                loaded.push(candidate.id().to_string());
                index.dependency_set.insert(candidate.id().to_string());
                index.items.push(candidate);
                continue;
            }
            let weakest = index
                .items
                .iter()
                .enumerate()
                .filter(|(_, item)| item.is_element())
                .min_by(|(_, a), (_, b)| {
                    a.score
                        .total_cmp(&b.score)
                        .then_with(|| a.added_at.cmp(&b.added_at))
                        .then_with(|| b.id().cmp(a.id()))
                })
                .map(|(pos, item)| (pos, item.score));
            match weakest {
                Some((pos, score)) if candidate.score > score => {
                    let gone = index.items.remove(pos);
                    evicted.push(gone.id().to_string());
                    loaded.push(candidate.id().to_string());
                    index.dependency_set.insert(candidate.id().to_string());
                    index.items.push(candidate);
                }
                _ => break,
            }
        }
        (loaded, evicted)
    }

    fn proceed(&self, index: &mut ContextIndex, report: &TurnReport, now: DateTime<Utc>) {
        for item in index.items.iter_mut() {
            item.last_evaluated = now;
            item.needs_reevaluation = false;
        }
        index.pending_reevaluation = false;
        index.sort_items();
        index.refresh_affected_files();
        index.updated_at = now;

        if !report.is_noop() {
            debug!(
                ctx_id = %index.ctx_id,
                removed = report.removed.len(),
                loaded = report.loaded.len(),
                evicted = report.evicted.len(),
                "turn changed context"
            );
            let mut impact = Vec::new();
            impact.extend(report.removed.iter().map(|id| format!("-{id}")));
            impact.extend(report.evicted.iter().map(|id| format!("-{id}")));
            impact.extend(report.loaded.iter().map(|id| format!("+{id}")));
            index.record(
                HistoryKind::Curation,
                None,
                format!(
                    "Curated {} items: {} removed, {} loaded, {} evicted",
                    index.items.len(),
                    report.removed.len(),
                    report.loaded.len(),
                    report.evicted.len()
                ),
                "turn evaluation".to_string(),
                impact,
                now,
            );
        }
        index.curation_state = CurationState::Idle;
    }
}

/// Element items follow their distance from this turn's focus; anything
/// beyond scoring depth files under Dependency. Artifacts keep their section.
fn recategorize(item: &mut ContextItem, context: &ScoringContext) {
    if let Some(id) = item.item_ref.element_id() {
        item.category = context
            .distance(id)
            .map(ContextCategory::for_distance)
            .unwrap_or(ContextCategory::Dependency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::builder::BuildRequest;
    use crate::models::{CodeElement, EdgeKind, ElementKind};

    fn element(file: &str, qualified: &str) -> CodeElement {
        CodeElement {
            id: format!("{file}::{qualified}"),
            kind: ElementKind::Function,
            name: qualified.rsplit('.').next().unwrap().to_string(),
            qualified_name: qualified.to_string(),
            file_path: file.to_string(),
            start_line: 1,
            end_line: 1,
            signature: String::new(),
            docstring: None,
            parameters: vec![],
            return_type: None,
            is_async: false,
            parent_id: None,
        }
    }

    /// foo -> bar -> baz, qux isolated, quux alone in its file next to nothing.
    fn graph() -> DependencyGraph {
        let mut g = DependencyGraph::new();
        g.add_node(element("a.py", "a.foo")).unwrap();
        g.add_node(element("b.py", "b.bar")).unwrap();
        g.add_node(element("c.py", "c.baz")).unwrap();
        g.add_node(element("d.py", "d.qux")).unwrap();
        g.add_node(element("e.py", "e.quux")).unwrap();
        g.add_edge("a.py::a.foo", "b.py::b.bar", EdgeKind::Call).unwrap();
        g.add_edge("b.py::b.bar", "c.py::c.baz", EdgeKind::Call).unwrap();
        g
    }

    fn build(g: &DependencyGraph, config: &EngineConfig, focus: &[&str]) -> ContextIndex {
        ContextIndexBuilder::new(g, config)
            .build(&BuildRequest::new("TASK", focus), None, Utc::now())
            .unwrap()
    }

    fn ids(items: &[ContextItem]) -> Vec<String> {
        let mut ids: Vec<String> = items.iter().map(|i| i.id().to_string()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_turn_on_fresh_index_is_noop() {
        let g = graph();
        let config = EngineConfig::default();
        let mut index = build(&g, &config, &["foo"]);
        let curator = TurnCurator::new(&g, &config);
        let report = curator.run(&mut index, &TurnRequest::default(), Utc::now());
        assert!(report.is_noop());
        assert_eq!(report.items.len(), 3);
        assert_eq!(index.history().len(), 1);
        assert_eq!(index.curation_state, CurationState::Idle);
    }

    #[test]
    fn test_threshold_guarantee_after_focus_shift() {
        let g = graph();
        let config = EngineConfig::default();
        let mut index = build(&g, &config, &["foo"]);
        index.dependency_set.clear();
        let curator = TurnCurator::new(&g, &config);
        let request = TurnRequest {
            focus: Some(vec!["qux".to_string()]),
            ..TurnRequest::default()
        };
        let report = curator.run(&mut index, &request, Utc::now());
        assert!(report.items.iter().all(|i| i.score >= REMOVAL_THRESHOLD));
        assert_eq!(ids(&report.items), vec!["d.py::d.qux"]);
        assert_eq!(report.removed.len(), 3);
        assert_eq!(report.loaded, vec!["d.py::d.qux"]);
        assert_eq!(index.history().len(), 2);
    }

    #[test]
    fn test_requested_elements_are_loaded() {
        let g = graph();
        let config = EngineConfig::default();
        let mut index = build(&g, &config, &["foo"]);
        let curator = TurnCurator::new(&g, &config);
        let request = TurnRequest {
            requested: vec!["quux".to_string()],
            ..TurnRequest::default()
        };
        let report = curator.run(&mut index, &request, Utc::now());
        assert_eq!(report.loaded, vec!["e.py::e.quux"]);
        assert!(index.contains("e.py::e.quux"));
        assert!(index.dependency_set.contains("e.py::e.quux"));

        // Later default turns keep it through the dependency set.
        let again = curator.run(&mut index, &TurnRequest::default(), Utc::now());
        assert!(again.removed.is_empty());
        assert_eq!(index.item("e.py::e.quux").unwrap().score, 0.4);
    }

    #[test]
    fn test_turn_is_idempotent() {
        let g = graph();
        let config = EngineConfig {
            max_items: 2,
            ..EngineConfig::default()
        };
        let mut index = build(&g, &config, &["bar"]);
        let curator = TurnCurator::new(&g, &config);
        let request = TurnRequest {
            requested: vec!["qux".to_string(), "quux".to_string()],
            ..TurnRequest::default()
        };
        let first = curator.run(&mut index, &request, Utc::now());
        let second = curator.run(&mut index, &request, Utc::now());
        assert_eq!(ids(&first.items), ids(&second.items));
        assert!(second.is_noop());
        assert!(first.items.len() <= 2);
    }

    #[test]
    fn test_budget_evicts_lowest_score_first() {
        let g = graph();
        let config = EngineConfig {
            max_items: 2,
            ..EngineConfig::default()
        };
        // foo(1.0) and bar(0.8) fill the budget
        let mut index = build(&g, &config, &["foo"]);
        let curator = TurnCurator::new(&g, &config);
        let request = TurnRequest {
            requested: vec!["qux".to_string()],
            ..TurnRequest::default()
        };
        let report = curator.run(&mut index, &request, Utc::now());
        assert_eq!(report.evicted, vec!["b.py::b.bar"]);
        assert_eq!(ids(&report.items), vec!["a.py::a.foo", "d.py::d.qux"]);
    }

    #[test]
    fn test_flags_cleared_and_timestamps_updated() {
        let g = graph();
        let config = EngineConfig::default();
        let mut index = build(&g, &config, &["foo"]);
        for item in index.items.iter_mut() {
            item.needs_reevaluation = true;
        }
        index.pending_reevaluation = true;
        let before = index.items()[0].last_evaluated;
        let later = before + chrono::Duration::seconds(5);
        let curator = TurnCurator::new(&g, &config);
        curator.run(&mut index, &TurnRequest::default(), later);
        assert!(index.flagged().next().is_none());
        assert!(!index.pending_reevaluation);
        assert!(index.items().iter().all(|i| i.last_evaluated == later));
    }

    #[test]
    fn test_focus_shift_moves_sections() {
        let g = graph();
        let config = EngineConfig::default();
        let mut index = build(&g, &config, &["foo"]);
        assert!(index.affected_files.contains("b.py"));
        let curator = TurnCurator::new(&g, &config);
        let request = TurnRequest {
            focus: Some(vec!["qux".to_string()]),
            ..TurnRequest::default()
        };
        curator.run(&mut index, &request, Utc::now());

        let task_scope: Vec<&str> = index
            .items_in(ContextCategory::TaskScope)
            .map(|i| i.id())
            .collect();
        assert_eq!(task_scope, vec!["d.py::d.qux"]);
        assert_eq!(index.item("a.py::a.foo").unwrap().category, ContextCategory::Dependency);
        assert_eq!(index.items_in(ContextCategory::AffectedArea).count(), 0);
        assert_eq!(
            index.affected_files.iter().cloned().collect::<Vec<_>>(),
            vec!["d.py".to_string()]
        );
    }

    #[test]
    fn test_archived_index_is_returned_unchanged() {
        let g = graph();
        let config = EngineConfig::default();
        let mut index = build(&g, &config, &["foo"]);
        index.status = crate::context::index::IndexStatus::Archived;
        let snapshot = index.clone();
        let curator = TurnCurator::new(&g, &config);
        let request = TurnRequest {
            focus: Some(vec!["qux".to_string()]),
            ..TurnRequest::default()
        };
        let report = curator.run(&mut index, &request, Utc::now());
        assert_eq!(report.items, snapshot.items);
        assert_eq!(index, snapshot);
    }
}
