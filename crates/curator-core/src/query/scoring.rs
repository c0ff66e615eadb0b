//! Rule-based relevance scoring for context items.
//!
//! Scores are bucketed, never weighted: an element lands in the highest
//! bucket whose rule it satisfies. A [`ScoringContext`] is built fresh for
//! every evaluation from the current focus and graph and is not reused.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::graph::{DependencyGraph, Direction};
use crate::models::{ArtifactKind, ElementRef};
use crate::query::guards::{clamp_score, MAX_SCORING_DEPTH};

/// Relevance buckets, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relevance {
    /// Declared focus match, or defined in the file being modified.
    Focus,
    /// One hop from a focus match, or an explicitly linked decision/spec.
    Direct,
    /// Two hops, or a shared architectural pattern.
    Near,
    /// Recorded in the index's dependency set.
    Dependency,
    /// Only shares a module with a focus match.
    Incidental,
    Unrelated,
}

impl Relevance {
    pub fn score(self) -> f64 {
        match self {
            Relevance::Focus => 1.0,
            Relevance::Direct => 0.8,
            Relevance::Near => 0.6,
            Relevance::Dependency => 0.4,
            Relevance::Incidental => 0.2,
            Relevance::Unrelated => 0.0,
        }
    }

    /// Bucket implied by graph distance alone.
    pub fn from_distance(distance: usize) -> Self {
        match distance {
            0 => Relevance::Focus,
            1 => Relevance::Direct,
            2 => Relevance::Near,
            _ => Relevance::Dependency,
        }
    }

    pub fn for_artifact(kind: ArtifactKind) -> Self {
        match kind {
            ArtifactKind::Decision | ArtifactKind::Spec | ArtifactKind::Assumption => {
                Relevance::Direct
            }
            ArtifactKind::Pattern => Relevance::Near,
        }
    }
}

/// Focus-derived facts needed to score any item against one graph.
#[derive(Debug, Clone, Default)]
pub struct ScoringContext {
    distances: HashMap<String, usize>,
    focus_files: HashSet<String>,
    active_file: Option<String>,
    dependency_set: BTreeSet<String>,
}

impl ScoringContext {
    pub fn new(
        graph: &DependencyGraph,
        focus: &[String],
        active_file: Option<&str>,
        dependency_set: &BTreeSet<String>,
    ) -> Self {
        let mut sources: Vec<usize> = focus
            .iter()
            .flat_map(|f| graph.resolve_target(f))
            .collect();
        sources.sort_unstable();
        sources.dedup();

        let focus_files = sources
            .iter()
            .map(|&s| graph.at(s).file_path.clone())
            .collect();
        let distances = graph
            .distances_from(&sources, MAX_SCORING_DEPTH, Direction::Both)
            .into_iter()
            .map(|(slot, distance)| (graph.at(slot).id.clone(), distance))
            .collect();

        Self {
            distances,
            focus_files,
            active_file: active_file.map(str::to_string),
            dependency_set: dependency_set.clone(),
        }
    }

    /// Distance from the nearest focus match, if within scoring depth.
    pub fn distance(&self, id: &str) -> Option<usize> {
        self.distances.get(id).copied()
    }

    pub fn has_focus_matches(&self) -> bool {
        self.distances.values().any(|&d| d == 0)
    }
}

/// Stateless bucket assignment.
pub struct RelevanceScorer;

impl RelevanceScorer {
    pub fn classify_element(
        graph: &DependencyGraph,
        context: &ScoringContext,
        id: &str,
    ) -> Relevance {
        let Some(element) = graph.node(id) else {
            return Relevance::Unrelated;
        };
        let distance = context.distance(id);
        if distance == Some(0) || context.active_file.as_deref() == Some(element.file_path.as_str())
        {
            return Relevance::Focus;
        }
        match distance {
            Some(1) => return Relevance::Direct,
            Some(2) => return Relevance::Near,
            _ => {}
        }
        if context.dependency_set.contains(id) {
            return Relevance::Dependency;
        }
        if context.focus_files.contains(&element.file_path) {
            return Relevance::Incidental;
        }
        Relevance::Unrelated
    }

    pub fn classify(graph: &DependencyGraph, context: &ScoringContext, item: &ElementRef) -> Relevance {
        match item {
            ElementRef::Element { id } => Self::classify_element(graph, context, id),
            ElementRef::Artifact { kind, .. } => Relevance::for_artifact(*kind),
        }
    }

    /// Score in `[0, 1]`.
    pub fn score(graph: &DependencyGraph, context: &ScoringContext, item: &ElementRef) -> f64 {
        clamp_score(Self::classify(graph, context, item).score())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    /// focus -> one -> two -> three -> four, plus a sibling of focus and a loner.
    fn graph() -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for (file, q) in [
            ("f.py", "f.focus"),
            ("f.py", "f.sibling"),
            ("a.py", "a.one"),
            ("b.py", "b.two"),
            ("c.py", "c.three"),
            ("d.py", "d.four"),
            ("e.py", "e.loner"),
        ] {
            g.add_node(element(file, q)).unwrap();
        }
        g.add_edge("f.py::f.focus", "a.py::a.one", EdgeKind::Call).unwrap();
        g.add_edge("a.py::a.one", "b.py::b.two", EdgeKind::Call).unwrap();
        g.add_edge("b.py::b.two", "c.py::c.three", EdgeKind::Call).unwrap();
        g.add_edge("c.py::c.three", "d.py::d.four", EdgeKind::Call).unwrap();
        g
    }

    fn score(g: &DependencyGraph, ctx: &ScoringContext, id: &str) -> f64 {
        RelevanceScorer::score(g, ctx, &ElementRef::Element { id: id.to_string() })
    }

    #[test]
    fn test_distance_buckets() {
        let g = graph();
        let ctx = ScoringContext::new(&g, &["focus".to_string()], None, &BTreeSet::new());
        assert_eq!(score(&g, &ctx, "f.py::f.focus"), 1.0);
        assert_eq!(score(&g, &ctx, "a.py::a.one"), 0.8);
        assert_eq!(score(&g, &ctx, "b.py::b.two"), 0.6);
        // distance 3 without a dependency-set entry falls through
        assert_eq!(score(&g, &ctx, "c.py::c.three"), 0.0);
        assert_eq!(score(&g, &ctx, "f.py::f.sibling"), 0.2);
        assert_eq!(score(&g, &ctx, "e.py::e.loner"), 0.0);
        assert_eq!(score(&g, &ctx, "missing"), 0.0);
    }

    #[test]
    fn test_dependency_set_bucket() {
        let g = graph();
        let deps: BTreeSet<String> = ["c.py::c.three".to_string(), "e.py::e.loner".to_string()]
            .into_iter()
            .collect();
        let ctx = ScoringContext::new(&g, &["focus".to_string()], None, &deps);
        assert_eq!(score(&g, &ctx, "c.py::c.three"), 0.4);
        assert_eq!(score(&g, &ctx, "e.py::e.loner"), 0.4);
        assert_eq!(score(&g, &ctx, "d.py::d.four"), 0.0);
    }

    #[test]
    fn test_active_file_scores_full() {
        let g = graph();
        let ctx = ScoringContext::new(&g, &["focus".to_string()], Some("e.py"), &BTreeSet::new());
        assert_eq!(score(&g, &ctx, "e.py::e.loner"), 1.0);
    }

    #[test]
    fn test_artifacts_score_by_kind() {
        let g = graph();
        let ctx = ScoringContext::default();
        let decision = ElementRef::Artifact {
            kind: ArtifactKind::Decision,
            id: "DEC-1".to_string(),
        };
        let pattern = ElementRef::Artifact {
            kind: ArtifactKind::Pattern,
            id: "repository".to_string(),
        };
        assert_eq!(RelevanceScorer::score(&g, &ctx, &decision), 0.8);
        assert_eq!(RelevanceScorer::score(&g, &ctx, &pattern), 0.6);
    }

    #[test]
    fn test_scores_always_within_bounds() {
        let g = graph();
        let ctx = ScoringContext::new(&g, &["one".to_string(), "four".to_string()], None, &BTreeSet::new());
        for element in g.elements() {
            let s = score(&g, &ctx, &element.id);
            assert!((0.0..=1.0).contains(&s), "{} scored {s}", element.id);
        }
    }

    #[test]
    fn test_no_focus_match() {
        let g = graph();
        let ctx = ScoringContext::new(&g, &["nothing_here".to_string()], None, &BTreeSet::new());
        assert!(!ctx.has_focus_matches());
        assert_eq!(score(&g, &ctx, "f.py::f.focus"), 0.0);
    }

    #[test]
    fn test_from_distance() {
        assert_eq!(Relevance::from_distance(0), Relevance::Focus);
        assert_eq!(Relevance::from_distance(5), Relevance::Dependency);
        assert_eq!(Relevance::from_distance(2).score(), 0.6);
    }
}
