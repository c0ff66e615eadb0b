//! Dependency graph over code elements.
//!
//! Nodes live in an arena addressed by index; element ids map to arena slots.
//! Edges are stored twice, as outgoing and incoming adjacency, so traversal
//! in either direction is a lookup. A graph is built once by
//! [`builder::build_graph`] and then published read-only through
//! [`snapshot::SnapshotHandle`].

pub mod builder;
pub mod snapshot;

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::errors::{CuratorError, CuratorResult};
use crate::models::{CodeElement, DependencyEdge, EdgeKind, ScanWarning};
use crate::query::guards::{clamp_depth, MAX_GRAPH_VISITED, MAX_RELATED_DEPTH, MIN_SUBSTRING_MATCH};

/// Which adjacency a traversal follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// An element reached by `find_related`, with its distance from the
/// nearest matched target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedElement {
    pub element: CodeElement,
    pub distance: usize,
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<CodeElement>,
    index: HashMap<String, usize>,
    by_name: HashMap<String, Vec<usize>>,
    by_file: BTreeMap<String, Vec<usize>>,
    outgoing: Vec<Vec<(usize, EdgeKind)>>,
    incoming: Vec<Vec<(usize, EdgeKind)>>,
    edge_set: HashSet<(usize, usize, EdgeKind)>,
    warnings: Vec<ScanWarning>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // -- construction --------------------------------------------------------

    /// Insert an element; ids must be unique within the graph.
    pub fn add_node(&mut self, element: CodeElement) -> CuratorResult<usize> {
        if self.index.contains_key(&element.id) {
            return Err(CuratorError::Index(format!(
                "Duplicate element id: {}",
                element.id
            )));
        }
        let slot = self.nodes.len();
        self.index.insert(element.id.clone(), slot);
        self.by_name.entry(element.name.clone()).or_default().push(slot);
        self.by_file
            .entry(element.file_path.clone())
            .or_default()
            .push(slot);
        self.nodes.push(element);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        Ok(slot)
    }

    /// Insert a directed edge between two existing elements.
    ///
    /// Returns `Ok(false)` for self-loops and duplicates, which are dropped.
    pub fn add_edge(&mut self, source: &str, target: &str, kind: EdgeKind) -> CuratorResult<bool> {
        let s = self.slot(source)?;
        let t = self.slot(target)?;
        Ok(self.add_edge_slots(s, t, kind))
    }

    pub(crate) fn add_edge_slots(&mut self, source: usize, target: usize, kind: EdgeKind) -> bool {
        if source == target || !self.edge_set.insert((source, target, kind)) {
            return false;
        }
        self.outgoing[source].push((target, kind));
        self.incoming[target].push((source, kind));
        true
    }

    pub(crate) fn set_warnings(&mut self, warnings: Vec<ScanWarning>) {
        self.warnings = warnings;
    }

    fn slot(&self, id: &str) -> CuratorResult<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| CuratorError::Index(format!("Edge endpoint not in graph: {id}")))
    }

    // -- lookup --------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_set.len()
    }

    pub fn warnings(&self) -> &[ScanWarning] {
        &self.warnings
    }

    pub fn node(&self, id: &str) -> Option<&CodeElement> {
        self.index.get(id).map(|&slot| &self.nodes[slot])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn elements(&self) -> impl Iterator<Item = &CodeElement> {
        self.nodes.iter()
    }

    pub(crate) fn slot_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub(crate) fn at(&self, slot: usize) -> &CodeElement {
        &self.nodes[slot]
    }

    pub(crate) fn slots_named(&self, name: &str) -> &[usize] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn slots_in_file(&self, path: &str) -> &[usize] {
        self.by_file.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn files(&self) -> impl Iterator<Item = &String> {
        self.by_file.keys()
    }

    pub fn elements_in_file(&self, path: &str) -> Vec<&CodeElement> {
        self.slots_in_file(path)
            .iter()
            .map(|&slot| &self.nodes[slot])
            .collect()
    }

    /// All edges, sorted for deterministic comparison.
    pub fn edges(&self) -> Vec<DependencyEdge> {
        let mut edges: Vec<DependencyEdge> = self
            .edge_set
            .iter()
            .map(|&(s, t, kind)| DependencyEdge {
                source: self.nodes[s].id.clone(),
                target: self.nodes[t].id.clone(),
                kind,
            })
            .collect();
        edges.sort();
        edges
    }

    pub fn outgoing(&self, id: &str) -> Vec<(&CodeElement, EdgeKind)> {
        self.adjacent(id, &self.outgoing)
    }

    pub fn incoming(&self, id: &str) -> Vec<(&CodeElement, EdgeKind)> {
        self.adjacent(id, &self.incoming)
    }

    fn adjacent<'a>(
        &'a self,
        id: &str,
        adjacency: &'a [Vec<(usize, EdgeKind)>],
    ) -> Vec<(&'a CodeElement, EdgeKind)> {
        match self.index.get(id) {
            Some(&slot) => adjacency[slot]
                .iter()
                .map(|&(other, kind)| (&self.nodes[other], kind))
                .collect(),
            None => Vec::new(),
        }
    }

    // -- traversal -----------------------------------------------------------

    /// Multi-source BFS returning the distance of every reached slot.
    ///
    /// Sources sit at distance 0. Visiting stops at `max_depth` hops or after
    /// `MAX_GRAPH_VISITED` slots, so cycles and hub nodes always terminate.
    pub(crate) fn distances_from(
        &self,
        sources: &[usize],
        max_depth: usize,
        direction: Direction,
    ) -> HashMap<usize, usize> {
        let mut visited: HashMap<usize, usize> = HashMap::new();
        let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
        for &source in sources {
            if visited.insert(source, 0).is_none() {
                queue.push_back((source, 0));
            }
        }

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let forward = matches!(direction, Direction::Outgoing | Direction::Both)
                .then(|| self.outgoing[current].iter())
                .into_iter()
                .flatten();
            let backward = matches!(direction, Direction::Incoming | Direction::Both)
                .then(|| self.incoming[current].iter())
                .into_iter()
                .flatten();
            for &(next, _) in forward.chain(backward) {
                if visited.contains_key(&next) {
                    continue;
                }
                if visited.len() >= MAX_GRAPH_VISITED {
                    return visited;
                }
                visited.insert(next, depth + 1);
                queue.push_back((next, depth + 1));
            }
        }
        visited
    }

    /// Elements within `max_depth` hops of `id` in either direction,
    /// the node itself first. Unknown ids yield an empty list.
    pub fn neighbors(&self, id: &str, max_depth: usize) -> Vec<RelatedElement> {
        self.neighbors_directed(id, max_depth, Direction::Both)
    }

    pub fn neighbors_directed(
        &self,
        id: &str,
        max_depth: usize,
        direction: Direction,
    ) -> Vec<RelatedElement> {
        let Some(slot) = self.slot_of(id) else {
            return Vec::new();
        };
        let depth = clamp_depth(max_depth, MAX_RELATED_DEPTH);
        let distances = self.distances_from(&[slot], depth, direction);
        let mut reached: Vec<(usize, usize)> = distances.into_iter().collect();
        reached.sort_by(|a, b| {
            a.1.cmp(&b.1)
                .then_with(|| self.nodes[a.0].qualified_name.cmp(&self.nodes[b.0].qualified_name))
                .then_with(|| self.nodes[a.0].id.cmp(&self.nodes[b.0].id))
        });
        reached
            .into_iter()
            .map(|(slot, distance)| RelatedElement {
                element: self.nodes[slot].clone(),
                distance,
            })
            .collect()
    }

    // -- name resolution -----------------------------------------------------

    /// Resolve a free-form target to element slots, using the first tier
    /// that matches anything: exact id or qualified name, dotted suffix,
    /// simple name, then case-insensitive substring.
    pub(crate) fn resolve_target(&self, target: &str) -> Vec<usize> {
        let target = target.trim();
        if target.is_empty() {
            return Vec::new();
        }

        if let Some(&slot) = self.index.get(target) {
            return vec![slot];
        }
        let exact: Vec<usize> = (0..self.nodes.len())
            .filter(|&s| self.nodes[s].qualified_name == target)
            .collect();
        if !exact.is_empty() {
            return exact;
        }

        if target.contains('.') {
            let suffix = format!(".{target}");
            let dotted: Vec<usize> = (0..self.nodes.len())
                .filter(|&s| self.nodes[s].qualified_name.ends_with(&suffix))
                .collect();
            if !dotted.is_empty() {
                return dotted;
            }
        }

        let named = self.slots_named(target);
        if !named.is_empty() {
            return named.to_vec();
        }

        if target.chars().count() < MIN_SUBSTRING_MATCH {
            return Vec::new();
        }
        let needle = target.to_lowercase();
        (0..self.nodes.len())
            .filter(|&s| self.nodes[s].name.to_lowercase().contains(&needle))
            .collect()
    }

    /// Matched elements plus their neighborhoods up to `max_depth`.
    ///
    /// Ordered by distance from the nearest match, then same file as a
    /// match before other files, then qualified name. A target that
    /// matches nothing yields an empty list.
    pub fn find_related(&self, target: &str, max_depth: usize) -> Vec<RelatedElement> {
        let matches = self.resolve_target(target);
        if matches.is_empty() {
            return Vec::new();
        }
        let depth = clamp_depth(max_depth, MAX_RELATED_DEPTH);
        let matched_files: HashSet<&str> = matches
            .iter()
            .map(|&s| self.nodes[s].file_path.as_str())
            .collect();
        let distances = self.distances_from(&matches, depth, Direction::Both);

        let mut reached: Vec<(usize, usize)> = distances.into_iter().collect();
        reached.sort_by(|a, b| self.related_order(a, b, &matched_files));
        reached
            .into_iter()
            .map(|(slot, distance)| RelatedElement {
                element: self.nodes[slot].clone(),
                distance,
            })
            .collect()
    }

    fn related_order(
        &self,
        a: &(usize, usize),
        b: &(usize, usize),
        matched_files: &HashSet<&str>,
    ) -> Ordering {
        let (ea, eb) = (&self.nodes[a.0], &self.nodes[b.0]);
        let same_a = matched_files.contains(ea.file_path.as_str());
        let same_b = matched_files.contains(eb.file_path.as_str());
        a.1.cmp(&b.1)
            .then_with(|| same_b.cmp(&same_a))
            .then_with(|| ea.qualified_name.cmp(&eb.qualified_name))
            .then_with(|| ea.id.cmp(&eb.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ElementKind;

    fn element(file: &str, qualified: &str, kind: ElementKind) -> CodeElement {
        let name = qualified.rsplit('.').next().unwrap().to_string();
        CodeElement {
            id: format!("{file}::{qualified}"),
            kind,
            name,
            qualified_name: qualified.to_string(),
            file_path: file.to_string(),
            start_line: 1,
            end_line: 1,
            signature: format!("def {qualified}()"),
            docstring: None,
            parameters: vec![],
            return_type: None,
            is_async: false,
            parent_id: None,
        }
    }

    fn chain_graph() -> DependencyGraph {
        // a.foo -> b.bar -> c.baz -> a.foo (cycle), plus d.qux isolated
        let mut g = DependencyGraph::new();
        g.add_node(element("a.py", "a.foo", ElementKind::Function)).unwrap();
        g.add_node(element("b.py", "b.bar", ElementKind::Function)).unwrap();
        g.add_node(element("c.py", "c.baz", ElementKind::Function)).unwrap();
        g.add_node(element("d.py", "d.qux", ElementKind::Function)).unwrap();
        g.add_edge("a.py::a.foo", "b.py::b.bar", EdgeKind::Call).unwrap();
        g.add_edge("b.py::b.bar", "c.py::c.baz", EdgeKind::Call).unwrap();
        g.add_edge("c.py::c.baz", "a.py::a.foo", EdgeKind::Call).unwrap();
        g
    }

    fn names(related: &[RelatedElement]) -> Vec<&str> {
        related.iter().map(|r| r.element.name.as_str()).collect()
    }

    #[test]
    fn test_add_node_rejects_duplicate_ids() {
        let mut g = DependencyGraph::new();
        g.add_node(element("a.py", "a.foo", ElementKind::Function)).unwrap();
        let err = g
            .add_node(element("a.py", "a.foo", ElementKind::Function))
            .err()
            .unwrap();
        assert!(matches!(err, CuratorError::Index(_)));
    }

    #[test]
    fn test_add_edge_requires_endpoints() {
        let mut g = DependencyGraph::new();
        g.add_node(element("a.py", "a.foo", ElementKind::Function)).unwrap();
        assert!(g.add_edge("a.py::a.foo", "missing", EdgeKind::Call).is_err());
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_add_edge_drops_self_loops_and_duplicates() {
        let mut g = chain_graph();
        assert!(!g.add_edge("a.py::a.foo", "a.py::a.foo", EdgeKind::Call).unwrap());
        assert!(!g.add_edge("a.py::a.foo", "b.py::b.bar", EdgeKind::Call).unwrap());
        assert!(g.add_edge("a.py::a.foo", "b.py::b.bar", EdgeKind::Reference).unwrap());
        assert_eq!(g.edge_count(), 4);
    }

    #[test]
    fn test_neighbors_depth_zero_is_node_itself() {
        let g = chain_graph();
        assert_eq!(names(&g.neighbors("a.py::a.foo", 0)), vec!["foo"]);
        assert!(g.neighbors("missing", 3).is_empty());
    }

    #[test]
    fn test_neighbors_terminates_on_cycles() {
        let g = chain_graph();
        let related = g.neighbors("a.py::a.foo", 6);
        assert_eq!(related.len(), 3);
        assert_eq!(related[0].distance, 0);
        assert!(related.iter().all(|r| r.distance <= 1));
    }

    #[test]
    fn test_neighbors_directed() {
        let g = chain_graph();
        let out = g.neighbors_directed("a.py::a.foo", 1, Direction::Outgoing);
        assert_eq!(names(&out), vec!["foo", "bar"]);
        let inc = g.neighbors_directed("a.py::a.foo", 1, Direction::Incoming);
        assert_eq!(names(&inc), vec!["foo", "baz"]);
        let two = g.neighbors_directed("a.py::a.foo", 2, Direction::Outgoing);
        assert_eq!(two.last().unwrap().distance, 2);
    }

    #[test]
    fn test_find_related_no_match_is_empty() {
        let g = chain_graph();
        assert!(g.find_related("nonexistent_symbol", 2).is_empty());
        assert!(g.find_related("", 2).is_empty());
    }

    #[test]
    fn test_find_related_orders_by_distance_then_file() {
        let mut g = DependencyGraph::new();
        g.add_node(element("a.py", "a.target", ElementKind::Function)).unwrap();
        g.add_node(element("a.py", "a.zeta", ElementKind::Function)).unwrap();
        g.add_node(element("b.py", "b.alpha", ElementKind::Function)).unwrap();
        g.add_edge("a.py::a.target", "a.py::a.zeta", EdgeKind::Call).unwrap();
        g.add_edge("a.py::a.target", "b.py::b.alpha", EdgeKind::Call).unwrap();

        let related = g.find_related("target", 1);
        assert_eq!(names(&related), vec!["target", "zeta", "alpha"]);
    }

    #[test]
    fn test_resolve_target_tiers() {
        let mut g = DependencyGraph::new();
        g.add_node(element("m.py", "m.Auth", ElementKind::Class)).unwrap();
        g.add_node(element("m.py", "m.Auth.login", ElementKind::Method)).unwrap();
        g.add_node(element("n.py", "n.login", ElementKind::Function)).unwrap();
        g.add_node(element("n.py", "n.authenticate", ElementKind::Function)).unwrap();

        assert_eq!(g.resolve_target("m.py::m.Auth.login").len(), 1);
        assert_eq!(g.resolve_target("Auth.login").len(), 1);
        assert_eq!(g.resolve_target("login").len(), 2);
        // substring tier only runs when nothing matches exactly
        let auth: Vec<&str> = g
            .resolve_target("auth")
            .into_iter()
            .map(|s| g.at(s).name.as_str())
            .collect();
        assert_eq!(auth, vec!["Auth", "authenticate"]);
        assert!(g.resolve_target("au").is_empty());
    }
}
