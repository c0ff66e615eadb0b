//! Graph construction from per-file extraction output.
//!
//! This is the barrier step of a scan: it runs only once every file's
//! elements are known, because references in one file resolve against
//! definitions in all the others.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::errors::CuratorResult;
use crate::graph::DependencyGraph;
use crate::indexer::imports::{resolve_imports, ImportTarget, ModuleTable};
use crate::models::{EdgeKind, ElementKind, FileIndex, NameReference, ReferenceKind, ScanWarning};
use crate::query::guards::MAX_AMBIGUOUS_TARGETS;

/// Slot lookups shared by every file during edge resolution.
struct Lookup {
    /// Module element slot per file path.
    modules: HashMap<String, usize>,
    /// Top-level definitions per file path, by simple name.
    top_level: HashMap<String, HashMap<String, Vec<usize>>>,
    /// Direct children per parent element id.
    children: HashMap<String, Vec<usize>>,
}

impl Lookup {
    fn new(graph: &DependencyGraph, files: &[Arc<FileIndex>]) -> Self {
        let mut lookup = Lookup {
            modules: HashMap::new(),
            top_level: HashMap::new(),
            children: HashMap::new(),
        };
        for file in files {
            let module_id = file.module_element().map(|m| m.id.as_str());
            for element in &file.elements {
                let Some(slot) = graph.slot_of(&element.id) else {
                    continue;
                };
                if element.kind == ElementKind::Module {
                    lookup.modules.insert(file.path.clone(), slot);
                }
                if let Some(parent) = &element.parent_id {
                    lookup.children.entry(parent.clone()).or_default().push(slot);
                    if Some(parent.as_str()) == module_id {
                        lookup
                            .top_level
                            .entry(file.path.clone())
                            .or_default()
                            .entry(element.name.clone())
                            .or_default()
                            .push(slot);
                    }
                }
            }
        }
        lookup
    }

    fn top_level(&self, path: &str, name: &str) -> Vec<usize> {
        self.top_level
            .get(path)
            .and_then(|names| names.get(name))
            .cloned()
            .unwrap_or_default()
    }

    fn members(&self, graph: &DependencyGraph, class_slot: usize, name: &str) -> Vec<usize> {
        self.children
            .get(&graph.at(class_slot).id)
            .map(|slots| {
                slots
                    .iter()
                    .copied()
                    .filter(|&s| graph.at(s).name == name)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn target_slots(&self, target: &ImportTarget) -> Vec<usize> {
        match target {
            ImportTarget::Module { path } => self.modules.get(path).copied().into_iter().collect(),
            ImportTarget::Name { path, name } => {
                let found = self.top_level(path, name);
                if found.is_empty() {
                    self.modules.get(path).copied().into_iter().collect()
                } else {
                    found
                }
            }
        }
    }
}

/// Names an individual file can see through its imports.
#[derive(Default)]
struct FileScope {
    /// Local name → slots it was bound to.
    bindings: HashMap<String, Vec<usize>>,
    /// Local name → module path, for `alias.name(...)` resolution.
    module_aliases: HashMap<String, String>,
    /// Modules whose top-level names are visible (`import m`, `from m import *`).
    modules: Vec<String>,
}

fn enclosing_class(graph: &DependencyGraph, slot: usize) -> Option<usize> {
    let mut current = graph.at(slot).parent_id.clone();
    while let Some(id) = current {
        let parent = graph.slot_of(&id)?;
        if graph.at(parent).kind == ElementKind::Class {
            return Some(parent);
        }
        current = graph.at(parent).parent_id.clone();
    }
    None
}

fn fits(graph: &DependencyGraph, slot: usize, kind: ReferenceKind) -> bool {
    match kind {
        ReferenceKind::Call => graph.at(slot).kind.is_callable(),
        ReferenceKind::Reference => true,
    }
}

fn keep_fitting(graph: &DependencyGraph, slots: Vec<usize>, kind: ReferenceKind) -> Vec<usize> {
    slots.into_iter().filter(|&s| fits(graph, s, kind)).collect()
}

/// Resolve one name reference through the candidate cascade: receiver
/// hints, same file, imported names, imported modules, then project-wide
/// when the name is not too ambiguous.
fn resolve_reference(
    graph: &DependencyGraph,
    lookup: &Lookup,
    scope: &FileScope,
    file_path: &str,
    source: usize,
    reference: &NameReference,
) -> Vec<usize> {
    let name = reference.name.as_str();
    let kind = reference.kind;

    if let Some(receiver) = reference.receiver.as_deref() {
        let hinted = match receiver {
            "self" | "cls" => enclosing_class(graph, source)
                .map(|class| lookup.members(graph, class, name))
                .unwrap_or_default(),
            other => {
                if let Some(path) = scope.module_aliases.get(other) {
                    lookup.top_level(path, name)
                } else {
                    let classes: Vec<usize> = scope
                        .bindings
                        .get(other)
                        .cloned()
                        .unwrap_or_else(|| lookup.top_level(file_path, other))
                        .into_iter()
                        .filter(|&s| graph.at(s).kind == ElementKind::Class)
                        .collect();
                    classes
                        .into_iter()
                        .flat_map(|class| lookup.members(graph, class, name))
                        .collect()
                }
            }
        };
        let hinted = keep_fitting(graph, hinted, kind);
        if !hinted.is_empty() {
            return hinted;
        }
    } else {
        let same_file: Vec<usize> = graph
            .slots_in_file(file_path)
            .iter()
            .copied()
            .filter(|&s| {
                let element = graph.at(s);
                element.name == name
                    && !matches!(element.kind, ElementKind::Module | ElementKind::Method)
            })
            .collect();
        let same_file = keep_fitting(graph, same_file, kind);
        if !same_file.is_empty() {
            return same_file;
        }

        if let Some(bound) = scope.bindings.get(name) {
            let bound = keep_fitting(graph, bound.clone(), kind);
            if !bound.is_empty() {
                return bound;
            }
        }
    }

    let imported: Vec<usize> = scope
        .modules
        .iter()
        .flat_map(|path| lookup.top_level(path, name))
        .collect();
    let imported = keep_fitting(graph, imported, kind);
    if !imported.is_empty() {
        return imported;
    }

    // A bare name never reaches a method without a receiver.
    let global: Vec<usize> = graph
        .slots_named(name)
        .iter()
        .copied()
        .filter(|&s| reference.receiver.is_some() || graph.at(s).kind != ElementKind::Method)
        .collect();
    let global = keep_fitting(graph, global, kind);
    if global.len() <= MAX_AMBIGUOUS_TARGETS {
        global
    } else {
        Vec::new()
    }
}

/// Build the dependency graph for one snapshot.
///
/// `files` must be sorted by path; node and edge insertion order follows it,
/// which keeps traversal output deterministic.
pub fn build_graph(
    files: &[Arc<FileIndex>],
    warnings: Vec<ScanWarning>,
) -> CuratorResult<DependencyGraph> {
    let mut graph = DependencyGraph::new();
    for file in files {
        for element in &file.elements {
            graph.add_node(element.clone())?;
        }
    }
    graph.set_warnings(warnings);

    let table = ModuleTable::from_files(files.iter().map(|f| f.as_ref()));
    let lookup = Lookup::new(&graph, files);
    let mut external = 0usize;

    for file in files {
        let (resolved, unresolved) = resolve_imports(file, &table);
        external += unresolved.len();

        let mut scope = FileScope::default();
        for import in &resolved {
            let source = graph.slot_of(&import.element_id);
            for target in &import.targets {
                for slot in lookup.target_slots(target) {
                    if let Some(source) = source {
                        graph.add_edge_slots(source, slot, EdgeKind::Import);
                    }
                }
            }
            for binding in &import.bindings {
                if let ImportTarget::Module { path } = &binding.target {
                    scope
                        .module_aliases
                        .insert(binding.local.clone(), path.clone());
                    scope.modules.push(path.clone());
                }
                scope
                    .bindings
                    .entry(binding.local.clone())
                    .or_default()
                    .extend(lookup.target_slots(&binding.target));
            }
            scope.modules.extend(import.wildcard.iter().cloned());
        }
        scope.modules.sort();
        scope.modules.dedup();

        for reference in &file.references {
            let Some(source) = graph.slot_of(&reference.element_id) else {
                continue;
            };
            let edge_kind = match reference.kind {
                ReferenceKind::Call => EdgeKind::Call,
                ReferenceKind::Reference => EdgeKind::Reference,
            };
            for target in resolve_reference(&graph, &lookup, &scope, &file.path, source, reference)
            {
                graph.add_edge_slots(source, target, edge_kind);
            }
        }
    }

    debug!(
        nodes = graph.len(),
        edges = graph.edge_count(),
        external_imports = external,
        "dependency graph built"
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::parser::parse_source;
    use crate::indexer::symbols::extract_file;
    use crate::models::DependencyEdge;

    fn files(sources: &[(&str, &str)]) -> Vec<Arc<FileIndex>> {
        let mut out: Vec<Arc<FileIndex>> = sources
            .iter()
            .map(|(path, src)| {
                let unit = parse_source(path, "python", src.to_string()).unwrap();
                Arc::new(extract_file(&unit, "h"))
            })
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }

    fn has_edge(graph: &DependencyGraph, source: &str, target: &str, kind: EdgeKind) -> bool {
        graph.edges().contains(&DependencyEdge {
            source: source.to_string(),
            target: target.to_string(),
            kind,
        })
    }

    #[test]
    fn test_cross_file_call_resolves_globally() {
        let graph = build_graph(
            &files(&[
                ("a.py", "def foo():\n    return bar()\n"),
                ("b.py", "def bar():\n    pass\n"),
            ]),
            vec![],
        )
        .unwrap();
        assert!(has_edge(&graph, "a.py::a.foo", "b.py::b.bar", EdgeKind::Call));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_import_edges_and_bound_names() {
        let graph = build_graph(
            &files(&[
                ("pkg/__init__.py", ""),
                ("pkg/models.py", "class User:\n    def save(self):\n        pass\n"),
                (
                    "pkg/views.py",
                    "from .models import User\n\ndef show():\n    return User()\n",
                ),
            ]),
            vec![],
        )
        .unwrap();
        assert!(has_edge(
            &graph,
            "pkg/views.py::pkg.views",
            "pkg/models.py::pkg.models.User",
            EdgeKind::Import
        ));
        assert!(has_edge(
            &graph,
            "pkg/views.py::pkg.views.show",
            "pkg/models.py::pkg.models.User",
            EdgeKind::Call
        ));
    }

    #[test]
    fn test_module_alias_receiver() {
        let graph = build_graph(
            &files(&[
                ("util.py", "def helper():\n    pass\n"),
                ("other.py", "def helper():\n    pass\n"),
                (
                    "main.py",
                    "import util as u\n\ndef run():\n    u.helper()\n",
                ),
            ]),
            vec![],
        )
        .unwrap();
        assert!(has_edge(&graph, "main.py::main", "util.py::util", EdgeKind::Import));
        assert!(has_edge(&graph, "main.py::main.run", "util.py::util.helper", EdgeKind::Call));
        assert!(!has_edge(&graph, "main.py::main.run", "other.py::other.helper", EdgeKind::Call));
    }

    #[test]
    fn test_self_calls_prefer_enclosing_class() {
        let graph = build_graph(
            &files(&[
                (
                    "svc.py",
                    "class A:\n    def run(self):\n        self.check()\n    def check(self):\n        pass\n\nclass B:\n    def check(self):\n        pass\n",
                ),
            ]),
            vec![],
        )
        .unwrap();
        assert!(has_edge(&graph, "svc.py::svc.A.run", "svc.py::svc.A.check", EdgeKind::Call));
        assert!(!has_edge(&graph, "svc.py::svc.A.run", "svc.py::svc.B.check", EdgeKind::Call));
    }

    #[test]
    fn test_recursion_is_not_an_edge() {
        let graph = build_graph(
            &files(&[("r.py", "def fact(n):\n    return n * fact(n - 1)\n")]),
            vec![],
        )
        .unwrap();
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_ambiguous_names_are_not_linked_globally() {
        let mut sources: Vec<(String, String)> = (0..=MAX_AMBIGUOUS_TARGETS)
            .map(|i| (format!("m{i}.py"), "def run():\n    pass\n".to_string()))
            .collect();
        sources.push(("caller.py".to_string(), "def go():\n    run()\n".to_string()));
        let refs: Vec<(&str, &str)> = sources
            .iter()
            .map(|(p, s)| (p.as_str(), s.as_str()))
            .collect();
        let graph = build_graph(&files(&refs), vec![]).unwrap();
        assert_eq!(graph.outgoing("caller.py::caller.go").len(), 0);
    }

    #[test]
    fn test_base_class_reference_edge() {
        let graph = build_graph(
            &files(&[("m.py", "class Base:\n    pass\n\nclass Child(Base):\n    pass\n")]),
            vec![],
        )
        .unwrap();
        assert!(has_edge(&graph, "m.py::m.Child", "m.py::m.Base", EdgeKind::Reference));
    }

    #[test]
    fn test_build_is_deterministic() {
        let input = files(&[
            ("a.py", "from b import bar\n\ndef foo():\n    return bar()\n"),
            ("b.py", "def bar():\n    return baz()\n\ndef baz():\n    pass\n"),
        ]);
        let first = build_graph(&input, vec![]).unwrap();
        let second = build_graph(&input, vec![]).unwrap();
        assert_eq!(first.edges(), second.edges());
        let ids: Vec<&str> = first.elements().map(|e| e.id.as_str()).collect();
        let ids2: Vec<&str> = second.elements().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ids2);
    }
}
