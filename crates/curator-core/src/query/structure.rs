//! Project structure counts and the textual structure map.

use crate::graph::DependencyGraph;
use crate::models::{CodeElement, ElementKind, ProjectStructure};

/// Count files, element kinds, edges and parse warnings of a snapshot.
pub fn project_structure(graph: &DependencyGraph) -> ProjectStructure {
    let mut counts = ProjectStructure {
        files_analyzed: graph.files().count(),
        edges: graph.edge_count(),
        parse_warnings: graph.warnings().len(),
        ..ProjectStructure::default()
    };
    for element in graph.elements() {
        counts.total_elements += 1;
        match element.kind {
            ElementKind::Module => counts.modules += 1,
            ElementKind::Class => counts.classes += 1,
            ElementKind::Function => counts.functions += 1,
            ElementKind::Method => counts.methods += 1,
        }
    }
    counts
}

fn matches_prefix(file_path: &str, prefix: &str) -> bool {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        return true;
    }
    file_path == trimmed
        || file_path
            .strip_prefix(trimmed)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn nesting(graph: &DependencyGraph, element: &CodeElement) -> usize {
    let mut depth = 0;
    let mut parent = element.parent_id.as_deref();
    while let Some(id) = parent {
        match graph.node(id) {
            Some(node) if node.kind != ElementKind::Module => {
                depth += 1;
                parent = node.parent_id.as_deref();
            }
            _ => break,
        }
    }
    depth
}

/// Render files under `path_prefix` and their elements as an outline.
///
/// Files are listed in path order; elements follow source order and are
/// indented under their enclosing class or function. An empty prefix or `.`
/// selects the whole project.
pub fn structure_map(graph: &DependencyGraph, path_prefix: &str, include_signatures: bool) -> String {
    let mut lines: Vec<String> = Vec::new();
    for file_path in graph.files().filter(|f| matches_prefix(f, path_prefix)) {
        lines.push(file_path.clone());
        let mut elements = graph.elements_in_file(file_path);
        elements.sort_by(|a, b| a.start_line.cmp(&b.start_line).then_with(|| a.id.cmp(&b.id)));
        for element in elements {
            if element.kind == ElementKind::Module {
                continue;
            }
            let indent = "  ".repeat(nesting(graph, element) + 1);
            let detail = if include_signatures && !element.signature.is_empty() {
                element.signature.clone()
            } else {
                format!("{} {}", element.kind, element.name)
            };
            lines.push(format!("{indent}{detail}  [line:{}]", element.start_line));
        }
    }
    lines.join("\n")
}
