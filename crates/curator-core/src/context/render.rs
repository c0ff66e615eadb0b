//! Markdown rendering of a context index for audit and inspection.

use std::fmt::Write;

use crate::context::index::{ContextCategory, ContextIndex, ContextItem};
use crate::models::ElementRef;

const EMPTY_SECTION: &str = "_None._";

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn render_item(out: &mut String, item: &ContextItem) {
    let flag = if item.needs_reevaluation {
        " (needs re-evaluation)"
    } else {
        ""
    };
    match &item.item_ref {
        ElementRef::Element { .. } => {
            let file = item.file_path.as_deref().unwrap_or("?");
            let _ = writeln!(
                out,
                "- **{}** in `{}` [score {:.2}]{}",
                item.label, file, item.score, flag
            );
            if let Some(signature) = item.signature.as_deref() {
                let _ = writeln!(out);
                for line in signature.lines() {
                    let _ = writeln!(out, "      {line}");
                }
                let _ = writeln!(out);
            }
        }
        ElementRef::Artifact { kind, id } => {
            let _ = writeln!(
                out,
                "- {} `{}` [score {:.2}]{}",
                kind.as_str(),
                id,
                item.score,
                flag
            );
        }
    }
}

/// Render `index` with the section layout Task Scope, Affected Areas,
/// Technical Context, Assumptions, Dependencies, Change History.
pub fn render_markdown(index: &ContextIndex) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Context Index {}", index.ctx_id);
    let _ = writeln!(out);
    let _ = writeln!(out, "- Task: `{}`", index.task_id);
    let status = if index.is_archived() { "archived" } else { "active" };
    let _ = writeln!(out, "- Status: {status}");
    let focus: Vec<&str> = index.focus_areas.iter().map(String::as_str).collect();
    let _ = writeln!(out, "- Focus areas: {}", focus.join(", "));
    if let Some(active) = &index.active_file {
        let _ = writeln!(out, "- Active file: `{active}`");
    }
    let _ = writeln!(
        out,
        "- Updated: {}",
        index.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    for category in ContextCategory::ALL {
        let _ = writeln!(out);
        let _ = writeln!(out, "## {}", category.title());
        let _ = writeln!(out);
        if category == ContextCategory::AffectedArea && !index.affected_files.is_empty() {
            let files: Vec<String> = index
                .affected_files
                .iter()
                .map(|f| format!("`{f}`"))
                .collect();
            let _ = writeln!(out, "Files: {}", files.join(", "));
            let _ = writeln!(out);
        }
        let mut any = false;
        for item in index.items_in(category) {
            render_item(&mut out, item);
            any = true;
        }
        if !any {
            let _ = writeln!(out, "{EMPTY_SECTION}");
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Change History");
    let _ = writeln!(out);
    if index.history().is_empty() {
        let _ = writeln!(out, "{EMPTY_SECTION}");
        return out;
    }
    let _ = writeln!(out, "| # | When | Kind | What | Why | Impact |");
    let _ = writeln!(out, "|---|------|------|------|-----|--------|");
    for entry in index.history() {
        let kind = match entry.change_type {
            Some(change) => format!("{} ({})", entry.kind.as_str(), change),
            None => entry.kind.as_str().to_string(),
        };
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            entry.seq,
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            kind,
            escape_cell(&entry.what),
            escape_cell(&entry.why),
            entry.impact.len()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::index::HistoryKind;
    use crate::context::propagator::ChangeType;
    use crate::graph::RelatedElement;
    use crate::models::{ArtifactKind, CodeElement, ElementKind};
    use chrono::Utc;

    fn sample() -> ContextIndex {
        let now = Utc::now();
        let mut index = ContextIndex::new("TASK-1", now);
        index.focus_areas.insert("bar".to_string());
        let bar = CodeElement {
            id: "b.py::b.bar".to_string(),
            kind: ElementKind::Function,
            name: "bar".to_string(),
            qualified_name: "b.bar".to_string(),
            file_path: "b.py".to_string(),
            start_line: 1,
            end_line: 2,
            signature: "def bar()".to_string(),
            docstring: Some("Do the bar.".to_string()),
            parameters: vec![],
            return_type: None,
            is_async: false,
            parent_id: None,
        };
        index.items.push(ContextItem::from_related(
            &RelatedElement {
                element: bar,
                distance: 0,
            },
            1.0,
            now,
        ));
        index
            .items
            .push(ContextItem::artifact(ArtifactKind::Spec, "SPEC-3", 0.8, now));
        index.refresh_affected_files();
        index.record(
            HistoryKind::Change,
            Some(ChangeType::FileModified),
            "file_modified: b.py".to_string(),
            "renamed | param".to_string(),
            vec!["b.py::b.bar".to_string()],
            now,
        );
        index
    }

    #[test]
    fn test_sections_in_documented_order() {
        let text = render_markdown(&sample());
        let positions: Vec<usize> = [
            "## Task Scope",
            "## Affected Areas",
            "## Technical Context",
            "## Assumptions",
            "## Dependencies",
            "## Change History",
        ]
        .iter()
        .map(|heading| text.find(heading).unwrap())
        .collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn test_items_and_history_rendered() {
        let text = render_markdown(&sample());
        assert!(text.contains("# Context Index CTX-TASK-1"));
        assert!(text.contains("**b.bar** in `b.py` [score 1.00]"));
        assert!(text.contains("      def bar()"));
        assert!(text.contains("\"\"\"Do the bar.\"\"\""));
        assert!(text.contains("spec `SPEC-3`"));
        assert!(text.contains("Files: `b.py`"));
        assert!(text.contains("change (file_modified)"));
        assert!(text.contains("renamed \\| param"));
        assert!(text.contains("_None._"));
    }
}
