//! Shared typed models used across indexing, graph, and context layers.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Code elements
// ---------------------------------------------------------------------------

/// Structural kind of a [`CodeElement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Module,
    Class,
    Function,
    Method,
}

impl ElementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::Module => "module",
            ElementKind::Class => "class",
            ElementKind::Function => "function",
            ElementKind::Method => "method",
        }
    }

    /// Whether a call-like reference may target this kind.
    pub fn is_callable(self) -> bool {
        match self {
            ElementKind::Class | ElementKind::Function | ElementKind::Method => true,
            ElementKind::Module => false,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single parameter of a function or method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub annotation: Option<String>,
    pub default: Option<String>,
    pub position: usize,
}

/// A named structural unit: module, class, function or method.
///
/// `signature` never contains body statements; the docstring is kept apart
/// and only its first line is ever appended (see [`CodeElement::signature_slice`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeElement {
    /// `"{file_path}::{qualified_name}"`, unique within a snapshot.
    pub id: String,
    pub kind: ElementKind,
    pub name: String,
    pub qualified_name: String,
    /// Project-relative, `/`-separated.
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub signature: String,
    pub docstring: Option<String>,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<String>,
    pub is_async: bool,
    pub parent_id: Option<String>,
}

impl CodeElement {
    /// Signature plus the first docstring line, never the body.
    pub fn signature_slice(&self) -> String {
        let mut parts = vec![self.signature.clone()];
        if let Some(first) = self
            .docstring
            .as_deref()
            .and_then(|doc| doc.lines().map(str::trim).find(|l| !l.is_empty()))
        {
            parts.push(format!("    \"\"\"{first}\"\"\""));
        }
        parts.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Import,
    Call,
    Reference,
}

impl EdgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::Import => "import",
            EdgeKind::Call => "call",
            EdgeKind::Reference => "reference",
        }
    }
}

/// A static reference from one element to another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
}

// ---------------------------------------------------------------------------
// Raw per-file extraction output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Call,
    Reference,
}

/// An unresolved name used inside an element's own scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameReference {
    /// Innermost enclosing element.
    pub element_id: String,
    pub name: String,
    /// `obj` in `obj.name(...)`.
    pub receiver: Option<String>,
    pub kind: ReferenceKind,
    pub line: usize,
}

/// One `import` / `from ... import` statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub element_id: String,
    /// Module text as written, leading dots included for relative imports.
    pub module: String,
    /// Names pulled in by `from module import a, b`; empty for `import module`.
    pub names: Vec<String>,
    /// Local aliases (`import x as y`, `from m import a as b`) mapped to the original.
    pub aliases: Vec<(String, String)>,
    pub line: usize,
}

/// Everything extracted from a single source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIndex {
    pub path: String,
    pub content_hash: String,
    pub elements: Vec<CodeElement>,
    pub references: Vec<NameReference>,
    pub imports: Vec<ImportRecord>,
}

impl FileIndex {
    pub fn module_element(&self) -> Option<&CodeElement> {
        self.elements.iter().find(|e| e.kind == ElementKind::Module)
    }
}

/// A file skipped during a scan, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    pub path: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Context item references
// ---------------------------------------------------------------------------

/// Kind of an external artifact linked into a context index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Decision,
    Spec,
    Pattern,
    Assumption,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Decision => "decision",
            ArtifactKind::Spec => "spec",
            ArtifactKind::Pattern => "pattern",
            ArtifactKind::Assumption => "assumption",
        }
    }
}

/// What a context item points at: a code element in the current snapshot
/// or an opaque artifact id the engine never interprets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementRef {
    Element { id: String },
    Artifact { kind: ArtifactKind, id: String },
}

impl ElementRef {
    pub fn id(&self) -> &str {
        match self {
            ElementRef::Element { id } | ElementRef::Artifact { id, .. } => id,
        }
    }

    pub fn element_id(&self) -> Option<&str> {
        match self {
            ElementRef::Element { id } => Some(id),
            ElementRef::Artifact { .. } => None,
        }
    }
}

/// Counts reported by `get_project_structure`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStructure {
    pub files_analyzed: usize,
    pub modules: usize,
    pub classes: usize,
    pub functions: usize,
    pub methods: usize,
    pub total_elements: usize,
    pub edges: usize,
    pub parse_warnings: usize,
}
