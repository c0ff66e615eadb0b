//! Language parsing wrapper used by extraction passes.
//!
//! Python sources are parsed with the native tree-sitter grammar. The parser
//! is error tolerant, so a tree containing ERROR or MISSING nodes is reported
//! as a parse failure instead of being indexed half-way.

use tree_sitter::{Node, Parser, Tree};

use crate::errors::{CuratorError, CuratorResult};

const SUPPORTED_LANGUAGES: &[&str] = &["python"];

/// Parsed source unit holding the tree alongside the text it points into.
pub struct ParsedUnit {
    pub path: String,
    pub language: String,
    pub source: String,
    pub tree: Tree,
}

impl ParsedUnit {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn text(&self, node: Node<'_>) -> &str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }
}

pub fn is_supported(language: &str) -> bool {
    SUPPORTED_LANGUAGES.contains(&language)
}

/// Parse `source` as `language`, rejecting trees with syntax errors.
pub fn parse_source(path: &str, language: &str, source: String) -> CuratorResult<ParsedUnit> {
    if !is_supported(language) {
        return Err(CuratorError::Parse(format!(
            "Unsupported language for {path}: {language}"
        )));
    }

    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| CuratorError::Parse(format!("Failed to set language: {e}")))?;

    let tree = parser
        .parse(source.as_bytes(), None)
        .ok_or_else(|| CuratorError::Parse(format!("Failed to parse {path}")))?;

    if tree.root_node().has_error() {
        let line = first_error_line(tree.root_node()).unwrap_or(1);
        return Err(CuratorError::Parse(format!(
            "Syntax error in {path} near line {line}"
        )));
    }

    Ok(ParsedUnit {
        path: path.to_string(),
        language: language.to_string(),
        source,
        tree,
    })
}

/// Decode raw bytes and parse them; non-UTF-8 input is a parse failure.
pub fn parse_bytes(path: &str, language: &str, bytes: Vec<u8>) -> CuratorResult<ParsedUnit> {
    let source = String::from_utf8(bytes)
        .map_err(|_| CuratorError::Parse(format!("{path} is not valid UTF-8")))?;
    parse_source(path, language, source)
}

fn first_error_line(node: Node<'_>) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row + 1);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            if let Some(line) = first_error_line(child) {
                return Some(line);
            }
        }
    }
    None
}
