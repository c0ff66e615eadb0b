//! Signature slicing of named elements in a single file.

use std::path::Path;

use indexmap::IndexMap;

use crate::errors::{CuratorError, CuratorResult};
use crate::indexer::filesystem::{detect_language, normalize_project_path};
use crate::indexer::parser::parse_bytes;
use crate::indexer::symbols::extract_file;
use crate::models::CodeElement;

/// Pick the element `name` refers to: exact qualified name, then dotted
/// suffix (`Class.method`), then simple name. Ties go to source order.
fn select<'a>(elements: &'a [CodeElement], name: &str) -> Option<&'a CodeElement> {
    let suffix = format!(".{name}");
    elements
        .iter()
        .find(|e| e.qualified_name == name)
        .or_else(|| elements.iter().find(|e| e.qualified_name.ends_with(&suffix)))
        .or_else(|| elements.iter().find(|e| e.name == name))
}

/// Map each requested element name to its signature slice.
///
/// The file is re-read and re-parsed so the result reflects what is on disk
/// right now. Bodies are never included. A missing file, an unparsable file or
/// any unknown name fails the whole request with `NotFound`/`Parse`.
pub fn slice_code<S: AsRef<str>>(
    root: &Path,
    file_path: &str,
    element_names: &[S],
) -> CuratorResult<IndexMap<String, String>> {
    let relative = normalize_project_path(root, file_path);
    if Path::new(&relative).is_absolute() {
        return Err(CuratorError::NotFound(format!("file {file_path} outside project root")));
    }
    let absolute = root.join(&relative);
    if !absolute.is_file() {
        return Err(CuratorError::NotFound(format!("file {file_path}")));
    }
    let language = detect_language(&relative)
        .ok_or_else(|| CuratorError::InvalidInput(format!("{file_path} is not a Python file")))?;
    let bytes = std::fs::read(&absolute)?;
    let unit = parse_bytes(&relative, &language, bytes)?;
    let index = extract_file(&unit, "");

    let mut slices = IndexMap::new();
    let mut missing = Vec::new();
    for name in element_names {
        let name = name.as_ref().trim();
        if name.is_empty() || slices.contains_key(name) {
            continue;
        }
        match select(&index.elements, name) {
            Some(element) => {
                slices.insert(name.to_string(), element.signature_slice());
            }
            None => missing.push(name.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(CuratorError::NotFound(format!(
            "elements {} in {relative}",
            missing.join(", ")
        )));
    }
    Ok(slices)
}
