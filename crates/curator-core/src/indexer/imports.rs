//! Import resolution from per-file import records to project modules.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::indexer::filesystem::normalize_posix_path;
use crate::models::{FileIndex, ImportRecord};

/// What a local name bound by an import statement points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportTarget {
    /// A whole module, identified by its file path.
    Module { path: String },
    /// A top-level name inside a module file.
    Name { path: String, name: String },
}

impl ImportTarget {
    pub fn path(&self) -> &str {
        match self {
            ImportTarget::Module { path } | ImportTarget::Name { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    pub local: String,
    pub target: ImportTarget,
}

/// One import statement resolved against the project's own modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImport {
    /// Element containing the import statement.
    pub element_id: String,
    pub line: usize,
    /// Targets the statement depends on directly.
    pub targets: Vec<ImportTarget>,
    /// Local names the statement introduces.
    pub bindings: Vec<ImportBinding>,
    /// Modules pulled in with `from m import *`.
    pub wildcard: Vec<String>,
}

/// Lookup of every analyzed module by file path and dotted name.
#[derive(Debug, Default)]
pub struct ModuleTable {
    by_path: BTreeMap<String, String>,
    by_name: HashMap<String, Vec<String>>,
}

impl ModuleTable {
    pub fn from_files<'a, I>(files: I) -> Self
    where
        I: IntoIterator<Item = &'a FileIndex>,
    {
        let mut table = ModuleTable::default();
        for file in files {
            let module_name = file
                .module_element()
                .map(|m| m.qualified_name.clone())
                .unwrap_or_default();
            table
                .by_name
                .entry(module_name.clone())
                .or_default()
                .push(file.path.clone());
            table.by_path.insert(file.path.clone(), module_name);
        }
        for paths in table.by_name.values_mut() {
            paths.sort();
        }
        table
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }

    pub fn module_name(&self, path: &str) -> Option<&str> {
        self.by_path.get(path).map(String::as_str)
    }

    /// Dotted-name lookup, falling back to a unique suffix match so that
    /// `core.engine` finds `src/core/engine.py` in a `src/` layout.
    fn find_by_name(&self, dotted: &str) -> Option<String> {
        if let Some(paths) = self.by_name.get(dotted) {
            return paths.first().cloned();
        }
        let suffix = format!(".{dotted}");
        let mut matches = self
            .by_name
            .iter()
            .filter(|(name, _)| name.ends_with(&suffix))
            .flat_map(|(_, paths)| paths.iter());
        let first = matches.next()?;
        if matches.next().is_some() {
            return None;
        }
        Some(first.clone())
    }
}

/// Resolve a module as written in `source_path` to a project file path.
pub fn resolve_python(source_path: &str, module_name: &str, table: &ModuleTable) -> Option<String> {
    if module_name.is_empty() {
        return None;
    }
    if module_name.starts_with('.') {
        let levels = module_name.chars().take_while(|&c| c == '.').count();
        let suffix = &module_name[levels..];
        let source_dir = Path::new(source_path).parent().unwrap_or(Path::new(""));
        let mut base_dir = source_dir.to_path_buf();
        for _ in 0..levels.saturating_sub(1) {
            base_dir = base_dir.parent().unwrap_or(Path::new("")).to_path_buf();
        }
        let base_dir = base_dir.to_string_lossy().replace('\\', "/");
        let base = if suffix.is_empty() {
            base_dir
        } else if base_dir.is_empty() {
            suffix.replace('.', "/")
        } else {
            format!("{base_dir}/{}", suffix.replace('.', "/"))
        };
        return file_candidates(&normalize_posix_path(&base), table);
    }
    file_candidates(&module_name.replace('.', "/"), table).or_else(|| table.find_by_name(module_name))
}

fn file_candidates(base: &str, table: &ModuleTable) -> Option<String> {
    let candidates = if base.is_empty() {
        vec!["__init__.py".to_string(), "__init__.pyi".to_string()]
    } else {
        vec![
            format!("{base}.py"),
            format!("{base}/__init__.py"),
            format!("{base}.pyi"),
            format!("{base}/__init__.pyi"),
        ]
    };
    candidates.into_iter().find(|c| table.contains_path(c))
}

fn join_module(module: &str, name: &str) -> String {
    if module.ends_with('.') {
        format!("{module}{name}")
    } else {
        format!("{module}.{name}")
    }
}

fn resolve_record(
    source_path: &str,
    record: &ImportRecord,
    table: &ModuleTable,
) -> Option<ResolvedImport> {
    let mut resolved = ResolvedImport {
        element_id: record.element_id.clone(),
        line: record.line,
        targets: Vec::new(),
        bindings: Vec::new(),
        wildcard: Vec::new(),
    };

    if record.names.is_empty() {
        // `import a.b [as c]`
        let path = resolve_python(source_path, &record.module, table)?;
        resolved.targets.push(ImportTarget::Module { path: path.clone() });
        match record.aliases.first() {
            Some((alias, _)) => resolved.bindings.push(ImportBinding {
                local: alias.clone(),
                target: ImportTarget::Module { path },
            }),
            None => {
                let head = record.module.split('.').next().unwrap_or_default();
                let head_path = resolve_python(source_path, head, table).unwrap_or(path);
                resolved.bindings.push(ImportBinding {
                    local: head.to_string(),
                    target: ImportTarget::Module { path: head_path },
                });
            }
        }
        return Some(resolved);
    }

    // `from m import a, b as c` where each name may itself be a submodule.
    let module_path = resolve_python(source_path, &record.module, table);
    for name in &record.names {
        if name == "*" {
            if let Some(path) = &module_path {
                resolved.targets.push(ImportTarget::Module { path: path.clone() });
                resolved.wildcard.push(path.clone());
            }
            continue;
        }
        let local = record
            .aliases
            .iter()
            .find(|(_, original)| original == name)
            .map(|(alias, _)| alias.clone())
            .unwrap_or_else(|| name.clone());
        let target = match resolve_python(source_path, &join_module(&record.module, name), table) {
            Some(path) => ImportTarget::Module { path },
            None => match &module_path {
                Some(path) => ImportTarget::Name {
                    path: path.clone(),
                    name: name.clone(),
                },
                None => continue,
            },
        };
        resolved.targets.push(target.clone());
        resolved.bindings.push(ImportBinding { local, target });
    }
    if resolved.targets.is_empty() {
        return None;
    }
    Some(resolved)
}

/// Resolve every import of `file`; unresolved (external) modules are returned
/// separately by name.
pub fn resolve_imports(file: &FileIndex, table: &ModuleTable) -> (Vec<ResolvedImport>, Vec<String>) {
    let mut resolved = Vec::new();
    let mut external = Vec::new();
    for record in &file.imports {
        match resolve_record(&file.path, record, table) {
            Some(r) => resolved.push(r),
            None => external.push(record.module.clone()),
        }
    }
    (resolved, external)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CodeElement, ElementKind};

    fn file(path: &str, module: &str, imports: Vec<ImportRecord>) -> FileIndex {
        FileIndex {
            path: path.to_string(),
            content_hash: String::new(),
            elements: vec![CodeElement {
                id: format!("{path}::{module}"),
                kind: ElementKind::Module,
                name: module.rsplit('.').next().unwrap().to_string(),
                qualified_name: module.to_string(),
                file_path: path.to_string(),
                start_line: 1,
                end_line: 1,
                signature: format!("module {module}"),
                docstring: None,
                parameters: vec![],
                return_type: None,
                is_async: false,
                parent_id: None,
            }],
            references: vec![],
            imports,
        }
    }

    fn record(module: &str, names: &[&str], aliases: &[(&str, &str)]) -> ImportRecord {
        ImportRecord {
            element_id: "importer".to_string(),
            module: module.to_string(),
            names: names.iter().map(|n| n.to_string()).collect(),
            aliases: aliases
                .iter()
                .map(|(a, o)| (a.to_string(), o.to_string()))
                .collect(),
            line: 1,
        }
    }

    fn table() -> ModuleTable {
        let files = vec![
            file("pkg/__init__.py", "pkg", vec![]),
            file("pkg/models.py", "pkg.models", vec![]),
            file("pkg/sub/views.py", "pkg.sub.views", vec![]),
            file("src/core/engine.py", "src.core.engine", vec![]),
        ];
        ModuleTable::from_files(files.iter())
    }

    #[test]
    fn test_resolve_absolute_and_package() {
        let table = table();
        assert_eq!(
            resolve_python("x.py", "pkg.models", &table).as_deref(),
            Some("pkg/models.py")
        );
        assert_eq!(
            resolve_python("x.py", "pkg", &table).as_deref(),
            Some("pkg/__init__.py")
        );
        assert_eq!(resolve_python("x.py", "numpy", &table), None);
    }

    #[test]
    fn test_resolve_relative() {
        let table = table();
        assert_eq!(
            resolve_python("pkg/sub/views.py", "..models", &table).as_deref(),
            Some("pkg/models.py")
        );
        assert_eq!(
            resolve_python("pkg/models.py", ".", &table).as_deref(),
            Some("pkg/__init__.py")
        );
    }

    #[test]
    fn test_resolve_unique_suffix() {
        let table = table();
        assert_eq!(
            resolve_python("src/app.py", "core.engine", &table).as_deref(),
            Some("src/core/engine.py")
        );
    }

    #[test]
    fn test_from_import_names_and_submodules() {
        let table = table();
        let importer = file(
            "pkg/sub/views.py",
            "pkg.sub.views",
            vec![record("pkg", &["models", "helper"], &[("h", "helper")])],
        );
        let (resolved, external) = resolve_imports(&importer, &table);
        assert!(external.is_empty());
        let bindings = &resolved[0].bindings;
        assert_eq!(bindings[0].local, "models");
        assert_eq!(
            bindings[0].target,
            ImportTarget::Module {
                path: "pkg/models.py".to_string()
            }
        );
        assert_eq!(bindings[1].local, "h");
        assert_eq!(
            bindings[1].target,
            ImportTarget::Name {
                path: "pkg/__init__.py".to_string(),
                name: "helper".to_string()
            }
        );
    }

    #[test]
    fn test_plain_import_binds_head_or_alias() {
        let table = table();
        let importer = file(
            "main.py",
            "main",
            vec![
                record("pkg.models", &[], &[]),
                record("pkg.models", &[], &[("m", "pkg.models")]),
                record("requests", &[], &[]),
            ],
        );
        let (resolved, external) = resolve_imports(&importer, &table);
        assert_eq!(external, vec!["requests"]);
        assert_eq!(resolved[0].bindings[0].local, "pkg");
        assert_eq!(resolved[0].bindings[0].target.path(), "pkg/__init__.py");
        assert_eq!(resolved[0].targets[0].path(), "pkg/models.py");
        assert_eq!(resolved[1].bindings[0].local, "m");
        assert_eq!(resolved[1].bindings[0].target.path(), "pkg/models.py");
    }

    #[test]
    fn test_wildcard_import() {
        let table = table();
        let importer = file("main.py", "main", vec![record("pkg.models", &["*"], &[])]);
        let (resolved, _) = resolve_imports(&importer, &table);
        assert_eq!(resolved[0].wildcard, vec!["pkg/models.py"]);
        assert!(resolved[0].bindings.is_empty());
    }
}
