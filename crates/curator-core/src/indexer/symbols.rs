//! Structural element and reference extraction from parsed Python sources.
//!
//! Walks the tree-sitter syntax tree once per file. Every definition becomes
//! a [`CodeElement`] with a body-free signature; every free name used inside a
//! definition's own scope becomes a [`NameReference`] attributed to the
//! innermost enclosing element, and every import statement an
//! [`ImportRecord`]. Nothing in the analyzed file is executed or imported.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tree_sitter::Node;

use crate::indexer::parser::ParsedUnit;
use crate::models::{
    CodeElement, ElementKind, FileIndex, ImportRecord, NameReference, Parameter, ReferenceKind,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static STRING_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[rRuUbBfF]{0,2}").unwrap());

/// Names that are never worth an edge even when a project shadows them.
const IGNORED_NAMES: &[&str] = &[
    "self", "cls", "super", "print", "len", "range", "str", "int", "float", "bool", "dict",
    "list", "set", "tuple", "object", "type", "isinstance", "issubclass", "getattr", "setattr",
    "hasattr", "enumerate", "zip", "map", "filter", "sorted", "reversed", "min", "max", "sum",
    "any", "all", "open", "iter", "next", "repr", "id", "hash", "Exception", "ValueError",
    "TypeError", "KeyError", "RuntimeError", "NotImplementedError", "__name__", "__file__",
];

/// Convert a file path to a dotted module name.
///
/// Strips the file extension and joins path components with dots; a package
/// `__init__` file names the package itself.
pub fn to_module_name(path: &str) -> String {
    let p = Path::new(path);
    let without_ext = p.with_extension("");
    let mut parts: Vec<&str> = without_ext
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(os) => os.to_str(),
            _ => None,
        })
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if parts.len() > 1 && parts.last() == Some(&"__init__") {
        parts.pop();
    }
    parts.join(".")
}

/// Collapse runs of whitespace (including newlines) to one space.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

/// Strip quotes and common indentation from a string literal's source text.
pub fn clean_docstring(raw: &str) -> Option<String> {
    let unprefixed = STRING_PREFIX_RE.replace(raw.trim(), "");
    let body = ["\"\"\"", "'''", "\"", "'"].iter().find_map(|quote| {
        unprefixed
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
    })?;

    let lines: Vec<&str> = body.lines().collect();
    let indent = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let mut cleaned: Vec<String> = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        let leading = line.len() - line.trim_start().len();
        let cut = leading.min(indent);
        if index == 0 || !line.is_char_boundary(cut) {
            cleaned.push(line.trim().to_string());
        } else {
            cleaned.push(line[cut..].trim_end().to_string());
        }
    }
    let joined = cleaned.join("\n");
    let trimmed = joined.trim_matches('\n').trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// ---------------------------------------------------------------------------
// Extraction state
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Module,
    Class,
    Function,
}

#[derive(Clone)]
struct Scope {
    element_id: String,
    qualified_name: String,
    kind: ScopeKind,
    params: HashSet<String>,
}

struct Extractor<'a> {
    unit: &'a ParsedUnit,
    file_path: String,
    elements: Vec<CodeElement>,
    references: Vec<NameReference>,
    imports: Vec<ImportRecord>,
    id_counts: HashMap<String, usize>,
    seen_refs: HashSet<(String, String, Option<String>, ReferenceKind)>,
}

impl<'a> Extractor<'a> {
    fn new(unit: &'a ParsedUnit) -> Self {
        Self {
            unit,
            file_path: unit.path.replace('\\', "/"),
            elements: Vec::new(),
            references: Vec::new(),
            imports: Vec::new(),
            id_counts: HashMap::new(),
            seen_refs: HashSet::new(),
        }
    }

    fn text(&self, node: Node<'_>) -> &'a str {
        node.utf8_text(self.unit.source.as_bytes()).unwrap_or("")
    }

    fn make_id(&mut self, qualified_name: &str) -> String {
        let base = format!("{}::{}", self.file_path, qualified_name);
        let count = self.id_counts.entry(base.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            base
        } else {
            format!("{base}#{count}")
        }
    }

    fn record_reference(
        &mut self,
        scope: &Scope,
        name: &str,
        receiver: Option<String>,
        kind: ReferenceKind,
        node: Node<'_>,
    ) {
        if name.is_empty() || IGNORED_NAMES.contains(&name) || scope.params.contains(name) {
            return;
        }
        let key = (
            scope.element_id.clone(),
            name.to_string(),
            receiver.clone(),
            kind,
        );
        if !self.seen_refs.insert(key) {
            return;
        }
        self.references.push(NameReference {
            element_id: scope.element_id.clone(),
            name: name.to_string(),
            receiver,
            kind,
            line: node.start_position().row + 1,
        });
    }

    // -- module --------------------------------------------------------------

    fn extract_module(&mut self) {
        let root = self.unit.root();
        let module_name = to_module_name(&self.file_path);
        let name = module_name
            .rsplit('.')
            .next()
            .unwrap_or(module_name.as_str())
            .to_string();
        let id = self.make_id(&module_name);
        let docstring = self.block_docstring(root);
        self.elements.push(CodeElement {
            id: id.clone(),
            kind: ElementKind::Module,
            name,
            qualified_name: module_name.clone(),
            file_path: self.file_path.clone(),
            start_line: 1,
            end_line: (root.end_position().row + 1).max(1),
            signature: format!("module {module_name}"),
            docstring,
            parameters: Vec::new(),
            return_type: None,
            is_async: false,
            parent_id: None,
        });
        let scope = Scope {
            element_id: id,
            qualified_name: module_name,
            kind: ScopeKind::Module,
            params: HashSet::new(),
        };
        self.walk_children(root, &scope);
    }

    // -- traversal -----------------------------------------------------------

    fn walk_children(&mut self, node: Node<'a>, scope: &Scope) {
        let mut cursor = node.walk();
        let children: Vec<Node<'a>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.walk(child, scope);
        }
    }

    fn walk(&mut self, node: Node<'a>, scope: &Scope) {
        match node.kind() {
            "function_definition" => self.define_function(node, scope),
            "class_definition" => self.define_class(node, scope),
            "decorated_definition" => {
                let mut cursor = node.walk();
                let decorators: Vec<Node<'a>> = node
                    .named_children(&mut cursor)
                    .filter(|c| c.kind() == "decorator")
                    .collect();
                for decorator in decorators {
                    self.walk_children(decorator, scope);
                }
                if let Some(definition) = node.child_by_field_name("definition") {
                    self.walk(definition, scope);
                }
            }
            "import_statement" => self.record_import(node, scope),
            "import_from_statement" => self.record_from_import(node, scope),
            "future_import_statement" | "comment" => {}
            "lambda" => {
                if let Some(body) = node.child_by_field_name("body") {
                    self.walk(body, scope);
                }
            }
            "call" => self.record_call(node, scope),
            "assignment" | "augmented_assignment" | "for_statement" | "for_in_clause" => {
                self.walk_binding(node, scope)
            }
            "attribute" => {
                if let Some(object) = node.child_by_field_name("object") {
                    self.walk(object, scope);
                }
            }
            "keyword_argument" => {
                if let Some(value) = node.child_by_field_name("value") {
                    self.walk(value, scope);
                }
            }
            "identifier" => {
                let name = self.text(node);
                self.record_reference(scope, name, None, ReferenceKind::Reference, node);
            }
            _ => self.walk_children(node, scope),
        }
    }

    /// Walk a binding construct; names bound by its `left` side are not uses.
    fn walk_binding(&mut self, node: Node<'a>, scope: &Scope) {
        let target = node.child_by_field_name("left");
        let mut cursor = node.walk();
        let children: Vec<Node<'a>> = node.named_children(&mut cursor).collect();
        for child in children {
            if Some(child) == target {
                self.walk_target(child, scope);
            } else {
                self.walk(child, scope);
            }
        }
    }

    fn walk_target(&mut self, node: Node<'a>, scope: &Scope) {
        match node.kind() {
            "identifier" => {}
            "pattern_list" | "tuple_pattern" | "list_pattern" | "list_splat_pattern"
            | "parenthesized_expression" => {
                let mut cursor = node.walk();
                let children: Vec<Node<'a>> = node.named_children(&mut cursor).collect();
                for child in children {
                    self.walk_target(child, scope);
                }
            }
            // attribute and subscript targets still read their object
            _ => self.walk(node, scope),
        }
    }

    fn record_call(&mut self, node: Node<'a>, scope: &Scope) {
        if let Some(function) = node.child_by_field_name("function") {
            match function.kind() {
                "identifier" => {
                    let name = self.text(function);
                    self.record_reference(scope, name, None, ReferenceKind::Call, function);
                }
                "attribute" => {
                    let object = function.child_by_field_name("object");
                    let receiver = object
                        .filter(|o| o.kind() == "identifier")
                        .map(|o| self.text(o).to_string());
                    if let Some(attr) = function.child_by_field_name("attribute") {
                        let name = self.text(attr);
                        self.record_reference(scope, name, receiver, ReferenceKind::Call, attr);
                    }
                    if let Some(object) = object {
                        self.walk(object, scope);
                    }
                }
                _ => self.walk(function, scope),
            }
        }
        if let Some(arguments) = node.child_by_field_name("arguments") {
            self.walk_children(arguments, scope);
        }
    }

    // -- definitions ---------------------------------------------------------

    fn define_function(&mut self, node: Node<'a>, scope: &Scope) {
        let name = match node.child_by_field_name("name") {
            Some(n) => self.text(n).to_string(),
            None => return,
        };
        let kind = if scope.kind == ScopeKind::Class {
            ElementKind::Method
        } else {
            ElementKind::Function
        };
        let qualified_name = format!("{}.{}", scope.qualified_name, name);
        let id = self.make_id(&qualified_name);

        let params_node = node.child_by_field_name("parameters");
        let params_text = params_node
            .map(|p| collapse_whitespace(self.text(p)))
            .unwrap_or_else(|| "()".to_string());
        let return_node = node.child_by_field_name("return_type");
        let return_type = return_node.map(|r| collapse_whitespace(self.text(r)));
        let is_async = {
            let mut cursor = node.walk();
            let found = node.children(&mut cursor).any(|c| c.kind() == "async");
            found
        };
        let signature = format!(
            "{}def {}{}{}",
            if is_async { "async " } else { "" },
            name,
            params_text,
            return_type
                .as_deref()
                .map(|r| format!(" -> {r}"))
                .unwrap_or_default()
        );
        let parameters = params_node
            .map(|p| self.parameters(p))
            .unwrap_or_default();
        let body = node.child_by_field_name("body");
        let docstring = body.and_then(|b| self.block_docstring(b));

        self.elements.push(CodeElement {
            id: id.clone(),
            kind,
            name,
            qualified_name: qualified_name.clone(),
            file_path: self.file_path.clone(),
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
            signature,
            docstring,
            parameters: parameters.clone(),
            return_type,
            is_async,
            parent_id: Some(scope.element_id.clone()),
        });

        let inner = Scope {
            element_id: id,
            qualified_name,
            kind: ScopeKind::Function,
            params: parameters
                .iter()
                .map(|p| p.name.trim_start_matches('*').to_string())
                .collect(),
        };
        if let Some(params) = params_node {
            self.walk_parameter_expressions(params, &inner);
        }
        if let Some(ret) = return_node {
            self.walk(ret, &inner);
        }
        if let Some(body) = body {
            self.walk_children(body, &inner);
        }
    }

    fn define_class(&mut self, node: Node<'a>, scope: &Scope) {
        let name = match node.child_by_field_name("name") {
            Some(n) => self.text(n).to_string(),
            None => return,
        };
        let qualified_name = format!("{}.{}", scope.qualified_name, name);
        let id = self.make_id(&qualified_name);
        let bases = node.child_by_field_name("superclasses");
        let signature = match bases.map(|b| collapse_whitespace(self.text(b))) {
            Some(text) if !text.is_empty() => format!("class {name}{text}"),
            _ => format!("class {name}"),
        };
        let body = node.child_by_field_name("body");
        let docstring = body.and_then(|b| self.block_docstring(b));

        self.elements.push(CodeElement {
            id: id.clone(),
            kind: ElementKind::Class,
            name,
            qualified_name: qualified_name.clone(),
            file_path: self.file_path.clone(),
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
            signature,
            docstring,
            parameters: Vec::new(),
            return_type: None,
            is_async: false,
            parent_id: Some(scope.element_id.clone()),
        });

        let inner = Scope {
            element_id: id,
            qualified_name,
            kind: ScopeKind::Class,
            params: HashSet::new(),
        };
        if let Some(bases) = bases {
            self.walk_children(bases, &inner);
        }
        if let Some(body) = body {
            self.walk_children(body, &inner);
        }
    }

    /// First statement of a block (or module) when it is a bare string.
    fn block_docstring(&self, block: Node<'a>) -> Option<String> {
        let mut cursor = block.walk();
        let first = block
            .named_children(&mut cursor)
            .find(|c| c.kind() != "comment")?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let expr = first.named_child(0)?;
        if expr.kind() != "string" && expr.kind() != "concatenated_string" {
            return None;
        }
        clean_docstring(self.text(expr))
    }

    // -- parameters ----------------------------------------------------------

    fn parameters(&self, params: Node<'a>) -> Vec<Parameter> {
        let mut out = Vec::new();
        let mut cursor = params.walk();
        for child in params.named_children(&mut cursor) {
            let (name, annotation, default) = match child.kind() {
                "identifier" => (self.text(child).to_string(), None, None),
                "typed_parameter" => {
                    let name = child
                        .named_child(0)
                        .map(|n| self.text(n).to_string())
                        .unwrap_or_default();
                    let annotation = child
                        .child_by_field_name("type")
                        .map(|t| collapse_whitespace(self.text(t)));
                    (name, annotation, None)
                }
                "default_parameter" => (
                    child
                        .child_by_field_name("name")
                        .map(|n| self.text(n).to_string())
                        .unwrap_or_default(),
                    None,
                    child
                        .child_by_field_name("value")
                        .map(|v| collapse_whitespace(self.text(v))),
                ),
                "typed_default_parameter" => (
                    child
                        .child_by_field_name("name")
                        .map(|n| self.text(n).to_string())
                        .unwrap_or_default(),
                    child
                        .child_by_field_name("type")
                        .map(|t| collapse_whitespace(self.text(t))),
                    child
                        .child_by_field_name("value")
                        .map(|v| collapse_whitespace(self.text(v))),
                ),
                "list_splat_pattern" | "dictionary_splat_pattern" => {
                    (self.text(child).to_string(), None, None)
                }
                _ => continue,
            };
            if name.is_empty() {
                continue;
            }
            out.push(Parameter {
                name,
                annotation,
                default,
                position: out.len(),
            });
        }
        out
    }

    /// Annotations and default values may name other elements.
    fn walk_parameter_expressions(&mut self, params: Node<'a>, scope: &Scope) {
        let mut cursor = params.walk();
        let children: Vec<Node<'a>> = params.named_children(&mut cursor).collect();
        for child in children {
            for field in ["type", "value"] {
                if let Some(expr) = child.child_by_field_name(field) {
                    self.walk(expr, scope);
                }
            }
        }
    }

    // -- imports -------------------------------------------------------------

    fn record_import(&mut self, node: Node<'a>, scope: &Scope) {
        let mut cursor = node.walk();
        let names: Vec<Node<'a>> = node.children_by_field_name("name", &mut cursor).collect();
        for name_node in names {
            let (module, alias) = match name_node.kind() {
                "aliased_import" => (
                    name_node
                        .child_by_field_name("name")
                        .map(|n| self.text(n).to_string())
                        .unwrap_or_default(),
                    name_node
                        .child_by_field_name("alias")
                        .map(|a| self.text(a).to_string()),
                ),
                _ => (self.text(name_node).to_string(), None),
            };
            if module.is_empty() {
                continue;
            }
            let aliases = alias
                .map(|a| vec![(a, module.clone())])
                .unwrap_or_default();
            self.imports.push(ImportRecord {
                element_id: scope.element_id.clone(),
                module,
                names: Vec::new(),
                aliases,
                line: node.start_position().row + 1,
            });
        }
    }

    fn record_from_import(&mut self, node: Node<'a>, scope: &Scope) {
        let module = match node.child_by_field_name("module_name") {
            Some(m) => collapse_whitespace(self.text(m)).replace(' ', ""),
            None => return,
        };
        let mut names = Vec::new();
        let mut aliases = Vec::new();
        let mut cursor = node.walk();
        let name_nodes: Vec<Node<'a>> = node.children_by_field_name("name", &mut cursor).collect();
        for name_node in name_nodes {
            match name_node.kind() {
                "aliased_import" => {
                    let original = name_node
                        .child_by_field_name("name")
                        .map(|n| self.text(n).to_string())
                        .unwrap_or_default();
                    if let Some(alias) = name_node.child_by_field_name("alias") {
                        aliases.push((self.text(alias).to_string(), original.clone()));
                    }
                    if !original.is_empty() {
                        names.push(original);
                    }
                }
                _ => names.push(self.text(name_node).to_string()),
            }
        }
        let mut wildcard_cursor = node.walk();
        if node
            .named_children(&mut wildcard_cursor)
            .any(|c| c.kind() == "wildcard_import")
        {
            names.push("*".to_string());
        }
        self.imports.push(ImportRecord {
            element_id: scope.element_id.clone(),
            module,
            names,
            aliases,
            line: node.start_position().row + 1,
        });
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Extract elements, name references and imports from one parsed file.
///
/// Output order follows source order, so re-extracting an unchanged file
/// yields identical ids and signatures.
pub fn extract_file(unit: &ParsedUnit, content_hash: &str) -> FileIndex {
    let mut extractor = Extractor::new(unit);
    extractor.extract_module();
    FileIndex {
        path: extractor.file_path,
        content_hash: content_hash.to_string(),
        elements: extractor.elements,
        references: extractor.references,
        imports: extractor.imports,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::parser::parse_source;

    fn extract(path: &str, src: &str) -> FileIndex {
        let unit = parse_source(path, "python", src.to_string()).unwrap();
        extract_file(&unit, "hash")
    }

    fn find<'a>(index: &'a FileIndex, name: &str) -> &'a CodeElement {
        index
            .elements
            .iter()
            .find(|e| e.name == name)
            .unwrap_or_else(|| panic!("element {name} not found"))
    }

    #[test]
    fn test_to_module_name() {
        assert_eq!(to_module_name("src/pkg/engine.py"), "src.pkg.engine");
        assert_eq!(to_module_name("pkg/__init__.py"), "pkg");
        assert_eq!(to_module_name("__init__.py"), "__init__");
    }

    #[test]
    fn test_clean_docstring_variants() {
        assert_eq!(clean_docstring("\"\"\"A test class.\"\"\"").as_deref(), Some("A test class."));
        assert_eq!(clean_docstring("'single'").as_deref(), Some("single"));
        assert_eq!(clean_docstring("r'''raw'''").as_deref(), Some("raw"));
        assert_eq!(
            clean_docstring("\"\"\"Summary.\n\n        Details here.\n        \"\"\"").as_deref(),
            Some("Summary.\n\nDetails here.")
        );
        assert_eq!(clean_docstring("\"\"\"   \"\"\""), None);
    }

    #[test]
    fn test_module_element_and_docstring() {
        let index = extract("pkg/tools.py", "\"\"\"Tool helpers.\"\"\"\n\nX = 1\n");
        let module = index.module_element().unwrap();
        assert_eq!(module.id, "pkg/tools.py::pkg.tools");
        assert_eq!(module.kind, ElementKind::Module);
        assert_eq!(module.name, "tools");
        assert_eq!(module.signature, "module pkg.tools");
        assert_eq!(module.docstring.as_deref(), Some("Tool helpers."));
    }

    #[test]
    fn test_function_signature_excludes_body() {
        let src = "\
def my_function(arg1, arg2: int = 3, *args, **kwargs) -> str:
    \"\"\"A test function.\"\"\"
    total = arg1 + arg2
    return str(total)
";
        let index = extract("m.py", src);
        let func = find(&index, "my_function");
        assert_eq!(func.kind, ElementKind::Function);
        assert_eq!(
            func.signature,
            "def my_function(arg1, arg2: int = 3, *args, **kwargs) -> str"
        );
        assert!(!func.signature.contains("total"));
        assert_eq!(func.return_type.as_deref(), Some("str"));
        assert_eq!(func.docstring.as_deref(), Some("A test function."));
        assert_eq!(func.start_line, 1);
        assert_eq!(func.end_line, 4);

        let names: Vec<&str> = func.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["arg1", "arg2", "*args", "**kwargs"]);
        assert_eq!(func.parameters[1].annotation.as_deref(), Some("int"));
        assert_eq!(func.parameters[1].default.as_deref(), Some("3"));
    }

    #[test]
    fn test_multiline_parameters_are_collapsed() {
        let src = "def build(\n    task_id,\n    focus_areas,\n):\n    pass\n";
        let index = extract("m.py", src);
        assert_eq!(find(&index, "build").signature, "def build( task_id, focus_areas, )");
    }

    #[test]
    fn test_async_function() {
        let index = extract("m.py", "async def fetch(url):\n    return url\n");
        let func = find(&index, "fetch");
        assert!(func.is_async);
        assert_eq!(func.signature, "async def fetch(url)");
    }

    #[test]
    fn test_class_methods_and_nesting() {
        let src = "\
class TestClass(Base, metaclass=Meta):
    \"\"\"A test class.\"\"\"
    def method(self):
        def helper():
            pass
        return helper()
";
        let index = extract("module1.py", src);
        let class = find(&index, "TestClass");
        assert_eq!(class.kind, ElementKind::Class);
        assert_eq!(class.signature, "class TestClass(Base, metaclass=Meta)");
        assert_eq!(class.docstring.as_deref(), Some("A test class."));

        let method = find(&index, "method");
        assert_eq!(method.kind, ElementKind::Method);
        assert_eq!(method.qualified_name, "module1.TestClass.method");
        assert_eq!(method.parent_id.as_deref(), Some(class.id.as_str()));

        let helper = find(&index, "helper");
        assert_eq!(helper.kind, ElementKind::Function);
        assert_eq!(helper.qualified_name, "module1.TestClass.method.helper");
    }

    #[test]
    fn test_decorated_definitions_are_extracted() {
        let src = "\
@register
def handler(event):
    return event

class Service:
    @staticmethod
    def create():
        pass
";
        let index = extract("m.py", src);
        assert_eq!(find(&index, "handler").kind, ElementKind::Function);
        assert_eq!(find(&index, "create").kind, ElementKind::Method);
        assert!(index
            .references
            .iter()
            .any(|r| r.name == "register" && r.element_id == "m.py::m"));
    }

    #[test]
    fn test_duplicate_definitions_get_distinct_ids() {
        let src = "\
if FLAG:
    def impl():
        pass
else:
    def impl():
        pass
";
        let index = extract("m.py", src);
        let ids: Vec<&str> = index
            .elements
            .iter()
            .filter(|e| e.name == "impl")
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(ids, vec!["m.py::m.impl", "m.py::m.impl#2"]);
    }

    #[test]
    fn test_call_references_attributed_to_innermost_element() {
        let src = "def foo():\n    return bar()\n";
        let index = extract("a.py", src);
        let calls: Vec<&NameReference> = index
            .references
            .iter()
            .filter(|r| r.kind == ReferenceKind::Call)
            .collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "bar");
        assert_eq!(calls[0].element_id, "a.py::a.foo");
        assert_eq!(calls[0].line, 2);
    }

    #[test]
    fn test_method_calls_keep_receiver() {
        let src = "\
class Repo:
    def save(self):
        self.validate()
        store.write(self)
";
        let index = extract("r.py", src);
        let validate = index.references.iter().find(|r| r.name == "validate").unwrap();
        assert_eq!(validate.receiver.as_deref(), Some("self"));
        let write = index.references.iter().find(|r| r.name == "write").unwrap();
        assert_eq!(write.receiver.as_deref(), Some("store"));
        assert!(index
            .references
            .iter()
            .any(|r| r.name == "store" && r.kind == ReferenceKind::Reference));
    }

    #[test]
    fn test_parameters_and_keywords_are_not_references() {
        let src = "\
def run(config, limit=DEFAULT_LIMIT) -> Result:
    return execute(config, mode=limit)
";
        let index = extract("m.py", src);
        let names: HashSet<&str> = index.references.iter().map(|r| r.name.as_str()).collect();
        assert!(names.contains("DEFAULT_LIMIT"));
        assert!(names.contains("Result"));
        assert!(names.contains("execute"));
        assert!(!names.contains("config"));
        assert!(!names.contains("limit"));
        assert!(!names.contains("mode"));
    }

    #[test]
    fn test_binding_targets_are_not_references() {
        let src = "\
def tally(items):
    total = offset + 1
    total += step
    for entry, weight in pairs():
        record.value = entry
    return [label for label in names]
";
        let index = extract("m.py", src);
        let names: HashSet<&str> = index.references.iter().map(|r| r.name.as_str()).collect();
        for used in ["offset", "step", "pairs", "record", "names"] {
            assert!(names.contains(used), "{used} should be referenced");
        }
        assert!(!names.contains("total"));
        assert!(!names.contains("weight"));
        assert!(!names.contains("value"));
    }

    #[test]
    fn test_base_classes_are_class_references() {
        let index = extract("m.py", "class Child(Parent):\n    pass\n");
        let base = index.references.iter().find(|r| r.name == "Parent").unwrap();
        assert_eq!(base.element_id, "m.py::m.Child");
        assert_eq!(base.kind, ReferenceKind::Reference);
    }

    #[test]
    fn test_imports_recorded() {
        let src = "\
import os.path
import numpy as np
from .models import User, Group as G
from ..core import *
from pkg.sub import helper
";
        let index = extract("pkg/app/views.py", src);
        assert_eq!(index.imports.len(), 5);
        assert_eq!(index.imports[0].module, "os.path");
        assert_eq!(
            index.imports[1].aliases,
            vec![("np".to_string(), "numpy".to_string())]
        );
        assert_eq!(index.imports[2].module, ".models");
        assert_eq!(index.imports[2].names, vec!["User", "Group"]);
        assert_eq!(
            index.imports[2].aliases,
            vec![("G".to_string(), "Group".to_string())]
        );
        assert_eq!(index.imports[3].module, "..core");
        assert_eq!(index.imports[3].names, vec!["*"]);
        assert_eq!(index.imports[4].names, vec!["helper"]);
        assert!(index
            .imports
            .iter()
            .all(|i| i.element_id == "pkg/app/views.py::pkg.app.views"));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let src = "class A:\n    def f(self):\n        return g()\n\ndef g():\n    return A()\n";
        assert_eq!(extract("x.py", src), extract("x.py", src));
    }
}
