//! Symbol and call-graph extraction for the JS/TS family.
//!
//! Parses with the tolerant tree-sitter grammars (TypeScript, TSX,
//! JavaScript) and emits:
//!
//! - a **file** entity per path,
//! - **class** / **method** / **function** entities with scoped names
//!   (`ClassA::methodB`) and byte ranges,
//! - a **module** entity per import specifier and a **symbol** entity per
//!   unresolved callee,
//! - `imports` edges (file → module, with specifier metadata) and `calls`
//!   edges (enclosing definition → callee).
//!
//! Entity ids content-address `[kind, path, scoped_name, start, end]` with
//! SHA-256, so re-ingesting an unchanged file reproduces identical ids; edge
//! ids derive from `[type, source_id, target_id]`. Overload signatures (no
//! body) emit nothing but their children are still visited. Files outside
//! the JS/TS family contribute no graph rows.

use std::collections::HashMap;

use serde_json::json;
use sha2::{Digest, Sha256};
use tree_sitter::{Language, Node, Parser};

/// Extensions handled by the extractor.
pub const GRAPH_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

pub const KIND_FILE: &str = "file";
pub const KIND_FUNCTION: &str = "function";
pub const KIND_CLASS: &str = "class";
pub const KIND_METHOD: &str = "method";
pub const KIND_MODULE: &str = "module";
pub const KIND_SYMBOL: &str = "symbol";

pub const EDGE_IMPORTS: &str = "imports";
pub const EDGE_CALLS: &str = "calls";

/// One node destined for `code_graph_nodes`.
#[derive(Debug, Clone)]
pub struct GraphEntity {
    pub id: String,
    /// Workspace-relative path; `None` for module and symbol entities.
    pub path: Option<String>,
    pub kind: &'static str,
    pub name: String,
    pub signature: Option<String>,
    pub range_start: Option<i64>,
    pub range_end: Option<i64>,
    pub metadata: Option<serde_json::Value>,
}

/// One edge destined for `code_graph_edges`.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub edge_type: &'static str,
    pub source_path: Option<String>,
    pub target_path: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Default)]
pub struct GraphExtraction {
    pub entities: Vec<GraphEntity>,
    pub edges: Vec<GraphEdge>,
}

/// Content-stable entity id.
pub fn entity_id(kind: &str, path: &str, scoped_name: &str, start: usize, end: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([0]);
    hasher.update(path.as_bytes());
    hasher.update([0]);
    hasher.update(scoped_name.as_bytes());
    hasher.update([0]);
    hasher.update(start.to_le_bytes());
    hasher.update(end.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// Edge id derived from its endpoints, idempotent across re-ingests.
pub fn edge_id(edge_type: &str, source_id: &str, target_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(edge_type.as_bytes());
    hasher.update([0]);
    hasher.update(source_id.as_bytes());
    hasher.update([0]);
    hasher.update(target_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Extract entities and edges from one file, or `None` when the extension is
/// outside the JS/TS family.
pub fn extract_graph(path: &str, content: &str) -> Option<GraphExtraction> {
    let language = language_for(path)?;

    let mut parser = Parser::new();
    if parser.set_language(&language).is_err() {
        return None;
    }

    let file_entity = GraphEntity {
        id: entity_id(KIND_FILE, path, path, 0, content.len()),
        path: Some(path.to_string()),
        kind: KIND_FILE,
        name: path.to_string(),
        signature: None,
        range_start: Some(0),
        range_end: Some(content.len() as i64),
        metadata: None,
    };

    let Some(tree) = parser.parse(content, None) else {
        // Unparseable content still gets its file node.
        return Some(GraphExtraction {
            entities: vec![file_entity],
            edges: Vec::new(),
        });
    };

    let mut definitions = Vec::new();
    let mut scope = Vec::new();
    collect_definitions(tree.root_node(), content, path, &mut scope, &mut definitions);

    // `(path, kind, name)` is unique in storage; a same-named sibling (e.g.
    // two `function f` branches) keeps only its first occurrence.
    let mut seen_names = std::collections::HashSet::new();
    definitions.retain(|d| seen_names.insert((d.kind, d.scoped_name.clone())));

    let mut extraction = GraphExtraction::default();
    let file_id = file_entity.id.clone();
    extraction.entities.push(file_entity);

    let def_by_name: HashMap<String, String> = definitions
        .iter()
        .map(|d| (d.bare_name.clone(), d.id.clone()))
        .collect();

    for def in &definitions {
        extraction.entities.push(GraphEntity {
            id: def.id.clone(),
            path: Some(path.to_string()),
            kind: def.kind,
            name: def.scoped_name.clone(),
            signature: def.signature.clone(),
            range_start: Some(def.start as i64),
            range_end: Some(def.end as i64),
            metadata: None,
        });
    }

    let mut ctx = EdgeContext {
        path,
        content,
        file_id: &file_id,
        definitions: &definitions,
        def_by_name: &def_by_name,
        modules: HashMap::new(),
        symbols: HashMap::new(),
    };
    collect_edges(tree.root_node(), &mut ctx, &mut extraction);

    Some(extraction)
}

fn language_for(path: &str) -> Option<Language> {
    let ext = std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())?
        .to_ascii_lowercase();
    match ext.as_str() {
        "ts" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "tsx" => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
        "js" | "jsx" | "mjs" | "cjs" => Some(tree_sitter_javascript::LANGUAGE.into()),
        _ => None,
    }
}

// ============ Pass 1: definitions ============

#[derive(Debug)]
struct Definition {
    id: String,
    kind: &'static str,
    scoped_name: String,
    bare_name: String,
    start: usize,
    end: usize,
    signature: Option<String>,
}

fn collect_definitions(
    node: Node<'_>,
    content: &str,
    path: &str,
    scope: &mut Vec<String>,
    out: &mut Vec<Definition>,
) {
    match node.kind() {
        "class_declaration" | "abstract_class_declaration" => {
            if let Some(name) = field_text(node, "name", content) {
                push_definition(node, KIND_CLASS, &name, content, path, scope, out);
                scope.push(name);
                visit_children(node, content, path, scope, out);
                scope.pop();
                return;
            }
        }
        "method_definition" => {
            // Overload signatures carry no body; emit nothing but keep walking.
            if node.child_by_field_name("body").is_some() {
                if let Some(name) = field_text(node, "name", content) {
                    push_definition(node, KIND_METHOD, &name, content, path, scope, out);
                    scope.push(name);
                    visit_children(node, content, path, scope, out);
                    scope.pop();
                    return;
                }
            }
        }
        "function_declaration" | "generator_function_declaration" => {
            if node.child_by_field_name("body").is_some() {
                if let Some(name) = field_text(node, "name", content) {
                    push_definition(node, KIND_FUNCTION, &name, content, path, scope, out);
                    scope.push(name);
                    visit_children(node, content, path, scope, out);
                    scope.pop();
                    return;
                }
            }
        }
        "variable_declarator" => {
            let value_kind = node.child_by_field_name("value").map(|v| v.kind());
            if matches!(
                value_kind,
                Some("arrow_function") | Some("function_expression") | Some("generator_function")
            ) {
                if let Some(name) = field_text(node, "name", content) {
                    push_definition(node, KIND_FUNCTION, &name, content, path, scope, out);
                    scope.push(name);
                    visit_children(node, content, path, scope, out);
                    scope.pop();
                    return;
                }
            }
        }
        _ => {}
    }
    visit_children(node, content, path, scope, out);
}

fn visit_children(
    node: Node<'_>,
    content: &str,
    path: &str,
    scope: &mut Vec<String>,
    out: &mut Vec<Definition>,
) {
    for i in 0..node.named_child_count() {
        if let Some(child) = node.named_child(i) {
            collect_definitions(child, content, path, scope, out);
        }
    }
}

fn push_definition(
    node: Node<'_>,
    kind: &'static str,
    name: &str,
    content: &str,
    path: &str,
    scope: &[String],
    out: &mut Vec<Definition>,
) {
    let scoped_name = if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}::{}", scope.join("::"), name)
    };
    let start = node.start_byte();
    let end = node.end_byte();
    out.push(Definition {
        id: entity_id(kind, path, &scoped_name, start, end),
        kind,
        scoped_name,
        bare_name: name.to_string(),
        start,
        end,
        signature: signature_of(node, content),
    });
}

/// First line of the definition up to the body, capped for sanity.
fn signature_of(node: Node<'_>, content: &str) -> Option<String> {
    let sig_end = node
        .child_by_field_name("body")
        .map(|b| b.start_byte())
        .unwrap_or_else(|| node.end_byte());
    let raw = content.get(node.start_byte()..sig_end)?;
    let line = raw.lines().next().unwrap_or(raw).trim();
    if line.is_empty() {
        return None;
    }
    let capped: String = line.chars().take(200).collect();
    Some(capped)
}

// ============ Pass 2: edges ============

struct EdgeContext<'a> {
    path: &'a str,
    content: &'a str,
    file_id: &'a str,
    definitions: &'a [Definition],
    def_by_name: &'a HashMap<String, String>,
    /// specifier → module entity id, deduplicated per file.
    modules: HashMap<String, String>,
    /// callee name → symbol entity id, deduplicated per file.
    symbols: HashMap<String, String>,
}

fn collect_edges(node: Node<'_>, ctx: &mut EdgeContext<'_>, out: &mut GraphExtraction) {
    match node.kind() {
        "import_statement" => {
            record_import(node, ctx, out);
        }
        "call_expression" => {
            record_call(node, ctx, out);
        }
        _ => {}
    }
    for i in 0..node.named_child_count() {
        if let Some(child) = node.named_child(i) {
            collect_edges(child, ctx, out);
        }
    }
}

fn record_import(node: Node<'_>, ctx: &mut EdgeContext<'_>, out: &mut GraphExtraction) {
    let Some(specifier) = field_text(node, "source", ctx.content).map(strip_quotes) else {
        return;
    };

    let mut named_imports: Vec<String> = Vec::new();
    let mut default_import: Option<String> = None;
    let mut namespace_import: Option<String> = None;

    for i in 0..node.named_child_count() {
        let Some(child) = node.named_child(i) else {
            continue;
        };
        if child.kind() != "import_clause" {
            continue;
        }
        for j in 0..child.named_child_count() {
            let Some(part) = child.named_child(j) else {
                continue;
            };
            match part.kind() {
                "identifier" => default_import = node_text(part, ctx.content),
                "namespace_import" => {
                    for k in 0..part.named_child_count() {
                        if let Some(ident) = part.named_child(k) {
                            if ident.kind() == "identifier" {
                                namespace_import = node_text(ident, ctx.content);
                            }
                        }
                    }
                }
                "named_imports" => {
                    for k in 0..part.named_child_count() {
                        let Some(spec) = part.named_child(k) else {
                            continue;
                        };
                        if spec.kind() == "import_specifier" {
                            if let Some(name) = field_text(spec, "name", ctx.content) {
                                named_imports.push(name);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let module_id = module_entity(ctx, &specifier, out);
    let resolved = resolve_specifier(ctx.path, &specifier);

    let metadata = json!({
        "specifier": specifier,
        "resolvedPath": resolved,
        "namedImports": named_imports,
        "defaultImport": default_import,
        "namespaceImport": namespace_import,
    });

    let id = edge_id(EDGE_IMPORTS, ctx.file_id, &module_id);
    out.edges.push(GraphEdge {
        id,
        source_id: ctx.file_id.to_string(),
        target_id: module_id,
        edge_type: EDGE_IMPORTS,
        source_path: Some(ctx.path.to_string()),
        target_path: resolve_specifier(ctx.path, &specifier),
        metadata: Some(metadata),
    });
}

fn record_call(node: Node<'_>, ctx: &mut EdgeContext<'_>, out: &mut GraphExtraction) {
    let Some(callee) = node.child_by_field_name("function") else {
        return;
    };
    let name = match callee.kind() {
        "identifier" => node_text(callee, ctx.content),
        "member_expression" => field_text(callee, "property", ctx.content),
        _ => None,
    };
    let Some(name) = name else { return };

    let source_id = enclosing_definition(ctx, node.start_byte())
        .map(|d| d.id.clone())
        .unwrap_or_else(|| ctx.file_id.to_string());

    let target_id = match ctx.def_by_name.get(&name) {
        Some(id) => id.clone(),
        None => symbol_entity(ctx, &name, out),
    };

    let id = edge_id(EDGE_CALLS, &source_id, &target_id);
    // A definition calling the same name repeatedly collapses to one edge.
    if out.edges.iter().any(|e| e.id == id) {
        return;
    }
    out.edges.push(GraphEdge {
        id,
        source_id,
        target_id,
        edge_type: EDGE_CALLS,
        source_path: Some(ctx.path.to_string()),
        target_path: None,
        metadata: None,
    });
}

/// Innermost function/method definition containing the byte offset.
fn enclosing_definition<'a>(ctx: &'a EdgeContext<'_>, offset: usize) -> Option<&'a Definition> {
    ctx.definitions
        .iter()
        .filter(|d| {
            (d.kind == KIND_FUNCTION || d.kind == KIND_METHOD)
                && d.start <= offset
                && offset < d.end
        })
        .min_by_key(|d| d.end - d.start)
}

fn module_entity(ctx: &mut EdgeContext<'_>, specifier: &str, out: &mut GraphExtraction) -> String {
    if let Some(existing) = ctx.modules.get(specifier) {
        return existing.clone();
    }
    let id = entity_id(KIND_MODULE, "", specifier, 0, 0);
    out.entities.push(GraphEntity {
        id: id.clone(),
        path: None,
        kind: KIND_MODULE,
        name: specifier.to_string(),
        signature: None,
        range_start: None,
        range_end: None,
        metadata: Some(json!({ "specifier": specifier })),
    });
    ctx.modules.insert(specifier.to_string(), id.clone());
    id
}

fn symbol_entity(ctx: &mut EdgeContext<'_>, name: &str, out: &mut GraphExtraction) -> String {
    if let Some(existing) = ctx.symbols.get(name) {
        return existing.clone();
    }
    let id = entity_id(KIND_SYMBOL, "", name, 0, 0);
    out.entities.push(GraphEntity {
        id: id.clone(),
        path: None,
        kind: KIND_SYMBOL,
        name: name.to_string(),
        signature: None,
        range_start: None,
        range_end: None,
        metadata: None,
    });
    ctx.symbols.insert(name.to_string(), id.clone());
    id
}

/// Lexically resolve a relative import specifier against the importing file.
fn resolve_specifier(path: &str, specifier: &str) -> Option<String> {
    if !specifier.starts_with("./") && !specifier.starts_with("../") {
        return None;
    }
    let dir = std::path::Path::new(path).parent()?;
    let mut parts: Vec<String> = dir
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    for segment in specifier.split('/') {
        match segment {
            "." | "" => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other.to_string()),
        }
    }
    Some(parts.join("/"))
}

fn node_text(node: Node<'_>, content: &str) -> Option<String> {
    content
        .get(node.start_byte()..node.end_byte())
        .map(|s| s.to_string())
}

fn field_text(node: Node<'_>, field: &str, content: &str) -> Option<String> {
    node.child_by_field_name(field)
        .and_then(|n| node_text(n, content))
}

fn strip_quotes(raw: String) -> String {
    raw.trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity<'a>(
        extraction: &'a GraphExtraction,
        kind: &str,
        name: &str,
    ) -> Option<&'a GraphEntity> {
        extraction
            .entities
            .iter()
            .find(|e| e.kind == kind && e.name == name)
    }

    #[test]
    fn unsupported_extension_contributes_nothing() {
        assert!(extract_graph("main.py", "def x():\n    pass\n").is_none());
        assert!(extract_graph("README.md", "# hi").is_none());
    }

    #[test]
    fn file_node_always_present() {
        let out = extract_graph("src/a.ts", "export const x = 1;\n").unwrap();
        let file = entity(&out, KIND_FILE, "src/a.ts").unwrap();
        assert_eq!(file.path.as_deref(), Some("src/a.ts"));
    }

    #[test]
    fn function_calling_unknown_name_yields_symbol_edge() {
        let out = extract_graph("src/b.ts", "function foo(){bar();}\n").unwrap();
        let foo = entity(&out, KIND_FUNCTION, "foo").unwrap();
        let bar = entity(&out, KIND_SYMBOL, "bar").unwrap();
        assert!(bar.path.is_none());

        let edge = out
            .edges
            .iter()
            .find(|e| e.edge_type == EDGE_CALLS)
            .unwrap();
        assert_eq!(edge.source_id, foo.id);
        assert_eq!(edge.target_id, bar.id);
    }

    #[test]
    fn local_callee_resolves_to_definition() {
        let src = "function helper(){}\nfunction main(){helper();}\n";
        let out = extract_graph("src/c.ts", src).unwrap();
        let helper = entity(&out, KIND_FUNCTION, "helper").unwrap();
        let edge = out
            .edges
            .iter()
            .find(|e| e.edge_type == EDGE_CALLS)
            .unwrap();
        assert_eq!(edge.target_id, helper.id);
        assert!(entity(&out, KIND_SYMBOL, "helper").is_none());
    }

    #[test]
    fn methods_get_scoped_names() {
        let src = "class Greeter {\n  greet(name: string) { return hello(name); }\n}\n";
        let out = extract_graph("src/greeter.ts", src).unwrap();
        assert!(entity(&out, KIND_CLASS, "Greeter").is_some());
        let method = entity(&out, KIND_METHOD, "Greeter::greet").unwrap();
        assert!(method.signature.as_deref().unwrap().contains("greet"));

        let edge = out
            .edges
            .iter()
            .find(|e| e.edge_type == EDGE_CALLS)
            .unwrap();
        assert_eq!(edge.source_id, method.id);
    }

    #[test]
    fn arrow_functions_bound_to_names_are_functions() {
        let src = "const handler = (req) => { process(req); };\n";
        let out = extract_graph("src/h.ts", src).unwrap();
        assert!(entity(&out, KIND_FUNCTION, "handler").is_some());
    }

    #[test]
    fn imports_produce_module_nodes_and_metadata() {
        let src = "import def, { a, b } from './util';\nimport * as ns from 'pkg';\n";
        let out = extract_graph("src/deep/mod.ts", src).unwrap();

        assert!(entity(&out, KIND_MODULE, "./util").is_some());
        assert!(entity(&out, KIND_MODULE, "pkg").is_some());

        let util_edge = out
            .edges
            .iter()
            .find(|e| {
                e.edge_type == EDGE_IMPORTS
                    && e.metadata
                        .as_ref()
                        .is_some_and(|m| m["specifier"] == "./util")
            })
            .unwrap();
        let meta = util_edge.metadata.as_ref().unwrap();
        assert_eq!(meta["defaultImport"], "def");
        assert_eq!(meta["namedImports"], serde_json::json!(["a", "b"]));
        assert_eq!(meta["resolvedPath"], "src/deep/util");

        let ns_edge = out
            .edges
            .iter()
            .find(|e| {
                e.edge_type == EDGE_IMPORTS
                    && e.metadata.as_ref().is_some_and(|m| m["specifier"] == "pkg")
            })
            .unwrap();
        assert_eq!(ns_edge.metadata.as_ref().unwrap()["namespaceImport"], "ns");
    }

    #[test]
    fn extraction_is_idempotent() {
        let src = "import { x } from './x';\nclass C { m() { x(); } }\nfunction f(){C;}\n";
        let a = extract_graph("src/i.ts", src).unwrap();
        let b = extract_graph("src/i.ts", src).unwrap();

        let ids_a: Vec<&str> = a.entities.iter().map(|e| e.id.as_str()).collect();
        let ids_b: Vec<&str> = b.entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);

        let edges_a: Vec<&str> = a.edges.iter().map(|e| e.id.as_str()).collect();
        let edges_b: Vec<&str> = b.edges.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(edges_a, edges_b);
    }

    #[test]
    fn repeated_calls_collapse_to_one_edge() {
        let src = "function f(){g();g();g();}\n";
        let out = extract_graph("src/r.ts", src).unwrap();
        let calls: Vec<_> = out
            .edges
            .iter()
            .filter(|e| e.edge_type == EDGE_CALLS)
            .collect();
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn edge_endpoints_always_exist() {
        let src = "import a from './a';\nclass K { go(){ jump(); } }\n";
        let out = extract_graph("src/e.tsx", src).unwrap();
        let ids: std::collections::HashSet<&str> =
            out.entities.iter().map(|e| e.id.as_str()).collect();
        for edge in &out.edges {
            assert!(ids.contains(edge.source_id.as_str()));
            assert!(ids.contains(edge.target_id.as_str()));
        }
    }
}
