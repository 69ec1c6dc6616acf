//! Tool surface: lenient input normalization and dispatch.
//!
//! Advertised schemas are strict; inputs are not. A data-driven alias table
//! maps the parameter spellings agents actually produce (`path`,
//! `project_path`, `databaseName`, …) onto canonical keys, and obvious type
//! coercions (`"true"` → `true`, `"8"` → `8`) are applied before the request
//! structs are built. The same normalization pass serves every tool.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::bundle::{context_bundle, BundleRequest, SymbolSelector};
use crate::config::{EmbeddingOptions, IngestOptions};
use crate::embedding::Embedder;
use crate::error::{IndexMcpError, Result};
use crate::git::{self, TimelineRequest};
use crate::ingest::{ingest_codebase, IngestRequest};
use crate::neighbors::{graph_neighbors, NeighborsRequest, NodeSelector};
use crate::resolve::ResolveContext;
use crate::search::{semantic_search, SearchRequest};
use crate::status::{index_status, StatusRequest};

/// Shared state handed to every tool call.
#[derive(Clone)]
pub struct ToolContext {
    pub embedder: Arc<Embedder>,
}

/// Structured payload plus a short human summary.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub summary: String,
    pub payload: Value,
}

/// Canonical key → accepted aliases. Shared by every tool router.
const ALIASES: &[(&str, &[&str])] = &[
    (
        "root",
        &[
            "path",
            "project_path",
            "projectPath",
            "workspace_root",
            "workspaceRoot",
            "repo_path",
            "repoPath",
            "cwd",
            "directory",
        ],
    ),
    (
        "database_name",
        &["databaseName", "database", "db", "database_file", "databaseFile"],
    ),
    ("query", &["text", "search_query", "searchQuery", "q"]),
    ("include", &["include_globs", "includeGlobs", "globs"]),
    (
        "exclude",
        &["exclude_globs", "excludeGlobs", "ignore_globs", "ignoreGlobs"],
    ),
    (
        "paths",
        &["changed_paths", "changedPaths", "changed_files", "changedFiles", "files"],
    ),
    ("limit", &["max_results", "maxResults", "top_k", "topK", "k"]),
    ("model", &["embedding_model", "embeddingModel"]),
    ("file", &["file_path", "filePath", "target_file", "targetFile"]),
    ("symbol", &["symbol_name", "symbolName", "definition"]),
    ("node", &["node_descriptor", "nodeDescriptor", "target_node", "targetNode"]),
    (
        "budget_tokens",
        &["budgetTokens", "token_budget", "tokenBudget", "budget"],
    ),
    ("max_snippets", &["maxSnippets", "snippet_limit", "snippetLimit"]),
    ("max_neighbors", &["maxNeighbors", "neighbor_limit", "neighborLimit"]),
    ("history_limit", &["historyLimit", "history"]),
    (
        "max_file_size_bytes",
        &["maxFileSizeBytes", "max_file_size", "maxFileSize"],
    ),
    (
        "store_file_content",
        &["storeFileContent", "store_content", "storeContent"],
    ),
    ("auto_evict", &["autoEvict"]),
    ("max_db_size_bytes", &["maxDbSizeBytes", "max_db_size", "maxDbSize"]),
    ("concurrency", &["workers", "parallelism"]),
    ("chunk_size", &["chunkSize", "chunk_size_tokens", "chunkSizeTokens"]),
    ("overlap", &["overlap_tokens", "overlapTokens"]),
    ("batch_size", &["batchSize"]),
    ("timeout_secs", &["timeoutSecs"]),
    ("max_retries", &["maxRetries"]),
    ("run_initial", &["runInitial"]),
    ("branch", &["git_branch", "gitBranch"]),
    ("since_days", &["sinceDays", "days"]),
    ("include_stats", &["includeStats", "numstat"]),
    ("include_patches", &["includePatches", "patch"]),
    ("no_merges", &["noMerges"]),
    ("grep_pattern", &["grepPattern", "pattern"]),
];

/// Keys coerced from `"true"`/`"false"` strings.
const BOOL_KEYS: &[&str] = &[
    "store_file_content",
    "auto_evict",
    "enabled",
    "run_initial",
    "include_stats",
    "include_patches",
    "no_merges",
    "quiet",
];

/// Keys coerced from numeric strings.
const NUMERIC_KEYS: &[&str] = &[
    "limit",
    "budget_tokens",
    "max_snippets",
    "max_neighbors",
    "history_limit",
    "max_file_size_bytes",
    "max_db_size_bytes",
    "since_days",
    "concurrency",
    "chunk_size",
    "overlap",
    "batch_size",
    "timeout_secs",
    "max_retries",
];

fn canonical_key(key: &str) -> &str {
    for (canonical, aliases) in ALIASES {
        if *canonical == key || aliases.contains(&key) {
            return canonical;
        }
    }
    key
}

/// Normalize one argument object: alias folding plus scalar coercions,
/// applied recursively to nested objects. A canonical key already present
/// always wins over its aliases; normalizing canonical input is the
/// identity.
pub fn normalize_arguments(args: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    let Some(input) = args.as_object() else {
        return out;
    };

    // Canonical spellings first so aliases never clobber them.
    let mut entries: Vec<(&String, &Value)> = input.iter().collect();
    entries.sort_by_key(|(k, _)| canonical_key(k) != k.as_str());

    for (key, value) in entries {
        let canonical = canonical_key(key).to_string();
        if out.contains_key(&canonical) {
            continue;
        }
        let value = match value {
            Value::Object(_) => Value::Object(normalize_arguments(value)),
            other => coerce(&canonical, other.clone()),
        };
        out.insert(canonical, value);
    }
    out
}

fn coerce(key: &str, value: Value) -> Value {
    if let Value::String(s) = &value {
        let trimmed = s.trim();
        if BOOL_KEYS.contains(&key) {
            match trimmed.to_ascii_lowercase().as_str() {
                "true" => return Value::Bool(true),
                "false" => return Value::Bool(false),
                _ => {}
            }
        }
        if NUMERIC_KEYS.contains(&key) {
            if let Ok(n) = trimmed.parse::<i64>() {
                return json!(n);
            }
        }
    }
    value
}

// ── Tool registry ─────────────────────────────────────────────────────────

/// Static descriptor advertised over MCP.
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub schema: Value,
}

pub fn tool_descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "ingest_codebase",
            description: "Index a workspace into its local SQLite cache: walk, hash, chunk, \
                          embed, and extract the code graph. Incremental when `paths` is given.",
            schema: json!({
                "type": "object",
                "properties": {
                    "root": { "type": "string", "description": "Workspace root directory" },
                    "include": { "type": "array", "items": { "type": "string" } },
                    "exclude": { "type": "array", "items": { "type": "string" } },
                    "paths": { "type": "array", "items": { "type": "string" }, "description": "Changed paths for an incremental ingest" },
                    "database_name": { "type": "string" },
                    "max_file_size_bytes": { "type": "integer" },
                    "store_file_content": { "type": "boolean" },
                    "embedding": { "type": "object" },
                    "graph": { "type": "object" },
                    "auto_evict": { "type": "boolean" },
                    "max_db_size_bytes": { "type": "integer" },
                    "concurrency": { "type": "integer" }
                }
            }),
        },
        ToolDescriptor {
            name: "semantic_search",
            description: "Search indexed chunks by meaning; returns cited excerpts with byte \
                          and line spans, never whole files.",
            schema: json!({
                "type": "object",
                "properties": {
                    "root": { "type": "string" },
                    "query": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 50 },
                    "model": { "type": "string" },
                    "database_name": { "type": "string" },
                    "embedding": { "type": "object" }
                },
                "required": ["query"]
            }),
        },
        ToolDescriptor {
            name: "context_bundle",
            description: "Compact per-file packet: metadata, ranked definitions, focused and \
                          supporting snippets, and related graph edges, within a token budget.",
            schema: json!({
                "type": "object",
                "properties": {
                    "root": { "type": "string" },
                    "file": { "type": "string" },
                    "symbol": { "type": "object", "properties": {
                        "name": { "type": "string" },
                        "kind": { "type": "string" },
                        "path": { "type": "string" }
                    }},
                    "max_snippets": { "type": "integer", "minimum": 1, "maximum": 10 },
                    "max_neighbors": { "type": "integer", "minimum": 1, "maximum": 50 },
                    "budget_tokens": { "type": "integer", "minimum": 500 },
                    "database_name": { "type": "string" }
                },
                "required": ["file"]
            }),
        },
        ToolDescriptor {
            name: "graph_neighbors",
            description: "Resolve one graph node and list its imports/calls edges in either \
                          direction.",
            schema: json!({
                "type": "object",
                "properties": {
                    "root": { "type": "string" },
                    "node": { "type": "object", "properties": {
                        "id": { "type": "string" },
                        "name": { "type": "string" },
                        "kind": { "type": "string" },
                        "path": { "type": "string" }
                    }},
                    "direction": { "type": "string", "enum": ["incoming", "outgoing", "both"] },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 100 },
                    "database_name": { "type": "string" }
                },
                "required": ["node"]
            }),
        },
        ToolDescriptor {
            name: "code_lookup",
            description: "Routing wrapper over search, bundle, and graph lookups; the mode is \
                          inferred from the arguments when not given.",
            schema: json!({
                "type": "object",
                "properties": {
                    "mode": { "type": "string", "enum": ["search", "bundle", "graph"] },
                    "root": { "type": "string" },
                    "query": { "type": "string" },
                    "file": { "type": "string" },
                    "node": { "type": "object" },
                    "symbol": { "type": "object" },
                    "limit": { "type": "integer" },
                    "budget_tokens": { "type": "integer" },
                    "database_name": { "type": "string" }
                }
            }),
        },
        ToolDescriptor {
            name: "index_status",
            description: "Index summary: row counts, embedding models, ingest history, and git \
                          staleness.",
            schema: json!({
                "type": "object",
                "properties": {
                    "root": { "type": "string" },
                    "database_name": { "type": "string" },
                    "history_limit": { "type": "integer", "minimum": 1, "maximum": 25 }
                }
            }),
        },
        ToolDescriptor {
            name: "commit_timeline",
            description: "Structured git history for the workspace: authors, dates, subjects, \
                          parents, and optional per-file stats or patches.",
            schema: json!({
                "type": "object",
                "properties": {
                    "root": { "type": "string" },
                    "branch": { "type": "string" },
                    "paths": { "type": "array", "items": { "type": "string" } },
                    "since_days": { "type": "integer", "minimum": 1 },
                    "include_stats": { "type": "boolean" },
                    "include_patches": { "type": "boolean" },
                    "no_merges": { "type": "boolean" },
                    "grep_pattern": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 1 }
                }
            }),
        },
        ToolDescriptor {
            name: "info",
            description: "Server name, version, native-module status, and environment summary.",
            schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDescriptor {
            name: "indexing_guidance",
            description: "When to re-ingest and how to keep lookups cheap.",
            schema: json!({ "type": "object", "properties": {} }),
        },
    ]
}

// ── Dispatch ──────────────────────────────────────────────────────────────

pub async fn run_tool(name: &str, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
    let normalized = normalize_arguments(&args);
    match name {
        "ingest_codebase" => tool_ingest(normalized, ctx).await,
        "semantic_search" => tool_search(normalized, ctx).await,
        "context_bundle" => tool_bundle(normalized).await,
        "graph_neighbors" => tool_neighbors(normalized).await,
        "code_lookup" => tool_code_lookup(normalized, ctx).await,
        "index_status" => tool_status(normalized).await,
        "commit_timeline" => tool_timeline(normalized).await,
        "info" => tool_info(),
        "indexing_guidance" => Ok(ToolOutput {
            summary: "indexing guidance".to_string(),
            payload: json!({ "guidance": INDEXING_GUIDANCE }),
        }),
        other => Err(IndexMcpError::invalid_input(format!(
            "unknown tool: {other}"
        ))),
    }
}

fn str_arg(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn string_list(map: &Map<String, Value>, key: &str) -> Vec<String> {
    match map.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(if s.contains('\n') { '\n' } else { ';' })
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn resolve_context(map: &Map<String, Value>) -> ResolveContext {
    ResolveContext {
        meta: map.get("_meta").cloned(),
        ..Default::default()
    }
}

async fn tool_ingest(map: Map<String, Value>, ctx: &ToolContext) -> Result<ToolOutput> {
    let root = str_arg(&map, "root");
    let mut options = IngestOptions {
        include: string_list(&map, "include"),
        exclude: string_list(&map, "exclude"),
        paths: string_list(&map, "paths"),
        embedding: embedding_options(&map)?,
        ..Default::default()
    };
    if let Some(name) = str_arg(&map, "database_name") {
        options.database_name = name;
    }
    if let Some(n) = map.get("max_file_size_bytes").and_then(|v| v.as_u64()) {
        options.max_file_size_bytes = n;
    }
    if let Some(b) = map.get("store_file_content").and_then(|v| v.as_bool()) {
        options.store_file_content = b;
    }
    if let Some(b) = map.get("auto_evict").and_then(|v| v.as_bool()) {
        options.auto_evict = b;
    }
    if let Some(n) = map.get("max_db_size_bytes").and_then(|v| v.as_u64()) {
        options.max_db_size_bytes = n;
    }
    if let Some(n) = map.get("concurrency").and_then(|v| v.as_u64()) {
        options.concurrency = Some(n as usize);
    }
    if let Some(b) = map
        .get("graph")
        .and_then(|g| g.get("enabled"))
        .and_then(|v| v.as_bool())
    {
        options.graph.enabled = b;
    }

    let result = ingest_codebase(
        &ctx.embedder,
        IngestRequest {
            root,
            options,
            context: resolve_context(&map),
            sanitizer: None,
        },
    )
    .await?;

    let summary = format!(
        "indexed {} file(s), skipped {}, deleted {} in {} ms",
        result.ingested_file_count,
        result.skipped.len(),
        result.deleted_paths.len(),
        result.duration_ms
    );
    Ok(ToolOutput {
        summary,
        payload: to_value(&result)?,
    })
}

fn embedding_options(map: &Map<String, Value>) -> Result<EmbeddingOptions> {
    match map.get("embedding") {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| IndexMcpError::invalid_input(format!("invalid embedding options: {e}"))),
        None => Ok(EmbeddingOptions::default()),
    }
}

async fn tool_search(map: Map<String, Value>, ctx: &ToolContext) -> Result<ToolOutput> {
    let query = str_arg(&map, "query")
        .ok_or_else(|| IndexMcpError::invalid_input("query must not be empty"))?;
    let req = SearchRequest {
        root: str_arg(&map, "root"),
        query,
        database_name: str_arg(&map, "database_name"),
        limit: map.get("limit").and_then(|v| v.as_i64()),
        model: str_arg(&map, "model"),
        embedding: embedding_options(&map)?,
        context: resolve_context(&map),
    };
    let result = semantic_search(&ctx.embedder, req).await?;
    let summary = format!(
        "{} match(es) across {} evaluated chunk(s)",
        result.results.len(),
        result.evaluated_chunks
    );
    Ok(ToolOutput {
        summary,
        payload: to_value(&result)?,
    })
}

fn symbol_selector(value: &Value) -> Option<SymbolSelector> {
    match value {
        Value::String(name) if !name.trim().is_empty() => Some(SymbolSelector {
            name: name.trim().to_string(),
            ..Default::default()
        }),
        Value::Object(map) => {
            let name = map.get("name").and_then(|v| v.as_str())?.trim().to_string();
            Some(SymbolSelector {
                name,
                kind: map.get("kind").and_then(|v| v.as_str()).map(String::from),
                path: map.get("path").and_then(|v| v.as_str()).map(String::from),
            })
        }
        _ => None,
    }
}

async fn tool_bundle(map: Map<String, Value>) -> Result<ToolOutput> {
    let file = str_arg(&map, "file")
        .ok_or_else(|| IndexMcpError::invalid_input("file must not be empty"))?;
    let req = BundleRequest {
        root: str_arg(&map, "root"),
        file,
        symbol: map.get("symbol").and_then(symbol_selector),
        max_snippets: map.get("max_snippets").and_then(|v| v.as_u64()).map(|v| v as usize),
        max_neighbors: map.get("max_neighbors").and_then(|v| v.as_i64()),
        budget_tokens: map.get("budget_tokens").and_then(|v| v.as_u64()).map(|v| v as usize),
        database_name: str_arg(&map, "database_name"),
        context: resolve_context(&map),
    };
    let result = context_bundle(req).await?;
    let summary = format!(
        "bundle for {}: {} definition(s), {} snippet(s), ~{} tokens",
        result.file.path,
        result.definitions.len(),
        result.snippets.len(),
        result.estimated_tokens
    );
    Ok(ToolOutput {
        summary,
        payload: to_value(&result)?,
    })
}

fn node_selector(value: &Value) -> Option<NodeSelector> {
    match value {
        Value::String(name) if !name.trim().is_empty() => Some(NodeSelector {
            name: Some(name.trim().to_string()),
            ..Default::default()
        }),
        Value::Object(map) => Some(NodeSelector {
            id: map.get("id").and_then(|v| v.as_str()).map(String::from),
            name: map.get("name").and_then(|v| v.as_str()).map(String::from),
            kind: map.get("kind").and_then(|v| v.as_str()).map(String::from),
            path: map.get("path").and_then(|v| v.as_str()).map(String::from),
        }),
        _ => None,
    }
}

async fn tool_neighbors(map: Map<String, Value>) -> Result<ToolOutput> {
    let node = map
        .get("node")
        .or_else(|| map.get("symbol"))
        .and_then(node_selector)
        .ok_or_else(|| IndexMcpError::invalid_input("node requires an `id` or a `name`"))?;
    let req = NeighborsRequest {
        root: str_arg(&map, "root"),
        node,
        direction: str_arg(&map, "direction"),
        limit: map.get("limit").and_then(|v| v.as_i64()),
        database_name: str_arg(&map, "database_name"),
        context: resolve_context(&map),
    };
    let result = graph_neighbors(req).await?;
    let summary = format!(
        "{} {} edge(s) for {}",
        result.edges.len(),
        result.direction,
        result.node.name
    );
    Ok(ToolOutput {
        summary,
        payload: to_value(&result)?,
    })
}

async fn tool_code_lookup(map: Map<String, Value>, ctx: &ToolContext) -> Result<ToolOutput> {
    let mode = match str_arg(&map, "mode") {
        Some(mode) => mode,
        None => {
            if map.get("query").is_some() {
                "search".to_string()
            } else if map.get("file").is_some() {
                "bundle".to_string()
            } else if map.get("node").is_some() || map.get("symbol").is_some() {
                "graph".to_string()
            } else {
                return Err(IndexMcpError::invalid_input(
                    "code_lookup needs a `query`, `file`, or `node` to infer its mode",
                ));
            }
        }
    };

    let inner = match mode.as_str() {
        "search" => tool_search(map, ctx).await?,
        "bundle" => tool_bundle(map).await?,
        "graph" => tool_neighbors(map).await?,
        other => {
            return Err(IndexMcpError::invalid_input(format!(
                "unknown code_lookup mode: {other}"
            )))
        }
    };

    Ok(ToolOutput {
        summary: inner.summary.clone(),
        payload: json!({
            "mode": mode,
            "summary": inner.summary,
            "result": inner.payload,
        }),
    })
}

async fn tool_status(map: Map<String, Value>) -> Result<ToolOutput> {
    let req = StatusRequest {
        root: str_arg(&map, "root"),
        database_name: str_arg(&map, "database_name"),
        history_limit: map.get("history_limit").and_then(|v| v.as_i64()),
        context: resolve_context(&map),
    };
    let result = index_status(req).await?;
    let summary = if !result.exists {
        "no index database; run ingest_codebase".to_string()
    } else if result.is_stale {
        format!("{} file(s) indexed; index is STALE", result.file_count)
    } else {
        format!("{} file(s) indexed; index is fresh", result.file_count)
    };
    Ok(ToolOutput {
        summary,
        payload: to_value(&result)?,
    })
}

async fn tool_timeline(map: Map<String, Value>) -> Result<ToolOutput> {
    let root = crate::resolve::resolve_workspace_root(
        str_arg(&map, "root").as_deref(),
        &resolve_context(&map),
    )?;
    let req = TimelineRequest {
        branch: str_arg(&map, "branch"),
        paths: string_list(&map, "paths"),
        since_days: map.get("since_days").and_then(|v| v.as_u64()).map(|v| v as u32),
        include_stats: map.get("include_stats").and_then(|v| v.as_bool()).unwrap_or(false),
        include_patches: map
            .get("include_patches")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        no_merges: map.get("no_merges").and_then(|v| v.as_bool()).unwrap_or(false),
        grep_pattern: str_arg(&map, "grep_pattern"),
        limit: map.get("limit").and_then(|v| v.as_u64()).map(|v| v as usize),
    };

    let commits = git::commit_timeline(&root, &req)
        .await
        .map_err(IndexMcpError::Internal)?;
    let summary = format!("{} commit(s)", commits.len());
    Ok(ToolOutput {
        summary,
        payload: json!({
            "root": root.display().to_string(),
            "commit_count": commits.len(),
            "commits": commits,
        }),
    })
}

fn tool_info() -> Result<ToolOutput> {
    let root_hint_vars = [
        "MCP_CALLER_CWD",
        "MCP_WORKSPACE_ROOT",
        "CODEX_CWD",
        "PWD",
        "INIT_CWD",
        "GITHUB_WORKSPACE",
    ];
    let hints: Vec<&str> = root_hint_vars
        .iter()
        .copied()
        .filter(|var| std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false))
        .collect();

    let payload = json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "native": {
            "sqlite": "sqlx (bundled sqlite)",
            "parser": "tree-sitter",
            "grammars": ["typescript", "tsx", "javascript"],
            "local_embeddings": cfg!(feature = "local-embeddings"),
        },
        "environment": {
            "cwd": std::env::current_dir().map(|p| p.display().to_string()).unwrap_or_default(),
            "root_hints_present": hints,
        },
    });
    Ok(ToolOutput {
        summary: format!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        payload,
    })
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| IndexMcpError::Internal(anyhow::Error::new(e).context("serializing result")))
}

const INDEXING_GUIDANCE: &str = "\
Keep the index fresh, and keep raw code out of your context window:\n\
1. Run `ingest_codebase` once per workspace before any lookup, and again \
whenever `index_status` reports `is_stale: true` or files changed outside \
this session.\n\
2. After editing files, prefer an incremental ingest: pass the changed \
paths in `paths` instead of re-walking the whole tree.\n\
3. Use `semantic_search` to locate code, `context_bundle` to study one \
file or symbol under a token budget, and `graph_neighbors` to follow \
imports and calls.\n\
4. Results cite `line_start`/`line_end`; quote those spans rather than \
pasting whole files.";
