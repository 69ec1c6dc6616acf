//! Per-file context bundles under a token budget.
//!
//! A bundle packs what an agent needs to reason about one file without ever
//! reading it raw: file metadata, ranked definitions, a focused snippet plus
//! supporting snippets, and the graph edges around the focus. The whole
//! packet stays under `budget_tokens` (4-chars/token estimate, ~200 tokens
//! reserved for metadata); content shrinks before contract fields drop, and
//! anything omitted is named in `warnings`.

use serde::Serialize;

use crate::config::default_budget_tokens;
use crate::error::{IndexMcpError, Result};
use crate::resolve::{resolve_workspace_root, ResolveContext};
use crate::store::{database_path, ChunkRow, IngestionRow, NodeRow, Store};

pub const DEFAULT_MAX_SNIPPETS: usize = 3;
pub const MAX_SNIPPETS_CAP: usize = 10;
pub const DEFAULT_MAX_NEIGHBORS: i64 = 12;
pub const MAX_NEIGHBORS_CAP: i64 = 50;
pub const MIN_BUDGET_TOKENS: usize = 500;

/// Tokens reserved for everything that is not snippet content.
const METADATA_RESERVE_TOKENS: usize = 200;

/// Node kinds that count as definitions.
const DEFINITION_KINDS: &[&str] = &["function", "method", "class"];

/// Definitions listed per bundle, before snippets.
const MAX_DEFINITIONS: usize = 24;

#[derive(Debug, Clone, Default)]
pub struct SymbolSelector {
    pub name: String,
    pub kind: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BundleRequest {
    pub root: Option<String>,
    pub file: String,
    pub symbol: Option<SymbolSelector>,
    pub max_snippets: Option<usize>,
    pub max_neighbors: Option<i64>,
    pub budget_tokens: Option<usize>,
    pub database_name: Option<String>,
    pub context: ResolveContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct BundleFileInfo {
    pub path: String,
    pub size: i64,
    pub modified: i64,
    pub hash: String,
    pub last_indexed_at: i64,
    pub is_binary: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DefinitionInfo {
    pub id: String,
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub range_start: Option<i64>,
    pub range_end: Option<i64>,
    pub hits: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedEdge {
    pub id: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub direction: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub neighbor: DefinitionInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnippetInfo {
    pub chunk_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub byte_start: Option<i64>,
    pub byte_end: Option<i64>,
    pub line_start: Option<i64>,
    pub line_end: Option<i64>,
    pub estimated_tokens: usize,
    pub is_focus: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BundleResponse {
    pub database_path: String,
    pub file: BundleFileInfo,
    pub definitions: Vec<DefinitionInfo>,
    pub focus_definition: Option<DefinitionInfo>,
    pub related: Vec<RelatedEdge>,
    pub snippets: Vec<SnippetInfo>,
    pub latest_ingestion: Option<IngestionRow>,
    pub warnings: Vec<String>,
    pub estimated_tokens: usize,
}

/// Assemble a context bundle for one file.
pub async fn context_bundle(req: BundleRequest) -> Result<BundleResponse> {
    if req.file.trim().is_empty() {
        return Err(IndexMcpError::invalid_input("file must not be empty"));
    }
    let max_snippets = req
        .max_snippets
        .unwrap_or(DEFAULT_MAX_SNIPPETS)
        .clamp(1, MAX_SNIPPETS_CAP);
    let max_neighbors = req
        .max_neighbors
        .unwrap_or(DEFAULT_MAX_NEIGHBORS)
        .clamp(1, MAX_NEIGHBORS_CAP);
    let budget_tokens = req
        .budget_tokens
        .unwrap_or_else(default_budget_tokens)
        .max(MIN_BUDGET_TOKENS);

    let root = resolve_workspace_root(req.root.as_deref(), &req.context)?;
    let db_path = database_path(
        &root,
        req.database_name
            .as_deref()
            .unwrap_or(crate::config::DEFAULT_DATABASE_NAME),
    );
    let store = Store::open_ro(&db_path).await?;
    let assembled = assemble(
        &store,
        &req,
        max_snippets,
        max_neighbors,
        budget_tokens,
    )
    .await;
    store.close().await;
    let (mut response, bump_chunks, bump_nodes) = assembled?;

    if !bump_chunks.is_empty() || !bump_nodes.is_empty() {
        let writer = Store::open_rw(&db_path).await?;
        let chunks_bumped = writer.bump_chunk_hits(&bump_chunks).await;
        let nodes_bumped = writer.bump_node_hits(&bump_nodes).await;
        writer.close().await;
        chunks_bumped?;
        nodes_bumped?;
    }

    response.database_path = db_path.display().to_string();
    Ok(response)
}

async fn assemble(
    store: &Store,
    req: &BundleRequest,
    max_snippets: usize,
    max_neighbors: i64,
    budget_tokens: usize,
) -> Result<(BundleResponse, Vec<String>, Vec<String>)> {
    let record = store.file_record(&req.file).await?.ok_or_else(|| {
        IndexMcpError::NotIndexed(format!("{} is not in the index", req.file))
    })?;
    let is_binary = record.content.is_none();

    let nodes = store.nodes_for_file(&req.file).await?;
    let definitions: Vec<DefinitionInfo> = nodes
        .iter()
        .filter(|n| DEFINITION_KINDS.contains(&n.kind.as_str()))
        .take(MAX_DEFINITIONS)
        .map(definition_info)
        .collect();

    let focus_definition = match &req.symbol {
        Some(selector) => {
            let node = find_focus(&nodes, selector);
            if node.is_none() {
                return Err(IndexMcpError::NotIndexed(format!(
                    "symbol {:?} not found in {}",
                    selector.name, req.file
                )));
            }
            node
        }
        None => definitions.first().cloned(),
    };

    let related = match &focus_definition {
        Some(focus) => {
            let mut edges = Vec::new();
            for direction in ["incoming", "outgoing"] {
                for row in store.neighbors(&focus.id, direction, max_neighbors).await? {
                    edges.push(RelatedEdge {
                        id: row.edge_id,
                        edge_type: row.edge_type,
                        direction: row.direction,
                        metadata: row.metadata,
                        neighbor: definition_info(&row.neighbor),
                    });
                }
            }
            edges
        }
        None => Vec::new(),
    };

    let chunks = store.chunks_for_file(&req.file).await?;
    let (snippets, warnings, estimated_tokens) = select_snippets(
        &chunks,
        focus_definition.as_ref(),
        max_snippets,
        budget_tokens,
    );

    let bump_chunks: Vec<String> = snippets.iter().map(|s| s.chunk_id.clone()).collect();
    let bump_nodes: Vec<String> = focus_definition
        .iter()
        .map(|f| f.id.clone())
        .collect();

    let latest_ingestion = store.recent_ingestions(1).await?.into_iter().next();

    Ok((
        BundleResponse {
            database_path: String::new(),
            file: BundleFileInfo {
                path: record.path,
                size: record.size,
                modified: record.modified,
                hash: record.hash,
                last_indexed_at: record.last_indexed_at,
                is_binary,
            },
            definitions,
            focus_definition,
            related,
            snippets,
            latest_ingestion,
            warnings,
            estimated_tokens,
        },
        bump_chunks,
        bump_nodes,
    ))
}

fn definition_info(node: &NodeRow) -> DefinitionInfo {
    DefinitionInfo {
        id: node.id.clone(),
        kind: node.kind.clone(),
        name: node.name.clone(),
        signature: node.signature.clone(),
        range_start: node.range_start,
        range_end: node.range_end,
        hits: node.hits,
    }
}

/// Case-insensitive exact match on the symbol name (scoped or bare),
/// narrowed by kind and path when provided.
fn find_focus(nodes: &[NodeRow], selector: &SymbolSelector) -> Option<DefinitionInfo> {
    let wanted = selector.name.to_lowercase();
    nodes
        .iter()
        .filter(|n| {
            selector
                .kind
                .as_deref()
                .map(|k| n.kind.eq_ignore_ascii_case(k))
                .unwrap_or(true)
        })
        .filter(|n| {
            selector
                .path
                .as_deref()
                .map(|p| n.path.as_deref() == Some(p))
                .unwrap_or(true)
        })
        .find(|n| {
            let name = n.name.to_lowercase();
            name == wanted || name.ends_with(&format!("::{wanted}"))
        })
        .map(definition_info)
}

/// Greedy snippet selection under the token budget.
///
/// The focus-overlapping chunk goes first; remaining chunks (already ordered
/// hits-desc, position-asc) fill the rest. The budget is never exceeded, but
/// at least one snippet is always included.
fn select_snippets(
    chunks: &[ChunkRow],
    focus: Option<&DefinitionInfo>,
    max_snippets: usize,
    budget_tokens: usize,
) -> (Vec<SnippetInfo>, Vec<String>, usize) {
    let mut warnings = Vec::new();
    if chunks.is_empty() {
        warnings.push("no chunks stored for this file (binary or empty)".to_string());
        return (Vec::new(), warnings, METADATA_RESERVE_TOKENS);
    }

    let focus_idx = focus.and_then(|f| {
        let (Some(start), Some(end)) = (f.range_start, f.range_end) else {
            return None;
        };
        chunks.iter().position(|c| {
            matches!((c.byte_start, c.byte_end), (Some(cs), Some(ce)) if cs < end && start < ce)
        })
    });

    let mut order: Vec<usize> = Vec::with_capacity(chunks.len());
    if let Some(idx) = focus_idx {
        order.push(idx);
    }
    order.extend((0..chunks.len()).filter(|i| Some(*i) != focus_idx));

    let mut selected: Vec<SnippetInfo> = Vec::new();
    let mut used_tokens = METADATA_RESERVE_TOKENS;
    let mut omitted: Vec<&ChunkRow> = Vec::new();

    for idx in order {
        let chunk = &chunks[idx];
        let cost = estimate_tokens(&chunk.content);
        if selected.len() >= max_snippets || used_tokens + cost > budget_tokens {
            omitted.push(chunk);
            continue;
        }
        used_tokens += cost;
        selected.push(snippet_info(chunk, Some(idx) == focus_idx));
    }

    // A bundle always carries at least one snippet, budget notwithstanding.
    if selected.is_empty() {
        let first = focus_idx.map(|i| &chunks[i]).unwrap_or(&chunks[0]);
        let cost = estimate_tokens(&first.content);
        used_tokens += cost;
        selected.push(snippet_info(first, focus_idx.is_some()));
        omitted.retain(|c| c.id != first.id);
        warnings.push(format!(
            "budget of {budget_tokens} tokens is below the smallest snippet ({cost} tokens); included it anyway"
        ));
    }

    if !omitted.is_empty() {
        let ranges: Vec<String> = omitted
            .iter()
            .take(5)
            .map(|c| match (c.line_start, c.line_end) {
                (Some(a), Some(b)) => format!("lines {a}-{b}"),
                _ => format!("chunk {}", c.chunk_index),
            })
            .collect();
        warnings.push(format!(
            "token budget trimmed {} chunk(s): {}",
            omitted.len(),
            ranges.join(", ")
        ));
    }

    (selected, warnings, used_tokens)
}

fn snippet_info(chunk: &ChunkRow, is_focus: bool) -> SnippetInfo {
    SnippetInfo {
        chunk_id: chunk.id.clone(),
        chunk_index: chunk.chunk_index,
        content: chunk.content.clone(),
        byte_start: chunk.byte_start,
        byte_end: chunk.byte_end,
        line_start: chunk.line_start,
        line_end: chunk.line_end,
        estimated_tokens: estimate_tokens(&chunk.content),
        is_focus,
    }
}

/// The documented 4-chars/token estimate, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}
