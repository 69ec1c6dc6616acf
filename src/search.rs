//! Semantic search over chunk embeddings.
//!
//! Embeds the query once, scans the stored vectors for the target model with
//! cosine similarity, and keeps the top-k in a bounded min-heap. Surviving
//! matches carry a ±2-line context window and their byte/line spans, and
//! their hit counters are bumped so eviction favors what callers actually
//! use.
//!
//! Ranking is cosine-only; no keyword blending is applied.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::Serialize;

use crate::config::EmbeddingOptions;
use crate::embedding::{blob_to_vec, cosine_similarity, Embedder};
use crate::error::{IndexMcpError, Result};
use crate::resolve::{resolve_workspace_root, ResolveContext};
use crate::store::{database_path, ChunkRow, Store};

pub const DEFAULT_LIMIT: i64 = 8;
pub const MAX_LIMIT: i64 = 50;

/// Lines of surrounding context attached to each match.
const CONTEXT_LINES: usize = 2;

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub root: Option<String>,
    pub query: String,
    pub database_name: Option<String>,
    pub limit: Option<i64>,
    pub model: Option<String>,
    /// Provider settings used to embed the query.
    pub embedding: EmbeddingOptions,
    pub context: ResolveContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub path: String,
    pub chunk_id: String,
    pub chunk_index: i64,
    pub score: f32,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_after: Option<String>,
    pub byte_start: Option<i64>,
    pub byte_end: Option<i64>,
    pub line_start: Option<i64>,
    pub line_end: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub database_path: String,
    pub embedding_model: Option<String>,
    pub total_chunks: i64,
    pub evaluated_chunks: i64,
    pub results: Vec<SearchResultItem>,
}

/// Run one semantic search.
pub async fn semantic_search(embedder: &Embedder, req: SearchRequest) -> Result<SearchResponse> {
    if req.query.trim().is_empty() {
        return Err(IndexMcpError::invalid_input("query must not be empty"));
    }
    let limit = req.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT) as usize;

    let root = resolve_workspace_root(req.root.as_deref(), &req.context)?;
    let db_path = database_path(
        &root,
        req.database_name
            .as_deref()
            .unwrap_or(crate::config::DEFAULT_DATABASE_NAME),
    );
    let store = Store::open_ro(&db_path).await?;

    let result = search_inner(&store, embedder, &req, limit, &root).await;
    store.close().await;
    let (model, total_chunks, evaluated, scored) = result?;

    // Hit bumps go through a short-lived writer; best-effort by contract.
    if !scored.is_empty() {
        let ids: Vec<String> = scored.iter().map(|r| r.chunk_id.clone()).collect();
        let writer = Store::open_rw(&db_path).await?;
        let bumped = writer.bump_chunk_hits(&ids).await;
        writer.close().await;
        bumped?;
    }

    Ok(SearchResponse {
        database_path: db_path.display().to_string(),
        embedding_model: model,
        total_chunks,
        evaluated_chunks: evaluated,
        results: scored,
    })
}

async fn search_inner(
    store: &Store,
    embedder: &Embedder,
    req: &SearchRequest,
    limit: usize,
    root: &std::path::Path,
) -> Result<(Option<String>, i64, i64, Vec<SearchResultItem>)> {
    let total_chunks = store.total_chunk_count().await?;

    let model = match (&req.model, store.distinct_embedding_models().await?) {
        (Some(explicit), _) => explicit.clone(),
        (None, models) if models.is_empty() => {
            return Ok((None, total_chunks, 0, Vec::new()));
        }
        (None, models) if models.len() == 1 => models.into_iter().next().unwrap(),
        (None, models) => {
            return Err(IndexMcpError::ModelAmbiguous(format!(
                "multiple embedding models present ({}); pass `model`",
                models.join(", ")
            )));
        }
    };

    let chunks = store.chunks_for_model(&model).await?;
    if chunks.is_empty() {
        return Ok((Some(model), total_chunks, 0, Vec::new()));
    }

    let mut query_options = req.embedding.clone();
    query_options.model = Some(model.clone());
    let query_vec = embedder.embed_query(&query_options, &req.query).await?;

    let ranked = rank_chunks(&query_vec, &chunks, limit);
    let evaluated = chunks.len() as i64;

    let mut results = Vec::with_capacity(ranked.len());
    for (idx, score) in ranked {
        let chunk = &chunks[idx];
        let (before, after) = context_window(store, root, chunk).await;
        results.push(SearchResultItem {
            path: chunk.path.clone(),
            chunk_id: chunk.id.clone(),
            chunk_index: chunk.chunk_index,
            score,
            content: chunk.content.clone(),
            context_before: before,
            context_after: after,
            byte_start: chunk.byte_start,
            byte_end: chunk.byte_end,
            line_start: chunk.line_start,
            line_end: chunk.line_end,
        });
    }

    Ok((Some(model), total_chunks, evaluated, results))
}

/// Entry in the bounded top-k heap; the heap is a min-heap on score so the
/// weakest survivor is always on top.
struct HeapEntry {
    score: f32,
    idx: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.idx == other.idx
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the minimum on top.
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.idx.cmp(&self.idx))
    }
}

/// Scan all chunks once, keeping the best `limit` by cosine similarity.
/// Returns `(chunk index, score)` sorted best-first.
pub fn rank_chunks(query_vec: &[f32], chunks: &[ChunkRow], limit: usize) -> Vec<(usize, f32)> {
    let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(limit + 1);

    for (idx, chunk) in chunks.iter().enumerate() {
        let Some(blob) = &chunk.embedding else {
            continue;
        };
        let vector = blob_to_vec(blob);
        let score = cosine_similarity(query_vec, &vector);
        heap.push(HeapEntry { score, idx });
        if heap.len() > limit {
            heap.pop();
        }
    }

    let mut ranked: Vec<(usize, f32)> = heap
        .into_iter()
        .map(|entry| (entry.idx, entry.score))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

/// ±N lines around the match, from stored content or the file on disk.
async fn context_window(
    store: &Store,
    root: &std::path::Path,
    chunk: &ChunkRow,
) -> (Option<String>, Option<String>) {
    let (Some(line_start), Some(line_end)) = (chunk.line_start, chunk.line_end) else {
        return (None, None);
    };

    let content = match store.file_record(&chunk.path).await {
        Ok(Some(record)) if record.content.is_some() => record.content,
        _ => std::fs::read_to_string(root.join(&chunk.path)).ok(),
    };
    let Some(content) = content else {
        return (None, None);
    };

    let lines: Vec<&str> = content.lines().collect();
    let start_idx = (line_start.max(1) as usize) - 1;
    let end_idx = (line_end.max(1) as usize) - 1;

    let before_from = start_idx.saturating_sub(CONTEXT_LINES);
    let before = (before_from < start_idx && start_idx <= lines.len())
        .then(|| lines[before_from..start_idx].join("\n"))
        .filter(|s| !s.is_empty());

    let after_to = (end_idx + 1 + CONTEXT_LINES).min(lines.len());
    let after = (end_idx + 1 < after_to)
        .then(|| lines[end_idx + 1..after_to].join("\n"))
        .filter(|s| !s.is_empty());

    (before, after)
}
