//! Index status and freshness reporting.
//!
//! Summarizes the database (row counts, embedding models, recent ingest
//! history) and compares the recorded `commit_sha` against the workspace's
//! current `git rev-parse HEAD`. Git being absent is tolerated: the current
//! SHA is simply `null` and staleness cannot be claimed.

use serde::Serialize;

use crate::error::Result;
use crate::git;
use crate::resolve::{resolve_workspace_root, ResolveContext};
use crate::store::{database_path, IngestionRow, Store};

pub const DEFAULT_HISTORY_LIMIT: i64 = 5;
pub const MAX_HISTORY_LIMIT: i64 = 25;

#[derive(Debug, Clone, Default)]
pub struct StatusRequest {
    pub root: Option<String>,
    pub database_name: Option<String>,
    pub history_limit: Option<i64>,
    pub context: ResolveContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub root: String,
    pub database_path: String,
    pub exists: bool,
    pub database_size_bytes: u64,
    pub file_count: i64,
    pub chunk_count: i64,
    pub graph_node_count: i64,
    pub graph_edge_count: i64,
    pub embedding_models: Vec<String>,
    pub ingestions: Vec<IngestionRow>,
    pub commit_sha: Option<String>,
    pub indexed_at: Option<i64>,
    pub current_commit_sha: Option<String>,
    pub is_stale: bool,
}

/// Report what the index currently holds and whether it is stale.
pub async fn index_status(req: StatusRequest) -> Result<StatusResponse> {
    let root = resolve_workspace_root(req.root.as_deref(), &req.context)?;
    let db_path = database_path(
        &root,
        req.database_name
            .as_deref()
            .unwrap_or(crate::config::DEFAULT_DATABASE_NAME),
    );
    let history_limit = req
        .history_limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let current_commit_sha = git::rev_parse_head(&root).await;

    if !db_path.is_file() {
        return Ok(StatusResponse {
            root: root.display().to_string(),
            database_path: db_path.display().to_string(),
            exists: false,
            database_size_bytes: 0,
            file_count: 0,
            chunk_count: 0,
            graph_node_count: 0,
            graph_edge_count: 0,
            embedding_models: Vec::new(),
            ingestions: Vec::new(),
            commit_sha: None,
            indexed_at: None,
            current_commit_sha,
            is_stale: false,
        });
    }

    let store = Store::open_ro(&db_path).await?;
    let summary = summarize(&store, history_limit).await;
    store.close().await;
    let (file_count, chunk_count, node_count, edge_count, models, history, commit_sha, indexed_at) =
        summary?;

    let is_stale = match (&commit_sha, &current_commit_sha) {
        (Some(stored), Some(current)) => stored != current,
        _ => false,
    };

    Ok(StatusResponse {
        root: root.display().to_string(),
        database_path: db_path.display().to_string(),
        exists: true,
        database_size_bytes: std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0),
        file_count,
        chunk_count,
        graph_node_count: node_count,
        graph_edge_count: edge_count,
        embedding_models: models,
        ingestions: history,
        commit_sha,
        indexed_at,
        current_commit_sha,
        is_stale,
    })
}

#[allow(clippy::type_complexity)]
async fn summarize(
    store: &Store,
    history_limit: i64,
) -> Result<(
    i64,
    i64,
    i64,
    i64,
    Vec<String>,
    Vec<IngestionRow>,
    Option<String>,
    Option<i64>,
)> {
    let file_count = store.count("files").await?;
    let chunk_count = store.count("file_chunks").await?;
    let node_count = store.count("code_graph_nodes").await?;
    let edge_count = store.count("code_graph_edges").await?;
    let models = store.distinct_embedding_models().await?;
    let history = store.recent_ingestions(history_limit).await?;
    let commit_sha = store.meta_value(crate::store::META_COMMIT_SHA).await?;
    let indexed_at = store
        .meta_value(crate::store::META_INDEXED_AT)
        .await?
        .and_then(|v| v.parse().ok());
    Ok((
        file_count, chunk_count, node_count, edge_count, models, history, commit_sha, indexed_at,
    ))
}
