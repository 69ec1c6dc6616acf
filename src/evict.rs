//! Database-size eviction.
//!
//! When the database outgrows its ceiling, the least-hit chunks (and, if
//! that is not enough, the least-hit graph nodes) are deleted toward an
//! 80%-of-ceiling target, then `VACUUM` reclaims the space. One pass is
//! best-effort; callers re-run if the file is still over budget.

use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::store::Store;

/// Fraction of the ceiling the pass aims for.
const TARGET_FRACTION: f64 = 0.8;

/// Share of the size gap covered by chunk deletion, by row count.
const CHUNK_SHARE: f64 = 0.5;

/// Share of the remaining gap covered by node deletion.
const NODE_SHARE: f64 = 0.3;

/// Result of one eviction pass.
#[derive(Debug, Clone, Serialize)]
pub struct EvictionOutcome {
    pub evicted_chunks: u64,
    pub evicted_nodes: u64,
    pub size_before: u64,
    pub size_after: u64,
    pub was_needed: bool,
}

/// Run one eviction pass against the database at `db_path`.
pub async fn evict_if_needed(db_path: &Path, max_db_size_bytes: u64) -> Result<EvictionOutcome> {
    let size_before = file_size(db_path);
    if size_before <= max_db_size_bytes {
        return Ok(EvictionOutcome {
            evicted_chunks: 0,
            evicted_nodes: 0,
            size_before,
            size_after: size_before,
            was_needed: false,
        });
    }

    let target = (max_db_size_bytes as f64 * TARGET_FRACTION) as u64;
    let bytes_to_free = size_before.saturating_sub(target);
    let fraction = bytes_to_free as f64 / size_before as f64;

    let store = Store::open_rw(db_path).await?;

    let chunk_count = store.count("file_chunks").await?;
    let chunks_to_delete = ((chunk_count as f64 * fraction * CHUNK_SHARE).ceil() as i64).max(1);
    let evicted_chunks = store.evict_chunks(chunks_to_delete).await?;

    let mut evicted_nodes = 0u64;
    if file_size(db_path) > target {
        let node_count = store.count("code_graph_nodes").await?;
        if node_count > 0 {
            let nodes_to_delete = ((node_count as f64 * fraction * NODE_SHARE).ceil() as i64).max(1);
            evicted_nodes = store.evict_nodes(nodes_to_delete).await?;
        }
    }

    store.vacuum().await?;
    store.close().await;

    let size_after = file_size(db_path);
    tracing::info!(
        size_before,
        size_after,
        evicted_chunks,
        evicted_nodes,
        "eviction pass finished"
    );

    Ok(EvictionOutcome {
        evicted_chunks,
        evicted_nodes,
        size_before,
        size_after,
        was_needed: true,
    })
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChunkInsert, FileRecord, IngestBatch};
    use tempfile::TempDir;

    async fn seeded_db(tmp: &TempDir, chunk_count: usize) -> std::path::PathBuf {
        let db_path = tmp.path().join("evict.sqlite");
        let store = Store::open_rw(&db_path).await.unwrap();
        store.migrate().await.unwrap();

        let filler = "x".repeat(4096);
        let batch = IngestBatch {
            root: "/ws".to_string(),
            files: vec![FileRecord {
                path: "big.txt".to_string(),
                size: 1,
                modified: 1,
                hash: "h".to_string(),
                last_indexed_at: 1,
                content: None,
            }],
            chunks: (0..chunk_count)
                .map(|i| ChunkInsert {
                    id: format!("chunk-{i}"),
                    path: "big.txt".to_string(),
                    chunk_index: i as i64,
                    content: filler.clone(),
                    embedding: None,
                    embedding_model: None,
                    byte_start: 0,
                    byte_end: filler.len() as i64,
                    line_start: 1,
                    line_end: 1,
                })
                .collect(),
            started_at: 1,
            finished_at: 2,
            indexed_at: 2,
            touch_timestamp: 2,
            ..Default::default()
        };
        store.apply_ingest(&batch).await.unwrap();
        store.close().await;
        db_path
    }

    #[tokio::test]
    async fn under_ceiling_is_a_noop() {
        let tmp = TempDir::new().unwrap();
        let db_path = seeded_db(&tmp, 4).await;
        let outcome = evict_if_needed(&db_path, u64::MAX).await.unwrap();
        assert!(!outcome.was_needed);
        assert_eq!(outcome.evicted_chunks, 0);
        assert_eq!(outcome.evicted_nodes, 0);
        assert_eq!(outcome.size_before, outcome.size_after);
    }

    #[tokio::test]
    async fn over_ceiling_evicts_something() {
        let tmp = TempDir::new().unwrap();
        let db_path = seeded_db(&tmp, 64).await;
        let size = std::fs::metadata(&db_path).unwrap().len();

        let outcome = evict_if_needed(&db_path, size / 2).await.unwrap();
        assert!(outcome.was_needed);
        assert!(outcome.evicted_chunks + outcome.evicted_nodes > 0);

        let store = Store::open_rw(&db_path).await.unwrap();
        let remaining = store.count("file_chunks").await.unwrap();
        assert!((remaining as u64) < 64);
        store.close().await;
    }
}
