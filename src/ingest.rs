//! Ingest coordinator.
//!
//! One ingest pass: resolve the root, diff the walker output against stored
//! file metadata, run the per-file pipeline (read → hash → sanitize → chunk →
//! graph) with bounded parallelism, embed fragments in batches, and commit
//! everything through a single store transaction. Per-file errors become
//! `skipped[]` entries; embedder and transaction errors abort the whole pass
//! leaving the previous database state intact.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::chunker::chunk_text;
use crate::config::IngestOptions;
use crate::embedding::{vec_to_blob, Embedder};
use crate::error::{IndexMcpError, Result, SkipReason, SkippedFile};
use crate::evict::{evict_if_needed, EvictionOutcome};
use crate::git;
use crate::graph::extract_graph;
use crate::reader::{apply_sanitizer, read_and_hash, ReadFile, SanitizePayload, Sanitizer};
use crate::resolve::{resolve_ingest_paths, resolve_workspace_root, ResolveContext};
use crate::store::{database_path, ChunkInsert, FileRecord, IngestBatch, Store};
use crate::walker::{walk_workspace, WalkOptions, WalkedFile};

/// One ingest request, fully resolved inputs plus capabilities.
pub struct IngestRequest {
    pub root: Option<String>,
    pub options: IngestOptions,
    pub context: ResolveContext,
    pub sanitizer: Option<Sanitizer>,
}

/// Structured result of `ingest_codebase`.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub root: String,
    pub database_path: String,
    pub database_size_bytes: u64,
    pub ingested_file_count: usize,
    pub skipped: Vec<SkippedFile>,
    pub deleted_paths: Vec<String>,
    pub duration_ms: u64,
    pub embedded_chunk_count: usize,
    pub embedding_model: Option<String>,
    pub graph_node_count: usize,
    pub graph_edge_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evicted: Option<EvictionOutcome>,
}

/// Output of the per-file pipeline stage for one changed file.
struct ProcessedFile {
    read: ReadFile,
    /// Sanitized text that was chunked; `None` for binary or skipped content.
    fragments: Vec<crate::chunker::Fragment>,
    graph: Option<crate::graph::GraphExtraction>,
}

/// Run one full or incremental ingest.
pub async fn ingest_codebase(embedder: &Embedder, request: IngestRequest) -> Result<IngestResult> {
    let started = Instant::now();
    let started_at = now_ms();

    let root = resolve_workspace_root(request.root.as_deref(), &request.context)?;
    let options = request.options;

    if options.embedding.is_enabled() && options.embedding.model_id().is_none() {
        return Err(IndexMcpError::invalid_input(
            "embedding.model is required when embedding is enabled",
        ));
    }

    let targets = resolve_ingest_paths(
        &root,
        &request.context,
        if options.paths.is_empty() {
            None
        } else {
            Some(&options.paths)
        },
    );
    let using_targets = !targets.is_empty();

    let db_path = database_path(&root, &options.database_name);

    // The database and its WAL siblings never index themselves.
    let mut exclude = options.exclude.clone();
    exclude.push(options.database_name.clone());
    exclude.push(format!("{}-wal", options.database_name));
    exclude.push(format!("{}-shm", options.database_name));

    let include = if using_targets {
        targets.clone()
    } else {
        options.include.clone()
    };

    let store = Store::open_rw(&db_path).await?;
    let outcome = run_pipeline(
        &store,
        &root,
        &db_path,
        &options,
        request.sanitizer,
        embedder,
        include,
        exclude,
        &targets,
        using_targets,
        started_at,
    )
    .await;
    store.close().await;

    let mut result = outcome?;

    result.database_size_bytes = file_size(&db_path);
    if options.auto_evict && result.database_size_bytes > options.max_db_size_bytes {
        let evicted = evict_if_needed(&db_path, options.max_db_size_bytes).await?;
        result.database_size_bytes = file_size(&db_path);
        result.evicted = Some(evicted);
    }

    result.duration_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        root = %result.root,
        files = result.ingested_file_count,
        skipped = result.skipped.len(),
        deleted = result.deleted_paths.len(),
        duration_ms = result.duration_ms,
        "ingest finished"
    );
    Ok(result)
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    store: &Store,
    root: &Path,
    db_path: &Path,
    options: &IngestOptions,
    sanitizer: Option<Sanitizer>,
    embedder: &Embedder,
    include: Vec<String>,
    exclude: Vec<String>,
    targets: &[String],
    using_targets: bool,
    started_at: i64,
) -> Result<IngestResult> {
    store.migrate().await?;

    let existing = store
        .files_in_scope(if using_targets { Some(targets) } else { None })
        .await?;
    let existing_by_path: std::collections::HashMap<&str, &crate::store::FileMeta> =
        existing.iter().map(|f| (f.path.as_str(), f)).collect();

    let walk = walk_workspace(
        root,
        &WalkOptions {
            include,
            exclude,
            max_file_size_bytes: options.max_file_size_bytes,
        },
    )?;
    let mut skipped = walk.skipped;

    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut touched_paths: Vec<String> = Vec::new();
    let mut to_process: Vec<WalkedFile> = Vec::new();

    for candidate in walk.files {
        seen.insert(candidate.path.clone());
        match existing_by_path.get(candidate.path.as_str()) {
            Some(stored)
                if stored.size == candidate.size as i64
                    && stored.modified == candidate.modified_ms =>
            {
                touched_paths.push(candidate.path);
            }
            _ => to_process.push(candidate),
        }
    }

    // Per-file pipeline: read + hash + sanitize + chunk + graph, bounded.
    let concurrency = options.effective_concurrency();
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut tasks: JoinSet<std::result::Result<ProcessedFile, SkippedFile>> = JoinSet::new();

    for candidate in to_process {
        let semaphore = semaphore.clone();
        let sanitizer = sanitizer.clone();
        let root = root.to_path_buf();
        let graph_enabled = options.graph.enabled;
        let chunk_size = options.embedding.chunk_size;
        let overlap = options.embedding.overlap;

        let path_for_err = candidate.path.clone();
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("ingest semaphore closed");
            tokio::task::spawn_blocking(move || {
                process_file(&root, &candidate, sanitizer, graph_enabled, chunk_size, overlap)
            })
            .await
            .unwrap_or_else(|join_err| {
                Err(SkippedFile {
                    path: path_for_err,
                    reason: SkipReason::ReadError,
                    size: None,
                    message: Some(join_err.to_string()),
                })
            })
        });
    }

    let mut processed: Vec<ProcessedFile> = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(file)) => processed.push(file),
            Ok(Err(skip)) => skipped.push(skip),
            Err(join_err) => {
                return Err(IndexMcpError::Internal(
                    anyhow::Error::new(join_err).context("ingest worker panicked"),
                ))
            }
        }
    }
    // Workers complete in arbitrary order; keep the commit deterministic.
    processed.sort_by(|a, b| a.read.path.cmp(&b.read.path));
    skipped.sort_by(|a, b| a.path.cmp(&b.path));

    // Embedding: batched sequentially per model, all-or-nothing.
    let embedding_model = options
        .embedding
        .is_enabled()
        .then(|| options.embedding.model_id().unwrap_or_default().to_string());
    let mut chunks: Vec<ChunkInsert> = Vec::new();
    let mut embedded_chunk_count = 0usize;

    let now = now_ms();
    let mut batch = IngestBatch {
        root: root.display().to_string(),
        started_at,
        skipped_count: 0,
        touch_timestamp: now,
        ..Default::default()
    };

    for file in &processed {
        for fragment in &file.fragments {
            chunks.push(ChunkInsert {
                id: uuid::Uuid::new_v4().to_string(),
                path: file.read.path.clone(),
                chunk_index: fragment.index as i64,
                content: fragment.content.clone(),
                embedding: None,
                embedding_model: None,
                byte_start: fragment.byte_start as i64,
                byte_end: fragment.byte_end as i64,
                line_start: fragment.line_start as i64,
                line_end: fragment.line_end as i64,
            });
        }
    }

    if let Some(model) = &embedding_model {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let batch_size = options.embedding.batch_size.max(1);
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        for group in texts.chunks(batch_size) {
            let embedded = embedder.embed(&options.embedding, group).await?;
            vectors.extend(embedded);
        }
        for (chunk, vector) in chunks.iter_mut().zip(vectors.iter()) {
            chunk.embedding = Some(vec_to_blob(vector));
            chunk.embedding_model = Some(model.clone());
        }
        embedded_chunk_count = chunks.len();
    }

    // Graph batches.
    let mut graph_node_count = 0usize;
    let mut graph_edge_count = 0usize;
    for file in &processed {
        if let Some(extraction) = &file.graph {
            graph_node_count += extraction.entities.len();
            graph_edge_count += extraction.edges.len();
            batch.nodes.extend(extraction.entities.iter().cloned());
            batch.edges.extend(extraction.edges.iter().cloned());
        }
    }

    // Deletions: in-scope paths that no longer exist on disk.
    let scope: BTreeSet<String> = if using_targets {
        targets.iter().cloned().collect()
    } else {
        existing.iter().map(|f| f.path.clone()).collect()
    };
    let deleted_paths: Vec<String> = scope.difference(&seen).cloned().collect();

    batch.refresh_paths = processed
        .iter()
        .map(|f| f.read.path.clone())
        .chain(deleted_paths.iter().cloned())
        .collect();
    batch.files = processed
        .iter()
        .map(|f| FileRecord {
            path: f.read.path.clone(),
            size: f.read.size as i64,
            modified: f.read.modified_ms,
            hash: f.read.hash.clone(),
            last_indexed_at: now,
            content: if options.store_file_content {
                f.read.content.clone()
            } else {
                None
            },
        })
        .collect();
    batch.touched_paths = touched_paths;
    batch.chunks = chunks;
    batch.deleted_paths = deleted_paths.clone();
    batch.skipped_count = skipped.len() as i64;
    batch.commit_sha = git::rev_parse_head(root).await;
    batch.finished_at = now_ms();
    batch.indexed_at = batch.finished_at;

    let ingested_file_count = batch.files.len() + batch.touched_paths.len();
    store.apply_ingest(&batch).await?;

    Ok(IngestResult {
        root: root.display().to_string(),
        database_path: db_path.display().to_string(),
        database_size_bytes: 0, // filled by the caller after close
        ingested_file_count,
        skipped,
        deleted_paths,
        duration_ms: 0,
        embedded_chunk_count,
        embedding_model,
        graph_node_count,
        graph_edge_count,
        evicted: None,
    })
}

/// The blocking per-file stage: read, hash, sanitize, chunk, extract graph.
fn process_file(
    root: &Path,
    candidate: &WalkedFile,
    sanitizer: Option<Sanitizer>,
    graph_enabled: bool,
    chunk_size: usize,
    overlap: usize,
) -> std::result::Result<ProcessedFile, SkippedFile> {
    let read = read_and_hash(
        &candidate.absolute,
        &candidate.path,
        candidate.size,
        candidate.modified_ms,
        true,
    )
    .map_err(|err| SkippedFile {
        path: candidate.path.clone(),
        reason: SkipReason::ReadError,
        size: Some(candidate.size),
        message: Some(err.to_string()),
    })?;

    let sanitized = match &read.content {
        None => None,
        Some(content) => {
            let payload = SanitizePayload {
                path: &read.path,
                absolute_path: &candidate.absolute,
                root,
                content,
            };
            apply_sanitizer(sanitizer.as_ref(), &payload).map_err(|err| SkippedFile {
                path: candidate.path.clone(),
                reason: SkipReason::SanitizerError,
                size: Some(candidate.size),
                message: Some(err.to_string()),
            })?
        }
    };

    let fragments = sanitized
        .as_deref()
        .map(|text| chunk_text(text, chunk_size, overlap))
        .unwrap_or_default();

    let graph = if graph_enabled {
        sanitized
            .as_deref()
            .and_then(|text| extract_graph(&read.path, text))
    } else {
        None
    };

    Ok(ProcessedFile {
        read,
        fragments,
        graph,
    })
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn request(root: &Path, options: IngestOptions) -> IngestRequest {
        IngestRequest {
            root: Some(root.display().to_string()),
            options,
            context: ResolveContext {
                env: Some(Default::default()),
                ..Default::default()
            },
            sanitizer: None,
        }
    }

    #[tokio::test]
    async fn first_ingest_of_minimal_repo() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("README.md"), "# hello\n").unwrap();
        fs::create_dir(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("src/a.ts"), "export const x = 1;\n").unwrap();

        let embedder = Embedder::new();
        let result = ingest_codebase(&embedder, request(tmp.path(), IngestOptions::default()))
            .await
            .unwrap();

        assert_eq!(result.ingested_file_count, 2);
        assert!(result.deleted_paths.is_empty());
        assert!(result.graph_node_count >= 1, "at least the file node");
        assert!(result.database_size_bytes > 0);
        assert!(result.skipped.is_empty());

        let store = Store::open_ro(Path::new(&result.database_path))
            .await
            .unwrap();
        assert_eq!(store.count("files").await.unwrap(), 2);
        assert_eq!(store.count("ingestions").await.unwrap(), 1);
        assert!(store.count("file_chunks").await.unwrap() >= 2);
        store.close().await;
    }

    #[tokio::test]
    async fn unchanged_files_are_not_reprocessed() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "alpha\n").unwrap();

        let embedder = Embedder::new();
        let first = ingest_codebase(&embedder, request(tmp.path(), IngestOptions::default()))
            .await
            .unwrap();
        assert_eq!(first.ingested_file_count, 1);

        let second = ingest_codebase(&embedder, request(tmp.path(), IngestOptions::default()))
            .await
            .unwrap();
        assert_eq!(second.ingested_file_count, 1);

        let db = database_path(tmp.path(), ".mcp-index.sqlite");
        let store = Store::open_ro(&db).await.unwrap();
        // Chunks were carried forward, not duplicated.
        assert_eq!(store.count("file_chunks").await.unwrap(), 1);
        assert_eq!(store.count("ingestions").await.unwrap(), 2);
        store.close().await;
    }

    #[tokio::test]
    async fn incremental_ingest_with_deletion() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("src/a.ts"), "export const a = 1;\n").unwrap();

        let embedder = Embedder::new();
        ingest_codebase(&embedder, request(tmp.path(), IngestOptions::default()))
            .await
            .unwrap();

        fs::remove_file(tmp.path().join("src/a.ts")).unwrap();
        fs::write(tmp.path().join("src/b.ts"), "function foo(){bar();}\n").unwrap();

        let incremental = ingest_codebase(
            &embedder,
            request(
                tmp.path(),
                IngestOptions {
                    paths: vec!["src/a.ts".to_string(), "src/b.ts".to_string()],
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap();

        assert_eq!(incremental.deleted_paths, vec!["src/a.ts".to_string()]);

        let db = database_path(tmp.path(), ".mcp-index.sqlite");
        let store = Store::open_ro(&db).await.unwrap();
        assert!(store.chunks_for_file("src/a.ts").await.unwrap().is_empty());
        assert!(!store.chunks_for_file("src/b.ts").await.unwrap().is_empty());

        // The call edge to the unresolved callee survives in the graph.
        let nodes = store.nodes_by_descriptor("bar", None, None).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].kind, "symbol");
        assert!(nodes[0].path.is_none());
        store.close().await;
    }

    #[tokio::test]
    async fn binary_files_get_no_chunks() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("blob.bin"), b"ab\x00cd").unwrap();

        let embedder = Embedder::new();
        let result = ingest_codebase(&embedder, request(tmp.path(), IngestOptions::default()))
            .await
            .unwrap();
        assert_eq!(result.ingested_file_count, 1);

        let db = database_path(tmp.path(), ".mcp-index.sqlite");
        let store = Store::open_ro(&db).await.unwrap();
        assert_eq!(store.count("file_chunks").await.unwrap(), 0);
        let record = store.file_record("blob.bin").await.unwrap().unwrap();
        assert!(record.content.is_none());
        store.close().await;
    }

    #[tokio::test]
    async fn database_file_is_never_indexed() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "alpha\n").unwrap();

        let embedder = Embedder::new();
        ingest_codebase(&embedder, request(tmp.path(), IngestOptions::default()))
            .await
            .unwrap();
        let second = ingest_codebase(&embedder, request(tmp.path(), IngestOptions::default()))
            .await
            .unwrap();

        let db = database_path(tmp.path(), ".mcp-index.sqlite");
        let store = Store::open_ro(&db).await.unwrap();
        assert!(store
            .file_record(".mcp-index.sqlite")
            .await
            .unwrap()
            .is_none());
        assert_eq!(second.ingested_file_count, 1);
        store.close().await;
    }

    #[tokio::test]
    async fn sanitizer_skip_suppresses_chunks() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("secret.env"), "TOKEN=very-secret\n").unwrap();

        let embedder = Embedder::new();
        let mut req = request(tmp.path(), IngestOptions::default());
        req.sanitizer = Some(Arc::new(|payload: &SanitizePayload<'_>| {
            if payload.path.ends_with(".env") {
                Ok(crate::reader::SanitizeOutcome::Skip)
            } else {
                Ok(crate::reader::SanitizeOutcome::Unchanged)
            }
        }));
        ingest_codebase(&embedder, req).await.unwrap();

        let db = database_path(tmp.path(), ".mcp-index.sqlite");
        let store = Store::open_ro(&db).await.unwrap();
        assert_eq!(store.count("file_chunks").await.unwrap(), 0);
        assert_eq!(store.count("files").await.unwrap(), 1);
        store.close().await;
    }

    #[tokio::test]
    async fn enabled_embedding_without_model_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let embedder = Embedder::new();
        let err = ingest_codebase(
            &embedder,
            request(
                tmp.path(),
                IngestOptions {
                    embedding: crate::config::EmbeddingOptions {
                        enabled: true,
                        provider: "openai".to_string(),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }
}
