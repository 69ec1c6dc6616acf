//! End-to-end pipeline tests over a temporary workspace: ingest, re-ingest,
//! incremental updates, bundles under budget, and hit-counter behavior.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tempfile::TempDir;

use index_mcp::bundle::{context_bundle, BundleRequest};
use index_mcp::config::IngestOptions;
use index_mcp::embedding::Embedder;
use index_mcp::ingest::{ingest_codebase, IngestRequest};
use index_mcp::resolve::ResolveContext;
use index_mcp::store::{database_path, Store};

fn bare_context() -> ResolveContext {
    ResolveContext {
        env: Some(Default::default()),
        ..Default::default()
    }
}

fn request(root: &Path, options: IngestOptions) -> IngestRequest {
    IngestRequest {
        root: Some(root.display().to_string()),
        options,
        context: bare_context(),
        sanitizer: None,
    }
}

async fn ingest(root: &Path, options: IngestOptions) -> index_mcp::ingest::IngestResult {
    let embedder = Embedder::new();
    ingest_codebase(&embedder, request(root, options))
        .await
        .expect("ingest failed")
}

/// Snapshot of every content-addressed row: chunk ids, node ids, edge ids.
async fn graph_snapshot(db: &Path) -> (Vec<String>, BTreeMap<String, String>, Vec<String>) {
    let store = Store::open_ro(db).await.unwrap();
    let mut chunk_ids = Vec::new();
    for path in ["README.md", "src/a.ts", "src/b.ts"] {
        for chunk in store.chunks_for_file(path).await.unwrap() {
            chunk_ids.push(chunk.id);
        }
    }
    let mut node_ids = BTreeMap::new();
    for path in ["src/a.ts", "src/b.ts"] {
        for node in store.nodes_for_file(path).await.unwrap() {
            node_ids.insert(node.id.clone(), node.name.clone());
        }
    }
    let mut edge_ids = Vec::new();
    for (id, _) in node_ids.clone() {
        for edge in store.neighbors(&id, "outgoing", 100).await.unwrap() {
            edge_ids.push(edge.edge_id);
        }
    }
    edge_ids.sort();
    store.close().await;
    (chunk_ids, node_ids, edge_ids)
}

#[tokio::test]
async fn reingest_of_unchanged_workspace_is_byte_identical() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("README.md"), "# hello\n").unwrap();
    fs::create_dir(tmp.path().join("src")).unwrap();
    fs::write(tmp.path().join("src/a.ts"), "export function greet(){ return hi(); }\n").unwrap();

    ingest(tmp.path(), IngestOptions::default()).await;
    let db = database_path(tmp.path(), ".mcp-index.sqlite");
    let before = graph_snapshot(&db).await;

    ingest(tmp.path(), IngestOptions::default()).await;
    let after = graph_snapshot(&db).await;

    assert_eq!(before.0, after.0, "chunk rows must be untouched");
    assert_eq!(before.1, after.1, "node ids must be stable");
    assert_eq!(before.2, after.2, "edge ids must be stable");
}

#[tokio::test]
async fn editing_a_file_replaces_its_chunks() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("notes.txt"), "first version\n").unwrap();
    ingest(tmp.path(), IngestOptions::default()).await;

    let db = database_path(tmp.path(), ".mcp-index.sqlite");
    let store = Store::open_ro(&db).await.unwrap();
    let old = store.chunks_for_file("notes.txt").await.unwrap();
    store.close().await;

    // Rewrite with different size so the (size, modified) gate trips.
    fs::write(tmp.path().join("notes.txt"), "second version, longer\n").unwrap();
    ingest(tmp.path(), IngestOptions::default()).await;

    let store = Store::open_ro(&db).await.unwrap();
    let new = store.chunks_for_file("notes.txt").await.unwrap();
    store.close().await;

    assert_eq!(new.len(), 1);
    assert_ne!(old[0].id, new[0].id, "fragments are replaced, never merged");
    assert!(new[0].content.contains("second version"));
}

#[tokio::test]
async fn gitignored_files_never_reach_the_index() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join(".gitignore"), "*.secret\n!keep.secret\n").unwrap();
    fs::write(tmp.path().join("a.secret"), "hidden").unwrap();
    fs::write(tmp.path().join("keep.secret"), "negated").unwrap();
    fs::write(tmp.path().join("visible.txt"), "shown").unwrap();

    ingest(tmp.path(), IngestOptions::default()).await;

    let db = database_path(tmp.path(), ".mcp-index.sqlite");
    let store = Store::open_ro(&db).await.unwrap();
    assert!(store.file_record("a.secret").await.unwrap().is_none());
    assert!(store.file_record("keep.secret").await.unwrap().is_some());
    assert!(store.file_record("visible.txt").await.unwrap().is_some());
    store.close().await;
}

#[tokio::test]
async fn bundle_on_big_file_stays_under_budget() {
    let tmp = TempDir::new().unwrap();
    let big: String = (0..1200)
        .map(|i| format!("line {i}: the same phrase repeated for padding\n"))
        .collect();
    assert!(big.len() > 45_000);
    fs::write(tmp.path().join("big.txt"), &big).unwrap();

    ingest(tmp.path(), IngestOptions::default()).await;

    let bundle = context_bundle(BundleRequest {
        root: Some(tmp.path().display().to_string()),
        file: "big.txt".to_string(),
        budget_tokens: Some(500),
        context: bare_context(),
        ..Default::default()
    })
    .await
    .unwrap();

    assert!(!bundle.snippets.is_empty());
    assert!(!bundle.warnings.is_empty());
    let snippet_tokens: usize = bundle.snippets.iter().map(|s| s.estimated_tokens).sum();
    // Either within budget, or the single mandatory snippet with a warning.
    assert!(snippet_tokens + 200 <= 500 || bundle.snippets.len() == 1);
}

#[tokio::test]
async fn hits_are_non_decreasing_across_reads() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("app.ts"), "function run(){ start(); }\n").unwrap();
    ingest(tmp.path(), IngestOptions::default()).await;

    let db = database_path(tmp.path(), ".mcp-index.sqlite");
    let hits_of = |chunks: &[index_mcp::store::ChunkRow]| -> i64 {
        chunks.iter().map(|c| c.hits).sum()
    };

    let store = Store::open_ro(&db).await.unwrap();
    let baseline = hits_of(&store.chunks_for_file("app.ts").await.unwrap());
    store.close().await;

    for _ in 0..3 {
        context_bundle(BundleRequest {
            root: Some(tmp.path().display().to_string()),
            file: "app.ts".to_string(),
            context: bare_context(),
            ..Default::default()
        })
        .await
        .unwrap();
    }

    let store = Store::open_ro(&db).await.unwrap();
    let after = hits_of(&store.chunks_for_file("app.ts").await.unwrap());
    store.close().await;

    assert!(after >= baseline + 3);
}

#[tokio::test]
async fn chunk_spans_slice_back_into_stored_content() {
    let tmp = TempDir::new().unwrap();
    let text: String = (0..400)
        .map(|i| format!("fn line number {i} with padding for width\n"))
        .collect();
    fs::write(tmp.path().join("wide.txt"), &text).unwrap();

    ingest(tmp.path(), IngestOptions::default()).await;

    let db = database_path(tmp.path(), ".mcp-index.sqlite");
    let store = Store::open_ro(&db).await.unwrap();
    let record = store.file_record("wide.txt").await.unwrap().unwrap();
    let content = record.content.unwrap();
    let chunks = store.chunks_for_file("wide.txt").await.unwrap();
    assert!(chunks.len() > 1);
    for chunk in &chunks {
        let (start, end) = (
            chunk.byte_start.unwrap() as usize,
            chunk.byte_end.unwrap() as usize,
        );
        assert!(start <= end && end <= content.len());
        assert_eq!(chunk.content, &content[start..end]);
        assert!(chunk.line_start.unwrap() <= chunk.line_end.unwrap());
    }
    store.close().await;
}

#[tokio::test]
async fn every_edge_has_both_endpoints() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir(tmp.path().join("src")).unwrap();
    fs::write(
        tmp.path().join("src/main.ts"),
        "import { helper } from './util';\nclass App { run(){ helper(); boot(); } }\n",
    )
    .unwrap();
    fs::write(tmp.path().join("src/util.ts"), "export function helper(){}\n").unwrap();

    ingest(tmp.path(), IngestOptions::default()).await;

    let db = database_path(tmp.path(), ".mcp-index.sqlite");
    let store = Store::open_ro(&db).await.unwrap();
    // Every outgoing edge from every node resolves its far endpoint through
    // the join, which can only happen when both rows exist.
    for path in ["src/main.ts", "src/util.ts"] {
        for node in store.nodes_for_file(path).await.unwrap() {
            for edge in store.neighbors(&node.id, "outgoing", 100).await.unwrap() {
                assert!(!edge.neighbor.id.is_empty());
                assert!(store.node_by_id(&edge.neighbor.id).await.unwrap().is_some());
            }
        }
    }
    store.close().await;
}
