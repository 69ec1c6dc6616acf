//! SQLite store: schema, migrations, the ingest transaction, and read APIs.
//!
//! One writer at a time (enforced by SQLite), many WAL readers. Every ingest
//! commits through [`Store::apply_ingest`] as a single transaction in the
//! documented order, so readers either see the pre-ingest state or the whole
//! new state. Read tools open with [`Store::open_ro`]; hit-counter bumps use
//! a short-lived writer connection and are best-effort under concurrency.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::{IndexMcpError, Result};
use crate::graph::{GraphEdge, GraphEntity};

pub const META_COMMIT_SHA: &str = "commit_sha";
pub const META_INDEXED_AT: &str = "indexed_at";

/// Absolute path of the database file for a workspace.
pub fn database_path(root: &Path, database_name: &str) -> PathBuf {
    root.join(database_name)
}

/// A `files` row.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: String,
    pub size: i64,
    pub modified: i64,
    pub hash: String,
    pub last_indexed_at: i64,
    pub content: Option<String>,
}

/// Metadata-only view of a `files` row, used for change diffing.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub path: String,
    pub size: i64,
    pub modified: i64,
    pub hash: String,
}

/// A new `file_chunks` row.
#[derive(Debug, Clone)]
pub struct ChunkInsert {
    pub id: String,
    pub path: String,
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Option<Vec<u8>>,
    pub embedding_model: Option<String>,
    pub byte_start: i64,
    pub byte_end: i64,
    pub line_start: i64,
    pub line_end: i64,
}

/// A stored `file_chunks` row.
#[derive(Debug, Clone)]
pub struct ChunkRow {
    pub id: String,
    pub path: String,
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Option<Vec<u8>>,
    pub embedding_model: Option<String>,
    pub byte_start: Option<i64>,
    pub byte_end: Option<i64>,
    pub line_start: Option<i64>,
    pub line_end: Option<i64>,
    pub hits: i64,
}

/// A stored `code_graph_nodes` row.
#[derive(Debug, Clone)]
pub struct NodeRow {
    pub id: String,
    pub path: Option<String>,
    pub kind: String,
    pub name: String,
    pub signature: Option<String>,
    pub range_start: Option<i64>,
    pub range_end: Option<i64>,
    pub metadata: Option<serde_json::Value>,
    pub hits: i64,
}

/// An edge joined with its far-side node.
#[derive(Debug, Clone)]
pub struct NeighborRow {
    pub edge_id: String,
    pub edge_type: String,
    pub direction: &'static str,
    pub metadata: Option<serde_json::Value>,
    pub neighbor: NodeRow,
}

/// An `ingestions` audit row.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestionRow {
    pub id: i64,
    pub root: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub file_count: i64,
    pub skipped_count: i64,
    pub deleted_count: i64,
}

/// Everything one ingest commits atomically.
#[derive(Debug, Default)]
pub struct IngestBatch {
    pub root: String,
    /// Paths whose chunks and path-scoped graph nodes are replaced
    /// (changed plus deleted paths).
    pub refresh_paths: Vec<String>,
    /// Full upserts for new/changed files.
    pub files: Vec<FileRecord>,
    /// Unchanged paths whose `last_indexed_at` is touched.
    pub touched_paths: Vec<String>,
    pub chunks: Vec<ChunkInsert>,
    pub nodes: Vec<GraphEntity>,
    pub edges: Vec<GraphEdge>,
    pub deleted_paths: Vec<String>,
    pub started_at: i64,
    pub finished_at: i64,
    pub skipped_count: i64,
    pub commit_sha: Option<String>,
    pub indexed_at: i64,
    pub touch_timestamp: i64,
}

/// Handle over one SQLite database.
#[derive(Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open read-write, creating the file if missing. WAL and foreign keys
    /// are always on; a single connection serializes writes.
    pub async fn open_rw(db_path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .context("parsing sqlite path")
            .map_err(IndexMcpError::Internal)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Open read-only; the file must exist.
    pub async fn open_ro(db_path: &Path) -> Result<Self> {
        if !db_path.is_file() {
            return Err(IndexMcpError::IndexMissing(format!(
                "no index database at {}; run ingest_codebase first",
                db_path.display()
            )));
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .context("parsing sqlite path")
            .map_err(IndexMcpError::Internal)?
            .read_only(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    // ── Schema ──────────────────────────────────────────────────────────

    /// Create missing tables and add columns older databases lack.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                path TEXT PRIMARY KEY,
                size INTEGER NOT NULL,
                modified INTEGER NOT NULL,
                hash TEXT NOT NULL,
                last_indexed_at INTEGER NOT NULL,
                content TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_chunks (
                id TEXT PRIMARY KEY,
                path TEXT NOT NULL REFERENCES files(path) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB,
                embedding_model TEXT,
                byte_start INTEGER,
                byte_end INTEGER,
                line_start INTEGER,
                line_end INTEGER,
                hits INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS code_graph_nodes (
                id TEXT PRIMARY KEY,
                path TEXT,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                signature TEXT,
                range_start INTEGER,
                range_end INTEGER,
                metadata TEXT,
                hits INTEGER NOT NULL DEFAULT 0,
                UNIQUE(path, kind, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS code_graph_edges (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL REFERENCES code_graph_nodes(id) ON DELETE CASCADE,
                target_id TEXT NOT NULL REFERENCES code_graph_nodes(id) ON DELETE CASCADE,
                type TEXT NOT NULL,
                source_path TEXT,
                target_path TEXT,
                metadata TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ingestions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                root TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                finished_at INTEGER NOT NULL,
                file_count INTEGER NOT NULL,
                skipped_count INTEGER NOT NULL,
                deleted_count INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for (table, column, ddl) in [
            ("file_chunks", "byte_start", "ALTER TABLE file_chunks ADD COLUMN byte_start INTEGER"),
            ("file_chunks", "byte_end", "ALTER TABLE file_chunks ADD COLUMN byte_end INTEGER"),
            ("file_chunks", "line_start", "ALTER TABLE file_chunks ADD COLUMN line_start INTEGER"),
            ("file_chunks", "line_end", "ALTER TABLE file_chunks ADD COLUMN line_end INTEGER"),
            (
                "file_chunks",
                "hits",
                "ALTER TABLE file_chunks ADD COLUMN hits INTEGER NOT NULL DEFAULT 0",
            ),
            (
                "code_graph_nodes",
                "hits",
                "ALTER TABLE code_graph_nodes ADD COLUMN hits INTEGER NOT NULL DEFAULT 0",
            ),
        ] {
            self.ensure_column(table, column, ddl).await?;
        }

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_file_chunks_path ON file_chunks(path)",
            "CREATE INDEX IF NOT EXISTS idx_file_chunks_model ON file_chunks(embedding_model)",
            "CREATE INDEX IF NOT EXISTS idx_graph_nodes_path ON code_graph_nodes(path)",
            "CREATE INDEX IF NOT EXISTS idx_graph_edges_source ON code_graph_edges(source_id)",
            "CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON code_graph_edges(target_id)",
        ] {
            sqlx::query(ddl).execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn ensure_column(&self, table: &str, column: &str, ddl: &str) -> Result<()> {
        let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
            .fetch_all(&self.pool)
            .await?;
        let exists = rows.iter().any(|row| {
            let name: String = row.get("name");
            name == column
        });
        if !exists {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ── Ingest transaction ──────────────────────────────────────────────

    /// Commit one ingest atomically: refresh deletions, file upserts, chunk
    /// inserts, graph upserts, removal deletions, the audit row, and meta.
    pub async fn apply_ingest(&self, batch: &IngestBatch) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // (1) Clear chunks and path-scoped graph nodes for every refresh path.
        // Edge rows cascade with their endpoint nodes.
        for path in &batch.refresh_paths {
            sqlx::query("DELETE FROM file_chunks WHERE path = ?")
                .bind(path)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM code_graph_nodes WHERE path = ?")
                .bind(path)
                .execute(&mut *tx)
                .await?;
        }

        // (2) Upsert files.
        for file in &batch.files {
            sqlx::query(
                r#"
                INSERT INTO files (path, size, modified, hash, last_indexed_at, content)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(path) DO UPDATE SET
                    size = excluded.size,
                    modified = excluded.modified,
                    hash = excluded.hash,
                    last_indexed_at = excluded.last_indexed_at,
                    content = excluded.content
                "#,
            )
            .bind(&file.path)
            .bind(file.size)
            .bind(file.modified)
            .bind(&file.hash)
            .bind(file.last_indexed_at)
            .bind(&file.content)
            .execute(&mut *tx)
            .await?;
        }
        for path in &batch.touched_paths {
            sqlx::query("UPDATE files SET last_indexed_at = ? WHERE path = ?")
                .bind(batch.touch_timestamp)
                .bind(path)
                .execute(&mut *tx)
                .await?;
        }

        // (3) Insert chunks.
        for chunk in &batch.chunks {
            sqlx::query(
                r#"
                INSERT INTO file_chunks
                    (id, path, chunk_index, content, embedding, embedding_model,
                     byte_start, byte_end, line_start, line_end, hits)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.path)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(&chunk.embedding)
            .bind(&chunk.embedding_model)
            .bind(chunk.byte_start)
            .bind(chunk.byte_end)
            .bind(chunk.line_start)
            .bind(chunk.line_end)
            .execute(&mut *tx)
            .await?;
        }

        // (4) Upsert graph nodes, then edges. Hit counters survive upserts.
        for node in &batch.nodes {
            sqlx::query(
                r#"
                INSERT INTO code_graph_nodes
                    (id, path, kind, name, signature, range_start, range_end, metadata, hits)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
                ON CONFLICT(id) DO UPDATE SET
                    signature = excluded.signature,
                    metadata = excluded.metadata
                "#,
            )
            .bind(&node.id)
            .bind(&node.path)
            .bind(node.kind)
            .bind(&node.name)
            .bind(&node.signature)
            .bind(node.range_start)
            .bind(node.range_end)
            .bind(node.metadata.as_ref().map(|m| m.to_string()))
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                IndexMcpError::Internal(
                    anyhow::Error::new(e).context(format!("upserting graph node {}", node.name)),
                )
            })?;
        }
        for edge in &batch.edges {
            sqlx::query(
                r#"
                INSERT INTO code_graph_edges
                    (id, source_id, target_id, type, source_path, target_path, metadata)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    source_path = excluded.source_path,
                    target_path = excluded.target_path,
                    metadata = excluded.metadata
                "#,
            )
            .bind(&edge.id)
            .bind(&edge.source_id)
            .bind(&edge.target_id)
            .bind(edge.edge_type)
            .bind(&edge.source_path)
            .bind(&edge.target_path)
            .bind(edge.metadata.as_ref().map(|m| m.to_string()))
            .execute(&mut *tx)
            .await?;
        }

        // (5) Remove files that disappeared; chunks cascade.
        for path in &batch.deleted_paths {
            sqlx::query("DELETE FROM files WHERE path = ?")
                .bind(path)
                .execute(&mut *tx)
                .await?;
        }

        // (6) Audit row.
        sqlx::query(
            r#"
            INSERT INTO ingestions
                (root, started_at, finished_at, file_count, skipped_count, deleted_count)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&batch.root)
        .bind(batch.started_at)
        .bind(batch.finished_at)
        .bind(batch.files.len() as i64 + batch.touched_paths.len() as i64)
        .bind(batch.skipped_count)
        .bind(batch.deleted_paths.len() as i64)
        .execute(&mut *tx)
        .await?;

        // (7) Meta.
        if let Some(sha) = &batch.commit_sha {
            upsert_meta(&mut tx, META_COMMIT_SHA, sha, batch.indexed_at).await?;
        }
        upsert_meta(
            &mut tx,
            META_INDEXED_AT,
            &batch.indexed_at.to_string(),
            batch.indexed_at,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    // ── Read APIs ───────────────────────────────────────────────────────

    /// File metadata rows, optionally restricted to a target set.
    pub async fn files_in_scope(&self, targets: Option<&[String]>) -> Result<Vec<FileMeta>> {
        let rows = match targets {
            None => {
                sqlx::query("SELECT path, size, modified, hash FROM files")
                    .fetch_all(&self.pool)
                    .await?
            }
            Some(paths) if paths.is_empty() => Vec::new(),
            Some(paths) => {
                let placeholders = vec!["?"; paths.len()].join(", ");
                let sql = format!(
                    "SELECT path, size, modified, hash FROM files WHERE path IN ({placeholders})"
                );
                let mut query = sqlx::query(&sql);
                for path in paths {
                    query = query.bind(path);
                }
                query.fetch_all(&self.pool).await?
            }
        };

        Ok(rows
            .iter()
            .map(|row| FileMeta {
                path: row.get("path"),
                size: row.get("size"),
                modified: row.get("modified"),
                hash: row.get("hash"),
            })
            .collect())
    }

    pub async fn file_record(&self, path: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(
            "SELECT path, size, modified, hash, last_indexed_at, content FROM files WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| FileRecord {
            path: row.get("path"),
            size: row.get("size"),
            modified: row.get("modified"),
            hash: row.get("hash"),
            last_indexed_at: row.get("last_indexed_at"),
            content: row.get("content"),
        }))
    }

    /// All chunks carrying an embedding for one model.
    pub async fn chunks_for_model(&self, model: &str) -> Result<Vec<ChunkRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, path, chunk_index, content, embedding, embedding_model,
                   byte_start, byte_end, line_start, line_end, hits
            FROM file_chunks
            WHERE embedding_model = ? AND embedding IS NOT NULL
            "#,
        )
        .bind(model)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    /// Chunks for one file, hottest first, then by position.
    pub async fn chunks_for_file(&self, path: &str) -> Result<Vec<ChunkRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, path, chunk_index, content, embedding, embedding_model,
                   byte_start, byte_end, line_start, line_end, hits
            FROM file_chunks
            WHERE path = ?
            ORDER BY hits DESC, byte_start ASC, chunk_index ASC
            "#,
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    pub async fn distinct_embedding_models(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT embedding_model FROM file_chunks WHERE embedding_model IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut models: Vec<String> = rows.iter().map(|r| r.get("embedding_model")).collect();
        models.sort();
        Ok(models)
    }

    pub async fn count(&self, table: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn total_chunk_count(&self) -> Result<i64> {
        self.count("file_chunks").await
    }

    /// Nodes scoped to one file, hottest first, then by range.
    pub async fn nodes_for_file(&self, path: &str) -> Result<Vec<NodeRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, path, kind, name, signature, range_start, range_end, metadata, hits
            FROM code_graph_nodes
            WHERE path = ?
            ORDER BY hits DESC, range_start ASC
            "#,
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(node_from_row).collect())
    }

    pub async fn node_by_id(&self, id: &str) -> Result<Option<NodeRow>> {
        let row = sqlx::query(
            r#"
            SELECT id, path, kind, name, signature, range_start, range_end, metadata, hits
            FROM code_graph_nodes WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(node_from_row))
    }

    /// Exact-match node lookup by name plus optional kind/path narrowing.
    pub async fn nodes_by_descriptor(
        &self,
        name: &str,
        kind: Option<&str>,
        path: Option<&str>,
    ) -> Result<Vec<NodeRow>> {
        let mut sql = String::from(
            r#"
            SELECT id, path, kind, name, signature, range_start, range_end, metadata, hits
            FROM code_graph_nodes
            WHERE (name = ?1 OR name LIKE '%::' || ?1)
            "#,
        );
        if kind.is_some() {
            sql.push_str(" AND kind = ?2");
        }
        if path.is_some() {
            sql.push_str(if kind.is_some() {
                " AND path = ?3"
            } else {
                " AND path = ?2"
            });
        }
        sql.push_str(" LIMIT 8");

        let mut query = sqlx::query(&sql).bind(name);
        if let Some(kind) = kind {
            query = query.bind(kind);
        }
        if let Some(path) = path {
            query = query.bind(path);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(node_from_row).collect())
    }

    /// Edges touching a node in one direction, joined with the far node.
    pub async fn neighbors(
        &self,
        node_id: &str,
        direction: &'static str,
        limit: i64,
    ) -> Result<Vec<NeighborRow>> {
        let sql = match direction {
            "outgoing" => {
                r#"
                SELECT e.id AS edge_id, e.type AS edge_type, e.metadata AS edge_metadata,
                       n.id, n.path, n.kind, n.name, n.signature,
                       n.range_start, n.range_end, n.metadata, n.hits
                FROM code_graph_edges e
                JOIN code_graph_nodes n ON n.id = e.target_id
                WHERE e.source_id = ?
                ORDER BY e.type, n.name
                LIMIT ?
                "#
            }
            "incoming" => {
                r#"
                SELECT e.id AS edge_id, e.type AS edge_type, e.metadata AS edge_metadata,
                       n.id, n.path, n.kind, n.name, n.signature,
                       n.range_start, n.range_end, n.metadata, n.hits
                FROM code_graph_edges e
                JOIN code_graph_nodes n ON n.id = e.source_id
                WHERE e.target_id = ?
                ORDER BY e.type, n.name
                LIMIT ?
                "#
            }
            other => {
                return Err(IndexMcpError::invalid_input(format!(
                    "unknown edge direction: {other}"
                )))
            }
        };

        let rows = sqlx::query(sql)
            .bind(node_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| NeighborRow {
                edge_id: row.get("edge_id"),
                edge_type: row.get("edge_type"),
                direction,
                metadata: row
                    .get::<Option<String>, _>("edge_metadata")
                    .and_then(|m| serde_json::from_str(&m).ok()),
                neighbor: node_from_row(row),
            })
            .collect())
    }

    pub async fn recent_ingestions(&self, limit: i64) -> Result<Vec<IngestionRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, root, started_at, finished_at, file_count, skipped_count, deleted_count
            FROM ingestions ORDER BY id DESC LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| IngestionRow {
                id: row.get("id"),
                root: row.get("root"),
                started_at: row.get("started_at"),
                finished_at: row.get("finished_at"),
                file_count: row.get("file_count"),
                skipped_count: row.get("skipped_count"),
                deleted_count: row.get("deleted_count"),
            })
            .collect())
    }

    pub async fn meta_value(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    // ── Hit counters ────────────────────────────────────────────────────

    /// `hits = hits + 1` for the returned chunk ids, in a single statement.
    pub async fn bump_chunk_hits(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("UPDATE file_chunks SET hits = hits + 1 WHERE id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    pub async fn bump_node_hits(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql =
            format!("UPDATE code_graph_nodes SET hits = hits + 1 WHERE id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    // ── Eviction support ────────────────────────────────────────────────

    /// Delete the `count` least-hit chunks; returns rows removed.
    pub async fn evict_chunks(&self, count: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM file_chunks WHERE id IN (
                SELECT id FROM file_chunks ORDER BY hits ASC, chunk_index ASC LIMIT ?
            )
            "#,
        )
        .bind(count)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete the `count` least-hit graph nodes; edges cascade.
    pub async fn evict_nodes(&self, count: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM code_graph_nodes WHERE id IN (
                SELECT id FROM code_graph_nodes ORDER BY hits ASC LIMIT ?
            )
            "#,
        )
        .bind(count)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn vacuum(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}

async fn upsert_meta(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    key: &str,
    value: &str,
    updated_at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO meta (key, value, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> ChunkRow {
    ChunkRow {
        id: row.get("id"),
        path: row.get("path"),
        chunk_index: row.get("chunk_index"),
        content: row.get("content"),
        embedding: row.get("embedding"),
        embedding_model: row.get("embedding_model"),
        byte_start: row.get("byte_start"),
        byte_end: row.get("byte_end"),
        line_start: row.get("line_start"),
        line_end: row.get("line_end"),
        hits: row.get("hits"),
    }
}

fn node_from_row(row: &sqlx::sqlite::SqliteRow) -> NodeRow {
    NodeRow {
        id: row.get("id"),
        path: row.get("path"),
        kind: row.get("kind"),
        name: row.get("name"),
        signature: row.get("signature"),
        range_start: row.get("range_start"),
        range_end: row.get("range_end"),
        metadata: row
            .get::<Option<String>, _>("metadata")
            .and_then(|m| serde_json::from_str(&m).ok()),
        hits: row.get("hits"),
    }
}
