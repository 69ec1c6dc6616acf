//! Option structs for ingest and the tool surface.
//!
//! There is no configuration file: tool inputs carry the options and a small
//! set of environment variables override defaults. The shapes mirror what the
//! tools advertise in their JSON schemas.

use serde::{Deserialize, Serialize};

/// Default database file name, created at the workspace root.
pub const DEFAULT_DATABASE_NAME: &str = ".mcp-index.sqlite";

/// Default per-file size gate (8 MiB).
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 8 * 1024 * 1024;

/// Default database size ceiling for auto-eviction (512 MiB).
pub const DEFAULT_MAX_DB_SIZE_BYTES: u64 = 512 * 1024 * 1024;

/// Options accepted by `ingest_codebase`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct IngestOptions {
    /// Include globs, workspace-relative. Empty means `**/*`.
    pub include: Vec<String>,
    /// Exclude globs merged with the built-in defaults.
    pub exclude: Vec<String>,
    /// Database file name under the workspace root.
    pub database_name: String,
    pub max_file_size_bytes: u64,
    /// Store decoded file content in the `files` table.
    pub store_file_content: bool,
    pub embedding: EmbeddingOptions,
    pub graph: GraphOptions,
    /// Explicit changed paths for an incremental ingest.
    pub paths: Vec<String>,
    pub auto_evict: bool,
    pub max_db_size_bytes: u64,
    /// Per-file worker override; defaults from the host parallelism.
    pub concurrency: Option<usize>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            store_file_content: true,
            embedding: EmbeddingOptions::default(),
            graph: GraphOptions::default(),
            paths: Vec::new(),
            auto_evict: false,
            max_db_size_bytes: DEFAULT_MAX_DB_SIZE_BYTES,
            concurrency: None,
        }
    }
}

impl IngestOptions {
    /// Effective worker count: explicit option, then env override, then
    /// `min(max(2, available_parallelism), 16)`.
    pub fn effective_concurrency(&self) -> usize {
        if let Some(n) = self.concurrency {
            return n.max(1);
        }
        if let Some(n) = env_usize("INDEX_MCP_INGEST_CONCURRENCY") {
            return n.max(1);
        }
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        available.max(2).min(16)
    }
}

/// Embedding settings carried on ingest options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EmbeddingOptions {
    pub enabled: bool,
    /// Provider id: `openai`, `ollama`, `local`, or `disabled`.
    pub provider: String,
    pub model: Option<String>,
    pub chunk_size: usize,
    pub overlap: usize,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
    /// Provider endpoint override (Ollama URL).
    pub url: Option<String>,
}

impl Default for EmbeddingOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "disabled".to_string(),
            model: None,
            chunk_size: 256,
            overlap: 32,
            batch_size: 16,
            max_retries: 5,
            timeout_secs: 30,
            url: None,
        }
    }
}

impl EmbeddingOptions {
    pub fn is_enabled(&self) -> bool {
        self.enabled && self.provider != "disabled"
    }

    /// Model id recorded against chunks; required whenever embedding runs.
    pub fn model_id(&self) -> Option<&str> {
        self.model.as_deref()
    }
}

/// Graph extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct GraphOptions {
    pub enabled: bool,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Default bundle budget, overridable via `INDEX_MCP_BUDGET_TOKENS`.
pub fn default_budget_tokens() -> usize {
    env_usize("INDEX_MCP_BUDGET_TOKENS").unwrap_or(3000)
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let opts = IngestOptions::default();
        assert_eq!(opts.database_name, ".mcp-index.sqlite");
        assert_eq!(opts.max_file_size_bytes, 8 * 1024 * 1024);
        assert!(opts.store_file_content);
        assert!(opts.graph.enabled);
        assert!(!opts.embedding.is_enabled());
        assert_eq!(opts.embedding.chunk_size, 256);
        assert_eq!(opts.embedding.overlap, 32);
    }

    #[test]
    fn concurrency_is_bounded() {
        let opts = IngestOptions::default();
        let n = opts.effective_concurrency();
        assert!(n >= 1);

        let explicit = IngestOptions {
            concurrency: Some(3),
            ..Default::default()
        };
        assert_eq!(explicit.effective_concurrency(), 3);
    }

    #[test]
    fn embedding_enabled_requires_provider() {
        let mut emb = EmbeddingOptions {
            enabled: true,
            ..Default::default()
        };
        assert!(!emb.is_enabled(), "provider still disabled");
        emb.provider = "openai".to_string();
        assert!(emb.is_enabled());
    }
}
