//! Embedding providers and the process-wide pipeline registry.
//!
//! The [`Embedder`] owns every initialized provider, keyed by
//! `provider:model`, so a model is loaded at most once per process and can be
//! released on shutdown via [`Embedder::clear`]. Providers:
//!
//! - **openai** — `POST /v1/embeddings` with batching, retry, and backoff.
//! - **ollama** — a local Ollama instance's `/api/embed` endpoint.
//! - **local** — fastembed, behind the `local-embeddings` cargo feature; no
//!   network calls after the model download.
//!
//! Vector utilities live here too: [`vec_to_blob`] / [`blob_to_vec`] encode
//! embeddings as little-endian `f32` BLOBs for SQLite, and
//! [`cosine_similarity`] scores them.
//!
//! # Retry strategy (openai / ollama)
//!
//! HTTP 429 and 5xx retry with exponential backoff (1s, 2s, 4s, … capped at
//! 2^5); other 4xx fail immediately; network errors retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::EmbeddingOptions;
use crate::error::{IndexMcpError, Result};

/// One embedding backend, initialized for a specific model.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier recorded against chunks (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed a batch; the result has one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Process-wide provider registry.
///
/// Owned by the service (no hidden globals); guarded so concurrent calls for
/// the same model initialize it exactly once.
#[derive(Default)]
pub struct Embedder {
    providers: Mutex<HashMap<String, Arc<dyn EmbeddingProvider>>>,
}

impl Embedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Embed a batch of texts with the model named by `options`.
    ///
    /// The whole batch fails together; the ingest coordinator never persists
    /// a chunk without its vector.
    pub async fn embed(
        &self,
        options: &EmbeddingOptions,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let provider = self.provider_for(options).await?;
        let vectors = provider
            .embed(texts)
            .await
            .with_context(|| format!("embedding batch of {} texts", texts.len()))
            .map_err(IndexMcpError::Internal)?;
        if vectors.len() != texts.len() {
            return Err(IndexMcpError::Internal(anyhow!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, options: &EmbeddingOptions, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(options, &[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| IndexMcpError::Internal(anyhow!("empty embedding response")))
    }

    /// Drop every initialized pipeline. Re-initialization afterwards is
    /// allowed; used during shutdown.
    pub async fn clear(&self) {
        self.providers.lock().await.clear();
    }

    async fn provider_for(
        &self,
        options: &EmbeddingOptions,
    ) -> Result<Arc<dyn EmbeddingProvider>> {
        let key = registry_key(options)?;
        let mut providers = self.providers.lock().await;
        if let Some(existing) = providers.get(&key) {
            return Ok(existing.clone());
        }
        let created = create_provider(options)?;
        providers.insert(key, created.clone());
        Ok(created)
    }
}

fn registry_key(options: &EmbeddingOptions) -> Result<String> {
    let model = options.model_id().unwrap_or("default");
    Ok(format!("{}:{}", options.provider, model))
}

fn create_provider(options: &EmbeddingOptions) -> Result<Arc<dyn EmbeddingProvider>> {
    match options.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(options)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(options)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalProvider::new(options)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(IndexMcpError::EmbeddingUnavailable(
            "local embedding provider requires --features local-embeddings".to_string(),
        )),
        "disabled" | "" => Err(IndexMcpError::EmbeddingUnavailable(
            "embedding requested but no provider is configured".to_string(),
        )),
        other => Err(IndexMcpError::EmbeddingUnavailable(format!(
            "unknown embedding provider: {other}"
        ))),
    }
}

// ============ OpenAI ============

struct OpenAiProvider {
    model: String,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OpenAiProvider {
    fn new(options: &EmbeddingOptions) -> Result<Self> {
        let model = options
            .model_id()
            .ok_or_else(|| {
                IndexMcpError::invalid_input("embedding.model is required for the openai provider")
            })?
            .to_string();
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            IndexMcpError::EmbeddingUnavailable(
                "OPENAI_API_KEY environment variable not set".to_string(),
            )
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()
            .context("building http client")
            .map_err(IndexMcpError::Internal)?;
        Ok(Self {
            model,
            api_key,
            client,
            max_retries: options.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1).min(5))).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_openai_response(&json);
                    }
                    let text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("OpenAI API error {status}: {text}"));
                        continue;
                    }
                    bail!("OpenAI API error {status}: {text}");
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("embedding failed after retries")))
    }
}

fn parse_openai_response(json: &serde_json::Value) -> anyhow::Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("invalid OpenAI response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("invalid OpenAI response: missing embedding"))?;
        embeddings.push(
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }
    Ok(embeddings)
}

// ============ Ollama ============

struct OllamaProvider {
    model: String,
    url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OllamaProvider {
    fn new(options: &EmbeddingOptions) -> Result<Self> {
        let model = options
            .model_id()
            .ok_or_else(|| {
                IndexMcpError::invalid_input("embedding.model is required for the ollama provider")
            })?
            .to_string();
        let url = options
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()
            .context("building http client")
            .map_err(IndexMcpError::Internal)?;
        Ok(Self {
            model,
            url,
            client,
            max_retries: options.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1).min(5))).await;
            }

            let resp = self
                .client
                .post(format!("{}/api/embed", self.url))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_ollama_response(&json);
                    }
                    let text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("Ollama API error {status}: {text}"));
                        continue;
                    }
                    bail!("Ollama API error {status}: {text}");
                }
                Err(e) => {
                    last_err = Some(anyhow!(
                        "Ollama connection error (is Ollama running at {}?): {e}",
                        self.url
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Ollama embedding failed after retries")))
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> anyhow::Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow!("invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }
    Ok(result)
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings")]
struct LocalProvider {
    model: String,
    batch_size: usize,
    pipeline: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    fn new(options: &EmbeddingOptions) -> Result<Self> {
        let model = options
            .model_id()
            .unwrap_or("all-minilm-l6-v2")
            .to_string();
        let fastembed_model = match model.as_str() {
            "all-minilm-l6-v2" => fastembed::EmbeddingModel::AllMiniLML6V2,
            "bge-small-en-v1.5" => fastembed::EmbeddingModel::BGESmallENV15,
            "bge-base-en-v1.5" => fastembed::EmbeddingModel::BGEBaseENV15,
            "nomic-embed-text-v1.5" => fastembed::EmbeddingModel::NomicEmbedTextV15,
            other => {
                return Err(IndexMcpError::EmbeddingUnavailable(format!(
                    "unknown local embedding model: {other}"
                )))
            }
        };
        let pipeline = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(false),
        )
        .map_err(|e| {
            IndexMcpError::EmbeddingUnavailable(format!(
                "failed to initialize local embedding model: {e}"
            ))
        })?;
        Ok(Self {
            model,
            batch_size: options.batch_size,
            pipeline: Arc::new(std::sync::Mutex::new(pipeline)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let pipeline = self.pipeline.clone();
        let texts = texts.to_vec();
        let batch_size = self.batch_size;
        tokio::task::spawn_blocking(move || {
            let mut pipeline = pipeline
                .lock()
                .map_err(|_| anyhow!("embedding pipeline poisoned"))?;
            pipeline
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow!("local embedding failed: {e}"))
        })
        .await?
    }
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian `f32` bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector; the inverse of [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
