//! Embedding providers.
//!
//! Defines the [`Embedder`] trait and its implementations:
//! - **[`OpenAiEmbedder`]**: `POST /v1/embeddings` on an OpenAI-compatible API.
//! - **[`OllamaEmbedder`]**: `POST /api/embed` on a local Ollama instance.
//! - **[`HashEmbedder`]**: deterministic feature hashing, no network. Good
//!   enough for keyword-heavy documents and for tests.
//! - **`LocalEmbedder`**: fastembed models run in-process (feature
//!   `local-embeddings-fastembed`).
//! - **[`DisabledEmbedder`]**: always errors.
//!
//! Use [`create_embedder`] to build the one named in the config.
//!
//! Requests are sent once. Failures are returned to the caller as
//! [`EmbedError`]; there is no retry or backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::bail;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::EmbeddingConfig;
use crate::credential::CredentialSource;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_HASH_DIMS: usize = 256;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding provider is disabled")]
    Disabled,
    #[error("no API key available from {0}")]
    MissingApiKey(String),
    #[error("embedding API error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("embedding transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid embedding response: {0}")]
    Decode(String),
    #[error("embedding count mismatch: sent {expected} texts, got {got} vectors")]
    CountMismatch { expected: usize, got: usize },
    #[error("local embedding failed: {0}")]
    Local(String),
}

/// A text embedding backend.
///
/// Implementations must be deterministic for a fixed model: the same text
/// always maps to the same vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, EmbedError> {
    let results = embedder.embed(&[text.to_string()]).await?;
    let got = results.len();
    results
        .into_iter()
        .next()
        .ok_or(EmbedError::CountMismatch { expected: 1, got })
}

fn http_client(timeout_secs: Option<u64>) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder.build()
}

fn check_count(expected: usize, got: usize) -> Result<(), EmbedError> {
    if expected != got {
        return Err(EmbedError::CountMismatch { expected, got });
    }
    Ok(())
}

// ============ Disabled ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Disabled)
    }
}

// ============ OpenAI ============

/// Embedder backed by an OpenAI-compatible `/v1/embeddings` endpoint.
///
/// The API key is resolved from its [`CredentialSource`] on every call.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    credential: CredentialSource,
}

#[derive(Serialize)]
struct OpenAiEmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAiEmbeddingsResponse {
    data: Vec<OpenAiEmbeddingItem>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig, credential: CredentialSource) -> Result<Self, EmbedError> {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "text-embedding-3-small".to_string());
        let dims = config.dims.unwrap_or(match model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        });
        let base = config.url.as_deref().unwrap_or(DEFAULT_OPENAI_URL);

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: format!("{}/v1/embeddings", base.trim_end_matches('/')),
            model,
            dims,
            credential,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let api_key = self
            .credential
            .resolve()
            .ok_or_else(|| EmbedError::MissingApiKey(self.credential.describe()))?;

        let started = Instant::now();
        debug!(model = %self.model, batch = texts.len(), "POST {}", self.url);

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&OpenAiEmbeddingsRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!(%status, model = %self.model, "embeddings request returned non-success status");
            return Err(EmbedError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let mut out: OpenAiEmbeddingsResponse = resp
            .json()
            .await
            .map_err(|e| EmbedError::Decode(e.to_string()))?;
        out.data.sort_by_key(|item| item.index);
        check_count(texts.len(), out.data.len())?;

        info!(
            model = %self.model,
            batch = texts.len(),
            latency_ms = started.elapsed().as_millis(),
            "embeddings completed"
        );

        Ok(out.data.into_iter().map(|item| item.embedding).collect())
    }
}

// ============ Ollama ============

/// Embedder backed by a local Ollama instance (`/api/embed`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "nomic-embed-text".to_string());
        let base = config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: format!("{}/api/embed", base.trim_end_matches('/')),
            model,
            dims: config.dims.unwrap_or(768),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        debug!(model = %self.model, batch = texts.len(), "POST {}", self.url);

        let resp = self
            .client
            .post(&self.url)
            .json(&OllamaEmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbedError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let out: OllamaEmbedResponse = resp
            .json()
            .await
            .map_err(|e| EmbedError::Decode(e.to_string()))?;
        check_count(texts.len(), out.embeddings.len())?;
        Ok(out.embeddings)
    }
}

// ============ Hash ============

/// Offline embedder using signed feature hashing over lower-cased words.
///
/// Each word is hashed with SHA-256; the first eight bytes pick a bucket
/// and the ninth picks the sign. The result is L2-normalised, so texts
/// sharing vocabulary have high cosine similarity.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ Local (fastembed) ============

/// In-process embedder using fastembed. The model is downloaded from
/// Hugging Face on first use and cached; later calls run offline.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        local_model_kind(&model_name)?;
        let dims = config.dims.unwrap_or(match model_name.as_str() {
            "bge-base-en-v1.5" | "nomic-embed-text-v1.5" => 768,
            "bge-large-en-v1.5" => 1024,
            _ => 384,
        });
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn local_model_kind(name: &str) -> Result<fastembed::EmbeddingModel, EmbedError> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => Err(EmbedError::Local(format!(
            "unknown local embedding model '{}'",
            other
        ))),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let kind = local_model_kind(&self.model_name)?;
        let slot = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| EmbedError::Local("model lock poisoned".to_string()))?;
            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(kind).with_show_download_progress(true),
                )
                .map_err(|e| EmbedError::Local(e.to_string()))?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| EmbedError::Local("model not initialised".to_string()))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| EmbedError::Local(e.to_string()))
        })
        .await
        .map_err(|e| EmbedError::Local(e.to_string()))?
    }
}

/// Build the embedder named by `config.provider`.
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"openai"` | [`OpenAiEmbedder`], key from `config.api_key_env` |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"hash"` | [`HashEmbedder`] |
/// | `"local"` | `LocalEmbedder` (requires feature) |
/// | `"disabled"` | [`DisabledEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.provider.as_str() {
        "openai" => Arc::new(OpenAiEmbedder::new(
            config,
            CredentialSource::environment(&config.api_key_env),
        )?),
        "ollama" => Arc::new(OllamaEmbedder::new(config)?),
        "hash" => Arc::new(HashEmbedder::new(config.dims.unwrap_or(DEFAULT_HASH_DIMS))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Arc::new(LocalEmbedder::new(config)?),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        "disabled" => Arc::new(DisabledEmbedder),
        other => bail!("Unknown embedding provider: {}", other),
    };
    Ok(embedder)
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude vector.
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
