//! Embedding backends and vector helpers.
//!
//! The provider abstraction covers the OpenAI API, local Ollama
//! instances, and in-process fastembed models, plus a disabled
//! placeholder used when no provider is configured. [`embed_texts`]
//! dispatches on `embedding.provider` and is the single entry point for
//! generating vectors; [`create_provider`] exposes model metadata for
//! the embeddings bookkeeping table.
//!
//! ```rust,no_run
//! # use labour_kb::config::EmbeddingConfig;
//! # use labour_kb::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```
//!
//! Remote providers retry transient failures (HTTP 429, 5xx, network
//! errors) with exponential backoff capped at 32s per wait; other client
//! errors fail immediately.
//!
//! Vectors are stored in SQLite as little-endian f32 BLOBs, see
//! [`vec_to_blob`] and [`blob_to_vec`].

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Model metadata reported by a configured embedding backend.
///
/// Embedding computation itself goes through [`embed_texts`]; the trait
/// only carries the model name and vector width recorded alongside each
/// stored embedding.
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
}

/// Embed a batch of texts with the configured backend.
///
/// Returns one vector per input text, in input order. Fails when the
/// provider is `"disabled"`, unknown, or misconfigured (missing API key,
/// unknown model name), or when the backend keeps failing after retries.
pub async fn embed_texts(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    match config.provider.as_str() {
        "openai" => embed_openai(config, texts).await,
        "ollama" => embed_ollama(config, texts).await,
        #[cfg(feature = "local-embeddings")]
        "local" => embed_local(config, texts).await,
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Embed a single query string (semantic and hybrid search).
pub async fn embed_query(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>> {
    let mut vectors = embed_texts(config, &[text.to_string()]).await?;
    if vectors.is_empty() {
        bail!("Empty embedding response");
    }
    Ok(vectors.remove(0))
}

// ============ HTTP with backoff ============

/// POST a JSON body and return the decoded JSON response, retrying
/// transient failures.
///
/// HTTP 429 and 5xx responses and network errors are retried with
/// exponential backoff (1s, 2s, 4s, ... capped at 32s). Any other
/// non-success status fails immediately with the response body in the
/// error message.
async fn post_with_backoff(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    service: &str,
    connect_hint: Option<&str>,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow::anyhow!("{} error {}: {}", service, status, text));
                    continue;
                }
                bail!("{} error {}: {}", service, status, text);
            }
            Err(e) => {
                last_err = Some(match connect_hint {
                    Some(hint) => {
                        anyhow::anyhow!("{} connection error ({}): {}", service, hint, e)
                    }
                    None => anyhow::anyhow!("{} request failed: {}", service, e),
                });
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} gave no response after retries", service)))
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Remote backends need an explicit model name and vector width.
fn require_model_and_dims(config: &EmbeddingConfig, provider: &str) -> Result<(String, usize)> {
    match (config.model.clone(), config.dims) {
        (Some(model), Some(dims)) => Ok((model, dims)),
        (None, _) => bail!("embedding.model is required for the {} provider", provider),
        (_, None) => bail!("embedding.dims is required for the {} provider", provider),
    }
}

// ============ Disabled Provider ============

/// Placeholder for `embedding.provider = "disabled"`. Any attempt to
/// embed through [`embed_texts`] fails with a descriptive error.
pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

// ============ OpenAI Provider ============

/// Backend for the OpenAI `POST /v1/embeddings` endpoint.
///
/// Reads the API key from the `OPENAI_API_KEY` environment variable.
/// Model and dims must be set in config; dims is whatever the chosen
/// model produces (1536 for `text-embedding-3-small`).
pub struct OpenAIProvider {
    model: String,
    dims: usize,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = require_model_and_dims(config, "openai")?;
        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }
        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

async fn embed_openai(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
    let (model, _) = require_model_and_dims(config, "openai")?;

    let client = http_client(config.timeout_secs)?;
    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let json = post_with_backoff(
        &client,
        "https://api.openai.com/v1/embeddings",
        Some(&api_key),
        &body,
        config.max_retries,
        "OpenAI API",
        None,
    )
    .await?;

    parse_openai_response(&json)
}

/// Pull the vectors out of an OpenAI embeddings response.
///
/// Each `data[]` item carries an `index`; results are ordered by it
/// rather than by array position.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());

    for (pos, item) in data.iter().enumerate() {
        let values = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let vec: Vec<f32> = values.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect();

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Backend for a local Ollama instance's `POST /api/embed` endpoint.
///
/// The model must already be pulled (`ollama pull nomic-embed-text`).
/// The endpoint defaults to `http://localhost:11434` and can be
/// overridden with `embedding.url`.
pub struct OllamaProvider {
    model: String,
    dims: usize,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = require_model_and_dims(config, "ollama")?;
        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

async fn embed_ollama(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let (model, _) = require_model_and_dims(config, "ollama")?;
    let url = config.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);

    let client = http_client(config.timeout_secs)?;
    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let endpoint = format!("{}/api/embed", url);
    let hint = format!("is Ollama running at {}?", url);
    let json = post_with_backoff(
        &client,
        &endpoint,
        None,
        &body,
        config.max_retries,
        "Ollama API",
        Some(&hint),
    )
    .await?;

    parse_ollama_response(&json)
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|entry| {
            let values = entry.as_array().ok_or_else(|| {
                anyhow::anyhow!("Invalid Ollama response: embedding is not an array")
            })?;
            Ok(values.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
        })
        .collect()
}

// ============ Local Provider (fastembed) ============

#[cfg(feature = "local-embeddings")]
const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

/// Model names fastembed can load, with their vector widths.
#[cfg(feature = "local-embeddings")]
const LOCAL_MODELS: &[(&str, usize)] = &[
    ("all-minilm-l6-v2", 384),
    ("bge-small-en-v1.5", 384),
    ("bge-base-en-v1.5", 768),
    ("bge-large-en-v1.5", 1024),
    ("nomic-embed-text-v1", 768),
    ("nomic-embed-text-v1.5", 768),
    ("multilingual-e5-small", 384),
    ("multilingual-e5-base", 768),
    ("multilingual-e5-large", 1024),
];

/// In-process inference via fastembed.
///
/// The model is downloaded from Hugging Face on first use and cached;
/// after that, embedding runs entirely offline.
#[cfg(feature = "local-embeddings")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
        let dims = config.dims.unwrap_or_else(|| {
            LOCAL_MODELS
                .iter()
                .find(|(n, _)| *n == model_name.as_str())
                .map(|(_, d)| *d)
                .unwrap_or(384)
        });

        Ok(Self { model_name, dims })
    }
}

#[cfg(feature = "local-embeddings")]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

#[cfg(feature = "local-embeddings")]
fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    use fastembed::EmbeddingModel;

    Ok(match name {
        "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
        "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
        "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
        "bge-large-en-v1.5" => EmbeddingModel::BGELargeENV15,
        "nomic-embed-text-v1" => EmbeddingModel::NomicEmbedTextV1,
        "nomic-embed-text-v1.5" => EmbeddingModel::NomicEmbedTextV15,
        "multilingual-e5-small" => EmbeddingModel::MultilingualE5Small,
        "multilingual-e5-base" => EmbeddingModel::MultilingualE5Base,
        "multilingual-e5-large" => EmbeddingModel::MultilingualE5Large,
        other => {
            let supported: Vec<&str> = LOCAL_MODELS.iter().map(|(n, _)| *n).collect();
            bail!(
                "Unknown local embedding model: '{}'. Supported models: {}",
                other,
                supported.join(", ")
            );
        }
    })
}

#[cfg(feature = "local-embeddings")]
async fn embed_local(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let name = config
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
    let model = fastembed_model(&name)?;
    let batch_size = config.batch_size;
    let texts = texts.to_vec();

    // fastembed inference is CPU-bound, keep it off the async runtime
    tokio::task::spawn_blocking(move || {
        let mut engine = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(model).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;

        engine
            .embed(texts, Some(batch_size))
            .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
    })
    .await?
}

/// Instantiate the provider named by `embedding.provider`.
///
/// Fails for unknown provider names and for providers that cannot be
/// initialized (missing model or dims, missing API key, or a `"local"`
/// provider without the `local-embeddings` feature).
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Box::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Vector encoding ============

/// Encode a vector as little-endian f32 bytes for BLOB storage.
///
/// ```rust
/// use labour_kb::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![0.25f32, -1.5];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 8);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`]. Trailing bytes that do not
/// fill a whole f32 are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, mismatched lengths, and zero-norm
/// inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b.iter()).fold(
        (0.0f32, 0.0f32, 0.0f32),
        |(dot, na, nb), (x, y)| (dot + x * y, na + x * x, nb + y * y),
    );

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_roundtrip() {
        let vec = vec![0.5f32, -3.25, 0.0, 1e-4, 1024.0];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_blob_ignores_trailing_bytes() {
        let mut blob = vec_to_blob(&[2.0f32]);
        blob.push(0xff);
        assert_eq!(blob_to_vec(&blob), vec![2.0f32]);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 2.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![0.0, 3.0];
        let b = vec![0.0, -1.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [2.0, 2.0] },
                { "index": 0, "embedding": [1.0, 1.0] },
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 1.0], vec![2.0, 2.0]]);
    }

    #[test]
    fn test_parse_openai_missing_data() {
        let json = serde_json::json!({ "error": { "message": "bad request" } });
        assert!(parse_openai_response(&json).is_err());
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({ "embeddings": [[0.1, 0.2], [0.3, 0.4]] });
        let vectors = parse_ollama_response(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert!((vectors[1][0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_parse_ollama_missing_embeddings() {
        let json = serde_json::json!({ "model": "nomic-embed-text" });
        assert!(parse_ollama_response(&json).is_err());
    }
}
