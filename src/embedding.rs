//! Embedding clients for the vector backend.
//!
//! Implements [`hybrid_rag_core::embedding::Embedder`] over:
//! - **[`OllamaEmbedder`]** — `POST {url}/api/embed` on a local Ollama
//!   instance (default `http://localhost:11434`).
//! - **[`OpenAIEmbedder`]** — `POST https://api.openai.com/v1/embeddings`,
//!   authenticated with `OPENAI_API_KEY`.
//!
//! Both go through [`crate::http::post_json_with_retry`]. Use
//! [`create_embedder`] to pick one from `[embedding]`; a disabled provider
//! yields `None` and the vector backend returns no results.

use anyhow::{bail, Result};
use async_trait::async_trait;
use hybrid_rag_core::embedding::Embedder;
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::http;

const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";

/// Instantiate the configured embedder, or `None` when disabled.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Option<Arc<dyn Embedder>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "ollama" => Ok(Some(Arc::new(OllamaEmbedder::new(config)?))),
        "openai" => Ok(Some(Arc::new(OpenAIEmbedder::new(config)?))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn required_model(config: &EmbeddingConfig) -> Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required for {}", config.provider))
}

fn required_dims(config: &EmbeddingConfig) -> Result<usize> {
    config
        .dims
        .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {}", config.provider))
}

pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model: required_model(config)?,
            dims: required_dims(config)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
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

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = http::post_json_with_retry(
            &self.client,
            &format!("{}/api/embed", self.url.trim_end_matches('/')),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        let vectors = parse_ollama_response(&json)?;
        check_batch(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model: required_model(config)?,
            dims: required_dims(config)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = http::post_json_with_retry(
            &self.client,
            &format!("{}/v1/embeddings", self.url.trim_end_matches('/')),
            Some(&api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        let vectors = parse_openai_response(&json)?;
        check_batch(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

fn check_batch(vectors: &[Vec<f32>], expected: usize, dims: usize) -> Result<()> {
    if vectors.len() != expected {
        bail!(
            "Embedding response has {} vectors for {} inputs",
            vectors.len(),
            expected
        );
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != dims) {
        bail!(
            "Embedding has {} dimensions, expected {} (check embedding.dims)",
            v.len(),
            dims
        );
    }
    Ok(())
}

fn json_to_vec(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()
        .map(|arr| arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

/// Extract `embeddings[][]` from an Ollama `/api/embed` response.
fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| {
            json_to_vec(e)
                .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

/// Extract `data[].embedding` from an OpenAI response, ordered by `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let vec = item
            .get("embedding")
            .and_then(json_to_vec)
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}
