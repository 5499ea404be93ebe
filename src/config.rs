//! Configuration parsing and validation.
//!
//! Hybrid RAG is configured via a TOML file (default `./config/hrag.toml`).
//! Every section except `[db]` is optional and falls back to the defaults
//! below.
//!
//! ```toml
//! [db]
//! path = "./data/hrag.sqlite"
//!
//! [retrieval]
//! top_k = 5
//! rrf_k = 60
//! dedup_window = 200
//! backend_timeout_ms = 10000
//! cache_capacity = 256
//! weights = { vector = 0.6, graph = 0.1, keyword = 0.3 }
//!
//! [orchestrator]
//! max_iterations = 3
//! quality_threshold = 0.5
//! skip_planning = true
//! answer_floor = 0.1
//! deadline_secs = 120
//!
//! [resolver]
//! similarity_threshold = 85
//! seed_limit = 1000
//!
//! [llm]
//! provider = "ollama"            # disabled | ollama | openai
//! model = "qwen2.5:7b"
//!
//! [embedding]
//! provider = "ollama"            # disabled | ollama | openai
//! model = "nomic-embed-text"
//! dims = 768
//! ```
//!
//! [`load_config`] rejects invalid values with a descriptive error; these
//! are programmer errors and never recovered at query time.

use anyhow::{bail, Context, Result};
use hybrid_rag_core::fusion::{DEFAULT_DEDUP_WINDOW, DEFAULT_RRF_K};
use hybrid_rag_core::judge::{DEFAULT_PREVIEW_CHARS, DEFAULT_PREVIEW_DOCS};
use hybrid_rag_core::models::FusionWeights;
use hybrid_rag_core::resolver::{DEFAULT_SEED_LIMIT, DEFAULT_SIMILARITY_THRESHOLD};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,
    #[serde(default)]
    pub weights: FusionWeights,
    #[serde(default = "default_backend_timeout_ms")]
    pub backend_timeout_ms: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            rrf_k: default_rrf_k(),
            dedup_window: default_dedup_window(),
            weights: FusionWeights::default(),
            backend_timeout_ms: default_backend_timeout_ms(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_rrf_k() -> f64 {
    DEFAULT_RRF_K
}
fn default_dedup_window() -> usize {
    DEFAULT_DEDUP_WINDOW
}
fn default_backend_timeout_ms() -> u64 {
    10_000
}
fn default_cache_capacity() -> u64 {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    #[serde(default = "default_skip_planning")]
    pub skip_planning: bool,
    /// Below this best quality the synthesizer is not called.
    #[serde(default = "default_answer_floor")]
    pub answer_floor: f64,
    #[serde(default = "default_preview_docs")]
    pub preview_docs: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            quality_threshold: default_quality_threshold(),
            skip_planning: default_skip_planning(),
            answer_floor: default_answer_floor(),
            preview_docs: default_preview_docs(),
            preview_chars: default_preview_chars(),
            deadline_secs: None,
        }
    }
}

fn default_max_iterations() -> usize {
    3
}
fn default_quality_threshold() -> f64 {
    0.5
}
fn default_skip_planning() -> bool {
    true
}
fn default_answer_floor() -> f64 {
    0.1
}
fn default_preview_docs() -> usize {
    DEFAULT_PREVIEW_DOCS
}
fn default_preview_chars() -> usize {
    DEFAULT_PREVIEW_CHARS
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResolverConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_seed_limit")]
    pub seed_limit: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            seed_limit: default_seed_limit(),
        }
    }
}

fn default_similarity_threshold() -> f64 {
    DEFAULT_SIMILARITY_THRESHOLD
}
fn default_seed_limit() -> usize {
    DEFAULT_SEED_LIMIT
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            timeout_secs: default_embed_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_embed_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

/// Read, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let r = &config.retrieval;
    if r.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if !r.rrf_k.is_finite() || r.rrf_k < 1.0 {
        bail!("retrieval.rrf_k must be >= 1");
    }
    if r.dedup_window == 0 {
        bail!("retrieval.dedup_window must be >= 1");
    }
    if r.backend_timeout_ms == 0 {
        bail!("retrieval.backend_timeout_ms must be > 0");
    }
    r.weights
        .validate()
        .with_context(|| "invalid retrieval.weights")?;

    let o = &config.orchestrator;
    if o.max_iterations == 0 {
        bail!("orchestrator.max_iterations must be >= 1");
    }
    if !(0.0..=1.0).contains(&o.quality_threshold) {
        bail!("orchestrator.quality_threshold must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&o.answer_floor) {
        bail!("orchestrator.answer_floor must be in [0.0, 1.0]");
    }
    if o.preview_docs == 0 || o.preview_chars == 0 {
        bail!("orchestrator.preview_docs and preview_chars must be >= 1");
    }
    if o.deadline_secs == Some(0) {
        bail!("orchestrator.deadline_secs must be > 0 when set");
    }

    if !(0.0..=100.0).contains(&config.resolver.similarity_threshold) {
        bail!("resolver.similarity_threshold must be in [0, 100]");
    }

    match config.llm.provider.as_str() {
        "disabled" | "ollama" | "openai" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled, ollama, or openai.",
            other
        ),
    }
    if config.llm.is_enabled() && config.llm.model.is_none() {
        bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }

    match config.embedding.provider.as_str() {
        "disabled" | "ollama" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, ollama, or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "[db]\npath = \"/tmp/hrag.sqlite\"\n";

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.retrieval.rrf_k, 60.0);
        assert_eq!(cfg.retrieval.dedup_window, 200);
        assert_eq!(cfg.retrieval.weights, FusionWeights::default());
        assert_eq!(cfg.orchestrator.max_iterations, 3);
        assert_eq!(cfg.orchestrator.quality_threshold, 0.5);
        assert!(cfg.orchestrator.skip_planning);
        assert_eq!(cfg.resolver.similarity_threshold, 85.0);
        assert_eq!(cfg.resolver.seed_limit, 1000);
        assert!(!cfg.llm.is_enabled());
        assert!(!cfg.embedding.is_enabled());
    }

    #[test]
    fn test_example_config_is_valid() {
        let cfg = parse_config(include_str!("../config/hrag.example.toml")).unwrap();
        assert!(cfg.llm.is_enabled());
        assert_eq!(cfg.embedding.dims, Some(768));
        assert_eq!(cfg.resolver.similarity_threshold, 85.0);
    }

    #[test]
    fn test_custom_weights() {
        let cfg = parse_config(&format!(
            "{}[retrieval]\nweights = {{ vector = 0.5, graph = 0.25, keyword = 0.25 }}\n",
            MINIMAL
        ))
        .unwrap();
        assert_eq!(cfg.retrieval.weights.graph, 0.25);
    }

    fn rejects(extra: &str, needle: &str) {
        let err = parse_config(&format!("{}{}", MINIMAL, extra)).unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains(needle), "expected '{}' in '{}'", needle, msg);
    }

    #[test]
    fn test_rejects_invalid_values() {
        rejects("[retrieval]\ntop_k = 0\n", "top_k");
        rejects("[retrieval]\ndedup_window = 0\n", "dedup_window");
        rejects(
            "[retrieval]\nweights = { vector = -1.0, graph = 0.1, keyword = 0.3 }\n",
            "weights",
        );
        rejects("[orchestrator]\nmax_iterations = 0\n", "max_iterations");
        rejects("[orchestrator]\nquality_threshold = 1.5\n", "quality_threshold");
        rejects("[resolver]\nsimilarity_threshold = 120\n", "similarity_threshold");
        rejects("[llm]\nprovider = \"mystery\"\n", "Unknown llm provider");
        rejects("[llm]\nprovider = \"ollama\"\n", "llm.model");
        rejects(
            "[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n",
            "embedding.dims",
        );
    }
}
