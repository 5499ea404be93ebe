//! Strategy-driven retrieval over the three backends.
//!
//! [`HybridRetriever::retrieve`] services one retrieval attempt:
//!
//! - `Hybrid` queries vector, keyword, and graph concurrently, each under
//!   its own timeout, then fuses the lists with weighted RRF.
//! - `VectorOnly` / `KeywordOnly` / `GraphOnly` query just that backend
//!   and keep its native order.
//!
//! A backend that errors or times out contributes an empty list and a
//! warning; retrieval itself never fails because one source is down.
//!
//! Hybrid results can be cached in a bounded [`moka`] cache keyed by
//! `query:hybrid:top_k`. Degraded (partial) and empty results are not
//! cached so a transient outage is not remembered.

use anyhow::Result;
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;

use hybrid_rag_core::fusion::{FusionEngine, RankedList};
use hybrid_rag_core::models::{BackendKind, FusionWeights, RetrievalStrategy, ScoredPassage};
use hybrid_rag_core::store::RetrievalBackend;

use crate::config::RetrievalConfig;

pub type ResultCache = Cache<String, Vec<ScoredPassage>>;

/// Build a hybrid result cache holding at most `capacity` queries.
pub fn new_cache(capacity: u64) -> ResultCache {
    Cache::new(capacity)
}

pub struct HybridRetriever {
    vector: Arc<dyn RetrievalBackend>,
    keyword: Arc<dyn RetrievalBackend>,
    graph: Arc<dyn RetrievalBackend>,
    fusion: FusionEngine,
    weights: FusionWeights,
    backend_timeout: Duration,
    cache: Option<ResultCache>,
}

/// One backend's contribution to a retrieval attempt.
struct BackendRun {
    passages: Vec<ScoredPassage>,
    ok: bool,
}

impl HybridRetriever {
    pub fn new(
        vector: Arc<dyn RetrievalBackend>,
        keyword: Arc<dyn RetrievalBackend>,
        graph: Arc<dyn RetrievalBackend>,
    ) -> Self {
        Self {
            vector,
            keyword,
            graph,
            fusion: FusionEngine::default(),
            weights: FusionWeights::default(),
            backend_timeout: Duration::from_millis(10_000),
            cache: None,
        }
    }

    /// Apply `[retrieval]` settings (fusion constants, weights, timeout).
    pub fn configure(mut self, config: &RetrievalConfig) -> Result<Self> {
        config.weights.validate()?;
        self.fusion = FusionEngine::new(config.rrf_k, config.dedup_window)?;
        self.weights = config.weights;
        self.backend_timeout = Duration::from_millis(config.backend_timeout_ms);
        Ok(self)
    }

    pub fn with_weights(mut self, weights: FusionWeights) -> Result<Self> {
        weights.validate()?;
        self.weights = weights;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn weights(&self) -> FusionWeights {
        self.weights
    }

    fn backend(&self, kind: BackendKind) -> &dyn RetrievalBackend {
        match kind {
            BackendKind::Vector => self.vector.as_ref(),
            BackendKind::Keyword => self.keyword.as_ref(),
            BackendKind::Graph => self.graph.as_ref(),
        }
    }

    /// Retrieve at most `top_k` passages with `strategy`.
    pub async fn retrieve(
        &self,
        query: &str,
        strategy: RetrievalStrategy,
        top_k: usize,
    ) -> Result<Vec<ScoredPassage>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        match strategy.single_backend() {
            Some(kind) => {
                let run = self.run_backend(kind, query, top_k).await;
                Ok(run.passages)
            }
            None => self.hybrid(query, top_k).await,
        }
    }

    async fn hybrid(&self, query: &str, top_k: usize) -> Result<Vec<ScoredPassage>> {
        let key = cache_key(query, top_k);
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            tracing::debug!(query, top_k, "hybrid cache hit");
            return Ok(cached);
        }

        let (vector, keyword, graph) = tokio::join!(
            self.run_backend(BackendKind::Vector, query, top_k),
            self.run_backend(BackendKind::Keyword, query, top_k),
            self.run_backend(BackendKind::Graph, query, top_k),
        );
        let degraded = !(vector.ok && keyword.ok && graph.ok);

        let lists = [
            RankedList::new(BackendKind::Vector, vector.passages),
            RankedList::new(BackendKind::Keyword, keyword.passages),
            RankedList::new(BackendKind::Graph, graph.passages),
        ];
        let fused = self.fusion.fuse_weighted(&lists, &self.weights, top_k)?;

        tracing::debug!(
            vector = lists[0].passages.len(),
            keyword = lists[1].passages.len(),
            graph = lists[2].passages.len(),
            fused = fused.len(),
            degraded,
            "hybrid retrieval"
        );

        if let Some(cache) = &self.cache {
            if !degraded && !fused.is_empty() {
                cache.insert(key, fused.clone());
            }
        }
        Ok(fused)
    }

    async fn run_backend(&self, kind: BackendKind, query: &str, top_k: usize) -> BackendRun {
        let backend = self.backend(kind);
        match tokio::time::timeout(self.backend_timeout, backend.search(query, top_k)).await {
            Ok(Ok(mut passages)) => {
                passages.truncate(top_k);
                BackendRun { passages, ok: true }
            }
            Ok(Err(e)) => {
                tracing::warn!(backend = %kind, error = %e, "retrieval backend failed");
                BackendRun {
                    passages: Vec::new(),
                    ok: false,
                }
            }
            Err(_) => {
                tracing::warn!(
                    backend = %kind,
                    timeout_ms = self.backend_timeout.as_millis() as u64,
                    "retrieval backend timed out"
                );
                BackendRun {
                    passages: Vec::new(),
                    ok: false,
                }
            }
        }
    }
}

fn cache_key(query: &str, top_k: usize) -> String {
    format!("{}:hybrid:{}", query, top_k)
}
