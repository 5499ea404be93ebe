//! In-memory backends for tests and embedders.
//!
//! State lives in `HashMap`/`Vec` behind `std::sync::RwLock`.
//!
//! - [`InMemoryKeywordIndex`] — term-overlap scoring (no BM25 statistics).
//! - [`InMemoryVectorIndex`] — brute-force cosine over stored vectors.
//! - [`InMemoryGraph`] — triples linked to passages; implements both
//!   [`GraphStore`] and the graph [`RetrievalBackend`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::{cosine_similarity, embed_one, Embedder};
use crate::models::{BackendKind, ScoredPassage, Triple};

use super::{query_terms, rank_by_triples, GraphStore, LinkedTriple, RetrievalBackend, RewriteOutcome};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn sort_best_first(candidates: &mut [ScoredPassage]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

// ============ Keyword ============

/// Keyword backend scoring passages by the number of distinct query terms
/// they contain.
#[derive(Default)]
pub struct InMemoryKeywordIndex {
    passages: RwLock<Vec<ScoredPassage>>,
}

impl InMemoryKeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a passage by id.
    pub fn add(&self, passage: ScoredPassage) -> Result<()> {
        let mut passages = write(&self.passages)?;
        passages.retain(|p| p.id != passage.id);
        passages.push(passage);
        Ok(())
    }
}

#[async_trait]
impl RetrievalBackend for InMemoryKeywordIndex {
    fn kind(&self) -> BackendKind {
        BackendKind::Keyword
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredPassage>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let passages = read(&self.passages)?;
        let mut candidates: Vec<ScoredPassage> = passages
            .iter()
            .filter_map(|p| {
                let text = p.text.to_lowercase();
                let matches = terms.iter().filter(|t| text.contains(t.as_str())).count();
                (matches > 0).then(|| p.with_score(matches as f64))
            })
            .collect();
        sort_best_first(&mut candidates);
        candidates.truncate(top_k);
        Ok(candidates)
    }
}

// ============ Vector ============

/// Vector backend embedding passages on insert and queries on search.
pub struct InMemoryVectorIndex {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<(ScoredPassage, Vec<f32>)>>,
}

impl InMemoryVectorIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Embed and insert (or replace) a passage.
    pub async fn add(&self, passage: ScoredPassage) -> Result<()> {
        let vector = embed_one(self.embedder.as_ref(), &passage.text).await?;
        let mut entries = write(&self.entries)?;
        entries.retain(|(p, _)| p.id != passage.id);
        entries.push((passage, vector));
        Ok(())
    }
}

#[async_trait]
impl RetrievalBackend for InMemoryVectorIndex {
    fn kind(&self) -> BackendKind {
        BackendKind::Vector
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredPassage>> {
        let query_vec = embed_one(self.embedder.as_ref(), query).await?;
        let entries = read(&self.entries)?;
        let mut candidates: Vec<ScoredPassage> = entries
            .iter()
            .map(|(p, v)| p.with_score(cosine_similarity(&query_vec, v) as f64))
            .collect();
        sort_best_first(&mut candidates);
        candidates.truncate(top_k);
        Ok(candidates)
    }
}

// ============ Graph ============

#[derive(Clone)]
struct StoredTriple {
    triple: Triple,
    passage_id: Option<String>,
}

/// Triple store with passage links.
#[derive(Default)]
pub struct InMemoryGraph {
    triples: RwLock<Vec<StoredTriple>>,
    passages: RwLock<HashMap<String, ScoredPassage>>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register passage text that triples can link to.
    pub fn add_passage(&self, passage: ScoredPassage) -> Result<()> {
        write(&self.passages)?.insert(passage.id.clone(), passage);
        Ok(())
    }

    /// Number of stored triple links (including duplicates across passages).
    pub fn link_count(&self) -> Result<usize> {
        Ok(read(&self.triples)?.len())
    }
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    async fn list_entities(&self, limit: usize) -> Result<Vec<String>> {
        let triples = read(&self.triples)?;
        let mut names: Vec<String> = Vec::new();
        for st in triples.iter() {
            for name in [&st.triple.subject, &st.triple.object] {
                if names.len() >= limit {
                    return Ok(names);
                }
                if !names.iter().any(|n| n == name) {
                    names.push(name.clone());
                }
            }
        }
        Ok(names)
    }

    async fn list_triples(&self) -> Result<Vec<Triple>> {
        let triples = read(&self.triples)?;
        let mut distinct: Vec<Triple> = Vec::new();
        for st in triples.iter() {
            if !distinct.contains(&st.triple) {
                distinct.push(st.triple.clone());
            }
        }
        Ok(distinct)
    }

    async fn insert_triple(&self, triple: &Triple, passage_id: Option<&str>) -> Result<()> {
        let mut triples = write(&self.triples)?;
        let exists = triples
            .iter()
            .any(|st| &st.triple == triple && st.passage_id.as_deref() == passage_id);
        if !exists {
            triples.push(StoredTriple {
                triple: triple.clone(),
                passage_id: passage_id.map(str::to_string),
            });
        }
        Ok(())
    }

    async fn rewrite_triple(&self, old: &Triple, new: &Triple) -> Result<RewriteOutcome> {
        let mut triples = write(&self.triples)?;
        let outcome = if triples.iter().any(|st| &st.triple == new) {
            RewriteOutcome::Merged
        } else {
            RewriteOutcome::Rewritten
        };
        let moved: Vec<Option<String>> = triples
            .iter()
            .filter(|st| &st.triple == old)
            .map(|st| st.passage_id.clone())
            .collect();
        triples.retain(|st| &st.triple != old);
        for passage_id in moved {
            let exists = triples
                .iter()
                .any(|st| &st.triple == new && st.passage_id == passage_id);
            if !exists {
                triples.push(StoredTriple {
                    triple: new.clone(),
                    passage_id,
                });
            }
        }
        Ok(outcome)
    }
}

#[async_trait]
impl RetrievalBackend for InMemoryGraph {
    fn kind(&self) -> BackendKind {
        BackendKind::Graph
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredPassage>> {
        let triples = read(&self.triples)?;
        let passages = read(&self.passages)?;
        let linked: Vec<LinkedTriple> = triples
            .iter()
            .filter_map(|st| {
                let pid = st.passage_id.as_ref()?;
                passages.get(pid).map(|p| LinkedTriple {
                    triple: st.triple.clone(),
                    passage: p.clone(),
                })
            })
            .collect();
        Ok(rank_by_triples(query, &linked, top_k))
    }
}
