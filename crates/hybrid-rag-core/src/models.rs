//! Core data types shared by the fusion engine, resolver, and orchestrator.
//!
//! | Type | Produced by | Consumed by |
//! |------|-------------|-------------|
//! | [`ScoredPassage`] | retrieval backends | fusion, judge, synthesis |
//! | [`RetrievalStrategy`] | planner / strategy rotation | hybrid retriever |
//! | [`FusionWeights`] | configuration | fusion |
//! | [`IterationRecord`] | orchestrator | query outcome (audit trail) |
//! | [`Triple`] | graph build feed | graph store, entity reconciliation |
//! | [`CanonicalEntity`] | entity resolver | build-time reporting |

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// A passage returned by a retrieval backend.
///
/// Backends return passages best-first. The `score` is backend-internal
/// (cosine similarity, BM25, match count) until fusion replaces it with
/// the summed RRF score; scores from different backends are never compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPassage {
    /// Backend-assigned identifier. Not the fusion identity.
    pub id: String,
    /// Passage text.
    pub text: String,
    /// Free-form key/value metadata (source file, title, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Relevance score.
    #[serde(default)]
    pub score: f64,
}

impl ScoredPassage {
    pub fn new(id: impl Into<String>, text: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: BTreeMap::new(),
            score,
        }
    }

    /// Returns a copy with a different score.
    pub fn with_score(&self, score: f64) -> Self {
        Self {
            score,
            ..self.clone()
        }
    }
}

/// One of the three retrieval backends.
///
/// The declaration order is the fusion tie-break priority:
/// vector, then keyword, then graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Vector,
    Keyword,
    Graph,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Vector => "vector",
            BackendKind::Keyword => "keyword",
            BackendKind::Graph => "graph",
        }
    }

    /// Lower is preferred when fused scores tie.
    pub fn priority(&self) -> u8 {
        match self {
            BackendKind::Vector => 0,
            BackendKind::Keyword => 1,
            BackendKind::Graph => 2,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which backends service a retrieval attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// All three backends, fused with weighted RRF.
    Hybrid,
    VectorOnly,
    GraphOnly,
    KeywordOnly,
}

impl RetrievalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStrategy::Hybrid => "hybrid",
            RetrievalStrategy::VectorOnly => "vector_only",
            RetrievalStrategy::GraphOnly => "graph_only",
            RetrievalStrategy::KeywordOnly => "keyword_only",
        }
    }

    /// The single backend used by an `*Only` strategy, `None` for hybrid.
    pub fn single_backend(&self) -> Option<BackendKind> {
        match self {
            RetrievalStrategy::Hybrid => None,
            RetrievalStrategy::VectorOnly => Some(BackendKind::Vector),
            RetrievalStrategy::GraphOnly => Some(BackendKind::Graph),
            RetrievalStrategy::KeywordOnly => Some(BackendKind::Keyword),
        }
    }
}

impl fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hybrid" => Ok(RetrievalStrategy::Hybrid),
            "vector" | "vector_only" => Ok(RetrievalStrategy::VectorOnly),
            "graph" | "graph_only" => Ok(RetrievalStrategy::GraphOnly),
            "keyword" | "keyword_only" | "bm25" | "bm25_only" => Ok(RetrievalStrategy::KeywordOnly),
            other => bail!(
                "Unknown retrieval strategy: {}. Use hybrid, vector_only, graph_only, or keyword_only.",
                other
            ),
        }
    }
}

/// Per-backend fusion weights. Default `0.6 / 0.1 / 0.3`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub vector: f64,
    pub graph: f64,
    pub keyword: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.6,
            graph: 0.1,
            keyword: 0.3,
        }
    }
}

impl FusionWeights {
    pub fn weight_for(&self, kind: BackendKind) -> f64 {
        match kind {
            BackendKind::Vector => self.vector,
            BackendKind::Graph => self.graph,
            BackendKind::Keyword => self.keyword,
        }
    }

    /// Reject negative or non-finite weights and an all-zero triple.
    pub fn validate(&self) -> Result<()> {
        for (name, w) in [
            ("vector", self.vector),
            ("graph", self.graph),
            ("keyword", self.keyword),
        ] {
            if !w.is_finite() || w < 0.0 {
                bail!("fusion weight '{}' must be a finite value >= 0, got {}", name, w);
            }
        }
        if self.vector + self.graph + self.keyword <= 0.0 {
            bail!("fusion weights must not all be zero");
        }
        Ok(())
    }
}

/// The audit record of one orchestrator iteration.
#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    /// 1-based iteration number.
    pub iteration: usize,
    pub strategy: RetrievalStrategy,
    pub passages: Vec<ScoredPassage>,
    pub quality: f64,
    pub feedback: String,
}

/// A `(subject, relation, object)` relationship in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub relation: String,
    pub object: String,
}

impl Triple {
    pub fn new(
        subject: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            relation: relation.into(),
            object: object.into(),
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})-[{}]->({})", self.subject, self.relation, self.object)
    }
}

/// A canonical entity name and every raw variant that resolved to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalEntity {
    pub canonical_name: String,
    pub aliases: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse_accepts_aliases() {
        assert_eq!(
            "bm25_only".parse::<RetrievalStrategy>().unwrap(),
            RetrievalStrategy::KeywordOnly
        );
        assert_eq!(
            " Vector ".parse::<RetrievalStrategy>().unwrap(),
            RetrievalStrategy::VectorOnly
        );
        assert!("semantic".parse::<RetrievalStrategy>().is_err());
    }

    #[test]
    fn test_strategy_single_backend() {
        assert_eq!(RetrievalStrategy::Hybrid.single_backend(), None);
        assert_eq!(
            RetrievalStrategy::GraphOnly.single_backend(),
            Some(BackendKind::Graph)
        );
    }

    #[test]
    fn test_backend_priority_order() {
        assert!(BackendKind::Vector.priority() < BackendKind::Keyword.priority());
        assert!(BackendKind::Keyword.priority() < BackendKind::Graph.priority());
    }

    #[test]
    fn test_weights_validation() {
        assert!(FusionWeights::default().validate().is_ok());
        let negative = FusionWeights {
            vector: -0.1,
            ..FusionWeights::default()
        };
        assert!(negative.validate().is_err());
        let zero = FusionWeights {
            vector: 0.0,
            graph: 0.0,
            keyword: 0.0,
        };
        assert!(zero.validate().is_err());
        let nan = FusionWeights {
            graph: f64::NAN,
            ..FusionWeights::default()
        };
        assert!(nan.validate().is_err());
    }
}
