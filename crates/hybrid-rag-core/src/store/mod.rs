//! Retrieval backend and graph store abstractions.
//!
//! [`RetrievalBackend`] is the query-time seam: vector, graph, and keyword
//! implementations each return best-first passages for a query.
//! [`GraphStore`] is the build-time seam used by entity resolution to scan
//! and rewrite persisted triples.
//!
//! Implementations must be `Send + Sync`; the hybrid retriever calls the
//! three backends concurrently.
//!
//! | Implementation | Module |
//! |----------------|--------|
//! | In-memory keyword / vector / graph | [`memory`] |
//! | SQLite (FTS5, vector BLOBs, triples) | `hybrid_rag::sqlite_store` |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;

use crate::models::{BackendKind, ScoredPassage, Triple};

/// A ranked retrieval source.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Which of the three fusion slots this backend fills.
    fn kind(&self) -> BackendKind;

    /// Return at most `top_k` passages, best first.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredPassage>>;
}

/// What happened when a triple was rewritten to canonical endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteOutcome {
    /// The canonical triple did not exist; the old one was renamed.
    Rewritten,
    /// The canonical triple already existed; the old one was folded into it.
    Merged,
}

/// Persistent `(subject, relation, object)` storage.
///
/// A triple may be linked to the passage it was extracted from so that
/// graph search can return passage text.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Distinct entity names (subjects and objects) in first-seen order.
    async fn list_entities(&self, limit: usize) -> Result<Vec<String>>;

    /// Every distinct triple in first-seen order.
    async fn list_triples(&self) -> Result<Vec<Triple>>;

    /// Persist a triple, optionally linked to its source passage.
    /// Inserting an identical link twice is a no-op.
    async fn insert_triple(&self, triple: &Triple, passage_id: Option<&str>) -> Result<()>;

    /// Replace every occurrence of `old` with `new`, carrying passage links
    /// over and never duplicating an existing `new` triple.
    async fn rewrite_triple(&self, old: &Triple, new: &Triple) -> Result<RewriteOutcome>;
}

/// Shortest query term, or graph endpoint, that takes part in matching.
pub const MIN_TERM_CHARS: usize = 2;

/// Lower-cased alphanumeric query terms of at least [`MIN_TERM_CHARS`]
/// characters.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for t in query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TERM_CHARS)
    {
        if !terms.iter().any(|existing| existing == t) {
            terms.push(t.to_string());
        }
    }
    terms
}

/// A triple linked to the passage it came from.
#[derive(Debug, Clone)]
pub struct LinkedTriple {
    pub triple: Triple,
    pub passage: ScoredPassage,
}

/// Rank passages by how many of their triples touch a query term.
///
/// A triple matches when its subject or object contains a term, or a
/// multi-word endpoint is fully contained in the lower-cased query.
/// Endpoints shorter than [`MIN_TERM_CHARS`] never match on their own. The
/// passage score is the number of matching triples; ties keep first-seen
/// order.
pub fn rank_by_triples(query: &str, linked: &[LinkedTriple], top_k: usize) -> Vec<ScoredPassage> {
    let terms = query_terms(query);
    if terms.is_empty() || top_k == 0 {
        return Vec::new();
    }
    let query_lower = query.to_lowercase();

    let endpoint_matches = |endpoint: &str| {
        let e = endpoint.trim().to_lowercase();
        e.chars().count() >= MIN_TERM_CHARS
            && (query_lower.contains(e.as_str()) || terms.iter().any(|t| e.contains(t.as_str())))
    };

    let mut order: Vec<String> = Vec::new();
    let mut hits: HashMap<String, (ScoredPassage, f64)> = HashMap::new();
    for lt in linked {
        if !(endpoint_matches(&lt.triple.subject) || endpoint_matches(&lt.triple.object)) {
            continue;
        }
        let entry = hits.entry(lt.passage.id.clone()).or_insert_with(|| {
            order.push(lt.passage.id.clone());
            (lt.passage.clone(), 0.0)
        });
        entry.1 += 1.0;
    }

    let mut ranked: Vec<(usize, ScoredPassage)> = order
        .iter()
        .enumerate()
        .filter_map(|(i, id)| hits.remove(id).map(|(p, s)| (i, p.with_score(s))))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.score
            .partial_cmp(&a.1.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    ranked.into_iter().take(top_k).map(|(_, p)| p).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linked(s: &str, r: &str, o: &str, pid: &str) -> LinkedTriple {
        LinkedTriple {
            triple: Triple::new(s, r, o),
            passage: ScoredPassage::new(pid, format!("text of {}", pid), 0.0),
        }
    }

    #[test]
    fn test_query_terms_dedup_and_filter() {
        assert_eq!(
            query_terms("Who is the CEO of Acme? acme, a firm"),
            vec!["who", "is", "the", "ceo", "of", "acme", "firm"]
        );
        assert!(query_terms("? ! a").is_empty());
    }

    #[test]
    fn test_rank_by_triples_counts_matches() {
        let triples = vec![
            linked("Alice", "CEO_OF", "Acme", "p1"),
            linked("Bob", "WORKS_ON", "Phoenix", "p2"),
            linked("Acme", "OWNS", "Phoenix", "p2"),
            linked("Acme", "FOUNDED_IN", "1999", "p2"),
        ];
        let ranked = rank_by_triples("What does Acme own?", &triples, 5);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, "p2");
        assert_eq!(ranked[0].score, 2.0);
        assert_eq!(ranked[1].id, "p1");
    }

    #[test]
    fn test_rank_by_triples_multiword_endpoint() {
        let triples = vec![linked("Project Phoenix", "LED_BY", "Bob", "p1")];
        let ranked = rank_by_triples("status of project phoenix", &triples, 5);
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn test_rank_by_triples_ignores_single_char_endpoints() {
        let triples = vec![
            linked("A", "RELATED_TO", "1", "p1"),
            linked("Acme", "OWNS", "B", "p2"),
        ];
        let ranked = rank_by_triples("What does Acme own in area 51?", &triples, 5);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, "p2");
    }

    #[test]
    fn test_rank_by_triples_no_match() {
        let triples = vec![linked("Alice", "CEO_OF", "Acme", "p1")];
        assert!(rank_by_triples("weather today", &triples, 5).is_empty());
        assert!(rank_by_triples("Alice", &triples, 0).is_empty());
    }
}
