//! Weighted Reciprocal Rank Fusion with content-based deduplication.
//!
//! The fusion engine combines ranked lists from heterogeneous backends
//! without ever comparing their raw scores; only rank position matters.
//!
//! # Algorithm
//!
//! 1. A passage at 0-indexed rank `r` in a list with weight `w` contributes
//!    `w / (K + r + 1)` (default `K = 60`).
//! 2. Contributions are summed per backend-assigned passage id.
//! 3. Passages are grouped by content key (the first `dedup_window`
//!    characters of the text, trimmed). A group's score is the sum of its
//!    members' scores; its representative is the member with the highest
//!    individual score, so the richest metadata survives.
//! 4. Groups are sorted by score (desc), backend priority
//!    (vector > keyword > graph), then first-insertion order.
//! 5. The first `top_k` representatives are returned with the group score.

use anyhow::{bail, Result};
use std::collections::HashMap;

use crate::models::{BackendKind, FusionWeights, ScoredPassage};

/// RRF smoothing constant.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Number of leading characters that identify a passage's content.
pub const DEFAULT_DEDUP_WINDOW: usize = 200;

/// One backend's ranked, best-first result list.
#[derive(Debug, Clone)]
pub struct RankedList {
    pub backend: BackendKind,
    pub passages: Vec<ScoredPassage>,
}

impl RankedList {
    pub fn new(backend: BackendKind, passages: Vec<ScoredPassage>) -> Self {
        Self { backend, passages }
    }
}

/// Stateless fusion configuration.
#[derive(Debug, Clone)]
pub struct FusionEngine {
    rrf_k: f64,
    dedup_window: usize,
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

struct Candidate {
    passage: ScoredPassage,
    score: f64,
    priority: u8,
    order: usize,
}

struct Group {
    members: Vec<usize>,
}

impl FusionEngine {
    pub fn new(rrf_k: f64, dedup_window: usize) -> Result<Self> {
        if !rrf_k.is_finite() || rrf_k < 0.0 {
            bail!("rrf_k must be a finite value >= 0, got {}", rrf_k);
        }
        if dedup_window == 0 {
            bail!("dedup_window must be >= 1");
        }
        Ok(Self {
            rrf_k,
            dedup_window,
        })
    }

    pub fn rrf_k(&self) -> f64 {
        self.rrf_k
    }

    pub fn dedup_window(&self) -> usize {
        self.dedup_window
    }

    /// The RRF contribution of the passage at 0-indexed `rank`.
    pub fn contribution(&self, weight: f64, rank: usize) -> f64 {
        weight / (self.rrf_k + rank as f64 + 1.0)
    }

    /// Fuse `lists` using one weight per list, in the same order.
    ///
    /// # Errors
    ///
    /// Fails fast when the weight count does not match the list count or a
    /// weight is negative / non-finite. Empty lists and `top_k == 0` are
    /// not errors.
    pub fn fuse(
        &self,
        lists: &[RankedList],
        weights: &[f64],
        top_k: usize,
    ) -> Result<Vec<ScoredPassage>> {
        if lists.len() != weights.len() {
            bail!(
                "fusion requires one weight per result list ({} lists, {} weights)",
                lists.len(),
                weights.len()
            );
        }
        if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            bail!("fusion weights must be finite and >= 0, got {}", w);
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        let mut by_id: HashMap<String, usize> = HashMap::new();

        for (list, &weight) in lists.iter().zip(weights) {
            let priority = list.backend.priority();
            for (rank, passage) in list.passages.iter().enumerate() {
                let rrf = self.contribution(weight, rank);
                match by_id.get(&passage.id) {
                    Some(&idx) => {
                        let c = &mut candidates[idx];
                        c.score += rrf;
                        c.priority = c.priority.min(priority);
                    }
                    None => {
                        let order = candidates.len();
                        by_id.insert(passage.id.clone(), order);
                        candidates.push(Candidate {
                            passage: passage.clone(),
                            score: rrf,
                            priority,
                            order,
                        });
                    }
                }
            }
        }

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut groups: Vec<Group> = Vec::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();
        for (idx, c) in candidates.iter().enumerate() {
            let key = content_key(&c.passage.text, self.dedup_window);
            match by_key.get(&key) {
                Some(&g) => groups[g].members.push(idx),
                None => {
                    by_key.insert(key, groups.len());
                    groups.push(Group { members: vec![idx] });
                }
            }
        }

        struct Fused<'a> {
            representative: &'a Candidate,
            score: f64,
            priority: u8,
            order: usize,
        }

        let mut fused: Vec<Fused> = groups
            .iter()
            .map(|g| {
                let mut rep = &candidates[g.members[0]];
                let mut score = 0.0;
                let mut priority = rep.priority;
                for &m in &g.members {
                    let c = &candidates[m];
                    score += c.score;
                    priority = priority.min(c.priority);
                    if c.score > rep.score {
                        rep = c;
                    }
                }
                Fused {
                    representative: rep,
                    score,
                    priority,
                    order: candidates[g.members[0]].order,
                }
            })
            .collect();

        tracing::debug!(
            candidates = candidates.len(),
            unique = fused.len(),
            duplicates_removed = candidates.len() - fused.len(),
            "rrf fusion deduplicated results"
        );

        fused.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.priority.cmp(&b.priority))
                .then(a.order.cmp(&b.order))
        });

        Ok(fused
            .into_iter()
            .take(top_k)
            .map(|f| f.representative.passage.with_score(f.score))
            .collect())
    }

    /// Fuse vector/graph/keyword lists with a [`FusionWeights`] triple.
    pub fn fuse_weighted(
        &self,
        lists: &[RankedList],
        weights: &FusionWeights,
        top_k: usize,
    ) -> Result<Vec<ScoredPassage>> {
        let per_list: Vec<f64> = lists.iter().map(|l| weights.weight_for(l.backend)).collect();
        self.fuse(lists, &per_list, top_k)
    }
}

/// The deduplication key: the first `window` characters, trimmed.
pub fn content_key(text: &str, window: usize) -> String {
    let prefix: String = text.chars().take(window).collect();
    prefix.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: &str, text: &str) -> ScoredPassage {
        ScoredPassage::new(id, text, 1.0)
    }

    fn scenario_lists() -> Vec<RankedList> {
        vec![
            RankedList::new(
                BackendKind::Vector,
                vec![p("a", "Alpha passage"), p("b", "Beta passage")],
            ),
            RankedList::new(BackendKind::Graph, vec![]),
            RankedList::new(
                BackendKind::Keyword,
                vec![p("b", "Beta passage"), p("c", "Gamma passage")],
            ),
        ]
    }

    fn ids(results: &[ScoredPassage]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_three_backend_scenario() {
        let engine = FusionEngine::default();
        let fused = engine.fuse(&scenario_lists(), &[0.6, 0.1, 0.3], 10).unwrap();

        assert_eq!(ids(&fused), vec!["b", "a", "c"]);
        let b = 0.6 / 62.0 + 0.3 / 61.0;
        let a = 0.6 / 61.0;
        let c = 0.3 / 62.0;
        assert!((fused[0].score - b).abs() < 1e-12);
        assert!((fused[1].score - a).abs() < 1e-12);
        assert!((fused[2].score - c).abs() < 1e-12);
    }

    #[test]
    fn test_fuse_weighted_matches_positional_weights() {
        let engine = FusionEngine::default();
        let positional = engine.fuse(&scenario_lists(), &[0.6, 0.1, 0.3], 10).unwrap();
        let weighted = engine
            .fuse_weighted(&scenario_lists(), &FusionWeights::default(), 10)
            .unwrap();
        assert_eq!(positional, weighted);
    }

    #[test]
    fn test_deterministic_across_calls() {
        let engine = FusionEngine::default();
        let lists = vec![
            RankedList::new(
                BackendKind::Vector,
                (0..20).map(|i| p(&format!("v{}", i), &format!("text {}", i))).collect(),
            ),
            RankedList::new(
                BackendKind::Keyword,
                (0..20).map(|i| p(&format!("k{}", i), &format!("text {}", 19 - i))).collect(),
            ),
        ];
        let first = engine.fuse(&lists, &[0.5, 0.5], 15).unwrap();
        for _ in 0..10 {
            assert_eq!(engine.fuse(&lists, &[0.5, 0.5], 15).unwrap(), first);
        }
    }

    #[test]
    fn test_dedup_collapses_different_ids_with_same_prefix() {
        let engine = FusionEngine::default();
        let shared = "x".repeat(200);
        let mut vector_copy = p("vec-1", &format!("{}vector tail", shared));
        vector_copy.metadata.insert("source".into(), "vector".into());
        let keyword_copy = p("kw-9", &format!("{}keyword tail", shared));
        let lists = vec![
            RankedList::new(BackendKind::Vector, vec![vector_copy]),
            RankedList::new(
                BackendKind::Keyword,
                vec![p("other", "unrelated"), keyword_copy],
            ),
        ];

        let fused = engine.fuse(&lists, &[0.6, 0.3], 10).unwrap();

        assert_eq!(fused.len(), 2);
        let merged = fused.iter().find(|r| r.id == "vec-1").unwrap();
        assert!((merged.score - (0.6 / 61.0 + 0.3 / 62.0)).abs() < 1e-12);
        assert_eq!(merged.metadata.get("source").map(String::as_str), Some("vector"));
        assert!(fused.iter().all(|r| r.id != "kw-9"));
    }

    #[test]
    fn test_dedup_key_trims_whitespace() {
        assert_eq!(content_key("  hello  ", 200), "hello");
        assert_eq!(content_key("abcdef", 3), "abc");
        let engine = FusionEngine::default();
        let lists = vec![
            RankedList::new(BackendKind::Vector, vec![p("1", "same text\n")]),
            RankedList::new(BackendKind::Graph, vec![p("2", "  same text")]),
        ];
        let fused = engine.fuse(&lists, &[0.5, 0.5], 5).unwrap();
        assert_eq!(fused.len(), 1);
    }

    #[test]
    fn test_dedup_window_counts_characters_not_bytes() {
        let a = format!("{}A", "é".repeat(5));
        let b = format!("{}B", "é".repeat(5));
        assert_eq!(content_key(&a, 5), content_key(&b, 5));
        assert_ne!(content_key(&a, 6), content_key(&b, 6));
    }

    #[test]
    fn test_weight_monotonicity_for_single_backend_item() {
        let engine = FusionEngine::default();
        let lists = vec![
            RankedList::new(
                BackendKind::Vector,
                vec![p("v1", "v one"), p("v2", "v two"), p("v3", "v three")],
            ),
            RankedList::new(BackendKind::Graph, vec![p("g1", "graph only")]),
        ];
        let mut last_rank = usize::MAX;
        for graph_weight in [0.0, 0.005, 0.01, 0.02, 0.5, 1.0] {
            let fused = engine.fuse(&lists, &[0.6, graph_weight], 10).unwrap();
            let rank = fused.iter().position(|r| r.id == "g1").unwrap();
            assert!(rank <= last_rank, "rank got worse at weight {}", graph_weight);
            last_rank = rank;
        }
        assert_eq!(last_rank, 0);
    }

    #[test]
    fn test_ties_prefer_vector_then_keyword_then_graph() {
        let engine = FusionEngine::default();
        let lists = vec![
            RankedList::new(BackendKind::Graph, vec![p("g", "graph")]),
            RankedList::new(BackendKind::Keyword, vec![p("k", "keyword")]),
            RankedList::new(BackendKind::Vector, vec![p("v", "vector")]),
        ];
        let fused = engine.fuse(&lists, &[0.5, 0.5, 0.5], 3).unwrap();
        assert_eq!(ids(&fused), vec!["v", "k", "g"]);
    }

    #[test]
    fn test_ties_within_backend_keep_insertion_order() {
        let engine = FusionEngine::default();
        let lists = vec![
            RankedList::new(BackendKind::Vector, vec![p("v1", "first")]),
            RankedList::new(BackendKind::Vector, vec![p("v2", "second")]),
        ];
        let fused = engine.fuse(&lists, &[0.5, 0.5], 2).unwrap();
        assert_eq!(ids(&fused), vec!["v1", "v2"]);
    }

    #[test]
    fn test_empty_inputs_and_zero_top_k() {
        let engine = FusionEngine::default();
        let empty = vec![
            RankedList::new(BackendKind::Vector, vec![]),
            RankedList::new(BackendKind::Graph, vec![]),
            RankedList::new(BackendKind::Keyword, vec![]),
        ];
        assert!(engine.fuse(&empty, &[0.6, 0.1, 0.3], 5).unwrap().is_empty());
        assert!(engine.fuse(&scenario_lists(), &[0.6, 0.1, 0.3], 0).unwrap().is_empty());
        assert!(engine.fuse(&[], &[], 5).unwrap().is_empty());
    }

    #[test]
    fn test_top_k_truncates() {
        let engine = FusionEngine::default();
        let fused = engine.fuse(&scenario_lists(), &[0.6, 0.1, 0.3], 2).unwrap();
        assert_eq!(ids(&fused), vec!["b", "a"]);
    }

    #[test]
    fn test_weight_count_mismatch_fails() {
        let engine = FusionEngine::default();
        let err = engine.fuse(&scenario_lists(), &[0.6, 0.4], 5).unwrap_err();
        assert!(err.to_string().contains("one weight per result list"));
    }

    #[test]
    fn test_negative_weight_fails() {
        let engine = FusionEngine::default();
        assert!(engine.fuse(&scenario_lists(), &[0.6, -0.1, 0.3], 5).is_err());
    }

    #[test]
    fn test_scores_never_negative() {
        let engine = FusionEngine::default();
        let fused = engine.fuse(&scenario_lists(), &[0.0, 0.0, 0.0], 10).unwrap();
        assert!(fused.iter().all(|r| r.score >= 0.0));
    }

    #[test]
    fn test_engine_rejects_zero_window() {
        assert!(FusionEngine::new(60.0, 0).is_err());
        assert!(FusionEngine::new(f64::NAN, 200).is_err());
        let engine = FusionEngine::new(10.0, 50).unwrap();
        assert!((engine.contribution(1.0, 0) - 1.0 / 11.0).abs() < 1e-12);
    }
}
