//! Fuzzy entity resolution for graph construction.
//!
//! The [`EntityResolver`] collapses lexical variants of an entity name
//! ("Acme Corp", "ACME corp.", "Corp Acme") onto one canonical display
//! name before relationships are persisted, and can rewrite an existing
//! graph to canonical names with [`EntityResolver::reconcile_graph`].
//!
//! # Resolution
//!
//! 1. Names are normalized by trimming and lower-casing. An exact hit in
//!    the alias cache returns its canonical form immediately.
//! 2. Otherwise the raw name is scored against every canonical form with a
//!    token-order-insensitive similarity in `[0, 100]`. The best match at
//!    or above the threshold (default 85, inclusive) is adopted and the
//!    alias cached; ties go to the earliest canonical form.
//! 3. With no match the name becomes a new canonical entity.
//!
//! # Concurrency
//!
//! The alias cache sits behind an `RwLock`. Hits take the read lock; a
//! miss re-checks and decides under the write lock, so concurrent calls
//! can never assign two canonical forms to the same alias.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use anyhow::{bail, Result};
use serde::Serialize;

use crate::models::{CanonicalEntity, Triple};
use crate::similarity::token_sort_ratio;
use crate::store::{GraphStore, RewriteOutcome};

/// Minimum similarity for a name to join an existing entity.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 85.0;

/// How many existing entities are read when seeding from a graph.
pub const DEFAULT_SEED_LIMIT: usize = 1000;

/// A similarity function returning a score in `[0, 100]`.
pub type Scorer = fn(&str, &str) -> f64;

#[derive(Default)]
struct AliasCache {
    /// normalized name -> canonical display name
    aliases: HashMap<String, String>,
    /// canonical display names in creation order
    canonical: Vec<String>,
    /// canonical display name -> raw names that resolved to it
    members: HashMap<String, BTreeSet<String>>,
}

/// Counts from one [`EntityResolver::reconcile_graph`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub unchanged: usize,
    pub rewritten: usize,
    pub merged: usize,
    pub failed: usize,
}

pub struct EntityResolver {
    threshold: f64,
    scorer: Scorer,
    cache: RwLock<AliasCache>,
}

impl Default for EntityResolver {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            scorer: token_sort_ratio,
            cache: RwLock::new(AliasCache::default()),
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl EntityResolver {
    /// A resolver using [`token_sort_ratio`] and the given threshold.
    pub fn new(threshold: f64) -> Result<Self> {
        Self::with_scorer(threshold, token_sort_ratio)
    }

    pub fn with_scorer(threshold: f64, scorer: Scorer) -> Result<Self> {
        if !(0.0..=100.0).contains(&threshold) {
            bail!("similarity threshold must be in [0, 100], got {}", threshold);
        }
        Ok(Self {
            threshold,
            scorer,
            cache: RwLock::new(AliasCache::default()),
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Seed the cache with up to `limit` entity names already in `store`.
    ///
    /// Names are resolved in the store's first-seen order, so variants
    /// already persisted collapse onto the earliest form. Returns the
    /// number of names read.
    pub async fn seed_from(&self, store: &dyn GraphStore, limit: usize) -> Result<usize> {
        let names = store.list_entities(limit).await?;
        for name in &names {
            self.resolve(name);
        }
        tracing::debug!(
            seeded = names.len(),
            canonical = self.len(),
            "entity resolver seeded from graph"
        );
        Ok(names.len())
    }

    /// Resolve a raw entity name to its canonical form.
    ///
    /// Blank names are returned trimmed and never cached.
    pub fn resolve(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        let key = normalize(raw);
        if key.is_empty() {
            return trimmed.to_string();
        }

        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(canonical) = cache.aliases.get(&key) {
                return canonical.clone();
            }
        }

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(canonical) = cache.aliases.get(&key) {
            return canonical.clone();
        }

        let mut best: Option<(usize, f64)> = None;
        for (idx, candidate) in cache.canonical.iter().enumerate() {
            let score = (self.scorer)(trimmed, candidate);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((idx, score));
            }
        }

        let canonical = match best {
            Some((idx, score)) if score >= self.threshold => {
                let canonical = cache.canonical[idx].clone();
                tracing::debug!(alias = trimmed, canonical = %canonical, score, "entity alias merged");
                canonical
            }
            _ => {
                let canonical = trimmed.to_string();
                cache.canonical.push(canonical.clone());
                canonical
            }
        };

        cache.aliases.insert(key, canonical.clone());
        cache
            .members
            .entry(canonical.clone())
            .or_default()
            .insert(trimmed.to_string());
        canonical
    }

    /// Number of canonical entities.
    pub fn len(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .canonical
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A snapshot of every canonical entity and its aliases.
    pub fn canonical_entities(&self) -> Vec<CanonicalEntity> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache
            .canonical
            .iter()
            .map(|name| CanonicalEntity {
                canonical_name: name.clone(),
                aliases: cache.members.get(name).cloned().unwrap_or_default(),
            })
            .collect()
    }

    /// Resolve both endpoints of a triple.
    pub fn canonical_triple(&self, triple: &Triple) -> Triple {
        Triple {
            subject: self.resolve(&triple.subject),
            relation: triple.relation.clone(),
            object: self.resolve(&triple.object),
        }
    }

    /// Rewrite every persisted triple to canonical endpoints.
    ///
    /// Triples whose endpoints already resolve to themselves are left
    /// alone. A failure to rewrite one triple is logged and counted; a
    /// failure to list triples aborts with an error.
    pub async fn reconcile_graph(&self, store: &dyn GraphStore) -> Result<ReconcileReport> {
        let triples = store.list_triples().await?;
        let mut report = ReconcileReport {
            examined: triples.len(),
            ..ReconcileReport::default()
        };

        for triple in &triples {
            let canonical = self.canonical_triple(triple);
            if &canonical == triple {
                report.unchanged += 1;
                continue;
            }
            match store.rewrite_triple(triple, &canonical).await {
                Ok(RewriteOutcome::Rewritten) => report.rewritten += 1,
                Ok(RewriteOutcome::Merged) => report.merged += 1,
                Err(e) => {
                    tracing::warn!(triple = %triple, error = %e, "failed to rewrite triple; skipping");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            examined = report.examined,
            unchanged = report.unchanged,
            rewritten = report.rewritten,
            merged = report.merged,
            failed = report.failed,
            "graph reconciliation finished"
        );
        Ok(report)
    }
}
