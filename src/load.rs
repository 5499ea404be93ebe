//! Graph build feed: load passages and triples, reconcile entities.
//!
//! `hrag load <file.jsonl>` reads one JSON object per line:
//!
//! ```json
//! {"id": "p1", "text": "Alice Smith is CEO of Acme Corp.", "metadata": {"source": "wiki"},
//!  "triples": [["Alice Smith", "CEO_OF", "Acme Corp"]]}
//! ```
//!
//! `id` defaults to a fresh UUID, `metadata` and `triples` to empty. Each
//! passage is stored (and embedded when `[embedding]` is enabled); each
//! triple's endpoints pass through the [`EntityResolver`] before insertion,
//! so `"acme corp."` and `"Acme Corp"` land on one node. The resolver is
//! seeded from entities already in the store. Reloading an existing id
//! replaces the passage along with the triples linked to it.
//!
//! `hrag reconcile` re-resolves every stored triple and folds variants
//! together after the fact.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use hybrid_rag_core::embedding::{embed_one, Embedder};
use hybrid_rag_core::models::{ScoredPassage, Triple};
use hybrid_rag_core::resolver::{EntityResolver, ReconcileReport};
use hybrid_rag_core::store::GraphStore;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Deserialize)]
pub struct LoadRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub triples: Vec<[String; 3]>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub passages: usize,
    pub embedded: usize,
    pub triples: usize,
    pub skipped_lines: usize,
}

/// Store every record from a JSONL reader.
///
/// Malformed lines are logged and skipped; storage errors abort the load.
pub async fn load_records<R: BufRead>(
    store: &SqliteStore,
    resolver: &EntityResolver,
    embedder: Option<&dyn Embedder>,
    reader: R,
) -> Result<LoadReport> {
    let mut report = LoadReport::default();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", line_no + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: LoadRecord = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(line = line_no + 1, error = %e, "skipping malformed record");
                report.skipped_lines += 1;
                continue;
            }
        };
        if record.text.trim().is_empty() {
            tracing::warn!(line = line_no + 1, "skipping record with empty text");
            report.skipped_lines += 1;
            continue;
        }

        let passage = ScoredPassage {
            id: record
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            text: record.text,
            metadata: record.metadata,
            score: 0.0,
        };

        let vector = match embedder {
            Some(e) => match embed_one(e, &passage.text).await {
                Ok(v) => Some(v),
                Err(err) => {
                    tracing::warn!(passage = %passage.id, error = %err, "embedding failed, storing without vector");
                    None
                }
            },
            None => None,
        };
        let model = embedder.map(|e| e.model_name().to_string());
        let embedding = match (&model, &vector) {
            (Some(m), Some(v)) => Some((m.as_str(), v.as_slice())),
            _ => None,
        };
        store.upsert_passage(&passage, embedding).await?;
        report.passages += 1;
        if embedding.is_some() {
            report.embedded += 1;
        }

        for [subject, relation, object] in &record.triples {
            if subject.trim().is_empty() || relation.trim().is_empty() || object.trim().is_empty()
            {
                tracing::warn!(passage = %passage.id, "skipping triple with an empty field");
                continue;
            }
            let triple = resolver.canonical_triple(&Triple::new(
                subject.trim(),
                relation.trim(),
                object.trim(),
            ));
            store.insert_triple(&triple, Some(&passage.id)).await?;
            report.triples += 1;
        }
    }

    Ok(report)
}

async fn open_store(config: &Config) -> Result<SqliteStore> {
    let pool = db::connect(config).await?;
    Ok(SqliteStore::new(pool))
}

async fn seeded_resolver(config: &Config, store: &SqliteStore) -> Result<EntityResolver> {
    let resolver = EntityResolver::new(config.resolver.similarity_threshold)?;
    let seeded = resolver
        .seed_from(store, config.resolver.seed_limit)
        .await?;
    tracing::debug!(seeded, canonical = resolver.len(), "resolver seeded");
    Ok(resolver)
}

/// `hrag load`.
pub async fn run_load(config: &Config, path: &Path) -> Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let store = open_store(config).await?;
    let resolver = seeded_resolver(config, &store).await?;
    let embedder: Option<Arc<dyn Embedder>> = create_embedder(&config.embedding)?;

    let report = load_records(
        &store,
        &resolver,
        embedder.as_deref(),
        std::io::BufReader::new(file),
    )
    .await?;

    tracing::info!(
        passages = report.passages,
        triples = report.triples,
        skipped = report.skipped_lines,
        "load complete"
    );
    println!("Loaded {}", path.display());
    println!("  passages: {}", report.passages);
    println!("  embedded: {}", report.embedded);
    println!("  triples:  {}", report.triples);
    if report.skipped_lines > 0 {
        println!("  skipped:  {}", report.skipped_lines);
    }
    println!("  entities: {}", resolver.len());
    store.pool().close().await;
    Ok(())
}

/// `hrag reconcile`.
pub async fn run_reconcile(config: &Config) -> Result<ReconcileReport> {
    let store = open_store(config).await?;
    let resolver = EntityResolver::new(config.resolver.similarity_threshold)?;
    let report = resolver.reconcile_graph(&store).await?;

    println!("Reconciled {} triples", report.examined);
    println!("  rewritten: {}", report.rewritten);
    println!("  merged:    {}", report.merged);
    println!("  unchanged: {}", report.unchanged);
    println!("  failed:    {}", report.failed);
    store.pool().close().await;
    Ok(report)
}

/// `hrag resolve`: print the canonical form of each name against the
/// entities already in the graph.
pub async fn run_resolve(config: &Config, names: &[String]) -> Result<()> {
    let store = open_store(config).await?;
    let resolver = seeded_resolver(config, &store).await?;
    for name in names {
        println!("{} -> {}", name, resolver.resolve(name));
    }
    store.pool().close().await;
    Ok(())
}
