//! Query-time wiring and the `query` / `search` commands.
//!
//! [`build_retriever`] assembles the three SQLite-backed backends behind a
//! [`HybridRetriever`] with its result cache; [`build_orchestrator`] adds
//! the chat client in all three model roles.

use anyhow::{bail, Result};
use std::sync::Arc;

use hybrid_rag_core::models::RetrievalStrategy;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::llm::ChatClient;
use crate::orchestrator::{Orchestrator, OrchestratorSettings, QueryOutcome, QueryRequest};
use crate::retriever::{new_cache, HybridRetriever};
use crate::sqlite_store::{SqliteBackend, SqliteStore};

/// Build a configured retriever over the database in `[db]`.
pub async fn build_retriever(config: &Config) -> Result<(Arc<SqliteStore>, HybridRetriever)> {
    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteStore::new(pool));
    let embedder = create_embedder(&config.embedding)?;
    if embedder.is_none() {
        tracing::debug!("embeddings disabled, vector backend returns no results");
    }

    let retriever = HybridRetriever::new(
        Arc::new(SqliteBackend::vector(store.clone(), embedder)),
        Arc::new(SqliteBackend::keyword(store.clone())),
        Arc::new(SqliteBackend::graph(store.clone())),
    )
    .configure(&config.retrieval)?
    .with_cache(new_cache(config.retrieval.cache_capacity));

    Ok((store, retriever))
}

pub async fn build_orchestrator(config: &Config) -> Result<(Arc<SqliteStore>, Orchestrator)> {
    let (store, retriever) = build_retriever(config).await?;
    let chat = Arc::new(ChatClient::from_config(&config.llm)?);
    let orchestrator = Orchestrator::new(
        Arc::new(retriever),
        chat.clone(),
        chat.clone(),
        OrchestratorSettings::from_config(config),
    )
    .with_planner(chat);
    Ok((store, orchestrator))
}

/// `hrag query`.
pub async fn run_query(config: &Config, request: QueryRequest, json: bool) -> Result<QueryOutcome> {
    if request.query.trim().is_empty() {
        bail!("query must not be empty");
    }
    let (store, orchestrator) = build_orchestrator(config).await?;
    let outcome = orchestrator.run(request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome.answer);
        println!();
        println!(
            "  iterations: {}  quality: {:.2}  strategies: {}{}",
            outcome.iterations_used,
            outcome.final_quality,
            outcome
                .strategy_trail
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" → "),
            if outcome.timed_out { "  (timed out)" } else { "" }
        );
    }

    store.pool().close().await;
    Ok(outcome)
}

/// `hrag search`: one retrieval attempt, no judge and no synthesis.
pub async fn run_search(
    config: &Config,
    query: &str,
    strategy: RetrievalStrategy,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    let top_k = limit.unwrap_or(config.retrieval.top_k);
    if top_k == 0 {
        bail!("--limit must be >= 1");
    }

    let (store, retriever) = build_retriever(config).await?;
    let passages = retriever.retrieve(query, strategy, top_k).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&passages)?);
    } else if passages.is_empty() {
        println!("No results.");
    } else {
        for (i, p) in passages.iter().enumerate() {
            let excerpt: String = p.text.chars().take(240).collect();
            println!("{}. [{:.4}] {}", i + 1, p.score, p.id);
            println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
            for (k, v) in &p.metadata {
                println!("    {}: {}", k, v);
            }
            println!();
        }
    }

    store.pool().close().await;
    Ok(())
}
