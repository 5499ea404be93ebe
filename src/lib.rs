//! # Hybrid RAG
//!
//! Self-correcting hybrid retrieval over a local SQLite knowledge base.
//!
//! A query is answered by fusing three retrieval sources (vector, graph,
//! keyword) with weighted Reciprocal Rank Fusion, grading the result with a
//! language-model judge, retrying with other strategies when the grade is
//! low, and synthesizing an answer from the best result seen. At build time
//! an entity resolver folds spelling variants of the same entity into one
//! graph node.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────────────────┐
//!   query ─────────▶ │         Orchestrator          │ ─────▶ answer
//!                    │ plan → retrieve → review → …  │
//!                    └──────┬───────────────┬────────┘
//!                           ▼               ▼
//!                  ┌────────────────┐  ┌──────────┐
//!                  │ HybridRetriever│  │ChatClient│  judge / synth / planner
//!                  │  + RRF fusion  │  └──────────┘
//!                  └──┬─────┬─────┬─┘
//!                     ▼     ▼     ▼
//!                 vector keyword graph   ◀── SQLite (BLOBs, FTS5, triples)
//!                                                ▲
//!   JSONL ──▶ load ──▶ EntityResolver ───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hrag init                          # create database
//! hrag load corpus.jsonl             # passages + triples
//! hrag reconcile                     # fold entity variants
//! hrag query "Who is the CEO of Acme?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite retrieval backends and graph store |
//! | [`embedding`] | Ollama / OpenAI embedding clients |
//! | [`llm`] | Chat client for planner, judge, and synthesizer |
//! | [`traits`] | Model-role traits used by the orchestrator |
//! | [`retriever`] | Strategy-driven retrieval with fusion and caching |
//! | [`orchestrator`] | Self-correcting query state machine |
//! | [`load`] | Graph build feed and reconciliation |
//! | [`query`] | `query` / `search` commands |
//! | [`stats`] | Database summary |
//!
//! Pure algorithms (fusion, similarity, judge parsing, entity resolution)
//! live in the `hybrid-rag-core` crate.

pub mod config;
pub mod db;
pub mod embedding;
pub mod http;
pub mod llm;
pub mod load;
pub mod logging;
pub mod migrate;
pub mod orchestrator;
pub mod query;
pub mod retriever;
pub mod sqlite_store;
pub mod stats;
pub mod traits;
