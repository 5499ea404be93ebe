//! # Hybrid RAG Core
//!
//! Runtime-agnostic logic for Hybrid RAG: passage models, weighted
//! Reciprocal Rank Fusion, judge-response parsing, fuzzy entity resolution,
//! and the backend/graph-store traits with in-memory implementations.
//!
//! This crate contains no tokio, sqlx, HTTP clients, or filesystem I/O.
//! The application crate supplies concrete backends, model clients, and
//! the orchestrator that drives these pieces per query.

pub mod embedding;
pub mod fusion;
pub mod judge;
pub mod models;
pub mod resolver;
pub mod similarity;
pub mod store;
