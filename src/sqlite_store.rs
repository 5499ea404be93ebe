//! SQLite-backed retrieval backends and graph store.
//!
//! One database holds all three retrieval sources:
//!
//! | Backend | Table(s) | Score |
//! |---------|----------|-------|
//! | keyword | `passages_fts` (FTS5) | `-rank` (BM25, higher is better) |
//! | vector | `passage_vectors` (BLOB) | cosine similarity, brute force |
//! | graph | `triples` joined to `passages` | matching-triple count |
//!
//! [`SqliteStore`] owns the pool and implements [`GraphStore`] for entity
//! resolution. [`SqliteBackend`] adapts it to one [`RetrievalBackend`] slot.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::sync::Arc;

use hybrid_rag_core::embedding::{blob_to_vec, cosine_similarity, embed_one, vec_to_blob, Embedder};
use hybrid_rag_core::models::{BackendKind, ScoredPassage, Triple};
use hybrid_rag_core::store::{
    query_terms, rank_by_triples, GraphStore, LinkedTriple, RetrievalBackend, RewriteOutcome,
};

/// Row counts for `hrag stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub passages: i64,
    pub vectors: i64,
    pub triples: i64,
    pub entities: i64,
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or replace a passage, its FTS row, and optionally its vector.
    pub async fn upsert_passage(
        &self,
        passage: &ScoredPassage,
        embedding: Option<(&str, &[f32])>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let metadata_json = serde_json::to_string(&passage.metadata)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO passages (id, text, metadata_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                metadata_json = excluded.metadata_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&passage.id)
        .bind(&passage.text)
        .bind(&metadata_json)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM passages_fts WHERE passage_id = ?")
            .bind(&passage.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO passages_fts (passage_id, text) VALUES (?, ?)")
            .bind(&passage.id)
            .bind(&passage.text)
            .execute(&mut *tx)
            .await?;

        // a reloaded passage drops the triples and vector of its old text
        sqlx::query("DELETE FROM triples WHERE passage_id = ?")
            .bind(&passage.id)
            .execute(&mut *tx)
            .await?;

        if let Some((model, vector)) = embedding {
            sqlx::query(
                r#"
                INSERT INTO passage_vectors (passage_id, model, dims, embedding)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(passage_id) DO UPDATE SET
                    model = excluded.model,
                    dims = excluded.dims,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&passage.id)
            .bind(model)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query("DELETE FROM passage_vectors WHERE passage_id = ?")
                .bind(&passage.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &'static str| {
            let pool = self.pool.clone();
            async move {
                sqlx::query_scalar::<_, i64>(sql)
                    .fetch_one(&pool)
                    .await
                    .with_context(|| format!("stats query failed: {}", sql))
            }
        };
        Ok(StoreStats {
            passages: count("SELECT COUNT(*) FROM passages").await?,
            vectors: count("SELECT COUNT(*) FROM passage_vectors").await?,
            triples: count("SELECT COUNT(*) FROM triples").await?,
            entities: count(
                "SELECT COUNT(*) FROM (SELECT subject AS name FROM triples UNION SELECT object FROM triples)",
            )
            .await?,
        })
    }

    async fn keyword_search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredPassage>> {
        let terms = query_terms(query);
        if terms.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let fts_query = terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR ");

        let rows = sqlx::query(
            r#"
            SELECT p.id, p.text, p.metadata_json, passages_fts.rank AS rank
            FROM passages_fts
            JOIN passages p ON p.id = passages_fts.passage_id
            WHERE passages_fts MATCH ?
            ORDER BY passages_fts.rank
            LIMIT ?
            "#,
        )
        .bind(&fts_query)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                passage_from_row(row, -rank)
            })
            .collect())
    }

    async fn vector_search(&self, query_vec: &[f32], top_k: usize) -> Result<Vec<ScoredPassage>> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.text, p.metadata_json, v.embedding
            FROM passage_vectors v
            JOIN passages p ON p.id = v.passage_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<ScoredPassage> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
                passage_from_row(row, similarity)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn graph_search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredPassage>> {
        let rows = sqlx::query(
            r#"
            SELECT t.subject, t.relation, t.object, p.id, p.text, p.metadata_json
            FROM triples t
            JOIN passages p ON p.id = t.passage_id
            ORDER BY t.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let linked: Vec<LinkedTriple> = rows
            .iter()
            .map(|row| LinkedTriple {
                triple: Triple::new(
                    row.get::<String, _>("subject"),
                    row.get::<String, _>("relation"),
                    row.get::<String, _>("object"),
                ),
                passage: passage_from_row(row, 0.0),
            })
            .collect();

        Ok(rank_by_triples(query, &linked, top_k))
    }
}

fn passage_from_row(row: &sqlx::sqlite::SqliteRow, score: f64) -> ScoredPassage {
    let metadata_json: String = row.get("metadata_json");
    let metadata: BTreeMap<String, String> =
        serde_json::from_str(&metadata_json).unwrap_or_default();
    ScoredPassage {
        id: row.get("id"),
        text: row.get("text"),
        metadata,
        score,
    }
}

#[async_trait]
impl GraphStore for SqliteStore {
    async fn list_entities(&self, limit: usize) -> Result<Vec<String>> {
        // Subjects sort before objects of the same row.
        let rows = sqlx::query(
            r#"
            SELECT name FROM (
                SELECT subject AS name, MIN(id) * 2 AS first_seen FROM triples GROUP BY subject
                UNION ALL
                SELECT object AS name, MIN(id) * 2 + 1 AS first_seen FROM triples GROUP BY object
            )
            GROUP BY name
            ORDER BY MIN(first_seen)
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("name")).collect())
    }

    async fn list_triples(&self) -> Result<Vec<Triple>> {
        let rows = sqlx::query(
            r#"
            SELECT subject, relation, object
            FROM triples
            GROUP BY subject, relation, object
            ORDER BY MIN(id)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                Triple::new(
                    row.get::<String, _>("subject"),
                    row.get::<String, _>("relation"),
                    row.get::<String, _>("object"),
                )
            })
            .collect())
    }

    async fn insert_triple(&self, triple: &Triple, passage_id: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO triples (subject, relation, object, passage_id, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&triple.subject)
        .bind(&triple.relation)
        .bind(&triple.object)
        .bind(passage_id.unwrap_or(""))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Identical `old` and `new` is a no-op reported as `Rewritten`.
    async fn rewrite_triple(&self, old: &Triple, new: &Triple) -> Result<RewriteOutcome> {
        if old == new {
            return Ok(RewriteOutcome::Rewritten);
        }
        let mut tx = self.pool.begin().await?;

        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM triples WHERE subject = ? AND relation = ? AND object = ?",
        )
        .bind(&new.subject)
        .bind(&new.relation)
        .bind(&new.object)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO triples (subject, relation, object, passage_id, created_at)
            SELECT ?, ?, ?, passage_id, created_at
            FROM triples
            WHERE subject = ? AND relation = ? AND object = ?
            ORDER BY id
            "#,
        )
        .bind(&new.subject)
        .bind(&new.relation)
        .bind(&new.object)
        .bind(&old.subject)
        .bind(&old.relation)
        .bind(&old.object)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM triples WHERE subject = ? AND relation = ? AND object = ?")
            .bind(&old.subject)
            .bind(&old.relation)
            .bind(&old.object)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(if exists {
            RewriteOutcome::Merged
        } else {
            RewriteOutcome::Rewritten
        })
    }
}

/// One retrieval slot served from a shared [`SqliteStore`].
pub struct SqliteBackend {
    store: Arc<SqliteStore>,
    kind: BackendKind,
    embedder: Option<Arc<dyn Embedder>>,
}

impl SqliteBackend {
    pub fn keyword(store: Arc<SqliteStore>) -> Self {
        Self {
            store,
            kind: BackendKind::Keyword,
            embedder: None,
        }
    }

    pub fn graph(store: Arc<SqliteStore>) -> Self {
        Self {
            store,
            kind: BackendKind::Graph,
            embedder: None,
        }
    }

    /// Without an embedder the vector slot always returns nothing.
    pub fn vector(store: Arc<SqliteStore>, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self {
            store,
            kind: BackendKind::Vector,
            embedder,
        }
    }
}

#[async_trait]
impl RetrievalBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredPassage>> {
        match self.kind {
            BackendKind::Keyword => self.store.keyword_search(query, top_k).await,
            BackendKind::Graph => self.store.graph_search(query, top_k).await,
            BackendKind::Vector => match &self.embedder {
                Some(embedder) => {
                    let query_vec = embed_one(embedder.as_ref(), query).await?;
                    self.store.vector_search(&query_vec, top_k).await
                }
                None => Ok(Vec::new()),
            },
        }
    }
}
