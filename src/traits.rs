//! Language-model roles used by the orchestrator.
//!
//! The orchestrator never talks to a model directly. It calls three
//! narrow async traits, so production code can back them with
//! [`crate::llm::ChatClient`] and tests can script them:
//!
//! ```text
//!            ┌───────────┐
//!  query ──▶ │  Planner  │ ──▶ RetrievalStrategy (iteration 1 only)
//!            └───────────┘
//!            ┌──────────────┐
//!  previews ▶│ QualityJudge │ ──▶ "SCORE: 0.7\nFEEDBACK: ..."
//!            └──────────────┘
//!            ┌───────────────────┐
//!  passages ▶│ AnswerSynthesizer │ ──▶ final answer text
//!            └───────────────────┘
//! ```
//!
//! Every method may fail. The orchestrator recovers locally: a planner
//! failure means hybrid retrieval, a judge failure means a neutral score,
//! and a synthesis failure means a fixed apology that names the query.

use anyhow::Result;
use async_trait::async_trait;

use hybrid_rag_core::models::{RetrievalStrategy, ScoredPassage};

// ═══════════════════════════════════════════════════════════════════════
// Planner
// ═══════════════════════════════════════════════════════════════════════

/// Chooses the strategy for the first retrieval attempt.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, query: &str) -> Result<RetrievalStrategy>;
}

// ═══════════════════════════════════════════════════════════════════════
// QualityJudge
// ═══════════════════════════════════════════════════════════════════════

/// Grades whether retrieved passages can answer a query.
///
/// Returns the judge's raw reply. The orchestrator extracts the score and
/// feedback with [`hybrid_rag_core::judge::parse_judgement`], so a reply
/// without a `SCORE:` line degrades to the neutral score instead of failing.
#[async_trait]
pub trait QualityJudge: Send + Sync {
    /// `previews` are the bounded leading passages, at most a few hundred
    /// characters each.
    async fn evaluate(&self, query: &str, previews: &[String]) -> Result<String>;
}

// ═══════════════════════════════════════════════════════════════════════
// AnswerSynthesizer
// ═══════════════════════════════════════════════════════════════════════

/// Writes the final answer from the best passages.
#[async_trait]
pub trait AnswerSynthesizer: Send + Sync {
    /// `context` is already truncated to the budget the orchestrator picked.
    async fn synthesize(&self, query: &str, context: &[ScoredPassage]) -> Result<String>;
}
