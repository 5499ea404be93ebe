//! Self-correcting retrieval loop.
//!
//! The orchestrator is a small state machine over an explicit
//! [`QueryState`]:
//!
//! ```text
//!   Planning ──▶ Retrieving ──▶ Reviewing ──▶ Analyzing ──▶ Done
//!                    ▲              │
//!                    └──────────────┘  quality < threshold
//!                                      and iterations left
//! ```
//!
//! | State | Work | Next |
//! |-------|------|------|
//! | `Planning` | planner picks the first strategy (skipped by default) | `Retrieving` |
//! | `Retrieving` | hybrid fusion or one backend; iteration += 1 | `Reviewing` |
//! | `Reviewing` | judge grades previews; best result tracked | `Analyzing` or `Retrieving` |
//! | `Analyzing` | synthesize from the best-ever passages | `Done` |
//!
//! Retries rotate through `[VectorOnly, KeywordOnly, GraphOnly]` indexed by
//! `(iteration - 1) mod 3`, so a query that never satisfies the judge in
//! three iterations runs `Hybrid, VectorOnly, KeywordOnly`.
//!
//! Collaborator failures never abort a query: a failed planner means
//! hybrid, a failed judge means the neutral score, a failed synthesis
//! means a fixed message naming the query. An optional deadline bounds the
//! whole run. Expiry during the loop analyzes the best result so far;
//! expiry during synthesis answers with the synthesis failure message.
//! Either way the outcome is flagged `timed_out`.

use anyhow::{bail, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use hybrid_rag_core::judge::{self, Judgement};
use hybrid_rag_core::models::{IterationRecord, RetrievalStrategy, ScoredPassage};

use crate::config::Config;
use crate::retriever::HybridRetriever;
use crate::traits::{AnswerSynthesizer, Planner, QualityJudge};

/// Answer returned when nothing good enough was retrieved.
pub const INSUFFICIENT_ANSWER: &str = "I couldn't find relevant information to answer your question. The retrieved documents don't contain information about this topic.";

/// Retry strategies, indexed by `(iteration - 1) mod 3`.
pub const RETRY_ROTATION: [RetrievalStrategy; 3] = [
    RetrievalStrategy::VectorOnly,
    RetrievalStrategy::KeywordOnly,
    RetrievalStrategy::GraphOnly,
];

/// Below this best quality the synthesizer gets a smaller context.
const LOW_QUALITY: f64 = 0.3;

/// The strategy used after `iteration` (1-based) fell short.
pub fn next_strategy(iteration: usize) -> RetrievalStrategy {
    RETRY_ROTATION[iteration.saturating_sub(1) % RETRY_ROTATION.len()]
}

/// `(max passages, max chars per passage)` handed to the synthesizer.
pub fn context_budget(best_quality: f64) -> (usize, usize) {
    if best_quality < LOW_QUALITY {
        (3, 300)
    } else {
        (5, 1000)
    }
}

pub fn synthesis_failure_answer(query: &str) -> String {
    format!(
        "I encountered an issue generating the answer. The retrieved documents may not contain sufficient information about: {}",
        query
    )
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub top_k: usize,
    pub max_iterations: usize,
    pub quality_threshold: f64,
    pub skip_planning: bool,
    pub answer_floor: f64,
    pub preview_docs: usize,
    pub preview_chars: usize,
    pub deadline: Option<Duration>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_iterations: 3,
            quality_threshold: 0.5,
            skip_planning: true,
            answer_floor: 0.1,
            preview_docs: judge::DEFAULT_PREVIEW_DOCS,
            preview_chars: judge::DEFAULT_PREVIEW_CHARS,
            deadline: None,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        let o = &config.orchestrator;
        Self {
            top_k: config.retrieval.top_k,
            max_iterations: o.max_iterations,
            quality_threshold: o.quality_threshold,
            skip_planning: o.skip_planning,
            answer_floor: o.answer_floor,
            preview_docs: o.preview_docs,
            preview_chars: o.preview_chars,
            deadline: o.deadline_secs.map(Duration::from_secs),
        }
    }
}

/// One question plus optional per-query overrides.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    /// Strategy for the first iteration; retries still rotate.
    pub strategy_override: Option<RetrievalStrategy>,
    pub max_iterations: Option<usize>,
    pub skip_planning: Option<bool>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            strategy_override: None,
            max_iterations: None,
            skip_planning: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum State {
    Planning,
    Retrieving {
        strategy: RetrievalStrategy,
    },
    Reviewing {
        strategy: RetrievalStrategy,
        passages: Vec<ScoredPassage>,
    },
    Analyzing,
    Done,
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Planning => "planning",
            State::Retrieving { .. } => "retrieving",
            State::Reviewing { .. } => "reviewing",
            State::Analyzing => "analyzing",
            State::Done => "done",
        }
    }
}

/// Everything one query accumulates while it runs.
#[derive(Debug, Clone)]
pub struct QueryState {
    pub query: String,
    pub iteration: usize,
    pub max_iterations: usize,
    pub best_quality: f64,
    pub best_passages: Vec<ScoredPassage>,
    pub feedback: Option<String>,
    pub strategy_trail: Vec<RetrievalStrategy>,
    pub iterations: Vec<IterationRecord>,
    pub answer: Option<String>,
    pub timed_out: bool,
}

impl QueryState {
    pub fn new(query: impl Into<String>, max_iterations: usize) -> Self {
        Self {
            query: query.into(),
            iteration: 0,
            max_iterations,
            best_quality: 0.0,
            best_passages: Vec::new(),
            feedback: None,
            strategy_trail: Vec::new(),
            iterations: Vec::new(),
            answer: None,
            timed_out: false,
        }
    }

    /// Record a graded iteration. Only a strictly better quality replaces
    /// the best passages.
    pub fn record(
        &mut self,
        strategy: RetrievalStrategy,
        passages: Vec<ScoredPassage>,
        judgement: Judgement,
    ) {
        if judgement.score > self.best_quality {
            self.best_quality = judgement.score;
            self.best_passages = passages.clone();
        }
        self.feedback = Some(judgement.feedback.clone());
        self.iterations.push(IterationRecord {
            iteration: self.iteration,
            strategy,
            passages,
            quality: judgement.score,
            feedback: judgement.feedback,
        });
    }

    pub fn into_outcome(self) -> QueryOutcome {
        QueryOutcome {
            answer: self
                .answer
                .unwrap_or_else(|| INSUFFICIENT_ANSWER.to_string()),
            iterations_used: self.iteration,
            final_quality: self.best_quality,
            strategy_trail: self.strategy_trail,
            iterations: self.iterations,
            timed_out: self.timed_out,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub answer: String,
    pub iterations_used: usize,
    /// Best quality seen across all iterations.
    pub final_quality: f64,
    pub strategy_trail: Vec<RetrievalStrategy>,
    pub iterations: Vec<IterationRecord>,
    pub timed_out: bool,
}

pub struct Orchestrator {
    retriever: Arc<HybridRetriever>,
    judge: Arc<dyn QualityJudge>,
    synthesizer: Arc<dyn AnswerSynthesizer>,
    planner: Option<Arc<dyn Planner>>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        judge: Arc<dyn QualityJudge>,
        synthesizer: Arc<dyn AnswerSynthesizer>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            retriever,
            judge,
            synthesizer,
            planner: None,
            settings,
        }
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Answer one query. Only an invalid request is an error.
    pub async fn run(&self, request: QueryRequest) -> Result<QueryOutcome> {
        let max_iterations = request
            .max_iterations
            .unwrap_or(self.settings.max_iterations);
        if max_iterations == 0 {
            bail!("max_iterations must be >= 1");
        }
        if request.query.trim().is_empty() {
            bail!("query must not be empty");
        }

        let skip_planning = request.skip_planning.unwrap_or(self.settings.skip_planning);
        let mut qs = QueryState::new(request.query.clone(), max_iterations);
        let mut state = match request.strategy_override {
            Some(strategy) => State::Retrieving { strategy },
            None if skip_planning => State::Retrieving {
                strategy: RetrievalStrategy::Hybrid,
            },
            None => State::Planning,
        };
        let deadline = self
            .settings
            .deadline
            .map(|d| tokio::time::Instant::now() + d);

        loop {
            tracing::debug!(state = state.name(), iteration = qs.iteration, "orchestrator step");
            state = match state {
                State::Done => break,
                State::Analyzing => {
                    match deadline {
                        Some(at) => {
                            let analyzed = tokio::time::timeout_at(at, self.analyze(&mut qs)).await;
                            if analyzed.is_err() {
                                tracing::warn!(
                                    best_quality = qs.best_quality,
                                    "query deadline reached during synthesis"
                                );
                                qs.timed_out = true;
                                qs.answer = Some(synthesis_failure_answer(&qs.query));
                            }
                        }
                        None => self.analyze(&mut qs).await,
                    }
                    State::Done
                }
                other => match deadline {
                    Some(at) => {
                        let stepped = tokio::time::timeout_at(at, self.step(other, &mut qs)).await;
                        match stepped {
                            Ok(next) => next,
                            Err(_) => {
                                tracing::warn!(
                                    iteration = qs.iteration,
                                    best_quality = qs.best_quality,
                                    "query deadline reached, analyzing best result so far"
                                );
                                qs.timed_out = true;
                                State::Analyzing
                            }
                        }
                    }
                    None => self.step(other, &mut qs).await,
                },
            };
        }

        let outcome = qs.into_outcome();
        tracing::info!(
            iterations = outcome.iterations_used,
            quality = outcome.final_quality,
            timed_out = outcome.timed_out,
            "query finished"
        );
        Ok(outcome)
    }

    async fn step(&self, state: State, qs: &mut QueryState) -> State {
        match state {
            State::Planning => self.plan(qs).await,
            State::Retrieving { strategy } => self.retrieve(qs, strategy).await,
            State::Reviewing { strategy, passages } => self.review(qs, strategy, passages).await,
            State::Analyzing | State::Done => state,
        }
    }

    async fn plan(&self, qs: &QueryState) -> State {
        let strategy = match &self.planner {
            Some(planner) => match planner.plan(&qs.query).await {
                Ok(strategy) => strategy,
                Err(e) => {
                    tracing::warn!(error = %e, "planner failed, using hybrid retrieval");
                    RetrievalStrategy::Hybrid
                }
            },
            None => RetrievalStrategy::Hybrid,
        };
        tracing::info!(strategy = %strategy, "planned initial strategy");
        State::Retrieving { strategy }
    }

    async fn retrieve(&self, qs: &mut QueryState, strategy: RetrievalStrategy) -> State {
        let passages = match self
            .retriever
            .retrieve(&qs.query, strategy, self.settings.top_k)
            .await
        {
            Ok(passages) => passages,
            Err(e) => {
                tracing::warn!(strategy = %strategy, error = %e, "retrieval failed");
                Vec::new()
            }
        };
        qs.iteration += 1;
        qs.strategy_trail.push(strategy);
        tracing::info!(
            iteration = qs.iteration,
            strategy = %strategy,
            passages = passages.len(),
            "retrieved"
        );
        State::Reviewing { strategy, passages }
    }

    async fn review(
        &self,
        qs: &mut QueryState,
        strategy: RetrievalStrategy,
        passages: Vec<ScoredPassage>,
    ) -> State {
        let judgement = if passages.is_empty() {
            Judgement::empty_retrieval()
        } else {
            let previews = judge::previews(
                &passages,
                self.settings.preview_docs,
                self.settings.preview_chars,
            );
            match self.judge.evaluate(&qs.query, &previews).await {
                Ok(reply) => judge::parse_judgement(&reply),
                Err(e) => {
                    tracing::warn!(error = %e, "quality judge failed, using neutral score");
                    Judgement::neutral()
                }
            }
        };

        let quality = judgement.score;
        tracing::info!(
            iteration = qs.iteration,
            strategy = %strategy,
            quality,
            feedback = %judgement.feedback,
            "reviewed"
        );
        qs.record(strategy, passages, judgement);

        if quality >= self.settings.quality_threshold || qs.iteration >= qs.max_iterations {
            State::Analyzing
        } else {
            State::Retrieving {
                strategy: next_strategy(qs.iteration),
            }
        }
    }

    async fn analyze(&self, qs: &mut QueryState) {
        if qs.best_passages.is_empty() || qs.best_quality < self.settings.answer_floor {
            tracing::info!(
                best_quality = qs.best_quality,
                "insufficient retrieval quality, skipping synthesis"
            );
            qs.answer = Some(INSUFFICIENT_ANSWER.to_string());
            return;
        }

        let (max_docs, max_chars) = context_budget(qs.best_quality);
        let context: Vec<ScoredPassage> = qs
            .best_passages
            .iter()
            .take(max_docs)
            .map(|p| ScoredPassage {
                text: p.text.chars().take(max_chars).collect(),
                ..p.clone()
            })
            .collect();

        let answer = match self.synthesizer.synthesize(&qs.query, &context).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(error = %e, "answer synthesis failed");
                synthesis_failure_answer(&qs.query)
            }
        };
        qs.answer = Some(answer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hybrid_rag_core::models::BackendKind;
    use hybrid_rag_core::store::RetrievalBackend;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct StaticBackend {
        kind: BackendKind,
        passages: Vec<ScoredPassage>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl RetrievalBackend for StaticBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        async fn search(&self, _query: &str, top_k: usize) -> Result<Vec<ScoredPassage>> {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            Ok(self.passages.iter().take(top_k).cloned().collect())
        }
    }

    fn backend(kind: BackendKind, ids: &[&str]) -> Arc<dyn RetrievalBackend> {
        Arc::new(StaticBackend {
            kind,
            passages: ids
                .iter()
                .map(|id| ScoredPassage::new(*id, format!("{} {}", id, "x".repeat(400)), 1.0))
                .collect(),
            delay: None,
        })
    }

    fn retriever(vector: &[&str], keyword: &[&str], graph: &[&str]) -> Arc<HybridRetriever> {
        Arc::new(HybridRetriever::new(
            backend(BackendKind::Vector, vector),
            backend(BackendKind::Keyword, keyword),
            backend(BackendKind::Graph, graph),
        ))
    }

    struct ScriptedJudge {
        replies: Mutex<VecDeque<Result<String>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedJudge {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            })
        }

        fn scores(scores: &[f64]) -> Arc<Self> {
            Self::new(
                scores
                    .iter()
                    .map(|s| Ok(format!("SCORE: {}\nFEEDBACK: try harder", s)))
                    .collect(),
            )
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl QualityJudge for ScriptedJudge {
        async fn evaluate(&self, _query: &str, previews: &[String]) -> Result<String> {
            assert!(previews.len() <= judge::DEFAULT_PREVIEW_DOCS);
            assert!(previews
                .iter()
                .all(|p| p.chars().count() <= judge::DEFAULT_PREVIEW_CHARS));
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("SCORE: 0.0".to_string()))
        }
    }

    struct RecordingSynthesizer {
        fail: bool,
        delay: Option<Duration>,
        contexts: Mutex<Vec<Vec<ScoredPassage>>>,
    }

    impl RecordingSynthesizer {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                fail: false,
                delay: None,
                contexts: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                fail: true,
                delay: None,
                contexts: Mutex::new(Vec::new()),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                fail: false,
                delay: Some(delay),
                contexts: Mutex::new(Vec::new()),
            })
        }

        fn contexts(&self) -> Vec<Vec<ScoredPassage>> {
            self.contexts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AnswerSynthesizer for RecordingSynthesizer {
        async fn synthesize(&self, _query: &str, context: &[ScoredPassage]) -> Result<String> {
            self.contexts.lock().unwrap().push(context.to_vec());
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            if self.fail {
                anyhow::bail!("model overloaded");
            }
            Ok(format!("answer from {} sources", context.len()))
        }
    }

    struct FixedPlanner(Option<RetrievalStrategy>);

    #[async_trait]
    impl Planner for FixedPlanner {
        async fn plan(&self, _query: &str) -> Result<RetrievalStrategy> {
            self.0
                .ok_or_else(|| anyhow::anyhow!("planner model unavailable"))
        }
    }

    fn orchestrator(
        retriever: Arc<HybridRetriever>,
        judge: Arc<ScriptedJudge>,
        synth: Arc<RecordingSynthesizer>,
    ) -> Orchestrator {
        Orchestrator::new(retriever, judge, synth, OrchestratorSettings::default())
    }

    #[test]
    fn test_next_strategy_rotation() {
        assert_eq!(next_strategy(1), RetrievalStrategy::VectorOnly);
        assert_eq!(next_strategy(2), RetrievalStrategy::KeywordOnly);
        assert_eq!(next_strategy(3), RetrievalStrategy::GraphOnly);
        assert_eq!(next_strategy(4), RetrievalStrategy::VectorOnly);
    }

    #[test]
    fn test_context_budget() {
        assert_eq!(context_budget(0.29), (3, 300));
        assert_eq!(context_budget(0.3), (5, 1000));
    }

    #[test]
    fn test_best_tracking_is_strict() {
        let mut qs = QueryState::new("q", 3);
        let a = vec![ScoredPassage::new("a", "a", 1.0)];
        let b = vec![ScoredPassage::new("b", "b", 1.0)];
        qs.iteration = 1;
        qs.record(
            RetrievalStrategy::Hybrid,
            a.clone(),
            Judgement {
                score: 0.4,
                feedback: "f".into(),
            },
        );
        qs.iteration = 2;
        qs.record(
            RetrievalStrategy::VectorOnly,
            b,
            Judgement {
                score: 0.4,
                feedback: "f".into(),
            },
        );
        assert_eq!(qs.best_quality, 0.4);
        assert_eq!(qs.best_passages, a);
        assert_eq!(qs.iterations.len(), 2);
    }

    #[tokio::test]
    async fn test_three_low_quality_iterations() {
        let judge = ScriptedJudge::scores(&[0.2, 0.2, 0.2]);
        let synth = RecordingSynthesizer::ok();
        let orch = orchestrator(
            retriever(&["v1"], &["k1"], &["g1"]),
            judge.clone(),
            synth.clone(),
        );

        let outcome = orch.run(QueryRequest::new("who founded acme?")).await.unwrap();
        assert_eq!(
            outcome.strategy_trail,
            vec![
                RetrievalStrategy::Hybrid,
                RetrievalStrategy::VectorOnly,
                RetrievalStrategy::KeywordOnly
            ]
        );
        assert_eq!(outcome.iterations_used, 3);
        assert_eq!(outcome.final_quality, 0.2);
        assert_eq!(judge.calls(), 3);
        assert!(!outcome.timed_out);

        // low best quality shrinks the synthesis context
        let contexts = synth.contexts();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].len(), 3);
        assert!(contexts[0].iter().all(|p| p.text.chars().count() == 300));
        assert_eq!(outcome.answer, "answer from 3 sources");
    }

    #[tokio::test]
    async fn test_best_ever_passages_are_synthesized() {
        let judge = ScriptedJudge::scores(&[0.2, 0.45, 0.3]);
        let synth = RecordingSynthesizer::ok();
        let orch = orchestrator(
            retriever(&["v1"], &["k1"], &["g1"]),
            judge,
            synth.clone(),
        );

        let outcome = orch.run(QueryRequest::new("q")).await.unwrap();
        assert_eq!(outcome.final_quality, 0.45);
        assert_eq!(outcome.iterations.len(), 3);
        assert_eq!(outcome.iterations[2].quality, 0.3);

        // iteration 2 was VectorOnly
        let contexts = synth.contexts();
        assert_eq!(contexts[0].len(), 1);
        assert_eq!(contexts[0][0].id, "v1");
        assert_eq!(contexts[0][0].text.chars().count(), 403);
    }

    #[tokio::test]
    async fn test_empty_retrieval_skips_judge_and_synthesis() {
        let judge = ScriptedJudge::scores(&[]);
        let synth = RecordingSynthesizer::ok();
        let orch = orchestrator(retriever(&[], &[], &[]), judge.clone(), synth.clone());

        let outcome = orch.run(QueryRequest::new("q")).await.unwrap();
        assert_eq!(outcome.final_quality, 0.0);
        assert_eq!(outcome.iterations_used, 3);
        assert_eq!(outcome.answer, INSUFFICIENT_ANSWER);
        assert_eq!(judge.calls(), 0);
        assert!(synth.contexts().is_empty());
        assert!(outcome
            .iterations
            .iter()
            .all(|r| r.feedback == judge::NO_DOCUMENTS_FEEDBACK));
    }

    #[tokio::test]
    async fn test_good_quality_stops_early() {
        let judge = ScriptedJudge::scores(&[0.9]);
        let synth = RecordingSynthesizer::ok();
        let orch = orchestrator(retriever(&["v1"], &["k1"], &[]), judge.clone(), synth.clone());

        let outcome = orch.run(QueryRequest::new("q")).await.unwrap();
        assert_eq!(outcome.iterations_used, 1);
        assert_eq!(outcome.strategy_trail, vec![RetrievalStrategy::Hybrid]);
        assert_eq!(synth.contexts()[0].len(), 2);
        assert!(synth.contexts()[0]
            .iter()
            .all(|p| p.text.chars().count() == 403));
    }

    #[tokio::test]
    async fn test_judge_failure_is_neutral() {
        let judge = ScriptedJudge::new(vec![Err(anyhow::anyhow!("judge timeout"))]);
        let orch = orchestrator(
            retriever(&["v1"], &[], &[]),
            judge,
            RecordingSynthesizer::ok(),
        );

        let outcome = orch.run(QueryRequest::new("q")).await.unwrap();
        assert_eq!(outcome.final_quality, judge::NEUTRAL_SCORE);
        assert_eq!(outcome.iterations_used, 1);
        assert_eq!(outcome.iterations[0].feedback, judge::DEFAULT_FEEDBACK);
    }

    #[tokio::test]
    async fn test_unparseable_judge_reply_is_neutral() {
        let judge = ScriptedJudge::new(vec![Ok("These look fine to me.".to_string())]);
        let orch = orchestrator(
            retriever(&["v1"], &[], &[]),
            judge,
            RecordingSynthesizer::ok(),
        );
        let outcome = orch.run(QueryRequest::new("q")).await.unwrap();
        assert_eq!(outcome.final_quality, 0.5);
    }

    #[tokio::test]
    async fn test_quality_below_floor_skips_synthesis() {
        let judge = ScriptedJudge::scores(&[0.05, 0.05, 0.05]);
        let synth = RecordingSynthesizer::ok();
        let orch = orchestrator(retriever(&["v1"], &["k1"], &["g1"]), judge, synth.clone());
        let outcome = orch.run(QueryRequest::new("q")).await.unwrap();
        assert_eq!(outcome.answer, INSUFFICIENT_ANSWER);
        assert!(synth.contexts().is_empty());
    }

    #[tokio::test]
    async fn test_synthesis_failure_names_query() {
        let judge = ScriptedJudge::scores(&[0.8]);
        let orch = orchestrator(
            retriever(&["v1"], &[], &[]),
            judge,
            RecordingSynthesizer::failing(),
        );
        let outcome = orch
            .run(QueryRequest::new("what is project phoenix?"))
            .await
            .unwrap();
        assert_eq!(outcome.answer, synthesis_failure_answer("what is project phoenix?"));
        assert!(outcome.answer.ends_with("what is project phoenix?"));
    }

    #[tokio::test]
    async fn test_strategy_override_and_iteration_budget() {
        let judge = ScriptedJudge::scores(&[0.1, 0.1]);
        let orch = orchestrator(
            retriever(&["v1"], &["k1"], &["g1"]),
            judge,
            RecordingSynthesizer::ok(),
        );
        let request = QueryRequest {
            strategy_override: Some(RetrievalStrategy::GraphOnly),
            max_iterations: Some(2),
            ..QueryRequest::new("q")
        };
        let outcome = orch.run(request).await.unwrap();
        assert_eq!(
            outcome.strategy_trail,
            vec![RetrievalStrategy::GraphOnly, RetrievalStrategy::VectorOnly]
        );
        assert_eq!(outcome.iterations[0].passages[0].id, "g1");
    }

    #[tokio::test]
    async fn test_planner_picks_first_strategy() {
        let orch = orchestrator(
            retriever(&["v1"], &["k1"], &["g1"]),
            ScriptedJudge::scores(&[0.9, 0.9]),
            RecordingSynthesizer::ok(),
        )
        .with_planner(Arc::new(FixedPlanner(Some(RetrievalStrategy::KeywordOnly))));
        let request = QueryRequest {
            skip_planning: Some(false),
            ..QueryRequest::new("q")
        };
        let outcome = orch.run(request).await.unwrap();
        assert_eq!(outcome.strategy_trail, vec![RetrievalStrategy::KeywordOnly]);

        // skipped by default
        let outcome = orch.run(QueryRequest::new("q")).await.unwrap();
        assert_eq!(outcome.strategy_trail, vec![RetrievalStrategy::Hybrid]);
    }

    #[tokio::test]
    async fn test_planner_failure_falls_back_to_hybrid() {
        let orch = orchestrator(
            retriever(&["v1"], &["k1"], &["g1"]),
            ScriptedJudge::scores(&[0.9]),
            RecordingSynthesizer::ok(),
        )
        .with_planner(Arc::new(FixedPlanner(None)));
        let request = QueryRequest {
            skip_planning: Some(false),
            ..QueryRequest::new("q")
        };
        let outcome = orch.run(request).await.unwrap();
        assert_eq!(outcome.strategy_trail, vec![RetrievalStrategy::Hybrid]);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected() {
        let orch = orchestrator(
            retriever(&[], &[], &[]),
            ScriptedJudge::scores(&[]),
            RecordingSynthesizer::ok(),
        );
        let request = QueryRequest {
            max_iterations: Some(0),
            ..QueryRequest::new("q")
        };
        assert!(orch.run(request).await.is_err());
        assert!(orch.run(QueryRequest::new("   ")).await.is_err());
    }

    #[tokio::test]
    async fn test_deadline_returns_best_so_far() {
        let slow: Arc<dyn RetrievalBackend> = Arc::new(StaticBackend {
            kind: BackendKind::Vector,
            passages: vec![ScoredPassage::new("v1", "late", 1.0)],
            delay: Some(Duration::from_secs(30)),
        });
        let retriever = Arc::new(HybridRetriever::new(
            slow,
            backend(BackendKind::Keyword, &["k1"]),
            backend(BackendKind::Graph, &[]),
        ));
        let settings = OrchestratorSettings {
            deadline: Some(Duration::from_millis(50)),
            ..OrchestratorSettings::default()
        };
        let synth = RecordingSynthesizer::ok();
        let orch = Orchestrator::new(retriever, ScriptedJudge::scores(&[]), synth.clone(), settings);

        let outcome = orch.run(QueryRequest::new("q")).await.unwrap();
        assert!(outcome.timed_out);
        assert_eq!(outcome.iterations_used, 0);
        assert_eq!(outcome.answer, INSUFFICIENT_ANSWER);
        assert!(synth.contexts().is_empty());
    }

    #[tokio::test]
    async fn test_deadline_bounds_synthesis() {
        let settings = OrchestratorSettings {
            deadline: Some(Duration::from_millis(100)),
            ..OrchestratorSettings::default()
        };
        let synth = RecordingSynthesizer::slow(Duration::from_secs(2));
        let orch = Orchestrator::new(
            retriever(&["v1"], &["k1"], &[]),
            ScriptedJudge::scores(&[0.9]),
            synth.clone(),
            settings,
        );

        let started = std::time::Instant::now();
        let outcome = orch.run(QueryRequest::new("q")).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert!(outcome.timed_out);
        assert_eq!(outcome.iterations_used, 1);
        assert_eq!(outcome.final_quality, 0.9);
        assert_eq!(outcome.answer, synthesis_failure_answer("q"));
        assert_eq!(synth.contexts().len(), 1);
    }
}
