//! Chat-completion client backing the planner, judge, and synthesizer.
//!
//! | Provider | Endpoint | Auth |
//! |----------|----------|------|
//! | `ollama` | `POST {url}/api/generate` (default `http://localhost:11434`) | none |
//! | `openai` | `POST {url}/v1/chat/completions` (default `https://api.openai.com`) | `OPENAI_API_KEY` |
//! | `disabled` | none | n/a |
//!
//! With the `disabled` provider the planner always picks hybrid retrieval,
//! the judge returns an empty reply (which parses to the neutral score),
//! and synthesis fails so the orchestrator emits its fallback message.

use anyhow::{bail, Result};
use async_trait::async_trait;

use hybrid_rag_core::judge::review_prompt;
use hybrid_rag_core::models::{RetrievalStrategy, ScoredPassage};

use crate::config::LlmConfig;
use crate::http;
use crate::traits::{AnswerSynthesizer, Planner, QualityJudge};

const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provider {
    Disabled,
    Ollama,
    OpenAI,
}

pub struct ChatClient {
    provider: Provider,
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let provider = match config.provider.as_str() {
            "disabled" => Provider::Disabled,
            "ollama" => Provider::Ollama,
            "openai" => Provider::OpenAI,
            other => bail!("Unknown llm provider: {}", other),
        };
        let model = match (provider, &config.model) {
            (Provider::Disabled, m) => m.clone().unwrap_or_else(|| "disabled".to_string()),
            (_, Some(m)) => m.clone(),
            (_, None) => bail!("llm.model required for {}", config.provider),
        };
        let default_url = match provider {
            Provider::OpenAI => OPENAI_DEFAULT_URL,
            _ => OLLAMA_DEFAULT_URL,
        };
        Ok(Self {
            provider,
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| default_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.provider != Provider::Disabled
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Send a single-turn prompt and return the trimmed reply.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let text = match self.provider {
            Provider::Disabled => bail!("LLM provider is disabled"),
            Provider::Ollama => {
                let body = serde_json::json!({
                    "model": self.model,
                    "prompt": prompt,
                    "stream": false,
                });
                let json = http::post_json_with_retry(
                    &self.client,
                    &format!("{}/api/generate", self.url),
                    None,
                    &body,
                    self.max_retries,
                    "Ollama",
                )
                .await?;
                json.get("response")
                    .and_then(|r| r.as_str())
                    .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response"))?
                    .to_string()
            }
            Provider::OpenAI => {
                let api_key = std::env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
                let body = serde_json::json!({
                    "model": self.model,
                    "messages": [{ "role": "user", "content": prompt }],
                });
                let json = http::post_json_with_retry(
                    &self.client,
                    &format!("{}/v1/chat/completions", self.url),
                    Some(&api_key),
                    &body,
                    self.max_retries,
                    "OpenAI",
                )
                .await?;
                json.pointer("/choices/0/message/content")
                    .and_then(|c| c.as_str())
                    .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing content"))?
                    .to_string()
            }
        };
        Ok(text.trim().to_string())
    }
}

/// The prompt asking the model to pick a retrieval strategy.
pub fn planner_prompt(query: &str) -> String {
    format!(
        "Query: {}\n\nChoose strategy (1 sentence):\n\
         - hybrid: general questions\n\
         - vector_only: conceptual/semantic\n\
         - graph_only: relationships/entities\n\
         - keyword_only: exact terms\n\nStrategy:",
        query
    )
}

/// Map a free-text planner reply to a strategy.
///
/// The earliest strategy keyword in the reply wins; no keyword means hybrid.
pub fn parse_strategy_reply(reply: &str) -> RetrievalStrategy {
    let lower = reply.to_lowercase();
    let keywords = [
        ("hybrid", RetrievalStrategy::Hybrid),
        ("vector", RetrievalStrategy::VectorOnly),
        ("semantic", RetrievalStrategy::VectorOnly),
        ("graph", RetrievalStrategy::GraphOnly),
        ("keyword", RetrievalStrategy::KeywordOnly),
        ("bm25", RetrievalStrategy::KeywordOnly),
    ];
    keywords
        .iter()
        .filter_map(|(kw, strategy)| lower.find(kw).map(|pos| (pos, *strategy)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, strategy)| strategy)
        .unwrap_or(RetrievalStrategy::Hybrid)
}

/// The prompt asking the model to answer from labelled sources.
pub fn synthesis_prompt(query: &str, context: &[ScoredPassage]) -> String {
    let sources = context
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[Source {}]\n{}", i + 1, p.text))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "You are an expert analyst. Provide a comprehensive answer based on the retrieved information.\n\n\
         Original Query: {}\n\n\
         Retrieved Information:\n{}\n\n\
         Instructions:\n\
         1. Answer the query thoroughly\n\
         2. Cite specific sources [Source X]\n\
         3. If information is incomplete or irrelevant, acknowledge it clearly\n\
         4. Be concise but complete\n\n\
         Answer:",
        query, sources
    )
}

#[async_trait]
impl Planner for ChatClient {
    async fn plan(&self, query: &str) -> Result<RetrievalStrategy> {
        if !self.is_enabled() {
            return Ok(RetrievalStrategy::Hybrid);
        }
        let reply = self.complete(&planner_prompt(query)).await?;
        Ok(parse_strategy_reply(&reply))
    }
}

#[async_trait]
impl QualityJudge for ChatClient {
    async fn evaluate(&self, query: &str, previews: &[String]) -> Result<String> {
        if !self.is_enabled() {
            return Ok(String::new());
        }
        self.complete(&review_prompt(query, previews)).await
    }
}

#[async_trait]
impl AnswerSynthesizer for ChatClient {
    async fn synthesize(&self, query: &str, context: &[ScoredPassage]) -> Result<String> {
        let answer = self.complete(&synthesis_prompt(query, context)).await?;
        if answer.is_empty() {
            bail!("empty answer from {}", self.model);
        }
        Ok(answer)
    }
}
