//! Retrieval-quality judgement: prompt previews and response parsing.
//!
//! The judge itself is a language model. This module owns the policy
//! around it: what the model is shown, and how its free-text reply is
//! turned into a score and feedback.
//!
//! # Response grammar
//!
//! The reply may contain anything. The first line containing `SCORE:` is
//! used; the first whitespace-separated token after the marker is parsed
//! as a number and clamped to `[0.0, 1.0]`. Everything after the first
//! `FEEDBACK:` marker is the feedback. A missing or unparseable score
//! yields [`NEUTRAL_SCORE`]; missing feedback yields [`DEFAULT_FEEDBACK`].

use serde::Serialize;

use crate::models::ScoredPassage;

pub const SCORE_MARKER: &str = "SCORE:";
pub const FEEDBACK_MARKER: &str = "FEEDBACK:";

/// Used when the judge's reply has no parseable score.
pub const NEUTRAL_SCORE: f64 = 0.5;

pub const DEFAULT_FEEDBACK: &str = "Try a different retrieval strategy";

/// Feedback recorded when a retrieval step returned nothing.
pub const NO_DOCUMENTS_FEEDBACK: &str = "No documents retrieved";

/// Number of passages shown to the judge.
pub const DEFAULT_PREVIEW_DOCS: usize = 3;

/// Characters of each passage shown to the judge.
pub const DEFAULT_PREVIEW_CHARS: usize = 150;

/// A parsed judgement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Judgement {
    pub score: f64,
    pub feedback: String,
}

impl Judgement {
    /// The judgement used when the judge is unavailable.
    pub fn neutral() -> Self {
        Self {
            score: NEUTRAL_SCORE,
            feedback: DEFAULT_FEEDBACK.to_string(),
        }
    }

    /// The judgement forced when no passages were retrieved.
    pub fn empty_retrieval() -> Self {
        Self {
            score: 0.0,
            feedback: NO_DOCUMENTS_FEEDBACK.to_string(),
        }
    }
}

/// Parse a judge reply into a score and feedback, applying defaults.
pub fn parse_judgement(text: &str) -> Judgement {
    Judgement {
        score: extract_score(text).unwrap_or(NEUTRAL_SCORE),
        feedback: extract_feedback(text).unwrap_or_else(|| DEFAULT_FEEDBACK.to_string()),
    }
}

/// Extract the clamped score from the first `SCORE:` line, if any.
pub fn extract_score(text: &str) -> Option<f64> {
    let line = text.lines().find(|l| l.contains(SCORE_MARKER))?;
    let (_, rest) = line.split_once(SCORE_MARKER)?;
    let token = rest.split_whitespace().next()?;
    let token = token.trim_end_matches(|c: char| !c.is_ascii_digit());
    let value: f64 = token.parse().ok()?;
    if value.is_nan() {
        return None;
    }
    Some(value.clamp(0.0, 1.0))
}

/// Extract everything after the first `FEEDBACK:` marker, if non-empty.
pub fn extract_feedback(text: &str) -> Option<String> {
    let (_, rest) = text.split_once(FEEDBACK_MARKER)?;
    let feedback = rest.trim();
    if feedback.is_empty() {
        None
    } else {
        Some(feedback.to_string())
    }
}

/// Bounded previews of the leading passages.
pub fn previews(passages: &[ScoredPassage], max_docs: usize, max_chars: usize) -> Vec<String> {
    passages
        .iter()
        .take(max_docs)
        .map(|p| p.text.chars().take(max_chars).collect())
        .collect()
}

/// The prompt sent to the judge.
pub fn review_prompt(query: &str, previews: &[String]) -> String {
    let docs = previews
        .iter()
        .enumerate()
        .map(|(i, text)| format!("Doc{}: {}", i + 1, text))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Query: {}\n\nDocs:\n{}\n\nCan these docs answer the query?\n{} <0.0-1.0>\n{} <if needed>\n",
        query, docs, SCORE_MARKER, FEEDBACK_MARKER
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_well_formed() {
        let j = parse_judgement("SCORE: 0.8\nFEEDBACK: Looks complete.");
        assert_eq!(j.score, 0.8);
        assert_eq!(j.feedback, "Looks complete.");
    }

    #[test]
    fn test_score_line_anywhere() {
        let text = "Let me think.\nThe docs mention the CEO.\nFinal SCORE: 0.35 overall\n";
        assert_eq!(extract_score(text), Some(0.35));
    }

    #[test]
    fn test_score_is_clamped() {
        assert_eq!(extract_score("SCORE: 7"), Some(1.0));
        assert_eq!(extract_score("SCORE: -2"), Some(0.0));
    }

    #[test]
    fn test_trailing_punctuation_ignored() {
        assert_eq!(extract_score("SCORE: 0.6."), Some(0.6));
        assert_eq!(extract_score("SCORE: 0.9,"), Some(0.9));
    }

    #[test]
    fn test_unparseable_score_defaults_to_neutral() {
        assert_eq!(parse_judgement("SCORE: high").score, NEUTRAL_SCORE);
        assert_eq!(parse_judgement("SCORE:").score, NEUTRAL_SCORE);
        assert_eq!(parse_judgement("no marker here").score, NEUTRAL_SCORE);
        assert_eq!(parse_judgement("").score, NEUTRAL_SCORE);
        assert_eq!(parse_judgement("SCORE: NaN").score, NEUTRAL_SCORE);
    }

    #[test]
    fn test_marker_is_case_sensitive() {
        assert_eq!(extract_score("score: 0.9"), None);
    }

    #[test]
    fn test_missing_feedback_defaults() {
        assert_eq!(parse_judgement("SCORE: 0.2").feedback, DEFAULT_FEEDBACK);
        assert_eq!(parse_judgement("SCORE: 0.2\nFEEDBACK:   ").feedback, DEFAULT_FEEDBACK);
    }

    #[test]
    fn test_feedback_spans_lines() {
        let j = parse_judgement("SCORE: 0.1\nFEEDBACK: Missing dates.\nTry keyword search.");
        assert_eq!(j.feedback, "Missing dates.\nTry keyword search.");
    }

    #[test]
    fn test_previews_are_bounded() {
        let passages: Vec<ScoredPassage> = (0..5)
            .map(|i| ScoredPassage::new(format!("p{}", i), "y".repeat(400), 1.0))
            .collect();
        let out = previews(&passages, DEFAULT_PREVIEW_DOCS, DEFAULT_PREVIEW_CHARS);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|p| p.chars().count() == 150));
    }

    #[test]
    fn test_review_prompt_mentions_markers() {
        let prompt = review_prompt("who?", &["alpha".to_string()]);
        assert!(prompt.contains("Query: who?"));
        assert!(prompt.contains("Doc1: alpha"));
        assert!(prompt.contains("SCORE:"));
        assert!(prompt.contains("FEEDBACK:"));
    }
}
