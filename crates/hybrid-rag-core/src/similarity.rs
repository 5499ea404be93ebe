//! Token-order-insensitive string similarity in `[0, 100]`.
//!
//! Both inputs are lower-cased, split on non-alphanumeric characters,
//! and their tokens sorted and re-joined with single spaces. The sorted
//! forms are compared with an indel ratio:
//!
//! ```text
//! ratio = 100 × 2 × LCS(a, b) / (len(a) + len(b))
//! ```
//!
//! where `LCS` is the longest common subsequence over characters. The
//! ratio is 100 for identical token sets and 0 when nothing is shared.

/// Lower-case, tokenize on non-alphanumerics, sort, and re-join.
pub fn sorted_tokens(s: &str) -> String {
    let lower = s.to_lowercase();
    let mut tokens: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Similarity of two names regardless of word order, in `[0, 100]`.
///
/// ```rust
/// use hybrid_rag_core::similarity::token_sort_ratio;
///
/// assert_eq!(token_sort_ratio("Acme Corp", "corp ACME"), 100.0);
/// assert_eq!(token_sort_ratio("abc", "xyz"), 0.0);
/// ```
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = sorted_tokens(a).chars().collect();
    let b: Vec<char> = sorted_tokens(b).chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    let lcs = lcs_len(&a, &b);
    (200.0 * lcs as f64) / total as f64
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
