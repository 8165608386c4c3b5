//! Response scoring for evaluation runs
//!
//! A judge compares what a model produced with what a test case expected and
//! returns a score between 0.0 and 1.0.
//!
//! # Examples
//!
//! ```rust
//! use model::judge::{KeywordJudge, ResponseJudge};
//!
//! let judge = KeywordJudge;
//! assert_eq!(judge.score("Python ist eine Programmiersprache", "Programmiersprache"), 1.0);
//! assert_eq!(judge.score("Good day", "Good night"), 0.5);
//! ```

use std::collections::HashSet;

/// Scores an actual response against an expected one
pub trait ResponseJudge: Send + Sync {
    /// Score in `0.0..=1.0`
    fn score(&self, actual: &str, expected: &str) -> f64;

    fn name(&self) -> &'static str;
}

/// Substring match first, word overlap second
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordJudge;

impl ResponseJudge for KeywordJudge {
    fn score(&self, actual: &str, expected: &str) -> f64 {
        accuracy_score(actual, expected)
    }

    fn name(&self) -> &'static str {
        "keyword"
    }
}

/// Case-insensitive accuracy of `actual` against `expected`.
///
/// Returns 1.0 when `expected` appears verbatim in `actual`. Otherwise returns
/// the share of the expected words that also occur in the actual text. An
/// expected value without any words is trivially satisfied.
pub fn accuracy_score(actual: &str, expected: &str) -> f64 {
    let actual_lower = actual.to_lowercase();
    let expected_lower = expected.to_lowercase();

    if actual_lower.contains(&expected_lower) {
        return 1.0;
    }

    let expected_words: HashSet<&str> = expected_lower.split_whitespace().collect();
    if expected_words.is_empty() {
        return 1.0;
    }

    let actual_words: HashSet<&str> = actual_lower.split_whitespace().collect();
    let shared = expected_words.intersection(&actual_words).count();
    shared as f64 / expected_words.len() as f64
}
