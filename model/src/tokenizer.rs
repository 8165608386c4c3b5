//! Offline token counting.
//!
//! Exact BPE tokenization needs the provider's vocabulary. For cost tracking an
//! estimate is enough, so [`ApproxTokenizer`] splits text the way cl100k-style
//! pre-tokenizers do and charges long words by length.

use regex::Regex;
use std::sync::OnceLock;

/// Counts tokens in a piece of text
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

const PIECE_PATTERN: &str =
    r"(?i:'s|'t|'re|'ve|'m|'ll|'d)| ?\p{L}+| ?\p{N}{1,3}| ?[^\s\p{L}\p{N}]+|\s*[\r\n]+|\s+";

/// Average number of characters a single BPE token covers inside a word
const CHARS_PER_WORD_TOKEN: usize = 4;

fn piece_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(PIECE_PATTERN).expect("token piece pattern is valid"))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTokenizer;

impl ApproxTokenizer {
    pub fn new() -> Self {
        Self
    }
}

impl TokenCounter for ApproxTokenizer {
    fn count(&self, text: &str) -> usize {
        piece_pattern()
            .find_iter(text)
            .map(|piece| {
                let word = piece.as_str().trim_start_matches(' ');
                if word.chars().next().is_some_and(char::is_alphabetic) {
                    word.chars().count().div_ceil(CHARS_PER_WORD_TOKEN).max(1)
                } else {
                    1
                }
            })
            .sum()
    }
}
