//! Default term normalization shared by ingestion and querying.
//!
//! Text is lowercased, split into runs of letters and digits, and stripped of
//! single-character tokens and common English stop words.

use crate::traits::Tokenizer;
use regex::Regex;
use std::collections::HashSet;

const STOP_WORDS: [&str; 35] = [
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "if", "in", "into",
    "is", "it", "its", "no", "not", "of", "on", "or", "such", "that", "the", "their", "then",
    "there", "these", "they", "this", "to", "was", "will", "with",
];

#[derive(Debug, Clone)]
pub struct StandardTokenizer {
    term_re: Regex,
    stop_words: HashSet<&'static str>,
    min_token_chars: usize,
}

impl StandardTokenizer {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            term_re: Regex::new(r"[\p{L}\p{N}]+")?,
            stop_words: STOP_WORDS.into_iter().collect(),
            min_token_chars: 2,
        })
    }

    pub fn is_stop_word(&self, token: &str) -> bool {
        self.stop_words.contains(token)
    }
}

impl Tokenizer for StandardTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        self.term_re
            .find_iter(&lowered)
            .map(|found| found.as_str())
            .filter(|token| token.chars().count() >= self.min_token_chars)
            .filter(|token| !self.is_stop_word(token))
            .map(str::to_string)
            .collect()
    }
}
