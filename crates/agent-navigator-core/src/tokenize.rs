//! Text tokenization shared by the ranking model, the tag extractor and the
//! substring fallback.

use regex::Regex;
use std::sync::LazyLock;

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("punctuation pattern is valid"));

/// Common English stopwords removed from both documents and queries.
pub const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "could", "should", "may", "might", "can", "this", "that",
];

/// Lowercases, replaces punctuation with spaces and splits on whitespace.
///
/// Single-character tokens and stopwords are dropped. Underscores survive
/// (`\w` includes them) so vocabulary labels such as `multi_agent` stay one
/// token.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let cleaned = PUNCTUATION.replace_all(&lowered, " ");
    cleaned
        .split_whitespace()
        .filter(|t| t.chars().count() > 1 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_stopwords() {
        assert_eq!(
            tokenize("The PDF-Chat bot, for teams!"),
            vec!["pdf", "chat", "bot", "teams"]
        );
    }

    #[test]
    fn keeps_underscored_labels() {
        assert_eq!(tokenize("multi_agent raw_api"), vec!["multi_agent", "raw_api"]);
    }

    #[test]
    fn empty_and_stopword_only_text() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("the a of I").is_empty());
    }
}
