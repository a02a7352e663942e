//! Domain-aware tokenization for Vietnamese administrative text.
//!
//! Lowercases, strips punctuation, drops single-character tokens, and
//! optionally removes a fixed list of Vietnamese function words. Used by
//! both index construction and query processing so term statistics stay
//! consistent between the two.

use std::collections::HashSet;
use std::sync::LazyLock;

/// Vietnamese function words excluded from the index when
/// `remove_stopwords` is set.
static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "và", "của", "có", "là", "được", "trong", "các", "để", "cho", "với", "theo", "từ", "về",
        "này", "đó", "khi", "như", "không", "tại", "hoặc", "những", "đã", "vào", "nếu", "hay",
        "do", "sẽ", "bởi", "bằng", "đến", "trên", "dưới", "sau", "trước", "ngoài", "giữa", "thì",
        "nhưng", "mà", "vì", "nên", "đây", "đấy", "cũng", "thêm", "nhiều", "ít",
    ]
    .into_iter()
    .collect()
});

/// Returns true if `word` is a Vietnamese stopword recognized by the tokenizer.
#[must_use]
pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(word)
}

/// Tokenizes `text` into lowercase word tokens.
///
/// Non-alphanumeric, non-whitespace characters are replaced with spaces
/// before splitting, matching the original corpus's punctuation handling.
/// Tokens of length 1 are dropped unconditionally (they carry essentially
/// no term-discrimination signal in this domain). When `remove_stopwords`
/// is true, tokens in [`is_stopword`] are also dropped.
#[must_use]
pub fn tokenize(text: &str, remove_stopwords: bool) -> Vec<String> {
    let normalized: String = text
        .chars()
        .map(|c| {
            let lower = c.to_lowercase().next().unwrap_or(c);
            if lower.is_alphanumeric() || lower.is_whitespace() {
                lower
            } else {
                ' '
            }
        })
        .collect();

    normalized
        .split_whitespace()
        .filter(|w| w.chars().count() > 1)
        .filter(|w| !remove_stopwords || !is_stopword(w))
        .map(str::to_string)
        .collect()
}
