//! Text similarity primitives
//!
//! Normalization, edit-distance and Jaro-Winkler string similarity, and a
//! term-frequency cosine similarity for longer free text. All functions
//! operate on Unicode scalar values, return a score in `[0, 1]` and never fail.

use std::collections::BTreeMap;

/// Jaro-Winkler prefix scale
const WINKLER_PREFIX_SCALE: f64 = 0.1;

/// Maximum common prefix rewarded by Jaro-Winkler
const WINKLER_MAX_PREFIX: usize = 4;

/// Tokens of this many characters or fewer are ignored by the cosine measure
const MIN_TOKEN_CHARS: usize = 2;

/// Normalize text for comparison
///
/// Lowercases, drops punctuation (anything that is not alphanumeric,
/// underscore or whitespace), collapses whitespace runs to one space and
/// trims the ends.
pub fn normalize_text(text: &str) -> String {
    let stripped: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `1 - distance / max_len`, or 1.0 when both strings are empty
pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = strsim::levenshtein(a, b);
    1.0 - distance as f64 / max_len as f64
}

/// Jaro-Winkler similarity
///
/// **Algorithm:**
/// 1. Jaro similarity with match window `floor(max_len / 2) - 1`
/// 2. Add `0.1 * prefix * (1 - jaro)` for up to 4 shared leading characters
///
/// The prefix bonus is applied at every Jaro level, not only above 0.7.
/// Operands are compared in lexicographic order so the result does not
/// depend on argument order.
pub fn jaro_winkler_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let (first, second) = if a <= b { (a, b) } else { (b, a) };

    let jaro = strsim::jaro(first, second);
    if jaro == 0.0 {
        return 0.0;
    }

    let prefix = first
        .chars()
        .zip(second.chars())
        .take(WINKLER_MAX_PREFIX)
        .take_while(|(x, y)| x == y)
        .count();

    jaro + WINKLER_PREFIX_SCALE * prefix as f64 * (1.0 - jaro)
}

/// Split normalized text into tokens longer than two characters
pub fn tokenize(text: &str) -> Vec<String> {
    normalize_text(text)
        .split_whitespace()
        .filter(|token| token.chars().count() > MIN_TOKEN_CHARS)
        .map(str::to_string)
        .collect()
}

/// Term-frequency cosine similarity
///
/// Builds `count / token_count` vectors over the union vocabulary of both
/// documents (no inverse document frequency) and returns the cosine of the
/// angle between them. A document without usable tokens has a zero vector
/// and scores 0.
pub fn term_frequency_cosine(a: &str, b: &str) -> f64 {
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let counts_a = term_counts(&tokens_a);
    let counts_b = term_counts(&tokens_b);
    let total_a = tokens_a.len() as f64;
    let total_b = tokens_b.len() as f64;

    let mut vocabulary: Vec<&str> = counts_a.keys().chain(counts_b.keys()).copied().collect();
    vocabulary.sort_unstable();
    vocabulary.dedup();

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for term in vocabulary {
        let tf_a = counts_a.get(term).copied().unwrap_or(0) as f64 / total_a;
        let tf_b = counts_b.get(term).copied().unwrap_or(0) as f64 / total_b;
        dot += tf_a * tf_b;
        norm_a += tf_a * tf_a;
        norm_b += tf_b * tf_b;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}

fn term_counts(tokens: &[String]) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for token in tokens {
        *counts.entry(token.as_str()).or_insert(0) += 1;
    }
    counts
}
