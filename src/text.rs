//! Tokenization and string normalization shared by retrieval and auto-sync.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("valid regex"));

/// Split text into case-folded word-character runs.
///
/// `\w` is Unicode-aware, so a run of CJK characters without spaces
/// comes back as a single token. Apostrophes split Amis words
/// (`nga'ay` → `nga`, `ay`).
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    WORD_RE
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Tokens in first-occurrence order, each once.
pub fn unique_tokens(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// The part of a gloss before any parenthetical qualifier.
///
/// `"吃 (動詞)"` → `"吃"`, `"水（名詞）"` → `"水"`.
pub fn core_definition(definition: &str) -> &str {
    let end = definition
        .find(['(', '（'])
        .unwrap_or(definition.len());
    definition[..end].trim()
}

/// Normalize a full query for exact sentence matching: periods removed,
/// trailing `?`/`!` dropped, trimmed, lowercased. Mirrors the SQL-side
/// normalization in [`crate::store::SqliteStore`].
pub fn normalize_exact(query: &str) -> String {
    query
        .replace('.', "")
        .trim()
        .trim_end_matches(['?', '!'])
        .trim()
        .to_lowercase()
}

/// `%needle%` for SQL `LIKE … ESCAPE '\'`.
pub fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}
