//! Precision filter for substring matches.
//!
//! `LIKE '%tok%'` over a small corpus lets one- and two-letter tokens
//! match almost every headword. The filter decides whether a candidate
//! word is a plausible match for a query token. It is a heuristic, not a
//! morphological analysis, and is exposed as a trait so other scorers can
//! replace it.

use crate::config::RetrievalConfig;

/// Decides whether `candidate` is a plausible match for `keyword`.
pub trait RelevanceFilter: Send + Sync {
    fn is_relevant(&self, keyword: &str, candidate: &str) -> bool;
}

/// Prefix/suffix/substring policy with a tunable substring threshold.
///
/// Both inputs are trimmed and lowercased, then:
///
/// 1. equal → relevant
/// 2. single-character (or empty) keyword → not relevant
/// 3. candidate starts or ends with the keyword → relevant
/// 4. keyword occurs inside the candidate and is longer than
///    `min_substring_len` characters → relevant
/// 5. otherwise not relevant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubstringRelevance {
    pub min_substring_len: usize,
}

impl SubstringRelevance {
    pub fn new(min_substring_len: usize) -> Self {
        Self { min_substring_len }
    }

    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self::new(config.min_substring_len)
    }
}

impl Default for SubstringRelevance {
    fn default() -> Self {
        Self::new(2)
    }
}

impl RelevanceFilter for SubstringRelevance {
    fn is_relevant(&self, keyword: &str, candidate: &str) -> bool {
        let k = keyword.trim().to_lowercase();
        let t = candidate.trim().to_lowercase();

        if k == t {
            return !k.is_empty();
        }

        let k_len = k.chars().count();
        if k_len <= 1 {
            return false;
        }

        if t.starts_with(&k) || t.ends_with(&k) {
            return true;
        }

        t.contains(&k) && k_len > self.min_substring_len
    }
}

/// [`SubstringRelevance`] with the default threshold.
pub fn is_relevant(keyword: &str, candidate: &str) -> bool {
    SubstringRelevance::default().is_relevant(keyword, candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_character_keyword_never_matches_other_words() {
        for candidate in ["kaka", "a", "ina", "mama", "ta", "", "A "] {
            if candidate.trim().eq_ignore_ascii_case("a") {
                continue;
            }
            assert!(!is_relevant("a", candidate), "a vs {:?}", candidate);
        }
        assert!(!is_relevant("k", "kaka"));
    }

    #[test]
    fn equality_is_case_insensitive() {
        assert!(is_relevant("Kaka", "kaka"));
        assert!(is_relevant("  FAFAHIYAN", "fafahiyan "));
        assert!(is_relevant("你好", "你好"));
    }

    #[test]
    fn empty_strings_are_never_relevant() {
        assert!(!is_relevant("", ""));
        assert!(!is_relevant("", "kaka"));
    }

    #[test]
    fn prefix_and_suffix_match_at_two_characters() {
        assert!(is_relevant("ka", "kaka"));
        assert!(is_relevant("an", "fafahiyan"));
        assert!(!is_relevant("a", "kaka"));
    }

    #[test]
    fn inner_substring_needs_more_than_threshold() {
        // "ah" sits inside "mafahal" but is only two characters
        assert!(!is_relevant("ah", "mafahal"));
        // three characters clears the default threshold
        assert!(is_relevant("fah", "mafahal"));
    }

    #[test]
    fn threshold_three_reproduces_older_revision() {
        let strict = SubstringRelevance::new(3);
        assert!(!strict.is_relevant("fah", "mafahal"));
        assert!(strict.is_relevant("faha", "mafahal"));
        // prefix matches ignore the threshold
        assert!(strict.is_relevant("ma", "mafahal"));
    }

    #[test]
    fn unrelated_words_rejected() {
        assert!(!is_relevant("wawa", "kaka"));
    }

    #[test]
    fn lengths_count_characters_not_bytes() {
        // three CJK characters are nine bytes but still three characters
        assert!(is_relevant("好朋友", "我的好朋友們"));
        assert!(!is_relevant("朋友", "好朋友們"));
    }
}
