//! Per-token lexicon lookup.
//!
//! For one query token, gathers vocabulary entries and example sentences
//! from the store, filters out spurious substring matches and caps the
//! result counts.
//!
//! # Pipeline
//!
//! ```text
//! token ─▶ vocabulary LIKE (≤ vocab_candidate_limit)
//!            └─ relevance filter (Amis → Chinese only), ≤ vocab_match_limit
//!                 └─ core definitions (text before "(" / "（")
//!
//! token ─▶ sentence LIKE on source column (≤ sentence_candidate_limit)
//! defs  ─▶ sentence LIKE on Chinese column (≤ semantic_candidate_limit each)
//!            └─ dedup on (amis, chinese)
//!                 └─ secondary relevance check, ≤ sentence_match_limit
//! ```
//!
//! Storage failures never escape: a failing token yields empty matches.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;

use crate::config::RetrievalConfig;
use crate::models::{Direction, SentenceHit, VocabularyHit};
use crate::relevance::RelevanceFilter;
use crate::store::LexiconStore;
use crate::text::{core_definition, tokenize};

/// Everything one token retrieved.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenMatches {
    pub vocabulary: Vec<VocabularyHit>,
    pub sentences: Vec<SentenceHit>,
}

impl TokenMatches {
    pub fn is_empty(&self) -> bool {
        self.vocabulary.is_empty() && self.sentences.is_empty()
    }
}

/// Look up one token. Never fails; storage errors are logged and
/// produce empty matches.
pub async fn lookup_token(
    store: &dyn LexiconStore,
    filter: &dyn RelevanceFilter,
    limits: &RetrievalConfig,
    token: &str,
    direction: Direction,
) -> TokenMatches {
    match try_lookup_token(store, filter, limits, token, direction).await {
        Ok(matches) => {
            tracing::debug!(
                token,
                %direction,
                vocabulary = matches.vocabulary.len(),
                sentences = matches.sentences.len(),
                "lexicon lookup"
            );
            matches
        }
        Err(e) => {
            tracing::warn!(token, %direction, error = %e, "lexicon lookup failed; treating as no results");
            TokenMatches::default()
        }
    }
}

async fn try_lookup_token(
    store: &dyn LexiconStore,
    filter: &dyn RelevanceFilter,
    limits: &RetrievalConfig,
    token: &str,
    direction: Direction,
) -> Result<TokenMatches> {
    let token = token.trim().to_lowercase();
    if token.is_empty() {
        return Ok(TokenMatches::default());
    }

    // ── Vocabulary ──
    let raw_vocab = store
        .search_vocabulary(direction, &token, limits.vocab_candidate_limit)
        .await?;

    let vocabulary: Vec<VocabularyHit> = raw_vocab
        .into_iter()
        .filter(|w| direction == Direction::ChineseToAmis || filter.is_relevant(&token, &w.amis))
        .take(limits.vocab_match_limit)
        .collect();

    // ── Semantic expansion terms ──
    let core_defs: Vec<String> = if direction == Direction::AmisToChinese {
        distinct_definitions(&vocabulary, limits.semantic_definition_limit)
            .iter()
            .map(|d| core_definition(d).to_string())
            .filter(|d| !d.is_empty())
            .collect()
    } else {
        Vec::new()
    };

    // ── Sentences ──
    let mut candidates = store
        .search_sentences(direction, &token, limits.sentence_candidate_limit)
        .await?;
    for def in &core_defs {
        let found = store
            .search_sentence_translations(def, limits.semantic_candidate_limit)
            .await?;
        candidates.extend(found);
    }

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut sentences = Vec::new();
    for s in candidates {
        if sentences.len() >= limits.sentence_match_limit {
            break;
        }
        if !seen.insert((s.amis.clone(), s.chinese.clone())) {
            continue;
        }
        if sentence_is_relevant(filter, &token, &s, direction, &core_defs) {
            sentences.push(s);
        }
    }

    Ok(TokenMatches {
        vocabulary,
        sentences,
    })
}

/// Up to `limit` distinct non-empty translations, first occurrence first.
fn distinct_definitions(vocabulary: &[VocabularyHit], limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    vocabulary
        .iter()
        .filter_map(|w| w.chinese.as_deref())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .filter(|c| seen.insert(c.to_string()))
        .take(limit)
        .map(str::to_string)
        .collect()
}

/// A sentence survives when one of its source-language tokens is relevant
/// to the query token, or (Amis → Chinese) its Chinese side contains one
/// of the matched core definitions.
fn sentence_is_relevant(
    filter: &dyn RelevanceFilter,
    token: &str,
    sentence: &SentenceHit,
    direction: Direction,
    core_defs: &[String],
) -> bool {
    let source_text = match direction {
        Direction::AmisToChinese => &sentence.amis,
        Direction::ChineseToAmis => &sentence.chinese,
    };
    if tokenize(source_text)
        .iter()
        .any(|w| filter.is_relevant(token, w))
    {
        return true;
    }

    direction == Direction::AmisToChinese
        && core_defs.iter().any(|d| sentence.chinese.contains(d.as_str()))
}
