//! Context assembly for generative prompts.
//!
//! Two variants over the same lexicon:
//!
//! - [`build_expert_context`]: targeted retrieval for one query: exact
//!   sentence translation if one exists, then per-token lookups folded
//!   into a deduplicated, line-capped context block.
//! - [`build_full_corpus_context`]: every vocabulary entry and sentence
//!   pair in a compact line format, for one-off ingestion into a
//!   long-context prompt. No filtering, no cap.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;

use crate::config::RetrievalConfig;
use crate::lookup::lookup_token;
use crate::models::{Direction, SentenceHit, VocabularyHit};
use crate::relevance::RelevanceFilter;
use crate::store::LexiconStore;
use crate::text::{normalize_exact, unique_tokens};

pub const CONTEXT_HEADER: &str = "[Amis corpus retrieval results]";
pub const VOCABULARY_SECTION: &str = "==V==";
pub const SENTENCE_SECTION: &str = "==S==";

/// Result of targeted retrieval for one query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExpertContext {
    /// Translation of a stored sentence matching the whole query.
    pub exact_translation: Option<String>,
    pub vocabulary: Vec<VocabularyHit>,
    pub sentences: Vec<SentenceHit>,
    /// Context lines, at most `max_context_lines` including the
    /// truncation marker.
    pub lines: Vec<String>,
    pub truncated: bool,
}

impl ExpertContext {
    /// The block handed to the model: header plus lines, or empty when
    /// nothing was retrieved.
    pub fn prompt_text(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        let mut out = String::from(CONTEXT_HEADER);
        for line in &self.lines {
            out.push('\n');
            out.push_str(line);
        }
        out
    }
}

pub fn vocabulary_line(hit: &VocabularyHit) -> String {
    format!(
        "[vocab] {} : {} ({})",
        hit.amis,
        hit.chinese.as_deref().unwrap_or(""),
        hit.part_of_speech.as_deref().unwrap_or("")
    )
}

pub fn sentence_line(hit: &SentenceHit) -> String {
    format!("[sentence] {} || {}", hit.amis, hit.chinese)
}

pub fn truncation_marker(kept: usize) -> String {
    format!("[system] context truncated to the first {} entries", kept)
}

/// Targeted retrieval for `query`.
///
/// Storage failures degrade to missing pieces (no exact translation, no
/// matches for a token); this function does not fail.
pub async fn build_expert_context(
    store: &dyn LexiconStore,
    filter: &dyn RelevanceFilter,
    limits: &RetrievalConfig,
    query: &str,
    direction: Direction,
) -> ExpertContext {
    if query.trim().is_empty() {
        return ExpertContext::default();
    }

    let normalized = normalize_exact(query);
    let exact_translation = match store.exact_translation(direction, &normalized).await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!(error = %e, "exact sentence lookup failed");
            None
        }
    };

    let mut vocabulary = Vec::new();
    let mut sentences = Vec::new();
    let mut seen_vocab: HashSet<VocabularyHit> = HashSet::new();
    let mut seen_sentences: HashSet<SentenceHit> = HashSet::new();
    let mut raw_lines = Vec::new();

    for token in unique_tokens(query) {
        let matches = lookup_token(store, filter, limits, &token, direction).await;
        for w in matches.vocabulary {
            raw_lines.push(vocabulary_line(&w));
            if seen_vocab.insert(w.clone()) {
                vocabulary.push(w);
            }
        }
        for s in matches.sentences {
            raw_lines.push(sentence_line(&s));
            if seen_sentences.insert(s.clone()) {
                sentences.push(s);
            }
        }
    }

    let (lines, truncated) = cap_lines(raw_lines, limits.max_context_lines);
    if truncated {
        tracing::debug!(cap = limits.max_context_lines, "expert context truncated");
    }

    ExpertContext {
        exact_translation,
        vocabulary,
        sentences,
        lines,
        truncated,
    }
}

/// Deduplicate preserving first occurrence, then cap at `max_lines`
/// total. When lines are dropped the last slot holds one marker line.
fn cap_lines(raw: Vec<String>, max_lines: usize) -> (Vec<String>, bool) {
    let mut seen = HashSet::new();
    let mut lines: Vec<String> = raw.into_iter().filter(|l| seen.insert(l.clone())).collect();

    if lines.len() <= max_lines {
        return (lines, false);
    }

    let kept = max_lines.saturating_sub(1);
    lines.truncate(kept);
    lines.push(truncation_marker(kept));
    (lines, true)
}

/// Every vocabulary entry and sentence pair in compact form:
///
/// ```text
/// ==V==
/// amis,chinese,part_of_speech[|note]
/// ==S==
/// amis||chinese[|note]
/// ```
pub async fn build_full_corpus_context(store: &dyn LexiconStore) -> Result<String> {
    let vocabulary = store.all_vocabulary().await?;
    let sentences = store.all_sentences().await?;

    let mut out = String::new();
    out.push_str(VOCABULARY_SECTION);
    out.push('\n');
    for v in &vocabulary {
        out.push_str(&format!(
            "{},{},{}{}\n",
            v.amis,
            v.chinese.as_deref().unwrap_or(""),
            v.part_of_speech.as_deref().unwrap_or(""),
            note_suffix(v.note.as_deref())
        ));
    }

    out.push_str(SENTENCE_SECTION);
    out.push('\n');
    for s in &sentences {
        out.push_str(&format!(
            "{}||{}{}\n",
            s.amis,
            s.chinese,
            note_suffix(s.note.as_deref())
        ));
    }

    Ok(out)
}

fn note_suffix(note: Option<&str>) -> String {
    match note.map(str::trim) {
        Some(n) if !n.is_empty() => format!("|{}", n),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relevance::SubstringRelevance;
    use crate::store::testing::{add_sentence, add_word, temp_store, BrokenStore};

    #[tokio::test]
    async fn empty_query_gives_empty_context() {
        let (_tmp, store) = temp_store().await;
        let filter = SubstringRelevance::default();
        let ctx = build_expert_context(
            &store,
            &filter,
            &RetrievalConfig::default(),
            "   ",
            Direction::AmisToChinese,
        )
        .await;
        assert!(ctx.lines.is_empty());
        assert_eq!(ctx.prompt_text(), "");
    }

    #[tokio::test]
    async fn exact_translation_and_lines() {
        let (_tmp, store) = temp_store().await;
        add_word(&store, "kaka", "哥哥", "n").await;
        add_sentence(&store, "O kaka ako.", "他是我哥哥").await;

        let filter = SubstringRelevance::default();
        let ctx = build_expert_context(
            &store,
            &filter,
            &RetrievalConfig::default(),
            "o kaka ako",
            Direction::AmisToChinese,
        )
        .await;

        assert_eq!(ctx.exact_translation.as_deref(), Some("他是我哥哥"));
        assert!(ctx.lines.contains(&"[vocab] kaka : 哥哥 (n)".to_string()));
        assert!(ctx
            .lines
            .contains(&"[sentence] O kaka ako. || 他是我哥哥".to_string()));
        assert!(ctx.prompt_text().starts_with(CONTEXT_HEADER));
        // lines are unique
        let unique: HashSet<_> = ctx.lines.iter().collect();
        assert_eq!(unique.len(), ctx.lines.len());
        assert!(!ctx.truncated);
    }

    #[tokio::test]
    async fn context_never_exceeds_cap_and_marks_once() {
        let (_tmp, store) = temp_store().await;
        for i in 0..40 {
            add_word(&store, &format!("kaka{}", i), &format!("哥哥{}", i), "n").await;
            add_sentence(&store, &format!("kaka{} ako", i), &format!("哥哥{}", i)).await;
        }

        let mut limits = RetrievalConfig::default();
        limits.max_context_lines = 25;
        let filter = SubstringRelevance::default();
        let ctx =
            build_expert_context(&store, &filter, &limits, "kaka ako", Direction::AmisToChinese)
                .await;

        assert!(ctx.truncated);
        assert_eq!(ctx.lines.len(), 25);
        let markers = ctx
            .lines
            .iter()
            .filter(|l| l.starts_with("[system] context truncated"))
            .count();
        assert_eq!(markers, 1);
        assert_eq!(ctx.lines.last().unwrap(), &truncation_marker(24));
    }

    #[tokio::test]
    async fn broken_store_degrades_to_empty() {
        let filter = SubstringRelevance::default();
        let ctx = build_expert_context(
            &BrokenStore,
            &filter,
            &RetrievalConfig::default(),
            "kaka",
            Direction::AmisToChinese,
        )
        .await;
        assert!(ctx.exact_translation.is_none());
        assert!(ctx.lines.is_empty());
    }

    #[test]
    fn cap_lines_dedups_before_counting() {
        let raw = vec!["a".to_string(), "a".to_string(), "b".to_string()];
        let (lines, truncated) = cap_lines(raw, 2);
        assert_eq!(lines, vec!["a", "b"]);
        assert!(!truncated);
    }

    #[tokio::test]
    async fn full_dump_format() {
        let (_tmp, store) = temp_store().await;
        add_word(&store, "kaka", "哥哥", "n").await;
        add_sentence(&store, "O kaka ako.", "他是我哥哥").await;
        sqlx::query("UPDATE vocabulary SET note = 'elder sibling' WHERE amis = 'kaka'")
            .execute(store.pool())
            .await
            .unwrap();

        let dump = build_full_corpus_context(&store).await.unwrap();
        assert_eq!(
            dump,
            "==V==\nkaka,哥哥,n|elder sibling\n==S==\nO kaka ako.||他是我哥哥\n"
        );
    }

    #[tokio::test]
    async fn full_dump_propagates_storage_errors() {
        assert!(build_full_corpus_context(&BrokenStore).await.is_err());
    }
}
