//! Vocabulary auto-sync.
//!
//! Every word of a newly saved sentence should exist in the vocabulary
//! table, even before anyone has glossed it. Unknown tokens become stub
//! entries with an empty translation and a note pointing back at the
//! sentence they came from.

use crate::store::LexiconStore;
use crate::text::unique_tokens;

pub fn stub_note(sentence: &str) -> String {
    format!("from sentence: {}", sentence)
}

/// Insert a stub for each token of `sentence` with no case-insensitive
/// headword match. Returns the number of stubs inserted.
///
/// Re-running on the same sentence inserts nothing. A storage failure
/// stops the pass and is logged; it is not reported to the caller.
pub async fn sync_vocabulary(store: &dyn LexiconStore, sentence: &str) -> usize {
    let note = stub_note(sentence);
    let mut inserted = 0;

    for token in unique_tokens(sentence) {
        let exists = match store.headword_exists(&token).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!(token = %token, error = %e, "vocabulary sync aborted");
                break;
            }
        };
        if exists {
            continue;
        }
        if let Err(e) = store.insert_stub(&token, &note).await {
            tracing::warn!(token = %token, error = %e, "vocabulary sync aborted");
            break;
        }
        inserted += 1;
    }

    if inserted > 0 {
        tracing::info!(inserted, "vocabulary stubs created from sentence");
    }
    inserted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{add_word, temp_store, BrokenStore};

    #[tokio::test]
    async fn repeated_sync_inserts_each_token_once() {
        let (_tmp, store) = temp_store().await;

        assert_eq!(sync_vocabulary(&store, "kaka no kaka").await, 2);
        assert_eq!(sync_vocabulary(&store, "kaka no kaka").await, 0);

        let all = store.all_vocabulary().await.unwrap();
        let mut words: Vec<&str> = all.iter().map(|v| v.amis.as_str()).collect();
        words.sort();
        assert_eq!(words, vec!["kaka", "no"]);
        assert!(all
            .iter()
            .all(|v| v.note.as_deref() == Some("from sentence: kaka no kaka")));
        assert!(all.iter().all(|v| v.chinese.as_deref() == Some("")));
    }

    #[tokio::test]
    async fn existing_headword_matches_case_insensitively() {
        let (_tmp, store) = temp_store().await;
        add_word(&store, "Kaka", "哥哥", "n").await;

        assert_eq!(sync_vocabulary(&store, "KAKA ako").await, 1);
        let all = store.all_vocabulary().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].amis, "ako");
    }

    #[tokio::test]
    async fn storage_failure_is_swallowed() {
        assert_eq!(sync_vocabulary(&BrokenStore, "kaka no").await, 0);
    }
}
