//! Corpus statistics.
//!
//! A quick summary of what the corpus holds: table counts, how many
//! vocabulary entries are still untranslated stubs, and how the
//! part-of-speech tags are used. Used by `amis stats`.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::tags::tag_usage;

#[derive(Debug, Clone, Serialize)]
pub struct CorpusStats {
    pub vocabulary: i64,
    pub sentences: i64,
    pub tags: i64,
    /// Vocabulary entries without a translation.
    pub stubs: i64,
    pub last_vocabulary_at: Option<String>,
    pub last_sentence_at: Option<String>,
    pub tag_usage: Vec<(String, i64)>,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<CorpusStats> {
    let vocabulary: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vocabulary")
        .fetch_one(pool)
        .await?;
    let sentences: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sentence_pairs")
        .fetch_one(pool)
        .await?;
    let tags: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pos_tags")
        .fetch_one(pool)
        .await?;
    let stubs: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM vocabulary WHERE chinese IS NULL OR TRIM(chinese) = ''",
    )
    .fetch_one(pool)
    .await?;
    let last_vocabulary_at: Option<String> =
        sqlx::query_scalar("SELECT MAX(created_at) FROM vocabulary")
            .fetch_one(pool)
            .await?;
    let last_sentence_at: Option<String> =
        sqlx::query_scalar("SELECT MAX(created_at) FROM sentence_pairs")
            .fetch_one(pool)
            .await?;

    Ok(CorpusStats {
        vocabulary,
        sentences,
        tags,
        stubs,
        last_vocabulary_at,
        last_sentence_at,
        tag_usage: tag_usage(pool).await?,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Amis Corpus: Database Stats");
    println!("============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Vocabulary:  {}", stats.vocabulary);
    println!(
        "  Untranslated: {} / {} ({}%)",
        stats.stubs,
        stats.vocabulary,
        if stats.vocabulary > 0 {
            (stats.stubs * 100) / stats.vocabulary
        } else {
            0
        }
    );
    println!("  Sentences:   {}", stats.sentences);
    println!("  Tags:        {}", stats.tags);
    if let Some(ts) = &stats.last_vocabulary_at {
        println!("  Last word:   {}", short_ts(ts));
    }
    if let Some(ts) = &stats.last_sentence_at {
        println!("  Last pair:   {}", short_ts(ts));
    }

    if !stats.tag_usage.is_empty() {
        println!();
        println!("  By part of speech:");
        println!("  {:<24} {:>8}", "TAG", "ENTRIES");
        println!("  {}", "-".repeat(33));
        for (tag, n) in &stats.tag_usage {
            println!("  {:<24} {:>8}", tag, n);
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Trim a stored timestamp to minutes.
fn short_ts(ts: &str) -> &str {
    ts.get(..16).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{add_sentence, add_word, temp_store};

    #[tokio::test]
    async fn counts_stubs_and_tags() {
        let (_tmp, store) = temp_store().await;
        add_word(&store, "kaka", "哥哥", "n").await;
        add_word(&store, "ho", "", "").await;
        add_sentence(&store, "Nga'ay ho", "你好").await;

        let stats = collect_stats(store.pool()).await.unwrap();
        assert_eq!(stats.vocabulary, 2);
        assert_eq!(stats.sentences, 1);
        assert_eq!(stats.tags, 0);
        assert_eq!(stats.stubs, 1);
        assert_eq!(stats.tag_usage, vec![("n".to_string(), 1)]);
        assert!(stats.last_sentence_at.is_some());
    }

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn timestamps_are_shortened() {
        assert_eq!(short_ts("2024-05-01 10:00:00.123456"), "2024-05-01 10:00");
        assert_eq!(short_ts("2024"), "2024");
    }
}
