//! Storage abstraction for retrieval.
//!
//! The [`LexiconStore`] trait covers every read the lookup and context
//! pipeline needs, plus the stub insert used by vocabulary auto-sync.
//! [`SqliteStore`] is the production backend; tests substitute stores
//! that fail on purpose to exercise the degrade-to-empty paths.
//!
//! CRUD operations that only the console performs (grid saves, imports,
//! tag management) work directly on a [`SqlitePool`] in their own
//! modules.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::models::{
    now_timestamp, Direction, SentenceHit, SentencePair, VocabularyEntry, VocabularyHit,
};
use crate::text::like_pattern;

/// Read access to the lexicon, plus stub creation for auto-sync.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`search_vocabulary`](LexiconStore::search_vocabulary) | substring match on the direction's source column |
/// | [`search_sentences`](LexiconStore::search_sentences) | substring match on the source sentence column |
/// | [`search_sentence_translations`](LexiconStore::search_sentence_translations) | substring match on Chinese sentences |
/// | [`exact_translation`](LexiconStore::exact_translation) | whole-sentence translation lookup |
/// | [`headword_exists`](LexiconStore::headword_exists) | case-insensitive headword check |
/// | [`insert_stub`](LexiconStore::insert_stub) | add an untranslated headword |
/// | [`all_vocabulary`](LexiconStore::all_vocabulary) / [`all_sentences`](LexiconStore::all_sentences) | full table scans in id order |
#[async_trait]
pub trait LexiconStore: Send + Sync {
    /// Case-insensitive substring match of `token` against the source
    /// column of `direction`, at most `limit` rows.
    async fn search_vocabulary(
        &self,
        direction: Direction,
        token: &str,
        limit: i64,
    ) -> Result<Vec<VocabularyHit>>;

    async fn search_sentences(
        &self,
        direction: Direction,
        token: &str,
        limit: i64,
    ) -> Result<Vec<SentenceHit>>;

    /// Substring match against the Chinese side of every sentence pair.
    async fn search_sentence_translations(
        &self,
        term: &str,
        limit: i64,
    ) -> Result<Vec<SentenceHit>>;

    /// Translation of the first sentence whose normalized source text
    /// equals `normalized` (see [`crate::text::normalize_exact`]).
    async fn exact_translation(
        &self,
        direction: Direction,
        normalized: &str,
    ) -> Result<Option<String>>;

    async fn headword_exists(&self, headword: &str) -> Result<bool>;

    async fn insert_stub(&self, headword: &str, note: &str) -> Result<()>;

    async fn all_vocabulary(&self) -> Result<Vec<VocabularyEntry>>;

    async fn all_sentences(&self) -> Result<Vec<SentencePair>>;
}

/// SQLite implementation of [`LexiconStore`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(config: &Config) -> Result<Self> {
        Ok(Self::new(db::connect(config).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl LexiconStore for SqliteStore {
    async fn search_vocabulary(
        &self,
        direction: Direction,
        token: &str,
        limit: i64,
    ) -> Result<Vec<VocabularyHit>> {
        let sql = format!(
            "SELECT amis, chinese, part_of_speech FROM vocabulary \
             WHERE LOWER({}) LIKE ? ESCAPE '\\' ORDER BY id LIMIT ?",
            direction.source_column()
        );
        let rows = sqlx::query(&sql)
            .bind(like_pattern(&token.to_lowercase()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| VocabularyHit {
                amis: row.get("amis"),
                chinese: row.get("chinese"),
                part_of_speech: row.get("part_of_speech"),
            })
            .collect())
    }

    async fn search_sentences(
        &self,
        direction: Direction,
        token: &str,
        limit: i64,
    ) -> Result<Vec<SentenceHit>> {
        let sql = format!(
            "SELECT amis, chinese FROM sentence_pairs \
             WHERE LOWER({}) LIKE ? ESCAPE '\\' ORDER BY id LIMIT ?",
            direction.source_column()
        );
        let rows = sqlx::query(&sql)
            .bind(like_pattern(&token.to_lowercase()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(sentence_hit).collect())
    }

    async fn search_sentence_translations(
        &self,
        term: &str,
        limit: i64,
    ) -> Result<Vec<SentenceHit>> {
        let rows = sqlx::query(
            "SELECT amis, chinese FROM sentence_pairs \
             WHERE chinese LIKE ? ESCAPE '\\' ORDER BY id LIMIT ?",
        )
        .bind(like_pattern(term))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(sentence_hit).collect())
    }

    async fn exact_translation(
        &self,
        direction: Direction,
        normalized: &str,
    ) -> Result<Option<String>> {
        let sql = format!(
            "SELECT {target} FROM sentence_pairs \
             WHERE TRIM(RTRIM(TRIM(LOWER(REPLACE({source}, '.', ''))), '?!')) = ? \
             ORDER BY id LIMIT 1",
            target = direction.target_column(),
            source = direction.source_column(),
        );
        let found: Option<String> = sqlx::query_scalar(&sql)
            .bind(normalized)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found)
    }

    async fn headword_exists(&self, headword: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM vocabulary WHERE LOWER(amis) = ?")
                .bind(headword.to_lowercase())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn insert_stub(&self, headword: &str, note: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO vocabulary (amis, chinese, note, created_at) VALUES (?, '', ?, ?)",
        )
        .bind(headword)
        .bind(note)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn all_vocabulary(&self) -> Result<Vec<VocabularyEntry>> {
        let rows = sqlx::query(
            "SELECT id, amis, chinese, english, part_of_speech, note, created_at \
             FROM vocabulary ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| VocabularyEntry {
                id: row.get("id"),
                amis: row.get("amis"),
                chinese: row.get("chinese"),
                english: row.get("english"),
                part_of_speech: row.get("part_of_speech"),
                note: row.get("note"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn all_sentences(&self) -> Result<Vec<SentencePair>> {
        let rows = sqlx::query(
            "SELECT id, amis, chinese, english, note, created_at \
             FROM sentence_pairs ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| SentencePair {
                id: row.get("id"),
                amis: row.get("amis"),
                chinese: row.get("chinese"),
                english: row.get("english"),
                note: row.get("note"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}

fn sentence_hit(row: &sqlx::sqlite::SqliteRow) -> SentenceHit {
    SentenceHit {
        amis: row.get("amis"),
        chinese: row.get("chinese"),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the retrieval tests.

    use super::*;
    use crate::migrate::create_schema;
    use tempfile::TempDir;

    /// A migrated store in a fresh temp directory. Keep the `TempDir`
    /// alive for the duration of the test.
    pub async fn temp_store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_db_path(tmp.path().join("amis.sqlite"));
        let pool = db::connect(&config).await.unwrap();
        create_schema(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    pub async fn add_word(store: &SqliteStore, amis: &str, chinese: &str, pos: &str) {
        sqlx::query(
            "INSERT INTO vocabulary (amis, chinese, part_of_speech, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(amis)
        .bind(chinese)
        .bind(pos)
        .bind(now_timestamp())
        .execute(store.pool())
        .await
        .unwrap();
    }

    pub async fn add_sentence(store: &SqliteStore, amis: &str, chinese: &str) {
        sqlx::query("INSERT INTO sentence_pairs (amis, chinese, created_at) VALUES (?, ?, ?)")
            .bind(amis)
            .bind(chinese)
            .bind(now_timestamp())
            .execute(store.pool())
            .await
            .unwrap();
    }

    /// A store whose every operation fails, as a locked or corrupt
    /// database would.
    pub struct BrokenStore;

    #[async_trait]
    impl LexiconStore for BrokenStore {
        async fn search_vocabulary(
            &self,
            _: Direction,
            _: &str,
            _: i64,
        ) -> Result<Vec<VocabularyHit>> {
            anyhow::bail!("database is locked")
        }
        async fn search_sentences(&self, _: Direction, _: &str, _: i64) -> Result<Vec<SentenceHit>> {
            anyhow::bail!("database is locked")
        }
        async fn search_sentence_translations(&self, _: &str, _: i64) -> Result<Vec<SentenceHit>> {
            anyhow::bail!("database is locked")
        }
        async fn exact_translation(&self, _: Direction, _: &str) -> Result<Option<String>> {
            anyhow::bail!("database is locked")
        }
        async fn headword_exists(&self, _: &str) -> Result<bool> {
            anyhow::bail!("database is locked")
        }
        async fn insert_stub(&self, _: &str, _: &str) -> Result<()> {
            anyhow::bail!("database is locked")
        }
        async fn all_vocabulary(&self) -> Result<Vec<VocabularyEntry>> {
            anyhow::bail!("database is locked")
        }
        async fn all_sentences(&self) -> Result<Vec<SentencePair>> {
            anyhow::bail!("database is locked")
        }
    }
}
