//! Vocabulary and sentence editing.
//!
//! Single-row adds and deletes, plus grid saves. A grid save takes the
//! full edited table (as a data grid would submit it) and applies only
//! the difference: rows without a known id are inserted, rows whose
//! content changed are updated, rows that disappeared are deleted. The
//! whole save runs in one transaction and finishes with a renumbering.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::{HashMap, HashSet};

use crate::autosync::sync_vocabulary;
use crate::models::{
    now_timestamp, NewSentence, NewVocabulary, SentencePair, Table, VocabularyEntry,
};
use crate::renumber::{renumber, renumber_in};
use crate::store::SqliteStore;
use crate::tags::tag_exists;

/// A vocabulary row as submitted from a grid. `id = None` is a new row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyDraft {
    #[serde(default)]
    pub id: Option<i64>,
    pub amis: String,
    #[serde(default)]
    pub chinese: Option<String>,
    #[serde(default)]
    pub english: Option<String>,
    #[serde(default)]
    pub part_of_speech: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A sentence row as submitted from a grid. `id = None` is a new row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceDraft {
    #[serde(default)]
    pub id: Option<i64>,
    pub amis: String,
    pub chinese: String,
    #[serde(default)]
    pub english: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl From<VocabularyEntry> for VocabularyDraft {
    fn from(v: VocabularyEntry) -> Self {
        Self {
            id: Some(v.id),
            amis: v.amis,
            chinese: v.chinese,
            english: v.english,
            part_of_speech: v.part_of_speech,
            note: v.note,
            created_at: Some(v.created_at),
        }
    }
}

impl From<SentencePair> for SentenceDraft {
    fn from(s: SentencePair) -> Self {
        Self {
            id: Some(s.id),
            amis: s.amis,
            chinese: s.chinese,
            english: s.english,
            note: s.note,
            created_at: Some(s.created_at),
        }
    }
}

/// Rows to insert, rows to update and ids to delete.
#[derive(Debug, Clone, PartialEq)]
pub struct RowDiff<T> {
    pub inserts: Vec<T>,
    pub updates: Vec<T>,
    pub deletes: Vec<i64>,
}

/// Counts reported after a grid save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GridSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub rows: usize,
}

trait GridRow: Clone {
    fn row_id(&self) -> Option<i64>;
    /// Whether `edited` leaves this row's stored content as it is. A
    /// missing `created_at` in the edit means "keep".
    fn unchanged_by(&self, edited: &Self) -> bool;
}

impl GridRow for VocabularyDraft {
    fn row_id(&self) -> Option<i64> {
        self.id
    }
    fn unchanged_by(&self, e: &Self) -> bool {
        self.amis == e.amis
            && self.chinese == e.chinese
            && self.english == e.english
            && self.part_of_speech == e.part_of_speech
            && self.note == e.note
            && (e.created_at.is_none() || self.created_at == e.created_at)
    }
}

impl GridRow for SentenceDraft {
    fn row_id(&self) -> Option<i64> {
        self.id
    }
    fn unchanged_by(&self, e: &Self) -> bool {
        self.amis == e.amis
            && self.chinese == e.chinese
            && self.english == e.english
            && self.note == e.note
            && (e.created_at.is_none() || self.created_at == e.created_at)
    }
}

fn diff_rows<T: GridRow>(current: &[T], edited: Vec<T>) -> Result<RowDiff<T>> {
    let by_id: HashMap<i64, &T> = current
        .iter()
        .filter_map(|r| r.row_id().map(|id| (id, r)))
        .collect();

    let mut kept = HashSet::new();
    let mut inserts = Vec::new();
    let mut updates = Vec::new();

    for row in edited {
        match row.row_id() {
            Some(id) if by_id.contains_key(&id) => {
                if !kept.insert(id) {
                    bail!("row id {} appears more than once in the edited table", id);
                }
                if !by_id[&id].unchanged_by(&row) {
                    updates.push(row);
                }
            }
            // Unknown ids are rows someone else deleted meanwhile; keep them as new rows.
            _ => inserts.push(row),
        }
    }

    let mut deletes: Vec<i64> = by_id.keys().filter(|id| !kept.contains(id)).copied().collect();
    deletes.sort_unstable();

    Ok(RowDiff {
        inserts,
        updates,
        deletes,
    })
}

// ============ Vocabulary ============

pub async fn list_vocabulary(pool: &SqlitePool, limit: Option<i64>) -> Result<Vec<VocabularyEntry>> {
    let rows = sqlx::query(
        "SELECT id, amis, chinese, english, part_of_speech, note, created_at \
         FROM vocabulary ORDER BY id DESC LIMIT ?",
    )
    .bind(limit.unwrap_or(-1))
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(vocabulary_from_row).collect())
}

/// Add one entry from form input. The part of speech, when given, must
/// name an existing tag. Returns the entry's id after renumbering.
pub async fn add_vocabulary(pool: &SqlitePool, entry: &NewVocabulary) -> Result<i64> {
    let amis = entry.amis.trim();
    if amis.is_empty() {
        bail!("amis must not be empty");
    }
    let pos = entry
        .part_of_speech
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    if let Some(p) = pos {
        if !tag_exists(pool, p).await? {
            bail!("unknown part of speech tag: {}", p);
        }
    }

    let created_at = now_timestamp();
    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO vocabulary (amis, chinese, english, part_of_speech, note, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(amis)
    .bind(&entry.chinese)
    .bind(&entry.english)
    .bind(pos)
    .bind(&entry.note)
    .bind(&created_at)
    .execute(&mut *tx)
    .await?;
    renumber_in(&mut tx, Table::Vocabulary).await?;
    let id: i64 = sqlx::query_scalar(
        "SELECT id FROM vocabulary WHERE amis = ? AND created_at = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(amis)
    .bind(&created_at)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(id, amis, "vocabulary entry added");
    Ok(id)
}

/// Delete by id. Returns whether a row was removed.
pub async fn delete_vocabulary(pool: &SqlitePool, id: i64) -> Result<bool> {
    delete_row(pool, Table::Vocabulary, id).await
}

pub async fn save_vocabulary_grid(
    pool: &SqlitePool,
    edited: Vec<VocabularyDraft>,
) -> Result<GridSummary> {
    if let Some(row) = edited.iter().find(|r| r.amis.trim().is_empty()) {
        bail!("amis must not be empty (row id {:?})", row.id);
    }

    let mut tx = pool.begin().await?;
    let current: Vec<VocabularyDraft> = load_vocabulary(&mut tx)
        .await?
        .into_iter()
        .map(VocabularyDraft::from)
        .collect();
    let diff = diff_rows(&current, edited)?;

    for id in &diff.deletes {
        sqlx::query("DELETE FROM vocabulary WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    for row in &diff.updates {
        sqlx::query(
            "UPDATE vocabulary SET amis = ?, chinese = ?, english = ?, part_of_speech = ?, \
             note = ?, created_at = COALESCE(?, created_at) WHERE id = ?",
        )
        .bind(row.amis.trim())
        .bind(&row.chinese)
        .bind(&row.english)
        .bind(&row.part_of_speech)
        .bind(&row.note)
        .bind(&row.created_at)
        .bind(row.id)
        .execute(&mut *tx)
        .await?;
    }
    for row in &diff.inserts {
        sqlx::query(
            "INSERT INTO vocabulary (amis, chinese, english, part_of_speech, note, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(row.amis.trim())
        .bind(&row.chinese)
        .bind(&row.english)
        .bind(&row.part_of_speech)
        .bind(&row.note)
        .bind(row.created_at.clone().unwrap_or_else(now_timestamp))
        .execute(&mut *tx)
        .await?;
    }

    let rows = renumber_in(&mut tx, Table::Vocabulary).await?;
    tx.commit().await?;

    let summary = GridSummary {
        inserted: diff.inserts.len(),
        updated: diff.updates.len(),
        deleted: diff.deletes.len(),
        rows,
    };
    tracing::info!(?summary, "vocabulary grid saved");
    Ok(summary)
}

async fn load_vocabulary(conn: &mut SqliteConnection) -> Result<Vec<VocabularyEntry>> {
    let rows = sqlx::query(
        "SELECT id, amis, chinese, english, part_of_speech, note, created_at \
         FROM vocabulary ORDER BY id",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.iter().map(vocabulary_from_row).collect())
}

fn vocabulary_from_row(row: &sqlx::sqlite::SqliteRow) -> VocabularyEntry {
    VocabularyEntry {
        id: row.get("id"),
        amis: row.get("amis"),
        chinese: row.get("chinese"),
        english: row.get("english"),
        part_of_speech: row.get("part_of_speech"),
        note: row.get("note"),
        created_at: row.get("created_at"),
    }
}

// ============ Sentences ============

pub async fn list_sentences(pool: &SqlitePool, limit: Option<i64>) -> Result<Vec<SentencePair>> {
    let rows = sqlx::query(
        "SELECT id, amis, chinese, english, note, created_at \
         FROM sentence_pairs ORDER BY id DESC LIMIT ?",
    )
    .bind(limit.unwrap_or(-1))
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(sentence_from_row).collect())
}

/// Outcome of adding a sentence pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SentenceAdded {
    pub id: i64,
    /// Vocabulary stubs created from the sentence's words.
    pub new_stubs: usize,
}

/// Add one sentence pair, then create vocabulary stubs for its unseen
/// Amis words and renumber both tables.
pub async fn add_sentence(store: &SqliteStore, sentence: &NewSentence) -> Result<SentenceAdded> {
    let amis = sentence.amis.trim();
    let chinese = sentence.chinese.trim();
    if amis.is_empty() || chinese.is_empty() {
        bail!("amis and chinese must both be non-empty");
    }

    let pool = store.pool();
    let created_at = now_timestamp();
    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO sentence_pairs (amis, chinese, english, note, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(amis)
    .bind(chinese)
    .bind(&sentence.english)
    .bind(&sentence.note)
    .bind(&created_at)
    .execute(&mut *tx)
    .await?;
    renumber_in(&mut tx, Table::Sentences).await?;
    let id: i64 = sqlx::query_scalar(
        "SELECT id FROM sentence_pairs WHERE amis = ? AND created_at = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(amis)
    .bind(&created_at)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    let new_stubs = sync_vocabulary(store, amis).await;
    if new_stubs > 0 {
        renumber(pool, Table::Vocabulary).await?;
    }

    tracing::info!(id, new_stubs, "sentence pair added");
    Ok(SentenceAdded { id, new_stubs })
}

pub async fn delete_sentence(pool: &SqlitePool, id: i64) -> Result<bool> {
    delete_row(pool, Table::Sentences, id).await
}

pub async fn save_sentence_grid(
    pool: &SqlitePool,
    edited: Vec<SentenceDraft>,
) -> Result<GridSummary> {
    if let Some(row) = edited
        .iter()
        .find(|r| r.amis.trim().is_empty() || r.chinese.trim().is_empty())
    {
        bail!("amis and chinese must both be non-empty (row id {:?})", row.id);
    }

    let mut tx = pool.begin().await?;
    let current: Vec<SentenceDraft> = load_sentences(&mut tx)
        .await?
        .into_iter()
        .map(SentenceDraft::from)
        .collect();
    let diff = diff_rows(&current, edited)?;

    for id in &diff.deletes {
        sqlx::query("DELETE FROM sentence_pairs WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    for row in &diff.updates {
        sqlx::query(
            "UPDATE sentence_pairs SET amis = ?, chinese = ?, english = ?, note = ?, \
             created_at = COALESCE(?, created_at) WHERE id = ?",
        )
        .bind(row.amis.trim())
        .bind(row.chinese.trim())
        .bind(&row.english)
        .bind(&row.note)
        .bind(&row.created_at)
        .bind(row.id)
        .execute(&mut *tx)
        .await?;
    }
    for row in &diff.inserts {
        sqlx::query(
            "INSERT INTO sentence_pairs (amis, chinese, english, note, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(row.amis.trim())
        .bind(row.chinese.trim())
        .bind(&row.english)
        .bind(&row.note)
        .bind(row.created_at.clone().unwrap_or_else(now_timestamp))
        .execute(&mut *tx)
        .await?;
    }

    let rows = renumber_in(&mut tx, Table::Sentences).await?;
    tx.commit().await?;

    let summary = GridSummary {
        inserted: diff.inserts.len(),
        updated: diff.updates.len(),
        deleted: diff.deletes.len(),
        rows,
    };
    tracing::info!(?summary, "sentence grid saved");
    Ok(summary)
}

async fn load_sentences(conn: &mut SqliteConnection) -> Result<Vec<SentencePair>> {
    let rows = sqlx::query(
        "SELECT id, amis, chinese, english, note, created_at FROM sentence_pairs ORDER BY id",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.iter().map(sentence_from_row).collect())
}

fn sentence_from_row(row: &sqlx::sqlite::SqliteRow) -> SentencePair {
    SentencePair {
        id: row.get("id"),
        amis: row.get("amis"),
        chinese: row.get("chinese"),
        english: row.get("english"),
        note: row.get("note"),
        created_at: row.get("created_at"),
    }
}

async fn delete_row(pool: &SqlitePool, table: Table, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", table.table_name()))
        .bind(id)
        .execute(&mut *tx)
        .await?;
    renumber_in(&mut tx, table).await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}
