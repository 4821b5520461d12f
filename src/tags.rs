//! Part-of-speech tag management.
//!
//! Tags are a small controlled vocabulary referenced by
//! `vocabulary.part_of_speech`. The reference is by name, not a foreign
//! key, so renaming cascades by hand inside one transaction.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::models::PartOfSpeechTag;

pub async fn list_tags(pool: &SqlitePool) -> Result<Vec<PartOfSpeechTag>> {
    let rows = sqlx::query(
        "SELECT tag_name, description, sort_order FROM pos_tags ORDER BY sort_order, tag_name",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| PartOfSpeechTag {
            tag_name: row.get("tag_name"),
            description: row.get("description"),
            sort_order: row.get("sort_order"),
        })
        .collect())
}

pub async fn tag_exists(pool: &SqlitePool, name: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM pos_tags WHERE tag_name = ?")
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

/// Add a tag. Returns `false` when a tag with that name already exists.
pub async fn add_tag(
    pool: &SqlitePool,
    name: &str,
    description: &str,
    sort_order: i64,
) -> Result<bool> {
    let name = name.trim();
    if name.is_empty() {
        bail!("tag name must not be empty");
    }
    let result = sqlx::query(
        "INSERT INTO pos_tags (tag_name, description, sort_order) VALUES (?, ?, ?) \
         ON CONFLICT(tag_name) DO NOTHING",
    )
    .bind(name)
    .bind(description)
    .bind(sort_order)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Update a tag's description and, if given, its sort order.
pub async fn describe_tag(
    pool: &SqlitePool,
    name: &str,
    description: &str,
    sort_order: Option<i64>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE pos_tags SET description = ?, sort_order = COALESCE(?, sort_order) \
         WHERE tag_name = ?",
    )
    .bind(description)
    .bind(sort_order)
    .bind(name)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        bail!("no such tag: {}", name);
    }
    Ok(())
}

/// Delete a tag. Entries that use it keep the (now dangling) name.
pub async fn delete_tag(pool: &SqlitePool, name: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM pos_tags WHERE tag_name = ?")
        .bind(name)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Rename `old` to `new` and rewrite every vocabulary entry that uses
/// it. Returns the number of entries rewritten.
///
/// The new tag takes over the old tag's description and sort order. If
/// `new` already exists the two tags merge into it.
pub async fn rename_tag(pool: &SqlitePool, old: &str, new: &str) -> Result<u64> {
    let new = new.trim();
    if new.is_empty() {
        bail!("new tag name must not be empty");
    }
    if old == new {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;

    let existing = sqlx::query("SELECT description, sort_order FROM pos_tags WHERE tag_name = ?")
        .bind(old)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(existing) = existing else {
        bail!("no such tag: {}", old);
    };
    let description: String = existing.get("description");
    let sort_order: i64 = existing.get("sort_order");

    sqlx::query(
        "INSERT INTO pos_tags (tag_name, description, sort_order) VALUES (?, ?, ?) \
         ON CONFLICT(tag_name) DO NOTHING",
    )
    .bind(new)
    .bind(&description)
    .bind(sort_order)
    .execute(&mut *tx)
    .await?;

    let updated = sqlx::query("UPDATE vocabulary SET part_of_speech = ? WHERE part_of_speech = ?")
        .bind(new)
        .bind(old)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    sqlx::query("DELETE FROM pos_tags WHERE tag_name = ?")
        .bind(old)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    tracing::info!(old, new, entries = updated, "tag renamed");
    Ok(updated)
}

/// How many vocabulary entries use each tag, including names no longer
/// in `pos_tags`. Untagged entries are not counted.
pub async fn tag_usage(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query(
        "SELECT part_of_speech, COUNT(*) AS n FROM vocabulary \
         WHERE part_of_speech IS NOT NULL AND part_of_speech != '' \
         GROUP BY part_of_speech ORDER BY n DESC, part_of_speech",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get("part_of_speech"), row.get("n")))
        .collect())
}
