use anyhow::Result;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashSet;

use crate::config::Config;
use crate::db;
use crate::models::{now_timestamp, LEGACY_SENTENCE_COLUMNS};

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables on an open pool. Idempotent.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vocabulary (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            amis TEXT NOT NULL,
            chinese TEXT,
            english TEXT,
            part_of_speech TEXT,
            note TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sentence_pairs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            amis TEXT NOT NULL,
            chinese TEXT NOT NULL,
            english TEXT,
            note TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Referenced from vocabulary.part_of_speech by name; no foreign key.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pos_tags (
            tag_name TEXT PRIMARY KEY,
            description TEXT NOT NULL DEFAULT '',
            sort_order INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    upgrade_legacy_columns(pool).await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_vocabulary_amis ON vocabulary(LOWER(amis))")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_vocabulary_pos ON vocabulary(part_of_speech)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sentence_pairs_created_at ON sentence_pairs(created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn table_columns(conn: &mut SqliteConnection, table: &str) -> Result<HashSet<String>> {
    let names: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;
    Ok(names.into_iter().collect())
}

/// Databases written by the older console name the sentence columns
/// `output_sentencepattern_*`, lack `sentence_pairs.note` and
/// `pos_tags.description`, and allow NULL text and timestamps. Rename and
/// add columns in place, then fill the NULLs the row types cannot hold.
async fn upgrade_legacy_columns(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;
    let mut upgraded = Vec::new();

    let sentence_columns = table_columns(&mut tx, "sentence_pairs").await?;
    for (legacy, current) in LEGACY_SENTENCE_COLUMNS {
        if sentence_columns.contains(*legacy) && !sentence_columns.contains(*current) {
            sqlx::query(&format!(
                "ALTER TABLE sentence_pairs RENAME COLUMN {} TO {}",
                legacy, current
            ))
            .execute(&mut *tx)
            .await?;
            upgraded.push(*legacy);
        }
    }
    if !sentence_columns.contains("note") {
        sqlx::query("ALTER TABLE sentence_pairs ADD COLUMN note TEXT")
            .execute(&mut *tx)
            .await?;
        upgraded.push("sentence_pairs.note");
    }

    let tag_columns = table_columns(&mut tx, "pos_tags").await?;
    if !tag_columns.contains("description") {
        sqlx::query("ALTER TABLE pos_tags ADD COLUMN description TEXT NOT NULL DEFAULT ''")
            .execute(&mut *tx)
            .await?;
        upgraded.push("pos_tags.description");
    }

    let now = now_timestamp();
    for table in ["vocabulary", "sentence_pairs"] {
        sqlx::query(&format!(
            "UPDATE {} SET created_at = ? WHERE created_at IS NULL",
            table
        ))
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!("UPDATE {} SET amis = '' WHERE amis IS NULL", table))
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query("UPDATE sentence_pairs SET chinese = '' WHERE chinese IS NULL")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    if !upgraded.is_empty() {
        tracing::info!(columns = ?upgraded, "upgraded legacy database columns");
    }
    Ok(())
}
