//! Dense id renumbering.
//!
//! Corpus ids are positions, not opaque keys: after every insert,
//! delete, grid save or import a table's ids are reassigned to exactly
//! `1..N` in ascending `created_at` order (ties keep their previous id
//! order), and the AUTOINCREMENT counter is reset to `N` so the next
//! insert gets `N + 1`.

use anyhow::Result;
use sqlx::{SqliteConnection, SqlitePool};

use crate::models::Table;

/// Renumber `table` inside its own transaction. Returns the row count.
pub async fn renumber(pool: &SqlitePool, table: Table) -> Result<usize> {
    let mut tx = pool.begin().await?;
    let n = renumber_in(&mut tx, table).await?;
    tx.commit().await?;
    tracing::debug!(table = table.table_name(), rows = n, "renumbered ids");
    Ok(n)
}

/// Renumber `table` on a connection the caller controls, so it can join
/// a larger transaction.
pub(crate) async fn renumber_in(conn: &mut SqliteConnection, table: Table) -> Result<usize> {
    let name = table.table_name();

    let ids: Vec<i64> = sqlx::query_scalar(&format!(
        "SELECT id FROM {} ORDER BY created_at ASC, id ASC",
        name
    ))
    .fetch_all(&mut *conn)
    .await?;

    let n = ids.len() as i64;
    let max_abs: i64 = sqlx::query_scalar(&format!(
        "SELECT COALESCE(MAX(ABS(id)), 0) FROM {}",
        name
    ))
    .fetch_one(&mut *conn)
    .await?;

    // Park every row below any id in use, in target order, then flip the
    // whole range into 1..N. Neither step can collide with a live id.
    let shift = max_abs + n;
    for (idx, old_id) in ids.iter().enumerate() {
        sqlx::query(&format!("UPDATE {} SET id = ? WHERE id = ?", name))
            .bind(-(shift + idx as i64 + 1))
            .bind(old_id)
            .execute(&mut *conn)
            .await?;
    }
    sqlx::query(&format!("UPDATE {} SET id = -id - ?", name))
        .bind(shift)
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM sqlite_sequence WHERE name = ?")
        .bind(name)
        .execute(&mut *conn)
        .await?;
    if n > 0 {
        sqlx::query("INSERT INTO sqlite_sequence (name, seq) VALUES (?, ?)")
            .bind(name)
            .bind(n)
            .execute(&mut *conn)
            .await?;
    }

    Ok(ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::temp_store;

    async fn insert_with(pool: &SqlitePool, id: i64, amis: &str, created_at: &str) {
        sqlx::query("INSERT INTO vocabulary (id, amis, created_at) VALUES (?, ?, ?)")
            .bind(id)
            .bind(amis)
            .bind(created_at)
            .execute(pool)
            .await
            .unwrap();
    }

    async fn ids_by_word(pool: &SqlitePool) -> Vec<(i64, String)> {
        sqlx::query_as("SELECT id, amis FROM vocabulary ORDER BY id")
            .fetch_all(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn ids_become_dense_in_created_order() {
        let (_tmp, store) = temp_store().await;
        let pool = store.pool();
        insert_with(pool, 17, "c", "2024-03-01 00:00:00").await;
        insert_with(pool, 2, "a", "2024-01-01 00:00:00").await;
        insert_with(pool, 40, "d", "2024-04-01 00:00:00").await;
        insert_with(pool, 3, "b", "2024-02-01 00:00:00").await;

        let n = renumber(pool, Table::Vocabulary).await.unwrap();
        assert_eq!(n, 4);
        assert_eq!(
            ids_by_word(pool).await,
            vec![
                (1, "a".to_string()),
                (2, "b".to_string()),
                (3, "c".to_string()),
                (4, "d".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn next_insert_continues_after_n() {
        let (_tmp, store) = temp_store().await;
        let pool = store.pool();
        insert_with(pool, 90, "a", "2024-01-01 00:00:00").await;
        insert_with(pool, 91, "b", "2024-01-02 00:00:00").await;
        renumber(pool, Table::Vocabulary).await.unwrap();

        sqlx::query("INSERT INTO vocabulary (amis, created_at) VALUES ('c', '2024-01-03 00:00:00')")
            .execute(pool)
            .await
            .unwrap();
        let last: i64 = sqlx::query_scalar("SELECT id FROM vocabulary WHERE amis = 'c'")
            .fetch_one(pool)
            .await
            .unwrap();
        assert_eq!(last, 3);
    }

    #[tokio::test]
    async fn equal_timestamps_keep_previous_order() {
        let (_tmp, store) = temp_store().await;
        let pool = store.pool();
        insert_with(pool, 9, "second", "2024-01-01 00:00:00").await;
        insert_with(pool, 5, "first", "2024-01-01 00:00:00").await;
        renumber(pool, Table::Vocabulary).await.unwrap();
        assert_eq!(
            ids_by_word(pool).await,
            vec![(1, "first".to_string()), (2, "second".to_string())]
        );
    }

    #[tokio::test]
    async fn empty_table_is_fine() {
        let (_tmp, store) = temp_store().await;
        assert_eq!(renumber(store.pool(), Table::Sentences).await.unwrap(), 0);
    }
}
