// file: src/database/tracked.rs
use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::models::{StateSnapshot, TrackedEvent};

pub async fn load_all(pool: &SqlitePool) -> Result<Vec<TrackedEvent>> {
    let records = sqlx::query_as::<_, TrackedEvent>(
        "SELECT source_uid, primary_id, secondary_id, content_hash, sequence, last_synced
         FROM tracked_events
         ORDER BY source_uid",
    )
    .fetch_all(pool)
    .await
    .context("Failed to load tracked events")?;

    Ok(records)
}

/// Swap the whole table for `snapshot` in one transaction.
pub async fn replace_all(pool: &SqlitePool, snapshot: &StateSnapshot) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to start state transaction")?;

    sqlx::query("DELETE FROM tracked_events")
        .execute(&mut *tx)
        .await
        .context("Failed to clear tracked events")?;

    for record in snapshot.records() {
        sqlx::query(
            "INSERT INTO tracked_events
             (source_uid, primary_id, secondary_id, content_hash, sequence, last_synced)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.source_uid)
        .bind(&record.primary_id)
        .bind(&record.secondary_id)
        .bind(&record.content_hash)
        .bind(record.sequence)
        .bind(record.last_synced)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to store tracked event {}", record.source_uid))?;
    }

    tx.commit().await.context("Failed to commit state transaction")?;
    Ok(())
}

pub async fn clear(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM tracked_events")
        .execute(pool)
        .await
        .context("Failed to clear tracked events")?;
    Ok(result.rows_affected())
}
