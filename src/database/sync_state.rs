// file: src/database/sync_state.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::models::EventSource;

pub async fn last_sync(pool: &SqlitePool, source: EventSource) -> Result<Option<DateTime<Utc>>> {
    let value: Option<Option<DateTime<Utc>>> =
        sqlx::query_scalar("SELECT last_synced_at FROM sync_state WHERE source = ?")
            .bind(source)
            .fetch_optional(pool)
            .await?;

    Ok(value.flatten())
}

pub async fn set_last_sync(pool: &SqlitePool, source: EventSource, at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sync_state (source, last_synced_at) VALUES (?, ?)
        ON CONFLICT(source) DO UPDATE SET last_synced_at = excluded.last_synced_at
        "#,
    )
    .bind(source)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn clear(pool: &SqlitePool, source: EventSource) -> Result<()> {
    sqlx::query("DELETE FROM sync_state WHERE source = ?")
        .bind(source)
        .execute(pool)
        .await?;

    Ok(())
}
