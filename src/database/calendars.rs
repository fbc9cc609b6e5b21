// file: src/database/calendars.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::models::{EventSource, SyncedCalendar};

/// Inserts a calendar or refreshes its title. An existing row keeps its
/// enabled flag.
pub async fn upsert(pool: &SqlitePool, calendar: &SyncedCalendar) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO calendars (source, calendar_id, title, is_enabled, last_synced_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(source, calendar_id) DO UPDATE SET title = excluded.title
        "#,
    )
    .bind(calendar.source)
    .bind(&calendar.calendar_id)
    .bind(&calendar.title)
    .bind(calendar.is_enabled)
    .bind(calendar.last_synced_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn for_source(pool: &SqlitePool, source: EventSource) -> Result<Vec<SyncedCalendar>> {
    let calendars = sqlx::query_as::<_, SyncedCalendar>(
        "SELECT source, calendar_id, title, is_enabled, last_synced_at FROM calendars WHERE source = ? ORDER BY rowid",
    )
    .bind(source)
    .fetch_all(pool)
    .await?;

    Ok(calendars)
}

pub async fn enabled(pool: &SqlitePool, source: EventSource) -> Result<Vec<SyncedCalendar>> {
    let calendars = sqlx::query_as::<_, SyncedCalendar>(
        "SELECT source, calendar_id, title, is_enabled, last_synced_at FROM calendars WHERE source = ? AND is_enabled = 1 ORDER BY rowid",
    )
    .bind(source)
    .fetch_all(pool)
    .await?;

    Ok(calendars)
}

pub async fn set_enabled(
    pool: &SqlitePool,
    source: EventSource,
    calendar_id: &str,
    enabled: bool,
) -> Result<()> {
    let result = sqlx::query("UPDATE calendars SET is_enabled = ? WHERE source = ? AND calendar_id = ?")
        .bind(enabled)
        .bind(source)
        .bind(calendar_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(anyhow::anyhow!(
            "Calendar {} not found for {}",
            calendar_id,
            source.as_str()
        ));
    }
    Ok(())
}

/// Stamps every enabled calendar of `source` as synced at `at`.
pub async fn touch_synced(pool: &SqlitePool, source: EventSource, at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE calendars SET last_synced_at = ? WHERE source = ? AND is_enabled = 1")
        .bind(at)
        .bind(source)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn delete_for_source(pool: &SqlitePool, source: EventSource) -> Result<u64> {
    let result = sqlx::query("DELETE FROM calendars WHERE source = ?")
        .bind(source)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

pub async fn delete(pool: &SqlitePool, source: EventSource, calendar_id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM calendars WHERE source = ? AND calendar_id = ?")
        .bind(source)
        .bind(calendar_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
