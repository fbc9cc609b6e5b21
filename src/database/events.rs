// file: src/database/events.rs
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Executor, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::models::{Event, EventSource, SyncStatus};
use crate::utils::logging::log_database_operation;

const EVENT_COLUMNS: &str = r#"
    id, title, start_time, end_time, is_all_day, notes, location, category,
    source, calendar_id, foreign_id, last_modified_local, last_modified_remote,
    sync_status, is_deleted, recurrence_data, excluded_dates, created_at
"#;

fn ensure_valid(event: &Event) -> Result<()> {
    if !event.is_valid() {
        return Err(anyhow::anyhow!("Event {} ends before it starts", event.id));
    }
    Ok(())
}

pub async fn insert(pool: &SqlitePool, event: &Event) -> Result<()> {
    ensure_valid(event)?;
    sqlx::query(
        r#"
        INSERT INTO events (
            id, title, start_time, end_time, is_all_day, notes, location, category,
            source, calendar_id, foreign_id, last_modified_local, last_modified_remote,
            sync_status, is_deleted, recurrence_data, excluded_dates, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.id)
    .bind(&event.title)
    .bind(event.start_time)
    .bind(event.end_time)
    .bind(event.is_all_day)
    .bind(&event.notes)
    .bind(&event.location)
    .bind(&event.category)
    .bind(event.source)
    .bind(&event.calendar_id)
    .bind(&event.foreign_id)
    .bind(event.last_modified_local)
    .bind(event.last_modified_remote)
    .bind(event.sync_status)
    .bind(event.is_deleted)
    .bind(&event.recurrence_data)
    .bind(&event.excluded_dates)
    .bind(event.created_at)
    .execute(pool)
    .await
    .with_context(|| format!("Failed to insert event {}", event.id))?;

    Ok(())
}

/// Overwrites every mutable column of an existing event.
pub async fn update(pool: &SqlitePool, event: &Event) -> Result<()> {
    ensure_valid(event)?;
    let result = sqlx::query(
        r#"
        UPDATE events SET
            title = ?, start_time = ?, end_time = ?, is_all_day = ?, notes = ?,
            location = ?, category = ?, source = ?, calendar_id = ?, foreign_id = ?,
            last_modified_local = ?, last_modified_remote = ?, sync_status = ?,
            is_deleted = ?, recurrence_data = ?, excluded_dates = ?
        WHERE id = ?
        "#,
    )
    .bind(&event.title)
    .bind(event.start_time)
    .bind(event.end_time)
    .bind(event.is_all_day)
    .bind(&event.notes)
    .bind(&event.location)
    .bind(&event.category)
    .bind(event.source)
    .bind(&event.calendar_id)
    .bind(&event.foreign_id)
    .bind(event.last_modified_local)
    .bind(event.last_modified_remote)
    .bind(event.sync_status)
    .bind(event.is_deleted)
    .bind(&event.recurrence_data)
    .bind(&event.excluded_dates)
    .bind(event.id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(anyhow::anyhow!("Event {} not found", event.id));
    }
    Ok(())
}

async fn upsert<'e, E>(executor: E, event: &Event) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO events (
            id, title, start_time, end_time, is_all_day, notes, location, category,
            source, calendar_id, foreign_id, last_modified_local, last_modified_remote,
            sync_status, is_deleted, recurrence_data, excluded_dates, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            start_time = excluded.start_time,
            end_time = excluded.end_time,
            is_all_day = excluded.is_all_day,
            notes = excluded.notes,
            location = excluded.location,
            category = excluded.category,
            source = excluded.source,
            calendar_id = excluded.calendar_id,
            foreign_id = excluded.foreign_id,
            last_modified_local = excluded.last_modified_local,
            last_modified_remote = excluded.last_modified_remote,
            sync_status = excluded.sync_status,
            is_deleted = excluded.is_deleted,
            recurrence_data = excluded.recurrence_data,
            excluded_dates = excluded.excluded_dates
        "#,
    )
    .bind(event.id)
    .bind(&event.title)
    .bind(event.start_time)
    .bind(event.end_time)
    .bind(event.is_all_day)
    .bind(&event.notes)
    .bind(&event.location)
    .bind(&event.category)
    .bind(event.source)
    .bind(&event.calendar_id)
    .bind(&event.foreign_id)
    .bind(event.last_modified_local)
    .bind(event.last_modified_remote)
    .bind(event.sync_status)
    .bind(event.is_deleted)
    .bind(&event.recurrence_data)
    .bind(&event.excluded_dates)
    .bind(event.created_at)
    .execute(executor)
    .await
    .with_context(|| format!("Failed to save event {}", event.id))?;

    Ok(())
}

/// Inserts or overwrites all `events` in one transaction. Either every row
/// lands or none does.
pub async fn save_all(pool: &SqlitePool, events: &[Event]) -> Result<()> {
    if events.is_empty() {
        return Ok(());
    }

    for event in events {
        ensure_valid(event)?;
    }

    let mut tx = pool.begin().await.context("Failed to open transaction")?;
    for event in events {
        upsert(&mut *tx, event).await?;
    }
    tx.commit().await.context("Failed to commit events")?;

    log_database_operation("save_all", "events", events.len() as u64);
    Ok(())
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Option<Event>> {
    let sql = format!("SELECT {} FROM events WHERE id = ?", EVENT_COLUMNS);
    let event = sqlx::query_as::<_, Event>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(event)
}

/// Local copy of a provider event, deleted or not.
pub async fn find_by_foreign_id(
    pool: &SqlitePool,
    source: EventSource,
    foreign_id: &str,
) -> Result<Option<Event>> {
    let sql = format!(
        "SELECT {} FROM events WHERE source = ? AND foreign_id = ? LIMIT 1",
        EVENT_COLUMNS
    );
    let event = sqlx::query_as::<_, Event>(&sql)
        .bind(source)
        .bind(foreign_id)
        .fetch_optional(pool)
        .await?;

    Ok(event)
}

/// Events with local changes that still need pushing.
pub async fn pending(pool: &SqlitePool, source: EventSource) -> Result<Vec<Event>> {
    let sql = format!(
        "SELECT {} FROM events WHERE source = ? AND sync_status = ? AND is_deleted = 0 ORDER BY start_time ASC",
        EVENT_COLUMNS
    );
    let events = sqlx::query_as::<_, Event>(&sql)
        .bind(source)
        .bind(SyncStatus::Pending)
        .fetch_all(pool)
        .await?;

    Ok(events)
}

/// Soft-deleted events whose provider copy hasn't been removed yet.
pub async fn awaiting_remote_delete(pool: &SqlitePool, source: EventSource) -> Result<Vec<Event>> {
    let sql = format!(
        "SELECT {} FROM events WHERE source = ? AND is_deleted = 1 AND foreign_id IS NOT NULL AND sync_status != ?",
        EVENT_COLUMNS
    );
    let events = sqlx::query_as::<_, Event>(&sql)
        .bind(source)
        .bind(SyncStatus::Deleted)
        .fetch_all(pool)
        .await?;

    Ok(events)
}

/// Live, synced events of `source` that belong to one of `calendar_ids`.
pub async fn synced_in_calendars(
    pool: &SqlitePool,
    source: EventSource,
    calendar_ids: &[String],
) -> Result<Vec<Event>> {
    let sql = format!(
        "SELECT {} FROM events WHERE source = ? AND sync_status = ? AND is_deleted = 0 AND foreign_id IS NOT NULL",
        EVENT_COLUMNS
    );
    let events = sqlx::query_as::<_, Event>(&sql)
        .bind(source)
        .bind(SyncStatus::Synced)
        .fetch_all(pool)
        .await?;

    Ok(events
        .into_iter()
        .filter(|e| {
            e.calendar_id
                .as_ref()
                .map_or(false, |id| calendar_ids.contains(id))
        })
        .collect())
}

pub async fn for_source(pool: &SqlitePool, source: EventSource) -> Result<Vec<Event>> {
    let sql = format!(
        "SELECT {} FROM events WHERE source = ? AND is_deleted = 0 ORDER BY start_time ASC",
        EVENT_COLUMNS
    );
    let events = sqlx::query_as::<_, Event>(&sql)
        .bind(source)
        .fetch_all(pool)
        .await?;

    Ok(events)
}

/// Every live master event, the input to occurrence expansion.
pub async fn all_active(pool: &SqlitePool) -> Result<Vec<Event>> {
    let sql = format!(
        "SELECT {} FROM events WHERE is_deleted = 0 ORDER BY start_time ASC",
        EVENT_COLUMNS
    );
    let events = sqlx::query_as::<_, Event>(&sql).fetch_all(pool).await?;

    Ok(events)
}

/// Soft delete. A pushed event is left for the next push to remove remotely.
pub async fn mark_deleted(pool: &SqlitePool, id: Uuid) -> Result<()> {
    let result = sqlx::query(
        "UPDATE events SET is_deleted = 1, last_modified_local = ? WHERE id = ?",
    )
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(anyhow::anyhow!("Event {} not found", id));
    }
    Ok(())
}

/// Hard-deletes every event of `source`. Returns the number of rows removed.
/// Hard-deletes every event of one calendar, deleted or not.
pub async fn delete_in_calendar(pool: &SqlitePool, source: EventSource, calendar_id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM events WHERE source = ? AND calendar_id = ?")
        .bind(source)
        .bind(calendar_id)
        .execute(pool)
        .await?;

    log_database_operation("delete", "events", result.rows_affected());
    Ok(result.rows_affected())
}

pub async fn delete_for_source(pool: &SqlitePool, source: EventSource) -> Result<u64> {
    let result = sqlx::query("DELETE FROM events WHERE source = ?")
        .bind(source)
        .execute(pool)
        .await?;

    log_database_operation("delete", "events", result.rows_affected());
    Ok(result.rows_affected())
}
