// file: src/database/mod.rs

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqlitePool, SqlitePoolOptions},
    Row, Sqlite,
};
use uuid::Uuid;

use crate::models::{Event, EventSource, SyncedCalendar};

// Declare submodules
pub mod calendars;
pub mod events;
pub mod sync_state;

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database in the user's data directory.
    pub async fn new() -> Result<Self> {
        let path = default_database_path()?;
        Self::open(&path).await
    }

    pub async fn open(path: &Path) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", path.display());

        // Create database if it doesn't exist
        let db_exists = Sqlite::database_exists(&db_url)
            .await
            .context("Failed to check if database exists")?;
        if !db_exists {
            info!("Creating database at {}", path.display());
            Sqlite::create_database(&db_url)
                .await
                .context("Failed to create database")?;
        }

        let pool = SqlitePool::connect(&db_url)
            .await
            .context("Failed to connect to database")?;

        Self::initialize(pool).await
    }

    /// A private in-memory database. One pinned connection, so every query
    /// sees the same data.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        Self::initialize(pool).await
    }

    async fn initialize(pool: SqlitePool) -> Result<Self> {
        run_schema(&pool).await.context("Failed to run database schema")?;

        // Ensure specific migrations for existing databases
        ensure_migrations(&pool).await.context("Failed to ensure migrations")?;

        info!("Database initialized successfully");
        Ok(Database { pool })
    }

    // --- Event Delegates ---

    pub async fn insert_event(&self, event: &Event) -> Result<()> {
        events::insert(&self.pool, event).await
    }

    pub async fn update_event(&self, event: &Event) -> Result<()> {
        events::update(&self.pool, event).await
    }

    pub async fn save_all(&self, events: &[Event]) -> Result<()> {
        events::save_all(&self.pool, events).await
    }

    pub async fn get_event(&self, id: Uuid) -> Result<Option<Event>> {
        events::get(&self.pool, id).await
    }

    pub async fn find_by_foreign_id(&self, source: EventSource, foreign_id: &str) -> Result<Option<Event>> {
        events::find_by_foreign_id(&self.pool, source, foreign_id).await
    }

    pub async fn pending_events(&self, source: EventSource) -> Result<Vec<Event>> {
        events::pending(&self.pool, source).await
    }

    pub async fn events_awaiting_remote_delete(&self, source: EventSource) -> Result<Vec<Event>> {
        events::awaiting_remote_delete(&self.pool, source).await
    }

    pub async fn synced_events_in_calendars(
        &self,
        source: EventSource,
        calendar_ids: &[String],
    ) -> Result<Vec<Event>> {
        events::synced_in_calendars(&self.pool, source, calendar_ids).await
    }

    pub async fn events_for_source(&self, source: EventSource) -> Result<Vec<Event>> {
        events::for_source(&self.pool, source).await
    }

    pub async fn active_events(&self) -> Result<Vec<Event>> {
        events::all_active(&self.pool).await
    }

    pub async fn mark_event_deleted(&self, id: Uuid) -> Result<()> {
        events::mark_deleted(&self.pool, id).await
    }

    pub async fn delete_events_for_source(&self, source: EventSource) -> Result<u64> {
        events::delete_for_source(&self.pool, source).await
    }

    pub async fn delete_events_in_calendar(&self, source: EventSource, calendar_id: &str) -> Result<u64> {
        events::delete_in_calendar(&self.pool, source, calendar_id).await
    }

    // --- Calendar Delegates ---

    pub async fn upsert_calendar(&self, calendar: &SyncedCalendar) -> Result<()> {
        calendars::upsert(&self.pool, calendar).await
    }

    pub async fn calendars_for_source(&self, source: EventSource) -> Result<Vec<SyncedCalendar>> {
        calendars::for_source(&self.pool, source).await
    }

    pub async fn enabled_calendars(&self, source: EventSource) -> Result<Vec<SyncedCalendar>> {
        calendars::enabled(&self.pool, source).await
    }

    pub async fn set_calendar_enabled(
        &self,
        source: EventSource,
        calendar_id: &str,
        enabled: bool,
    ) -> Result<()> {
        calendars::set_enabled(&self.pool, source, calendar_id, enabled).await
    }

    pub async fn touch_calendars_synced(&self, source: EventSource, at: DateTime<Utc>) -> Result<()> {
        calendars::touch_synced(&self.pool, source, at).await
    }

    pub async fn delete_calendars_for_source(&self, source: EventSource) -> Result<u64> {
        calendars::delete_for_source(&self.pool, source).await
    }

    pub async fn delete_calendar(&self, source: EventSource, calendar_id: &str) -> Result<u64> {
        calendars::delete(&self.pool, source, calendar_id).await
    }

    // --- Sync State Delegates ---

    pub async fn last_sync(&self, source: EventSource) -> Result<Option<DateTime<Utc>>> {
        sync_state::last_sync(&self.pool, source).await
    }

    pub async fn set_last_sync(&self, source: EventSource, at: DateTime<Utc>) -> Result<()> {
        sync_state::set_last_sync(&self.pool, source, at).await
    }

    pub async fn clear_last_sync(&self, source: EventSource) -> Result<()> {
        sync_state::clear(&self.pool, source).await
    }
}

fn default_database_path() -> Result<PathBuf> {
    let dir = dirs::data_dir()
        .context("No user data directory on this platform")?
        .join("lunacal");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir.join("lunacal.db"))
}

async fn run_schema(pool: &SqlitePool) -> Result<()> {
    let schema = include_str!("schema.sql");

    let mut current_statement = String::new();

    for line in schema.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") || trimmed.is_empty() {
            continue;
        }

        current_statement.push_str(line);
        current_statement.push('\n');

        if trimmed.ends_with(';') {
            sqlx::query(&current_statement).execute(pool).await?;
            current_statement.clear();
        }
    }
    Ok(())
}

async fn ensure_migrations(pool: &SqlitePool) -> Result<()> {
    let rows = sqlx::query("PRAGMA table_info(events)")
        .fetch_all(pool)
        .await
        .context("Failed to fetch table info")?;

    let columns: Vec<String> = rows
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect();

    // Databases created before exclusion dates were tracked
    if !columns.contains(&"excluded_dates".to_string()) {
        info!("Migrating: Adding excluded_dates column to events table");
        sqlx::query("ALTER TABLE events ADD COLUMN excluded_dates TEXT")
            .execute(pool)
            .await
            .context("Failed to add excluded_dates column")?;
    }

    if !columns.contains(&"category".to_string()) {
        info!("Migrating: Adding category column to events table");
        sqlx::query("ALTER TABLE events ADD COLUMN category TEXT NOT NULL DEFAULT 'other'")
            .execute(pool)
            .await
            .context("Failed to add category column")?;
    }

    Ok(())
}
