// file: src/models/calendar.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::event::EventSource;

/// A provider calendar known locally. Only enabled calendars take part in
/// pulls, deletion detection, and push bootstrapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SyncedCalendar {
    pub source: EventSource,
    pub calendar_id: String,
    pub title: String,
    pub is_enabled: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl SyncedCalendar {
    /// A calendar seen for the first time. New calendars start disabled.
    pub fn discovered(source: EventSource, calendar_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source,
            calendar_id: calendar_id.into(),
            title: title.into(),
            is_enabled: false,
            last_synced_at: None,
        }
    }

    pub fn enabled(mut self) -> Self {
        self.is_enabled = true;
        self
    }
}
