// file: src/models/occurrence.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::{Event, EventSource, SyncStatus};

/// A master event projected onto one date. Computed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: Uuid,
    pub master_id: Uuid,
    pub occurrence_date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub title: String,
    pub is_all_day: bool,
    pub notes: Option<String>,
    pub location: Option<String>,
    pub category: String,
    pub source: EventSource,
    pub calendar_id: Option<String>,
    pub foreign_id: Option<String>,
    pub sync_status: SyncStatus,
    pub last_modified_local: DateTime<Utc>,
    pub last_modified_remote: Option<DateTime<Utc>>,
    pub is_recurring: bool,
}

impl Occurrence {
    pub(crate) fn project(
        master: &Event,
        id: Uuid,
        occurrence_date: NaiveDate,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
        is_recurring: bool,
    ) -> Self {
        Self {
            id,
            master_id: master.id,
            occurrence_date,
            start_time,
            end_time,
            title: master.title.clone(),
            is_all_day: master.is_all_day,
            notes: master.notes.clone(),
            location: master.location.clone(),
            category: master.category.clone(),
            source: master.source,
            calendar_id: master.calendar_id.clone(),
            foreign_id: master.foreign_id.clone(),
            sync_status: master.sync_status,
            last_modified_local: master.last_modified_local,
            last_modified_remote: master.last_modified_remote,
            is_recurring,
        }
    }

    /// Whether this is the master itself rather than a derived copy.
    pub fn is_master(&self) -> bool {
        self.id == self.master_id
    }
}
