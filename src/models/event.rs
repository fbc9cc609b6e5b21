// file: src/models/event.rs
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::recurrence::RecurrenceRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
    Deleted,
}

/// Where an event lives. Events created on this device are `Local` and are
/// never pushed anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Local,
    Google,
    Microsoft,
    Apple,
    /// Read-only iCalendar feed subscription.
    Ics,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Local => "local",
            EventSource::Google => "google",
            EventSource::Microsoft => "microsoft",
            EventSource::Apple => "apple",
            EventSource::Ics => "ics",
        }
    }
}

/// A master event as stored locally.
///
/// `recurrence_data` holds the JSON form of a [`RecurrenceRule`];
/// `excluded_dates` keeps the provider's raw `EXDATE` values, comma-joined,
/// and is only parsed at expansion time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_all_day: bool,
    pub notes: Option<String>,
    pub location: Option<String>,
    pub category: String,
    pub source: EventSource,
    pub calendar_id: Option<String>,
    pub foreign_id: Option<String>,
    pub last_modified_local: DateTime<Utc>,
    pub last_modified_remote: Option<DateTime<Utc>>,
    pub sync_status: SyncStatus,
    pub is_deleted: bool,
    pub recurrence_data: Option<String>,
    pub excluded_dates: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(title: impl Into<String>, start_time: DateTime<Utc>, source: EventSource) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            start_time,
            end_time: None,
            is_all_day: false,
            notes: None,
            location: None,
            category: "other".to_string(),
            source,
            calendar_id: None,
            foreign_id: None,
            last_modified_local: now,
            last_modified_remote: None,
            sync_status: SyncStatus::Pending,
            is_deleted: false,
            recurrence_data: None,
            excluded_dates: None,
            created_at: now,
        }
    }

    pub fn with_end(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn all_day(mut self) -> Self {
        self.is_all_day = true;
        self
    }

    pub fn with_rule(mut self, rule: &RecurrenceRule) -> Result<Self, serde_json::Error> {
        self.set_recurrence_rule(rule)?;
        Ok(self)
    }

    /// Decodes the stored rule. No stored rule decodes as `RecurrenceRule::None`.
    pub fn recurrence_rule(&self) -> Result<RecurrenceRule, serde_json::Error> {
        match &self.recurrence_data {
            Some(data) => RecurrenceRule::from_json(data),
            None => Ok(RecurrenceRule::None),
        }
    }

    /// Replaces the rule. Rules are values: editing one means attaching a new one.
    pub fn set_recurrence_rule(&mut self, rule: &RecurrenceRule) -> Result<(), serde_json::Error> {
        self.recurrence_data = match rule {
            RecurrenceRule::None => None,
            rule => Some(rule.to_json()?),
        };
        Ok(())
    }

    pub fn has_recurrence(&self) -> bool {
        self.recurrence_data.is_some()
    }

    /// Raw `EXDATE` values, split back out of the stored text.
    pub fn excluded_date_values(&self) -> Vec<&str> {
        self.excluded_dates
            .as_deref()
            .map(|raw| raw.split(',').map(str::trim).filter(|v| !v.is_empty()).collect())
            .unwrap_or_default()
    }

    pub fn is_valid(&self) -> bool {
        self.end_time.map_or(true, |end| end >= self.start_time)
    }

    /// Calendar days `[first, last]` the event covers in `tz`.
    ///
    /// An end at exactly midnight is exclusive, so a one-day all-day event
    /// stored as `[D 00:00, D+1 00:00)` covers only `D`.
    pub fn covered_days(&self, tz: Tz) -> (NaiveDate, NaiveDate) {
        let first = self.start_time.with_timezone(&tz).date_naive();
        let last = match self.end_time {
            Some(end) => {
                let local_end = end.with_timezone(&tz);
                let day = local_end.date_naive();
                if local_end.num_seconds_from_midnight() == 0 && day > first {
                    day.pred_opt().unwrap_or(day)
                } else {
                    day
                }
            }
            None => first,
        };
        (first, last.max(first))
    }

    pub fn is_multi_day_all_day(&self, tz: Tz) -> bool {
        let (first, last) = self.covered_days(tz);
        self.is_all_day && last > first
    }

    /// Records a local edit so the next push picks the event up.
    pub fn touch(&mut self) {
        self.last_modified_local = Utc::now();
        if self.sync_status != SyncStatus::Deleted {
            self.sync_status = SyncStatus::Pending;
        }
    }

    /// Soft-deletes the event. A pushed event keeps its foreign id so the
    /// provider copy can be removed on the next push.
    pub fn mark_deleted(&mut self) {
        self.is_deleted = true;
        self.last_modified_local = Utc::now();
    }

    pub fn is_awaiting_remote_delete(&self) -> bool {
        self.is_deleted && self.foreign_id.is_some() && self.sync_status != SyncStatus::Deleted
    }
}
