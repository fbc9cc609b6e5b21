// file: src/models/sync.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::EventSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    Idle,
    Syncing,
    Error,
}

impl Default for SyncState {
    fn default() -> Self {
        SyncState::Idle
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullReport {
    pub calendars: usize,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    /// Remote events that end before they start; never stored.
    pub rejected: usize,
}

/// A push that failed for one event and was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushFailure {
    pub event_id: Uuid,
    pub title: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failures: Vec<PushFailure>,
}

impl PushReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub source: EventSource,
    pub pull: PullReport,
    pub push: PushReport,
    pub duration_ms: u64,
    pub sync_time: DateTime<Utc>,
}

impl SyncReport {
    pub fn new(source: EventSource, pull: PullReport, push: PushReport, duration_ms: u64) -> Self {
        Self {
            source,
            pull,
            push,
            duration_ms,
            sync_time: Utc::now(),
        }
    }

    /// Events touched in either direction.
    pub fn total_changes(&self) -> usize {
        self.pull.added
            + self.pull.updated
            + self.pull.deleted
            + self.push.created
            + self.push.updated
            + self.push.deleted
    }
}
