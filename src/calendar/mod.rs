// Calendar provider integration
// One `CalendarProvider` per remote service; the sync orchestrator is the only caller.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{DateWindow, Event, EventSource};
use crate::utils::local_to_utc;
use crate::utils::retry::RetryClassify;

pub mod google;
pub mod ics;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Rate limited by provider")]
    RateLimited,

    #[error("Not authorized, the access token may have expired")]
    Unauthorized,

    #[error("Access forbidden")]
    Forbidden,

    #[error("Not found")]
    NotFound,

    #[error("HTTP error: {0}")]
    Http(u16),

    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Calendar is read-only")]
    ReadOnly,
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound)
    }
}

impl RetryClassify for ProviderError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited)
    }
}

/// An event as a provider reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub foreign_id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_all_day: bool,
    pub notes: Option<String>,
    pub location: Option<String>,
    /// Provider-side modification time; `None` when the provider omits it.
    pub updated: Option<DateTime<Utc>>,
    /// `RRULE` value text, without the `RRULE:` prefix.
    pub recurrence_rule: Option<String>,
    /// Raw `EXDATE` values.
    pub excluded_dates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCalendar {
    pub calendar_id: String,
    pub title: String,
    pub is_primary: bool,
}

/// Which local timestamp a remote modification time is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictBasis {
    /// The remote timestamp recorded at the last pull, falling back to the
    /// local modification time for events never pulled.
    LastKnownRemote,
    LocalModified,
    /// The feed is the only source of truth; every reported event replaces
    /// the stored copy.
    RemoteWins,
}

/// What a batch push does when one event fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFailurePolicy {
    /// Record the failure and move on to the next event.
    Continue,
    /// Abort the batch with the first failure.
    Propagate,
}

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    fn source(&self) -> EventSource;

    fn conflict_basis(&self) -> ConflictBasis {
        ConflictBasis::LastKnownRemote
    }

    fn push_failure_policy(&self) -> PushFailurePolicy {
        PushFailurePolicy::Continue
    }

    /// Whether `fetch_events` honours a date window. Providers that can't
    /// are always asked for everything.
    fn supports_windowed_fetch(&self) -> bool {
        true
    }

    /// Read-only providers are pulled from but never pushed to.
    fn is_read_only(&self) -> bool {
        false
    }

    async fn list_calendars(&self) -> Result<Vec<RemoteCalendar>, ProviderError>;

    async fn fetch_events(
        &self,
        calendar_id: &str,
        window: Option<DateWindow>,
    ) -> Result<Vec<RemoteEvent>, ProviderError>;

    /// Creates `event` in `calendar_id` and returns the provider's id for it.
    async fn create_event(&self, event: &Event, calendar_id: &str) -> Result<String, ProviderError>;

    async fn update_event(&self, event: &Event, foreign_id: &str) -> Result<(), ProviderError>;

    async fn delete_event(&self, calendar_id: Option<&str>, foreign_id: &str) -> Result<(), ProviderError>;
}

/// Rewrites the comma-separated values of one `EXDATE` property as UTC
/// instants (`...Z`) when the property names a `TZID`.
///
/// Date-only values, values already in UTC, and values under an unknown
/// zone are passed through unchanged.
pub fn exdates_to_utc(tzid: Option<&str>, values: &str) -> String {
    let zone = match tzid.map(str::parse::<Tz>) {
        Some(Ok(zone)) => zone,
        Some(Err(_)) => {
            warn!("Unknown EXDATE zone {:?}, keeping values as sent", tzid);
            return values.to_string();
        }
        None => return values.to_string(),
    };

    values
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|value| match NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S") {
            Ok(local) => local_to_utc(local, zone).format("%Y%m%dT%H%M%SZ").to_string(),
            Err(_) => value.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}
