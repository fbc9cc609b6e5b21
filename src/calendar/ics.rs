// iCalendar feed subscriptions
// Pulls published .ics feeds. Feeds are read-only: every pull replaces the
// stored copies and pushes are refused.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::{Calendar as IcsCalendar, CalendarDateTime, Component, DatePerhapsTime, Event as IcsEvent, EventLike};
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use url::Url;

use super::{exdates_to_utc, CalendarProvider, ConflictBasis, ProviderError, RemoteCalendar, RemoteEvent};
use crate::database::Database;
use crate::error::{AppError, AppResult};
use crate::models::{DateWindow, Event, EventSource, SyncedCalendar};
use crate::utils::logging::log_network_error;
use crate::utils::{local_to_utc, non_empty, normalize_title};

/// Reads subscribed feeds. The calendar id of a subscription is its URL.
pub struct IcsFeedProvider {
    client: Client,
    timezone: Tz,
}

impl IcsFeedProvider {
    /// `timezone` places floating times and all-day dates.
    pub fn new(timezone: Tz) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(concat!("lunacal/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self { client, timezone })
    }

    async fn download(&self, url: &str) -> Result<String, ProviderError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            log_network_error("fetch ICS feed", &e);
            ProviderError::Network(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_to_error(status));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        // Share pages of web calendars answer with HTML
        let head = body.trim_start();
        if head.starts_with("<!DOCTYPE") || head.starts_with("<html") {
            return Err(ProviderError::InvalidResponse(
                "feed URL returned an HTML page instead of a calendar".to_string(),
            ));
        }
        Ok(body)
    }
}

#[async_trait]
impl CalendarProvider for IcsFeedProvider {
    fn source(&self) -> EventSource {
        EventSource::Ics
    }

    fn conflict_basis(&self) -> ConflictBasis {
        ConflictBasis::RemoteWins
    }

    fn supports_windowed_fetch(&self) -> bool {
        false
    }

    fn is_read_only(&self) -> bool {
        true
    }

    /// Subscriptions are kept locally; a feed has no calendar list.
    async fn list_calendars(&self) -> Result<Vec<RemoteCalendar>, ProviderError> {
        Ok(Vec::new())
    }

    async fn fetch_events(
        &self,
        calendar_id: &str,
        _window: Option<DateWindow>,
    ) -> Result<Vec<RemoteEvent>, ProviderError> {
        let body = self.download(calendar_id).await?;
        let events = parse_feed(&body, self.timezone)?;
        debug!("Read {} events from feed ({} bytes)", events.len(), body.len());
        Ok(events)
    }

    async fn create_event(&self, _event: &Event, _calendar_id: &str) -> Result<String, ProviderError> {
        Err(ProviderError::ReadOnly)
    }

    async fn update_event(&self, _event: &Event, _foreign_id: &str) -> Result<(), ProviderError> {
        Err(ProviderError::ReadOnly)
    }

    async fn delete_event(&self, _calendar_id: Option<&str>, _foreign_id: &str) -> Result<(), ProviderError> {
        Err(ProviderError::ReadOnly)
    }
}

fn status_to_error(status: StatusCode) -> ProviderError {
    match status.as_u16() {
        401 => ProviderError::Unauthorized,
        403 => ProviderError::Forbidden,
        404 | 410 => ProviderError::NotFound,
        429 => ProviderError::RateLimited,
        code => ProviderError::Http(code),
    }
}

/// Every `VEVENT` of a feed. Events without a start are skipped.
pub fn parse_feed(data: &str, tz: Tz) -> Result<Vec<RemoteEvent>, ProviderError> {
    let calendar = IcsCalendar::from_str(data)
        .map_err(|e| ProviderError::InvalidResponse(format!("unreadable ICS data: {}", e)))?;

    let mut events = Vec::new();
    for component in &calendar.components {
        let Some(ics_event) = component.as_event() else {
            continue;
        };
        match to_remote_event(ics_event, tz) {
            Some(event) => events.push(event),
            None => warn!(
                "Skipping feed event without a start: {:?}",
                ics_event.get_summary().unwrap_or_default()
            ),
        }
    }
    Ok(events)
}

fn to_remote_event(ics_event: &IcsEvent, tz: Tz) -> Option<RemoteEvent> {
    let start = ics_event.get_start()?;
    let is_all_day = matches!(start, DatePerhapsTime::Date(_));
    let start_time = to_instant(&start, tz)?;
    let end_time = match ics_event.get_end() {
        Some(end) => to_instant(&end, tz),
        // A date-only event without DTEND lasts one day
        None if is_all_day => Some(start_time + Duration::days(1)),
        None => None,
    };

    let title = normalize_title(ics_event.get_summary());
    let foreign_id = match ics_event.get_uid() {
        Some(uid) => uid.to_string(),
        None => {
            let key = format!("{}-{}", title, start_time.timestamp());
            format!("ics-{}", &blake3::hash(key.as_bytes()).to_hex()[..16])
        }
    };

    let updated = ics_event
        .property_value("LAST-MODIFIED")
        .or_else(|| ics_event.property_value("DTSTAMP"))
        .and_then(parse_utc_stamp);

    Some(RemoteEvent {
        foreign_id,
        title,
        start_time,
        end_time,
        is_all_day,
        notes: non_empty(ics_event.get_description().map(str::to_string)),
        location: non_empty(ics_event.get_location().map(str::to_string)),
        updated,
        recurrence_rule: ics_event.property_value("RRULE").map(str::to_string),
        excluded_dates: excluded_dates(ics_event),
    })
}

fn to_instant(value: &DatePerhapsTime, tz: Tz) -> Option<DateTime<Utc>> {
    match value {
        DatePerhapsTime::Date(date) => date.and_hms_opt(0, 0, 0).map(|midnight| local_to_utc(midnight, tz)),
        DatePerhapsTime::DateTime(CalendarDateTime::Utc(instant)) => Some(*instant),
        DatePerhapsTime::DateTime(CalendarDateTime::Floating(local)) => Some(local_to_utc(*local, tz)),
        DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, tzid }) => {
            let zone = Tz::from_str(tzid).unwrap_or_else(|_| {
                warn!("Unknown zone '{}' in feed, reading it as {}", tzid, tz);
                tz
            });
            Some(local_to_utc(*date_time, zone))
        }
    }
}

fn parse_utc_stamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim_end_matches('Z'), "%Y%m%dT%H%M%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// `EXDATE` values of an event, zoned values in UTC.
fn excluded_dates(ics_event: &IcsEvent) -> Vec<String> {
    ics_event
        .properties()
        .get("EXDATE")
        .map(|property| {
            let tzid = property.params().get("TZID").map(|param| param.value());
            exdates_to_utc(tzid, property.value())
        })
        .filter(|values| !values.is_empty())
        .into_iter()
        .collect()
}

/// Local bookkeeping for feed subscriptions.
///
/// A subscription is a calendar row of source `ics` whose id is the feed
/// URL. New subscriptions are enabled.
pub struct IcsSubscriptions {
    db: Database,
}

impl IcsSubscriptions {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn list(&self) -> AppResult<Vec<SyncedCalendar>> {
        Ok(self.db.calendars_for_source(EventSource::Ics).await?)
    }

    /// Subscribes to the feed at `url`, which must be an http or https URL.
    pub async fn add(&self, name: &str, url: &str) -> AppResult<SyncedCalendar> {
        let url = validate_feed_url(url)?;
        let url = url.as_str();

        if self.find(url).await?.is_some() {
            return Err(AppError::invalid_input(format!("Already subscribed to {}", url)));
        }

        let title = match name.trim() {
            "" => url.to_string(),
            name => name.to_string(),
        };
        let subscription = SyncedCalendar::discovered(EventSource::Ics, url, title).enabled();
        self.db.upsert_calendar(&subscription).await?;

        info!("Subscribed to feed '{}'", subscription.title);
        Ok(subscription)
    }

    /// Drops the subscription and every event pulled from it.
    pub async fn remove(&self, url: &str) -> AppResult<()> {
        if self.db.delete_calendar(EventSource::Ics, url).await? == 0 {
            return Err(AppError::not_found(format!("No subscription for {}", url)));
        }
        let events = self.db.delete_events_in_calendar(EventSource::Ics, url).await?;

        info!("Removed feed subscription with {} events", events);
        Ok(())
    }

    /// Disabled subscriptions are skipped by pulls; their events stay.
    pub async fn set_enabled(&self, url: &str, enabled: bool) -> AppResult<()> {
        if self.find(url).await?.is_none() {
            return Err(AppError::not_found(format!("No subscription for {}", url)));
        }
        self.db.set_calendar_enabled(EventSource::Ics, url, enabled).await?;
        Ok(())
    }

    async fn find(&self, url: &str) -> AppResult<Option<SyncedCalendar>> {
        Ok(self
            .db
            .calendars_for_source(EventSource::Ics)
            .await?
            .into_iter()
            .find(|c| c.calendar_id == url))
    }
}

/// Parses a feed URL; only http and https are accepted.
pub fn validate_feed_url(url: &str) -> AppResult<Url> {
    let parsed = Url::parse(url.trim())
        .map_err(|e| AppError::invalid_input(format!("Invalid feed URL: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(AppError::invalid_input(format!(
            "Feed URL must use http or https, not {}",
            scheme
        ))),
    }
}
