// Google Calendar REST integration
// Talks to the v3 events API with a caller-supplied OAuth access token.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use chrono_tz::Tz;
use log::{debug, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use super::{exdates_to_utc, CalendarProvider, ConflictBasis, ProviderError, RemoteCalendar, RemoteEvent};
use crate::models::{DateWindow, Event, EventSource};
use crate::recurrence::{parse_ex_dates_in, RecurrenceRule};
use crate::utils::logging::log_network_error;
use crate::utils::{local_to_utc, non_empty, normalize_title};

pub const GOOGLE_CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";
const PAGE_SIZE: &str = "2500";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: String,
    status: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start: Option<GoogleEventTime>,
    end: Option<GoogleEventTime>,
    updated: Option<String>,
    recurrence: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventTime {
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventList {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleCalendarEntry {
    id: String,
    summary: Option<String>,
    primary: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleCalendarList {
    #[serde(default)]
    items: Vec<GoogleCalendarEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: GoogleErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetail {
    message: String,
}

pub struct GoogleCalendarProvider {
    client: Client,
    base_url: Url,
    access_token: String,
    timezone: Tz,
}

impl GoogleCalendarProvider {
    /// `timezone` is sent with timed events and used to place all-day dates.
    pub fn new(access_token: impl Into<String>, timezone: Tz) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let base_url = Url::parse(GOOGLE_CALENDAR_API)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            access_token: access_token.into(),
            timezone,
        })
    }

    /// Points the provider at another API root.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ProviderError> {
        self.base_url =
            Url::parse(base_url).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(self)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::InvalidResponse("base URL cannot hold a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response, ProviderError> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| {
                log_network_error(operation, &e);
                ProviderError::Network(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = status_to_error(status, &body);
        debug!("Google {} returned {}: {}", operation, status, error);
        Err(error)
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendarProvider {
    fn source(&self) -> EventSource {
        EventSource::Google
    }

    fn conflict_basis(&self) -> ConflictBasis {
        ConflictBasis::LocalModified
    }

    async fn list_calendars(&self) -> Result<Vec<RemoteCalendar>, ProviderError> {
        let url = self.endpoint(&["users", "me", "calendarList"])?;
        let mut calendars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(url.clone());
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let page: GoogleCalendarList = self
                .send("list calendars", request)
                .await?
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

            calendars.extend(page.items.into_iter().map(|entry| RemoteCalendar {
                title: normalize_title(entry.summary.as_deref()),
                is_primary: entry.primary.unwrap_or(false),
                calendar_id: entry.id,
            }));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(calendars)
    }

    async fn fetch_events(
        &self,
        calendar_id: &str,
        window: Option<DateWindow>,
    ) -> Result<Vec<RemoteEvent>, ProviderError> {
        let url = self.endpoint(&["calendars", calendar_id, "events"])?;
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            // Masters only; recurrence is expanded locally
            let mut query = vec![
                ("maxResults", PAGE_SIZE.to_string()),
                ("singleEvents", "false".to_string()),
                ("showDeleted", "false".to_string()),
            ];
            if let Some(window) = window {
                query.push(("timeMin", window.start.to_rfc3339_opts(SecondsFormat::Secs, true)));
                query.push(("timeMax", window.end.to_rfc3339_opts(SecondsFormat::Secs, true)));
            }
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let page: GoogleEventList = self
                .send("fetch events", self.client.get(url.clone()).query(&query))
                .await?
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

            for item in page.items {
                match to_remote_event(item, self.timezone) {
                    Ok(Some(event)) => events.push(event),
                    Ok(None) => {}
                    Err(e) => warn!("Skipping unreadable Google event: {}", e),
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!("Fetched {} events from Google calendar {}", events.len(), calendar_id);
        Ok(events)
    }

    async fn create_event(&self, event: &Event, calendar_id: &str) -> Result<String, ProviderError> {
        let url = self.endpoint(&["calendars", calendar_id, "events"])?;
        let body = event_body(event, self.timezone);

        let created: GoogleEvent = self
            .send("create event", self.client.post(url).json(&body))
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(created.id)
    }

    async fn update_event(&self, event: &Event, foreign_id: &str) -> Result<(), ProviderError> {
        let calendar_id = event.calendar_id.as_deref().unwrap_or("primary");
        let url = self.endpoint(&["calendars", calendar_id, "events", foreign_id])?;
        let body = event_body(event, self.timezone);

        self.send("update event", self.client.put(url).json(&body)).await?;
        Ok(())
    }

    async fn delete_event(&self, calendar_id: Option<&str>, foreign_id: &str) -> Result<(), ProviderError> {
        let calendar_id = calendar_id.unwrap_or("primary");
        let url = self.endpoint(&["calendars", calendar_id, "events", foreign_id])?;

        self.send("delete event", self.client.delete(url)).await?;
        Ok(())
    }
}

/// Maps a failed Google response to a typed error.
pub fn status_to_error(status: StatusCode, body: &str) -> ProviderError {
    match status.as_u16() {
        401 => ProviderError::Unauthorized,
        403 if body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded") => {
            ProviderError::RateLimited
        }
        403 => ProviderError::Forbidden,
        // Google answers 410 for events that were already deleted
        404 | 410 => ProviderError::NotFound,
        429 => ProviderError::RateLimited,
        code => match serde_json::from_str::<GoogleErrorBody>(body) {
            Ok(parsed) => ProviderError::Api(parsed.error.message),
            Err(_) => ProviderError::Http(code),
        },
    }
}

/// `Ok(None)` for cancelled events, which Google reports instead of
/// omitting.
fn to_remote_event(item: GoogleEvent, tz: Tz) -> Result<Option<RemoteEvent>, ProviderError> {
    if item.status.as_deref() == Some("cancelled") {
        return Ok(None);
    }

    let start = item
        .start
        .as_ref()
        .ok_or_else(|| ProviderError::InvalidResponse(format!("event {} has no start", item.id)))?;
    let (start_time, is_all_day) = parse_event_time(start, tz)?;
    let end_time = match &item.end {
        Some(end) => Some(parse_event_time(end, tz)?.0),
        None => None,
    };

    let updated = item
        .updated
        .as_deref()
        .and_then(|u| DateTime::parse_from_rfc3339(u).ok())
        .map(|u| u.with_timezone(&Utc));

    let mut recurrence_rule = None;
    let mut excluded_dates = Vec::new();
    for line in item.recurrence.unwrap_or_default() {
        if let Some(rule) = line.strip_prefix("RRULE:") {
            recurrence_rule = Some(rule.to_string());
        } else if line.starts_with("EXDATE") {
            // EXDATE;TZID=Europe/Paris:20250106T090000,20250113T090000
            if let Some((head, values)) = line.split_once(':') {
                let tzid = head.split(';').find_map(|param| param.strip_prefix("TZID="));
                excluded_dates.push(exdates_to_utc(tzid, values));
            }
        }
    }

    Ok(Some(RemoteEvent {
        foreign_id: item.id,
        title: normalize_title(item.summary.as_deref()),
        start_time,
        end_time,
        is_all_day,
        notes: non_empty(item.description),
        location: non_empty(item.location),
        updated,
        recurrence_rule,
        excluded_dates,
    }))
}

fn parse_event_time(time: &GoogleEventTime, tz: Tz) -> Result<(DateTime<Utc>, bool), ProviderError> {
    if let Some(date_time) = &time.date_time {
        let parsed = DateTime::parse_from_rfc3339(date_time)
            .map_err(|e| ProviderError::InvalidResponse(format!("bad dateTime {}: {}", date_time, e)))?;
        return Ok((parsed.with_timezone(&Utc), false));
    }
    if let Some(date) = &time.date {
        let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| ProviderError::InvalidResponse(format!("bad date {}: {}", date, e)))?;
        let start = local_midnight(day, tz)
            .ok_or_else(|| ProviderError::InvalidResponse(format!("bad date {}", date)))?;
        return Ok((start, true));
    }
    Err(ProviderError::InvalidResponse("event time has neither date nor dateTime".to_string()))
}

fn local_midnight(day: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
    day.and_hms_opt(0, 0, 0).map(|naive| local_to_utc(naive, tz))
}

/// JSON body for insert and update calls.
fn event_body(event: &Event, tz: Tz) -> Value {
    let (start, end) = if event.is_all_day {
        let (first, last) = event.covered_days(tz);
        // Google's all-day end date is exclusive
        let end = last + Duration::days(1);
        (
            json!({ "date": first.format("%Y-%m-%d").to_string() }),
            json!({ "date": end.format("%Y-%m-%d").to_string() }),
        )
    } else {
        let end = event.end_time.unwrap_or(event.start_time);
        (
            json!({
                "dateTime": event.start_time.to_rfc3339_opts(SecondsFormat::Secs, true),
                "timeZone": tz.name(),
            }),
            json!({
                "dateTime": end.to_rfc3339_opts(SecondsFormat::Secs, true),
                "timeZone": tz.name(),
            }),
        )
    };

    let mut body = json!({
        "summary": event.title,
        "start": start,
        "end": end,
    });
    if let Some(notes) = &event.notes {
        body["description"] = json!(notes);
    }
    if let Some(location) = &event.location {
        body["location"] = json!(location);
    }

    let mut recurrence = Vec::new();
    match event.recurrence_rule() {
        Ok(RecurrenceRule::Solar(rule)) => {
            recurrence.push(format!("RRULE:{}", rule.to_utc_string(tz)));
            recurrence.extend(exdate_lines(event, tz));
        }
        Ok(RecurrenceRule::Lunar(_)) => {
            warn!("Event {} has a lunar rule, pushing it as a single event", event.id);
        }
        Ok(RecurrenceRule::None) => {}
        Err(e) => warn!("Event {} has an unreadable rule, pushing it as a single event: {}", event.id, e),
    }
    if !recurrence.is_empty() {
        body["recurrence"] = json!(recurrence);
    }

    body
}

/// `EXDATE` lines for a pushed event: timed values as UTC instants, date
/// values on a `VALUE=DATE` line of their own.
fn exdate_lines(event: &Event, tz: Tz) -> Vec<String> {
    let mut instants = Vec::new();
    let mut dates = Vec::new();

    for value in event.excluded_date_values() {
        if value.len() == 8 {
            dates.push(value.to_string());
            continue;
        }
        match parse_ex_dates_in(&[value], tz) {
            Ok(parsed) => instants.extend(
                parsed
                    .into_iter()
                    .map(|local| local_to_utc(local, tz).format("%Y%m%dT%H%M%SZ").to_string()),
            ),
            Err(e) => warn!("Not pushing exclusion of event {}: {}", event.id, e),
        }
    }

    let mut lines = Vec::new();
    if !instants.is_empty() {
        lines.push(format!("EXDATE:{}", instants.join(",")));
    }
    if !dates.is_empty() {
        lines.push(format!("EXDATE;VALUE=DATE:{}", dates.join(",")));
    }
    lines
}
