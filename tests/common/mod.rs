//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use lunacal::calendar::{ConflictBasis, PushFailurePolicy};
use lunacal::recurrence::{LeapMonthInfo, LunarConverter, LunarDate};
use lunacal::{CalendarProvider, DateWindow, Event, EventSource, ProviderError, RemoteCalendar, RemoteEvent};
use tokio::sync::Notify;
use uuid::Uuid;

pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn remote_event(foreign_id: &str, title: &str, start: DateTime<Utc>, updated: DateTime<Utc>) -> RemoteEvent {
    RemoteEvent {
        foreign_id: foreign_id.to_string(),
        title: title.to_string(),
        start_time: start,
        end_time: Some(start + Duration::hours(1)),
        is_all_day: false,
        notes: None,
        location: None,
        updated: Some(updated),
        recurrence_rule: None,
        excluded_dates: Vec::new(),
    }
}

/// Scripted in-memory provider. Clones share state, so a test keeps one
/// handle while the orchestrator owns another.
#[derive(Clone)]
pub struct FakeProvider {
    inner: Arc<Mutex<FakeProviderInner>>,
}

struct FakeProviderInner {
    source: EventSource,
    conflict_basis: ConflictBasis,
    policy: PushFailurePolicy,
    windowed: bool,
    calendars: Vec<RemoteCalendar>,
    events: HashMap<String, Vec<RemoteEvent>>,
    windows_seen: Vec<Option<DateWindow>>,
    created: Vec<(String, Uuid)>,
    updated: Vec<String>,
    deleted: Vec<String>,
    create_calls: usize,
    fetch_calls: usize,
    list_calls: usize,
    fail_creates: VecDeque<ProviderError>,
    fail_fetches: VecDeque<ProviderError>,
    fail_deletes: VecDeque<ProviderError>,
    fetch_gate: Option<Arc<Notify>>,
    next_id: u32,
}

impl FakeProvider {
    pub fn new(source: EventSource) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeProviderInner {
                source,
                conflict_basis: ConflictBasis::LastKnownRemote,
                policy: PushFailurePolicy::Continue,
                windowed: true,
                calendars: Vec::new(),
                events: HashMap::new(),
                windows_seen: Vec::new(),
                created: Vec::new(),
                updated: Vec::new(),
                deleted: Vec::new(),
                create_calls: 0,
                fetch_calls: 0,
                list_calls: 0,
                fail_creates: VecDeque::new(),
                fail_fetches: VecDeque::new(),
                fail_deletes: VecDeque::new(),
                fetch_gate: None,
                next_id: 1,
            })),
        }
    }

    pub fn with_policy(self, policy: PushFailurePolicy) -> Self {
        self.inner.lock().unwrap().policy = policy;
        self
    }

    pub fn with_conflict_basis(self, basis: ConflictBasis) -> Self {
        self.inner.lock().unwrap().conflict_basis = basis;
        self
    }

    pub fn without_windowed_fetch(self) -> Self {
        self.inner.lock().unwrap().windowed = false;
        self
    }

    pub fn add_calendar(&self, calendar_id: &str, title: &str, is_primary: bool) {
        self.inner.lock().unwrap().calendars.push(RemoteCalendar {
            calendar_id: calendar_id.to_string(),
            title: title.to_string(),
            is_primary,
        });
    }

    pub fn set_events(&self, calendar_id: &str, events: Vec<RemoteEvent>) {
        self.inner
            .lock()
            .unwrap()
            .events
            .insert(calendar_id.to_string(), events);
    }

    pub fn fail_next_create(&self, error: ProviderError) {
        self.inner.lock().unwrap().fail_creates.push_back(error);
    }

    pub fn fail_next_fetch(&self, error: ProviderError) {
        self.inner.lock().unwrap().fail_fetches.push_back(error);
    }

    pub fn fail_next_delete(&self, error: ProviderError) {
        self.inner.lock().unwrap().fail_deletes.push_back(error);
    }

    /// Makes every fetch wait for a permit on `gate`.
    pub fn hold_fetches(&self, gate: Arc<Notify>) {
        self.inner.lock().unwrap().fetch_gate = Some(gate);
    }

    pub fn created(&self) -> Vec<(String, Uuid)> {
        self.inner.lock().unwrap().created.clone()
    }

    pub fn updated(&self) -> Vec<String> {
        self.inner.lock().unwrap().updated.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.inner.lock().unwrap().deleted.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.inner.lock().unwrap().create_calls
    }

    pub fn fetch_calls(&self) -> usize {
        self.inner.lock().unwrap().fetch_calls
    }

    pub fn list_calls(&self) -> usize {
        self.inner.lock().unwrap().list_calls
    }

    pub fn windows_seen(&self) -> Vec<Option<DateWindow>> {
        self.inner.lock().unwrap().windows_seen.clone()
    }
}

#[async_trait]
impl CalendarProvider for FakeProvider {
    fn source(&self) -> EventSource {
        self.inner.lock().unwrap().source
    }

    fn conflict_basis(&self) -> ConflictBasis {
        self.inner.lock().unwrap().conflict_basis
    }

    fn push_failure_policy(&self) -> PushFailurePolicy {
        self.inner.lock().unwrap().policy
    }

    fn supports_windowed_fetch(&self) -> bool {
        self.inner.lock().unwrap().windowed
    }

    async fn list_calendars(&self) -> Result<Vec<RemoteCalendar>, ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        inner.list_calls += 1;
        Ok(inner.calendars.clone())
    }

    async fn fetch_events(
        &self,
        calendar_id: &str,
        window: Option<DateWindow>,
    ) -> Result<Vec<RemoteEvent>, ProviderError> {
        let gate = self.inner.lock().unwrap().fetch_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut inner = self.inner.lock().unwrap();
        inner.fetch_calls += 1;
        inner.windows_seen.push(window);
        if let Some(error) = inner.fail_fetches.pop_front() {
            return Err(error);
        }
        Ok(inner.events.get(calendar_id).cloned().unwrap_or_default())
    }

    async fn create_event(&self, event: &Event, calendar_id: &str) -> Result<String, ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        inner.create_calls += 1;
        if let Some(error) = inner.fail_creates.pop_front() {
            return Err(error);
        }
        let foreign_id = format!("remote-{}", inner.next_id);
        inner.next_id += 1;
        inner.created.push((calendar_id.to_string(), event.id));
        Ok(foreign_id)
    }

    async fn update_event(&self, _event: &Event, foreign_id: &str) -> Result<(), ProviderError> {
        self.inner.lock().unwrap().updated.push(foreign_id.to_string());
        Ok(())
    }

    async fn delete_event(&self, _calendar_id: Option<&str>, foreign_id: &str) -> Result<(), ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_deletes.pop_front() {
            return Err(error);
        }
        inner.deleted.push(foreign_id.to_string());
        Ok(())
    }
}

const MONTH_DAYS: i64 = 28;

/// A toy lunar calendar with easy arithmetic.
///
/// Lunar year `Y` starts on 1 January of solar year `Y` and every month has
/// 28 days. A year listed in the leap table repeats the given month right
/// after it. Days past the last month of a year belong to no lunar date
/// (day and month 0), and day 29 or 30 never exists.
#[derive(Debug, Clone, Default)]
pub struct SyntheticLunarCalendar {
    leap_months: HashMap<i32, u8>,
}

impl SyntheticLunarCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_leap_month(mut self, year: i32, month: u8) -> Self {
        self.leap_months.insert(year, month);
        self
    }

    fn months_in_year(&self, year: i32) -> i64 {
        if self.leap_months.contains_key(&year) {
            13
        } else {
            12
        }
    }
}

impl LunarConverter for SyntheticLunarCalendar {
    fn solar_to_lunar(&self, date: NaiveDate) -> LunarDate {
        let year = date.year();
        let ordinal = i64::from(date.ordinal0());
        let position = ordinal / MONTH_DAYS;
        let day = (ordinal % MONTH_DAYS + 1) as u8;

        if position >= self.months_in_year(year) {
            return LunarDate { day: 0, month: 0, year, is_leap_month: false };
        }

        let (month, is_leap_month) = match self.leap_months.get(&year) {
            Some(&leap) if position == i64::from(leap) => (leap, true),
            Some(&leap) if position > i64::from(leap) => (position as u8, false),
            _ => (position as u8 + 1, false),
        };
        LunarDate { day, month, year, is_leap_month }
    }

    fn lunar_to_solar(&self, day: u8, month: u8, year: i32, is_leap_month: bool) -> Option<NaiveDate> {
        if day == 0 || i64::from(day) > MONTH_DAYS || month == 0 || month > 12 {
            return None;
        }

        let position = match self.leap_months.get(&year) {
            Some(&leap) if is_leap_month && leap == month => i64::from(month),
            Some(&leap) if !is_leap_month && month > leap => i64::from(month),
            _ if is_leap_month => return None,
            _ => i64::from(month) - 1,
        };

        let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
        Some(start + Duration::days(position * MONTH_DAYS + i64::from(day) - 1))
    }

    fn leap_month_info(&self, solar_year: i32) -> LeapMonthInfo {
        match self.leap_months.get(&solar_year) {
            Some(&month) => LeapMonthInfo { has_leap_month: true, leap_month: month },
            None => LeapMonthInfo::default(),
        }
    }
}

/// Resolves a leap month to the same solar day as the regular month, the
/// way some converters answer when asked for a leap month they can't place.
pub struct IgnoresLeapFlag(pub SyntheticLunarCalendar);

impl LunarConverter for IgnoresLeapFlag {
    fn solar_to_lunar(&self, date: NaiveDate) -> LunarDate {
        self.0.solar_to_lunar(date)
    }

    fn lunar_to_solar(&self, day: u8, month: u8, year: i32, _is_leap_month: bool) -> Option<NaiveDate> {
        self.0.lunar_to_solar(day, month, year, false)
    }

    fn leap_month_info(&self, solar_year: i32) -> LeapMonthInfo {
        self.0.leap_month_info(solar_year)
    }
}
