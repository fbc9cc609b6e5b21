// file: src/recurrence/expander.rs
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use log::warn;

use super::identity::virtual_id;
use super::lunar::{self, LunarConverter};
use super::parser::parse_ex_dates_in;
use super::rule::{LunarRule, RecurrenceRule, SolarRule};
use super::solar;
use crate::config::{validate_expansion_config, ExpansionConfig};
use crate::models::{DateWindow, Event, Occurrence};
use crate::utils::local_to_utc;
use crate::utils::logging::log_expansion;

/// Turns master events into the occurrences a view needs for a time range.
///
/// Recurrence is best effort here: a rule that fails to decode, or exclusion
/// dates that fail to parse, never fail the expansion. The event falls back
/// to its master occurrence (or to no exclusions) and a warning is logged.
pub struct RecurringEventExpander {
    converter: Arc<dyn LunarConverter>,
    config: ExpansionConfig,
}

impl RecurringEventExpander {
    /// A config with an empty default window is replaced by the default
    /// window sizes, keeping its zone.
    pub fn new(converter: Arc<dyn LunarConverter>, config: ExpansionConfig) -> Self {
        let config = match validate_expansion_config(&config) {
            Ok(()) => config,
            Err(e) => {
                warn!("{}, using the default expansion window", e);
                ExpansionConfig {
                    timezone: config.timezone,
                    ..ExpansionConfig::default()
                }
            }
        };
        Self { converter, config }
    }

    pub fn config(&self) -> &ExpansionConfig {
        &self.config
    }

    /// Expands over the configured default window around now.
    pub fn expand_default(&self, events: &[Event]) -> Vec<Occurrence> {
        self.expand(events, self.config.default_window(Utc::now()))
    }

    /// All occurrences of the non-deleted `events` in `window`, ordered by
    /// start time.
    pub fn expand(&self, events: &[Event], window: DateWindow) -> Vec<Occurrence> {
        let mut occurrences: Vec<Occurrence> = events
            .iter()
            .filter(|event| !event.is_deleted)
            .flat_map(|event| self.expand_event(event, window))
            .collect();

        occurrences.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        occurrences
    }

    pub fn expand_event(&self, event: &Event, window: DateWindow) -> Vec<Occurrence> {
        if window.is_empty() {
            return Vec::new();
        }

        let occurrences = match self.decode_rule(event) {
            Some(RecurrenceRule::Solar(rule)) => self.expand_solar(event, &rule, window),
            Some(RecurrenceRule::Lunar(rule)) => self.expand_lunar(event, &rule, window),
            Some(RecurrenceRule::None) if event.is_multi_day_all_day(self.config.timezone) => {
                self.expand_multi_day(event, window)
            }
            Some(RecurrenceRule::None) | None => vec![self.master_occurrence(event)],
        };

        log_expansion(&event.title, occurrences.len());
        occurrences
    }

    /// Whether `event` has an occurrence on the calendar day `date`, without
    /// materializing the expansion.
    pub fn occurs_on(&self, event: &Event, date: NaiveDate) -> bool {
        if event.is_deleted {
            return false;
        }
        let master_start = self.to_local(event.start_time);

        match self.decode_rule(event) {
            Some(RecurrenceRule::Solar(rule)) => {
                solar::matches(&rule, master_start, date) && !self.excluded_days(event).contains(&date)
            }
            Some(RecurrenceRule::Lunar(rule)) => {
                lunar::matches(&rule, master_start, date, self.converter.as_ref())
                    && !self.excluded_days(event).contains(&date)
            }
            Some(RecurrenceRule::None) | None => {
                let (first, last) = event.covered_days(self.config.timezone);
                if event.is_all_day {
                    first <= date && date <= last
                } else {
                    date == first
                }
            }
        }
    }

    /// `None` when the stored rule can't be used; callers treat that as a
    /// plain single event.
    fn decode_rule(&self, event: &Event) -> Option<RecurrenceRule> {
        let rule = match event.recurrence_rule() {
            Ok(rule) => rule,
            Err(e) => {
                warn!("Ignoring undecodable recurrence on event {}: {}", event.id, e);
                return None;
            }
        };
        if let Err(e) = rule.validate() {
            warn!("Ignoring invalid recurrence on event {}: {}", event.id, e);
            return None;
        }
        Some(rule)
    }

    fn expand_solar(&self, event: &Event, rule: &SolarRule, window: DateWindow) -> Vec<Occurrence> {
        let master_start = self.to_local(event.start_time);
        let master_end = event.end_time.map(|end| self.to_local(end));
        let excluded: Vec<NaiveDateTime> = self
            .excluded_days(event)
            .into_iter()
            .filter_map(|day| day.and_hms_opt(0, 0, 0))
            .collect();

        solar::expand(
            rule,
            master_start,
            master_end,
            &excluded,
            self.to_local(window.start),
            self.to_local(window.end),
        )
        .into_iter()
        .map(|span| self.recurring_occurrence(event, span.start, span.end))
        .collect()
    }

    fn expand_lunar(&self, event: &Event, rule: &LunarRule, window: DateWindow) -> Vec<Occurrence> {
        let master_start = self.to_local(event.start_time);
        let duration = event
            .end_time
            .map(|end| self.to_local(end) - master_start);
        let excluded = self.excluded_days(event);

        lunar::expand(
            rule,
            master_start,
            self.to_local(window.start),
            self.to_local(window.end),
            self.converter.as_ref(),
        )
        .into_iter()
        .filter(|start| !excluded.contains(&start.date()))
        .map(|start| self.recurring_occurrence(event, start, duration.map(|d| start + d)))
        .collect()
    }

    /// One all-day occurrence per covered day inside the window.
    fn expand_multi_day(&self, event: &Event, window: DateWindow) -> Vec<Occurrence> {
        let (first, last) = event.covered_days(self.config.timezone);
        let from = first.max(self.to_local(window.start).date());
        let to = last.min(self.to_local(window.end).date());

        let mut occurrences = Vec::new();
        let mut day = from;
        while day <= to {
            let Some(midnight) = day.and_hms_opt(0, 0, 0) else {
                break;
            };
            occurrences.push(Occurrence::project(
                event,
                virtual_id(event.id, day),
                day,
                self.to_utc(midnight),
                Some(self.to_utc(midnight + Duration::days(1))),
                false,
            ));
            day += Duration::days(1);
        }
        occurrences
    }

    fn master_occurrence(&self, event: &Event) -> Occurrence {
        Occurrence::project(
            event,
            event.id,
            self.to_local(event.start_time).date(),
            event.start_time,
            event.end_time,
            false,
        )
    }

    fn recurring_occurrence(
        &self,
        event: &Event,
        start: NaiveDateTime,
        end: Option<NaiveDateTime>,
    ) -> Occurrence {
        Occurrence::project(
            event,
            virtual_id(event.id, start.date()),
            start.date(),
            self.to_utc(start),
            end.map(|end| self.to_utc(end)),
            true,
        )
    }

    fn excluded_days(&self, event: &Event) -> HashSet<NaiveDate> {
        let values = event.excluded_date_values();
        if values.is_empty() {
            return HashSet::new();
        }
        match parse_ex_dates_in(&values, self.config.timezone) {
            Ok(dates) => dates.into_iter().map(|d| d.date()).collect(),
            Err(e) => {
                warn!("Expanding event {} without exclusions: {}", event.id, e);
                HashSet::new()
            }
        }
    }

    fn to_local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.config.timezone).naive_local()
    }

    fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        local_to_utc(local, self.config.timezone)
    }
}
