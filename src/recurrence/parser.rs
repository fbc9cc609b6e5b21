// file: src/recurrence/parser.rs
//! RFC 5545 `RRULE` / `EXDATE` text to typed rules and back.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use super::rule::{Frequency, RecurrenceEnd, SolarRule, WeekdaySpec};
use crate::utils::local_to_utc;

lazy_static! {
    static ref BYDAY_REGEX: Regex = Regex::new(r"^([+-]?\d{1,2})?([A-Z]{2})$").unwrap();
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleParseError {
    #[error("Rule has no FREQ")]
    MissingFrequency,

    #[error("Unsupported FREQ: {0}")]
    InvalidFrequency(String),

    #[error("INTERVAL must be a positive integer")]
    InvalidInterval,

    #[error("Invalid BYDAY entry: {0}")]
    InvalidByDay(String),

    #[error("Invalid BYMONTHDAY entry: {0}")]
    InvalidByMonthDay(String),

    #[error("Invalid BYMONTH entry: {0}")]
    InvalidByMonth(String),

    #[error("COUNT must be a positive integer")]
    InvalidCount,

    #[error("Invalid UNTIL value: {0}")]
    InvalidUntil(String),

    #[error("Invalid EXDATE value: {0}")]
    InvalidExDate(String),

    #[error("Lunar day out of range: {0}")]
    InvalidLunarDay(u8),

    #[error("Lunar month out of range: {0}")]
    InvalidLunarMonth(u8),

    #[error("Yearly lunar rule has no month")]
    MissingLunarMonth,
}

/// Parses an `RRULE` value, reading UTC (`Z`) instants as UTC wall time.
pub fn parse_rrule(text: &str) -> Result<SolarRule, RuleParseError> {
    parse_rrule_in(text, Tz::UTC)
}

/// Parses an `RRULE` value. UTC (`Z`) instants are converted into `tz` so
/// that every bound the engines see is a wall-clock time in one zone.
pub fn parse_rrule_in(text: &str, tz: Tz) -> Result<SolarRule, RuleParseError> {
    let body = text.trim();
    let body = body.strip_prefix("RRULE:").unwrap_or(body);

    let mut frequency = None;
    let mut interval = 1u32;
    let mut by_weekday = Vec::new();
    let mut by_month_day = Vec::new();
    let mut by_month = Vec::new();
    let mut count = None;
    let mut until = None;

    for part in body.split(';').filter(|p| !p.is_empty()) {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let value = value.trim();

        match key.trim().to_ascii_uppercase().as_str() {
            "FREQ" => frequency = Some(parse_frequency(value)?),
            "INTERVAL" => {
                interval = value
                    .parse::<u32>()
                    .ok()
                    .filter(|v| *v > 0)
                    .ok_or(RuleParseError::InvalidInterval)?;
            }
            "BYDAY" => by_weekday = parse_list(value, parse_weekday_spec)?,
            "BYMONTHDAY" => by_month_day = parse_list(value, parse_month_day)?,
            "BYMONTH" => by_month = parse_list(value, parse_month)?,
            "COUNT" => {
                count = Some(
                    value
                        .parse::<u32>()
                        .ok()
                        .filter(|v| *v > 0)
                        .ok_or(RuleParseError::InvalidCount)?,
                );
            }
            "UNTIL" => {
                until = Some(
                    parse_until(value, tz)
                        .ok_or_else(|| RuleParseError::InvalidUntil(value.to_string()))?,
                );
            }
            // WKST, BYSETPOS and friends are accepted but carry no meaning here
            _ => {}
        }
    }

    let frequency = frequency.ok_or(RuleParseError::MissingFrequency)?;

    // COUNT wins when a rule carries both bounds
    let end = match (count, until) {
        (Some(count), _) => Some(RecurrenceEnd::Count(count)),
        (None, Some(until)) => Some(RecurrenceEnd::Until(until)),
        (None, None) => None,
    };

    Ok(SolarRule {
        frequency,
        interval,
        by_weekday,
        by_month_day,
        by_month,
        end,
    })
}

/// Parses `EXDATE` values. Each value may itself be a comma-separated list.
pub fn parse_ex_dates<S: AsRef<str>>(values: &[S]) -> Result<Vec<NaiveDateTime>, RuleParseError> {
    parse_ex_dates_in(values, Tz::UTC)
}

pub fn parse_ex_dates_in<S: AsRef<str>>(
    values: &[S],
    tz: Tz,
) -> Result<Vec<NaiveDateTime>, RuleParseError> {
    let mut dates = Vec::new();
    for value in values {
        for entry in value
            .as_ref()
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
        {
            let parsed = parse_date_value(entry, tz)
                .or_else(|| parse_truncated_date(entry))
                .ok_or_else(|| RuleParseError::InvalidExDate(entry.to_string()))?;
            dates.push(parsed);
        }
    }
    Ok(dates)
}

fn parse_frequency(value: &str) -> Result<Frequency, RuleParseError> {
    match value.to_ascii_uppercase().as_str() {
        "DAILY" => Ok(Frequency::Daily),
        "WEEKLY" => Ok(Frequency::Weekly),
        "MONTHLY" => Ok(Frequency::Monthly),
        "YEARLY" => Ok(Frequency::Yearly),
        other => Err(RuleParseError::InvalidFrequency(other.to_string())),
    }
}

fn parse_list<T>(
    value: &str,
    parse: fn(&str) -> Result<T, RuleParseError>,
) -> Result<Vec<T>, RuleParseError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(parse)
        .collect()
}

fn parse_weekday_spec(entry: &str) -> Result<WeekdaySpec, RuleParseError> {
    let invalid = || RuleParseError::InvalidByDay(entry.to_string());
    let upper = entry.to_ascii_uppercase();
    let captures = BYDAY_REGEX.captures(&upper).ok_or_else(invalid)?;

    let weekday = captures
        .get(2)
        .and_then(|m| weekday_from_code(m.as_str()))
        .ok_or_else(invalid)?;

    let ordinal = match captures.get(1) {
        Some(m) => {
            let n = m.as_str().parse::<i8>().map_err(|_| invalid())?;
            // Ordinals count weekdays within a month
            if n == 0 || n.unsigned_abs() > 5 {
                return Err(invalid());
            }
            Some(n)
        }
        None => None,
    };

    Ok(WeekdaySpec { weekday, ordinal })
}

fn parse_month_day(entry: &str) -> Result<i8, RuleParseError> {
    entry
        .parse::<i8>()
        .ok()
        .filter(|d| *d != 0 && d.unsigned_abs() <= 31)
        .ok_or_else(|| RuleParseError::InvalidByMonthDay(entry.to_string()))
}

fn parse_month(entry: &str) -> Result<u8, RuleParseError> {
    entry
        .parse::<u8>()
        .ok()
        .filter(|m| (1..=12).contains(m))
        .ok_or_else(|| RuleParseError::InvalidByMonth(entry.to_string()))
}

fn parse_until(value: &str, tz: Tz) -> Option<NaiveDateTime> {
    if value.len() == 8 {
        // A bare date bounds the whole day
        return NaiveDate::parse_from_str(value, "%Y%m%d")
            .ok()
            .and_then(|d| d.and_hms_opt(23, 59, 59));
    }
    parse_date_value(value, tz)
}

/// `YYYYMMDDTHHMMSSZ`, floating `YYYYMMDDTHHMMSS`, or `YYYYMMDD`, tried in
/// that order.
fn parse_date_value(value: &str, tz: Tz) -> Option<NaiveDateTime> {
    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?;
        return Some(Utc.from_utc_datetime(&naive).with_timezone(&tz).naive_local());
    }
    if value.len() >= 15 && value.contains('T') {
        return NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok();
    }
    if value.len() == 8 {
        return NaiveDate::parse_from_str(value, "%Y%m%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0));
    }
    None
}

// Some producers emit `YYYYMMDDT` with the time part dropped.
fn parse_truncated_date(value: &str) -> Option<NaiveDateTime> {
    let date = value.strip_suffix('T').filter(|d| d.len() == 8)?;
    NaiveDate::parse_from_str(date, "%Y%m%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn weekday_from_code(code: &str) -> Option<Weekday> {
    match code {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

fn weekday_code(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

impl fmt::Display for WeekdaySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ordinal) = self.ordinal {
            write!(f, "{}", ordinal)?;
        }
        f.write_str(weekday_code(self.weekday))
    }
}

/// Renders the rule back to `RRULE` value text (without the `RRULE:` prefix).
impl fmt::Display for SolarRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FREQ={}", self.frequency.as_str())?;
        if self.interval > 1 {
            write!(f, ";INTERVAL={}", self.interval)?;
        }
        if !self.by_weekday.is_empty() {
            let days: Vec<String> = self.by_weekday.iter().map(|d| d.to_string()).collect();
            write!(f, ";BYDAY={}", days.join(","))?;
        }
        if !self.by_month_day.is_empty() {
            let days: Vec<String> = self.by_month_day.iter().map(|d| d.to_string()).collect();
            write!(f, ";BYMONTHDAY={}", days.join(","))?;
        }
        if !self.by_month.is_empty() {
            let months: Vec<String> = self.by_month.iter().map(|m| m.to_string()).collect();
            write!(f, ";BYMONTH={}", months.join(","))?;
        }
        match self.end {
            Some(RecurrenceEnd::Count(count)) => write!(f, ";COUNT={}", count),
            Some(RecurrenceEnd::Until(until)) => {
                write!(f, ";UNTIL={}", until.format("%Y%m%dT%H%M%S"))
            }
            None => Ok(()),
        }
    }
}

impl SolarRule {
    /// Like the `Display` form, but with `UNTIL` written as a UTC instant.
    /// The stored wall-clock `UNTIL` is read in `tz`.
    pub fn to_utc_string(&self, tz: Tz) -> String {
        match self.end {
            Some(RecurrenceEnd::Until(until)) => {
                let head = SolarRule {
                    end: None,
                    ..self.clone()
                };
                format!(
                    "{};UNTIL={}",
                    head,
                    local_to_utc(until, tz).format("%Y%m%dT%H%M%SZ")
                )
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn test_parse_weekly_rule() {
        let rule = parse_rrule("FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE;COUNT=6").unwrap();

        assert_eq!(rule.frequency, Frequency::Weekly);
        assert_eq!(rule.interval, 2);
        assert_eq!(
            rule.by_weekday,
            vec![WeekdaySpec::every(Weekday::Mon), WeekdaySpec::every(Weekday::Wed)]
        );
        assert_eq!(rule.end, Some(RecurrenceEnd::Count(6)));
    }

    #[test]
    fn test_parse_accepts_prefix_and_lowercase() {
        let rule = parse_rrule("RRULE:freq=monthly;byday=-1fr").unwrap();
        assert_eq!(rule.frequency, Frequency::Monthly);
        assert_eq!(rule.by_weekday, vec![WeekdaySpec::nth(-1, Weekday::Fri)]);
    }

    #[test]
    fn test_parse_ordinal_weekdays() {
        let rule = parse_rrule("FREQ=MONTHLY;BYDAY=2TU,+3TH").unwrap();
        assert_eq!(
            rule.by_weekday,
            vec![WeekdaySpec::nth(2, Weekday::Tue), WeekdaySpec::nth(3, Weekday::Thu)]
        );
    }

    #[test]
    fn test_missing_frequency() {
        assert_eq!(
            parse_rrule("INTERVAL=2;COUNT=3"),
            Err(RuleParseError::MissingFrequency)
        );
    }

    #[test]
    fn test_invalid_values() {
        assert_eq!(
            parse_rrule("FREQ=HOURLY"),
            Err(RuleParseError::InvalidFrequency("HOURLY".to_string()))
        );
        assert_eq!(
            parse_rrule("FREQ=DAILY;INTERVAL=0"),
            Err(RuleParseError::InvalidInterval)
        );
        assert_eq!(
            parse_rrule("FREQ=DAILY;INTERVAL=x"),
            Err(RuleParseError::InvalidInterval)
        );
        assert_eq!(
            parse_rrule("FREQ=WEEKLY;BYDAY=XX"),
            Err(RuleParseError::InvalidByDay("XX".to_string()))
        );
        assert_eq!(
            parse_rrule("FREQ=MONTHLY;BYDAY=6MO"),
            Err(RuleParseError::InvalidByDay("6MO".to_string()))
        );
        assert_eq!(
            parse_rrule("FREQ=MONTHLY;BYDAY=-6FR"),
            Err(RuleParseError::InvalidByDay("-6FR".to_string()))
        );
        assert_eq!(
            parse_rrule("FREQ=MONTHLY;BYMONTHDAY=1,abc"),
            Err(RuleParseError::InvalidByMonthDay("abc".to_string()))
        );
        assert_eq!(
            parse_rrule("FREQ=YEARLY;BYMONTH=13"),
            Err(RuleParseError::InvalidByMonth("13".to_string()))
        );
        assert_eq!(
            parse_rrule("FREQ=DAILY;COUNT=-1"),
            Err(RuleParseError::InvalidCount)
        );
        assert_eq!(
            parse_rrule("FREQ=DAILY;UNTIL=tomorrow"),
            Err(RuleParseError::InvalidUntil("tomorrow".to_string()))
        );
    }

    #[test]
    fn test_count_wins_over_until() {
        let rule = parse_rrule("FREQ=DAILY;UNTIL=20250301T000000;COUNT=4").unwrap();
        assert_eq!(rule.end, Some(RecurrenceEnd::Count(4)));
    }

    #[test]
    fn test_until_layouts() {
        let utc = parse_rrule("FREQ=DAILY;UNTIL=20250301T120000Z").unwrap();
        assert_eq!(utc.end, Some(RecurrenceEnd::Until(at(2025, 3, 1, 12, 0, 0))));

        let floating = parse_rrule("FREQ=DAILY;UNTIL=20250301T083000").unwrap();
        assert_eq!(
            floating.end,
            Some(RecurrenceEnd::Until(at(2025, 3, 1, 8, 30, 0)))
        );

        let date_only = parse_rrule("FREQ=DAILY;UNTIL=20250301").unwrap();
        assert_eq!(
            date_only.end,
            Some(RecurrenceEnd::Until(at(2025, 3, 1, 23, 59, 59)))
        );
    }

    #[test]
    fn test_utc_until_is_shifted_into_zone() {
        let rule = parse_rrule_in(
            "FREQ=DAILY;UNTIL=20250301T020000Z",
            chrono_tz::America::New_York,
        )
        .unwrap();
        // EST is UTC-5 in March before the DST switch
        assert_eq!(
            rule.end,
            Some(RecurrenceEnd::Until(at(2025, 2, 28, 21, 0, 0)))
        );
    }

    #[test]
    fn test_empty_lists_are_absent() {
        let rule = parse_rrule("FREQ=WEEKLY;BYDAY=").unwrap();
        assert!(rule.by_weekday.is_empty());
        assert!(!rule.has_filters());
    }

    #[test]
    fn test_parse_ex_dates() {
        let dates = parse_ex_dates(&[
            "20250106T090000,20250113T090000",
            "20250120",
            "20250127T",
            "20250203T140000Z",
        ])
        .unwrap();

        assert_eq!(
            dates,
            vec![
                at(2025, 1, 6, 9, 0, 0),
                at(2025, 1, 13, 9, 0, 0),
                at(2025, 1, 20, 0, 0, 0),
                at(2025, 1, 27, 0, 0, 0),
                at(2025, 2, 3, 14, 0, 0),
            ]
        );
    }

    #[test]
    fn test_parse_ex_dates_rejects_garbage() {
        assert_eq!(
            parse_ex_dates(&["20250106T090000,soon"]),
            Err(RuleParseError::InvalidExDate("soon".to_string()))
        );
    }

    #[test]
    fn test_display_serializes_canonical_order() {
        let rule = SolarRule::new(Frequency::Monthly)
            .with_interval(3)
            .with_weekdays(vec![WeekdaySpec::nth(-1, Weekday::Fri)])
            .with_end(RecurrenceEnd::Until(at(2026, 1, 1, 0, 0, 0)));

        assert_eq!(
            rule.to_string(),
            "FREQ=MONTHLY;INTERVAL=3;BYDAY=-1FR;UNTIL=20260101T000000"
        );
    }

    #[test]
    fn test_utc_string_converts_until() {
        let rule = SolarRule::new(Frequency::Weekly)
            .with_weekdays(vec![WeekdaySpec::every(Weekday::Mon)])
            .with_end(RecurrenceEnd::Until(at(2025, 3, 3, 9, 0, 0)));

        assert_eq!(
            rule.to_utc_string(chrono_tz::Europe::Paris),
            "FREQ=WEEKLY;BYDAY=MO;UNTIL=20250303T080000Z"
        );

        let parsed = parse_rrule_in(&rule.to_utc_string(chrono_tz::Europe::Paris), chrono_tz::Europe::Paris).unwrap();
        assert_eq!(parsed, rule);

        let counted = SolarRule::new(Frequency::Daily).with_end(RecurrenceEnd::Count(3));
        assert_eq!(counted.to_utc_string(chrono_tz::Europe::Paris), "FREQ=DAILY;COUNT=3");
    }

    #[test]
    fn test_display_output_parses_back() {
        let rule = SolarRule::new(Frequency::Yearly)
            .with_months(vec![3, 9])
            .with_month_days(vec![15, -1])
            .with_end(RecurrenceEnd::Count(10));

        assert_eq!(parse_rrule(&rule.to_string()).unwrap(), rule);
    }
}
