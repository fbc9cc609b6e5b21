// file: src/recurrence/lunar.rs
//! Lunar recurrence expansion and matching.
//!
//! The engine never does calendar astronomy itself. All lunar arithmetic goes
//! through a [`LunarConverter`] supplied by the caller.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, NaiveDateTime};

use super::rule::{LeapMonthBehavior, LunarFrequency, LunarRule, RecurrenceEnd};

/// Lunar years walked past the window's end, so late-starting lunar years
/// still reach it.
pub const LUNAR_YEAR_SLACK: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LunarDate {
    pub day: u8,
    pub month: u8,
    pub year: i32,
    pub is_leap_month: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeapMonthInfo {
    pub has_leap_month: bool,
    /// Month number the leap month repeats; meaningless when
    /// `has_leap_month` is false.
    pub leap_month: u8,
}

/// Conversion between Gregorian dates and lunar calendar coordinates.
pub trait LunarConverter: Send + Sync {
    fn solar_to_lunar(&self, date: NaiveDate) -> LunarDate;

    /// `None` when the lunar date does not exist (e.g. day 30 of a
    /// 29-day month, or a leap month the year doesn't have).
    fn lunar_to_solar(&self, day: u8, month: u8, year: i32, is_leap_month: bool) -> Option<NaiveDate>;

    fn leap_month_info(&self, solar_year: i32) -> LeapMonthInfo;
}

/// Expands `rule` anchored at `master_start` into occurrence starts inside
/// `[window_start, window_end]`, keeping the master's time of day.
pub fn expand(
    rule: &LunarRule,
    master_start: NaiveDateTime,
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
    converter: &dyn LunarConverter,
) -> Vec<NaiveDateTime> {
    if window_end < window_start {
        return Vec::new();
    }

    let master_day = master_start.date();
    let master_lunar = converter.solar_to_lunar(master_day);
    let target_month = rule.lunar_month.unwrap_or(master_lunar.month);

    let first_solar_year = converter
        .lunar_to_solar(1, 1, master_lunar.year, false)
        .map(|d| d.year())
        .unwrap_or_else(|| master_day.year());
    let years = (window_end.year() - first_solar_year).max(0) + LUNAR_YEAR_SLACK;

    // BTreeSet sorts and collapses leap/regular dates that land on the same day
    let mut days = BTreeSet::new();
    for offset in 0..years {
        let year = master_lunar.year + offset;
        let leap = leap_info_for_lunar_year(converter, year);
        let months = match rule.frequency {
            LunarFrequency::Monthly => 1..=12,
            LunarFrequency::Yearly => target_month..=target_month,
        };
        for month in months {
            days.extend(dates_in_month(
                converter,
                rule.lunar_day,
                month,
                year,
                rule.leap_behavior,
                leap,
            ));
        }
    }

    let interval = rule.interval.max(1) as usize;
    let mut result = Vec::new();

    let candidates = days
        .into_iter()
        .filter(|d| *d >= master_day)
        .enumerate()
        .filter(|(index, _)| index % interval == 0)
        .map(|(_, d)| d.and_time(master_start.time()));

    for (position, start) in candidates.enumerate() {
        match rule.end {
            Some(RecurrenceEnd::Count(limit)) if position >= limit as usize => break,
            Some(RecurrenceEnd::Until(until)) if start > until => break,
            _ => {}
        }
        if start > window_end {
            break;
        }
        if start >= window_start {
            result.push(start);
        }
    }

    result
}

/// Whether `rule` anchored at `master_start` produces an occurrence on
/// `target`.
pub fn matches(
    rule: &LunarRule,
    master_start: NaiveDateTime,
    target: NaiveDate,
    converter: &dyn LunarConverter,
) -> bool {
    let master_day = master_start.date();
    if target < master_day {
        return false;
    }

    let lunar = converter.solar_to_lunar(target);
    if lunar.day != rule.lunar_day {
        return false;
    }

    let master_lunar = converter.solar_to_lunar(master_day);
    if rule.frequency == LunarFrequency::Yearly
        && lunar.month != rule.lunar_month.unwrap_or(master_lunar.month)
    {
        return false;
    }

    match rule.leap_behavior {
        LeapMonthBehavior::SkipLeap if lunar.is_leap_month => return false,
        LeapMonthBehavior::LeapOnly if !lunar.is_leap_month => {
            let leap = leap_info_for_lunar_year(converter, lunar.year);
            if leap.has_leap_month && leap.leap_month == lunar.month {
                return false;
            }
        }
        _ => {}
    }

    let interval = i64::from(rule.interval.max(1));
    if interval > 1 {
        let elapsed = match rule.frequency {
            LunarFrequency::Monthly => lunar_months_between(converter, master_lunar, lunar),
            LunarFrequency::Yearly => i64::from(lunar.year - master_lunar.year),
        };
        if elapsed % interval != 0 {
            return false;
        }
    }

    let occurrence = target.and_time(master_start.time());
    match rule.end {
        Some(RecurrenceEnd::Until(until)) => occurrence <= until,
        Some(RecurrenceEnd::Count(_)) => {
            let end_of_target = target.and_hms_opt(23, 59, 59).unwrap_or(occurrence);
            // Expansion stops at the count, so the target only survives if
            // it is among the first `limit` dates
            expand(rule, master_start, master_start, end_of_target, converter)
                .last()
                .map_or(false, |start| start.date() == target)
        }
        None => true,
    }
}

/// Leap data for a lunar year, looked up by the solar year its first day
/// falls in.
fn leap_info_for_lunar_year(converter: &dyn LunarConverter, lunar_year: i32) -> LeapMonthInfo {
    let solar_year = converter
        .lunar_to_solar(1, 1, lunar_year, false)
        .map(|d| d.year())
        .unwrap_or(lunar_year);
    converter.leap_month_info(solar_year)
}

fn dates_in_month(
    converter: &dyn LunarConverter,
    day: u8,
    month: u8,
    year: i32,
    behavior: LeapMonthBehavior,
    leap: LeapMonthInfo,
) -> Vec<NaiveDate> {
    let regular = converter.lunar_to_solar(day, month, year, false);
    if !(leap.has_leap_month && leap.leap_month == month) {
        // Leap behaviour only matters for a month that is repeated
        return regular.into_iter().collect();
    }
    let leap_date = converter.lunar_to_solar(day, month, year, true);

    match behavior {
        LeapMonthBehavior::IncludeLeap => regular.into_iter().chain(leap_date).collect(),
        LeapMonthBehavior::SkipLeap => regular.into_iter().collect(),
        LeapMonthBehavior::LeapOnly => leap_date.into_iter().collect(),
    }
}

/// Lunar months from `from` to `to`, counting the leap month of every year
/// that has one.
fn lunar_months_between(converter: &dyn LunarConverter, from: LunarDate, to: LunarDate) -> i64 {
    let mut months = 0i64;
    for year in from.year..to.year {
        months += months_in_lunar_year(converter, year);
    }
    months + month_index(converter, to) - month_index(converter, from)
}

fn months_in_lunar_year(converter: &dyn LunarConverter, year: i32) -> i64 {
    if leap_info_for_lunar_year(converter, year).has_leap_month {
        13
    } else {
        12
    }
}

/// 0-based position of a month within its lunar year, leap month included.
fn month_index(converter: &dyn LunarConverter, date: LunarDate) -> i64 {
    let leap = leap_info_for_lunar_year(converter, date.year);
    let base = i64::from(date.month) - 1;
    let after_leap = leap.has_leap_month
        && (date.month > leap.leap_month || (date.month == leap.leap_month && date.is_leap_month));
    if after_leap {
        base + 1
    } else {
        base
    }
}
