// file: src/recurrence/solar.rs
//! Gregorian recurrence expansion and single-date matching.
//!
//! Everything here works on wall-clock times in one zone; the caller picks
//! the zone and converts at the edges.

use std::collections::HashSet;

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime};

use super::rule::{Frequency, RecurrenceEnd, SolarRule, WeekdaySpec};

/// Expansion never walks further than this many years past the master start.
pub const MAX_EXPANSION_YEARS: u32 = 5;
/// Hard cap on accepted candidates per expansion.
pub const MAX_OCCURRENCES: usize = 2000;

/// One expanded occurrence: its start and, when the master has one, its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OccurrenceSpan {
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
}

/// Expands `rule` anchored at `master_start` into the occurrences whose start
/// lies in `[window_start, window_end]`.
///
/// Candidates are walked one day at a time from the master start. Excluded
/// days still consume a slot of a `Count` limit. Candidates before the
/// window are counted but not emitted, so `Count` is measured from the
/// master rather than from the window.
pub fn expand(
    rule: &SolarRule,
    master_start: NaiveDateTime,
    master_end: Option<NaiveDateTime>,
    excluded: &[NaiveDateTime],
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
) -> Vec<OccurrenceSpan> {
    let mut spans = Vec::new();
    if window_end < window_start {
        return spans;
    }

    let horizon = expansion_horizon(master_start);
    let duration = master_end.map(|end| end - master_start);
    let excluded: HashSet<NaiveDate> = excluded.iter().map(|d| d.date()).collect();

    let mut candidate = master_start;
    let mut accepted = 0usize;

    while accepted < MAX_OCCURRENCES && candidate < horizon && candidate <= window_end {
        if let Some(RecurrenceEnd::Until(until)) = rule.end {
            if candidate > until {
                break;
            }
        }

        if occurs_on_day(rule, master_start.date(), candidate.date()) {
            accepted += 1;
            if let Some(RecurrenceEnd::Count(limit)) = rule.end {
                if accepted > limit as usize {
                    break;
                }
            }

            if candidate >= window_start && !excluded.contains(&candidate.date()) {
                spans.push(OccurrenceSpan {
                    start: candidate,
                    end: duration.map(|d| candidate + d),
                });
            }
        }

        candidate += Duration::days(1);
    }

    spans
}

/// Whether `rule` anchored at `master_start` produces an occurrence on
/// `target`.
///
/// Rules without a `Count` are answered directly. A `Count` needs the
/// target's position in the sequence, which means walking from the master.
pub fn matches(rule: &SolarRule, master_start: NaiveDateTime, target: NaiveDate) -> bool {
    let master_day = master_start.date();
    if target < master_day {
        return false;
    }

    match rule.end {
        Some(RecurrenceEnd::Until(until)) => {
            target.and_time(master_start.time()) <= until && occurs_on_day(rule, master_day, target)
        }
        Some(RecurrenceEnd::Count(limit)) => {
            position_of(rule, master_start, target).map_or(false, |pos| pos <= limit as usize)
        }
        None => occurs_on_day(rule, master_day, target),
    }
}

/// 1-based position of `target` among the rule's candidates, within the
/// same bounds expansion uses.
fn position_of(rule: &SolarRule, master_start: NaiveDateTime, target: NaiveDate) -> Option<usize> {
    let horizon = expansion_horizon(master_start).date();
    if target >= horizon || !occurs_on_day(rule, master_start.date(), target) {
        return None;
    }

    let mut day = master_start.date();
    let mut position = 0usize;
    while day <= target {
        if occurs_on_day(rule, master_start.date(), day) {
            position += 1;
            if position > MAX_OCCURRENCES {
                return None;
            }
        }
        day += Duration::days(1);
    }
    Some(position)
}

fn expansion_horizon(master_start: NaiveDateTime) -> NaiveDateTime {
    master_start
        .checked_add_months(Months::new(12 * MAX_EXPANSION_YEARS))
        .unwrap_or(NaiveDateTime::MAX)
}

/// Frequency, interval, and `BY*` filters for a single calendar day.
fn occurs_on_day(rule: &SolarRule, master: NaiveDate, day: NaiveDate) -> bool {
    if day < master {
        return false;
    }
    let interval = i64::from(rule.interval.max(1));

    match rule.frequency {
        // BYMONTH limits a daily rule to the listed months
        Frequency::Daily => {
            (day - master).num_days() % interval == 0
                && (rule.by_month.is_empty() || rule.by_month.contains(&(day.month() as u8)))
        }
        Frequency::Weekly => {
            weeks_between(master, day) % interval == 0
                && if rule.by_weekday.is_empty() {
                    day.weekday() == master.weekday()
                } else {
                    rule.by_weekday.iter().any(|spec| spec.weekday == day.weekday())
                }
        }
        Frequency::Monthly => {
            months_between(master, day) % interval == 0
                && (rule.by_month.is_empty() || rule.by_month.contains(&(day.month() as u8)))
                && matches_day_in_month(rule, master, day)
        }
        Frequency::Yearly => {
            i64::from(day.year() - master.year()) % interval == 0
                && if rule.by_month.is_empty() {
                    day.month() == master.month() && matches_day_in_month(rule, master, day)
                } else {
                    rule.by_month.contains(&(day.month() as u8))
                        && matches_day_in_month(rule, master, day)
                }
        }
    }
}

fn matches_day_in_month(rule: &SolarRule, master: NaiveDate, day: NaiveDate) -> bool {
    if !rule.by_month_day.is_empty() {
        return rule
            .by_month_day
            .iter()
            .any(|&month_day| month_day_matches(month_day, day));
    }
    if !rule.by_weekday.is_empty() {
        return rule
            .by_weekday
            .iter()
            .any(|spec| weekday_in_month_matches(spec, day));
    }
    day.day() == master.day()
}

fn month_day_matches(month_day: i8, day: NaiveDate) -> bool {
    let last = days_in_month(day.year(), day.month()) as i32;
    let wanted = if month_day < 0 {
        last + 1 + i32::from(month_day)
    } else {
        i32::from(month_day)
    };
    wanted == day.day() as i32
}

fn weekday_in_month_matches(spec: &WeekdaySpec, day: NaiveDate) -> bool {
    if spec.weekday != day.weekday() {
        return false;
    }
    let Some(ordinal) = spec.ordinal else {
        return true;
    };

    let from_start = ((day.day() - 1) / 7 + 1) as i8;
    let from_end = -(((days_in_month(day.year(), day.month()) - day.day()) / 7 + 1) as i8);
    ordinal == from_start || ordinal == from_end
}

/// Calendar weeks (Monday-start) between the weeks containing `a` and `b`.
fn weeks_between(a: NaiveDate, b: NaiveDate) -> i64 {
    (week_start(b) - week_start(a)).num_days() / 7
}

fn week_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(i64::from(day.weekday().num_days_from_monday()))
}

fn months_between(a: NaiveDate, b: NaiveDate) -> i64 {
    i64::from(b.year() - a.year()) * 12 + i64::from(b.month()) - i64::from(a.month())
}

pub(crate) fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::parser::parse_rrule;
    use chrono::Weekday;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        day(y, m, d).and_hms_opt(h, 0, 0).unwrap()
    }

    fn starts(spans: &[OccurrenceSpan]) -> Vec<NaiveDate> {
        spans.iter().map(|s| s.start.date()).collect()
    }

    #[test]
    fn test_biweekly_monday_wednesday_with_count() {
        // 2025-01-06 is a Monday
        let rule = parse_rrule("FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE;COUNT=6").unwrap();
        let spans = expand(
            &rule,
            at(2025, 1, 6, 9),
            Some(at(2025, 1, 6, 10)),
            &[],
            at(2025, 1, 1, 0),
            at(2025, 12, 31, 0),
        );

        assert_eq!(
            starts(&spans),
            vec![
                day(2025, 1, 6),
                day(2025, 1, 8),
                day(2025, 1, 20),
                day(2025, 1, 22),
                day(2025, 2, 3),
                day(2025, 2, 5),
            ]
        );
        assert!(spans.iter().all(|s| s.end == Some(s.start + Duration::hours(1))));
    }

    #[test]
    fn test_exclusions_consume_count() {
        let rule = parse_rrule("FREQ=DAILY;COUNT=5").unwrap();
        let spans = expand(
            &rule,
            at(2025, 3, 1, 8),
            None,
            &[at(2025, 3, 2, 0), at(2025, 3, 4, 17)],
            at(2025, 1, 1, 0),
            at(2025, 12, 31, 0),
        );

        assert_eq!(
            starts(&spans),
            vec![day(2025, 3, 1), day(2025, 3, 3), day(2025, 3, 5)]
        );
    }

    #[test]
    fn test_count_is_measured_from_master_not_window() {
        let rule = parse_rrule("FREQ=DAILY;COUNT=10").unwrap();
        let spans = expand(
            &rule,
            at(2025, 3, 1, 8),
            None,
            &[],
            at(2025, 3, 8, 0),
            at(2025, 12, 31, 0),
        );

        assert_eq!(
            starts(&spans),
            vec![day(2025, 3, 8), day(2025, 3, 9), day(2025, 3, 10)]
        );
    }

    #[test]
    fn test_until_is_inclusive() {
        let rule = parse_rrule("FREQ=DAILY;UNTIL=20250305T080000").unwrap();
        let spans = expand(
            &rule,
            at(2025, 3, 1, 8),
            None,
            &[],
            at(2025, 1, 1, 0),
            at(2025, 12, 31, 0),
        );
        assert_eq!(spans.len(), 5);
        assert_eq!(spans.last().unwrap().start, at(2025, 3, 5, 8));
    }

    #[test]
    fn test_monthly_by_month_day_skips_short_months() {
        let rule = parse_rrule("FREQ=MONTHLY;BYMONTHDAY=31").unwrap();
        let spans = expand(
            &rule,
            at(2025, 1, 31, 12),
            None,
            &[],
            at(2025, 1, 1, 0),
            at(2025, 6, 30, 0),
        );
        assert_eq!(
            starts(&spans),
            vec![day(2025, 1, 31), day(2025, 3, 31), day(2025, 5, 31)]
        );
    }

    #[test]
    fn test_monthly_negative_month_day() {
        let rule = parse_rrule("FREQ=MONTHLY;BYMONTHDAY=-1;COUNT=3").unwrap();
        let spans = expand(
            &rule,
            at(2025, 1, 31, 12),
            None,
            &[],
            at(2025, 1, 1, 0),
            at(2025, 12, 31, 0),
        );
        assert_eq!(
            starts(&spans),
            vec![day(2025, 1, 31), day(2025, 2, 28), day(2025, 3, 31)]
        );
    }

    #[test]
    fn test_monthly_last_friday() {
        let rule = parse_rrule("FREQ=MONTHLY;BYDAY=-1FR;COUNT=3").unwrap();
        let spans = expand(
            &rule,
            at(2025, 1, 31, 17),
            None,
            &[],
            at(2025, 1, 1, 0),
            at(2025, 12, 31, 0),
        );
        assert_eq!(
            starts(&spans),
            vec![day(2025, 1, 31), day(2025, 2, 28), day(2025, 3, 28)]
        );
    }

    #[test]
    fn test_monthly_second_tuesday() {
        let rule = parse_rrule("FREQ=MONTHLY;BYDAY=2TU;COUNT=3").unwrap();
        let spans = expand(
            &rule,
            at(2025, 1, 14, 17),
            None,
            &[],
            at(2025, 1, 1, 0),
            at(2025, 12, 31, 0),
        );
        assert_eq!(
            starts(&spans),
            vec![day(2025, 1, 14), day(2025, 2, 11), day(2025, 3, 11)]
        );
    }

    #[test]
    fn test_yearly_defaults_to_master_date() {
        let rule = parse_rrule("FREQ=YEARLY;COUNT=3").unwrap();
        let spans = expand(
            &rule,
            at(2024, 7, 4, 12),
            None,
            &[],
            at(2024, 1, 1, 0),
            at(2030, 1, 1, 0),
        );
        assert_eq!(
            starts(&spans),
            vec![day(2024, 7, 4), day(2025, 7, 4), day(2026, 7, 4)]
        );
    }

    #[test]
    fn test_yearly_by_month_uses_master_day() {
        let rule = parse_rrule("FREQ=YEARLY;BYMONTH=3,9;COUNT=4").unwrap();
        let spans = expand(
            &rule,
            at(2025, 3, 15, 12),
            None,
            &[],
            at(2025, 1, 1, 0),
            at(2030, 1, 1, 0),
        );
        assert_eq!(
            starts(&spans),
            vec![
                day(2025, 3, 15),
                day(2025, 9, 15),
                day(2026, 3, 15),
                day(2026, 9, 15)
            ]
        );
    }

    #[test]
    fn test_expansion_stops_at_horizon() {
        let rule = parse_rrule("FREQ=YEARLY").unwrap();
        let spans = expand(
            &rule,
            at(2025, 1, 1, 0),
            None,
            &[],
            at(2025, 1, 1, 0),
            at(2040, 1, 1, 0),
        );
        assert_eq!(spans.len(), MAX_EXPANSION_YEARS as usize);
    }

    #[test]
    fn test_unbounded_daily_rule_stops_at_horizon() {
        let rule = parse_rrule("FREQ=DAILY").unwrap();
        let spans = expand(
            &rule,
            at(2025, 1, 1, 0),
            None,
            &[],
            at(2025, 1, 1, 0),
            at(2035, 1, 1, 0),
        );
        // 2025-01-01 up to (not including) 2030-01-01
        assert_eq!(spans.len(), 1826);
        assert!(spans.len() <= MAX_OCCURRENCES);
        assert_eq!(spans.last().unwrap().start.date(), day(2029, 12, 31));
    }

    #[test]
    fn test_inverted_window_is_empty() {
        let rule = parse_rrule("FREQ=DAILY").unwrap();
        assert!(expand(
            &rule,
            at(2025, 1, 1, 0),
            None,
            &[],
            at(2025, 2, 1, 0),
            at(2025, 1, 1, 0),
        )
        .is_empty());
    }

    #[test]
    fn test_weekly_default_weekday() {
        let rule = SolarRule::new(Frequency::Weekly);
        // 2025-01-09 is a Thursday
        assert!(matches(&rule, at(2025, 1, 9, 9), day(2025, 1, 16)));
        assert!(!matches(&rule, at(2025, 1, 9, 9), day(2025, 1, 17)));
        assert_eq!(day(2025, 1, 16).weekday(), Weekday::Thu);
    }

    #[test]
    fn test_matches_rejects_dates_before_master() {
        let rule = parse_rrule("FREQ=DAILY").unwrap();
        assert!(!matches(&rule, at(2025, 3, 1, 8), day(2025, 2, 28)));
        assert!(matches(&rule, at(2025, 3, 1, 8), day(2025, 3, 1)));
    }

    #[test]
    fn test_matches_interval_and_until() {
        let rule = parse_rrule("FREQ=WEEKLY;INTERVAL=2;BYDAY=MO;UNTIL=20250203T090000").unwrap();
        let master = at(2025, 1, 6, 9);
        assert!(matches(&rule, master, day(2025, 1, 20)));
        assert!(!matches(&rule, master, day(2025, 1, 13)));
        assert!(matches(&rule, master, day(2025, 2, 3)));
        assert!(!matches(&rule, master, day(2025, 2, 17)));
    }

    #[test]
    fn test_matches_agrees_with_count_expansion() {
        let rule = parse_rrule("FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE;COUNT=6").unwrap();
        let master = at(2025, 1, 6, 9);
        let expanded: HashSet<NaiveDate> = starts(&expand(
            &rule,
            master,
            None,
            &[],
            at(2025, 1, 1, 0),
            at(2025, 12, 31, 0),
        ))
        .into_iter()
        .collect();

        let mut target = day(2025, 1, 1);
        while target <= day(2025, 6, 30) {
            assert_eq!(
                matches(&rule, master, target),
                expanded.contains(&target),
                "disagreement on {}",
                target
            );
            target += Duration::days(1);
        }
    }

    #[test]
    fn test_count_is_exact_for_every_frequency() {
        let cases = [
            ("FREQ=DAILY;INTERVAL=3;COUNT=5", at(2025, 1, 30, 9), 5),
            ("FREQ=WEEKLY;INTERVAL=3;BYDAY=TU,FR;COUNT=7", at(2025, 1, 7, 9), 7),
            ("FREQ=MONTHLY;INTERVAL=2;BYMONTHDAY=31;COUNT=4", at(2025, 1, 31, 9), 4),
            ("FREQ=MONTHLY;INTERVAL=2;BYDAY=-1FR;COUNT=5", at(2025, 1, 31, 9), 5),
            ("FREQ=YEARLY;INTERVAL=2;COUNT=3", at(2025, 6, 15, 9), 3),
            ("FREQ=YEARLY;BYMONTH=2;BYMONTHDAY=29;COUNT=2", at(2024, 2, 29, 9), 2),
        ];

        for (text, master, count) in cases {
            let rule = parse_rrule(text).unwrap();
            let window_end = master + Duration::days(366 * 5);
            let expanded: Vec<NaiveDate> = starts(&expand(&rule, master, None, &[], master, window_end));
            assert_eq!(expanded.len(), count, "{}", text);

            let expanded: HashSet<NaiveDate> = expanded.into_iter().collect();
            let mut target = master.date() - Duration::days(3);
            while target < window_end.date() {
                assert_eq!(
                    matches(&rule, master, target),
                    expanded.contains(&target),
                    "{} disagrees on {}",
                    text,
                    target
                );
                target += Duration::days(1);
            }
        }
    }

    #[test]
    fn test_daily_by_month_limits_the_days() {
        let rule = parse_rrule("FREQ=DAILY;INTERVAL=10;BYMONTH=3;COUNT=4").unwrap();
        let spans = expand(&rule, at(2025, 2, 19, 9), None, &[], at(2025, 1, 1, 0), at(2026, 12, 31, 0));

        // Feb 19 and Mar 1 are both on the 10-day grid; only March counts
        assert_eq!(
            starts(&spans),
            vec![day(2025, 3, 1), day(2025, 3, 11), day(2025, 3, 21), day(2025, 3, 31)]
        );
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2025, 2), 28);
        assert_eq!(days_in_month(2025, 12), 31);
        assert_eq!(days_in_month(2025, 4), 30);
    }
}
