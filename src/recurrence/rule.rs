// file: src/recurrence/rule.rs
use chrono::{NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};

use super::parser::RuleParseError;

/// Gregorian recurrence frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
        }
    }
}

/// A `BYDAY` entry: a weekday, optionally pinned to its n-th (or n-th from
/// last, when negative) appearance in the month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeekdaySpec {
    pub weekday: Weekday,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<i8>,
}

impl WeekdaySpec {
    pub fn every(weekday: Weekday) -> Self {
        Self {
            weekday,
            ordinal: None,
        }
    }

    pub fn nth(ordinal: i8, weekday: Weekday) -> Self {
        Self {
            weekday,
            ordinal: Some(ordinal),
        }
    }
}

/// When a recurrence stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum RecurrenceEnd {
    /// Total number of candidate occurrences, exclusions included.
    Count(u32),
    /// Last instant (inclusive) an occurrence may start at.
    Until(NaiveDateTime),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolarRule {
    pub frequency: Frequency,
    pub interval: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub by_weekday: Vec<WeekdaySpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub by_month_day: Vec<i8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub by_month: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<RecurrenceEnd>,
}

impl SolarRule {
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            interval: 1,
            by_weekday: Vec::new(),
            by_month_day: Vec::new(),
            by_month: Vec::new(),
            end: None,
        }
    }

    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_weekdays(mut self, days: Vec<WeekdaySpec>) -> Self {
        self.by_weekday = days;
        self
    }

    pub fn with_month_days(mut self, days: Vec<i8>) -> Self {
        self.by_month_day = days;
        self
    }

    pub fn with_months(mut self, months: Vec<u8>) -> Self {
        self.by_month = months;
        self
    }

    pub fn with_end(mut self, end: RecurrenceEnd) -> Self {
        self.end = Some(end);
        self
    }

    pub fn has_filters(&self) -> bool {
        !self.by_weekday.is_empty() || !self.by_month_day.is_empty() || !self.by_month.is_empty()
    }

    pub fn validate(&self) -> Result<(), RuleParseError> {
        if self.interval == 0 {
            return Err(RuleParseError::InvalidInterval);
        }
        if let Some(day) = self
            .by_month_day
            .iter()
            .find(|d| **d == 0 || d.unsigned_abs() > 31)
        {
            return Err(RuleParseError::InvalidByMonthDay(day.to_string()));
        }
        if let Some(month) = self.by_month.iter().find(|m| !(1..=12).contains(*m)) {
            return Err(RuleParseError::InvalidByMonth(month.to_string()));
        }
        if let Some(spec) = self
            .by_weekday
            .iter()
            .find(|s| s.ordinal.map_or(false, |n| n == 0 || n.unsigned_abs() > 5))
        {
            return Err(RuleParseError::InvalidByDay(spec.to_string()));
        }
        if let Some(RecurrenceEnd::Count(0)) = self.end {
            return Err(RuleParseError::InvalidCount);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LunarFrequency {
    Monthly,
    Yearly,
}

/// What a lunar rule does with the intercalary copy of its month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LeapMonthBehavior {
    IncludeLeap,
    SkipLeap,
    LeapOnly,
}

impl Default for LeapMonthBehavior {
    fn default() -> Self {
        LeapMonthBehavior::IncludeLeap
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LunarRule {
    pub frequency: LunarFrequency,
    pub lunar_day: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lunar_month: Option<u8>,
    #[serde(default)]
    pub leap_behavior: LeapMonthBehavior,
    pub interval: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<RecurrenceEnd>,
}

impl LunarRule {
    pub fn monthly(lunar_day: u8) -> Self {
        Self {
            frequency: LunarFrequency::Monthly,
            lunar_day,
            lunar_month: None,
            leap_behavior: LeapMonthBehavior::IncludeLeap,
            interval: 1,
            end: None,
        }
    }

    pub fn yearly(lunar_day: u8, lunar_month: u8) -> Self {
        Self {
            frequency: LunarFrequency::Yearly,
            lunar_day,
            lunar_month: Some(lunar_month),
            leap_behavior: LeapMonthBehavior::IncludeLeap,
            interval: 1,
            end: None,
        }
    }

    pub fn with_leap_behavior(mut self, behavior: LeapMonthBehavior) -> Self {
        self.leap_behavior = behavior;
        self
    }

    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_end(mut self, end: RecurrenceEnd) -> Self {
        self.end = Some(end);
        self
    }

    pub fn validate(&self) -> Result<(), RuleParseError> {
        if self.interval == 0 {
            return Err(RuleParseError::InvalidInterval);
        }
        if !(1..=30).contains(&self.lunar_day) {
            return Err(RuleParseError::InvalidLunarDay(self.lunar_day));
        }
        match (self.frequency, self.lunar_month) {
            (_, Some(month)) if !(1..=12).contains(&month) => {
                Err(RuleParseError::InvalidLunarMonth(month))
            }
            (LunarFrequency::Yearly, None) => Err(RuleParseError::MissingLunarMonth),
            _ => Ok(()),
        }
    }
}

/// The recurrence attached to a master event.
///
/// Stored as JSON of the shape `{"type": "solar", "rule": {..}}`; the variant
/// set is closed and every consumer matches on it exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "rule", rename_all = "lowercase")]
pub enum RecurrenceRule {
    Solar(SolarRule),
    Lunar(LunarRule),
    None,
}

impl RecurrenceRule {
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, RecurrenceRule::None)
    }

    pub fn validate(&self) -> Result<(), RuleParseError> {
        match self {
            RecurrenceRule::Solar(rule) => rule.validate(),
            RecurrenceRule::Lunar(rule) => rule.validate(),
            RecurrenceRule::None => Ok(()),
        }
    }
}
