// file: src/recurrence/mod.rs
//! Recurrence rules and the engines that turn them into dates.

pub mod expander;
pub mod identity;
pub mod lunar;
pub mod parser;
pub mod rule;
pub mod solar;

pub use expander::RecurringEventExpander;
pub use identity::virtual_id;
pub use lunar::{LeapMonthInfo, LunarConverter, LunarDate};
pub use parser::{parse_ex_dates, parse_ex_dates_in, parse_rrule, parse_rrule_in, RuleParseError};
pub use rule::{
    Frequency, LeapMonthBehavior, LunarFrequency, LunarRule, RecurrenceEnd, RecurrenceRule,
    SolarRule, WeekdaySpec,
};
pub use solar::OccurrenceSpan;
