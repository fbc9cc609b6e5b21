pub mod logging;
pub mod retry;

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Resolves a wall-clock time in `tz` to an instant.
///
/// Ambiguous times (clocks going back) take the earlier instant. Times that
/// fall in a forward gap are read with the offset in force before the jump,
/// so 02:30 on a spring-forward night in New York lands on 03:30 EDT.
pub fn local_to_utc(local: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(t) => t.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let hour = Duration::hours(1);
            match tz.from_local_datetime(&(local - hour)).earliest() {
                Some(before) => before.with_timezone(&Utc) + hour,
                None => Utc.from_utc_datetime(&local),
            }
        }
    }
}

/// Trims a title pulled from a provider; blank titles get a placeholder.
pub fn normalize_title(title: Option<&str>) -> String {
    match title.map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => "(No title)".to_string(),
    }
}

/// Empty or whitespace-only text fields are stored as absent.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
