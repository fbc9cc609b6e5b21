// file: src/models/window.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Closed time range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// `[now - past, now + future]`.
    pub fn around(now: DateTime<Utc>, past: Duration, future: Duration) -> Self {
        Self {
            start: now - past,
            end: now + future,
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}
