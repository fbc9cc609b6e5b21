// file: src/models/mod.rs

pub mod calendar;
pub mod event;
pub mod occurrence;
pub mod sync;
pub mod window;

// Flatten so callers can `use crate::models::Event` directly.
pub use calendar::SyncedCalendar;
pub use event::{Event, EventSource, SyncStatus};
pub use occurrence::Occurrence;
pub use sync::{PullReport, PushFailure, PushReport, SyncReport, SyncState};
pub use window::DateWindow;
