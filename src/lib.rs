// lunacal library
// Solar and lunar recurrence expansion with two-way provider sync

pub mod calendar;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod recurrence;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use calendar::{CalendarProvider, ProviderError, RemoteCalendar, RemoteEvent};
pub use config::{ExpansionConfig, SyncConfig};
pub use database::Database;
pub use error::{AppError, AppResult};
pub use models::*;
pub use recurrence::{RecurrenceRule, RecurringEventExpander};
pub use sync::{SyncError, SyncOrchestrator, SyncScheduler};

use std::sync::Arc;

/// State shared by everything that reads the calendar.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub expander: Arc<RecurringEventExpander>,
    pub shutdown: tokio_util::sync::CancellationToken,
}

impl AppState {
    /// Occurrences of every live event in `window`, or in the expander's
    /// default window around now.
    pub async fn occurrences(&self, window: Option<DateWindow>) -> anyhow::Result<Vec<Occurrence>> {
        let events = self.db.active_events().await?;
        let occurrences = match window {
            Some(window) => self.expander.expand(&events, window),
            None => self.expander.expand_default(&events),
        };
        Ok(occurrences)
    }
}
