//! Two-way synchronisation between the local store and remote providers.

use thiserror::Error;

use crate::calendar::ProviderError;

pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::SyncOrchestrator;
pub use scheduler::SyncScheduler;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("No calendar is available to push new events to")]
    NoEnabledCalendar,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Failed to push '{title}': {source}")]
    PushFailed {
        title: String,
        #[source]
        source: ProviderError,
    },

    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    #[error("Local store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl SyncError {
    /// The provider error behind this failure, if any.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            SyncError::Provider(e) | SyncError::PushFailed { source: e, .. } => Some(e),
            _ => None,
        }
    }
}
