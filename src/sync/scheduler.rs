use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::SyncOrchestrator;
use crate::calendar::ProviderError;

/// Debounces sync requests for one orchestrator.
///
/// Each request waits out the quiet period first. A newer request replaces
/// one that is still waiting. Once a sync has started it runs to the end.
pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    debounce: Duration,
    shutdown: CancellationToken,
    pending: Mutex<Option<CancellationToken>>,
}

impl SyncScheduler {
    /// Uses the orchestrator's configured debounce. Cancelling `shutdown`
    /// drops every waiting request.
    pub fn new(orchestrator: Arc<SyncOrchestrator>, shutdown: CancellationToken) -> Self {
        let debounce = orchestrator.config().debounce;
        Self {
            orchestrator,
            debounce,
            shutdown,
            pending: Mutex::new(None),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub async fn schedule_sync(&self) -> JoinHandle<()> {
        let token = self.shutdown.child_token();
        if let Some(previous) = self.pending.lock().await.replace(token.clone()) {
            previous.cancel();
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let debounce = self.debounce;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Scheduled {} sync superseded", orchestrator.source().as_str());
                }
                _ = sleep(debounce) => {
                    match orchestrator.perform_full_sync().await {
                        Ok(Some(report)) => info!(
                            "Scheduled {} sync done with {} changes",
                            report.source.as_str(),
                            report.total_changes()
                        ),
                        Ok(None) => debug!("Scheduled sync skipped, one is already running"),
                        Err(e) => match e.provider_error() {
                            Some(ProviderError::Unauthorized) => warn!(
                                "Scheduled {} sync needs new credentials",
                                orchestrator.source().as_str()
                            ),
                            _ => error!("Scheduled sync failed: {}", e),
                        },
                    }
                }
            }
        })
    }

    /// Drops the waiting request, if any.
    pub async fn cancel_pending(&self) {
        if let Some(token) = self.pending.lock().await.take() {
            token.cancel();
        }
    }
}
