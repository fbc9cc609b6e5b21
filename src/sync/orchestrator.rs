use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::sync::RwLock;

use super::SyncError;
use crate::calendar::{CalendarProvider, ConflictBasis, ProviderError, PushFailurePolicy, RemoteEvent};
use crate::config::{validate_sync_config, SyncConfig};
use crate::database::Database;
use crate::error::AppError;
use crate::models::{
    Event, EventSource, PullReport, PushFailure, PushReport, SyncReport, SyncState, SyncStatus,
    SyncedCalendar,
};
use crate::recurrence::{parse_rrule_in, RecurrenceRule};
use crate::utils::logging::{log_calendar_sync, log_error_with_context};
use crate::utils::retry::retry_with_exponential_backoff;

/// Reconciles one provider's events with the local store.
///
/// Every provider call goes through the rate-limit retry policy. Only
/// [`perform_full_sync`](Self::perform_full_sync) moves the state machine;
/// pull and push can also be run on their own.
pub struct SyncOrchestrator {
    provider: Arc<dyn CalendarProvider>,
    db: Database,
    config: SyncConfig,
    state: RwLock<SyncState>,
    last_synced_at: RwLock<Option<DateTime<Utc>>>,
}

impl SyncOrchestrator {
    /// Loads the persisted last-sync time for the provider's source.
    pub async fn open(
        provider: Arc<dyn CalendarProvider>,
        db: Database,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        validate_sync_config(&config).map_err(|e| match e {
            AppError::Config(message) => SyncError::InvalidConfig(message),
            other => SyncError::InvalidConfig(other.to_string()),
        })?;
        let last_synced_at = db.last_sync(provider.source()).await?;

        Ok(Self {
            provider,
            db,
            config,
            state: RwLock::new(SyncState::Idle),
            last_synced_at: RwLock::new(last_synced_at),
        })
    }

    pub fn source(&self) -> EventSource {
        self.provider.source()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn state(&self) -> SyncState {
        *self.state.read().await
    }

    pub async fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        *self.last_synced_at.read().await
    }

    /// Pull, then push, then stamp the last-sync time.
    ///
    /// Returns `Ok(None)` without doing anything when a full sync is already
    /// running on this orchestrator. A failure leaves the state at
    /// [`SyncState::Error`] until the next sync starts.
    pub async fn perform_full_sync(&self) -> Result<Option<SyncReport>, SyncError> {
        {
            let mut state = self.state.write().await;
            if *state == SyncState::Syncing {
                debug!("{} sync already running, skipping", self.source().as_str());
                return Ok(None);
            }
            *state = SyncState::Syncing;
        }

        let started = Instant::now();
        match self.run_full_sync(started).await {
            Ok(report) => {
                *self.state.write().await = SyncState::Idle;
                log_calendar_sync(self.source().as_str(), report.total_changes(), report.duration_ms);
                Ok(Some(report))
            }
            Err(e) => {
                *self.state.write().await = SyncState::Error;
                match &e {
                    SyncError::Store(inner) => log_error_with_context(inner, "Sync"),
                    other => error!("{} sync failed: {}", self.source().as_str(), other),
                }
                Err(e)
            }
        }
    }

    async fn run_full_sync(&self, started: Instant) -> Result<SyncReport, SyncError> {
        let pull = self.pull_remote_changes().await?;
        let push = self.push_local_changes().await?;

        let source = self.source();
        let now = Utc::now();
        self.db.set_last_sync(source, now).await?;
        self.db.touch_calendars_synced(source, now).await?;
        *self.last_synced_at.write().await = Some(now);

        Ok(SyncReport::new(source, pull, push, started.elapsed().as_millis() as u64))
    }

    /// Brings remote changes from every enabled calendar into the store.
    ///
    /// Events unknown locally are inserted as synced. Known events are
    /// overwritten only when the remote copy is strictly newer, so ties keep
    /// the local copy. Synced events of an enabled calendar that the provider
    /// no longer reports are soft-deleted. Remote events that end before
    /// they start are left out, and a stored copy of one is kept as it was.
    /// All changes land in one transaction.
    pub async fn pull_remote_changes(&self) -> Result<PullReport, SyncError> {
        let source = self.source();
        let calendars = self.db.enabled_calendars(source).await?;
        let mut report = PullReport {
            calendars: calendars.len(),
            ..PullReport::default()
        };

        if calendars.is_empty() {
            debug!("No enabled {} calendars, nothing to pull", source.as_str());
            return Ok(report);
        }

        let window = self
            .provider
            .supports_windowed_fetch()
            .then(|| self.config.sync_window(Utc::now()));

        let mut seen: HashSet<String> = HashSet::new();
        // Keyed by foreign id; an id reported by two calendars is stored once.
        let mut staged: HashMap<String, Event> = HashMap::new();

        for calendar in &calendars {
            let calendar_id = calendar.calendar_id.as_str();
            let remote_events = retry_with_exponential_backoff(&self.config.retry, || {
                self.provider.fetch_events(calendar_id, window)
            })
            .await?;
            debug!(
                "Pulled {} events from {} calendar {}",
                remote_events.len(),
                source.as_str(),
                calendar_id
            );

            for remote in remote_events {
                seen.insert(remote.foreign_id.clone());

                if remote.end_time.map_or(false, |end| end < remote.start_time) {
                    warn!(
                        "Ignoring {} event {}: it ends before it starts",
                        source.as_str(),
                        remote.foreign_id
                    );
                    report.rejected += 1;
                    continue;
                }

                let existing = match staged.get(&remote.foreign_id) {
                    Some(event) => Some(event.clone()),
                    None => self.db.find_by_foreign_id(source, &remote.foreign_id).await?,
                };

                match existing {
                    None => {
                        let mut event = Event::new(remote.title.clone(), remote.start_time, source);
                        self.apply_remote(&mut event, &remote, calendar_id);
                        report.added += 1;
                        staged.insert(remote.foreign_id.clone(), event);
                    }
                    Some(mut event) if self.remote_is_newer(&event, &remote) => {
                        self.apply_remote(&mut event, &remote, calendar_id);
                        report.updated += 1;
                        staged.insert(remote.foreign_id.clone(), event);
                    }
                    Some(_) => report.skipped += 1,
                }
            }
        }

        let calendar_ids: Vec<String> = calendars.iter().map(|c| c.calendar_id.clone()).collect();
        for mut event in self.db.synced_events_in_calendars(source, &calendar_ids).await? {
            let Some(foreign_id) = event.foreign_id.clone() else {
                continue;
            };
            if seen.contains(&foreign_id) {
                continue;
            }

            debug!("'{}' is gone from {}, marking deleted", event.title, source.as_str());
            event.is_deleted = true;
            event.sync_status = SyncStatus::Deleted;
            report.deleted += 1;
            staged.insert(foreign_id, event);
        }

        let changes: Vec<Event> = staged.into_values().collect();
        self.db.save_all(&changes).await?;

        info!(
            "Pulled {}: {} added, {} updated, {} deleted, {} unchanged",
            source.as_str(),
            report.added,
            report.updated,
            report.deleted,
            report.skipped
        );
        Ok(report)
    }

    /// Sends pending local edits and deletions to the provider.
    ///
    /// What happens when one event fails depends on the provider's
    /// [`PushFailurePolicy`]. A remote delete that finds nothing counts as
    /// done. Read-only providers are never pushed to.
    pub async fn push_local_changes(&self) -> Result<PushReport, SyncError> {
        let source = self.source();
        if self.provider.is_read_only() {
            debug!("{} is read-only, nothing to push", source.as_str());
            return Ok(PushReport::default());
        }
        let policy = self.provider.push_failure_policy();
        let mut report = PushReport::default();
        let mut push_calendar: Option<String> = None;

        for mut event in self.db.pending_events(source).await? {
            match self.push_event(&mut event, &mut push_calendar).await {
                Ok(true) => report.created += 1,
                Ok(false) => report.updated += 1,
                Err(SyncError::Provider(e)) => {
                    record_failure(policy, &mut report, &event, e)?;
                }
                Err(e) => return Err(e),
            }
        }

        for mut event in self.db.events_awaiting_remote_delete(source).await? {
            let Some(foreign_id) = event.foreign_id.clone() else {
                continue;
            };
            let calendar_id = event.calendar_id.clone();

            let result = retry_with_exponential_backoff(&self.config.retry, || {
                self.provider.delete_event(calendar_id.as_deref(), &foreign_id)
            })
            .await;

            match result {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!("'{}' was already removed remotely", event.title);
                }
                Err(e) => {
                    record_failure(policy, &mut report, &event, e)?;
                    continue;
                }
            }

            event.sync_status = SyncStatus::Deleted;
            self.db.update_event(&event).await?;
            report.deleted += 1;
        }

        if !report.is_clean() {
            warn!(
                "Push to {} finished with {} failed events",
                source.as_str(),
                report.failures.len()
            );
        }
        Ok(report)
    }

    /// Pushes one event right away. Unlike a batch push, any failure is
    /// returned to the caller.
    pub async fn sync_event(&self, event: &mut Event) -> Result<(), SyncError> {
        if self.provider.is_read_only() {
            return Err(SyncError::PushFailed {
                title: event.title.clone(),
                source: ProviderError::ReadOnly,
            });
        }
        let mut push_calendar = None;
        match self.push_event(event, &mut push_calendar).await {
            Ok(_) => Ok(()),
            Err(SyncError::Provider(source)) => Err(SyncError::PushFailed {
                title: event.title.clone(),
                source,
            }),
            Err(e) => Err(e),
        }
    }

    /// Creates or updates `event` remotely, then stores it as synced.
    /// Returns whether it was created.
    async fn push_event(
        &self,
        event: &mut Event,
        push_calendar: &mut Option<String>,
    ) -> Result<bool, SyncError> {
        let snapshot = event.clone();

        let created = match snapshot.foreign_id.as_deref() {
            Some(foreign_id) => {
                retry_with_exponential_backoff(&self.config.retry, || {
                    self.provider.update_event(&snapshot, foreign_id)
                })
                .await?;
                false
            }
            None => {
                let calendar_id = match snapshot.calendar_id.clone().or_else(|| push_calendar.clone()) {
                    Some(id) => id,
                    None => {
                        let id = self.ensure_push_calendar().await?;
                        *push_calendar = Some(id.clone());
                        id
                    }
                };

                let foreign_id = retry_with_exponential_backoff(&self.config.retry, || {
                    self.provider.create_event(&snapshot, &calendar_id)
                })
                .await?;

                event.foreign_id = Some(foreign_id);
                event.calendar_id = Some(calendar_id);
                true
            }
        };

        event.sync_status = SyncStatus::Synced;
        event.last_modified_remote = Some(Utc::now());
        self.db.save_all(std::slice::from_ref(event)).await?;

        Ok(created)
    }

    /// The calendar new events are created in.
    ///
    /// Uses the first enabled calendar. With none enabled, the first known
    /// calendar is enabled, and with none known, the provider's primary (or
    /// first) calendar is saved and enabled.
    pub async fn ensure_push_calendar(&self) -> Result<String, SyncError> {
        let source = self.source();

        if let Some(calendar) = self.db.enabled_calendars(source).await?.into_iter().next() {
            return Ok(calendar.calendar_id);
        }

        let calendar = match self.db.calendars_for_source(source).await?.into_iter().next() {
            Some(calendar) => calendar,
            None => {
                let remote = retry_with_exponential_backoff(&self.config.retry, || {
                    self.provider.list_calendars()
                })
                .await?;
                let pick = remote
                    .iter()
                    .find(|c| c.is_primary)
                    .or_else(|| remote.first())
                    .ok_or(SyncError::NoEnabledCalendar)?;

                let calendar = SyncedCalendar::discovered(source, &pick.calendar_id, &pick.title);
                self.db.upsert_calendar(&calendar).await?;
                calendar
            }
        };

        self.db
            .set_calendar_enabled(source, &calendar.calendar_id, true)
            .await?;
        info!(
            "Enabled {} calendar '{}' for new events",
            source.as_str(),
            calendar.title
        );
        Ok(calendar.calendar_id)
    }

    /// Saves the provider's calendar list. Calendars seen for the first time
    /// start disabled; known ones keep their enabled flag.
    pub async fn refresh_calendars(&self) -> Result<Vec<SyncedCalendar>, SyncError> {
        let source = self.source();
        let remote = retry_with_exponential_backoff(&self.config.retry, || {
            self.provider.list_calendars()
        })
        .await?;

        for calendar in &remote {
            self.db
                .upsert_calendar(&SyncedCalendar::discovered(
                    source,
                    &calendar.calendar_id,
                    &calendar.title,
                ))
                .await?;
        }

        Ok(self.db.calendars_for_source(source).await?)
    }

    /// Forgets everything pulled from or pushed to this provider.
    pub async fn delete_all_provider_data(&self) -> Result<(), SyncError> {
        let source = self.source();
        let events = self.db.delete_events_for_source(source).await?;
        let calendars = self.db.delete_calendars_for_source(source).await?;
        self.db.clear_last_sync(source).await?;
        *self.last_synced_at.write().await = None;

        info!(
            "Removed {} events and {} calendars of {}",
            events,
            calendars,
            source.as_str()
        );
        Ok(())
    }

    fn remote_is_newer(&self, local: &Event, remote: &RemoteEvent) -> bool {
        let basis = match self.provider.conflict_basis() {
            ConflictBasis::RemoteWins => return true,
            ConflictBasis::LastKnownRemote => local
                .last_modified_remote
                .unwrap_or(local.last_modified_local),
            ConflictBasis::LocalModified => local.last_modified_local,
        };
        remote.updated.map_or(false, |remote_modified| remote_modified > basis)
    }

    fn apply_remote(&self, event: &mut Event, remote: &RemoteEvent, calendar_id: &str) {
        event.title = remote.title.clone();
        event.start_time = remote.start_time;
        event.end_time = remote.end_time;
        event.is_all_day = remote.is_all_day;
        event.notes = remote.notes.clone();
        event.location = remote.location.clone();
        event.calendar_id = Some(calendar_id.to_string());
        event.foreign_id = Some(remote.foreign_id.clone());
        event.recurrence_data = self.rule_data(remote);
        event.excluded_dates =
            (!remote.excluded_dates.is_empty()).then(|| remote.excluded_dates.join(","));
        event.last_modified_remote = remote.updated;
        if let Some(updated) = remote.updated {
            event.last_modified_local = updated;
        }
        event.sync_status = SyncStatus::Synced;
        event.is_deleted = false;
    }

    /// Stored rule JSON for a pulled event. An unreadable rule leaves the
    /// event non-recurring.
    fn rule_data(&self, remote: &RemoteEvent) -> Option<String> {
        let text = remote.recurrence_rule.as_deref()?;

        let rule = match parse_rrule_in(text, self.config.timezone) {
            Ok(rule) => RecurrenceRule::Solar(rule),
            Err(e) => {
                warn!(
                    "Storing '{}' as a single event, cannot read rule {:?}: {}",
                    remote.title, text, e
                );
                return None;
            }
        };

        match rule.to_json() {
            Ok(json) => Some(json),
            Err(e) => {
                warn!("Failed to encode rule of '{}': {}", remote.title, e);
                None
            }
        }
    }
}

fn record_failure(
    policy: PushFailurePolicy,
    report: &mut PushReport,
    event: &Event,
    error: ProviderError,
) -> Result<(), SyncError> {
    match policy {
        PushFailurePolicy::Propagate => Err(SyncError::PushFailed {
            title: event.title.clone(),
            source: error,
        }),
        PushFailurePolicy::Continue => {
            warn!("Failed to push '{}', continuing: {}", event.title, error);
            report.failures.push(PushFailure {
                event_id: event.id,
                title: event.title.clone(),
                error: error.to_string(),
            });
            Ok(())
        }
    }
}
