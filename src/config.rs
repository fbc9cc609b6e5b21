//! Engine configuration.
//!
//! Everything the sync engine and the expander would otherwise read from
//! process-wide state is passed in through these structs at construction.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Months, Utc};
use chrono_tz::Tz;
use log::info;

use crate::error::{AppError, AppResult};
use crate::models::DateWindow;
use crate::utils::retry::RetryConfig;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How far back a windowed pull reaches.
    pub window_past: Duration,
    /// How far ahead a windowed pull reaches.
    pub window_future: Duration,
    /// Quiet period before a scheduled sync starts.
    pub debounce: StdDuration,
    pub retry: RetryConfig,
    /// Zone floating rule times from providers are read in.
    pub timezone: Tz,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            window_past: Duration::days(30),
            window_future: Duration::days(365),
            debounce: StdDuration::from_millis(300),
            retry: RetryConfig::default(),
            timezone: Tz::UTC,
        }
    }
}

impl SyncConfig {
    pub fn sync_window(&self, now: DateTime<Utc>) -> DateWindow {
        DateWindow::around(now, self.window_past, self.window_future)
    }
}

#[derive(Debug, Clone)]
pub struct ExpansionConfig {
    pub past_years: u32,
    pub future_years: u32,
    /// Zone whose calendar days rules are evaluated in.
    pub timezone: Tz,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            past_years: 1,
            future_years: 5,
            timezone: Tz::UTC,
        }
    }
}

impl ExpansionConfig {
    /// `[now - past_years, now + future_years]`.
    pub fn default_window(&self, now: DateTime<Utc>) -> DateWindow {
        let start = now
            .checked_sub_months(Months::new(12 * self.past_years))
            .unwrap_or(now);
        let end = now
            .checked_add_months(Months::new(12 * self.future_years))
            .unwrap_or(now);
        DateWindow::new(start, end)
    }
}

pub fn validate_sync_config(config: &SyncConfig) -> AppResult<()> {
    if config.window_past < Duration::zero() || config.window_future < Duration::zero() {
        return Err(AppError::config("sync window bounds must not be negative"));
    }
    if config.window_past + config.window_future <= Duration::zero() {
        return Err(AppError::config("sync window is empty"));
    }
    if config.retry.base_delay.is_zero() {
        return Err(AppError::config("retry base delay must be positive"));
    }
    info!(
        "Sync config: window -{}d/+{}d, debounce {:?}, {} retries, tz {}",
        config.window_past.num_days(),
        config.window_future.num_days(),
        config.debounce,
        config.retry.max_retries,
        config.timezone
    );
    Ok(())
}

pub fn validate_expansion_config(config: &ExpansionConfig) -> AppResult<()> {
    if config.past_years == 0 && config.future_years == 0 {
        return Err(AppError::config("expansion window is empty"));
    }
    Ok(())
}
