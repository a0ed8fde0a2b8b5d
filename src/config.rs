//! Configuration for a feed-to-calendar pairing.
//!
//! A `SyncConfig` is built once (from defaults, a serialized file or the
//! environment), validated, and then handed to the engine by value. Nothing in
//! the engine mutates it.

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::calendar::common::validate_feed_url;
use crate::error::{SyncError, SyncResult};

pub const ENV_FEED_URL: &str = "FEEDSYNC_FEED_URL";
pub const ENV_CALENDAR: &str = "FEEDSYNC_CALENDAR";
pub const ENV_PAST_DAYS: &str = "FEEDSYNC_PAST_DAYS";
pub const ENV_FUTURE_DAYS: &str = "FEEDSYNC_FUTURE_DAYS";
pub const ENV_DELETE_ORPHANS: &str = "FEEDSYNC_DELETE_ORPHANS";
pub const ENV_DRY_RUN: &str = "FEEDSYNC_DRY_RUN";
pub const ENV_OPERATION_TIMEOUT: &str = "FEEDSYNC_OPERATION_TIMEOUT_SECS";
pub const ENV_STATE_PATH: &str = "FEEDSYNC_STATE_PATH";

/// Days either side of "now" that a pass considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    pub past_days: u32,
    pub future_days: u32,
}

impl Default for SyncWindow {
    fn default() -> Self {
        Self {
            past_days: 30,
            future_days: 365,
        }
    }
}

impl SyncWindow {
    pub fn new(past_days: u32, future_days: u32) -> Self {
        Self { past_days, future_days }
    }

    /// Inclusive `[from, to]` bounds around `now`.
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            now - Duration::days(i64::from(self.past_days)),
            now + Duration::days(i64::from(self.future_days)),
        )
    }

    pub fn contains(&self, instant: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let (from, to) = self.bounds(now);
        instant >= from && instant <= to
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Only needed when the feed is fetched over HTTP.
    pub feed_url: Option<String>,
    pub destination_calendar: String,
    pub window: SyncWindow,
    pub delete_orphans: bool,
    pub dry_run: bool,
    pub operation_timeout_secs: u64,
    pub state_path: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            feed_url: None,
            destination_calendar: "Subscribed".to_string(),
            window: SyncWindow::default(),
            delete_orphans: false,
            dry_run: false,
            operation_timeout_secs: 30,
            state_path: default_state_path(),
        }
    }
}

impl SyncConfig {
    /// Defaults overlaid with any `FEEDSYNC_*` variables that are set.
    pub fn from_env() -> SyncResult<Self> {
        let mut config = Self::default();

        if let Ok(url) = env::var(ENV_FEED_URL) {
            config.feed_url = Some(url);
        }
        if let Ok(calendar) = env::var(ENV_CALENDAR) {
            config.destination_calendar = calendar;
        }
        if let Some(days) = parse_var::<u32>(ENV_PAST_DAYS)? {
            config.window.past_days = days;
        }
        if let Some(days) = parse_var::<u32>(ENV_FUTURE_DAYS)? {
            config.window.future_days = days;
        }
        if let Some(flag) = parse_flag(ENV_DELETE_ORPHANS)? {
            config.delete_orphans = flag;
        }
        if let Some(flag) = parse_flag(ENV_DRY_RUN)? {
            config.dry_run = flag;
        }
        if let Some(secs) = parse_var::<u64>(ENV_OPERATION_TIMEOUT)? {
            config.operation_timeout_secs = secs;
        }
        if let Ok(path) = env::var(ENV_STATE_PATH) {
            config.state_path = PathBuf::from(path);
        }

        Ok(config)
    }

    pub fn operation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.operation_timeout_secs)
    }
}

/// `<data dir>/feedsync/state.db`, or the working directory when the platform
/// has no data directory.
pub fn default_state_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("feedsync")
        .join("state.db")
}

fn parse_var<T: std::str::FromStr>(name: &str) -> SyncResult<Option<T>> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| SyncError::config(format!("{} must be a non-negative number, got {:?}", name, value))),
        Err(_) => Ok(None),
    }
}

fn parse_flag(name: &str) -> SyncResult<Option<bool>> {
    match env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
            _ => Err(SyncError::config(format!("{} must be true or false, got {:?}", name, value))),
        },
        Err(_) => Ok(None),
    }
}

/// Reject configurations a pass could not run with.
pub fn validate_config(config: &SyncConfig) -> SyncResult<()> {
    if config.destination_calendar.trim().is_empty() {
        return Err(SyncError::config("destination calendar name cannot be empty"));
    }
    if config.window.past_days == 0 && config.window.future_days == 0 {
        return Err(SyncError::config("sync window must cover at least one day"));
    }
    if config.operation_timeout_secs == 0 {
        return Err(SyncError::config("operation timeout must be at least one second"));
    }
    if let Some(url) = &config.feed_url {
        validate_feed_url(url).map_err(|e| SyncError::config(e.to_string()))?;
    }
    if config.delete_orphans && config.dry_run {
        warn!("Orphan deletion is enabled but this is a dry run; nothing will be removed");
    }

    info!(
        "Configuration valid: calendar={:?}, window=-{}d/+{}d, delete_orphans={}",
        config.destination_calendar, config.window.past_days, config.window.future_days, config.delete_orphans
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serial_test::serial;

    fn clear_env() {
        for name in [
            ENV_FEED_URL,
            ENV_CALENDAR,
            ENV_PAST_DAYS,
            ENV_FUTURE_DAYS,
            ENV_DELETE_ORPHANS,
            ENV_DRY_RUN,
            ENV_OPERATION_TIMEOUT,
            ENV_STATE_PATH,
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    fn test_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.window, SyncWindow::new(30, 365));
        assert!(!config.delete_orphans);
        assert!(!config.dry_run);
        assert_eq!(config.operation_timeout_secs, 30);
        assert!(config.state_path.ends_with("feedsync/state.db"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let window = SyncWindow::new(1, 2);
        let (from, to) = window.bounds(now);
        assert_eq!(from, Utc.with_ymd_and_hms(2024, 5, 31, 12, 0, 0).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap());
        assert!(window.contains(from, now));
        assert!(window.contains(to, now));
        assert!(!window.contains(to + Duration::seconds(1), now));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = SyncConfig::default();
        config.destination_calendar = "  ".to_string();
        assert!(matches!(validate_config(&config), Err(SyncError::Config(_))));

        let mut config = SyncConfig::default();
        config.operation_timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = SyncConfig::default();
        config.window = SyncWindow::new(0, 0);
        assert!(validate_config(&config).is_err());

        let mut config = SyncConfig::default();
        config.feed_url = Some("http://example.com/cal.ics".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"destination_calendar": "Work", "delete_orphans": true}"#).unwrap();
        assert_eq!(config.destination_calendar, "Work");
        assert!(config.delete_orphans);
        assert_eq!(config.window.future_days, 365);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides_defaults() {
        clear_env();
        env::set_var(ENV_CALENDAR, "Team");
        env::set_var(ENV_PAST_DAYS, "7");
        env::set_var(ENV_DELETE_ORPHANS, "yes");
        env::set_var(ENV_STATE_PATH, "/tmp/feedsync-test.db");

        let config = SyncConfig::from_env().unwrap();
        assert_eq!(config.destination_calendar, "Team");
        assert_eq!(config.window, SyncWindow::new(7, 365));
        assert!(config.delete_orphans);
        assert!(!config.dry_run);
        assert_eq!(config.state_path, PathBuf::from("/tmp/feedsync-test.db"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage() {
        clear_env();
        env::set_var(ENV_FUTURE_DAYS, "a year");
        assert!(matches!(SyncConfig::from_env(), Err(SyncError::Config(_))));
        env::remove_var(ENV_FUTURE_DAYS);

        env::set_var(ENV_DRY_RUN, "maybe");
        assert!(SyncConfig::from_env().is_err());
        clear_env();
    }
}
