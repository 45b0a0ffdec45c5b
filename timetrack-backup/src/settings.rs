//! Backup configuration and bookkeeping kept in the host's key/value settings.
//!
//! The engine never talks to a database directly: the host supplies a
//! [`SettingsStore`], and [`BackupSettings`] maps the backup keys onto it.

use crate::retention::RetentionLimits;
use crate::scheduler::timing::ScheduleTime;
use crate::{BackupError, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

pub const KEY_SCHEDULE_TIMES: &str = "backup_schedule_times";
pub const KEY_MAX_DAILY: &str = "backup_max_daily";
pub const KEY_MAX_WEEKLY: &str = "backup_max_weekly";
pub const KEY_MAX_MONTHLY: &str = "backup_max_monthly";
pub const KEY_WEEKLY_DAY: &str = "backup_weekly_day";
pub const KEY_LAST_AUTO: &str = "backup_last_auto";

/// Persistent key/value settings provided by the host application.
///
/// `set` must be an upsert.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Settings held in memory; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| BackupError::Settings("settings lock poisoned".into()))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| BackupError::Settings("settings lock poisoned".into()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Schedule and retention limits for automatic backups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionConfig {
    /// Empty means no automatic schedule.
    pub schedule_times: Vec<ScheduleTime>,
    pub max_daily: u32,
    pub max_weekly: u32,
    pub max_monthly: u32,
    /// 0 = Sunday.
    pub weekly_day: u32,
}

fn default_schedule_times() -> Vec<ScheduleTime> {
    ScheduleTime::new(12, 0).into_iter().collect()
}

fn default_max_daily() -> u32 {
    7
}

fn default_max_weekly() -> u32 {
    4
}

fn default_max_monthly() -> u32 {
    12
}

fn default_weekly_day() -> u32 {
    0
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            schedule_times: default_schedule_times(),
            max_daily: default_max_daily(),
            max_weekly: default_max_weekly(),
            max_monthly: default_max_monthly(),
            weekly_day: default_weekly_day(),
        }
    }
}

impl RetentionConfig {
    pub fn limits(&self) -> RetentionLimits {
        RetentionLimits {
            max_daily: self.max_daily,
            max_weekly: self.max_weekly,
            max_monthly: self.max_monthly,
            weekly_day: self.weekly_day,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("maxDaily", self.max_daily),
            ("maxWeekly", self.max_weekly),
            ("maxMonthly", self.max_monthly),
        ] {
            if value < 1 {
                return Err(BackupError::ConfigInvalid(format!(
                    "{field} must be at least 1, got {value}"
                )));
            }
        }
        if self.weekly_day > 6 {
            return Err(BackupError::ConfigInvalid(format!(
                "weeklyDay must be between 0 (Sunday) and 6 (Saturday), got {}",
                self.weekly_day
            )));
        }
        Ok(())
    }

    /// Sorted, duplicate-free schedule.
    pub fn normalized(mut self) -> Self {
        self.schedule_times.sort();
        self.schedule_times.dedup();
        self
    }
}

/// What the scheduler needs from configuration.
pub trait ConfigProvider: Send + Sync {
    fn retention_config(&self) -> Result<RetentionConfig>;

    /// When the last automatic backup was taken, if ever.
    fn last_auto_backup(&self) -> Result<Option<DateTime<Local>>>;

    fn record_auto_backup(&self, at: DateTime<Local>) -> Result<()>;
}

/// Backup keys on top of a host [`SettingsStore`].
#[derive(Clone)]
pub struct BackupSettings {
    store: Arc<dyn SettingsStore>,
}

impl BackupSettings {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Validate and persist `config`. Returns the normalized config as stored.
    pub fn save_config(&self, config: RetentionConfig) -> Result<RetentionConfig> {
        config.validate()?;
        let config = config.normalized();

        self.store
            .set(KEY_SCHEDULE_TIMES, &serde_json::to_string(&config.schedule_times)?)?;
        self.store.set(KEY_MAX_DAILY, &config.max_daily.to_string())?;
        self.store.set(KEY_MAX_WEEKLY, &config.max_weekly.to_string())?;
        self.store.set(KEY_MAX_MONTHLY, &config.max_monthly.to_string())?;
        self.store.set(KEY_WEEKLY_DAY, &config.weekly_day.to_string())?;
        Ok(config)
    }

    fn read_number(&self, key: &str, default: u32, valid: impl Fn(u32) -> bool) -> Result<u32> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(default);
        };
        match raw.trim().parse::<u32>() {
            Ok(value) if valid(value) => Ok(value),
            _ => {
                warn!(key, value = %raw, default, "Ignoring invalid backup setting");
                Ok(default)
            }
        }
    }

    fn read_schedule(&self) -> Result<Vec<ScheduleTime>> {
        let Some(raw) = self.store.get(KEY_SCHEDULE_TIMES)? else {
            return Ok(default_schedule_times());
        };
        match serde_json::from_str::<Vec<ScheduleTime>>(&raw) {
            Ok(mut times) => {
                times.sort();
                times.dedup();
                Ok(times)
            }
            Err(e) => {
                warn!(key = KEY_SCHEDULE_TIMES, value = %raw, error = %e, "Ignoring invalid backup schedule");
                Ok(default_schedule_times())
            }
        }
    }
}

impl ConfigProvider for BackupSettings {
    fn retention_config(&self) -> Result<RetentionConfig> {
        Ok(RetentionConfig {
            schedule_times: self.read_schedule()?,
            max_daily: self.read_number(KEY_MAX_DAILY, default_max_daily(), |v| v >= 1)?,
            max_weekly: self.read_number(KEY_MAX_WEEKLY, default_max_weekly(), |v| v >= 1)?,
            max_monthly: self.read_number(KEY_MAX_MONTHLY, default_max_monthly(), |v| v >= 1)?,
            weekly_day: self.read_number(KEY_WEEKLY_DAY, default_weekly_day(), |v| v <= 6)?,
        })
    }

    fn last_auto_backup(&self) -> Result<Option<DateTime<Local>>> {
        let Some(raw) = self.store.get(KEY_LAST_AUTO)? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(at) => Ok(Some(at.with_timezone(&Local))),
            Err(e) => {
                warn!(key = KEY_LAST_AUTO, value = %raw, error = %e, "Ignoring unreadable backup bookmark");
                Ok(None)
            }
        }
    }

    fn record_auto_backup(&self, at: DateTime<Local>) -> Result<()> {
        self.store.set(KEY_LAST_AUTO, &at.to_rfc3339())
    }
}
