use crate::core::{MigrationError, Result};
use crate::lock::LockPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_LEDGER_TABLE_NAME: &str = "changelog";
pub const DEFAULT_PROFILE: &str = "default";

/// Migrator configuration
///
/// Lock wait and poll values are whole minutes and seconds. Tests and
/// embedders that need finer control build a [`LockPolicy`] directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    /// When false, `execute` returns immediately without touching the store
    pub enabled: bool,

    /// Keep polling for the changelog lock instead of giving up at once
    pub wait_for_lock: bool,

    /// How long to keep polling for the lock
    pub lock_wait_timeout_minutes: u64,

    /// Pause between lock attempts
    pub lock_poll_interval_seconds: u64,

    /// Fail with `LockUnobtainable` instead of skipping the run
    pub throw_if_lock_unobtainable: bool,

    /// Table holding ledger entries and the lock record
    pub ledger_table_name: String,

    /// Profiles used to filter change logs and change sets
    pub active_profiles: Vec<String>,
}

impl MigratorConfig {
    pub fn new() -> Self {
        Self {
            enabled: true,
            wait_for_lock: false,
            lock_wait_timeout_minutes: 5,
            lock_poll_interval_seconds: 10,
            throw_if_lock_unobtainable: false,
            ledger_table_name: DEFAULT_LEDGER_TABLE_NAME.to_string(),
            active_profiles: vec![DEFAULT_PROFILE.to_string()],
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn wait_for_lock(mut self, wait: bool) -> Self {
        self.wait_for_lock = wait;
        self
    }

    pub fn lock_wait_timeout_minutes(mut self, minutes: u64) -> Self {
        self.lock_wait_timeout_minutes = minutes;
        self
    }

    pub fn lock_poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.lock_poll_interval_seconds = seconds;
        self
    }

    pub fn throw_if_lock_unobtainable(mut self, throw: bool) -> Self {
        self.throw_if_lock_unobtainable = throw;
        self
    }

    pub fn ledger_table_name(mut self, table: &str) -> Self {
        self.ledger_table_name = table.to_string();
        self
    }

    pub fn active_profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.active_profiles = profiles.into_iter().map(Into::into).collect();
        self
    }

    /// Lock acquisition policy described by this configuration.
    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            wait_for_lock: self.wait_for_lock,
            max_wait: Duration::from_secs(self.lock_wait_timeout_minutes.saturating_mul(60)),
            poll_interval: Duration::from_secs(self.lock_poll_interval_seconds),
            fail_if_unobtainable: self.throw_if_lock_unobtainable,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.ledger_table_name.trim().is_empty() {
            return Err(MigrationError::Configuration(
                "ledger_table_name cannot be empty".to_string(),
            ));
        }

        if self.wait_for_lock && self.lock_poll_interval_seconds == 0 {
            return Err(MigrationError::Configuration(
                "lock_poll_interval_seconds must be > 0 when waiting for the lock".to_string(),
            ));
        }

        Ok(())
    }

    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            MigrationError::Configuration(format!(
                "Failed to read config '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|e| {
            MigrationError::Configuration(format!(
                "Failed to parse config '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self::new()
    }
}
