//! User preferences, persisted as JSON on every change.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::CoreError;

pub const DEFAULT_CHECK_INTERVAL: u64 = 10;
pub const DEFAULT_PRESENCE_TIMEOUT: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Seconds between two polls of the remote RiiTag.
    pub check_interval: u64,
    /// Minutes after the last play before presence is cleared.
    pub presence_timeout: u64,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            presence_timeout: DEFAULT_PRESENCE_TIMEOUT,
        }
    }
}

impl Preferences {
    /// Load preferences, writing the defaults out first if the file is missing.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            let prefs = Self::default();
            prefs.save(path)?;
            return Ok(prefs);
        }

        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    /// The presence timeout as a duration. A value too large to represent,
    /// which can only come from a hand-edited file, falls back to the default.
    pub fn presence_timeout(&self) -> chrono::Duration {
        minutes(self.presence_timeout).unwrap_or_else(|| {
            tracing::warn!(
                presence_timeout = self.presence_timeout,
                "Presence timeout out of range, using the default"
            );
            chrono::Duration::minutes(DEFAULT_PRESENCE_TIMEOUT as i64)
        })
    }

    /// Reject values that cannot be turned into durations.
    pub fn validate(&self) -> Result<(), CoreError> {
        if minutes(self.presence_timeout).is_none() {
            return Err(CoreError::Config(format!(
                "presence_timeout of {} minutes is out of range",
                self.presence_timeout
            )));
        }
        Ok(())
    }
}

fn minutes(value: u64) -> Option<chrono::Duration> {
    i64::try_from(value).ok().and_then(chrono::Duration::try_minutes)
}

/// Owner of the live preferences.
///
/// Every mutation is saved before it is published to subscribers, so the
/// file on disk never lags behind what the watcher is using.
#[derive(Debug)]
pub struct PreferencesHandle {
    path: PathBuf,
    tx: watch::Sender<Preferences>,
}

impl PreferencesHandle {
    pub fn load(path: PathBuf) -> Result<Self, CoreError> {
        let prefs = Preferences::load(&path)?;
        let (tx, _) = watch::channel(prefs);
        Ok(Self { path, tx })
    }

    pub fn current(&self) -> Preferences {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Preferences> {
        self.tx.subscribe()
    }

    pub fn set_check_interval(&self, seconds: u64) -> Result<Preferences, CoreError> {
        self.modify(|prefs| prefs.check_interval = seconds)
    }

    pub fn set_presence_timeout(&self, minutes: u64) -> Result<Preferences, CoreError> {
        self.modify(|prefs| prefs.presence_timeout = minutes)
    }

    pub fn reset(&self) -> Result<Preferences, CoreError> {
        self.modify(|prefs| *prefs = Preferences::default())
    }

    fn modify(&self, apply: impl FnOnce(&mut Preferences)) -> Result<Preferences, CoreError> {
        let mut prefs = self.current();
        apply(&mut prefs);
        prefs.validate()?;
        prefs.save(&self.path)?;
        self.tx.send_replace(prefs);
        tracing::debug!(
            check_interval = prefs.check_interval,
            presence_timeout = prefs.presence_timeout,
            "Preferences saved"
        );
        Ok(prefs)
    }
}
