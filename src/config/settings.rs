//! Engine settings for postbook
//!
//! Tunables for matching, lock liveness and I/O timeouts. Every field has a
//! serde default so older or hand-written config files keep loading.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::paths::PostbookPaths;
use crate::error::PostbookError;
use crate::models::Money;

/// Settings for postbook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Commodity used for postings built from staged entries
    #[serde(default = "default_commodity")]
    pub default_commodity: String,

    /// Counterpart used by bulk posting when nothing better is known
    #[serde(default = "default_counterpart")]
    pub default_counterpart: String,

    /// Maximum date distance between the two sides of a transfer
    #[serde(default = "default_transfer_window_days")]
    pub transfer_window_days: i64,

    /// Maximum residual allowed between transfer sides when matching
    #[serde(default)]
    pub transfer_amount_tolerance: Money,

    /// How long after a pending entry its settled row may follow
    #[serde(default = "default_settle_window_days")]
    pub settle_window_days: i64,

    /// Age after which a lock record is considered abandoned
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Bound on any single document store call
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// Bound on waiting for the storage write lock
    #[serde(default = "default_write_lock_timeout_ms")]
    pub write_lock_timeout_ms: u64,
}

fn default_schema_version() -> u32 {
    1
}

fn default_commodity() -> String {
    "USD".to_string()
}

fn default_counterpart() -> String {
    "Expenses:Unknown".to_string()
}

fn default_transfer_window_days() -> i64 {
    5
}

fn default_settle_window_days() -> i64 {
    7
}

fn default_lock_ttl_secs() -> u64 {
    30 * 60
}

fn default_io_timeout_ms() -> u64 {
    10_000
}

fn default_write_lock_timeout_ms() -> u64 {
    5_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            default_commodity: default_commodity(),
            default_counterpart: default_counterpart(),
            transfer_window_days: default_transfer_window_days(),
            transfer_amount_tolerance: Money::zero(),
            settle_window_days: default_settle_window_days(),
            lock_ttl_secs: default_lock_ttl_secs(),
            io_timeout_ms: default_io_timeout_ms(),
            write_lock_timeout_ms: default_write_lock_timeout_ms(),
        }
    }
}

impl Settings {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn write_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.write_lock_timeout_ms)
    }

    /// Load settings from disk, or create default settings if file doesn't exist
    pub fn load_or_create(paths: &PostbookPaths) -> Result<Self, PostbookError> {
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path).map_err(|e| {
                PostbookError::Io(format!("Failed to read settings file: {}", e))
            })?;

            let settings: Settings = serde_json::from_str(&contents).map_err(|e| {
                PostbookError::Config(format!("Failed to parse settings file: {}", e))
            })?;

            settings.validate()?;
            Ok(settings)
        } else {
            // Don't save yet - let caller decide when to persist
            Ok(Settings::default())
        }
    }

    /// Save settings to disk
    pub fn save(&self, paths: &PostbookPaths) -> Result<(), PostbookError> {
        paths.ensure_directories()?;

        let contents = serde_json::to_string_pretty(self).map_err(|e| {
            PostbookError::Config(format!("Failed to serialize settings: {}", e))
        })?;

        std::fs::write(paths.settings_file(), contents).map_err(|e| {
            PostbookError::Io(format!("Failed to write settings file: {}", e))
        })?;

        Ok(())
    }

    fn validate(&self) -> Result<(), PostbookError> {
        if self.default_counterpart.trim().is_empty() {
            return Err(PostbookError::Config(
                "default_counterpart must not be blank".into(),
            ));
        }
        if self.transfer_window_days < 0 {
            return Err(PostbookError::Config(
                "transfer_window_days must not be negative".into(),
            ));
        }
        if self.settle_window_days < 0 {
            return Err(PostbookError::Config(
                "settle_window_days must not be negative".into(),
            ));
        }
        if self.transfer_amount_tolerance.is_negative() {
            return Err(PostbookError::Config(
                "transfer_amount_tolerance must not be negative".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.default_commodity, "USD");
        assert_eq!(settings.transfer_window_days, 5);
        assert_eq!(settings.lock_ttl(), Duration::from_secs(1800));
        assert!(settings.transfer_amount_tolerance.is_zero());
        assert_eq!(settings.settle_window_days, 7);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let paths = PostbookPaths::with_base_dir(temp_dir.path().to_path_buf());

        let mut settings = Settings::default();
        settings.default_counterpart = "Expenses:Uncategorized".into();
        settings.transfer_window_days = 3;

        settings.save(&paths).unwrap();

        let loaded = Settings::load_or_create(&paths).unwrap();
        assert_eq!(loaded.default_counterpart, "Expenses:Uncategorized");
        assert_eq!(loaded.transfer_window_days, 3);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let paths = PostbookPaths::with_base_dir(temp_dir.path().to_path_buf());
        std::fs::write(paths.settings_file(), r#"{"io_timeout_ms": 250}"#).unwrap();

        let loaded = Settings::load_or_create(&paths).unwrap();
        assert_eq!(loaded.io_timeout(), Duration::from_millis(250));
        assert_eq!(loaded.default_commodity, "USD");
    }

    #[test]
    fn test_blank_counterpart_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let paths = PostbookPaths::with_base_dir(temp_dir.path().to_path_buf());
        std::fs::write(paths.settings_file(), r#"{"default_counterpart": "  "}"#).unwrap();

        assert!(matches!(
            Settings::load_or_create(&paths),
            Err(PostbookError::Config(_))
        ));
    }
}
