//! Path management for postbook
//!
//! Provides XDG-compliant path resolution for configuration, staged data,
//! scraped documents and lock records.
//!
//! ## Path Resolution Order
//!
//! 1. `POSTBOOK_DATA_DIR` environment variable (if set)
//! 2. Unix (Linux/macOS): `$XDG_CONFIG_HOME/postbook` or `~/.config/postbook`
//! 3. Windows: `%APPDATA%\postbook`

use std::path::PathBuf;

use crate::error::PostbookError;
use crate::models::{AccountLocator, LockKey};

/// Manages all paths used by postbook
#[derive(Debug, Clone)]
pub struct PostbookPaths {
    /// Base directory for all postbook data
    base_dir: PathBuf,
}

impl PostbookPaths {
    /// Create a new PostbookPaths instance
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self, PostbookError> {
        let base_dir = if let Ok(custom) = std::env::var("POSTBOOK_DATA_DIR") {
            PathBuf::from(custom)
        } else {
            resolve_default_path()?
        };

        Ok(Self { base_dir })
    }

    /// Create PostbookPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Staged journals, the ledger and the account registry live here
    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join("data")
    }

    /// Root of the scraped document tree (`<login>/<label>/<document>`)
    pub fn documents_dir(&self) -> PathBuf {
        self.base_dir.join("documents")
    }

    /// Lock record directory
    pub fn locks_dir(&self) -> PathBuf {
        self.base_dir.join("locks")
    }

    /// Per-account journal directory
    pub fn journals_dir(&self) -> PathBuf {
        self.data_dir().join("journals")
    }

    /// Journal file for one account: `data/journals/<login>/<label>.json`
    pub fn journal_file(&self, account: &AccountLocator) -> PathBuf {
        self.journals_dir()
            .join(escape_component(&account.login))
            .join(format!("{}.json", escape_component(&account.label)))
    }

    /// Lock record for one key: `locks/<stem>.lock`
    pub fn lock_file(&self, key: &LockKey) -> PathBuf {
        self.locks_dir().join(format!("{}.lock", key.file_stem()))
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the path to the audit log
    pub fn audit_log(&self) -> PathBuf {
        self.base_dir.join("audit.log")
    }

    /// Extraction rulesets, keyed by name
    pub fn rulesets_file(&self) -> PathBuf {
        self.base_dir.join("rulesets.yaml")
    }

    /// Get the path to accounts.json (logins, labels, GL mappings)
    pub fn accounts_file(&self) -> PathBuf {
        self.data_dir().join("accounts.json")
    }

    /// Get the path to ledger.json (posted GL transactions)
    pub fn ledger_file(&self) -> PathBuf {
        self.data_dir().join("ledger.json")
    }

    /// OS-level lock file serializing every storage mutation
    pub fn write_lock_file(&self) -> PathBuf {
        self.data_dir().join(".write.lock")
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<(), PostbookError> {
        for (what, dir) in [
            ("base", self.base_dir.clone()),
            ("data", self.data_dir()),
            ("journals", self.journals_dir()),
            ("documents", self.documents_dir()),
            ("locks", self.locks_dir()),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                PostbookError::Io(format!("Failed to create {} directory: {}", what, e))
            })?;
        }

        Ok(())
    }
}

/// Make a login or label usable as a single path component
///
/// Bytes outside `[A-Za-z0-9._-]` are percent-escaped, and a leading dot is
/// escaped too so no name can turn into `.` or `..`.
pub fn escape_component(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for (i, byte) in name.bytes().enumerate() {
        let plain = byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-') || (byte == b'.' && i > 0);
        if plain {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("%{:02X}", byte));
        }
    }
    escaped
}

/// Resolve the default data directory path based on platform
#[cfg(not(windows))]
fn resolve_default_path() -> Result<PathBuf, PostbookError> {
    let config_base = match std::env::var("XDG_CONFIG_HOME") {
        Ok(xdg) => PathBuf::from(xdg),
        Err(_) => {
            let home = std::env::var("HOME").map_err(|_| {
                PostbookError::Config("HOME environment variable not set".into())
            })?;
            PathBuf::from(home).join(".config")
        }
    };
    Ok(config_base.join("postbook"))
}

/// Resolve the default data directory path based on platform
#[cfg(windows)]
fn resolve_default_path() -> Result<PathBuf, PostbookError> {
    let appdata = std::env::var("APPDATA")
        .map_err(|_| PostbookError::Config("Could not determine APPDATA directory".into()))?;
    Ok(PathBuf::from(appdata).join("postbook"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::TempDir;

    #[test]
    fn test_custom_base_dir() {
        let temp_dir = TempDir::new().unwrap();
        let paths = PostbookPaths::with_base_dir(temp_dir.path().to_path_buf());

        assert_eq!(paths.base_dir(), temp_dir.path());
        assert_eq!(paths.data_dir(), temp_dir.path().join("data"));
        assert_eq!(paths.locks_dir(), temp_dir.path().join("locks"));
    }

    #[test]
    fn test_env_var_override() {
        let temp_dir = TempDir::new().unwrap();
        let custom_path = temp_dir.path().to_str().unwrap();

        env::set_var("POSTBOOK_DATA_DIR", custom_path);

        let paths = PostbookPaths::new().unwrap();
        assert_eq!(paths.base_dir(), temp_dir.path());

        env::remove_var("POSTBOOK_DATA_DIR");
    }

    #[test]
    fn test_ensure_directories() {
        let temp_dir = TempDir::new().unwrap();
        let paths = PostbookPaths::with_base_dir(temp_dir.path().to_path_buf());

        paths.ensure_directories().unwrap();

        assert!(paths.journals_dir().exists());
        assert!(paths.documents_dir().exists());
        assert!(paths.locks_dir().exists());
    }

    #[test]
    fn test_escape_component() {
        assert_eq!(escape_component("chase"), "chase");
        assert_eq!(escape_component("my bank/1"), "my%20bank%2F1");
        assert_eq!(escape_component(".."), "%2E.");
        assert_eq!(escape_component("v1.2"), "v1.2");
    }

    #[test]
    fn test_journal_and_lock_files() {
        let paths = PostbookPaths::with_base_dir(PathBuf::from("/base"));
        let account = AccountLocator::new("chase", "credit card");
        assert_eq!(
            paths.journal_file(&account),
            PathBuf::from("/base/data/journals/chase/credit%20card.json")
        );
        assert_eq!(paths.lock_file(&LockKey::Gl), PathBuf::from("/base/locks/@gl.lock"));
    }

    #[test]
    fn test_file_paths() {
        let temp_dir = TempDir::new().unwrap();
        let paths = PostbookPaths::with_base_dir(temp_dir.path().to_path_buf());

        assert_eq!(paths.settings_file(), temp_dir.path().join("config.json"));
        assert_eq!(
            paths.ledger_file(),
            temp_dir.path().join("data").join("ledger.json")
        );
        assert_eq!(paths.rulesets_file(), temp_dir.path().join("rulesets.yaml"));
    }
}
