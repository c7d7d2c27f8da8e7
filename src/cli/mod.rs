//! CLI command handlers
//!
//! This module contains the implementation of CLI commands,
//! bridging the clap argument parsing with the service layer.

pub mod account;
pub mod extract;
pub mod inspect;
pub mod lock;
pub mod post;

pub use account::{handle_account_command, AccountCommands};
pub use extract::{handle_extract_command, ExtractCommands};
pub use inspect::{handle_inspect_command, InspectCommands};
pub use lock::{handle_lock_command, LockCommands};
pub use post::{handle_post_command, PostCommands};

use crate::error::{PostbookError, PostbookResult};
use crate::models::{AccountLocator, EntryId, GlTransactionId, LockKey};
use crate::storage::Storage;

/// Parse `login/label`; the label may itself contain slashes
pub fn parse_locator(s: &str) -> PostbookResult<AccountLocator> {
    match s.split_once('/') {
        Some((login, label)) if !login.is_empty() && !label.is_empty() => {
            Ok(AccountLocator::new(login, label))
        }
        _ => Err(PostbookError::Validation(format!(
            "Expected an account as 'login/label', got '{}'",
            s
        ))),
    }
}

/// Resolve a full entry id or a unique prefix of one within an account
pub fn resolve_entry(storage: &Storage, account: &AccountLocator, s: &str) -> PostbookResult<EntryId> {
    if let Ok(id) = EntryId::parse(s) {
        return Ok(id);
    }

    let prefix = s.trim().to_ascii_lowercase();
    if prefix.is_empty() {
        return Err(PostbookError::Validation("Entry id is empty".into()));
    }
    let journal = storage.journals.load(account)?;
    let mut matches = journal
        .entries
        .iter()
        .filter(|e| e.id.as_str().starts_with(&prefix));

    match (matches.next(), matches.next()) {
        (Some(entry), None) => Ok(entry.id.clone()),
        (None, _) => Err(PostbookError::entry_not_found(format!("{}/{}", account, s))),
        (Some(_), Some(_)) => Err(PostbookError::Validation(format!(
            "Entry id '{}' is ambiguous in {}",
            s, account
        ))),
    }
}

pub fn parse_txn_id(s: &str) -> PostbookResult<GlTransactionId> {
    s.trim()
        .parse()
        .map_err(|e| PostbookError::Validation(format!("{}", e)))
}

/// `gl` (or `@gl`) names the general ledger; anything else is a login
pub fn parse_lock_key(s: &str) -> LockKey {
    match s {
        "gl" | "@gl" => LockKey::Gl,
        login => LockKey::login(login),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PostbookPaths, Settings};
    use crate::models::{EvidenceRef, JournalEntry, Money};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    #[test]
    fn test_parse_locator() {
        let account = parse_locator("chase/credit/visa").unwrap();
        assert_eq!(account.login, "chase");
        assert_eq!(account.label, "credit/visa");

        assert!(parse_locator("chase").is_err());
        assert!(parse_locator("/checking").is_err());
    }

    #[test]
    fn test_parse_lock_key() {
        assert_eq!(parse_lock_key("gl"), LockKey::Gl);
        assert_eq!(parse_lock_key("@gl"), LockKey::Gl);
        assert_eq!(parse_lock_key("chase"), LockKey::login("chase"));
    }

    #[test]
    fn test_resolve_entry_by_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let paths = PostbookPaths::with_base_dir(temp_dir.path().to_path_buf());
        let storage = Storage::new(paths, Settings::default()).unwrap();
        let account = AccountLocator::new("chase", "checking");

        let evidence = vec![EvidenceRef::row("jan.csv", 1)];
        let entry = JournalEntry::new(
            EntryId::derive(&account, &evidence),
            NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
            Money::from_cents(-450),
            "COFFEE",
            evidence,
        );
        let mut journal = storage.journals.load(&account).unwrap();
        journal.entries.push(entry.clone());
        storage.journals.save(&account, &journal).unwrap();

        assert_eq!(resolve_entry(&storage, &account, entry.id.short()).unwrap(), entry.id);
        assert_eq!(resolve_entry(&storage, &account, entry.id.as_str()).unwrap(), entry.id);
        assert!(resolve_entry(&storage, &account, "zzzz").unwrap_err().is_not_found());
    }
}
