//! Per-account journal repository
//!
//! Each (login, label) has its own JSON file holding the staged entries and
//! the list of documents extraction has consumed.

use crate::config::PostbookPaths;
use crate::error::PostbookResult;
use crate::models::{AccountJournal, AccountLocator};

use super::file_io::{read_json, write_json_atomic};

/// Read-through repository for account journals
pub struct JournalRepository {
    paths: PostbookPaths,
}

impl JournalRepository {
    pub fn new(paths: PostbookPaths) -> Self {
        Self { paths }
    }

    /// Load an account's journal; a missing file is an empty journal
    pub fn load(&self, account: &AccountLocator) -> PostbookResult<AccountJournal> {
        read_json(self.paths.journal_file(account))
    }

    pub fn save(&self, account: &AccountLocator, journal: &AccountJournal) -> PostbookResult<()> {
        for entry in &journal.entries {
            entry.validate().map_err(|e| {
                crate::error::PostbookError::Validation(format!("Entry {}: {}", entry.id, e))
            })?;
        }
        write_json_atomic(self.paths.journal_file(account), journal)
    }

    pub fn exists(&self, account: &AccountLocator) -> bool {
        self.paths.journal_file(account).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryId, EvidenceRef, JournalEntry, Money};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn create_test_repo() -> (TempDir, JournalRepository) {
        let temp_dir = TempDir::new().unwrap();
        let paths = PostbookPaths::with_base_dir(temp_dir.path().to_path_buf());
        (temp_dir, JournalRepository::new(paths))
    }

    fn entry(account: &AccountLocator, row: usize) -> JournalEntry {
        let evidence = vec![EvidenceRef::row("jan.csv", row)];
        JournalEntry::new(
            EntryId::derive(account, &evidence),
            NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            Money::from_cents(-500),
            "LUNCH",
            evidence,
        )
    }

    #[test]
    fn test_missing_journal_is_empty() {
        let (_temp, repo) = create_test_repo();
        let account = AccountLocator::new("chase", "checking");
        assert!(!repo.exists(&account));
        assert_eq!(repo.load(&account).unwrap(), AccountJournal::default());
    }

    #[test]
    fn test_save_and_load_keeps_order() {
        let (_temp, repo) = create_test_repo();
        let account = AccountLocator::new("chase", "checking");

        let mut journal = AccountJournal::default();
        journal.entries.push(entry(&account, 2));
        journal.entries.push(entry(&account, 1));
        journal.mark_processed("jan.csv");
        repo.save(&account, &journal).unwrap();

        let loaded = repo.load(&account).unwrap();
        assert_eq!(loaded, journal);
        assert_eq!(loaded.entries[0].evidence[0].row, 2);
    }

    #[test]
    fn test_accounts_are_isolated() {
        let (_temp, repo) = create_test_repo();
        let checking = AccountLocator::new("chase", "checking");
        let savings = AccountLocator::new("chase", "savings");

        let mut journal = AccountJournal::default();
        journal.entries.push(entry(&checking, 1));
        repo.save(&checking, &journal).unwrap();

        assert!(repo.load(&savings).unwrap().entries.is_empty());
    }

    #[test]
    fn test_invalid_entry_not_saved() {
        let (_temp, repo) = create_test_repo();
        let account = AccountLocator::new("chase", "checking");
        let mut bad = entry(&account, 1);
        bad.evidence.clear();

        let journal = AccountJournal {
            entries: vec![bad],
            processed_documents: Vec::new(),
        };
        assert!(repo.save(&account, &journal).unwrap_err().is_validation());
        assert!(!repo.exists(&account));
    }
}
