//! Bulk orchestration across every registered account
//!
//! Each run enumerates accounts in registry order, skips the ones whose login
//! is locked by someone else, and keeps going past per-account or per-entry
//! failures unless the policy says otherwise.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{PostbookError, PostbookResult};
use crate::models::{AccountLocator, EntryId, LockKey, LockSnapshot};
use crate::storage::Storage;

use super::extraction::ExtractionService;
use super::matching::MatchingService;
use super::posting::PostingService;

/// What to do after the first failed unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BulkPolicy {
    /// Stop at the first failure; used by single-account operations
    #[default]
    AbortOnFirstError,
    /// Count the failure and move on
    ContinueOnError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkFailure {
    pub account: AccountLocator,
    pub entry_id: Option<EntryId>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    pub eligible: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub locked: usize,
    pub total_new_entries: usize,
    pub failures: Vec<BulkFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PostStats {
    pub eligible_accounts: usize,
    pub posted: usize,
    pub failed: usize,
    /// Entries left alone because a lock was held elsewhere
    pub locked: usize,
    /// Entries already posted when their turn came
    pub skipped: usize,
    pub failures: Vec<BulkFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub eligible_accounts: usize,
    pub synced: usize,
    pub failed: usize,
    pub locked: usize,
    pub failures: Vec<BulkFailure>,
}

/// Outcome of one unit of work inside a loop
enum Step {
    Continue,
    Stop,
}

/// Service for runs over many accounts
pub struct BulkService<'a> {
    storage: &'a Storage,
    owner: &'a str,
}

impl<'a> BulkService<'a> {
    pub fn new(storage: &'a Storage, owner: &'a str) -> Self {
        Self { storage, owner }
    }

    /// Lock status of the GL and every registered login
    pub fn lock_snapshot(&self) -> PostbookResult<LockSnapshot> {
        let names: Vec<String> = self
            .storage
            .accounts
            .get_all()?
            .into_iter()
            .map(|l| l.name)
            .collect();
        self.storage.locks.snapshot(names.as_slice())
    }

    /// Extract pending documents for every account that has a ruleset
    pub fn extract_all(&self) -> PostbookResult<ExtractStats> {
        let snapshot = self.lock_snapshot()?;
        let extraction = ExtractionService::new(self.storage, self.owner);
        let mut stats = ExtractStats::default();

        for login in self.storage.accounts.get_all()? {
            match self.storage.rulesets.for_login(&login) {
                Ok(_) => {}
                Err(PostbookError::ExtensionMissing(_)) => {
                    debug!(login = %login.name, "no ruleset, skipping");
                    continue;
                }
                Err(e) => return Err(e),
            }
            let login_locked = snapshot.login(&login.name).is_held_by_other(self.owner);

            for account in login.locators() {
                let pending = match extraction.pending_documents(&account) {
                    Ok(pending) => pending,
                    Err(e) => {
                        stats.eligible += 1;
                        stats.failed += 1;
                        stats.failures.push(failure(&account, None, &e));
                        continue;
                    }
                };
                if pending.is_empty() {
                    continue;
                }
                stats.eligible += 1;
                if login_locked {
                    stats.locked += 1;
                    continue;
                }

                match extraction.extract(&account, &pending) {
                    Ok(count) => {
                        stats.succeeded += 1;
                        stats.total_new_entries += count;
                    }
                    Err(e) if e.is_locked() => stats.locked += 1,
                    Err(e) => {
                        warn!(account = %account, error = %e, "extraction failed");
                        stats.failed += 1;
                        stats.failures.push(failure(&account, None, &e));
                    }
                }
            }
        }

        info!(
            eligible = stats.eligible,
            succeeded = stats.succeeded,
            failed = stats.failed,
            locked = stats.locked,
            new_entries = stats.total_new_entries,
            "extract-all finished"
        );
        Ok(stats)
    }

    /// Post every unposted entry of every mapped account
    ///
    /// The GL lock is held for the whole run, so the run fails `Locked` up
    /// front if someone else has it.
    pub fn post_all(&self, policy: BulkPolicy) -> PostbookResult<PostStats> {
        let _gl = self.storage.locks.hold(LockKey::Gl, self.owner, "post-all")?;
        let snapshot = self.lock_snapshot()?;
        let mut stats = PostStats::default();

        // Enumerate before posting anything so both sides of a transfer stay in the run
        let mut plan = Vec::new();
        for account in self.storage.accounts.locators()? {
            if self.storage.accounts.label(&account)?.gl_account.is_none() {
                continue;
            }
            let unposted: Vec<EntryId> = self
                .storage
                .journals
                .load(&account)?
                .unposted()
                .map(|e| e.id.clone())
                .collect();
            if !unposted.is_empty() {
                plan.push((account, unposted));
            }
        }
        stats.eligible_accounts = plan.len();

        for (account, unposted) in plan {
            if snapshot.login(&account.login).is_held_by_other(self.owner) {
                debug!(account = %account, entries = unposted.len(), "login locked, skipping");
                stats.locked += unposted.len();
                continue;
            }
            if let Step::Stop = self.post_entries(&account, &unposted, policy, &mut stats)? {
                break;
            }
        }

        info!(
            eligible_accounts = stats.eligible_accounts,
            posted = stats.posted,
            failed = stats.failed,
            locked = stats.locked,
            skipped = stats.skipped,
            "post-all finished"
        );
        Ok(stats)
    }

    /// Post every unposted entry of one account
    pub fn post_account(&self, account: &AccountLocator, policy: BulkPolicy) -> PostbookResult<PostStats> {
        let unposted: Vec<EntryId> = self
            .storage
            .journals
            .load(account)?
            .unposted()
            .map(|e| e.id.clone())
            .collect();
        self.post_selected(account, &unposted, policy)
    }

    /// Post the given entries of one account, in the order given
    pub fn post_selected(
        &self,
        account: &AccountLocator,
        entry_ids: &[EntryId],
        policy: BulkPolicy,
    ) -> PostbookResult<PostStats> {
        self.storage.accounts.label(account)?;
        let mut stats = PostStats::default();
        if !entry_ids.is_empty() {
            stats.eligible_accounts = 1;
            self.post_entries(account, entry_ids, policy, &mut stats)?;
        }
        Ok(stats)
    }

    /// Re-sync every posted entry that drifted from its transaction
    pub fn sync_all(&self, policy: BulkPolicy) -> PostbookResult<SyncStats> {
        let _gl = self.storage.locks.hold(LockKey::Gl, self.owner, "sync-all")?;
        let snapshot = self.lock_snapshot()?;
        let matching = MatchingService::new(self.storage);
        let posting = PostingService::new(self.storage, self.owner);
        let mut stats = SyncStats::default();

        'accounts: for account in self.storage.accounts.locators()? {
            let drifted = matching.drifted_entries(&account)?;
            if drifted.is_empty() {
                continue;
            }
            stats.eligible_accounts += 1;
            if snapshot.login(&account.login).is_held_by_other(self.owner) {
                stats.locked += drifted.len();
                continue;
            }

            for entry_id in drifted {
                match posting.sync(&account, &entry_id) {
                    Ok(_) => stats.synced += 1,
                    Err(e) if e.is_locked() => stats.locked += 1,
                    Err(e) => {
                        warn!(account = %account, entry = %entry_id, error = %e, "sync failed");
                        stats.failed += 1;
                        stats.failures.push(failure(&account, Some(&entry_id), &e));
                        if policy == BulkPolicy::AbortOnFirstError {
                            break 'accounts;
                        }
                    }
                }
            }
        }

        info!(synced = stats.synced, failed = stats.failed, locked = stats.locked, "sync-all finished");
        Ok(stats)
    }

    /// The shared posting loop
    ///
    /// Prefers a unique transfer counterpart, then the suggested category,
    /// then the configured default counterpart.
    fn post_entries(
        &self,
        account: &AccountLocator,
        entry_ids: &[EntryId],
        policy: BulkPolicy,
        stats: &mut PostStats,
    ) -> PostbookResult<Step> {
        let suggestions = MatchingService::new(self.storage).suggest_categories(account)?;
        let posting = PostingService::new(self.storage, self.owner);
        let default_counterpart = self.storage.settings().default_counterpart.as_str();

        for entry_id in entry_ids {
            let journal = self.storage.journals.load(account)?;
            let result = match journal.get(entry_id) {
                None => Err(PostbookError::entry_not_found(format!("{}/{}", account, entry_id))),
                Some(entry) if entry.is_posted() => {
                    stats.skipped += 1;
                    continue;
                }
                Some(_) => {
                    let suggestion = suggestions.get(entry_id);
                    let category = suggestion
                        .and_then(|s| s.suggested.as_deref())
                        .unwrap_or(default_counterpart);

                    match suggestion.and_then(|s| s.transfer_match.as_ref()) {
                        Some(matched) => posting
                            .post_transfer(account, entry_id, &matched.account, &matched.entry_id)
                            .or_else(|e| match e {
                                PostbookError::AlreadyPosted(_) | PostbookError::Mismatch { .. } => {
                                    debug!(entry = %entry_id, error = %e, "transfer match stale, posting to category");
                                    posting.post(account, entry_id, category, None)
                                }
                                e => Err(e),
                            }),
                        None => posting.post(account, entry_id, category, None),
                    }
                }
            };

            match result {
                Ok(_) => stats.posted += 1,
                Err(e) if e.is_locked() => {
                    stats.locked += 1;
                    if policy == BulkPolicy::AbortOnFirstError {
                        return Ok(Step::Stop);
                    }
                }
                Err(e) => {
                    warn!(account = %account, entry = %entry_id, error = %e, "posting failed");
                    stats.failed += 1;
                    stats.failures.push(failure(account, Some(entry_id), &e));
                    if policy == BulkPolicy::AbortOnFirstError {
                        return Ok(Step::Stop);
                    }
                }
            }
        }
        Ok(Step::Continue)
    }
}

fn failure(account: &AccountLocator, entry_id: Option<&EntryId>, error: &PostbookError) -> BulkFailure {
    BulkFailure {
        account: account.clone(),
        entry_id: entry_id.cloned(),
        error: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PostbookPaths, Settings};
    use crate::models::{EntryStatus, EvidenceRef, JournalEntry, Money, Ruleset};
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::TempDir;

    const OWNER: &str = "tester";

    fn setup(accounts: &[(&str, &str, Option<&str>)]) -> (TempDir, Storage) {
        let temp_dir = TempDir::new().unwrap();
        let paths = PostbookPaths::with_base_dir(temp_dir.path().to_path_buf());
        let storage = Storage::new(paths, Settings::default()).unwrap();
        storage.rulesets.upsert("plain", Ruleset::new()).unwrap();
        for (login, label, gl) in accounts {
            let account = AccountLocator::new(*login, *label);
            storage.accounts.add_login(login, Some("plain".into())).unwrap();
            storage.accounts.add_label(&account).unwrap();
            if let Some(gl) = gl {
                storage.accounts.map_account(&account, gl).unwrap();
            }
        }
        (temp_dir, storage)
    }

    fn stage(storage: &Storage, account: &AccountLocator, row: usize, cents: i64) -> EntryId {
        let mut journal = storage.journals.load(account).unwrap();
        let evidence = vec![EvidenceRef::row("doc.csv", row)];
        let mut entry = JournalEntry::new(
            EntryId::derive(account, &evidence),
            NaiveDate::from_ymd_opt(2025, 5, 1 + row as u32).unwrap(),
            Money::from_cents(cents),
            format!("PAYEE {}", row),
            evidence,
        );
        entry.status = EntryStatus::Cleared;
        let id = entry.id.clone();
        journal.entries.push(entry);
        storage.journals.save(account, &journal).unwrap();
        id
    }

    fn unposted(storage: &Storage, account: &AccountLocator) -> usize {
        storage.journals.load(account).unwrap().unposted().count()
    }

    #[test]
    fn test_post_all_counts_locked_accounts() {
        let (_temp, storage) = setup(&[
            ("chase", "checking", Some("Assets:Chase")),
            ("amex", "gold", Some("Liabilities:Amex")),
            ("citi", "card", Some("Liabilities:Citi")),
        ]);
        let chase = AccountLocator::new("chase", "checking");
        let amex = AccountLocator::new("amex", "gold");
        let citi = AccountLocator::new("citi", "card");
        stage(&storage, &chase, 1, -10_00);
        stage(&storage, &amex, 1, -20_00);
        stage(&storage, &amex, 2, -21_00);
        stage(&storage, &citi, 1, -30_00);
        storage.locks.acquire(&LockKey::login("amex"), "scraper", "scrape").unwrap();

        let stats = BulkService::new(&storage, OWNER)
            .post_all(BulkPolicy::ContinueOnError)
            .unwrap();

        assert_eq!(stats.eligible_accounts, 3);
        assert_eq!(stats.posted, 2);
        assert_eq!(stats.locked, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(unposted(&storage, &amex), 2);
        assert_eq!(unposted(&storage, &chase), 0);
        assert!(!storage.locks.status(&LockKey::Gl).unwrap().is_locked());
    }

    #[test]
    fn test_post_all_uses_transfer_match_once() {
        let (_temp, storage) = setup(&[
            ("chase", "checking", Some("Assets:Chase")),
            ("ally", "savings", Some("Assets:Ally")),
        ]);
        let chase = AccountLocator::new("chase", "checking");
        let ally = AccountLocator::new("ally", "savings");
        let out = stage(&storage, &chase, 1, -12_34);
        stage(&storage, &ally, 1, 12_34);

        let stats = BulkService::new(&storage, OWNER)
            .post_all(BulkPolicy::ContinueOnError)
            .unwrap();

        assert_eq!(stats.posted, 1);
        assert_eq!(stats.skipped, 1);
        let txn_id = storage.journals.load(&chase).unwrap().get(&out).unwrap().posted.unwrap();
        assert!(storage.ledger().get(txn_id).unwrap().unwrap().is_transfer());
    }

    #[test]
    fn test_post_all_requires_gl() {
        let (_temp, storage) = setup(&[("chase", "checking", Some("Assets:Chase"))]);
        storage.locks.acquire(&LockKey::Gl, "auditor", "reconcile").unwrap();

        let err = BulkService::new(&storage, OWNER)
            .post_all(BulkPolicy::ContinueOnError)
            .unwrap_err();
        assert!(err.is_locked());
    }

    #[test]
    fn test_post_all_uses_default_counterpart() {
        let (_temp, storage) = setup(&[("chase", "checking", Some("Assets:Chase"))]);
        let chase = AccountLocator::new("chase", "checking");
        let id = stage(&storage, &chase, 1, -7_00);

        BulkService::new(&storage, OWNER).post_all(BulkPolicy::ContinueOnError).unwrap();

        let txn_id = storage.journals.load(&chase).unwrap().get(&id).unwrap().posted.unwrap();
        let txn = storage.ledger().get(txn_id).unwrap().unwrap();
        assert_eq!(txn.postings[1].account, "Expenses:Unknown");
    }

    #[test]
    fn test_post_account_policies() {
        let (_temp, storage) = setup(&[("chase", "checking", None)]);
        let chase = AccountLocator::new("chase", "checking");
        stage(&storage, &chase, 1, -1_00);
        stage(&storage, &chase, 2, -2_00);
        let service = BulkService::new(&storage, OWNER);

        // Unmapped, so every post fails
        let stats = service.post_account(&chase, BulkPolicy::AbortOnFirstError).unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.failures.len(), 1);
        assert!(stats.failures[0].error.contains("not mapped"));

        let stats = service.post_account(&chase, BulkPolicy::ContinueOnError).unwrap();
        assert_eq!(stats.failed, 2);
    }

    #[test]
    fn test_post_selected_skips_posted() {
        let (_temp, storage) = setup(&[("chase", "checking", Some("Assets:Chase"))]);
        let chase = AccountLocator::new("chase", "checking");
        let a = stage(&storage, &chase, 1, -1_00);
        let b = stage(&storage, &chase, 2, -2_00);
        let service = BulkService::new(&storage, OWNER);

        service.post_selected(&chase, &[a.clone()], BulkPolicy::default()).unwrap();
        let stats = service
            .post_selected(&chase, &[a, b], BulkPolicy::default())
            .unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.posted, 1);
    }

    #[test]
    fn test_extract_all_isolates_accounts() {
        let (_temp, storage) = setup(&[
            ("chase", "checking", None),
            ("amex", "gold", None),
            ("citi", "card", None),
        ]);
        let body = "Date,Amount,Description\n2025-01-02,-4.50,COFFEE\n2025-01-03,-6.00,LUNCH\n";
        for (login, label) in [("chase", "checking"), ("amex", "gold"), ("citi", "card")] {
            let dir = storage.paths().documents_dir().join(login).join(label);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("2025-01.csv"), body).unwrap();
        }
        let broken = storage.paths().documents_dir().join("citi").join("card");
        fs::write(broken.join("2025-02.csv"), "Date,Amount,Description\nnot-a-date,1,X\n").unwrap();
        storage.locks.acquire(&LockKey::login("amex"), "scraper", "scrape").unwrap();

        let stats = BulkService::new(&storage, OWNER).extract_all().unwrap();
        assert_eq!(stats.eligible, 3);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.locked, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total_new_entries, 2);
        assert_eq!(stats.failures[0].account, AccountLocator::new("citi", "card"));
    }

    #[test]
    fn test_sync_all_repairs_drift() {
        let (_temp, storage) = setup(&[("chase", "checking", Some("Assets:Chase"))]);
        let chase = AccountLocator::new("chase", "checking");
        let id = stage(&storage, &chase, 1, -8_00);
        PostingService::new(&storage, OWNER)
            .post(&chase, &id, "Expenses:Dining", None)
            .unwrap();

        let mut journal = storage.journals.load(&chase).unwrap();
        journal.get_mut(&id).unwrap().amount = Money::from_cents(-9_50);
        storage.journals.save(&chase, &journal).unwrap();

        let service = BulkService::new(&storage, OWNER);
        let stats = service.sync_all(BulkPolicy::ContinueOnError).unwrap();
        assert_eq!(stats.eligible_accounts, 1);
        assert_eq!(stats.synced, 1);
        assert!(MatchingService::new(&storage).drifted_entries(&chase).unwrap().is_empty());

        let stats = service.sync_all(BulkPolicy::ContinueOnError).unwrap();
        assert_eq!(stats.eligible_accounts, 0);
    }

    #[test]
    fn test_sync_all_settles_on_mixed_status_transfer() {
        let (_temp, storage) = setup(&[
            ("chase", "checking", Some("Assets:Chase")),
            ("ally", "savings", Some("Assets:Ally")),
        ]);
        let chase = AccountLocator::new("chase", "checking");
        let ally = AccountLocator::new("ally", "savings");
        let out = stage(&storage, &chase, 1, -100_00);
        let inc = stage(&storage, &ally, 2, 100_00);
        let mut journal = storage.journals.load(&ally).unwrap();
        journal.get_mut(&inc).unwrap().status = EntryStatus::Pending;
        storage.journals.save(&ally, &journal).unwrap();
        let txn_id = PostingService::new(&storage, OWNER)
            .post_transfer(&chase, &out, &ally, &inc)
            .unwrap();
        let audited = storage.audit().read_all().unwrap().len();

        let service = BulkService::new(&storage, OWNER);
        for _ in 0..3 {
            let stats = service.sync_all(BulkPolicy::ContinueOnError).unwrap();
            assert_eq!(stats.eligible_accounts, 0);
            assert_eq!(stats.synced, 0);
        }
        assert_eq!(storage.audit().read_all().unwrap().len(), audited);
        assert_eq!(storage.ledger().get(txn_id).unwrap().unwrap().status, EntryStatus::Pending);
    }

    #[test]
    fn test_lock_snapshot_covers_logins() {
        let (_temp, storage) = setup(&[("chase", "checking", None), ("amex", "gold", None)]);
        storage.locks.acquire(&LockKey::login("amex"), "scraper", "scrape").unwrap();

        let snapshot = BulkService::new(&storage, OWNER).lock_snapshot().unwrap();
        assert!(!snapshot.gl.is_locked());
        assert!(snapshot.login("amex").is_held_by_other(OWNER));
        assert!(!snapshot.login("chase").is_locked());
    }
}
