//! Posting service
//!
//! Moves staged entries into the general ledger and back. Each entry is
//! `Unposted -> Posted -> Unposted`; sync, recategorize and merge rewrite a
//! posted transaction in place.
//!
//! Every operation holds the lock of each login it touches plus the GL lock,
//! then takes the storage write lock and re-reads everything it changes. The
//! ledger is written first; if a journal write then fails, the ledger writes
//! are undone and any journal already saved is restored.

use std::collections::btree_map::Entry as MapEntry;
use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::audit::EntityType;
use crate::error::{PostbookError, PostbookResult};
use crate::locks::LockGuard;
use crate::models::{
    AccountJournal, AccountLocator, EntryId, EntryStatus, GlPosting, GlTransaction,
    GlTransactionId, JournalEntry, LockKey, Money, PostingSource,
};
use crate::services::matching::expected_status;
use crate::storage::Storage;

/// Service for posting management
pub struct PostingService<'a> {
    storage: &'a Storage,
    owner: &'a str,
}

enum LedgerWrite {
    Append(GlTransaction),
    Update(GlTransaction),
    Remove(GlTransactionId),
}

/// Inverse of an applied [`LedgerWrite`], carrying the before-image
enum LedgerUndo {
    Remove(GlTransactionId),
    Restore(GlTransaction),
    Reappend(GlTransaction),
}

/// Journals loaded during one operation, with their on-disk originals
struct JournalSet<'s> {
    storage: &'s Storage,
    journals: BTreeMap<AccountLocator, (AccountJournal, AccountJournal)>,
}

impl<'s> JournalSet<'s> {
    fn new(storage: &'s Storage) -> Self {
        Self {
            storage,
            journals: BTreeMap::new(),
        }
    }

    fn journal(&mut self, account: &AccountLocator) -> PostbookResult<&mut AccountJournal> {
        let slot = match self.journals.entry(account.clone()) {
            MapEntry::Occupied(slot) => slot.into_mut(),
            MapEntry::Vacant(slot) => {
                let loaded = self.storage.journals.load(account)?;
                slot.insert((loaded.clone(), loaded))
            }
        };
        Ok(&mut slot.1)
    }

    fn entry(&mut self, account: &AccountLocator, id: &EntryId) -> PostbookResult<&mut JournalEntry> {
        self.journal(account)?
            .get_mut(id)
            .ok_or_else(|| PostbookError::entry_not_found(format!("{}/{}", account, id)))
    }

    /// Entries that differ from what was loaded: (account, before, after)
    fn changed_entries(&self) -> Vec<(&AccountLocator, &JournalEntry, &JournalEntry)> {
        let mut changed = Vec::new();
        for (account, (original, current)) in &self.journals {
            for after in &current.entries {
                if let Some(before) = original.get(&after.id) {
                    if before != after {
                        changed.push((account, before, after));
                    }
                }
            }
        }
        changed
    }

    /// Write every changed journal; on failure restore the ones already written
    fn save(&self) -> PostbookResult<()> {
        let mut saved: Vec<(&AccountLocator, &AccountJournal)> = Vec::new();
        for (account, (original, current)) in &self.journals {
            if original == current {
                continue;
            }
            if let Err(e) = self.storage.journals.save(account, current) {
                for (account, original) in saved {
                    if let Err(restore) = self.storage.journals.save(account, original) {
                        warn!(account = %account, error = %restore, "failed to restore journal");
                    }
                }
                return Err(e);
            }
            saved.push((account, original));
        }
        Ok(())
    }
}

fn not_posted(account: &AccountLocator, entry: &JournalEntry) -> PostbookError {
    PostbookError::NotPosted(format!("{}/{}", account, entry.id))
}

fn already_posted(account: &AccountLocator, entry: &JournalEntry) -> PostbookError {
    PostbookError::AlreadyPosted(format!("{}/{}", account, entry.id))
}

fn no_split(account: &AccountLocator, entry_id: &EntryId, index: Option<usize>) -> PostbookError {
    PostbookError::Validation(format!(
        "{}/{} has no split {}",
        account,
        entry_id,
        index.unwrap_or_default()
    ))
}

fn balanced(txn: &GlTransaction) -> PostbookResult<()> {
    txn.validate()
        .map_err(|e| PostbookError::Validation(format!("{}: {}", txn.id, e)))
}

impl<'a> PostingService<'a> {
    pub fn new(storage: &'a Storage, owner: &'a str) -> Self {
        Self { storage, owner }
    }

    /// Post an entry (or one split) against a counterpart account
    ///
    /// The first split posted creates the entry's transaction; later splits
    /// add their own pair of postings to it. Without an index a split entry
    /// is posted whole.
    pub fn post(
        &self,
        account: &AccountLocator,
        entry_id: &EntryId,
        counterpart: &str,
        posting_index: Option<usize>,
    ) -> PostbookResult<GlTransactionId> {
        let counterpart = counterpart.trim();
        if counterpart.is_empty() {
            return Err(PostbookError::Validation("Counterpart account is blank".into()));
        }

        let _locks = self.hold(&[account.login.as_str()], "post")?;
        let own_gl = self.storage.accounts.resolve_gl_account(account)?;
        let commodity = self.storage.settings().default_commodity.clone();

        let _write = self.storage.write_lock()?;
        let mut journals = JournalSet::new(self.storage);
        let entry = journals.entry(account, entry_id)?;

        let pair = |split: Option<usize>, amount: Money| {
            [
                GlPosting::sourced(
                    own_gl.as_str(),
                    amount,
                    commodity.as_str(),
                    PostingSource::new(account.clone(), entry_id.clone(), split),
                ),
                GlPosting::balancing(counterpart, -amount, commodity.as_str()).for_split(split),
            ]
        };
        let new_txn = |entry: &JournalEntry| {
            let mut txn = GlTransaction::new(entry.date, entry.description.clone(), entry.status);
            txn.tags = entry.tags.clone();
            txn.note = entry.comment.clone();
            txn
        };

        let amount = entry
            .posting_amount(posting_index)
            .ok_or_else(|| no_split(account, entry_id, posting_index))?;
        let write = match posting_index.filter(|_| entry.is_split()) {
            None => {
                if entry.is_posted() {
                    return Err(already_posted(account, entry));
                }
                let mut txn = new_txn(&*entry);
                if entry.is_split() {
                    for (index, split) in entry.splits.iter_mut().enumerate() {
                        txn.postings.extend(pair(Some(index), split.amount));
                        split.posted = true;
                    }
                } else {
                    txn.postings.extend(pair(None, amount));
                }
                entry.posted = Some(txn.id);
                LedgerWrite::Append(txn)
            }
            Some(index) => {
                if entry.splits[index].posted {
                    return Err(already_posted(account, entry));
                }
                let write = match entry.posted {
                    Some(txn_id) => {
                        let mut txn = self
                            .storage
                            .ledger()
                            .get(txn_id)?
                            .ok_or_else(|| PostbookError::transaction_not_found(txn_id.to_string()))?;
                        txn.postings.extend(pair(Some(index), amount));
                        txn.touch();
                        LedgerWrite::Update(txn)
                    }
                    None => {
                        let mut txn = new_txn(&*entry);
                        txn.postings.extend(pair(Some(index), amount));
                        entry.posted = Some(txn.id);
                        LedgerWrite::Append(txn)
                    }
                };
                entry.splits[index].posted = true;
                write
            }
        };

        let txn_id = match &write {
            LedgerWrite::Append(txn) | LedgerWrite::Update(txn) => {
                balanced(txn)?;
                txn.id
            }
            LedgerWrite::Remove(id) => *id,
        };
        self.commit(vec![write], &journals)?;

        info!(
            login = %account.login,
            label = %account.label,
            entry = %entry_id,
            txn = %txn_id,
            counterpart,
            "posted"
        );
        Ok(txn_id)
    }

    /// Post two entries from different accounts as one transfer transaction
    pub fn post_transfer(
        &self,
        first: &AccountLocator,
        first_id: &EntryId,
        second: &AccountLocator,
        second_id: &EntryId,
    ) -> PostbookResult<GlTransactionId> {
        if first == second {
            return Err(PostbookError::Validation(format!(
                "Transfer sides must be in different accounts, both are {}",
                first
            )));
        }

        let _locks = self.hold(&[first.login.as_str(), second.login.as_str()], "transfer")?;
        let first_gl = self.storage.accounts.resolve_gl_account(first)?;
        let second_gl = self.storage.accounts.resolve_gl_account(second)?;
        let commodity = self.storage.settings().default_commodity.clone();

        let _write = self.storage.write_lock()?;
        let mut journals = JournalSet::new(self.storage);
        let a = journals.entry(first, first_id)?.clone();
        let b = journals.entry(second, second_id)?.clone();

        for (account, entry) in [(first, &a), (second, &b)] {
            if entry.is_posted() {
                return Err(already_posted(account, entry));
            }
            if entry.is_split() {
                return Err(PostbookError::Validation(format!(
                    "{}/{} is split and cannot be a transfer side",
                    account, entry.id
                )));
            }
        }
        let net = a.amount + b.amount;
        if !net.is_zero() {
            return Err(PostbookError::Mismatch {
                left: format!("{}/{} ({})", first, a.id, a.amount),
                right: format!("{}/{} ({})", second, b.id, b.amount),
                net: net.to_string(),
            });
        }

        let status = EntryStatus::combined([a.status, b.status]);
        let mut txn = GlTransaction::new(a.date.min(b.date), a.description.clone(), status);
        for tag in a.tags.iter().chain(&b.tags) {
            if !txn.tags.contains(tag) {
                txn.tags.push(tag.clone());
            }
        }
        txn.postings.push(GlPosting::sourced(
            first_gl,
            a.amount,
            commodity.as_str(),
            PostingSource::new(first.clone(), a.id.clone(), None),
        ));
        txn.postings.push(GlPosting::sourced(
            second_gl,
            b.amount,
            commodity.as_str(),
            PostingSource::new(second.clone(), b.id.clone(), None),
        ));
        balanced(&txn)?;

        for (account, id) in [(first, first_id), (second, second_id)] {
            let entry = journals.entry(account, id)?;
            entry.posted = Some(txn.id);
            entry.is_transfer = true;
        }
        let txn_id = txn.id;
        self.commit(vec![LedgerWrite::Append(txn)], &journals)?;

        info!(first = %first, second = %second, txn = %txn_id, "posted transfer");
        Ok(txn_id)
    }

    /// Reverse a posting
    ///
    /// With an index only that split's pair of postings is removed. Otherwise
    /// the whole transaction goes, and every entry it linked is cleared.
    pub fn unpost(
        &self,
        account: &AccountLocator,
        entry_id: &EntryId,
        posting_index: Option<usize>,
    ) -> PostbookResult<()> {
        let mut locks = self.hold(&[account.login.as_str()], "unpost")?;

        let _write = self.storage.write_lock()?;
        let mut journals = JournalSet::new(self.storage);
        let entry = journals.entry(account, entry_id)?;
        let txn_id = entry.posted.ok_or_else(|| not_posted(account, entry))?;

        let amount = entry
            .posting_amount(posting_index)
            .ok_or_else(|| no_split(account, entry_id, posting_index))?;

        let Some(mut txn) = self.storage.ledger().get(txn_id)? else {
            warn!(account = %account, entry = %entry_id, txn = %txn_id, "linked transaction is gone, clearing link");
            entry.clear_posting();
            return self.commit(Vec::new(), &journals);
        };

        let split_index = posting_index.filter(|_| entry.is_split());
        let write = match split_index {
            Some(index) => {
                if !entry.splits[index].posted {
                    return Err(not_posted(account, entry));
                }
                entry.splits[index].posted = false;

                let is_own = |p: &GlPosting| {
                    p.source
                        .as_ref()
                        .is_some_and(|s| s.is_entry(account, entry_id) && s.split == Some(index))
                };
                let recorded = txn.postings.iter().find(|p| is_own(*p)).map_or(amount, |p| p.amount);
                if let Some(pos) = txn.split_counterpart(index, recorded) {
                    txn.postings.remove(pos);
                }
                txn.postings.retain(|p| !is_own(p));

                let still_sourced = txn
                    .postings
                    .iter()
                    .any(|p| p.source.as_ref().is_some_and(|s| s.is_entry(account, entry_id)));
                if still_sourced {
                    txn.touch();
                    balanced(&txn)?;
                    LedgerWrite::Update(txn)
                } else {
                    entry.clear_posting();
                    LedgerWrite::Remove(txn_id)
                }
            }
            None => {
                for (linked, linked_id) in txn.linked_entries() {
                    if linked.login != account.login {
                        locks.push(self.storage.locks.hold(
                            LockKey::login(linked.login.clone()),
                            self.owner,
                            "unpost",
                        )?);
                    }
                    match journals.entry(&linked, &linked_id) {
                        Ok(linked_entry) if linked_entry.posted == Some(txn_id) => {
                            linked_entry.clear_posting()
                        }
                        Ok(_) => {}
                        Err(e) if e.is_not_found() => {
                            warn!(account = %linked, entry = %linked_id, txn = %txn_id, "linked entry is gone")
                        }
                        Err(e) => return Err(e),
                    }
                }
                LedgerWrite::Remove(txn_id)
            }
        };

        self.commit(vec![write], &journals)?;
        info!(
            login = %account.login,
            label = %account.label,
            entry = %entry_id,
            txn = %txn_id,
            split = ?split_index,
            "unposted"
        );
        Ok(())
    }

    /// Bring a posted transaction back in line with its entry
    ///
    /// Own postings take the staged amounts and each change is absorbed by
    /// the counterpart of the same split. Status follows every linked entry;
    /// the date follows the entry unless the transaction is shared.
    pub fn sync(&self, account: &AccountLocator, entry_id: &EntryId) -> PostbookResult<GlTransactionId> {
        let _locks = self.hold(&[account.login.as_str()], "sync")?;

        let _write = self.storage.write_lock()?;
        let journal = self.storage.journals.load(account)?;
        let entry = journal
            .get(entry_id)
            .ok_or_else(|| PostbookError::entry_not_found(format!("{}/{}", account, entry_id)))?;
        let txn_id = entry.posted.ok_or_else(|| not_posted(account, entry))?;
        let before = self
            .storage
            .ledger()
            .get(txn_id)?
            .ok_or_else(|| PostbookError::transaction_not_found(txn_id.to_string()))?;

        let mut txn = before.clone();
        // (split, recorded amount, change)
        let mut changes: Vec<(Option<usize>, Money, Money)> = Vec::new();
        for posting in &mut txn.postings {
            let Some(split) = posting
                .source
                .as_ref()
                .filter(|s| s.is_entry(account, entry_id))
                .map(|s| s.split)
            else {
                continue;
            };
            let staged = match split {
                None => Some(entry.amount),
                Some(i) => entry.splits.get(i).map(|s| s.amount),
            };
            if let Some(staged) = staged.filter(|staged| *staged != posting.amount) {
                changes.push((split, posting.amount, staged - posting.amount));
                posting.amount = staged;
            }
        }

        for (split, recorded, delta) in changes {
            let counterpart = match split {
                Some(index) => txn.split_counterpart(index, recorded),
                None => txn.postings.iter().position(|p| p.is_balancing()),
            };
            match counterpart {
                Some(pos) => txn.postings[pos].amount -= delta,
                None => {
                    return Err(PostbookError::Mismatch {
                        left: format!("{}/{} ({})", account, entry_id, entry.amount),
                        right: format!("transfer {}", txn_id),
                        net: delta.to_string(),
                    })
                }
            }
        }
        if txn.linked_entries().len() == 1 {
            txn.date = entry.date;
        }
        txn.status = expected_status(self.storage, &txn, account, entry)?;

        if txn == before {
            debug!(account = %account, entry = %entry_id, txn = %txn_id, "already in sync");
            return Ok(txn_id);
        }
        txn.touch();
        balanced(&txn)?;
        self.commit(vec![LedgerWrite::Update(txn)], &JournalSet::new(self.storage))?;

        info!(login = %account.login, label = %account.label, entry = %entry_id, txn = %txn_id, "synced");
        Ok(txn_id)
    }

    /// Point every balancing posting of a transaction at a new account
    pub fn recategorize(&self, txn_id: GlTransactionId, new_account: &str) -> PostbookResult<()> {
        let new_account = new_account.trim();
        if new_account.is_empty() {
            return Err(PostbookError::Validation("New account is blank".into()));
        }

        let _locks = self.hold(&[], "recategorize")?;
        let _write = self.storage.write_lock()?;
        let mut txn = self
            .storage
            .ledger()
            .get(txn_id)?
            .ok_or_else(|| PostbookError::transaction_not_found(txn_id.to_string()))?;

        let mut changed = 0;
        for posting in txn.postings.iter_mut().filter(|p| p.is_balancing()) {
            posting.account = new_account.to_string();
            changed += 1;
        }
        if changed == 0 {
            return Err(PostbookError::Validation(format!(
                "{} has no balancing posting to recategorize",
                txn_id
            )));
        }
        txn.touch();
        balanced(&txn)?;
        self.commit(vec![LedgerWrite::Update(txn)], &JournalSet::new(self.storage))?;

        info!(txn = %txn_id, account = new_account, "recategorized");
        Ok(())
    }

    /// Fold the second transaction into the first as a transfer
    ///
    /// Only sourced postings survive. The second transaction is deleted and
    /// its entries now reference the first.
    pub fn merge_transfer(
        &self,
        keep: GlTransactionId,
        absorb: GlTransactionId,
    ) -> PostbookResult<GlTransactionId> {
        if keep == absorb {
            return Err(PostbookError::Validation(format!(
                "Cannot merge {} with itself",
                keep
            )));
        }

        let mut locks = self.hold(&[], "merge")?;
        let _write = self.storage.write_lock()?;
        let get = |id: GlTransactionId| -> PostbookResult<GlTransaction> {
            self.storage
                .ledger()
                .get(id)?
                .ok_or_else(|| PostbookError::transaction_not_found(id.to_string()))
        };
        let first = get(keep)?;
        let second = get(absorb)?;

        let mut merged = first.clone();
        merged.postings = first
            .postings
            .iter()
            .chain(&second.postings)
            .filter(|p| !p.is_balancing())
            .cloned()
            .collect();
        merged.touch();
        balanced(&merged)?;

        let linked = merged.linked_entries();
        let mut logins: Vec<&str> = linked.iter().map(|(a, _)| a.login.as_str()).collect();
        logins.sort_unstable();
        logins.dedup();
        for login in logins {
            locks.push(self.storage.locks.hold(LockKey::login(login), self.owner, "merge")?);
        }

        let mut journals = JournalSet::new(self.storage);
        let mut statuses = Vec::with_capacity(linked.len());
        for (account, id) in &linked {
            let entry = journals.entry(account, id)?;
            entry.posted = Some(keep);
            entry.is_transfer = true;
            statuses.push(entry.status);
        }
        merged.status = EntryStatus::combined(statuses);

        self.commit(
            vec![LedgerWrite::Update(merged), LedgerWrite::Remove(absorb)],
            &journals,
        )?;
        info!(keep = %keep, absorbed = %absorb, "merged transfer");
        Ok(keep)
    }

    /// Hold the given logins' locks and the GL lock, logins first
    fn hold(&self, logins: &[&str], purpose: &str) -> PostbookResult<Vec<LockGuard<'a>>> {
        let mut names = logins.to_vec();
        names.sort_unstable();
        names.dedup();

        let mut guards = Vec::with_capacity(names.len() + 1);
        for name in names {
            guards.push(self.storage.locks.hold(LockKey::login(name), self.owner, purpose)?);
        }
        guards.push(self.storage.locks.hold(LockKey::Gl, self.owner, purpose)?);
        Ok(guards)
    }

    /// Write the ledger, then the journals, then the audit trail
    fn commit(&self, writes: Vec<LedgerWrite>, journals: &JournalSet<'_>) -> PostbookResult<()> {
        let undo = self.write_ledger(&writes)?;
        if let Err(e) = journals.save() {
            warn!(error = %e, "journal write failed, undoing ledger changes");
            self.rollback(undo);
            return Err(e);
        }

        for (write, undo) in writes.iter().zip(&undo) {
            match (write, undo) {
                (LedgerWrite::Append(txn), _) => self.storage.log_create(
                    EntityType::GlTransaction,
                    txn.id.to_string(),
                    Some(txn.description.clone()),
                    txn,
                ),
                (LedgerWrite::Update(after), LedgerUndo::Restore(before)) => {
                    self.storage.log_update(
                        EntityType::GlTransaction,
                        after.id.to_string(),
                        Some(after.description.clone()),
                        before,
                        after,
                    )
                }
                (LedgerWrite::Remove(_), LedgerUndo::Reappend(removed)) => {
                    self.storage.log_delete(
                        EntityType::GlTransaction,
                        removed.id.to_string(),
                        Some(removed.description.clone()),
                        removed,
                    )
                }
                _ => {}
            }
        }
        for (account, before, after) in journals.changed_entries() {
            self.storage.log_update(
                EntityType::Entry,
                after.id.to_string(),
                Some(account.to_string()),
                before,
                after,
            );
        }
        Ok(())
    }

    fn write_ledger(&self, writes: &[LedgerWrite]) -> PostbookResult<Vec<LedgerUndo>> {
        let ledger = self.storage.ledger();
        let mut undo = Vec::with_capacity(writes.len());
        for write in writes {
            let applied = match write {
                LedgerWrite::Append(txn) => ledger.append(txn).map(|()| LedgerUndo::Remove(txn.id)),
                LedgerWrite::Update(txn) => ledger.get(txn.id).and_then(|before| {
                    let before =
                        before.ok_or_else(|| PostbookError::transaction_not_found(txn.id.to_string()))?;
                    ledger.update(txn)?;
                    Ok(LedgerUndo::Restore(before))
                }),
                LedgerWrite::Remove(id) => ledger.remove(*id).map(LedgerUndo::Reappend),
            };
            match applied {
                Ok(step) => undo.push(step),
                Err(e) => {
                    self.rollback(undo);
                    return Err(e);
                }
            }
        }
        Ok(undo)
    }

    fn rollback(&self, undo: Vec<LedgerUndo>) {
        let ledger = self.storage.ledger();
        for step in undo.into_iter().rev() {
            let result = match &step {
                LedgerUndo::Remove(id) => ledger.remove(*id).map(|_| ()),
                LedgerUndo::Restore(txn) => ledger.update(txn),
                LedgerUndo::Reappend(txn) => ledger.append(txn),
            };
            if let Err(e) = result {
                warn!(error = %e, "failed to undo ledger change");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::Operation;
    use crate::config::{PostbookPaths, Settings};
    use crate::models::{EvidenceRef, SplitPosting};
    use crate::storage::LedgerQuery;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    const OWNER: &str = "tester";

    fn checking() -> AccountLocator {
        AccountLocator::new("chase", "checking")
    }

    fn savings() -> AccountLocator {
        AccountLocator::new("ally", "savings")
    }

    fn setup() -> (TempDir, Storage) {
        let temp_dir = TempDir::new().unwrap();
        let paths = PostbookPaths::with_base_dir(temp_dir.path().to_path_buf());
        let storage = Storage::new(paths, Settings::default()).unwrap();
        for (account, gl) in [(checking(), "Assets:Chase"), (savings(), "Assets:Ally")] {
            storage.accounts.add_login(&account.login, None).unwrap();
            storage.accounts.add_label(&account).unwrap();
            storage.accounts.map_account(&account, gl).unwrap();
        }
        (temp_dir, storage)
    }

    fn stage(storage: &Storage, account: &AccountLocator, row: usize, cents: i64) -> EntryId {
        let mut journal = storage.journals.load(account).unwrap();
        let evidence = vec![EvidenceRef::row("doc.csv", row)];
        let mut entry = JournalEntry::new(
            EntryId::derive(account, &evidence),
            NaiveDate::from_ymd_opt(2025, 4, row as u32).unwrap(),
            Money::from_cents(cents),
            format!("ROW {}", row),
            evidence,
        );
        entry.status = EntryStatus::Cleared;
        let id = entry.id.clone();
        journal.entries.push(entry);
        storage.journals.save(account, &journal).unwrap();
        id
    }

    fn entry(storage: &Storage, account: &AccountLocator, id: &EntryId) -> JournalEntry {
        storage.journals.load(account).unwrap().get(id).unwrap().clone()
    }

    fn ledger_len(storage: &Storage) -> usize {
        storage.ledger().query(&LedgerQuery::new()).unwrap().len()
    }

    #[test]
    fn test_post_builds_balanced_transaction() {
        let (_temp, storage) = setup();
        let id = stage(&storage, &checking(), 1, -42_00);
        let service = PostingService::new(&storage, OWNER);

        let txn_id = service.post(&checking(), &id, "Expenses:Food", None).unwrap();
        let txn = storage.ledger().get(txn_id).unwrap().unwrap();

        assert!(txn.is_balanced());
        assert_eq!(txn.postings[0].account, "Assets:Chase");
        assert_eq!(txn.postings[0].amount, Money::from_cents(-42_00));
        assert_eq!(txn.postings[1].account, "Expenses:Food");
        assert_eq!(txn.postings[1].amount, Money::from_cents(42_00));
        assert_eq!(entry(&storage, &checking(), &id).posted, Some(txn_id));

        // Locks are released afterwards
        assert!(!storage.locks.status(&LockKey::Gl).unwrap().is_locked());
    }

    #[test]
    fn test_post_twice_is_already_posted() {
        let (_temp, storage) = setup();
        let id = stage(&storage, &checking(), 1, -5_00);
        let service = PostingService::new(&storage, OWNER);
        service.post(&checking(), &id, "Expenses:Food", None).unwrap();

        let err = service.post(&checking(), &id, "Expenses:Food", None).unwrap_err();
        assert!(matches!(err, PostbookError::AlreadyPosted(_)));
        assert_eq!(ledger_len(&storage), 1);
    }

    #[test]
    fn test_post_rejections() {
        let (_temp, storage) = setup();
        let id = stage(&storage, &checking(), 1, -5_00);
        let service = PostingService::new(&storage, OWNER);

        assert!(service.post(&checking(), &id, "  ", None).unwrap_err().is_validation());
        assert!(service.post(&checking(), &id, "X", Some(1)).unwrap_err().is_validation());

        let missing = EntryId::derive(&checking(), &[EvidenceRef::row("nope.csv", 1)]);
        assert!(service.post(&checking(), &missing, "X", None).unwrap_err().is_not_found());

        storage.accounts.unmap_account(&checking()).unwrap();
        assert!(service.post(&checking(), &id, "X", None).unwrap_err().is_validation());
        assert_eq!(ledger_len(&storage), 0);
    }

    #[test]
    fn test_post_with_conflicted_mapping() {
        let (_temp, storage) = setup();
        storage.accounts.map_account(&savings(), "Assets:Chase").unwrap();
        let id = stage(&storage, &checking(), 1, -5_00);

        let err = PostingService::new(&storage, OWNER)
            .post(&checking(), &id, "Expenses:Food", None)
            .unwrap_err();
        assert!(matches!(err, PostbookError::Conflict { .. }));
    }

    #[test]
    fn test_post_refused_while_login_locked() {
        let (_temp, storage) = setup();
        let id = stage(&storage, &checking(), 1, -5_00);
        storage.locks.acquire(&LockKey::login("chase"), "scraper", "scrape").unwrap();

        let err = PostingService::new(&storage, OWNER)
            .post(&checking(), &id, "Expenses:Food", None)
            .unwrap_err();
        match err {
            PostbookError::Locked { owner, purpose, .. } => {
                assert_eq!(owner.as_deref(), Some("scraper"));
                assert_eq!(purpose.as_deref(), Some("scrape"));
            }
            other => panic!("expected Locked, got {other:?}"),
        }
        assert!(!entry(&storage, &checking(), &id).is_posted());
    }

    #[test]
    fn test_post_then_unpost_round_trip() {
        let (_temp, storage) = setup();
        let id = stage(&storage, &checking(), 1, -42_00);
        let before = entry(&storage, &checking(), &id);
        let service = PostingService::new(&storage, OWNER);

        service.post(&checking(), &id, "Expenses:Food", None).unwrap();
        service.unpost(&checking(), &id, None).unwrap();

        assert_eq!(entry(&storage, &checking(), &id), before);
        assert_eq!(ledger_len(&storage), 0);

        let err = service.unpost(&checking(), &id, None).unwrap_err();
        assert!(matches!(err, PostbookError::NotPosted(_)));
    }

    #[test]
    fn test_transfer_symmetry() {
        let (_temp, storage) = setup();
        let out = stage(&storage, &checking(), 1, -100_00);
        let inc = stage(&storage, &savings(), 2, 100_00);
        let service = PostingService::new(&storage, OWNER);

        let txn_id = service.post_transfer(&checking(), &out, &savings(), &inc).unwrap();
        let txn = storage.ledger().get(txn_id).unwrap().unwrap();
        assert!(txn.is_transfer());
        assert!(entry(&storage, &checking(), &out).is_transfer);
        assert_eq!(entry(&storage, &savings(), &inc).posted, Some(txn_id));

        // Unposting either side clears both
        service.unpost(&savings(), &inc, None).unwrap();
        assert!(!entry(&storage, &checking(), &out).is_posted());
        assert!(!entry(&storage, &savings(), &inc).is_posted());
        assert!(!entry(&storage, &checking(), &out).is_transfer);
        assert_eq!(ledger_len(&storage), 0);
    }

    #[test]
    fn test_transfer_mismatch() {
        let (_temp, storage) = setup();
        let out = stage(&storage, &checking(), 1, -100_00);
        let inc = stage(&storage, &savings(), 2, 99_00);

        let err = PostingService::new(&storage, OWNER)
            .post_transfer(&checking(), &out, &savings(), &inc)
            .unwrap_err();
        assert!(matches!(err, PostbookError::Mismatch { .. }));
        assert!(err.to_string().contains("-1.00"));
        assert_eq!(ledger_len(&storage), 0);
    }

    #[test]
    fn test_split_posting_lifecycle() {
        let (_temp, storage) = setup();
        let id = stage(&storage, &checking(), 1, -30_00);
        let mut journal = storage.journals.load(&checking()).unwrap();
        journal.get_mut(&id).unwrap().splits = vec![
            SplitPosting::new(Money::from_cents(-20_00), "groceries"),
            SplitPosting::new(Money::from_cents(-10_00), "household"),
        ];
        storage.journals.save(&checking(), &journal).unwrap();
        let service = PostingService::new(&storage, OWNER);

        let txn_id = service.post(&checking(), &id, "Expenses:Groceries", Some(0)).unwrap();
        let again = service.post(&checking(), &id, "Expenses:Household", Some(1)).unwrap();
        assert_eq!(txn_id, again);
        let txn = storage.ledger().get(txn_id).unwrap().unwrap();
        assert_eq!(txn.postings.len(), 4);
        assert!(txn.is_balanced());

        let err = service.post(&checking(), &id, "X", Some(1)).unwrap_err();
        assert!(matches!(err, PostbookError::AlreadyPosted(_)));

        service.unpost(&checking(), &id, Some(0)).unwrap();
        let txn = storage.ledger().get(txn_id).unwrap().unwrap();
        assert_eq!(txn.postings.len(), 2);
        assert_eq!(txn.postings[1].account, "Expenses:Household");
        let staged = entry(&storage, &checking(), &id);
        assert_eq!(staged.posted, Some(txn_id));
        assert!(!staged.splits[0].posted);

        service.unpost(&checking(), &id, Some(1)).unwrap();
        assert!(storage.ledger().get(txn_id).unwrap().is_none());
        assert!(!entry(&storage, &checking(), &id).is_posted());
    }

    fn split_evenly(storage: &Storage, id: &EntryId, memos: &[&str]) {
        let mut journal = storage.journals.load(&checking()).unwrap();
        let entry = journal.get_mut(id).unwrap();
        let share = entry.amount.cents() / memos.len() as i64;
        entry.splits = memos
            .iter()
            .map(|memo| SplitPosting::new(Money::from_cents(share), *memo))
            .collect();
        storage.journals.save(&checking(), &journal).unwrap();
    }

    fn balancing_accounts(storage: &Storage, txn_id: GlTransactionId) -> Vec<String> {
        let txn = storage.ledger().get(txn_id).unwrap().unwrap();
        txn.postings
            .iter()
            .filter(|p| p.is_balancing())
            .map(|p| p.account.clone())
            .collect()
    }

    #[test]
    fn test_unpost_split_removes_its_own_counterpart() {
        let (_temp, storage) = setup();
        let id = stage(&storage, &checking(), 1, -20_00);
        split_evenly(&storage, &id, &["groceries", "household"]);
        let service = PostingService::new(&storage, OWNER);

        // Equal amounts, posted out of order
        let txn_id = service.post(&checking(), &id, "Expenses:Household", Some(1)).unwrap();
        service.post(&checking(), &id, "Expenses:Groceries", Some(0)).unwrap();

        service.unpost(&checking(), &id, Some(0)).unwrap();
        assert_eq!(balancing_accounts(&storage, txn_id), vec!["Expenses:Household"]);
        let txn = storage.ledger().get(txn_id).unwrap().unwrap();
        assert!(txn.is_balanced());
        let own: Vec<Option<usize>> = txn
            .postings
            .iter()
            .filter_map(|p| p.source.as_ref().map(|s| s.split))
            .collect();
        assert_eq!(own, vec![Some(1)]);
    }

    #[test]
    fn test_sync_of_split_adjusts_that_split_only() {
        let (_temp, storage) = setup();
        let id = stage(&storage, &checking(), 1, -20_00);
        split_evenly(&storage, &id, &["groceries", "household"]);
        let service = PostingService::new(&storage, OWNER);
        let txn_id = service.post(&checking(), &id, "Expenses:Household", Some(1)).unwrap();
        service.post(&checking(), &id, "Expenses:Groceries", Some(0)).unwrap();

        // Groceries settles higher
        let mut journal = storage.journals.load(&checking()).unwrap();
        let staged = journal.get_mut(&id).unwrap();
        staged.amount = Money::from_cents(-22_50);
        staged.splits[0].amount = Money::from_cents(-12_50);
        storage.journals.save(&checking(), &journal).unwrap();

        service.sync(&checking(), &id).unwrap();
        let txn = storage.ledger().get(txn_id).unwrap().unwrap();
        assert!(txn.is_balanced());
        let counterpart = |account: &str| {
            txn.postings
                .iter()
                .find(|p| p.is_balancing() && p.account == account)
                .map(|p| p.amount)
        };
        assert_eq!(counterpart("Expenses:Groceries"), Some(Money::from_cents(12_50)));
        assert_eq!(counterpart("Expenses:Household"), Some(Money::from_cents(10_00)));

        // The drifted split can still be unposted cleanly
        service.unpost(&checking(), &id, Some(0)).unwrap();
        assert_eq!(balancing_accounts(&storage, txn_id), vec!["Expenses:Household"]);
        assert!(storage.ledger().get(txn_id).unwrap().unwrap().is_balanced());
    }

    #[test]
    fn test_concurrent_posts_of_one_entry_post_once() {
        let (temp, storage) = setup();
        let id = stage(&storage, &checking(), 1, -42_00);
        let barrier = std::sync::Barrier::new(2);

        let results: Vec<PostbookResult<GlTransactionId>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let (barrier, id) = (&barrier, &id);
                    let base = temp.path().to_path_buf();
                    scope.spawn(move || {
                        let storage =
                            Storage::new(PostbookPaths::with_base_dir(base), Settings::default()).unwrap();
                        barrier.wait();
                        PostingService::new(&storage, OWNER).post(&checking(), id, "Expenses:Food", None)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let posted: Vec<GlTransactionId> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
        assert_eq!(posted.len(), 1, "{results:?}");
        assert!(results.iter().any(|r| matches!(
            r,
            Err(PostbookError::AlreadyPosted(_)) | Err(PostbookError::Locked { .. })
        )));
        assert_eq!(ledger_len(&storage), 1);
        assert_eq!(entry(&storage, &checking(), &id).posted, Some(posted[0]));
    }

    #[test]
    fn test_mixed_status_transfer_is_pending_and_not_drifted() {
        let (_temp, storage) = setup();
        let out = stage(&storage, &checking(), 1, -100_00);
        let inc = stage(&storage, &savings(), 2, 100_00);
        let mut journal = storage.journals.load(&savings()).unwrap();
        journal.get_mut(&inc).unwrap().status = EntryStatus::Pending;
        storage.journals.save(&savings(), &journal).unwrap();
        let service = PostingService::new(&storage, OWNER);

        let txn_id = service.post_transfer(&checking(), &out, &savings(), &inc).unwrap();
        assert_eq!(storage.ledger().get(txn_id).unwrap().unwrap().status, EntryStatus::Pending);
        let matching = crate::services::MatchingService::new(&storage);
        assert!(matching.drifted_entries(&checking()).unwrap().is_empty());
        assert!(matching.drifted_entries(&savings()).unwrap().is_empty());

        // Syncing either side leaves the shared status alone
        let before = storage.ledger().get(txn_id).unwrap().unwrap();
        service.sync(&checking(), &out).unwrap();
        service.sync(&savings(), &inc).unwrap();
        assert_eq!(storage.ledger().get(txn_id).unwrap().unwrap(), before);

        // Once the far side settles the transfer clears
        let mut journal = storage.journals.load(&savings()).unwrap();
        journal.get_mut(&inc).unwrap().status = EntryStatus::Cleared;
        storage.journals.save(&savings(), &journal).unwrap();
        assert_eq!(matching.drifted_entries(&savings()).unwrap(), vec![inc.clone()]);
        service.sync(&savings(), &inc).unwrap();
        assert_eq!(storage.ledger().get(txn_id).unwrap().unwrap().status, EntryStatus::Cleared);
        assert!(matching.drifted_entries(&checking()).unwrap().is_empty());
    }

    #[test]
    fn test_sync_absorbs_delta_and_keeps_identity() {
        let (_temp, storage) = setup();
        let id = stage(&storage, &checking(), 1, -18_00);
        let service = PostingService::new(&storage, OWNER);
        let txn_id = service.post(&checking(), &id, "Expenses:Dining", None).unwrap();

        // The bank settles with a tip added
        let mut journal = storage.journals.load(&checking()).unwrap();
        let staged = journal.get_mut(&id).unwrap();
        staged.amount = Money::from_cents(-21_60);
        staged.status = EntryStatus::Pending;
        storage.journals.save(&checking(), &journal).unwrap();

        assert_eq!(service.sync(&checking(), &id).unwrap(), txn_id);
        let txn = storage.ledger().get(txn_id).unwrap().unwrap();
        assert_eq!(txn.postings[0].amount, Money::from_cents(-21_60));
        assert_eq!(txn.postings[1].amount, Money::from_cents(21_60));
        assert_eq!(txn.status, EntryStatus::Pending);

        let err = service.sync(&checking(), &stage(&storage, &checking(), 2, -1_00)).unwrap_err();
        assert!(matches!(err, PostbookError::NotPosted(_)));
    }

    #[test]
    fn test_sync_of_drifted_transfer_is_mismatch() {
        let (_temp, storage) = setup();
        let out = stage(&storage, &checking(), 1, -100_00);
        let inc = stage(&storage, &savings(), 2, 100_00);
        let service = PostingService::new(&storage, OWNER);
        service.post_transfer(&checking(), &out, &savings(), &inc).unwrap();

        let mut journal = storage.journals.load(&checking()).unwrap();
        journal.get_mut(&out).unwrap().amount = Money::from_cents(-90_00);
        storage.journals.save(&checking(), &journal).unwrap();

        let err = service.sync(&checking(), &out).unwrap_err();
        assert!(matches!(err, PostbookError::Mismatch { .. }));
    }

    #[test]
    fn test_recategorize() {
        let (_temp, storage) = setup();
        let id = stage(&storage, &checking(), 1, -9_99);
        let service = PostingService::new(&storage, OWNER);
        let txn_id = service.post(&checking(), &id, "Expenses:Unknown", None).unwrap();

        service.recategorize(txn_id, "Expenses:Books").unwrap();
        let txn = storage.ledger().get(txn_id).unwrap().unwrap();
        assert_eq!(txn.postings[1].account, "Expenses:Books");
        assert_eq!(txn.postings[0].account, "Assets:Chase");

        assert!(service.recategorize(txn_id, "").unwrap_err().is_validation());
        let missing = GlTransactionId::new();
        assert!(service.recategorize(missing, "X").unwrap_err().is_not_found());
    }

    #[test]
    fn test_merge_transfer() {
        let (_temp, storage) = setup();
        let out = stage(&storage, &checking(), 1, -250_00);
        let inc = stage(&storage, &savings(), 3, 250_00);
        let service = PostingService::new(&storage, OWNER);
        let first = service.post(&checking(), &out, "Expenses:Unknown", None).unwrap();
        let second = service.post(&savings(), &inc, "Income:Unknown", None).unwrap();

        assert_eq!(service.merge_transfer(first, second).unwrap(), first);

        let txn = storage.ledger().get(first).unwrap().unwrap();
        assert!(txn.is_transfer());
        assert_eq!(txn.postings.len(), 2);
        assert!(storage.ledger().get(second).unwrap().is_none());
        assert_eq!(entry(&storage, &savings(), &inc).posted, Some(first));
        assert!(entry(&storage, &checking(), &out).is_transfer);
    }

    #[test]
    fn test_merge_unbalanced_is_rejected() {
        let (_temp, storage) = setup();
        let a = stage(&storage, &checking(), 1, -250_00);
        let b = stage(&storage, &savings(), 3, 200_00);
        let service = PostingService::new(&storage, OWNER);
        let first = service.post(&checking(), &a, "Expenses:Unknown", None).unwrap();
        let second = service.post(&savings(), &b, "Income:Unknown", None).unwrap();

        assert!(service.merge_transfer(first, second).unwrap_err().is_validation());
        assert_eq!(ledger_len(&storage), 2);
        assert_eq!(entry(&storage, &savings(), &b).posted, Some(second));
    }

    #[test]
    fn test_failed_journal_write_undoes_ledger() {
        let (_temp, storage) = setup();
        let id = stage(&storage, &checking(), 1, -5_00);

        // A second entry that no longer validates makes the journal unsavable
        let mut journal = storage.journals.load(&checking()).unwrap();
        let mut broken = journal.entries[0].clone();
        broken.id = EntryId::derive(&checking(), &[EvidenceRef::row("doc.csv", 9)]);
        broken.evidence.clear();
        journal.entries.push(broken);
        crate::storage::write_json_atomic(storage.paths().journal_file(&checking()), &journal)
            .unwrap();

        let err = PostingService::new(&storage, OWNER)
            .post(&checking(), &id, "Expenses:Food", None)
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(ledger_len(&storage), 0);
        assert!(!entry(&storage, &checking(), &id).is_posted());
    }

    #[test]
    fn test_mutations_are_audited() {
        let (_temp, storage) = setup();
        let id = stage(&storage, &checking(), 1, -5_00);
        let service = PostingService::new(&storage, OWNER);
        service.post(&checking(), &id, "Expenses:Food", None).unwrap();
        service.unpost(&checking(), &id, None).unwrap();

        let ops: Vec<(EntityType, Operation)> = storage
            .audit()
            .read_all()
            .unwrap()
            .into_iter()
            .map(|e| (e.entity_type, e.operation))
            .collect();
        assert_eq!(
            ops,
            vec![
                (EntityType::GlTransaction, Operation::Create),
                (EntityType::Entry, Operation::Update),
                (EntityType::GlTransaction, Operation::Delete),
                (EntityType::Entry, Operation::Update),
            ]
        );
    }
}
