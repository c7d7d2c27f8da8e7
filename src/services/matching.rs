//! Matching service
//!
//! Read-only advice over the journals and the ledger: transfer counterparts,
//! category suggestions learned from earlier postings, and drift between a
//! posted entry and the GL transaction that recorded it. Nothing here takes a
//! lock or writes.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::error::{PostbookError, PostbookResult};
use crate::models::{AccountLocator, EntryId, EntryStatus, GlTransaction, JournalEntry, Money};
use crate::storage::{LedgerQuery, Storage};

/// Minimum share of votes a suggested account needs
const CONFIDENCE_THRESHOLD: f64 = 0.5;

/// An unposted entry in another account that could be the far side of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferCandidate {
    pub account: AccountLocator,
    pub entry: JournalEntry,
}

/// The single unambiguous counterpart of an unposted entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferMatch {
    pub account: AccountLocator,
    pub entry_id: EntryId,
    pub matched_amount: Money,
}

/// Advice for one entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    /// Counterpart account, for unposted entries
    pub suggested: Option<String>,
    /// The staged amount differs from what the GL transaction recorded
    pub amount_changed: bool,
    /// The staged status differs from the GL transaction's
    pub status_changed: bool,
    pub transfer_match: Option<TransferMatch>,
}

impl Suggestion {
    pub fn is_drifted(&self) -> bool {
        self.amount_changed || self.status_changed
    }
}

/// Votes for balancing accounts, keyed by normalized description
#[derive(Debug, Default)]
pub struct CategoryModel {
    votes: BTreeMap<String, BTreeMap<String, usize>>,
}

impl CategoryModel {
    /// Learn from every transaction that balances a staged entry
    pub fn learn(transactions: &[GlTransaction]) -> Self {
        let mut model = Self::default();
        for txn in transactions {
            if txn.postings.iter().all(|p| p.is_balancing()) {
                continue;
            }
            let key = normalize_description(&txn.description);
            if key.is_empty() {
                continue;
            }
            let counts = model.votes.entry(key).or_default();
            for posting in txn.postings.iter().filter(|p| p.is_balancing()) {
                *counts.entry(posting.account.clone()).or_default() += 1;
            }
        }
        model
    }

    /// The winning account, if it is unique and confident enough
    pub fn suggest(&self, description: &str) -> Option<String> {
        let counts = self.votes.get(&normalize_description(description))?;
        let total: usize = counts.values().sum();
        let top = counts.values().copied().max()?;
        let mut winners = counts.iter().filter(|(_, &n)| n == top);
        let (account, _) = winners.next()?;
        if winners.next().is_some() {
            return None;
        }
        if (top as f64) / (total as f64) < CONFIDENCE_THRESHOLD {
            return None;
        }
        Some(account.clone())
    }
}

/// Lowercase letters only, single-spaced
///
/// "SQ *Blue Bottle #0042" and "sq blue bottle 17" share the key
/// "sq blue bottle".
pub fn normalize_description(description: &str) -> String {
    description
        .chars()
        .map(|c| {
            if c.is_alphabetic() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Service for read-only matching
pub struct MatchingService<'a> {
    storage: &'a Storage,
}

impl<'a> MatchingService<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Unposted entries from every other account that could balance `entry_id`
    ///
    /// Ordered by date distance, then account.
    pub fn transfer_candidates(
        &self,
        account: &AccountLocator,
        entry_id: &EntryId,
    ) -> PostbookResult<Vec<TransferCandidate>> {
        let journal = self.storage.journals.load(account)?;
        let source = journal
            .get(entry_id)
            .ok_or_else(|| PostbookError::entry_not_found(format!("{}/{}", account, entry_id)))?;
        let pool = self.unposted_elsewhere(account)?;
        Ok(self.candidates_in(source, &pool))
    }

    /// Advice for every entry of an account
    pub fn suggest_categories(
        &self,
        account: &AccountLocator,
    ) -> PostbookResult<BTreeMap<EntryId, Suggestion>> {
        self.storage.accounts.label(account)?;
        let journal = self.storage.journals.load(account)?;
        let model = CategoryModel::learn(&self.storage.ledger().query(&LedgerQuery::new())?);
        let pool = self.unposted_elsewhere(account)?;

        let mut suggestions = BTreeMap::new();
        for entry in &journal.entries {
            let suggestion = if entry.is_posted() {
                self.drift(account, entry)?
            } else {
                let candidates = self.candidates_in(entry, &pool);
                let transfer_match = match candidates.as_slice() {
                    [only] => Some(TransferMatch {
                        account: only.account.clone(),
                        entry_id: only.entry.id.clone(),
                        matched_amount: only.entry.amount,
                    }),
                    _ => None,
                };
                Suggestion {
                    suggested: model.suggest(&entry.description),
                    transfer_match,
                    ..Suggestion::default()
                }
            };
            suggestions.insert(entry.id.clone(), suggestion);
        }
        Ok(suggestions)
    }

    /// Posted entries whose GL transaction no longer matches them
    pub fn drifted_entries(&self, account: &AccountLocator) -> PostbookResult<Vec<EntryId>> {
        let journal = self.storage.journals.load(account)?;
        let mut drifted = Vec::new();
        for entry in journal.entries.iter().filter(|e| e.is_posted()) {
            if self.drift(account, entry)?.is_drifted() {
                drifted.push(entry.id.clone());
            }
        }
        Ok(drifted)
    }

    fn drift(&self, account: &AccountLocator, entry: &JournalEntry) -> PostbookResult<Suggestion> {
        let Some(txn_id) = entry.posted else {
            return Ok(Suggestion::default());
        };
        let Some(txn) = self.storage.ledger().get(txn_id)? else {
            warn!(account = %account, entry = %entry.id, txn = %txn_id, "posted entry links a missing transaction");
            return Ok(Suggestion::default());
        };

        Ok(Suggestion {
            amount_changed: recorded_amount(&txn, account, entry) != expected_amount(entry),
            status_changed: txn.status != expected_status(self.storage, &txn, account, entry)?,
            ..Suggestion::default()
        })
    }

    fn unposted_elsewhere(
        &self,
        exclude: &AccountLocator,
    ) -> PostbookResult<Vec<(AccountLocator, JournalEntry)>> {
        let mut pool = Vec::new();
        for locator in self.storage.accounts.locators()? {
            if &locator == exclude {
                continue;
            }
            let journal = self.storage.journals.load(&locator)?;
            pool.extend(journal.unposted().cloned().map(|e| (locator.clone(), e)));
        }
        Ok(pool)
    }

    fn candidates_in(
        &self,
        source: &JournalEntry,
        pool: &[(AccountLocator, JournalEntry)],
    ) -> Vec<TransferCandidate> {
        let settings = self.storage.settings();
        let tolerance = settings.transfer_amount_tolerance.abs();

        let mut matches: Vec<(i64, TransferCandidate)> = pool
            .iter()
            .filter(|(_, e)| opposite_signs(source.amount, e.amount))
            .filter(|(_, e)| (source.amount + e.amount).abs() <= tolerance)
            .filter_map(|(account, e)| {
                let distance = (e.date - source.date).num_days().abs();
                (distance <= settings.transfer_window_days).then(|| {
                    (
                        distance,
                        TransferCandidate {
                            account: account.clone(),
                            entry: e.clone(),
                        },
                    )
                })
            })
            .collect();

        matches.sort_by(|(da, a), (db, b)| {
            da.cmp(db)
                .then_with(|| a.account.cmp(&b.account))
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        matches.into_iter().map(|(_, c)| c).collect()
    }
}

fn opposite_signs(a: Money, b: Money) -> bool {
    (a.is_negative() && b.is_positive()) || (a.is_positive() && b.is_negative())
}

/// What the entry's own postings should add up to right now
pub(crate) fn expected_amount(entry: &JournalEntry) -> Money {
    if entry.is_split() {
        entry.splits.iter().filter(|s| s.posted).map(|s| s.amount).sum()
    } else {
        entry.amount
    }
}

/// What the transaction's status should be right now
///
/// A transaction linking several entries is cleared only once every one of
/// them is; entries that can no longer be found do not count.
pub(crate) fn expected_status(
    storage: &Storage,
    txn: &GlTransaction,
    account: &AccountLocator,
    entry: &JournalEntry,
) -> PostbookResult<EntryStatus> {
    let mut statuses = vec![entry.status];
    for (linked, linked_id) in txn.linked_entries() {
        if &linked == account && linked_id == entry.id {
            continue;
        }
        if let Some(other) = storage.journals.load(&linked)?.get(&linked_id) {
            statuses.push(other.status);
        }
    }
    Ok(EntryStatus::combined(statuses))
}

/// What the transaction recorded for the entry's own postings
pub(crate) fn recorded_amount(
    txn: &GlTransaction,
    account: &AccountLocator,
    entry: &JournalEntry,
) -> Money {
    txn.postings
        .iter()
        .filter(|p| p.source.as_ref().is_some_and(|s| s.is_entry(account, &entry.id)))
        .map(|p| p.amount)
        .sum()
}
