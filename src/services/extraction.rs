//! Extraction service
//!
//! Turns scraped documents into staged journal entries. Every candidate row
//! gets an evidence reference; a candidate whose reference is already on a
//! stored entry is skipped, so extracting the same documents again is a
//! no-op while new rows append new entries. A cleared row that settles an
//! earlier pending entry updates that entry in place instead, which leaves a
//! posted one drifted until it is synced.

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::audit::EntityType;
use crate::error::{PostbookError, PostbookResult};
use crate::models::{
    AccountLocator, EntryId, EntryStatus, EvidenceRef, JournalEntry, LockKey, Money, Ruleset,
};
use crate::storage::Storage;

/// Fallback date formats tried after the ruleset's own
const DATE_FORMATS: [&str; 8] = [
    "%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y", "%d/%m/%Y", "%d/%m/%y", "%Y/%m/%d", "%m-%d-%Y",
    "%d-%m-%Y",
];

/// One entry-to-be, parsed from a document row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub evidence: EvidenceRef,
    pub date: NaiveDate,
    pub amount: Money,
    pub status: EntryStatus,
    pub description: String,
    pub comment: String,
}

impl Candidate {
    fn into_entry(self, account: &AccountLocator, tags: &[String]) -> JournalEntry {
        let evidence = vec![self.evidence];
        let mut entry = JournalEntry::new(
            EntryId::derive(account, &evidence),
            self.date,
            self.amount,
            self.description,
            evidence,
        );
        entry.status = self.status;
        entry.comment = self.comment;
        entry.tags = tags.to_vec();
        entry
    }
}

/// Service for extracting staged entries from documents
pub struct ExtractionService<'a> {
    storage: &'a Storage,
    owner: &'a str,
}

impl<'a> ExtractionService<'a> {
    pub fn new(storage: &'a Storage, owner: &'a str) -> Self {
        Self { storage, owner }
    }

    /// Extract the named documents into the account's journal
    ///
    /// An empty `documents` slice means every document the store lists for
    /// the account. All documents are parsed before anything is written, and
    /// a failure on any of them leaves the journal untouched. Returns the
    /// number of new entries.
    pub fn extract(&self, account: &AccountLocator, documents: &[String]) -> PostbookResult<usize> {
        let login = self
            .storage
            .accounts
            .get(&account.login)?
            .ok_or_else(|| PostbookError::account_not_found(&account.login))?;
        if login.label(&account.label).is_none() {
            return Err(PostbookError::account_not_found(account.to_string()));
        }
        let ruleset = self.storage.rulesets.for_login(&login)?;

        let names: Vec<String> = if documents.is_empty() {
            let listed = self.storage.documents().list(account)?;
            if listed.is_empty() {
                return Err(PostbookError::NoDocuments(account.to_string()));
            }
            listed.into_iter().map(|d| d.name).collect()
        } else {
            documents.to_vec()
        };

        let _login_lock = self
            .storage
            .locks
            .hold(LockKey::login(&account.login), self.owner, "extract")?;

        let delimiter = ruleset.delimiter as u8;
        let mut candidates = Vec::new();
        for name in &names {
            let rows = self.storage.documents().read_rows(account, name, delimiter)?;
            candidates.extend(parse_rows(&ruleset, name, &rows)?);
        }

        let _write = self.storage.write_lock()?;
        let mut journal = self.storage.journals.load(account)?;
        let mut known = journal.evidence_index();
        let window = self.storage.settings().settle_window_days;
        let first_new = journal.entries.len();
        let mut settled = Vec::new();

        for candidate in candidates {
            if !known.insert(candidate.evidence.clone()) {
                debug!(account = %account, evidence = %candidate.evidence, "evidence already staged");
                continue;
            }
            if let Some(index) = settles(&journal.entries, &candidate, window) {
                let entry = &mut journal.entries[index];
                let before = entry.clone();
                entry.date = candidate.date;
                entry.amount = candidate.amount;
                entry.status = EntryStatus::Cleared;
                entry.evidence.push(candidate.evidence);
                if index < first_new {
                    settled.push((before, entry.clone()));
                }
                continue;
            }
            journal.entries.push(candidate.into_entry(account, &ruleset.tags));
        }

        let mut newly_processed = false;
        for name in &names {
            newly_processed |= journal.mark_processed(name);
        }

        let new_entries = &journal.entries[first_new..];
        if new_entries.is_empty() && settled.is_empty() && !newly_processed {
            debug!(account = %account, "nothing new to extract");
            return Ok(0);
        }

        self.storage.journals.save(account, &journal)?;

        for entry in new_entries {
            self.storage.log_create(
                EntityType::Entry,
                entry.id.to_string(),
                Some(account.to_string()),
                entry,
            );
        }
        for (before, after) in &settled {
            info!(account = %account, entry = %after.id, posted = after.is_posted(), "pending entry settled");
            self.storage.log_update(
                EntityType::Entry,
                after.id.to_string(),
                Some(account.to_string()),
                before,
                after,
            );
        }
        info!(
            login = %account.login,
            label = %account.label,
            documents = names.len(),
            new_entries = new_entries.len(),
            settled = settled.len(),
            "extracted"
        );

        Ok(new_entries.len())
    }

    /// Listed documents extraction has not consumed yet
    pub fn pending_documents(&self, account: &AccountLocator) -> PostbookResult<Vec<String>> {
        let journal = self.storage.journals.load(account)?;
        Ok(self
            .storage
            .documents()
            .list(account)?
            .into_iter()
            .map(|d| d.name)
            .filter(|name| !journal.is_processed(name))
            .collect())
    }
}

/// The pending entry a cleared candidate settles, if any
///
/// Same description and direction, dated on or up to `window` days before the
/// candidate; the closest one wins. Split entries are never settled.
fn settles(entries: &[JournalEntry], candidate: &Candidate, window: i64) -> Option<usize> {
    if candidate.status != EntryStatus::Cleared {
        return None;
    }
    let description = candidate.description.trim();
    entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.status == EntryStatus::Pending && !e.is_split())
        .filter(|(_, e)| e.description.trim().eq_ignore_ascii_case(description))
        .filter(|(_, e)| e.amount.is_negative() == candidate.amount.is_negative())
        .filter_map(|(index, e)| {
            let age = (candidate.date - e.date).num_days();
            (0..=window).contains(&age).then_some((age, index))
        })
        .min()
        .map(|(_, index)| index)
}

/// Parse a document's rows into candidates in row order
///
/// Invalid rows fail the whole document unless the ruleset skips them.
/// Rows with no non-blank cell are ignored.
pub fn parse_rows(
    ruleset: &Ruleset,
    document: &str,
    rows: &[Vec<String>],
) -> PostbookResult<Vec<Candidate>> {
    let first = usize::from(ruleset.has_header);
    let mut candidates = Vec::new();

    for (index, row) in rows.iter().enumerate().skip(first) {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        match parse_row(ruleset, document, index, row) {
            Ok(parsed) => candidates.extend(parsed),
            Err(reason) if ruleset.skip_invalid_rows => {
                warn!(document, row = index, reason = %reason, "skipping invalid row");
            }
            Err(reason) => {
                return Err(PostbookError::Validation(format!(
                    "{}:{}: {}",
                    document, index, reason
                )))
            }
        }
    }

    Ok(candidates)
}

fn cell<'r>(row: &'r [String], column: Option<usize>) -> &'r str {
    column
        .and_then(|c| row.get(c))
        .map(|s| s.trim())
        .unwrap_or("")
}

fn parse_row(
    ruleset: &Ruleset,
    document: &str,
    index: usize,
    row: &[String],
) -> Result<Vec<Candidate>, String> {
    let date_str = cell(row, Some(ruleset.date_column));
    if date_str.is_empty() {
        return Err("Missing date".into());
    }
    let date = parse_date(date_str, &ruleset.date_format)?;

    let status = match ruleset.status_column {
        Some(_) if cell(row, ruleset.status_column).eq_ignore_ascii_case(&ruleset.pending_marker) => {
            EntryStatus::Pending
        }
        _ => EntryStatus::Cleared,
    };
    let description = cell(row, ruleset.description_column).to_string();
    let comment = cell(row, ruleset.comment_column).to_string();

    let amounts: Vec<(Option<&str>, Money)> = if let Some(column) = ruleset.amount_column {
        let raw = cell(row, Some(column));
        if raw.is_empty() {
            return Err("Missing amount".into());
        }
        vec![(None, parse_amount(raw)?)]
    } else {
        let outflow = cell(row, ruleset.outflow_column);
        let inflow = cell(row, ruleset.inflow_column);
        let mut sides = Vec::new();
        if !outflow.is_empty() {
            sides.push(("outflow", -parse_amount(outflow)?.abs()));
        }
        if !inflow.is_empty() {
            sides.push(("inflow", parse_amount(inflow)?.abs()));
        }
        match sides.len() {
            0 => return Err("Neither inflow nor outflow is filled".into()),
            // A row with one side filled is a single whole-row candidate
            1 => vec![(None, sides[0].1)],
            _ => sides.into_iter().map(|(f, m)| (Some(f), m)).collect(),
        }
    };

    Ok(amounts
        .into_iter()
        .map(|(field, amount)| Candidate {
            evidence: match field {
                Some(field) => EvidenceRef::field(document, index, field),
                None => EvidenceRef::row(document, index),
            },
            date,
            amount: if ruleset.invert_amounts { -amount } else { amount },
            status,
            description: description.clone(),
            comment: comment.clone(),
        })
        .collect())
}

fn parse_amount(raw: &str) -> Result<Money, String> {
    Money::parse(raw).map_err(|e| format!("Could not parse amount '{}': {}", raw, e))
}

/// Parse a date with the ruleset's format, then common alternatives
fn parse_date(s: &str, primary_format: &str) -> Result<NaiveDate, String> {
    std::iter::once(primary_format)
        .chain(DATE_FORMATS)
        .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
        .ok_or_else(|| format!("Could not parse date: '{}'", s))
}
