//! Staged account journal entries
//!
//! An entry is what extraction produced from one or more evidence rows. It
//! stays in the account journal forever; posting only links it to (and
//! unposting only unlinks it from) a GL transaction.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::evidence::EvidenceRef;
use super::ids::{EntryId, GlTransactionId};
use super::money::Money;

/// Settlement status reported by the bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Authorized but not settled; the amount may still change
    #[default]
    Pending,
    /// Settled
    Cleared,
}

impl EntryStatus {
    /// Status of a transaction recording several entries: cleared only when all are
    pub fn combined<I: IntoIterator<Item = EntryStatus>>(statuses: I) -> Self {
        if statuses.into_iter().all(|s| s == Self::Cleared) {
            Self::Cleared
        } else {
            Self::Pending
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Cleared => write!(f, "Cleared"),
        }
    }
}

/// One of several own postings of a split entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPosting {
    pub amount: Money,

    #[serde(default)]
    pub memo: String,

    /// Whether this split has been balanced in the entry's GL transaction
    #[serde(default)]
    pub posted: bool,
}

impl SplitPosting {
    pub fn new(amount: Money, memo: impl Into<String>) -> Self {
        Self {
            amount,
            memo: memo.into(),
            posted: false,
        }
    }
}

/// A staged entry in an account journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: EntryId,

    pub date: NaiveDate,

    #[serde(default)]
    pub status: EntryStatus,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub comment: String,

    /// Non-empty, ordered
    pub evidence: Vec<EvidenceRef>,

    /// GL transaction this entry is linked to
    #[serde(default)]
    pub posted: Option<GlTransactionId>,

    #[serde(default)]
    pub is_transfer: bool,

    /// Signed from the account's point of view (negative = money out)
    pub amount: Money,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Empty for ordinary entries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub splits: Vec<SplitPosting>,
}

impl JournalEntry {
    pub fn new(
        id: EntryId,
        date: NaiveDate,
        amount: Money,
        description: impl Into<String>,
        evidence: Vec<EvidenceRef>,
    ) -> Self {
        Self {
            id,
            date,
            status: EntryStatus::Pending,
            description: description.into(),
            comment: String::new(),
            evidence,
            posted: None,
            is_transfer: false,
            amount,
            tags: Vec::new(),
            splits: Vec::new(),
        }
    }

    pub fn is_posted(&self) -> bool {
        self.posted.is_some()
    }

    pub fn is_split(&self) -> bool {
        !self.splits.is_empty()
    }

    /// Amount of the addressed own posting
    ///
    /// `None` addresses the entry as a whole. For an entry without splits,
    /// index 0 is accepted as an alias of the whole entry.
    pub fn posting_amount(&self, index: Option<usize>) -> Option<Money> {
        match (index, self.is_split()) {
            (None, _) => Some(self.amount),
            (Some(0), false) => Some(self.amount),
            (Some(_), false) => None,
            (Some(i), true) => self.splits.get(i).map(|s| s.amount),
        }
    }

    pub fn splits_total(&self) -> Money {
        self.splits.iter().map(|s| s.amount).sum()
    }

    /// Structural checks every stored entry must pass
    pub fn validate(&self) -> Result<(), EntryValidationError> {
        if self.evidence.is_empty() {
            return Err(EntryValidationError::NoEvidence);
        }
        if self.is_split() && self.splits_total() != self.amount {
            return Err(EntryValidationError::SplitsMismatch {
                entry_amount: self.amount,
                splits_total: self.splits_total(),
            });
        }
        if self.posted.is_none() && self.splits.iter().any(|s| s.posted) {
            return Err(EntryValidationError::OrphanSplit);
        }
        Ok(())
    }

    /// Reset every posting link
    pub fn clear_posting(&mut self) {
        self.posted = None;
        self.is_transfer = false;
        for split in &mut self.splits {
            split.posted = false;
        }
    }
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.date.format("%Y-%m-%d"),
            self.description,
            self.amount
        )
    }
}

/// Validation errors for staged entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryValidationError {
    NoEvidence,
    SplitsMismatch {
        entry_amount: Money,
        splits_total: Money,
    },
    OrphanSplit,
}

impl fmt::Display for EntryValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEvidence => write!(f, "Entry has no evidence"),
            Self::SplitsMismatch {
                entry_amount,
                splits_total,
            } => write!(
                f,
                "Split totals ({}) do not match entry amount ({})",
                splits_total, entry_amount
            ),
            Self::OrphanSplit => write!(f, "Split marked posted on an unposted entry"),
        }
    }
}

impl std::error::Error for EntryValidationError {}

/// Everything staged for one (login, label)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountJournal {
    /// In document/row processing order
    #[serde(default)]
    pub entries: Vec<JournalEntry>,

    /// Documents extraction has already consumed
    #[serde(default)]
    pub processed_documents: Vec<String>,
}

impl AccountJournal {
    pub fn get(&self, id: &EntryId) -> Option<&JournalEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn get_mut(&mut self, id: &EntryId) -> Option<&mut JournalEntry> {
        self.entries.iter_mut().find(|e| &e.id == id)
    }

    /// Every evidence reference already present on a stored entry
    pub fn evidence_index(&self) -> HashSet<EvidenceRef> {
        self.entries
            .iter()
            .flat_map(|e| e.evidence.iter().cloned())
            .collect()
    }

    pub fn unposted(&self) -> impl Iterator<Item = &JournalEntry> {
        self.entries.iter().filter(|e| !e.is_posted())
    }

    pub fn is_processed(&self, document: &str) -> bool {
        self.processed_documents.iter().any(|d| d == document)
    }

    /// Record a consumed document; returns false if it was already known
    pub fn mark_processed(&mut self, document: &str) -> bool {
        if self.is_processed(document) {
            false
        } else {
            self.processed_documents.push(document.to_string());
            true
        }
    }
}
