//! General ledger transactions
//!
//! A GL transaction is a set of postings that balances to zero for every
//! commodity. Own postings carry a [`PostingSource`] pointing back at the
//! staged entry they came from; postings without a source are counterparts.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::account::AccountLocator;
use super::entry::EntryStatus;
use super::ids::{EntryId, GlTransactionId};
use super::money::Money;

/// Link from a GL posting back to a staged entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostingSource {
    pub account: AccountLocator,
    pub entry_id: EntryId,

    /// Split index for split entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<usize>,
}

impl PostingSource {
    pub fn new(account: AccountLocator, entry_id: EntryId, split: Option<usize>) -> Self {
        Self {
            account,
            entry_id,
            split,
        }
    }

    /// Whether this source refers to the given entry (any split)
    pub fn is_entry(&self, account: &AccountLocator, entry_id: &EntryId) -> bool {
        &self.account == account && &self.entry_id == entry_id
    }
}

/// One leg of a GL transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlPosting {
    pub account: String,
    pub amount: Money,
    pub commodity: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PostingSource>,

    /// Split index of the own posting this counterpart balances
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balances: Option<usize>,
}

impl GlPosting {
    /// A counterpart posting with no staged entry behind it
    pub fn balancing(account: impl Into<String>, amount: Money, commodity: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            amount,
            commodity: commodity.into(),
            source: None,
            balances: None,
        }
    }

    /// Tie a counterpart posting to one split of the entry it balances
    pub fn for_split(mut self, split: Option<usize>) -> Self {
        self.balances = split;
        self
    }

    pub fn sourced(
        account: impl Into<String>,
        amount: Money,
        commodity: impl Into<String>,
        source: PostingSource,
    ) -> Self {
        Self {
            account: account.into(),
            amount,
            commodity: commodity.into(),
            source: Some(source),
            balances: None,
        }
    }

    pub fn is_balancing(&self) -> bool {
        self.source.is_none()
    }

    /// Whether this is the counterpart of the given split
    pub fn balances_split(&self, split: usize) -> bool {
        self.is_balancing() && self.balances == Some(split)
    }
}

/// A balanced double-entry transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlTransaction {
    pub id: GlTransactionId,
    pub date: NaiveDate,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub status: EntryStatus,

    pub postings: Vec<GlPosting>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub note: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GlTransaction {
    pub fn new(date: NaiveDate, description: impl Into<String>, status: EntryStatus) -> Self {
        let now = Utc::now();
        Self {
            id: GlTransactionId::new(),
            date,
            description: description.into(),
            status,
            postings: Vec::new(),
            tags: Vec::new(),
            note: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Net amount per commodity; every value is zero when balanced
    pub fn totals(&self) -> BTreeMap<String, Money> {
        let mut totals: BTreeMap<String, Money> = BTreeMap::new();
        for posting in &self.postings {
            *totals.entry(posting.commodity.clone()).or_default() += posting.amount;
        }
        totals
    }

    pub fn is_balanced(&self) -> bool {
        self.totals().values().all(|m| m.is_zero())
    }

    /// A transfer links staged entries on every side and has no counterpart
    pub fn is_transfer(&self) -> bool {
        let sourced: Vec<&PostingSource> =
            self.postings.iter().filter_map(|p| p.source.as_ref()).collect();
        !self.postings.iter().any(|p| p.is_balancing())
            && sourced
                .iter()
                .any(|s| sourced.iter().any(|o| o.account != s.account))
    }

    /// Distinct (account, entry) pairs linked to this transaction
    pub fn linked_entries(&self) -> Vec<(AccountLocator, EntryId)> {
        let mut linked: Vec<(AccountLocator, EntryId)> = Vec::new();
        for source in self.postings.iter().filter_map(|p| p.source.as_ref()) {
            let key = (source.account.clone(), source.entry_id.clone());
            if !linked.contains(&key) {
                linked.push(key);
            }
        }
        linked
    }

    /// Index of the counterpart posting of one split
    ///
    /// Falls back to an untagged counterpart of the opposite amount for
    /// transactions written before counterparts carried their split.
    pub fn split_counterpart(&self, split: usize, amount: Money) -> Option<usize> {
        self.postings
            .iter()
            .position(|p| p.balances_split(split))
            .or_else(|| {
                self.postings
                    .iter()
                    .position(|p| p.is_balancing() && p.balances.is_none() && p.amount == -amount)
            })
    }

    /// Structural checks every stored transaction must pass
    pub fn validate(&self) -> Result<(), GlValidationError> {
        if self.postings.len() < 2 {
            return Err(GlValidationError::TooFewPostings(self.postings.len()));
        }
        if let Some(p) = self.postings.iter().find(|p| p.account.trim().is_empty()) {
            return Err(GlValidationError::BlankAccount(p.amount));
        }
        let unbalanced: Vec<(String, Money)> = self
            .totals()
            .into_iter()
            .filter(|(_, m)| !m.is_zero())
            .collect();
        if !unbalanced.is_empty() {
            return Err(GlValidationError::Unbalanced(unbalanced));
        }
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl fmt::Display for GlTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({} postings)",
            self.date.format("%Y-%m-%d"),
            self.description,
            self.postings.len()
        )
    }
}

/// Validation errors for GL transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlValidationError {
    TooFewPostings(usize),
    BlankAccount(Money),
    Unbalanced(Vec<(String, Money)>),
}

impl fmt::Display for GlValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFewPostings(n) => {
                write!(f, "Transaction needs at least 2 postings, has {}", n)
            }
            Self::BlankAccount(amount) => {
                write!(f, "Posting of {} has a blank account", amount)
            }
            Self::Unbalanced(residuals) => {
                let parts: Vec<String> = residuals
                    .iter()
                    .map(|(c, m)| m.format_with_commodity(c))
                    .collect();
                write!(f, "Transaction does not balance: {}", parts.join(", "))
            }
        }
    }
}

impl std::error::Error for GlValidationError {}
