//! General ledger access
//!
//! The posting engine talks to the ledger only through [`LedgerAccessor`].
//! [`JsonLedger`] keeps every GL transaction in `data/ledger.json`, re-read
//! on each call.

use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{PostbookError, PostbookResult};
use crate::models::{GlTransaction, GlTransactionId};

use super::file_io::{read_json, write_json_atomic};

/// Filter for ledger queries; every criterion is optional
#[derive(Debug, Clone, Default)]
pub struct LedgerQuery {
    /// Only transactions with a posting on this GL account
    pub account: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub tag: Option<String>,
    pub limit: Option<usize>,
}

impl LedgerQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn date_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, txn: &GlTransaction) -> bool {
        if let Some(account) = &self.account {
            if !txn.postings.iter().any(|p| &p.account == account) {
                return false;
            }
        }
        if self.start_date.is_some_and(|start| txn.date < start) {
            return false;
        }
        if self.end_date.is_some_and(|end| txn.date > end) {
            return false;
        }
        if let Some(tag) = &self.tag {
            if !txn.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        true
    }
}

/// Narrow contract the core needs from a general ledger
pub trait LedgerAccessor: Send + Sync {
    /// Store a new transaction; it must validate and its id must be unused
    fn append(&self, txn: &GlTransaction) -> PostbookResult<()>;

    /// Replace an existing transaction in place, keeping its id
    fn update(&self, txn: &GlTransaction) -> PostbookResult<()>;

    /// Delete a transaction, returning what was stored
    fn remove(&self, id: GlTransactionId) -> PostbookResult<GlTransaction>;

    fn get(&self, id: GlTransactionId) -> PostbookResult<Option<GlTransaction>>;

    /// Matching transactions ordered by date, then creation time
    fn query(&self, query: &LedgerQuery) -> PostbookResult<Vec<GlTransaction>>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerData {
    #[serde(default)]
    transactions: Vec<GlTransaction>,
}

/// JSON-file ledger
pub struct JsonLedger {
    path: PathBuf,
}

impl JsonLedger {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn load(&self) -> PostbookResult<LedgerData> {
        read_json(&self.path)
    }

    fn save(&self, data: &LedgerData) -> PostbookResult<()> {
        write_json_atomic(&self.path, data)
    }
}

fn validated(txn: &GlTransaction) -> PostbookResult<()> {
    txn.validate()
        .map_err(|e| PostbookError::Validation(format!("{}: {}", txn.id, e)))
}

impl LedgerAccessor for JsonLedger {
    fn append(&self, txn: &GlTransaction) -> PostbookResult<()> {
        validated(txn)?;
        let mut data = self.load()?;
        if data.transactions.iter().any(|t| t.id == txn.id) {
            return Err(PostbookError::Storage(format!(
                "Transaction {} already exists",
                txn.id
            )));
        }
        data.transactions.push(txn.clone());
        self.save(&data)
    }

    fn update(&self, txn: &GlTransaction) -> PostbookResult<()> {
        validated(txn)?;
        let mut data = self.load()?;
        let slot = data
            .transactions
            .iter_mut()
            .find(|t| t.id == txn.id)
            .ok_or_else(|| PostbookError::transaction_not_found(txn.id.to_string()))?;
        *slot = txn.clone();
        self.save(&data)
    }

    fn remove(&self, id: GlTransactionId) -> PostbookResult<GlTransaction> {
        let mut data = self.load()?;
        let index = data
            .transactions
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| PostbookError::transaction_not_found(id.to_string()))?;
        let removed = data.transactions.remove(index);
        self.save(&data)?;
        Ok(removed)
    }

    fn get(&self, id: GlTransactionId) -> PostbookResult<Option<GlTransaction>> {
        Ok(self.load()?.transactions.into_iter().find(|t| t.id == id))
    }

    fn query(&self, query: &LedgerQuery) -> PostbookResult<Vec<GlTransaction>> {
        let mut matched: Vec<GlTransaction> = self
            .load()?
            .transactions
            .into_iter()
            .filter(|t| query.matches(t))
            .collect();
        matched.sort_by(|a, b| a.date.cmp(&b.date).then(a.created_at.cmp(&b.created_at)));
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}
