//! Core data models for postbook
//!
//! Staged account journal entries, their evidence, general ledger
//! transactions, the account registry, extraction rulesets and lock state.

pub mod account;
pub mod entry;
pub mod evidence;
pub mod gl;
pub mod ids;
pub mod lock;
pub mod money;
pub mod ruleset;

pub use account::{AccountLabel, AccountLocator, Login, MappingConflict};
pub use entry::{AccountJournal, EntryStatus, JournalEntry, SplitPosting};
pub use evidence::{Document, EvidenceRef};
pub use gl::{GlPosting, GlTransaction, PostingSource};
pub use ids::{EntryId, GlTransactionId};
pub use lock::{LockHolder, LockKey, LockSnapshot, LockStatus};
pub use money::Money;
pub use ruleset::Ruleset;
