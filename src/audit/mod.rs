//! Audit trail for ledger and journal mutations
//!
//! Every posting, unposting, sync, recategorization, merge, extraction,
//! mapping change and forced lock break appends one [`AuditEntry`] to an
//! append-only JSONL file. Update entries carry before/after snapshots and a
//! short top-level diff produced by [`generate_diff`].

mod diff;
mod entry;
mod logger;

pub use diff::generate_diff;
pub use entry::{AuditEntry, EntityType, Operation};
pub use logger::AuditLogger;
