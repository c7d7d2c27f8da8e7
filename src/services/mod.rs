//! Service layer for postbook
//!
//! The service layer implements the pipeline on top of the storage layer:
//! extraction, matching, posting and bulk runs across accounts.

pub mod bulk;
pub mod extraction;
pub mod matching;
pub mod posting;

pub use bulk::{BulkFailure, BulkPolicy, BulkService, ExtractStats, PostStats, SyncStats};
pub use extraction::{Candidate, ExtractionService};
pub use matching::{CategoryModel, MatchingService, Suggestion, TransferCandidate, TransferMatch};
pub use posting::PostingService;
