//! Display formatting for terminal output
//!
//! Plain-text tables and summaries for the command line.

pub mod entry;
pub mod report;

pub use entry::{format_candidates, format_entry_list, format_suggestions};
pub use report::{
    format_extract_stats, format_lock_snapshot, format_post_stats, format_sync_stats,
};
