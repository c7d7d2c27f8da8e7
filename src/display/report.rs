//! Run summaries and lock status formatting

use crate::models::{LockSnapshot, LockStatus};
use crate::services::{BulkFailure, ExtractStats, PostStats, SyncStats};

fn push_failures(output: &mut String, failures: &[BulkFailure]) {
    for failure in failures {
        match &failure.entry_id {
            Some(id) => output.push_str(&format!(
                "  ! {} {}: {}\n",
                failure.account,
                id.short(),
                failure.error
            )),
            None => output.push_str(&format!("  ! {}: {}\n", failure.account, failure.error)),
        }
    }
}

pub fn format_extract_stats(stats: &ExtractStats) -> String {
    let mut output = format!(
        "Extracted {} new entries from {} of {} accounts ({} failed, {} locked)\n",
        stats.total_new_entries, stats.succeeded, stats.eligible, stats.failed, stats.locked
    );
    push_failures(&mut output, &stats.failures);
    output
}

pub fn format_post_stats(stats: &PostStats) -> String {
    let mut output = format!(
        "Posted {} entries across {} accounts ({} failed, {} locked, {} skipped)\n",
        stats.posted, stats.eligible_accounts, stats.failed, stats.locked, stats.skipped
    );
    push_failures(&mut output, &stats.failures);
    output
}

pub fn format_sync_stats(stats: &SyncStats) -> String {
    let mut output = format!(
        "Synced {} entries across {} accounts ({} failed, {} locked)\n",
        stats.synced, stats.eligible_accounts, stats.failed, stats.locked
    );
    push_failures(&mut output, &stats.failures);
    output
}

/// Format a lock snapshot, GL first
pub fn format_lock_snapshot(snapshot: &LockSnapshot) -> String {
    let width = snapshot
        .logins
        .keys()
        .map(|name| name.len())
        .max()
        .unwrap_or(0)
        .max("general ledger".len());

    let line = |name: &str, status: &LockStatus| format!("{:<width$}  {}\n", name, status, width = width);
    let mut output = line("general ledger", &snapshot.gl);
    for (name, status) in &snapshot.logins {
        output.push_str(&line(name, status));
    }
    output
}
