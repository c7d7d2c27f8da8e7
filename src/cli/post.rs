//! Posting CLI commands
//!
//! Single-entry posting, transfers, reversal, repair and the bulk runs.

use clap::Subcommand;

use super::{parse_locator, parse_txn_id, resolve_entry};
use crate::display::{format_post_stats, format_sync_stats};
use crate::error::PostbookResult;
use crate::services::{BulkPolicy, BulkService, PostingService};
use crate::storage::Storage;

#[derive(Subcommand)]
pub enum PostCommands {
    /// Post an entry against a counterpart account
    Post {
        /// Account as login/label
        account: String,
        /// Entry id or unique prefix
        entry: String,
        /// Counterpart GL account
        counterpart: String,
        /// Post only this split
        #[arg(short, long)]
        split: Option<usize>,
    },
    /// Post every unposted entry of one account
    PostAccount {
        /// Account as login/label
        account: String,
        /// Keep going after a failed entry
        #[arg(long)]
        keep_going: bool,
    },
    /// Post every unposted entry of every mapped account
    PostAll {
        /// Stop at the first failed entry
        #[arg(long)]
        fail_fast: bool,
    },
    /// Reverse a posting
    Unpost {
        /// Account as login/label
        account: String,
        /// Entry id or unique prefix
        entry: String,
        /// Reverse only this split
        #[arg(short, long)]
        split: Option<usize>,
    },
    /// Update a posted transaction to match its entry
    Sync {
        /// Account as login/label
        account: String,
        /// Entry id or unique prefix
        entry: String,
    },
    /// Re-sync every drifted entry
    SyncAll {
        /// Stop at the first failed entry
        #[arg(long)]
        fail_fast: bool,
    },
    /// Post two entries as one transfer
    Transfer {
        /// First account as login/label
        from: String,
        /// Entry in the first account
        from_entry: String,
        /// Second account as login/label
        to: String,
        /// Entry in the second account
        to_entry: String,
    },
    /// Move a transaction's counterpart postings to another account
    Recategorize {
        /// Transaction id
        txn: String,
        /// New counterpart GL account
        account: String,
    },
    /// Merge the second transaction into the first as a transfer
    Merge {
        /// Transaction to keep
        keep: String,
        /// Transaction to fold in and delete
        absorb: String,
    },
}

fn policy(continue_on_error: bool) -> BulkPolicy {
    if continue_on_error {
        BulkPolicy::ContinueOnError
    } else {
        BulkPolicy::AbortOnFirstError
    }
}

pub fn handle_post_command(storage: &Storage, owner: &str, cmd: PostCommands) -> PostbookResult<()> {
    let posting = PostingService::new(storage, owner);
    let bulk = BulkService::new(storage, owner);

    match cmd {
        PostCommands::Post {
            account,
            entry,
            counterpart,
            split,
        } => {
            let account = parse_locator(&account)?;
            let entry_id = resolve_entry(storage, &account, &entry)?;
            let txn_id = posting.post(&account, &entry_id, &counterpart, split)?;
            println!("Posted {} as transaction {}", entry_id.short(), txn_id);
        }

        PostCommands::PostAccount { account, keep_going } => {
            let account = parse_locator(&account)?;
            let stats = bulk.post_account(&account, policy(keep_going))?;
            print!("{}", format_post_stats(&stats));
        }

        PostCommands::PostAll { fail_fast } => {
            let stats = bulk.post_all(policy(!fail_fast))?;
            print!("{}", format_post_stats(&stats));
        }

        PostCommands::Unpost {
            account,
            entry,
            split,
        } => {
            let account = parse_locator(&account)?;
            let entry_id = resolve_entry(storage, &account, &entry)?;
            posting.unpost(&account, &entry_id, split)?;
            println!("Unposted {}", entry_id.short());
        }

        PostCommands::Sync { account, entry } => {
            let account = parse_locator(&account)?;
            let entry_id = resolve_entry(storage, &account, &entry)?;
            let txn_id = posting.sync(&account, &entry_id)?;
            println!("Synced transaction {}", txn_id);
        }

        PostCommands::SyncAll { fail_fast } => {
            let stats = bulk.sync_all(policy(!fail_fast))?;
            print!("{}", format_sync_stats(&stats));
        }

        PostCommands::Transfer {
            from,
            from_entry,
            to,
            to_entry,
        } => {
            let from = parse_locator(&from)?;
            let to = parse_locator(&to)?;
            let from_id = resolve_entry(storage, &from, &from_entry)?;
            let to_id = resolve_entry(storage, &to, &to_entry)?;
            let txn_id = posting.post_transfer(&from, &from_id, &to, &to_id)?;
            println!("Posted transfer {} <-> {} as transaction {}", from, to, txn_id);
        }

        PostCommands::Recategorize { txn, account } => {
            let txn_id = parse_txn_id(&txn)?;
            posting.recategorize(txn_id, &account)?;
            println!("Recategorized {} to {}", txn_id, account.trim());
        }

        PostCommands::Merge { keep, absorb } => {
            let keep = parse_txn_id(&keep)?;
            let absorb = parse_txn_id(&absorb)?;
            let txn_id = posting.merge_transfer(keep, absorb)?;
            println!("Merged {} into {}", absorb, txn_id);
        }
    }

    Ok(())
}
