//! Read-only CLI commands: entries, suggestions and transfer candidates

use clap::Subcommand;

use super::{parse_locator, resolve_entry};
use crate::display::{format_candidates, format_entry_list, format_suggestions};
use crate::error::PostbookResult;
use crate::services::{ExtractionService, MatchingService};
use crate::storage::Storage;

#[derive(Subcommand)]
pub enum InspectCommands {
    /// List an account's staged entries
    Entries {
        /// Account as login/label
        account: String,
        /// Only show unposted entries
        #[arg(short, long)]
        unposted: bool,
    },
    /// Suggest counterparts and flag drift for an account's entries
    Suggest {
        /// Account as login/label
        account: String,
    },
    /// List transfer counterparts for one entry
    Candidates {
        /// Account as login/label
        account: String,
        /// Entry id or unique prefix
        entry: String,
    },
}

pub fn handle_inspect_command(storage: &Storage, owner: &str, cmd: InspectCommands) -> PostbookResult<()> {
    let matching = MatchingService::new(storage);

    match cmd {
        InspectCommands::Entries { account, unposted } => {
            let account = parse_locator(&account)?;
            storage.accounts.label(&account)?;
            let journal = storage.journals.load(&account)?;
            let entries: Vec<_> = journal
                .entries
                .iter()
                .filter(|e| !unposted || !e.is_posted())
                .collect();
            print!("{}", format_entry_list(&entries));

            let pending = ExtractionService::new(storage, owner).pending_documents(&account)?;
            if !pending.is_empty() {
                println!("{} documents not yet extracted: {}", pending.len(), pending.join(", "));
            }
        }

        InspectCommands::Suggest { account } => {
            let account = parse_locator(&account)?;
            let suggestions = matching.suggest_categories(&account)?;
            let journal = storage.journals.load(&account)?;
            print!("{}", format_suggestions(&journal.entries, &suggestions));
        }

        InspectCommands::Candidates { account, entry } => {
            let account = parse_locator(&account)?;
            let entry_id = resolve_entry(storage, &account, &entry)?;
            let candidates = matching.transfer_candidates(&account, &entry_id)?;
            print!("{}", format_candidates(&candidates));
        }
    }

    Ok(())
}
