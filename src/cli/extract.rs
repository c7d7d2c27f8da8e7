//! Extraction CLI commands

use clap::Subcommand;

use super::parse_locator;
use crate::display::format_extract_stats;
use crate::error::PostbookResult;
use crate::services::{BulkService, ExtractionService};
use crate::storage::Storage;

#[derive(Subcommand)]
pub enum ExtractCommands {
    /// Extract staged entries from an account's documents
    Extract {
        /// Account as login/label
        account: String,
        /// Documents to extract (default: every document of the account)
        documents: Vec<String>,
    },
    /// Extract pending documents for every account
    ExtractAll,
}

pub fn handle_extract_command(storage: &Storage, owner: &str, cmd: ExtractCommands) -> PostbookResult<()> {
    match cmd {
        ExtractCommands::Extract { account, documents } => {
            let account = parse_locator(&account)?;
            let count = ExtractionService::new(storage, owner).extract(&account, &documents)?;
            println!("Extracted {} new entries into {}", count, account);
        }

        ExtractCommands::ExtractAll => {
            let stats = BulkService::new(storage, owner).extract_all()?;
            print!("{}", format_extract_stats(&stats));
        }
    }

    Ok(())
}
