//! Account CLI commands
//!
//! Implements CLI commands for the account registry: logins, labels and
//! their GL account mappings.

use clap::Subcommand;
use serde_json::json;

use super::parse_locator;
use crate::audit::EntityType;
use crate::error::PostbookResult;
use crate::models::AccountLocator;
use crate::storage::Storage;

/// Account subcommands
#[derive(Subcommand)]
pub enum AccountCommands {
    /// Register a login and its account labels
    Add {
        /// Login name
        login: String,
        /// Extraction ruleset bound to the login
        #[arg(short, long)]
        extension: Option<String>,
        /// Account labels under the login
        labels: Vec<String>,
    },
    /// Map an account label to a GL account
    Map {
        /// Account as login/label
        account: String,
        /// GL account, e.g. "Assets:Chase:Checking"
        gl_account: String,
    },
    /// Remove an account label's GL mapping
    Unmap {
        /// Account as login/label
        account: String,
    },
    /// List logins, labels and mappings
    List,
    /// Show GL accounts mapped from more than one label
    Conflicts,
}

/// Handle an account command
pub fn handle_account_command(storage: &Storage, cmd: AccountCommands) -> PostbookResult<()> {
    let accounts = &storage.accounts;

    match cmd {
        AccountCommands::Add {
            login,
            extension,
            labels,
        } => {
            let registered = accounts.add_login(&login, extension)?;
            for label in &labels {
                accounts.add_label(&AccountLocator::new(&login, label))?;
            }

            println!("Registered login: {}", registered.name);
            if let Some(extension) = &registered.extension {
                println!("  Extension: {}", extension);
            }
            for label in labels {
                println!("  Label: {}", label);
            }
        }

        AccountCommands::Map {
            account,
            gl_account,
        } => {
            let account = parse_locator(&account)?;
            let previous = accounts.map_account(&account, &gl_account)?;
            let after = json!({ "gl_account": gl_account.trim() });
            match &previous {
                Some(before) => storage.log_update(
                    EntityType::Mapping,
                    account.to_string(),
                    None,
                    &json!({ "gl_account": before }),
                    &after,
                ),
                None => storage.log_create(EntityType::Mapping, account.to_string(), None, &after),
            }
            println!("Mapped {} -> {}", account, gl_account.trim());

            for conflict in accounts.conflicts()? {
                if conflict.accounts.contains(&account) {
                    println!("Warning: conflicting mapping {}", conflict);
                }
            }
        }

        AccountCommands::Unmap { account } => {
            let account = parse_locator(&account)?;
            match accounts.unmap_account(&account)? {
                Some(previous) => {
                    storage.log_delete(
                        EntityType::Mapping,
                        account.to_string(),
                        None,
                        &json!({ "gl_account": previous }),
                    );
                    println!("Unmapped {} (was {})", account, previous);
                }
                None => println!("{} was not mapped", account),
            }
        }

        AccountCommands::List => {
            let logins = accounts.get_all()?;
            if logins.is_empty() {
                println!("No accounts registered.");
                return Ok(());
            }
            for login in logins {
                match &login.extension {
                    Some(extension) => println!("{} [{}]", login.name, extension),
                    None => println!("{} [no extension]", login.name),
                }
                for label in &login.labels {
                    println!(
                        "  {:<24}  {}",
                        label.label,
                        label.gl_account.as_deref().unwrap_or("(unmapped)")
                    );
                }
            }
        }

        AccountCommands::Conflicts => {
            let conflicts = accounts.conflicts()?;
            if conflicts.is_empty() {
                println!("No mapping conflicts.");
            }
            for conflict in conflicts {
                println!("{}", conflict);
            }
        }
    }

    Ok(())
}
