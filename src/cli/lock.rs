//! Lock CLI commands
//!
//! Manual lock management for operators: inspect, take, release and break
//! the GL and login locks. Keys are `gl` or a login name.

use clap::Subcommand;

use super::parse_lock_key;
use crate::audit::EntityType;
use crate::display::format_lock_snapshot;
use crate::error::PostbookResult;
use crate::services::BulkService;
use crate::storage::Storage;

#[derive(Subcommand)]
pub enum LockCommands {
    /// Show the GL lock and login locks
    Status {
        /// Logins to show (default: every registered login)
        logins: Vec<String>,
    },
    /// Take a lock until it is released
    Acquire {
        /// `gl` or a login name
        key: String,
        /// What the lock is held for
        #[arg(short, long, default_value = "manual")]
        purpose: String,
    },
    /// Release a lock you hold
    Release {
        /// `gl` or a login name
        key: String,
    },
    /// Remove a lock whoever holds it
    Break {
        /// `gl` or a login name
        key: String,
    },
}

pub fn handle_lock_command(storage: &Storage, owner: &str, cmd: LockCommands) -> PostbookResult<()> {
    match cmd {
        LockCommands::Status { logins } => {
            let snapshot = if logins.is_empty() {
                BulkService::new(storage, owner).lock_snapshot()?
            } else {
                storage.locks.snapshot(logins.as_slice())?
            };
            print!("{}", format_lock_snapshot(&snapshot));
        }

        LockCommands::Acquire { key, purpose } => {
            let key = parse_lock_key(&key);
            if storage.locks.acquire(&key, owner, &purpose)? {
                if let Some(holder) = storage.locks.holder(&key)? {
                    storage.log_create(EntityType::Lock, key.file_stem(), Some(key.to_string()), &holder);
                }
                println!("Locked {} as {}", key, owner);
            } else {
                println!("{} is already held by {}", key, owner);
            }
        }

        LockCommands::Release { key } => {
            let key = parse_lock_key(&key);
            let holder = storage.locks.holder(&key)?;
            storage.locks.release(&key, owner)?;
            match holder {
                Some(holder) if holder.owner == owner => {
                    storage.log_delete(EntityType::Lock, key.file_stem(), Some(key.to_string()), &holder);
                    println!("Released {}", key);
                }
                Some(holder) => println!("{} is held by {}, not released", key, holder.owner),
                None => println!("{} was not locked", key),
            }
        }

        LockCommands::Break { key } => {
            let key = parse_lock_key(&key);
            match storage.locks.break_lock(&key)? {
                Some(previous) => {
                    storage.log_delete(
                        EntityType::Lock,
                        key.file_stem(),
                        Some(key.to_string()),
                        &previous,
                    );
                    println!("Broke {} (was held by {} for {})", key, previous.owner, previous.purpose);
                }
                None => println!("{} was not locked", key),
            }
        }
    }

    Ok(())
}
