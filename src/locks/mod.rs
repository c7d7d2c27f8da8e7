//! Lock coordination for logins and the general ledger
//!
//! Locks are JSON records under `locks/`, one per key, created atomically so
//! that two processes can never both believe they hold the same key. State
//! changes are announced on an in-process broadcast channel.

mod coordinator;
mod notifier;

pub use coordinator::{LockCoordinator, LockGuard};
pub use notifier::{LockNotifier, LockStatusChanged};
