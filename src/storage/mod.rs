//! Storage layer for postbook
//!
//! JSON and YAML files with atomic writes, a cross-process write mutex, and
//! read-through repositories that go back to disk on every call. [`Storage`]
//! ties them together with the lock coordinator and the audit log.

pub mod accounts;
pub mod documents;
pub mod file_io;
pub mod journals;
pub mod ledger;
pub mod rulesets;
pub mod write_lock;

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

pub use accounts::AccountRepository;
pub use documents::{DocumentStore, FsDocumentStore, TimedDocumentStore};
pub use file_io::{read_json, write_json_atomic};
pub use journals::JournalRepository;
pub use ledger::{JsonLedger, LedgerAccessor, LedgerQuery};
pub use rulesets::RulesetRepository;
pub use write_lock::{WriteGuard, WriteMutex};

use crate::audit::{AuditEntry, AuditLogger, EntityType};
use crate::config::{PostbookPaths, Settings};
use crate::error::PostbookResult;
use crate::locks::LockCoordinator;

/// Main storage coordinator that provides access to all repositories
pub struct Storage {
    paths: PostbookPaths,
    settings: Settings,
    pub accounts: AccountRepository,
    pub journals: JournalRepository,
    pub rulesets: RulesetRepository,
    pub locks: LockCoordinator,
    ledger: Box<dyn LedgerAccessor>,
    documents: TimedDocumentStore,
    write_mutex: WriteMutex,
    audit: AuditLogger,
}

impl Storage {
    /// Create a Storage over the given paths and settings
    pub fn new(paths: PostbookPaths, settings: Settings) -> PostbookResult<Self> {
        paths.ensure_directories()?;

        let documents: Arc<dyn DocumentStore> =
            Arc::new(FsDocumentStore::new(paths.documents_dir()));

        Ok(Self {
            accounts: AccountRepository::new(paths.accounts_file()),
            journals: JournalRepository::new(paths.clone()),
            rulesets: RulesetRepository::new(paths.rulesets_file()),
            locks: LockCoordinator::new(paths.clone(), settings.lock_ttl()),
            ledger: Box::new(JsonLedger::new(paths.ledger_file())),
            documents: TimedDocumentStore::new(documents, settings.io_timeout()),
            write_mutex: WriteMutex::new(paths.write_lock_file(), settings.write_lock_timeout()),
            audit: AuditLogger::new(paths.audit_log()),
            settings,
            paths,
        })
    }

    /// Create a Storage with the settings saved under `paths`
    pub fn open(paths: PostbookPaths) -> PostbookResult<Self> {
        let settings = Settings::load_or_create(&paths)?;
        Self::new(paths, settings)
    }

    pub fn paths(&self) -> &PostbookPaths {
        &self.paths
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn ledger(&self) -> &dyn LedgerAccessor {
        self.ledger.as_ref()
    }

    pub fn documents(&self) -> &dyn DocumentStore {
        &self.documents
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Take the cross-process write mutex
    ///
    /// Hold the guard for the whole read-modify-write of one operation.
    pub fn write_lock(&self) -> PostbookResult<WriteGuard> {
        self.write_mutex.acquire()
    }

    /// Record a creation in the audit log
    ///
    /// Audit failures never undo a committed mutation; they are logged.
    pub fn log_create<T: Serialize>(
        &self,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        entity_name: Option<String>,
        entity: &T,
    ) {
        self.record(AuditEntry::create(entity_type, entity_id, entity_name, entity));
    }

    pub fn log_update<T: Serialize>(
        &self,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        entity_name: Option<String>,
        before: &T,
        after: &T,
    ) {
        self.record(AuditEntry::update(
            entity_type,
            entity_id,
            entity_name,
            before,
            after,
        ));
    }

    pub fn log_delete<T: Serialize>(
        &self,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        entity_name: Option<String>,
        entity: &T,
    ) {
        self.record(AuditEntry::delete(entity_type, entity_id, entity_name, entity));
    }

    fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.log(&entry) {
            warn!(
                error = %e,
                entity = %entry.entity_type,
                id = %entry.entity_id,
                "failed to write audit entry"
            );
        }
    }
}
