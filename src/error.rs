//! Custom error types for postbook
//!
//! This module defines the error hierarchy for the pipeline using thiserror.
//! Variants that concern a specific entity always carry the offending id or
//! account so user-facing messages can name it.

use thiserror::Error;

/// The main error type for postbook operations
#[derive(Error, Debug)]
pub enum PostbookError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// YAML (ruleset file) errors
    #[error("YAML error: {0}")]
    Yaml(String),

    /// CSV document errors
    #[error("CSV error: {0}")]
    Csv(String),

    /// Validation errors: unbalanced postings, missing fields, ambiguous input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// The entry (or split) already has a GL transaction
    #[error("Entry already posted: {0}")]
    AlreadyPosted(String),

    /// The entry (or split) has no GL transaction
    #[error("Entry not posted: {0}")]
    NotPosted(String),

    /// A resource needed by the operation is held by someone else
    #[error("{key} is locked{}", holder_suffix(.owner, .purpose))]
    Locked {
        key: String,
        owner: Option<String>,
        purpose: Option<String>,
    },

    /// `acquire` was refused because a different owner holds the lock
    #[error("{key} is already locked by {owner} ({purpose})")]
    AlreadyLocked {
        key: String,
        owner: String,
        purpose: String,
    },

    /// A GL account is mapped from more than one account label
    #[error("GL account '{gl_account}' is mapped from several accounts: {}", .accounts.join(", "))]
    Conflict {
        gl_account: String,
        accounts: Vec<String>,
    },

    /// The login has no extraction ruleset bound
    #[error("No extraction ruleset for {0}")]
    ExtensionMissing(String),

    /// The document store has nothing for the account
    #[error("No documents for {0}")]
    NoDocuments(String),

    /// Transfer sides do not net to zero
    #[error("Transfer mismatch: {left} and {right} do not net to zero ({net})")]
    Mismatch {
        left: String,
        right: String,
        net: String,
    },

    /// An external collaborator or the storage lock did not answer in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Storage errors
    #[error("Storage error: {0}")]
    Storage(String),
}

fn holder_suffix(owner: &Option<String>, purpose: &Option<String>) -> String {
    match (owner, purpose) {
        (Some(owner), Some(purpose)) => format!(" by {} ({})", owner, purpose),
        (Some(owner), None) => format!(" by {}", owner),
        _ => String::new(),
    }
}

impl PostbookError {
    /// Create a "not found" error for staged entries
    pub fn entry_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Entry",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for GL transactions
    pub fn transaction_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Transaction",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for documents
    pub fn document_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Document",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for logins and account labels
    pub fn account_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Account",
            identifier: identifier.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this error means a lock was in the way
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. } | Self::AlreadyLocked { .. })
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for PostbookError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PostbookError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<serde_yaml::Error> for PostbookError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml(err.to_string())
    }
}

impl From<csv::Error> for PostbookError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err.to_string())
    }
}

/// Result type alias for postbook operations
pub type PostbookResult<T> = Result<T, PostbookError>;
