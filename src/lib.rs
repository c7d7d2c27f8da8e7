//! postbook - scraped bank evidence to double-entry ledger
//!
//! This library provides the pipeline behind the `postbook` binary: it
//! extracts staged entries from scraped documents into per-account journals,
//! suggests counterparts and transfer matches, and posts balanced GL
//! transactions while coordinating login and ledger locks with other
//! processes.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Paths and engine settings
//! - `error`: Custom error types
//! - `models`: Core data models (entries, evidence, GL transactions, locks)
//! - `storage`: JSON file storage, the document store and the ledger accessor
//! - `locks`: Login and GL lock coordination
//! - `services`: Extraction, matching, posting and bulk orchestration
//! - `audit`: Audit logging system
//! - `cli` / `display`: Command handlers and terminal formatting
//!
//! # Example
//!
//! ```rust,ignore
//! use postbook::config::paths::PostbookPaths;
//! use postbook::models::AccountLocator;
//! use postbook::services::ExtractionService;
//! use postbook::storage::Storage;
//!
//! let storage = Storage::open(PostbookPaths::new()?)?;
//! let account = AccountLocator::new("chase", "checking");
//! let added = ExtractionService::new(&storage, "me").extract(&account, &[])?;
//! ```

pub mod audit;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod locks;
pub mod models;
pub mod services;
pub mod storage;

pub use error::{PostbookError, PostbookResult};
