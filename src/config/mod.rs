//! Configuration module for postbook
//!
//! This module provides configuration management including:
//! - XDG-compliant path resolution
//! - Engine settings persistence (matching window, lock expiry, timeouts)

pub mod paths;
pub mod settings;

pub use paths::PostbookPaths;
pub use settings::Settings;
