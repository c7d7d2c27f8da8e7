//! Evidence references and document metadata
//!
//! A staged entry points back at the document rows that produced it. The
//! reference is a typed composite key so the dedup boundary never has to
//! parse a free-form "document:row" string.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One (document, row, field?) reference
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EvidenceRef {
    /// Document name within its (login, label)
    pub document: String,

    /// Zero-based row index in the document, header rows included
    pub row: usize,

    /// Distinguishes several candidates drawn from one row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl EvidenceRef {
    /// Reference a whole row
    pub fn row(document: impl Into<String>, row: usize) -> Self {
        Self {
            document: document.into(),
            row,
            field: None,
        }
    }

    /// Reference one field of a row
    pub fn field(document: impl Into<String>, row: usize, field: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            row,
            field: Some(field.into()),
        }
    }
}

impl fmt::Display for EvidenceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}:{}:{}", self.document, self.row, field),
            None => write!(f, "{}:{}", self.document, self.row),
        }
    }
}

/// Metadata describing one immutable evidence artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Document name, unique within its (login, label)
    pub name: String,

    #[serde(default = "default_mime_type")]
    pub mime_type: String,

    /// When the scraper captured the artifact
    pub scraped_at: DateTime<Utc>,

    /// Scrape session that produced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Last date the artifact is known to cover
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_end: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

fn default_mime_type() -> String {
    "text/csv".to_string()
}

impl Document {
    pub fn new(name: impl Into<String>, scraped_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            mime_type: default_mime_type(),
            scraped_at,
            session_id: None,
            coverage_end: None,
            source_url: None,
        }
    }
}
