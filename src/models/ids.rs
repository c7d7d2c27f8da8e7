//! Strongly-typed identifiers
//!
//! Staged entries are addressed by a content-derived id so re-extraction of
//! the same evidence always lands on the same id. GL transactions get a
//! random UUID when they are created.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::account::AccountLocator;
use super::evidence::EvidenceRef;

/// Identifier of a staged journal entry (32 lowercase hex characters)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// Derive the id from the owning account and the entry's evidence
    ///
    /// Each field is length-prefixed before hashing so that no two distinct
    /// evidence lists can serialize to the same byte stream.
    pub fn derive(account: &AccountLocator, evidence: &[EvidenceRef]) -> Self {
        let mut hasher = Sha256::new();
        hash_field(&mut hasher, account.login.as_bytes());
        hash_field(&mut hasher, account.label.as_bytes());
        for reference in evidence {
            hash_field(&mut hasher, reference.document.as_bytes());
            hasher.update((reference.row as u64).to_le_bytes());
            match &reference.field {
                Some(field) => {
                    hasher.update([1u8]);
                    hash_field(&mut hasher, field.as_bytes());
                }
                None => hasher.update([0u8]),
            }
        }
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..16]))
    }

    /// Wrap an id string that was handed in by a caller
    pub fn parse(s: &str) -> Result<Self, IdParseError> {
        let s = s.trim();
        if s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(IdParseError(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for compact listings
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

fn hash_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntryId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Identifier of a GL transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlTransactionId(Uuid);

impl GlTransactionId {
    /// Create a new random ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for GlTransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GlTransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

impl From<Uuid> for GlTransactionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for GlTransactionId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let bare = trimmed.strip_prefix("txn-").unwrap_or(trimmed);
        Uuid::parse_str(bare)
            .map(Self)
            .map_err(|_| IdParseError(s.to_string()))
    }
}

/// An id string that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError(pub String);

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid id: '{}'", self.0)
    }
}

impl std::error::Error for IdParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator() -> AccountLocator {
        AccountLocator::new("chase", "checking")
    }

    #[test]
    fn test_entry_id_is_deterministic() {
        let evidence = vec![EvidenceRef::row("2025-01.csv", 3)];
        let a = EntryId::derive(&locator(), &evidence);
        let b = EntryId::derive(&locator(), &evidence);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn test_entry_id_distinguishes_field_and_account() {
        let plain = EntryId::derive(&locator(), &[EvidenceRef::row("d.csv", 1)]);
        let field = EntryId::derive(
            &locator(),
            &[EvidenceRef::field("d.csv", 1, "inflow")],
        );
        let other = EntryId::derive(
            &AccountLocator::new("chase", "savings"),
            &[EvidenceRef::row("d.csv", 1)],
        );
        assert_ne!(plain, field);
        assert_ne!(plain, other);
    }

    #[test]
    fn test_entry_id_parse() {
        let id = EntryId::derive(&locator(), &[EvidenceRef::row("d.csv", 1)]);
        let parsed: EntryId = id.as_str().to_uppercase().parse().unwrap();
        assert_eq!(parsed, id);
        assert!(EntryId::parse("not-an-id").is_err());
    }

    #[test]
    fn test_transaction_id_round_trips_through_display() {
        let id = GlTransactionId::new();
        let shown = id.to_string();
        assert!(shown.starts_with("txn-"));
        assert_eq!(shown.parse::<GlTransactionId>().unwrap(), id);
        assert_eq!(
            id.as_uuid().to_string().parse::<GlTransactionId>().unwrap(),
            id
        );
    }

    #[test]
    fn test_id_serialization() {
        let id = GlTransactionId::new();
        let json = serde_json::to_string(&id).unwrap();
        let deserialized: GlTransactionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }
}
