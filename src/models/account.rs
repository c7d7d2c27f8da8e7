//! Logins, account labels and their GL account mappings

use serde::{Deserialize, Serialize};
use std::fmt;

/// Addresses one scraped account: a label under a login
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountLocator {
    pub login: String,
    pub label: String,
}

impl AccountLocator {
    pub fn new(login: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            label: label.into(),
        }
    }
}

impl fmt::Display for AccountLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.login, self.label)
    }
}

/// A sub-account under a login, optionally mapped to a GL account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLabel {
    pub label: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gl_account: Option<String>,
}

impl AccountLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            gl_account: None,
        }
    }
}

/// A credential/extension grouping that owns account labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    pub name: String,

    /// Name of the extraction ruleset bound to this login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,

    #[serde(default)]
    pub labels: Vec<AccountLabel>,
}

impl Login {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extension: None,
            labels: Vec::new(),
        }
    }

    pub fn label(&self, label: &str) -> Option<&AccountLabel> {
        self.labels.iter().find(|l| l.label == label)
    }

    pub fn label_mut(&mut self, label: &str) -> Option<&mut AccountLabel> {
        self.labels.iter_mut().find(|l| l.label == label)
    }

    /// Locators for every label of this login, in registration order
    pub fn locators(&self) -> impl Iterator<Item = AccountLocator> + '_ {
        self.labels
            .iter()
            .map(move |l| AccountLocator::new(self.name.clone(), l.label.clone()))
    }
}

/// A GL account reachable from more than one account label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingConflict {
    pub gl_account: String,
    pub accounts: Vec<AccountLocator>,
}

impl fmt::Display for MappingConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.accounts.iter().map(|a| a.to_string()).collect();
        write!(f, "{} <- {}", self.gl_account, names.join(", "))
    }
}
