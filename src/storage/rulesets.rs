//! Extraction ruleset repository
//!
//! Rulesets are hand-edited, so they live in `rulesets.yaml` as a map from
//! ruleset name to [`Ruleset`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{PostbookError, PostbookResult};
use crate::models::{Login, Ruleset};

use super::file_io::{read_yaml, write_yaml_atomic};

pub struct RulesetRepository {
    path: PathBuf,
}

impl RulesetRepository {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn get_all(&self) -> PostbookResult<BTreeMap<String, Ruleset>> {
        read_yaml(&self.path)
    }

    pub fn get(&self, name: &str) -> PostbookResult<Option<Ruleset>> {
        Ok(self.get_all()?.remove(name))
    }

    /// Insert or replace a named ruleset
    pub fn upsert(&self, name: &str, ruleset: Ruleset) -> PostbookResult<()> {
        ruleset
            .validate()
            .map_err(|e| PostbookError::Validation(format!("Ruleset '{}': {}", name, e)))?;
        let mut all = self.get_all()?;
        all.insert(name.to_string(), ruleset);
        write_yaml_atomic(&self.path, &all)
    }

    /// The ruleset bound to a login
    ///
    /// Fails `ExtensionMissing` when the login names no ruleset or names one
    /// that is not defined.
    pub fn for_login(&self, login: &Login) -> PostbookResult<Ruleset> {
        let name = login
            .extension
            .as_deref()
            .ok_or_else(|| PostbookError::ExtensionMissing(login.name.clone()))?;
        let ruleset = self.get(name)?.ok_or_else(|| {
            PostbookError::ExtensionMissing(format!("{} (ruleset '{}' is not defined)", login.name, name))
        })?;
        ruleset
            .validate()
            .map_err(|e| PostbookError::Validation(format!("Ruleset '{}': {}", name, e)))?;
        Ok(ruleset)
    }
}
