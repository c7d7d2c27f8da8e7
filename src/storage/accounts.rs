//! Account registry repository for JSON storage
//!
//! Manages logins, their account labels and the label-to-GL-account mapping
//! in accounts.json. Every call re-reads the file so two processes never act
//! on a stale registry.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PostbookError, PostbookResult};
use crate::models::{AccountLabel, AccountLocator, Login, MappingConflict};

use super::file_io::{read_json, write_json_atomic};

/// Serializable registry data structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AccountData {
    #[serde(default)]
    logins: Vec<Login>,
}

/// Repository for the account registry
pub struct AccountRepository {
    path: PathBuf,
}

impl AccountRepository {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn load(&self) -> PostbookResult<AccountData> {
        read_json(&self.path)
    }

    fn save(&self, data: &AccountData) -> PostbookResult<()> {
        write_json_atomic(&self.path, data)
    }

    /// All logins in registration order
    pub fn get_all(&self) -> PostbookResult<Vec<Login>> {
        Ok(self.load()?.logins)
    }

    pub fn get(&self, login: &str) -> PostbookResult<Option<Login>> {
        Ok(self.load()?.logins.into_iter().find(|l| l.name == login))
    }

    /// Every registered (login, label) pair in registration order
    pub fn locators(&self) -> PostbookResult<Vec<AccountLocator>> {
        Ok(self
            .load()?
            .logins
            .iter()
            .flat_map(|l| l.locators())
            .collect())
    }

    /// Look up a label, failing `NotFound` when either part is unknown
    pub fn label(&self, account: &AccountLocator) -> PostbookResult<AccountLabel> {
        let login = self
            .get(&account.login)?
            .ok_or_else(|| PostbookError::account_not_found(&account.login))?;
        login
            .label(&account.label)
            .cloned()
            .ok_or_else(|| PostbookError::account_not_found(account.to_string()))
    }

    /// Register a login, or update the extension of an existing one
    pub fn add_login(&self, name: &str, extension: Option<String>) -> PostbookResult<Login> {
        if name.trim().is_empty() {
            return Err(PostbookError::Validation("Login name cannot be empty".into()));
        }

        let mut data = self.load()?;
        let login = match data.logins.iter_mut().find(|l| l.name == name) {
            Some(existing) => {
                if extension.is_some() {
                    existing.extension = extension;
                }
                existing.clone()
            }
            None => {
                let mut login = Login::new(name);
                login.extension = extension;
                data.logins.push(login.clone());
                login
            }
        };
        self.save(&data)?;
        Ok(login)
    }

    /// Register a label under an existing login; re-adding is a no-op
    pub fn add_label(&self, account: &AccountLocator) -> PostbookResult<()> {
        if account.label.trim().is_empty() {
            return Err(PostbookError::Validation("Account label cannot be empty".into()));
        }

        let mut data = self.load()?;
        let login = data
            .logins
            .iter_mut()
            .find(|l| l.name == account.login)
            .ok_or_else(|| PostbookError::account_not_found(&account.login))?;
        if login.label(&account.label).is_none() {
            login.labels.push(AccountLabel::new(account.label.clone()));
            self.save(&data)?;
        }
        Ok(())
    }

    /// Map a label to a GL account, returning the previous mapping
    ///
    /// Mapping onto a GL account that another label already uses is allowed
    /// here; the resulting conflict is reported by [`Self::conflicts`] and
    /// blocks posting for every label involved.
    pub fn map_account(
        &self,
        account: &AccountLocator,
        gl_account: &str,
    ) -> PostbookResult<Option<String>> {
        let gl_account = gl_account.trim();
        if gl_account.is_empty() {
            return Err(PostbookError::Validation("GL account cannot be blank".into()));
        }
        self.update_mapping(account, Some(gl_account.to_string()))
    }

    pub fn unmap_account(&self, account: &AccountLocator) -> PostbookResult<Option<String>> {
        self.update_mapping(account, None)
    }

    fn update_mapping(
        &self,
        account: &AccountLocator,
        gl_account: Option<String>,
    ) -> PostbookResult<Option<String>> {
        let mut data = self.load()?;
        let label = data
            .logins
            .iter_mut()
            .find(|l| l.name == account.login)
            .and_then(|l| l.label_mut(&account.label))
            .ok_or_else(|| PostbookError::account_not_found(account.to_string()))?;

        let previous = std::mem::replace(&mut label.gl_account, gl_account);
        self.save(&data)?;
        Ok(previous)
    }

    /// GL accounts reachable from more than one label
    pub fn conflicts(&self) -> PostbookResult<Vec<MappingConflict>> {
        Ok(conflicts_in(&self.load()?.logins))
    }

    /// The GL account a label posts to
    ///
    /// Fails `Validation` when the label is unmapped and `Conflict` when its
    /// GL account is shared with another label.
    pub fn resolve_gl_account(&self, account: &AccountLocator) -> PostbookResult<String> {
        let logins = self.load()?.logins;
        let gl_account = logins
            .iter()
            .find(|l| l.name == account.login)
            .and_then(|l| l.label(&account.label))
            .ok_or_else(|| PostbookError::account_not_found(account.to_string()))?
            .gl_account
            .clone()
            .ok_or_else(|| {
                PostbookError::Validation(format!("{} is not mapped to a GL account", account))
            })?;

        if let Some(conflict) = conflicts_in(&logins)
            .into_iter()
            .find(|c| c.gl_account == gl_account)
        {
            return Err(PostbookError::Conflict {
                gl_account,
                accounts: conflict.accounts.iter().map(|a| a.to_string()).collect(),
            });
        }

        Ok(gl_account)
    }
}

fn conflicts_in(logins: &[Login]) -> Vec<MappingConflict> {
    let mut by_gl: BTreeMap<&str, Vec<AccountLocator>> = BTreeMap::new();
    for login in logins {
        for label in &login.labels {
            if let Some(gl) = &label.gl_account {
                by_gl
                    .entry(gl.as_str())
                    .or_default()
                    .push(AccountLocator::new(login.name.clone(), label.label.clone()));
            }
        }
    }

    by_gl
        .into_iter()
        .filter(|(_, accounts)| accounts.len() > 1)
        .map(|(gl, accounts)| MappingConflict {
            gl_account: gl.to_string(),
            accounts,
        })
        .collect()
}
