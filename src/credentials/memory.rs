/// In-memory credential store, for tests and local development.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use super::{Account, CredentialStore};
use crate::auth::hash_password;
use crate::error::AppError;

/// `CredentialStore` held in process memory, keyed by username.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    accounts: RwLock<HashMap<String, Account>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the account with the same username.
    pub fn insert(&self, account: Account) -> Result<(), AppError> {
        self.accounts
            .write()
            .map_err(|_| AppError::Internal("credential store lock poisoned".to_string()))?
            .insert(account.username.clone(), account);
        Ok(())
    }

    /// Hashes `password` and stores a new active account.
    pub fn add_account(&self, username: &str, email: &str, password: &str) -> Result<Account, AppError> {
        let account = Account {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: hash_password(password)?,
            is_active: true,
            is_verified: false,
        };
        self.insert(account.clone())?;
        Ok(account)
    }

    /// Removes the account and returns it, if present.
    pub fn remove(&self, username: &str) -> Result<Option<Account>, AppError> {
        Ok(self
            .accounts
            .write()
            .map_err(|_| AppError::Internal("credential store lock poisoned".to_string()))?
            .remove(username))
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>, AppError> {
        let accounts = self
            .accounts
            .read()
            .map_err(|_| AppError::Internal("credential store lock poisoned".to_string()))?;
        Ok(accounts.get(username).cloned())
    }

    async fn find_account_by_identity(&self, id: Uuid) -> Result<Option<Account>, AppError> {
        let accounts = self
            .accounts
            .read()
            .map_err(|_| AppError::Internal("credential store lock poisoned".to_string()))?;
        Ok(accounts.values().find(|account| account.id == id).cloned())
    }
}
