/// Credential store
///
/// Read access to accounts for the authentication pipeline. Accounts are
/// created elsewhere; this module only looks them up.

mod memory;
mod postgres;

use std::fmt;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;

pub use memory::InMemoryCredentialStore;
pub use postgres::PgCredentialStore;

/// A user account as stored by the credential store.
#[derive(Clone, PartialEq, sqlx::FromRow)]
pub struct Account {
    /// Stable public identity, used as the token subject
    pub id: Uuid,
    pub username: String,
    pub email: String,
    /// bcrypt hash, salt included
    pub password_hash: String,
    pub is_active: bool,
    pub is_verified: bool,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .field("is_active", &self.is_active)
            .field("is_verified", &self.is_verified)
            .finish()
    }
}

/// Account lookups used by the authenticator and the request authorizer.
///
/// `Ok(None)` means the account does not exist; `Err` is reserved for store
/// failures.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>, AppError>;

    async fn find_account_by_identity(&self, id: Uuid) -> Result<Option<Account>, AppError>;
}
