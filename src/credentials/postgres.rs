/// Credential store over the `users` table.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{Account, CredentialStore};
use crate::error::AppError;

/// `CredentialStore` backed by the `users` table.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    #[tracing::instrument(name = "find_account_by_username", skip(self))]
    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>, AppError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, username, email, password_hash, is_active, is_verified
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    #[tracing::instrument(name = "find_account_by_identity", skip(self))]
    async fn find_account_by_identity(&self, id: Uuid) -> Result<Option<Account>, AppError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, username, email, password_hash, is_active, is_verified
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }
}
