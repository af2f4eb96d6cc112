/// Request Authorizer
///
/// Resolves the bearer token of an incoming request to a live account.

use std::sync::Arc;

use crate::auth::claims::TokenClass;
use crate::auth::jwt::TokenCodec;
use crate::credentials::{Account, CredentialStore};
use crate::error::{AppError, AuthFailure};

/// Resolves a bearer token to the account it was issued for.
///
/// Holds no mutable state; one instance serves every request.
pub struct RequestAuthorizer {
    codec: Arc<TokenCodec>,
    store: Arc<dyn CredentialStore>,
}

impl RequestAuthorizer {
    pub fn new(codec: Arc<TokenCodec>, store: Arc<dyn CredentialStore>) -> Self {
        Self { codec, store }
    }

    /// # Errors
    /// Returns `AppError::Auth` if the token is invalid, is not an access
    /// token, names a malformed subject, or the account is gone or inactive
    pub async fn authorize(&self, token: &str) -> Result<Account, AppError> {
        let claims = self
            .codec
            .decode(token)
            .map_err(|_| AppError::auth(AuthFailure::TokenRejected))?;

        if claims.token_type != TokenClass::Access {
            return Err(AppError::auth(AuthFailure::WrongTokenClass));
        }

        let account_id = claims
            .subject_id()
            .ok_or_else(|| AppError::auth(AuthFailure::InvalidSubject))?;

        let account = self
            .store
            .find_account_by_identity(account_id)
            .await?
            .ok_or_else(|| AppError::auth(AuthFailure::AccountNotFound))?;

        if !account.is_active {
            return Err(AppError::auth(AuthFailure::InactiveAccount));
        }

        Ok(account)
    }
}
