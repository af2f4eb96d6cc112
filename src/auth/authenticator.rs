/// Authenticator
///
/// Username/password login and refresh-token exchange. Every rejection
/// carries an internal `AuthFailure` reason but renders identically.

use std::sync::Arc;

use crate::auth::claims::{ClaimSet, TokenClass};
use crate::auth::jwt::TokenCodec;
use crate::auth::password::{hash_password, verify_password, PasswordCheck};
use crate::configuration::JwtSettings;
use crate::credentials::CredentialStore;
use crate::error::{AppError, AuthFailure};

/// Access and refresh token issued together on login.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Turns a username/password pair into tokens, and refresh tokens into
/// fresh access tokens.
pub struct Authenticator {
    codec: Arc<TokenCodec>,
    store: Arc<dyn CredentialStore>,
    access_ttl: chrono::Duration,
    refresh_ttl: chrono::Duration,
    dummy_hash: String,
}

impl Authenticator {
    /// # Errors
    /// Returns error if the timing-equalization hash cannot be computed
    pub fn new(
        codec: Arc<TokenCodec>,
        store: Arc<dyn CredentialStore>,
        config: &JwtSettings,
    ) -> Result<Self, AppError> {
        Ok(Self {
            codec,
            store,
            access_ttl: chrono::Duration::seconds(config.access_token_expiry),
            refresh_ttl: chrono::Duration::seconds(config.refresh_token_expiry),
            dummy_hash: hash_password("not-a-real-account-password")?,
        })
    }

    pub fn access_ttl(&self) -> chrono::Duration {
        self.access_ttl
    }

    /// Verifies the credentials and issues a token pair whose subject is the
    /// account id.
    ///
    /// # Errors
    /// Returns `AppError::Auth` for an unknown user, a wrong password, an
    /// unusable stored hash or an inactive account. Store failures pass through.
    #[tracing::instrument(name = "login", skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair, AppError> {
        let account = match self.store.find_account_by_username(username).await? {
            Some(account) => account,
            None => {
                verify_password(password, &self.dummy_hash).await?;
                return Err(AppError::auth(AuthFailure::UnknownUser));
            }
        };

        match verify_password(password, &account.password_hash).await? {
            PasswordCheck::Match => {}
            PasswordCheck::Mismatch => return Err(AppError::auth(AuthFailure::WrongPassword)),
            PasswordCheck::MalformedHash => {
                return Err(AppError::auth(AuthFailure::MalformedPasswordHash))
            }
        }

        if !account.is_active {
            return Err(AppError::auth(AuthFailure::InactiveAccount));
        }

        let subject = account.id.to_string();
        let access_token = self
            .codec
            .issue(ClaimSet::new(subject.clone(), TokenClass::Access), self.access_ttl)?;
        let refresh_token = self
            .codec
            .issue(ClaimSet::new(subject, TokenClass::Refresh), self.refresh_ttl)?;

        tracing::info!(user_id = %account.id, "Issued token pair");

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    /// Issues a new access token carrying the refresh token's subject and
    /// custom claims. The account is not looked up again.
    ///
    /// # Errors
    /// Returns `AppError::Auth` if the token is invalid or is not a refresh token
    pub fn refresh(&self, refresh_token: &str) -> Result<String, AppError> {
        let claims = self
            .codec
            .decode(refresh_token)
            .map_err(|_| AppError::auth(AuthFailure::TokenRejected))?;

        if claims.token_type != TokenClass::Refresh {
            return Err(AppError::auth(AuthFailure::WrongTokenClass));
        }

        let mut access = claims.claim_set();
        access.token_type = TokenClass::Access;

        self.codec.issue(access, self.access_ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Account, InMemoryCredentialStore};
    use crate::error::AUTHENTICATION_FAILED;
    use uuid::Uuid;

    fn jwt_settings() -> JwtSettings {
        JwtSettings {
            secret: "x".repeat(32),
            algorithm: "HS256".to_string(),
            issuer: "app".to_string(),
            audience: "users".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 604800,
        }
    }

    struct TestAuth {
        codec: Arc<TokenCodec>,
        store: Arc<InMemoryCredentialStore>,
        authenticator: Authenticator,
    }

    fn setup() -> TestAuth {
        let settings = jwt_settings();
        let codec = Arc::new(TokenCodec::new(&settings).unwrap());
        let store = Arc::new(InMemoryCredentialStore::new());
        let authenticator = Authenticator::new(codec.clone(), store.clone(), &settings).unwrap();
        TestAuth {
            codec,
            store,
            authenticator,
        }
    }

    #[tokio::test]
    async fn test_login_issues_access_and_refresh_tokens() {
        let t = setup();
        let alice = t
            .store
            .add_account("alice", "alice@example.com", "correct-pw")
            .unwrap();

        let pair = t.authenticator.login("alice", "correct-pw").await.unwrap();
        assert_eq!(pair.expires_in, 900);

        let access = t.codec.decode(&pair.access_token).unwrap();
        assert_eq!(access.sub, alice.id.to_string());
        assert_eq!(access.token_type, TokenClass::Access);
        assert_eq!(access.exp - access.iat, 900);

        let refresh = t.codec.decode(&pair.refresh_token).unwrap();
        assert_eq!(refresh.sub, alice.id.to_string());
        assert_eq!(refresh.token_type, TokenClass::Refresh);
        assert_eq!(refresh.exp - refresh.iat, 604800);
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let t = setup();
        t.store
            .add_account("alice", "alice@example.com", "correct-pw")
            .unwrap();
        t.store
            .insert(Account {
                id: Uuid::new_v4(),
                username: "dormant".to_string(),
                email: "dormant@example.com".to_string(),
                password_hash: hash_password("correct-pw").unwrap(),
                is_active: false,
                is_verified: true,
            })
            .unwrap();

        let attempts = [
            ("alice", "wrong-pw", AuthFailure::WrongPassword),
            ("nobody", "correct-pw", AuthFailure::UnknownUser),
            ("dormant", "correct-pw", AuthFailure::InactiveAccount),
        ];

        for (username, password, expected) in attempts {
            match t.authenticator.login(username, password).await {
                Err(AppError::Auth(e)) => {
                    assert_eq!(e.to_string(), AUTHENTICATION_FAILED);
                    assert_eq!(e.reason(), expected);
                }
                other => panic!("Expected authentication error, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_malformed_stored_hash_is_an_authentication_error() {
        let t = setup();
        t.store
            .insert(Account {
                id: Uuid::new_v4(),
                username: "broken".to_string(),
                email: "broken@example.com".to_string(),
                password_hash: "plaintext".to_string(),
                is_active: true,
                is_verified: false,
            })
            .unwrap();

        match t.authenticator.login("broken", "plaintext").await {
            Err(AppError::Auth(e)) => assert_eq!(e.reason(), AuthFailure::MalformedPasswordHash),
            other => panic!("Expected authentication error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refresh_issues_later_access_token() {
        let t = setup();
        t.store
            .add_account("alice", "alice@example.com", "correct-pw")
            .unwrap();
        let pair = t.authenticator.login("alice", "correct-pw").await.unwrap();
        let original = t.codec.decode(&pair.access_token).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        let refreshed = t.authenticator.refresh(&pair.refresh_token).unwrap();
        let claims = t.codec.decode(&refreshed).unwrap();

        assert_eq!(claims.sub, original.sub);
        assert_eq!(claims.token_type, TokenClass::Access);
        assert!(claims.exp > original.exp);
    }

    #[test]
    fn test_refresh_keeps_custom_claims() {
        let t = setup();
        let refresh_token = t
            .codec
            .issue(
                ClaimSet::new(Uuid::new_v4().to_string(), TokenClass::Refresh)
                    .with_claim("scope", "prompts:write"),
                chrono::Duration::hours(1),
            )
            .unwrap();

        let refreshed = t.authenticator.refresh(&refresh_token).unwrap();
        let claims = t.codec.decode(&refreshed).unwrap();

        assert_eq!(claims.extra["scope"], "prompts:write");
    }

    #[tokio::test]
    async fn test_access_token_cannot_refresh() {
        let t = setup();
        t.store
            .add_account("alice", "alice@example.com", "correct-pw")
            .unwrap();
        let pair = t.authenticator.login("alice", "correct-pw").await.unwrap();

        match t.authenticator.refresh(&pair.access_token) {
            Err(AppError::Auth(e)) => assert_eq!(e.reason(), AuthFailure::WrongTokenClass),
            other => panic!("Expected authentication error, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_refresh_token_is_rejected() {
        let t = setup();
        match t.authenticator.refresh("not-a-token") {
            Err(AppError::Auth(e)) => assert_eq!(e.reason(), AuthFailure::TokenRejected),
            other => panic!("Expected authentication error, got {:?}", other),
        }
    }
}
