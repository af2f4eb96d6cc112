/// JWT Token Codec
///
/// Signs and verifies claim sets with the configured HMAC secret. Every
/// verification failure collapses into one `InvalidTokenError`; the specific
/// cause is only logged.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use crate::auth::claims::{ClaimSet, Claims};
use crate::configuration::JwtSettings;
use crate::error::{AppError, ConfigError};

/// A token failed signature, algorithm, issuer, audience or expiry checks.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid token")]
pub struct InvalidTokenError;

/// Read-only signing configuration, built once at startup.
#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
}

impl TokenCodec {
    /// # Errors
    /// Returns error if the secret is too short or the algorithm is not HMAC
    pub fn new(config: &JwtSettings) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            algorithm: config.signing_algorithm()?,
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
        })
    }

    /// Signs `claims` merged with expiry, issued-at, token id, issuer and
    /// audience.
    ///
    /// # Errors
    /// Returns error if the claims cannot be serialized
    pub fn issue(&self, claims: ClaimSet, ttl: chrono::Duration) -> Result<String, AppError> {
        self.issue_at(claims, ttl, chrono::Utc::now().timestamp())
    }

    pub(crate) fn issue_at(
        &self,
        claims: ClaimSet,
        ttl: chrono::Duration,
        now: i64,
    ) -> Result<String, AppError> {
        let claims = Claims::build(claims, &self.issuer, &self.audience, now, ttl.num_seconds());

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Verifies signature, algorithm, issuer, audience and expiry together.
    ///
    /// # Errors
    /// Returns `InvalidTokenError` if any single check fails
    pub fn decode(&self, token: &str) -> Result<Claims, InvalidTokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("JWT validation error: {}", e);
                InvalidTokenError
            })?;

        // jsonwebtoken accepts a token at exactly `exp`; expiry here is exclusive.
        if claims.is_expired_at(chrono::Utc::now().timestamp()) {
            tracing::debug!(exp = claims.exp, "JWT validation error: token expired");
            return Err(InvalidTokenError);
        }

        Ok(claims)
    }
}
