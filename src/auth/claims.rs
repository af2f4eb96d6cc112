/// JWT Claims structure
///
/// The payload of every token this service signs: standard JWT claims
/// (RFC 7519) plus the token class and any custom claims the issuer adds.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Claim names owned by the codec. Custom claims may not override them.
pub const RESERVED_CLAIMS: [&str; 7] = ["sub", "token_type", "iss", "aud", "exp", "iat", "jti"];

/// Which half of a token pair a token is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenClass {
    Access,
    Refresh,
}

/// Caller-supplied part of a claim set.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimSet {
    /// Subject (stable account identity)
    pub sub: String,
    pub token_type: TokenClass,
    /// Custom claims
    pub extra: Map<String, Value>,
}

impl ClaimSet {
    pub fn new(sub: impl Into<String>, token_type: TokenClass) -> Self {
        Self {
            sub: sub.into(),
            token_type,
            extra: Map::new(),
        }
    }

    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }
}

/// Full claim set carried by a signed token.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    /// Subject (account UUID string)
    pub sub: String,
    pub token_type: TokenClass,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
    /// Expiration time (Unix timestamp, exclusive)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Token identifier
    pub jti: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Merges `claims` with the standard claims for a token issued `now`.
    pub(crate) fn build(
        claims: ClaimSet,
        issuer: &str,
        audience: &str,
        now: i64,
        ttl_seconds: i64,
    ) -> Self {
        let mut extra = claims.extra;
        for name in RESERVED_CLAIMS {
            extra.remove(name);
        }

        Self {
            sub: claims.sub,
            token_type: claims.token_type,
            iss: issuer.to_string(),
            aud: audience.to_string(),
            exp: now + ttl_seconds,
            iat: now,
            jti: Uuid::new_v4().to_string(),
            extra,
        }
    }

    /// The caller-supplied part of these claims.
    pub fn claim_set(&self) -> ClaimSet {
        ClaimSet {
            sub: self.sub.clone(),
            token_type: self.token_type,
            extra: self.extra.clone(),
        }
    }

    /// Parses the subject as an account identity.
    pub fn subject_id(&self) -> Option<Uuid> {
        if self.sub.is_empty() {
            return None;
        }
        Uuid::parse_str(&self.sub).ok()
    }

    /// Expiry is exclusive: at `exp` itself the token is already expired.
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.exp
    }
}
