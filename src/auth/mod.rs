/// Authentication module
///
/// Token signing and verification, password hashing, credential login
/// and per-request bearer authorization.

mod authenticator;
mod authorizer;
mod claims;
mod jwt;
mod password;

pub use authenticator::{Authenticator, TokenPair};
pub use authorizer::RequestAuthorizer;
pub use claims::{ClaimSet, Claims, TokenClass};
pub use jwt::{InvalidTokenError, TokenCodec};
pub use password::{hash_password, verify_password, PasswordCheck};
