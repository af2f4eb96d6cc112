/// Password Hashing and Verification
///
/// bcrypt hashing. Verification runs on the blocking thread pool because a
/// bcrypt comparison takes tens of milliseconds of CPU.

use bcrypt::{hash, verify, DEFAULT_COST};

use crate::error::{AppError, ValidationError};

/// bcrypt ignores everything after 72 bytes.
const MAX_PASSWORD_BYTES: usize = 72;

/// Hash a password using bcrypt
///
/// # Errors
/// Returns error if:
/// - Password is empty or longer than bcrypt can use
/// - Bcrypt hashing fails
pub fn hash_password(password: &str) -> Result<String, AppError> {
    if password.is_empty() {
        return Err(ValidationError::EmptyField("password".to_string()).into());
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(ValidationError::TooLong("password".to_string(), MAX_PASSWORD_BYTES).into());
    }

    hash(password, DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Outcome of comparing a password with a stored hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordCheck {
    Match,
    Mismatch,
    /// The stored hash is not a bcrypt hash
    MalformedHash,
}

/// Verify a password against its hash, off the async executor.
///
/// # Errors
/// Returns error only if the blocking task could not run
pub async fn verify_password(password: &str, password_hash: &str) -> Result<PasswordCheck, AppError> {
    let password = password.to_string();
    let password_hash = password_hash.to_string();

    tokio::task::spawn_blocking(move || match verify(password, &password_hash) {
        Ok(true) => PasswordCheck::Match,
        Ok(false) => PasswordCheck::Mismatch,
        Err(e) => {
            tracing::error!("Stored password hash could not be parsed: {}", e);
            PasswordCheck::MalformedHash
        }
    })
    .await
    .map_err(|e| AppError::Internal(format!("Password verification task failed: {}", e)))
}
