/// Error Handling Module
///
/// One unified error type for the service, with domain-specific errors
/// underneath it:
/// 1. Authentication errors (single external message, internal reason)
/// 2. Validation, database and configuration errors
/// 3. HTTP response mapping with structured logging
/// 4. Error context enrichment for handlers

use actix_web::{error::ResponseError, http::header, http::StatusCode, HttpResponse};
use thiserror::Error;

use crate::cache::CacheError;
use crate::llm_client::LlmError;

// ============================================================================
// 1. AUTHENTICATION ERRORS
// ============================================================================

/// The only message a caller ever sees for a rejected credential or token.
pub const AUTHENTICATION_FAILED: &str = "Could not validate credentials";

/// Why an authentication attempt was rejected.
///
/// Only ever written to logs. Responses render every variant identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingToken,
    UnknownUser,
    WrongPassword,
    InactiveAccount,
    MalformedPasswordHash,
    TokenRejected,
    WrongTokenClass,
    InvalidSubject,
    AccountNotFound,
}

impl AuthFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFailure::MissingToken => "missing_token",
            AuthFailure::UnknownUser => "unknown_user",
            AuthFailure::WrongPassword => "wrong_password",
            AuthFailure::InactiveAccount => "inactive_account",
            AuthFailure::MalformedPasswordHash => "malformed_password_hash",
            AuthFailure::TokenRejected => "token_rejected",
            AuthFailure::WrongTokenClass => "wrong_token_class",
            AuthFailure::InvalidSubject => "invalid_subject",
            AuthFailure::AccountNotFound => "account_not_found",
        }
    }
}

/// Rejection of a username/password pair or a bearer token.
#[derive(Debug, Error)]
#[error("Could not validate credentials")]
pub struct AuthenticationError {
    reason: AuthFailure,
}

impl AuthenticationError {
    pub fn new(reason: AuthFailure) -> Self {
        Self { reason }
    }

    pub fn reason(&self) -> AuthFailure {
        self.reason
    }
}

// ============================================================================
// 2. DOMAIN-SPECIFIC ERROR TYPES
// ============================================================================

/// Validation errors for input data
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("{0} is empty")]
    EmptyField(String),
    #[error("{0} is too short (minimum {1} characters)")]
    TooShort(String, usize),
    #[error("{0} is too long (maximum {1} characters)")]
    TooLong(String, usize),
    #[error("{0} has invalid format")]
    InvalidFormat(String),
    #[error("{0} contains suspicious content")]
    SuspiciousContent(String),
    #[error("{0} is out of range")]
    OutOfRange(String),
}

/// Database operation errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionPool(String),
    #[error("Query error: {0}")]
    QueryExecution(String),
}

/// Configuration errors. Fatal at startup, never produced at runtime.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config load error: {0}")]
    Load(#[from] config::ConfigError),
    #[error("jwt.secret must be at least {min} characters (got {actual})")]
    SecretTooShort { min: usize, actual: usize },
    #[error("jwt.algorithm {0} is not a supported HMAC algorithm")]
    UnsupportedAlgorithm(String),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

// ============================================================================
// 3. UNIFIED APPLICATION ERROR TYPE
// ============================================================================

/// Central error type that all runtime errors map to
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Auth(#[from] AuthenticationError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn auth(reason: AuthFailure) -> Self {
        AppError::Auth(AuthenticationError::new(reason))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::Database(DatabaseError::ConnectionPool(err.to_string()))
            }
            other => AppError::Database(DatabaseError::QueryExecution(other.to_string())),
        }
    }
}

// ============================================================================
// 4. HTTP RESPONSE MAPPING
// ============================================================================

/// Error response structure for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Human-readable error message
    pub message: String,
    /// Error code for client-side handling
    pub code: String,
    /// HTTP status code
    pub status: u16,
    /// Timestamp when error occurred
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_id: String, message: String, code: String, status: u16) -> Self {
        Self {
            error_id,
            message,
            code,
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Converting errors to HTTP responses with proper logging
pub trait ErrorHandler {
    fn error_response(&self, error_id: &str) -> (StatusCode, ErrorResponse);
    fn log_error(&self, error_id: &str);
}

impl ErrorHandler for AppError {
    fn error_response(&self, error_id: &str) -> (StatusCode, ErrorResponse) {
        let status = ResponseError::status_code(self);
        let (code, message) = match self {
            AppError::Validation(e) => ("VALIDATION_ERROR".to_string(), e.to_string()),
            AppError::Database(DatabaseError::ConnectionPool(_)) => (
                "SERVICE_UNAVAILABLE".to_string(),
                "Database service temporarily unavailable".to_string(),
            ),
            AppError::Database(_) => (
                "DATABASE_ERROR".to_string(),
                "Database error occurred".to_string(),
            ),
            AppError::Auth(_) => (
                "AUTHENTICATION_ERROR".to_string(),
                AUTHENTICATION_FAILED.to_string(),
            ),
            AppError::Llm(e) => (e.code().to_string(), e.to_string()),
            AppError::Cache(_) | AppError::Internal(_) => (
                "INTERNAL_ERROR".to_string(),
                "Internal server error".to_string(),
            ),
            AppError::RateLimited { .. } => ("RATE_LIMITED".to_string(), self.to_string()),
            AppError::NotFound(_) => ("NOT_FOUND".to_string(), self.to_string()),
        };

        let error_response =
            ErrorResponse::new(error_id.to_string(), message, code, status.as_u16());

        (status, error_response)
    }

    fn log_error(&self, error_id: &str) {
        match self {
            AppError::Validation(e) => {
                tracing::warn!(error_id = error_id, error = %e, "Validation error");
            }
            AppError::Auth(e) => {
                tracing::warn!(
                    error_id = error_id,
                    reason = e.reason().as_str(),
                    "Authentication rejected"
                );
            }
            AppError::RateLimited { retry_after_secs } => {
                tracing::warn!(error_id = error_id, retry_after_secs, "Rate limit exceeded");
            }
            AppError::NotFound(what) => {
                tracing::info!(error_id = error_id, what = %what, "Resource not found");
            }
            AppError::Llm(e) => {
                tracing::error!(error_id = error_id, error = %e, "LLM upstream error");
            }
            AppError::Database(e) => {
                tracing::error!(error_id = error_id, error = %e, "Database error");
            }
            AppError::Cache(e) => {
                tracing::error!(error_id = error_id, error = %e, "Cache error");
            }
            AppError::Internal(msg) => {
                tracing::error!(error_id = error_id, error = %msg, "Internal error");
            }
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let error_id = uuid::Uuid::new_v4().to_string();
        self.log_error(&error_id);

        let (status, body) = <Self as ErrorHandler>::error_response(self, &error_id);

        let mut builder = HttpResponse::build(status);
        match self {
            AppError::Auth(_) => {
                builder.insert_header((header::WWW_AUTHENTICATE, "Bearer"));
            }
            AppError::RateLimited { retry_after_secs } => {
                builder.insert_header((header::RETRY_AFTER, retry_after_secs.to_string()));
            }
            AppError::Llm(LlmError::RateLimited {
                retry_after: Some(retry_after),
            }) => {
                builder.insert_header((header::RETRY_AFTER, retry_after.clone()));
            }
            _ => {}
        }
        builder.json(body)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Database(DatabaseError::ConnectionPool(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Llm(e) => e.status_code(),
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Cache(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ============================================================================
// 5. ERROR CONTEXT ENRICHMENT
// ============================================================================

/// Per-operation context for handler logging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: String,
    pub user_id: Option<String>,
    pub operation: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            operation: operation.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_user_id(mut self, user_id: String) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn log_error(&self, error: &AppError) {
        match error {
            AppError::Validation(_) | AppError::Auth(_) | AppError::RateLimited { .. } => {
                tracing::warn!(
                    request_id = %self.request_id,
                    operation = %self.operation,
                    user_id = ?self.user_id,
                    error = %error,
                    "Operation rejected"
                );
            }
            _ => {
                tracing::error!(
                    request_id = %self.request_id,
                    operation = %self.operation,
                    user_id = ?self.user_id,
                    error = %error,
                    "Operation failed"
                );
            }
        }
    }
}
