/// Authentication Routes
///
/// Handles login, token refresh, and current user information.

use actix_web::{web, Either, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::Authenticator;
use crate::credentials::Account;
use crate::error::{AppError, ErrorContext};
use crate::security::RateLimiters;
use crate::validators::{is_valid_password_input, is_valid_username};

/// Login request, accepted as JSON or as an OAuth2 password form
#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Token refresh request
#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Authentication response with access and refresh tokens
#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

/// User information response
#[derive(Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub is_verified: bool,
}

/// POST /auth/token
///
/// Authenticate with username and password.
/// Returns access token and refresh token on success.
///
/// # Errors
/// - 400: Validation error (malformed username, oversized password)
/// - 401: Could not validate credentials
/// - 500: Internal server error
///
/// # Security Notes
/// - Unknown user, wrong password and inactive account share one response
pub async fn login(
    body: Either<web::Json<LoginRequest>, web::Form<LoginRequest>>,
    authenticator: web::Data<Authenticator>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");
    let request = match body {
        Either::Left(json) => json.into_inner(),
        Either::Right(form) => form.into_inner(),
    };

    let username = is_valid_username(&request.username)?;
    is_valid_password_input(&request.password)?;

    let pair = authenticator
        .login(&username, &request.password)
        .await
        .map_err(|e| {
            context.log_error(&e);
            e
        })?;

    tracing::info!(request_id = %context.request_id, "User logged in successfully");

    Ok(HttpResponse::Ok().json(TokenResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        token_type: "bearer",
        expires_in: pair.expires_in,
    }))
}

/// POST /auth/refresh
///
/// Exchange a refresh token for a new access token. The refresh token is
/// returned unchanged.
///
/// # Errors
/// - 401: Token invalid, expired, or not a refresh token
pub async fn refresh_token(
    body: web::Json<RefreshRequest>,
    authenticator: web::Data<Authenticator>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_refresh");
    let RefreshRequest { refresh_token } = body.into_inner();

    let access_token = authenticator.refresh(&refresh_token).map_err(|e| {
        context.log_error(&e);
        e
    })?;

    tracing::info!(request_id = %context.request_id, "Access token refreshed");

    Ok(HttpResponse::Ok().json(TokenResponse {
        access_token,
        refresh_token,
        token_type: "bearer",
        expires_in: authenticator.access_ttl().num_seconds(),
    }))
}

/// GET /users/me
///
/// Get current authenticated user information.
/// Requires valid access token in the Authorization header.
///
/// # Errors
/// - 401: Missing or invalid token
/// - 429: User request budget exhausted
pub async fn me(
    account: web::ReqData<Account>,
    limiters: web::Data<RateLimiters>,
) -> Result<HttpResponse, AppError> {
    let account = account.into_inner();
    let context = ErrorContext::new("get_current_user").with_user_id(account.id.to_string());

    limiters.user.check(&account.id.to_string()).await.map_err(|e| {
        context.log_error(&e);
        e
    })?;

    Ok(HttpResponse::Ok().json(UserResponse {
        id: account.id.to_string(),
        username: account.username,
        email: account.email,
        is_verified: account.is_verified,
    }))
}
