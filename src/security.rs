/// Security module
/// Features:
/// - Fixed-window rate limiting backed by the cache (per client IP, per
///   account, per scope)
/// - Security headers (clickjacking, MIME sniffing, CSP, referrer leaks)

use std::sync::Arc;
use std::time::Duration;

use actix_web::middleware::DefaultHeaders;

use crate::cache::{cache_key, CacheStore};
use crate::configuration::RateLimitSettings;
use crate::error::AppError;

/// Fixed-window request counter for one scope.
///
/// The first request in a window creates the counter with the window as its
/// TTL; later requests only increment it, so the window never slides.
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn CacheStore>,
    scope: &'static str,
    limit: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn CacheStore>, scope: &'static str, limit: u64, window: Duration) -> Self {
        Self {
            cache,
            scope,
            limit,
            window,
        }
    }

    /// Counts one request for `subject`.
    ///
    /// # Errors
    /// Returns `AppError::RateLimited` once the window's budget is spent
    pub async fn check(&self, subject: &str) -> Result<(), AppError> {
        let key = cache_key("rate_limit", &[self.scope, subject]);
        let count = self.cache.increment(&key, 1, self.window).await?;

        if count as u64 > self.limit {
            let retry_after_secs = self
                .cache
                .ttl(&key)
                .await?
                .map(|remaining| remaining.as_secs().max(1))
                .unwrap_or_else(|| self.window.as_secs());

            tracing::warn!(
                scope = self.scope,
                subject = subject,
                count,
                limit = self.limit,
                "Rate limit exceeded"
            );
            return Err(AppError::RateLimited { retry_after_secs });
        }

        Ok(())
    }
}

/// The request budgets: every request per client IP, general API use per
/// account, and LLM calls per account.
#[derive(Clone)]
pub struct RateLimiters {
    pub global: RateLimiter,
    pub user: RateLimiter,
    pub llm: RateLimiter,
}

impl RateLimiters {
    pub fn new(cache: Arc<dyn CacheStore>, config: &RateLimitSettings) -> Self {
        Self {
            global: RateLimiter::new(
                cache.clone(),
                "global",
                config.global_requests,
                Duration::from_secs(config.global_window_seconds),
            ),
            user: RateLimiter::new(
                cache.clone(),
                "user",
                config.user_requests,
                Duration::from_secs(config.user_window_seconds),
            ),
            llm: RateLimiter::new(
                cache,
                "llm",
                config.llm_requests,
                Duration::from_secs(config.llm_window_seconds),
            ),
        }
    }
}

/// Security headers for HTTP responses
pub struct SecurityHeaders;

impl SecurityHeaders {
    /// Get security headers to prevent common attacks
    pub fn get_headers() -> Vec<(&'static str, &'static str)> {
        vec![
            ("X-Content-Type-Options", "nosniff"),
            ("X-Frame-Options", "DENY"),
            ("X-XSS-Protection", "1; mode=block"),
            ("Content-Security-Policy", "default-src 'self'"),
            ("Referrer-Policy", "strict-origin-when-cross-origin"),
        ]
    }

    /// `DefaultHeaders` middleware carrying every security header.
    pub fn middleware() -> DefaultHeaders {
        Self::get_headers()
            .into_iter()
            .fold(DefaultHeaders::new(), |headers, header| headers.add(header))
    }
}
