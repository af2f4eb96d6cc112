/// Middleware module
///
/// Bearer authentication for protected resources and the per-client
/// request budget.

mod jwt_middleware;
mod rate_limit;

pub use jwt_middleware::BearerAuth;
pub use rate_limit::ClientRateLimit;
