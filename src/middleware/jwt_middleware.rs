/// Bearer Authentication Middleware
///
/// Resolves the bearer token from the Authorization header to an account
/// and injects it into request extensions for route handlers
/// (`web::ReqData<Account>`).

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use std::sync::Arc;

use crate::auth::RequestAuthorizer;
use crate::credentials::Account;
use crate::error::{AppError, AuthFailure};

/// Bearer-token guard for protected resources.
pub struct BearerAuth {
    authorizer: Arc<RequestAuthorizer>,
}

impl BearerAuth {
    pub fn new(authorizer: Arc<RequestAuthorizer>) -> Self {
        Self { authorizer }
    }
}

impl<S, B> Transform<S, ServiceRequest> for BearerAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = BearerAuthService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(BearerAuthService {
            service: Rc::new(service),
            authorizer: self.authorizer.clone(),
        }))
    }
}

pub struct BearerAuthService<S> {
    service: Rc<S>,
    authorizer: Arc<RequestAuthorizer>,
}

impl<S, B> Service<ServiceRequest> for BearerAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_string);

        let service = self.service.clone();
        let authorizer = self.authorizer.clone();

        Box::pin(async move {
            match authenticate(&authorizer, token).await {
                Ok(account) => {
                    tracing::debug!(user_id = %account.id, "Bearer token accepted");
                    req.extensions_mut().insert(account);

                    service
                        .call(req)
                        .await
                        .map(ServiceResponse::map_into_left_body)
                }
                // Rendered here so outer middleware still sees a response.
                Err(e) => Ok(req.error_response(e).map_into_right_body()),
            }
        })
    }
}

async fn authenticate(
    authorizer: &RequestAuthorizer,
    token: Option<String>,
) -> Result<Account, AppError> {
    let token = token.ok_or_else(|| AppError::auth(AuthFailure::MissingToken))?;
    authorizer.authorize(&token).await
}

/// Extracts the credentials from an `Authorization: Bearer <token>` value.
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer   abc  "), Some("abc"));
    }

    #[test]
    fn test_non_bearer_values_are_ignored() {
        assert_eq!(bearer_token("Basic dXNlcjpwdw=="), None);
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token("Bearer    "), None);
        assert_eq!(bearer_token(""), None);
    }
}
