/// Client Rate Limit Middleware
///
/// One request budget per client IP across every route, so unauthenticated
/// endpoints such as login are limited too.

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::security::RateLimiter;

/// Bucket for requests whose peer address is unknown.
const UNKNOWN_CLIENT: &str = "unknown";

pub struct ClientRateLimit {
    limiter: RateLimiter,
}

impl ClientRateLimit {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ClientRateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = ClientRateLimitService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(ClientRateLimitService {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
        }))
    }
}

pub struct ClientRateLimitService<S> {
    service: Rc<S>,
    limiter: RateLimiter,
}

impl<S, B> Service<ServiceRequest> for ClientRateLimitService<S>
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
        // The port changes per connection and forwarding headers are client
        // controlled, so only the peer IP identifies the client.
        let client = req
            .peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

        let service = self.service.clone();
        let limiter = self.limiter.clone();

        Box::pin(async move {
            if let Err(e) = limiter.check(&client).await {
                return Ok(req.error_response(e).map_into_right_body());
            }

            service
                .call(req)
                .await
                .map(ServiceResponse::map_into_left_body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use actix_web::{http::StatusCode, test, web, App, HttpResponse};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    fn request_from(addr: &str) -> test::TestRequest {
        let peer: SocketAddr = addr.parse().unwrap();
        test::TestRequest::get().uri("/").peer_addr(peer)
    }

    #[actix_web::test]
    async fn test_budget_is_per_ip_not_per_connection() {
        let limiter = RateLimiter::new(
            Arc::new(InMemoryCache::new()),
            "global",
            2,
            Duration::from_secs(60),
        );
        let app = test::init_service(
            App::new()
                .wrap(ClientRateLimit::new(limiter))
                .route("/", web::get().to(HttpResponse::Ok)),
        )
        .await;

        for addr in ["10.0.0.1:40001", "10.0.0.1:40002"] {
            let res = test::call_service(&app, request_from(addr).to_request()).await;
            assert_eq!(res.status(), StatusCode::OK);
        }

        let limited = test::call_service(&app, request_from("10.0.0.1:40003").to_request()).await;
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(limited.headers().contains_key("retry-after"));

        let other = test::call_service(&app, request_from("10.0.0.2:40001").to_request()).await;
        assert_eq!(other.status(), StatusCode::OK);
    }
}
