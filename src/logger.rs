use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const PROCESS_TIME_HEADER: &str = "x-process-time";

/// Request logging middleware.
///
/// Runs each request inside a `tracing` span keyed by a fresh request id and
/// stamps `X-Request-Id` and `X-Process-Time` (seconds) on the response.
pub struct RequestLogger;

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggerService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RequestLoggerService {
            service: Rc::new(service),
        }))
    }
}

pub struct RequestLoggerService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "http_request",
            request_id = %request_id,
            method = %req.method(),
            path = %req.path(),
        );

        let service = self.service.clone();

        Box::pin(
            async move {
                tracing::info!("Request started");

                let mut res = match service.call(req).await {
                    Ok(res) => res,
                    Err(e) => {
                        tracing::warn!(
                            elapsed_ms = start_time.elapsed().as_millis() as u64,
                            error = %e,
                            "Request rejected"
                        );
                        return Err(e);
                    }
                };

                let elapsed = start_time.elapsed();
                tracing::info!(
                    status = res.status().as_u16(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Request completed"
                );

                let headers = res.headers_mut();
                if let Ok(value) = HeaderValue::from_str(&request_id) {
                    headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
                }
                if let Ok(value) = HeaderValue::from_str(&format!("{:.6}", elapsed.as_secs_f64())) {
                    headers.insert(HeaderName::from_static(PROCESS_TIME_HEADER), value);
                }

                Ok(res)
            }
            .instrument(span),
        )
    }
}
