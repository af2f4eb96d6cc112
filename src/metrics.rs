/// Prometheus Metrics
///
/// HTTP request counts and latencies, LLM call outcomes and token usage.
/// Every `Metrics` owns its own registry, exported in the Prometheus text
/// format at `/metrics`.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpResponse,
};
use futures::future::LocalBoxFuture;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::rc::Rc;
use std::time::Instant;
use thiserror::Error;

/// Endpoint label for requests that matched no route.
const UNMATCHED_ENDPOINT: &str = "unmatched";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),
    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}

/// Outcome label for `llm_calls_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmCallStatus {
    Success,
    Error,
}

impl LlmCallStatus {
    fn as_str(&self) -> &'static str {
        match self {
            LlmCallStatus::Success => "success",
            LlmCallStatus::Error => "error",
        }
    }
}

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    http_requests_total: CounterVec,
    http_request_duration_seconds: HistogramVec,
    llm_calls_total: CounterVec,
    llm_tokens_total: CounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests"),
            &["method", "endpoint", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "endpoint"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        let llm_calls_total = CounterVec::new(
            Opts::new("llm_calls_total", "Total LLM API calls"),
            &["model_name", "status"],
        )?;
        registry.register(Box::new(llm_calls_total.clone()))?;

        let llm_tokens_total = CounterVec::new(
            Opts::new("llm_tokens_total", "Total LLM tokens used"),
            &["model_name", "direction"],
        )?;
        registry.register(Box::new(llm_tokens_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            llm_calls_total,
            llm_tokens_total,
        })
    }

    pub fn observe_request(&self, method: &str, endpoint: &str, status: u16, elapsed_secs: f64) {
        self.http_requests_total
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, endpoint])
            .observe(elapsed_secs);
    }

    pub fn llm_call(&self, model: &str, status: LlmCallStatus) {
        self.llm_calls_total
            .with_label_values(&[model, status.as_str()])
            .inc();
    }

    /// Records prompt (`input`) and completion (`output`) token counts.
    pub fn llm_tokens(&self, model: &str, input: u64, output: u64) {
        self.llm_tokens_total
            .with_label_values(&[model, "input"])
            .inc_by(input as f64);
        self.llm_tokens_total
            .with_label_values(&[model, "output"])
            .inc_by(output as f64);
    }

    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}

/// GET /metrics
pub async fn metrics_endpoint(metrics: actix_web::web::Data<Metrics>) -> HttpResponse {
    match metrics.encode_text() {
        Ok(body) => HttpResponse::Ok()
            .content_type(TextEncoder::new().format_type())
            .body(body),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Counts every response and its latency, labelled by the matched route
/// pattern so path parameters do not create new series.
pub struct RequestMetrics {
    metrics: Metrics,
}

impl RequestMetrics {
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestMetrics
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestMetricsService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RequestMetricsService {
            service: Rc::new(service),
            metrics: self.metrics.clone(),
        }))
    }
}

pub struct RequestMetricsService<S> {
    service: Rc<S>,
    metrics: Metrics,
}

impl<S, B> Service<ServiceRequest> for RequestMetricsService<S>
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
        let method = req.method().to_string();
        let service = self.service.clone();
        let metrics = self.metrics.clone();

        Box::pin(async move {
            let res = service.call(req).await?;

            let endpoint = res
                .request()
                .match_pattern()
                .unwrap_or_else(|| UNMATCHED_ENDPOINT.to_string());
            metrics.observe_request(
                &method,
                &endpoint,
                res.status().as_u16(),
                start_time.elapsed().as_secs_f64(),
            );

            Ok(res)
        })
    }
}
