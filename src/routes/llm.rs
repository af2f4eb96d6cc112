/// LLM Routes
///
/// Chat completions (plain or streamed as server-sent events) and the
/// upstream model catalogue.

use std::time::Duration;

use actix_web::{web, HttpResponse};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::cache::{cache_key, get_or_load, CacheStore};
use crate::configuration::{CacheSettings, LlmSettings};
use crate::credentials::Account;
use crate::error::{AppError, ErrorContext};
use crate::llm_client::{ChatCompletionRequest, ChatMessage, LlmClient};
use crate::metrics::{LlmCallStatus, Metrics};
use crate::security::RateLimiters;
use crate::validators::{is_valid_model_id, validate_chat_request, ChatParameters};

/// Chat completion request body
#[derive(Deserialize)]
pub struct ChatRequest {
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    #[serde(default)]
    pub stream: bool,
}

fn sse_frame(payload: &Value) -> web::Bytes {
    web::Bytes::from(format!("data: {}\n\n", payload))
}

/// Counts the call and, for a successful completion, its reported token usage.
fn record_llm_call<T, E>(metrics: &Metrics, model: &str, result: &Result<T, E>) {
    match result {
        Ok(_) => metrics.llm_call(model, LlmCallStatus::Success),
        Err(_) => metrics.llm_call(model, LlmCallStatus::Error),
    }
}

fn record_token_usage(metrics: &Metrics, model: &str, completion: &Value) {
    let usage = &completion["usage"];
    let input = usage["prompt_tokens"].as_u64().unwrap_or(0);
    let output = usage["completion_tokens"].as_u64().unwrap_or(0);
    metrics.llm_tokens(model, input, output);
}

/// POST /chat/completions
///
/// Forwards a chat completion to the upstream LLM on behalf of the
/// authenticated user.
///
/// With `stream: true` the response is `text/event-stream`: one
/// `data: {"content": ...}` frame per delta, then `data: [DONE]`.
///
/// # Errors
/// - 400: Invalid messages, model id, or sampling parameters
/// - 401: Missing or invalid token
/// - 429: LLM request budget exhausted, or upstream rate limited
/// - 4xx/5xx: Upstream LLM failure (see error code)
pub async fn chat_completions(
    account: web::ReqData<Account>,
    body: web::Json<ChatRequest>,
    client: web::Data<LlmClient>,
    limiters: web::Data<RateLimiters>,
    settings: web::Data<LlmSettings>,
    metrics: web::Data<Metrics>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("chat_completion").with_user_id(account.id.to_string());
    let body = body.into_inner();

    let model = body
        .model
        .unwrap_or_else(|| settings.default_model.clone());
    is_valid_model_id(&model)?;
    validate_chat_request(
        &body.messages,
        ChatParameters {
            max_tokens: body.max_tokens,
            temperature: body.temperature,
            top_p: body.top_p,
        },
        &settings,
    )?;

    limiters.llm.check(&account.id.to_string()).await.map_err(|e| {
        context.log_error(&e);
        e
    })?;

    let request = ChatCompletionRequest {
        model,
        messages: body.messages,
        max_tokens: body.max_tokens,
        temperature: body.temperature,
        top_p: body.top_p,
        stream: body.stream,
    };

    tracing::info!(
        request_id = %context.request_id,
        user_id = %account.id,
        model = %request.model,
        stream = request.stream,
        "Forwarding chat completion"
    );

    if !request.stream {
        let completion = client.chat_completion(&request).await;
        record_llm_call(&metrics, &request.model, &completion);
        let completion = completion?;
        record_token_usage(&metrics, &request.model, &completion);
        return Ok(HttpResponse::Ok().json(completion));
    }

    let deltas = client.chat_completion_stream(&request).await;
    record_llm_call(&metrics, &request.model, &deltas);
    let deltas = deltas?;
    let request_id = context.request_id.clone();
    let frames = deltas
        .map(move |delta| match delta {
            Ok(content) => sse_frame(&json!({ "content": content })),
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, "LLM stream failed");
                sse_frame(&json!({ "error": { "code": e.code(), "message": e.to_string() } }))
            }
        })
        .chain(stream::once(async {
            web::Bytes::from_static(b"data: [DONE]\n\n")
        }))
        .map(Ok::<_, std::convert::Infallible>);

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(frames))
}

/// GET /models
///
/// Upstream model list, served from cache for `cache.default_ttl_seconds`.
pub async fn list_models(
    client: web::Data<LlmClient>,
    cache: web::Data<dyn CacheStore>,
    cache_settings: web::Data<CacheSettings>,
) -> Result<HttpResponse, AppError> {
    let key = cache_key("llm_models", &["all"]);
    let ttl = Duration::from_secs(cache_settings.default_ttl_seconds);

    let models: Vec<Value> = get_or_load(cache.get_ref(), &key, ttl, || async {
        client.list_models().await.map_err(AppError::from)
    })
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "data": models })))
}

/// GET /models/{model_id}
///
/// # Errors
/// - 400: Malformed model id
/// - 404: Model not known upstream
pub async fn get_model(
    path: web::Path<String>,
    client: web::Data<LlmClient>,
) -> Result<HttpResponse, AppError> {
    let model_id = path.into_inner();
    is_valid_model_id(&model_id)?;

    match client.get_model(&model_id).await? {
        Some(model) => Ok(HttpResponse::Ok().json(model)),
        None => Err(AppError::NotFound(format!("model {}", model_id))),
    }
}
