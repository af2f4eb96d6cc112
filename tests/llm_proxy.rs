mod common;

use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use common::{spawn_app_with, test_settings, TestApp};
use serde_json::{json, Value};

/// Stand-in for the upstream completion API.
struct FakeUpstream {
    address: String,
    model_list_hits: Arc<AtomicUsize>,
}

async fn upstream_models(hits: web::Data<AtomicUsize>) -> HttpResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    HttpResponse::Ok().json(json!({
        "data": [
            { "id": "openai/gpt-3.5-turbo", "name": "GPT-3.5 Turbo" },
            { "id": "anthropic/claude-3-haiku", "name": "Claude 3 Haiku" }
        ]
    }))
}

async fn upstream_model(path: web::Path<String>) -> HttpResponse {
    let model_id = path.into_inner();
    if model_id == "openai/gpt-3.5-turbo" {
        HttpResponse::Ok().json(json!({ "id": model_id, "name": "GPT-3.5 Turbo" }))
    } else {
        HttpResponse::NotFound().json(json!({ "error": "model not found" }))
    }
}

async fn upstream_chat(req: HttpRequest, body: web::Json<Value>) -> HttpResponse {
    let authorized = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        == Some("Bearer sk-or-test-key");
    if !authorized {
        return HttpResponse::Unauthorized().finish();
    }

    match body["model"].as_str() {
        Some("limited/model") => {
            return HttpResponse::TooManyRequests()
                .insert_header(("Retry-After", "7"))
                .finish()
        }
        Some("broken/model") => return HttpResponse::InternalServerError().body("boom"),
        _ => {}
    }

    if body["stream"] == true {
        let events = concat!(
            ": OPENROUTER PROCESSING\n\n",
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        return HttpResponse::Ok()
            .content_type("text/event-stream")
            .body(events);
    }

    HttpResponse::Ok().json(json!({
        "id": "cmpl-1",
        "model": body["model"],
        "choices": [{ "message": { "role": "assistant", "content": "Hello" } }],
        "usage": { "prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7 }
    }))
}

fn spawn_upstream() -> FakeUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let model_list_hits = Arc::new(AtomicUsize::new(0));
    let hits = web::Data::from(model_list_hits.clone());

    let server = HttpServer::new(move || {
        App::new()
            .app_data(hits.clone())
            .route("/models", web::get().to(upstream_models))
            .route("/models/{model_id:.+}", web::get().to(upstream_model))
            .route("/chat/completions", web::post().to(upstream_chat))
    })
    .listen(listener)
    .expect("Failed to bind upstream")
    .run();
    let _ = tokio::spawn(server);

    FakeUpstream {
        address: format!("http://127.0.0.1:{}", port),
        model_list_hits,
    }
}

async fn spawn_app_with_upstream() -> (TestApp, FakeUpstream) {
    let upstream = spawn_upstream();
    let app = spawn_app_with(test_settings(&upstream.address)).await;
    app.store
        .add_account("alice", "alice@example.com", "correct-pw")
        .unwrap();
    (app, upstream)
}

async fn post_chat(app: &TestApp, token: &str, body: Value) -> reqwest::Response {
    app.client
        .post(&app.api("/chat/completions"))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .expect("Failed to execute request.")
}

fn hello() -> Value {
    json!([{ "role": "user", "content": "Say hello" }])
}

// --- Chat Completion Tests ---

#[tokio::test]
async fn chat_completion_passes_upstream_json_through() {
    let (app, _upstream) = spawn_app_with_upstream().await;
    let token = app.access_token("alice", "correct-pw").await;

    let response = post_chat(&app, &token, json!({ "messages": hello() })).await;

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], "cmpl-1");
    assert_eq!(body["model"], "openai/gpt-3.5-turbo");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello");
}

#[tokio::test]
async fn chat_completion_streams_deltas_as_server_sent_events() {
    let (app, _upstream) = spawn_app_with_upstream().await;
    let token = app.access_token("alice", "correct-pw").await;

    let response = post_chat(&app, &token, json!({ "messages": hello(), "stream": true })).await;

    assert_eq!(200, response.status().as_u16());
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let text = response.text().await.unwrap();
    let frames: Vec<&str> = text
        .split("\n\n")
        .filter(|frame| !frame.is_empty())
        .collect();
    assert_eq!(
        frames,
        vec![
            r#"data: {"content":"Hel"}"#,
            r#"data: {"content":"lo"}"#,
            "data: [DONE]",
        ]
    );
}

#[tokio::test]
async fn chat_completion_requires_bearer_token() {
    let (app, _upstream) = spawn_app_with_upstream().await;

    let response = app
        .client
        .post(&app.api("/chat/completions"))
        .json(&json!({ "messages": hello() }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(401, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "AUTHENTICATION_ERROR");
}

#[tokio::test]
async fn chat_completion_rejects_invalid_requests() {
    let (app, _upstream) = spawn_app_with_upstream().await;
    let token = app.access_token("alice", "correct-pw").await;

    let test_cases = vec![
        (json!({ "messages": [] }), "no messages"),
        (json!({ "messages": hello(), "max_tokens": 5000 }), "max_tokens over budget"),
        (json!({ "messages": hello(), "temperature": 3.0 }), "temperature out of range"),
        (json!({ "messages": hello(), "model": "bad model" }), "malformed model id"),
        (
            json!({ "messages": [{ "role": "wizard", "content": "hi" }] }),
            "unknown role",
        ),
    ];

    for (body, description) in test_cases {
        let response = post_chat(&app, &token, body).await;
        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 Bad Request for {}.",
            description
        );
    }
}

#[tokio::test]
async fn chat_completion_maps_upstream_errors() {
    let (app, _upstream) = spawn_app_with_upstream().await;
    let token = app.access_token("alice", "correct-pw").await;

    let limited = post_chat(
        &app,
        &token,
        json!({ "messages": hello(), "model": "limited/model" }),
    )
    .await;
    assert_eq!(429, limited.status().as_u16());
    assert_eq!(limited.headers()["retry-after"], "7");
    let body: Value = limited.json().await.unwrap();
    assert_eq!(body["code"], "LLM_RATE_LIMITED");

    let broken = post_chat(
        &app,
        &token,
        json!({ "messages": hello(), "model": "broken/model" }),
    )
    .await;
    assert_eq!(500, broken.status().as_u16());
    let body: Value = broken.json().await.unwrap();
    assert_eq!(body["code"], "LLM_HTTP_ERROR");
}

#[tokio::test]
async fn upstream_rejecting_api_key_is_a_bad_gateway() {
    let upstream = spawn_upstream();
    let mut settings = test_settings(&upstream.address);
    settings.llm.api_key = "sk-or-revoked".to_string();
    let app = spawn_app_with(settings).await;
    app.store
        .add_account("alice", "alice@example.com", "correct-pw")
        .unwrap();
    let token = app.access_token("alice", "correct-pw").await;

    let response = post_chat(&app, &token, json!({ "messages": hello() })).await;

    assert_eq!(502, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "LLM_UNAUTHORIZED");
}

#[tokio::test]
async fn unreachable_upstream_is_service_unavailable() {
    let app = common::spawn_app().await;
    app.store
        .add_account("alice", "alice@example.com", "correct-pw")
        .unwrap();
    let token = app.access_token("alice", "correct-pw").await;

    let response = post_chat(&app, &token, json!({ "messages": hello() })).await;

    assert_eq!(503, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "LLM_CONNECTION_ERROR");
}

#[tokio::test]
async fn chat_completion_is_rate_limited_per_user() {
    let upstream = spawn_upstream();
    let mut settings = test_settings(&upstream.address);
    settings.rate_limit.llm_requests = 1;
    let app = spawn_app_with(settings).await;
    app.store
        .add_account("alice", "alice@example.com", "correct-pw")
        .unwrap();
    let token = app.access_token("alice", "correct-pw").await;

    let first = post_chat(&app, &token, json!({ "messages": hello() })).await;
    assert_eq!(200, first.status().as_u16());

    let second = post_chat(&app, &token, json!({ "messages": hello() })).await;
    assert_eq!(429, second.status().as_u16());
    assert!(second.headers().contains_key("retry-after"));
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["code"], "RATE_LIMITED");
}

// --- Model Catalogue Tests ---

#[tokio::test]
async fn model_list_is_served_from_cache() {
    let (app, upstream) = spawn_app_with_upstream().await;

    for _ in 0..3 {
        let response = app
            .client
            .get(&app.api("/models"))
            .send()
            .await
            .expect("Failed to execute request.");

        assert_eq!(200, response.status().as_u16());
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
        assert_eq!(body["data"][0]["id"], "openai/gpt-3.5-turbo");
    }

    assert_eq!(upstream.model_list_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn single_model_lookup() {
    let (app, _upstream) = spawn_app_with_upstream().await;

    let found = app
        .client
        .get(&app.api("/models/openai/gpt-3.5-turbo"))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, found.status().as_u16());
    let body: Value = found.json().await.unwrap();
    assert_eq!(body["id"], "openai/gpt-3.5-turbo");

    let missing = app
        .client
        .get(&app.api("/models/acme/unknown"))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(404, missing.status().as_u16());
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["code"], "NOT_FOUND");
}

// --- Metrics ---

/// Value of the exported sample of `family` carrying every one of `labels`.
fn sample(exported: &str, family: &str, labels: &[&str]) -> Option<f64> {
    exported
        .lines()
        .filter(|line| line.starts_with(&format!("{}{{", family)))
        .find(|line| labels.iter().all(|label| line.contains(label)))
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}

#[tokio::test]
async fn llm_calls_and_tokens_are_exported_as_metrics() {
    let (app, _upstream) = spawn_app_with_upstream().await;
    let token = app.access_token("alice", "correct-pw").await;

    post_chat(&app, &token, json!({ "messages": hello() })).await;
    post_chat(&app, &token, json!({ "model": "broken/model", "messages": hello() })).await;

    let exported = app
        .client
        .get(&format!("{}/metrics", app.address))
        .send()
        .await
        .expect("Failed to execute request.")
        .text()
        .await
        .unwrap();

    let ok_model = r#"model_name="openai/gpt-3.5-turbo""#;
    assert_eq!(
        sample(&exported, "llm_calls_total", &[ok_model, r#"status="success""#]),
        Some(1.0)
    );
    assert_eq!(
        sample(
            &exported,
            "llm_calls_total",
            &[r#"model_name="broken/model""#, r#"status="error""#]
        ),
        Some(1.0)
    );
    assert_eq!(
        sample(&exported, "llm_tokens_total", &[ok_model, r#"direction="input""#]),
        Some(5.0)
    );
    assert_eq!(
        sample(&exported, "llm_tokens_total", &[ok_model, r#"direction="output""#]),
        Some(2.0)
    );
}
