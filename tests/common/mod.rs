#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::Arc;

use promptdesk::cache::InMemoryCache;
use promptdesk::configuration::{
    ApplicationSettings, CacheSettings, DatabaseSettings, JwtSettings, LlmSettings,
    RateLimitSettings, Settings,
};
use promptdesk::credentials::InMemoryCredentialStore;
use promptdesk::prompts::InMemoryPromptStore;
use promptdesk::startup::{run, Services};
use serde_json::{json, Value};

pub const API_PREFIX: &str = "/api/v1";
pub const ALLOWED_ORIGIN: &str = "http://localhost:3000";

pub struct TestApp {
    pub address: String,
    pub store: Arc<InMemoryCredentialStore>,
    pub client: reqwest::Client,
}

/// Settings matching the documented defaults, pointed at `llm_base_url`.
pub fn test_settings(llm_base_url: &str) -> Settings {
    Settings {
        application: ApplicationSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            api_prefix: API_PREFIX.to_string(),
            security_headers: true,
            log_level: "info".to_string(),
            allowed_origins: vec![ALLOWED_ORIGIN.to_string()],
        },
        database: DatabaseSettings {
            username: "postgres".to_string(),
            password: "password".to_string(),
            port: 5432,
            host: "localhost".to_string(),
            database_name: "promptdesk".to_string(),
            max_connections: 1,
        },
        jwt: JwtSettings {
            secret: "x".repeat(32),
            algorithm: "HS256".to_string(),
            issuer: "app".to_string(),
            audience: "users".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 604800,
        },
        llm: LlmSettings {
            base_url: llm_base_url.to_string(),
            api_key: "sk-or-test-key".to_string(),
            timeout_seconds: 5,
            default_model: "openai/gpt-3.5-turbo".to_string(),
            max_prompt_length: 50000,
            max_tokens_per_request: 4000,
        },
        cache: CacheSettings {
            default_ttl_seconds: 300,
            redis_url: None,
            purge_interval_seconds: 60,
        },
        rate_limit: RateLimitSettings {
            global_requests: 1000,
            global_window_seconds: 3600,
            user_requests: 100,
            user_window_seconds: 3600,
            llm_requests: 30,
            llm_window_seconds: 60,
        },
    }
}

/// Spawns the app with no reachable upstream LLM.
pub async fn spawn_app() -> TestApp {
    spawn_app_with(test_settings("http://127.0.0.1:9")).await
}

pub async fn spawn_app_with(settings: Settings) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let store = Arc::new(InMemoryCredentialStore::new());
    let services = Services::build(
        &settings,
        store.clone(),
        Arc::new(InMemoryPromptStore::new()),
        Arc::new(InMemoryCache::new()),
    )
    .expect("Failed to build services");

    let server = run(listener, services, &settings).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        store,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    pub fn api(&self, path: &str) -> String {
        format!("{}{}{}", self.address, API_PREFIX, path)
    }

    pub async fn post_login(&self, username: &str, password: &str) -> reqwest::Response {
        self.client
            .post(&self.api("/auth/token"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// Logs in and returns the token response body.
    pub async fn login(&self, username: &str, password: &str) -> Value {
        let response = self.post_login(username, password).await;
        assert_eq!(200, response.status().as_u16(), "Login failed for {}", username);
        response.json().await.expect("Failed to parse response")
    }

    pub async fn access_token(&self, username: &str, password: &str) -> String {
        self.login(username, password).await["access_token"]
            .as_str()
            .expect("access_token missing")
            .to_string()
    }

    pub async fn get_me(&self, token: &str) -> reqwest::Response {
        self.client
            .get(&self.api("/users/me"))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request.")
    }
}
