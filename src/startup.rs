use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::http::header;
use actix_web::middleware::Condition;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::auth::{Authenticator, RequestAuthorizer, TokenCodec};
use crate::cache::{spawn_purge_task, CacheError, CacheStore, InMemoryCache, RedisCache};
use crate::configuration::{CacheSettings, Settings};
use crate::credentials::CredentialStore;
use crate::error::{AppError, ConfigError};
use crate::llm_client::{LlmClient, LlmError};
use crate::logger::RequestLogger;
use crate::metrics::{metrics_endpoint, Metrics, MetricsError, RequestMetrics};
use crate::middleware::{BearerAuth, ClientRateLimit};
use crate::prompts::PromptStore;
use crate::routes::{
    chat_completions, create_prompt, create_test_result, delete_prompt, get_model, get_prompt,
    health_check, list_models, list_prompts, list_test_results, login, me, refresh_token,
    update_prompt,
};
use crate::security::{RateLimiters, SecurityHeaders};

/// Largest JSON body accepted, sized for a maximal prompt plus envelope.
const JSON_BODY_LIMIT: usize = 512 * 1024;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    App(#[from] AppError),
    #[error("LLM client setup failed: {0}")]
    Llm(#[from] LlmError),
    #[error("Metrics setup failed: {0}")]
    Metrics(#[from] MetricsError),
    #[error("Cache setup failed: {0}")]
    Cache(#[from] CacheError),
}

/// Redis when `cache.redis_url` is set, otherwise an in-process cache with a
/// background task dropping expired entries.
///
/// Must be called inside a Tokio runtime.
pub async fn build_cache(settings: &CacheSettings) -> Result<Arc<dyn CacheStore>, StartupError> {
    if let Some(url) = &settings.redis_url {
        return Ok(Arc::new(RedisCache::connect(url).await?));
    }

    tracing::info!("No redis_url configured, using in-process cache");
    let cache = Arc::new(InMemoryCache::new());
    spawn_purge_task(
        cache.clone(),
        Duration::from_secs(settings.purge_interval_seconds),
    );
    Ok(cache)
}

fn cors(allowed_origins: &[String]) -> Cors {
    allowed_origins.iter().fold(
        Cors::default()
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![header::CONTENT_TYPE, header::AUTHORIZATION])
            .supports_credentials()
            .max_age(3600),
        |cors, origin| cors.allowed_origin(origin),
    )
}

/// Everything the request handlers share, built once before the server starts.
#[derive(Clone)]
pub struct Services {
    pub authenticator: Arc<Authenticator>,
    pub authorizer: Arc<RequestAuthorizer>,
    pub cache: Arc<dyn CacheStore>,
    pub rate_limiters: RateLimiters,
    pub llm_client: LlmClient,
    pub metrics: Metrics,
    pub prompts: Arc<dyn PromptStore>,
}

impl Services {
    pub fn build(
        settings: &Settings,
        store: Arc<dyn CredentialStore>,
        prompts: Arc<dyn PromptStore>,
        cache: Arc<dyn CacheStore>,
    ) -> Result<Self, StartupError> {
        let codec = Arc::new(TokenCodec::new(&settings.jwt)?);

        Ok(Self {
            authenticator: Arc::new(Authenticator::new(
                codec.clone(),
                store.clone(),
                &settings.jwt,
            )?),
            authorizer: Arc::new(RequestAuthorizer::new(codec, store)),
            rate_limiters: RateLimiters::new(cache.clone(), &settings.rate_limit),
            cache,
            llm_client: LlmClient::new(&settings.llm)?,
            metrics: Metrics::new()?,
            prompts,
        })
    }
}

pub fn run(
    listener: TcpListener,
    services: Services,
    settings: &Settings,
) -> Result<Server, std::io::Error> {
    let authenticator = web::Data::from(services.authenticator);
    let authorizer = services.authorizer;
    let cache: web::Data<dyn CacheStore> = web::Data::from(services.cache);
    let rate_limiters = web::Data::new(services.rate_limiters);
    let llm_client = web::Data::new(services.llm_client);
    let prompts: web::Data<dyn PromptStore> = web::Data::from(services.prompts);
    let metrics = services.metrics;
    let metrics_data = web::Data::new(metrics.clone());
    let global_limiter = rate_limiters.global.clone();
    let llm_settings = web::Data::new(settings.llm.clone());
    let cache_settings = web::Data::new(settings.cache.clone());

    let api_prefix = settings.application.api_prefix.clone();
    let security_headers = settings.application.security_headers;
    let allowed_origins = settings.application.allowed_origins.clone();

    let server = HttpServer::new(move || {
        App::new()
            // Global middleware, innermost first
            .wrap(ClientRateLimit::new(global_limiter.clone()))
            .wrap(cors(&allowed_origins))
            .wrap(Condition::new(security_headers, SecurityHeaders::middleware()))
            .wrap(RequestMetrics::new(metrics.clone()))
            .wrap(RequestLogger)

            // Shared state
            .app_data(web::JsonConfig::default().limit(JSON_BODY_LIMIT))
            .app_data(authenticator.clone())
            .app_data(cache.clone())
            .app_data(rate_limiters.clone())
            .app_data(llm_client.clone())
            .app_data(llm_settings.clone())
            .app_data(cache_settings.clone())
            .app_data(prompts.clone())
            .app_data(metrics_data.clone())

            .route("/health_check", web::get().to(health_check))
            .route("/metrics", web::get().to(metrics_endpoint))
            .service(
                web::scope(&api_prefix)
                    // Public routes (no authentication required)
                    .route("/auth/token", web::post().to(login))
                    .route("/auth/refresh", web::post().to(refresh_token))
                    .route("/models", web::get().to(list_models))
                    .route("/models/{model_id:.+}", web::get().to(get_model))

                    // Protected routes (require a bearer access token)
                    .service(
                        web::resource("/users/me")
                            .wrap(BearerAuth::new(authorizer.clone()))
                            .route(web::get().to(me)),
                    )
                    .service(
                        web::resource("/chat/completions")
                            .wrap(BearerAuth::new(authorizer.clone()))
                            .route(web::post().to(chat_completions)),
                    )
                    .service(
                        web::scope("/prompts")
                            .wrap(BearerAuth::new(authorizer.clone()))
                            .route("", web::post().to(create_prompt))
                            .route("", web::get().to(list_prompts))
                            .route("/{prompt_id}", web::get().to(get_prompt))
                            .route("/{prompt_id}", web::put().to(update_prompt))
                            .route("/{prompt_id}", web::delete().to(delete_prompt))
                            .route("/{prompt_id}/test-results", web::post().to(create_test_result))
                            .route("/{prompt_id}/test-results", web::get().to(list_test_results)),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
