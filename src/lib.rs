pub mod auth;
pub mod cache;
pub mod configuration;
pub mod credentials;
pub mod error;
pub mod llm_client;
pub mod logger;
pub mod metrics;
pub mod middleware;
pub mod prompts;
pub mod routes;
pub mod security;
pub mod startup;
pub mod telemetry;
pub mod validators;
