use std::net::TcpListener;
use std::sync::Arc;

use promptdesk::configuration::get_configuration;
use promptdesk::credentials::PgCredentialStore;
use promptdesk::prompts::PgPromptStore;
use promptdesk::startup::{build_cache, run, Services};
use promptdesk::telemetry::init_telemetry;
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let configuration = get_configuration().map_err(|e| {
        eprintln!("Failed to read configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "Configuration error")
    })?;

    init_telemetry(&configuration.application.log_level);
    tracing::info!("Configuration loaded successfully");

    // Connections are opened lazily on the first query
    let pool = PgPoolOptions::new()
        .max_connections(configuration.database.max_connections)
        .connect_lazy(&configuration.database.connection_string())
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "Database connection error",
            )
        })?;

    let cache = build_cache(&configuration.cache).await.map_err(|e| {
        tracing::error!("Failed to set up cache: {}", e);
        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "Cache connection error")
    })?;

    let services = Services::build(
        &configuration,
        Arc::new(PgCredentialStore::new(pool.clone())),
        Arc::new(PgPromptStore::new(pool)),
        cache,
    )
    .map_err(|e| {
        tracing::error!("Failed to build services: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "Startup error")
    })?;

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let server = run(listener, services, &configuration)?;
    server.await
}
