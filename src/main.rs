//! Trasferte server - travel request approval, reconciliation and reimbursement

use clap::Parser;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trasferte::config::ServerConfig;
use trasferte::store::Store;
use trasferte::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trasferte=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::parse();

    // Database connection
    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    // Run migrations, then rewrite historical status spellings
    let store = Store::new(pool.clone());
    store.migrate().await?;
    store.normalize_legacy_values().await?;

    let state = AppState::new(pool);

    // Registration only hands out Staff, so the first privileged account is seeded here
    if let Some(email) = &config.superuser_email {
        let root = state
            .service
            .seed_superuser(&config.superuser_name, email)
            .await?;
        tracing::info!(employee_id = %root.id, "Superuser available");
    }

    let app = trasferte::api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
