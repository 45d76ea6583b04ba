//! MeetNotes API server entry point

use anyhow::Context;
use meetnotes_api::{routes::create_router, AppState, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,meetnotes_api=debug,meetnotes_billing=debug"));

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = Config::from_env().context("Failed to load configuration")?;

    tracing::info!("Running database migrations");
    let migration_pool = meetnotes_shared::db::create_migration_pool(&config.database_url)
        .await
        .context("Failed to connect for migrations")?;
    meetnotes_shared::db::run_migrations(&migration_pool)
        .await
        .context("Failed to run migrations")?;
    migration_pool.close().await;

    let pool = meetnotes_shared::db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    let bind_address = config.bind_address.clone();
    let state = AppState::new(pool, config).map_err(|e| anyhow::anyhow!("{}", e))?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    tracing::info!(address = %bind_address, "MeetNotes API listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
