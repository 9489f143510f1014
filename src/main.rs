use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use health_exchange::config::Config;
use health_exchange::exchange::StructuralValidator;
use health_exchange::{app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("health_exchange=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(bind_addr = %config.bind_addr, "starting health exchange");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("connecting to PostgreSQL")?;
    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("checking database connectivity")?;

    let state = AppState::new(pool, config.site_url, Arc::new(StructuralValidator));
    let router = app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!("listening on {}", config.bind_addr);
    axum::serve(listener, router).await.context("serving")?;
    Ok(())
}
