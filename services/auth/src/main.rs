use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use flow_auth::{AppState, build_app, config::Settings, repositories::PgAuthStore};
use flow_common::{DatabaseConfig, health_check, init_pool, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        // A missing .env is normal outside local development.
        if !e.not_found() {
            eprintln!("Failed to load .env file: {e}");
        }
    }

    let settings = Settings::from_env()?;
    telemetry::init_tracing(&settings.log)?;

    info!(
        environment = %settings.server.environment,
        "Starting authentication service"
    );

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    if health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    if settings.server.run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database migrations applied");
    } else {
        warn!("Skipping database migrations (RUN_MIGRATIONS=false)");
    }

    let bind_address = settings.server.bind_address();
    let state = AppState::new(settings, Arc::new(PgAuthStore::new(pool)))?;
    let app = build_app(state);

    let listener = TcpListener::bind(&bind_address).await?;
    info!("Authentication service listening on {}", bind_address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Authentication service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}
