use anyhow::Result;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use auth::{
    AppState, create_router, database,
    jwt::JwtConfig,
    ledger::RefreshTokenConfig,
    rate_limiter::RateLimiterConfig,
    session::SessionService,
};
use common::database::{DatabaseConfig, health_check, init_pool};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine, the environment may already be populated
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting authentication service");

    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    if health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    database::migrate(&pool).await?;

    let jwt_config = JwtConfig::from_env()?;
    let refresh_config = RefreshTokenConfig::from_env()?;
    let sweep_interval = refresh_config.sweep_interval_secs;

    let app_state = AppState::postgres(
        pool,
        jwt_config,
        refresh_config,
        RateLimiterConfig::from_env(),
    )?;

    if sweep_interval > 0 {
        tokio::spawn(sweep_expired_tokens(
            app_state.sessions.clone(),
            Duration::from_secs(sweep_interval),
        ));
    }

    let app = create_router(app_state);

    let bind_addr = std::env::var("AUTH_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Authentication service listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Authentication service stopped");
    Ok(())
}

async fn sweep_expired_tokens(sessions: SessionService, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        if let Err(e) = sessions.sweep_expired().await {
            error!("Expired refresh token sweep failed: {}", e);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
