//! vjudge API Server
//!
//! Accounts and bearer-token authentication for the vjudge platform.

use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vj_api::auth::{CredentialHasher, PasswordConfig};
use vj_api::cache::{Cache, RedisCache};
use vj_api::{create_router, state::AppState};
use vj_core::{AppConfig, LoggingConfig, PgUserStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("invalid configuration")?;
    init_tracing(&config.logging);

    // PostgreSQL
    let store = PgUserStore::new(&config.database)
        .await
        .context("failed to connect to PostgreSQL")?;
    if config.database.run_migrations {
        sqlx::migrate!("./migrations")
            .run(store.pool())
            .await
            .context("failed to run migrations")?;
        info!("Database migrations applied");
    }
    let pool = store.pool().clone();

    // Redis; an unreachable server is not fatal, the ledger read path fails open
    let cache = Arc::new(RedisCache::new(&config.redis).context("invalid Redis URL")?);
    match cache.ping().await {
        Ok(()) => info!("Redis connection established"),
        Err(e) => warn!(error = %e, "Redis unavailable at startup, continuing"),
    }

    let hasher = CredentialHasher::new(&PasswordConfig::default())?;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(
        config,
        Arc::new(store),
        cache.clone(),
        hasher,
    )?);

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("vjudge API server starting on http://{}", addr);
    info!("Swagger UI available at http://{}/swagger-ui/", addr);
    info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    cache.close().await;
    pool.close().await;

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=debug", logging.level)));

    if logging.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
