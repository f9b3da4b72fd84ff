use std::net::SocketAddr;
use std::sync::Arc;

use identity_service::{
    build_router,
    config::{IdentityConfig, RevocationBackend, StoreBackend},
    services::{MemoryBlacklist, MemoryStore, PgStore, RedisBlacklist, ServiceError, TokenBlacklist, UserStore},
    utils::Password,
    AppState,
};
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = IdentityConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        store = ?config.store.backend,
        revocation = ?config.revocation.backend,
        "Starting identity service"
    );

    let store: Arc<dyn UserStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Postgres => {
            let url = config.store.database_url.as_deref().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is not set"))
            })?;
            let store = PgStore::connect(url, config.store.max_connections)
                .await
                .map_err(ServiceError::from)?;
            store.init_schema().await.map_err(ServiceError::from)?;
            Arc::new(store)
        }
    };

    let blacklist: Arc<dyn TokenBlacklist> = match config.revocation.backend {
        RevocationBackend::Memory => Arc::new(MemoryBlacklist::new()),
        RevocationBackend::Redis => {
            let url = config.revocation.redis_url.as_deref().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("REDIS_URL is not set"))
            })?;
            Arc::new(RedisBlacklist::new(url).await?)
        }
    };

    let bootstrap_admin = config.bootstrap_admin.clone();
    let addr = config.common.socket_addr();
    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );

    let state = AppState::new(config, store, blacklist)?;

    if let Some(admin) = bootstrap_admin {
        state
            .credentials
            .ensure_admin(&admin.email, Password::new(admin.password))
            .await?;
    }

    let app = build_router(state);

    let _guard = service_span.enter();
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
