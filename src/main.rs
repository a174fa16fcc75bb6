use paygate_backend::api::{self, ApiState};
use paygate_backend::config::AppConfig;
use paygate_backend::database::init_pool_from_config;
use paygate_backend::health::HealthChecker;
use paygate_backend::logging::init_tracing;
use paygate_backend::middleware::{request_logging_middleware, UuidRequestId};
use paygate_backend::payments::registry::ProviderRegistry;
use paygate_backend::services::PaymentService;
use paygate_backend::workers::ReconciliationWorker;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;

    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting payment gateway service"
    );

    // Database pool and schema
    let pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        anyhow::anyhow!(e)
    })?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied");

    // Provider registration
    let registry = Arc::new(ProviderRegistry::new());
    let service = Arc::new(PaymentService::new(
        pool.clone(),
        registry.clone(),
        config.nowpayments.ipn_secret.clone(),
    ));

    if config.nowpayments.enabled {
        service
            .register_nowpayments(&config.nowpayments)
            .await
            .map_err(|e| anyhow::anyhow!("nowpayments registration failed: {}", e))?;
    } else {
        warn!("nowpayments provider disabled by configuration");
    }
    if config.paypal.enabled {
        service
            .register_paypal(&config.paypal)
            .await
            .map_err(|e| anyhow::anyhow!("paypal registration failed: {}", e))?;
    } else {
        warn!("paypal provider disabled by configuration");
    }

    let health = HealthChecker::new(pool.clone(), registry.clone());

    // Background reconciliation
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = if config.reconciler.enabled {
        let worker = ReconciliationWorker::new(service.clone(), config.reconciler.clone());
        Some(tokio::spawn(worker.run(shutdown_rx)))
    } else {
        warn!("reconciliation worker disabled by configuration");
        None
    };

    // Router with request-id and logging layers
    let app = api::router(ApiState { service, health }).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(shutdown_tx.clone()))
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker_handle {
        if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for reconciliation worker shutdown");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
