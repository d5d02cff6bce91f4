use idempotency_guard::api::{create_router, AppState};
use idempotency_guard::config::Settings;
use idempotency_guard::idempotency::{
    DelayedCleanupWorker, FingerprintBuilder, IdempotencyGuard, OperationRegistry, OrphanMonitor,
    RedisReservationStore, ReservationStore, SignatureVerifier,
};
use idempotency_guard::observability::{
    init_logging, init_metrics, HealthChecker, LogConfig, LogFormat,
};
use idempotency_guard::services::OrderService;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let settings = Settings::new()?;

    init_logging(&LogConfig::new(
        settings.application.log_level.clone(),
        LogFormat::from(settings.application.log_format.as_str()),
    ));
    info!("Configuration loaded");

    let metrics_handle = init_metrics()?;

    info!("Connecting to Redis at {}...", settings.redis.url);
    let store: Arc<dyn ReservationStore> = Arc::new(RedisReservationStore::open(
        &settings.redis.url,
        settings.redis.command_timeout(),
    )?);
    match store.ping().await {
        Ok(()) => info!("Redis connection established"),
        // Guarded calls are rejected until the store answers.
        Err(e) => warn!("Redis not reachable at startup: {}", e),
    }

    let registry = OperationRegistry::builder(settings.idempotency.scan_namespaces.clone())
        .register_all(OrderService::idempotent_operations())
        .build()?;

    let mut guard = IdempotencyGuard::new(
        Arc::clone(&store),
        Arc::new(registry),
        FingerprintBuilder::new(settings.idempotency.token_header.clone()),
    );
    if let Some(public_key) = settings.idempotency.public_key() {
        guard = guard.with_signature_verifier(SignatureVerifier::from_base64_public_key(public_key)?);
        info!("Request signature verification enabled");
    }

    let cleanup = DelayedCleanupWorker::new(Arc::clone(&store))
        .with_interval(settings.idempotency.cleanup_interval())
        .start();
    let monitor = OrphanMonitor::new(Arc::clone(&store))
        .with_interval(settings.idempotency.monitor_interval())
        .start();

    let state = AppState::new(
        Arc::new(guard),
        Arc::new(OrderService::new()),
        Arc::new(HealthChecker::new(Arc::clone(&store))),
    )
    .with_metrics(metrics_handle);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.application.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(
        listener,
        create_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        tokio::signal::ctrl_c().await.ok();
    })
    .await?;

    cleanup.abort();
    monitor.abort();
    info!("Shutdown complete");

    Ok(())
}
