use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_intake::auth::{CredentialManager, HttpTokenSource};
use order_intake::config::Config;
use order_intake::intake::{
    CallbackCategory, CallbackDispatcher, Coordinator, EventDeduplicator, IntakeContext, OrderLifecycleEngine,
    StatusBoard,
};
use order_intake::metrics::{self, Metrics};
use order_intake::store::{InMemoryOrderStore, OrderStore, PgOrderStore};
use order_intake::upstream::{HttpUpstreamClient, UpstreamClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; real environment variables take precedence
    let _ = dotenvy::dotenv();

    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_intake=debug")),
        )
        .init();

    tracing::info!("🚀 Starting order intake");

    let config = Config::from_env()?;

    // === 1. Order store ===
    let store: Arc<dyn OrderStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to Postgres...");
            let store = PgOrderStore::connect(url).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, orders are kept in memory only");
            Arc::new(InMemoryOrderStore::new())
        }
    };

    // === 2. Metrics and status board ===
    let metrics = Arc::new(Metrics::new()?);
    let status = Arc::new(StatusBoard::new());
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // Metrics HTTP server runs on its own thread and runtime
    let registry = metrics.registry().clone();
    let server_status = status.clone();
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!("Metrics server runtime error: {}", e);
                return;
            }
        };
        rt.block_on(async {
            if let Err(e) = metrics::start_metrics_server(registry, server_status, metrics_port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    });

    // === 3. Credentials and upstream client ===
    let token_source = HttpTokenSource::new(
        &config.api_url,
        config.client_id.clone(),
        config.client_secret.clone(),
        config.request_timeout,
    )?;
    let credentials = Arc::new(CredentialManager::new(Arc::new(token_source), config.token_safety_margin));
    let upstream: Arc<dyn UpstreamClient> = Arc::new(HttpUpstreamClient::new(
        &config.api_url,
        credentials.clone(),
        config.merchant_ids.clone(),
        config.request_timeout,
    )?);

    log_merchants(upstream.as_ref()).await;

    // === 4. Intake pipeline ===
    let dispatcher = Arc::new(CallbackDispatcher::new());
    register_log_callbacks(&dispatcher);

    let ctx = IntakeContext {
        upstream: upstream.clone(),
        engine: Arc::new(OrderLifecycleEngine::new(store, upstream, config.engine.clone())),
        dedup: Arc::new(EventDeduplicator::new(config.dedup.retention, config.dedup.capacity)),
        dispatcher,
        status: status.clone(),
        metrics,
    };

    let coordinator = Coordinator::start(ctx, &config);

    let stop = coordinator.stop_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
            stop.cancel();
        }
    });

    let exits = coordinator.wait().await;
    tracing::info!(
        workers = exits.len(),
        token_refreshes = credentials.refresh_count(),
        "All poll workers stopped"
    );

    if let Some(fatal) = status.fatal_error() {
        tracing::error!("❌ Intake stopped on a fatal error: {}", fatal);
        anyhow::bail!("intake stopped: {fatal}");
    }

    tracing::info!("🎉 Shutdown complete");
    Ok(())
}

async fn log_merchants(upstream: &dyn UpstreamClient) {
    match upstream.list_merchants().await {
        Ok(merchants) => {
            tracing::info!("🏪 {} merchant(s) available", merchants.len());
            for merchant in merchants {
                tracing::info!(merchant_id = %merchant.id, name = %merchant.name, "Merchant");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Could not list merchants"),
    }
}

/// Default consumers: every notification is logged
fn register_log_callbacks(dispatcher: &CallbackDispatcher) {
    for category in [
        CallbackCategory::NewOrder,
        CallbackCategory::StatusChanged,
        CallbackCategory::OrderCanceled,
        CallbackCategory::DriverAssigned,
        CallbackCategory::MerchantOffline,
        CallbackCategory::Alert,
        CallbackCategory::PollError,
    ] {
        dispatcher.register_fn(category, "log", move |payload| async move {
            tracing::info!(callback = %category, payload = %payload, "📣 Notification");
            Ok::<(), anyhow::Error>(())
        });
    }
}
