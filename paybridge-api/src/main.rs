use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use paybridge_api::{app, AppState, Metrics};
use paybridge_orchestrator::{AdapterRegistry, OperationOrchestrator, RetryPolicy, SandboxAdapter, SearchLimits};
use paybridge_store::app_config::{Config, LedgerBackend};
use paybridge_store::{IdempotencyLedger, MemoryLedger, RedisLedger};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "paybridge_api=debug,paybridge_orchestrator=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    config.validate().context("Invalid config")?;
    tracing::info!("Starting PayBridge API on port {}", config.server.port);

    let ledger: Arc<dyn IdempotencyLedger> = match config.ledger.backend {
        LedgerBackend::Memory => {
            tracing::warn!("Using in-memory ledger, operation records are lost on restart");
            Arc::new(MemoryLedger::new())
        }
        LedgerBackend::Redis => {
            let url = config
                .ledger
                .redis_url
                .as_deref()
                .context("ledger.redis_url is required for the redis backend")?;
            let ledger = RedisLedger::new(url, &config.ledger.key_prefix)
                .await
                .context("Failed to create Redis ledger")?;
            Arc::new(ledger)
        }
    };

    let registry = AdapterRegistry::new().with_adapter(Arc::new(SandboxAdapter::new("sandbox")))?;
    tracing::info!(plugins = ?registry.plugin_names(), "Adapters registered");

    let orchestrator = OperationOrchestrator::new(ledger, registry)
        .with_retry_policy(RetryPolicy::from_config(&config.retry))
        .with_search_limits(SearchLimits::from_config(&config.search));

    // Settlement audit trail
    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(
                    key = %event.key(),
                    outcome = ?event.outcome,
                    attempts = event.attempts,
                    "Operation settled"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Settlement event listener lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let app_state = AppState::new(orchestrator, Metrics::new()?);
    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
