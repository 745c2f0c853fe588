//! replica-router - primary/replica database router
//!
//! This is the composition root that wires together all the components.

use replica_router::adapters::inbound::{StatusServer, StatusState};
use replica_router::adapters::outbound::{TcpDatabaseDriver, WebhookNotifier};
use replica_router::infrastructure::{shutdown_signal, RateLimiter};
use replica_router::{load_config, DatabaseRouter, FailoverNotifier};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting replica-router primary={} replicas={} failover={}",
        cfg.primary.endpoint(),
        cfg.replicas.len(),
        cfg.failover_enabled
    );

    // ===== COMPOSITION ROOT =====

    // 1. Outbound adapters
    let driver = Arc::new(TcpDatabaseDriver::new());

    let notifier: Option<Arc<dyn FailoverNotifier>> = match &cfg.failover_webhook_url {
        Some(url) => match WebhookNotifier::new(url.clone(), Duration::from_secs(10)) {
            Ok(n) => {
                tracing::info!("failover notifications go to {}", url);
                Some(Arc::new(n) as Arc<dyn FailoverNotifier>)
            }
            Err(e) => {
                tracing::error!("failover webhook disabled: {}", e);
                None
            }
        },
        None => None,
    };

    // 2. Routing core
    let router = Arc::new(DatabaseRouter::connect(cfg.router_config(), driver, notifier).await);
    router.start();

    // 3. Inbound adapter
    if cfg.status_enabled {
        let limiter = Arc::new(RateLimiter::new(cfg.rate_limit_config()));
        RateLimiter::start_cleanup(
            limiter.clone(),
            Duration::from_secs(60),
            Duration::from_secs(600),
        );

        let server = StatusServer::new(
            cfg.status_listen_addr.clone(),
            StatusState::new(router.clone(), limiter),
        );
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!("status server error: {:?}", e);
            }
        });
    }

    // 4. Wait for a signal, then stop cleanly
    shutdown_signal(router.shutdown_controller().clone()).await;
    let report = router.shutdown().await;
    tracing::info!(
        "shutdown complete ({} closed, {} failed)",
        report.disconnected.len(),
        report.failed.len()
    );

    Ok(())
}
