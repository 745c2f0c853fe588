//! Database Router - public entry point
//!
//! Wires the connection manager, health monitor, failover coordinator,
//! router and instrumentation together behind one handle. This is the only
//! type the hosting application needs to talk to.

use crate::application::failover_coordinator::{FailoverConfig, FailoverCoordinator, FailoverOutcome};
use crate::application::instrumentation::{InstrumentationConfig, MetricsSnapshot, QueryInstrumentation};
use crate::application::query_router::{QueryRouter, Route, RouteError};
use crate::domain::entities::{ClusterStatus, FailoverEvent, NodeConfig, QueryEvent};
use crate::domain::ports::{DatabaseDriver, DbConnection, FailoverNotifier};
use crate::domain::topology::{Topology, TopologyStore};
use crate::domain::value_objects::{QueryType, RawStatement};
use crate::infrastructure::connection_manager::{
    ConnectionManager, ConnectionManagerConfig, DisconnectReport,
};
use crate::infrastructure::health_monitor::{CycleReport, HealthMonitor, HealthMonitorConfig};
use crate::infrastructure::shutdown::ShutdownController;
use futures::future::join_all;
use parking_lot::Mutex;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Everything needed to build a [`DatabaseRouter`].
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    pub primary: NodeConfig,
    /// Replica endpoints, in index order
    pub replicas: Vec<NodeConfig>,
    pub health: HealthMonitorConfig,
    pub failover: FailoverConfig,
    pub instrumentation: InstrumentationConfig,
    pub connections: ConnectionManagerConfig,
    /// How long shutdown waits for in-flight queries
    pub drain_timeout: Duration,
}

/// Primary/replica query router with health monitoring and failover.
pub struct DatabaseRouter {
    topology: Arc<TopologyStore>,
    connections: Arc<ConnectionManager>,
    router: QueryRouter,
    instrumentation: QueryInstrumentation,
    failover: Arc<FailoverCoordinator>,
    monitor: Arc<HealthMonitor>,
    shutdown: ShutdownController,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
    drain_timeout: Duration,
}

impl DatabaseRouter {
    /// Connect to every configured node.
    ///
    /// Nodes start in the UNKNOWN state and join the read pool after their
    /// first successful probe. Nodes that fail their initial connect are kept
    /// as unhealthy so the health monitor can bring them back later.
    pub async fn connect(
        config: RouterConfig,
        driver: Arc<dyn DatabaseDriver>,
        notifier: Option<Arc<dyn FailoverNotifier>>,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new(driver, config.connections.clone()));

        let (primary, replicas) = tokio::join!(
            connections.register("primary", config.primary.clone()),
            join_all(
                config
                    .replicas
                    .iter()
                    .enumerate()
                    .map(|(i, c)| {
                        let connections = &connections;
                        async move {
                            connections
                                .register(&format!("replica-{}", i), c.clone())
                                .await
                        }
                    })
            )
        );

        let topology = Arc::new(TopologyStore::new(Topology::new(primary, replicas)));
        let failover = Arc::new(FailoverCoordinator::new(
            config.failover.clone(),
            topology.clone(),
            connections.clone(),
            notifier,
        ));
        let monitor = Arc::new(
            HealthMonitor::new(config.health.clone(), topology.clone(), connections.clone())
                .with_failover(failover.clone()),
        );

        let loaded = topology.load();
        tracing::info!(
            "database router ready: primary={} replicas={}/{} connected",
            loaded.primary().endpoint(),
            loaded.replicas().iter().filter(|r| r.is_connected()).count(),
            loaded.replicas().len()
        );

        Self {
            router: QueryRouter::new(topology.clone()),
            instrumentation: QueryInstrumentation::new(config.instrumentation),
            topology,
            connections,
            failover,
            monitor,
            shutdown: ShutdownController::new(),
            monitor_task: Mutex::new(None),
            drain_timeout: config.drain_timeout,
        }
    }

    /// Routing decision for `query_type`, including the chosen target.
    pub fn route(&self, query_type: QueryType) -> Result<Route, RouteError> {
        self.router.route(query_type)
    }

    /// Connection handle for `query_type`.
    ///
    /// Reads fall back to the primary when no replica is healthy. The only
    /// error is a primary without any handle.
    pub fn get_connection(&self, query_type: QueryType) -> Result<DbConnection, RouteError> {
        self.router.route(query_type).map(|route| route.connection)
    }

    /// Route and run one operation, recording its outcome.
    ///
    /// The operation's own error is returned unchanged after being recorded.
    pub async fn execute<T, E, F, Fut>(
        &self,
        query_type: QueryType,
        entity: &str,
        operation: &str,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(DbConnection) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<RouteError> + Display,
    {
        let _in_flight = self.shutdown.query_guard();
        self.instrumentation
            .instrument(query_type, entity, operation, async {
                let connection = self.get_connection(query_type)?;
                f(connection).await
            })
            .await
    }

    /// Run a raw statement, classified by the entry point it came through.
    pub async fn execute_raw<T, E, F, Fut>(&self, kind: RawStatement, f: F) -> Result<T, E>
    where
        F: FnOnce(DbConnection) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<RouteError> + Display,
    {
        let operation = match kind {
            RawStatement::Execute => "executeRaw",
            RawStatement::Query => "queryRaw",
        };
        self.execute(QueryType::from_raw(kind), "raw", operation, f)
            .await
    }

    pub fn get_status(&self) -> ClusterStatus {
        self.topology.load().status()
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.instrumentation.metrics()
    }

    /// Most recent query events, oldest first.
    pub fn recent_queries(&self, limit: usize) -> Vec<QueryEvent> {
        self.instrumentation.recent_events(limit)
    }

    pub fn failover_history(&self) -> Vec<FailoverEvent> {
        self.failover.history()
    }

    /// Run one health check cycle now.
    pub async fn run_health_check(&self) -> CycleReport {
        self.monitor.run_cycle().await
    }

    /// Promote a replica regardless of primary health.
    pub async fn trigger_failover(&self) -> FailoverOutcome {
        self.failover.failover().await
    }

    /// Start background health monitoring: one cycle right away, then one per
    /// interval. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut task = self.monitor_task.lock();
        if task.is_some() {
            tracing::debug!("health monitor already running");
            return;
        }
        *task = Some(self.monitor.clone().start(self.shutdown.clone()));
        tracing::info!(
            "health monitor started (interval {}ms)",
            self.monitor.config().interval.as_millis()
        );
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Stop monitoring, let in-flight queries drain, then close every handle.
    pub async fn shutdown(&self) -> DisconnectReport {
        self.shutdown.shutdown();

        let task = self.monitor_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("health monitor task ended abnormally: {}", e);
            }
        }

        if !self.shutdown.wait_for_drain(self.drain_timeout).await {
            tracing::warn!("closing connections with queries still in flight");
        }

        self.connections.disconnect_all(&self.topology.load()).await
    }
}
