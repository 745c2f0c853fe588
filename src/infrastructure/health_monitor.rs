//! Health Monitor
//!
//! Periodically probes every node, keeps the healthy replica set current,
//! reconnects failed nodes and hands an unhealthy primary to failover.

use crate::domain::entities::Node;
use crate::domain::topology::TopologyStore;
use crate::domain::value_objects::HealthState;
use crate::infrastructure::connection_manager::ConnectionManager;
use crate::infrastructure::shutdown::ShutdownController;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Shortest interval the monitoring loop will tick at
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Health monitor configuration.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Interval between health check cycles
    pub interval: Duration,
    /// Probes slower than this mark the node unhealthy
    pub max_response_time: Duration,
    /// Hard upper bound for a single probe
    pub probe_timeout: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(30_000),
            max_response_time: Duration::from_millis(5_000),
            probe_timeout: Duration::from_millis(10_000),
        }
    }
}

/// Reacts to an unhealthy primary.
#[async_trait]
pub trait FailoverTrigger: Send + Sync {
    /// Returns true if a replica was promoted.
    async fn primary_failed(&self) -> bool;
}

/// Why a probe failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProbeError {
    #[error("node has no connection")]
    NotConnected,
    #[error("probe failed: {0}")]
    Failed(String),
    #[error("probe timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("latency exceeded: {latency_ms}ms > {threshold_ms}ms")]
    LatencyExceeded { latency_ms: u64, threshold_ms: u64 },
}

/// Result of probing one node.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeResult {
    Healthy { latency_ms: u64 },
    Unhealthy { error: ProbeError, latency_ms: u64 },
}

impl ProbeResult {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeResult::Healthy { .. })
    }

    pub fn latency_ms(&self) -> u64 {
        match self {
            ProbeResult::Healthy { latency_ms } | ProbeResult::Unhealthy { latency_ms, .. } => {
                *latency_ms
            }
        }
    }

    pub fn error(&self) -> Option<&ProbeError> {
        match self {
            ProbeResult::Healthy { .. } => None,
            ProbeResult::Unhealthy { error, .. } => Some(error),
        }
    }
}

/// Summary of one health check cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub primary_healthy: bool,
    /// Whether this cycle promoted a replica
    pub promoted: bool,
    pub healthy_replicas: usize,
    pub total_replicas: usize,
    /// Failed nodes whose reconnect succeeded
    pub reconnected: usize,
}

/// Active health monitor for all nodes in the topology.
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    topology: Arc<TopologyStore>,
    connections: Arc<ConnectionManager>,
    failover: Option<Arc<dyn FailoverTrigger>>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthMonitorConfig,
        topology: Arc<TopologyStore>,
        connections: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            config,
            topology,
            connections,
            failover: None,
        }
    }

    /// Set the handler invoked when the primary probe fails.
    pub fn with_failover(mut self, trigger: Arc<dyn FailoverTrigger>) -> Self {
        self.failover = Some(trigger);
        self
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    /// Probe a node without recording the outcome.
    ///
    /// Waits for any probe already running against the same node.
    pub async fn probe(&self, node: &Node) -> ProbeResult {
        let _probe = node.probe_lock.lock().await;
        self.probe_locked(node).await
    }

    async fn probe_locked(&self, node: &Node) -> ProbeResult {
        let Some(conn) = node.connection() else {
            return ProbeResult::Unhealthy {
                error: ProbeError::NotConnected,
                latency_ms: 0,
            };
        };

        let start = Instant::now();
        let outcome = tokio::time::timeout(self.config.probe_timeout, conn.ping()).await;
        let latency_ms = start.elapsed().as_millis() as u64;
        let threshold_ms = self.config.max_response_time.as_millis() as u64;

        match outcome {
            Ok(Ok(())) if latency_ms > threshold_ms => ProbeResult::Unhealthy {
                error: ProbeError::LatencyExceeded {
                    latency_ms,
                    threshold_ms,
                },
                latency_ms,
            },
            Ok(Ok(())) => ProbeResult::Healthy { latency_ms },
            Ok(Err(e)) => ProbeResult::Unhealthy {
                error: ProbeError::Failed(e),
                latency_ms,
            },
            Err(_) => ProbeResult::Unhealthy {
                error: ProbeError::Timeout {
                    timeout_ms: self.config.probe_timeout.as_millis() as u64,
                },
                latency_ms,
            },
        }
    }

    /// Store a probe outcome on the node and log state transitions.
    fn record(node: &Node, result: &ProbeResult) {
        let previous = node.record_health(
            result.is_healthy(),
            Some(result.latency_ms()),
            result.error().map(|e| e.to_string()),
        );

        match result {
            ProbeResult::Healthy { latency_ms } if previous != HealthState::Healthy => {
                tracing::info!("{} is now healthy ({}ms)", node.name(), latency_ms);
            }
            ProbeResult::Unhealthy { error, .. } if previous != HealthState::Unhealthy => {
                tracing::warn!("{} is now unhealthy: {}", node.name(), error);
            }
            _ => {}
        }
    }

    /// Probe, record and, if it failed, reconnect one replica.
    async fn check_replica(&self, node: &Arc<Node>) -> (ProbeResult, bool) {
        let _probe = node.probe_lock.lock().await;

        let result = self.probe_locked(node).await;
        Self::record(node, &result);
        self.topology
            .update(|t| t.with_replica_health(node, result.is_healthy()));

        let mut reconnected = false;
        if !result.is_healthy() {
            match self.connections.reconnect_locked(node).await {
                Ok(()) => reconnected = true,
                Err(e) => tracing::debug!("{} reconnect failed: {}", node.name(), e),
            }
        }
        (result, reconnected)
    }

    async fn check_primary(&self, node: &Arc<Node>) -> ProbeResult {
        let _probe = node.probe_lock.lock().await;
        let result = self.probe_locked(node).await;
        Self::record(node, &result);
        result
    }

    /// Run one full cycle: primary first, then every replica concurrently.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let primary = self.topology.load().primary().clone();
        let primary_result = self.check_primary(&primary).await;
        report.primary_healthy = primary_result.is_healthy();

        if !report.primary_healthy {
            report.promoted = match &self.failover {
                Some(failover) => failover.primary_failed().await,
                None => false,
            };

            if !report.promoted {
                let _probe = primary.probe_lock.lock().await;
                match self.connections.reconnect_locked(&primary).await {
                    Ok(()) => report.reconnected += 1,
                    Err(e) => tracing::debug!("{} reconnect failed: {}", primary.name(), e),
                }
            }
        }

        // Promotion may have replaced the replica list
        let topology = self.topology.load();
        let results = join_all(topology.replicas().iter().map(|r| self.check_replica(r))).await;
        report.reconnected += results.iter().filter(|(_, reconnected)| *reconnected).count();

        let topology = self.topology.load();
        report.healthy_replicas = topology.healthy_count();
        report.total_replicas = topology.replicas().len();

        tracing::debug!(
            "health check cycle: primary_healthy={} replicas={}/{} reconnected={}",
            report.primary_healthy,
            report.healthy_replicas,
            report.total_replicas,
            report.reconnected
        );
        report
    }

    /// Start the monitoring loop: one cycle right away, then one per interval.
    ///
    /// The loop exits when `shutdown` fires.
    pub fn start(self: Arc<Self>, shutdown: ShutdownController) -> JoinHandle<()> {
        tokio::spawn(async move {
            if self.config.interval < MIN_INTERVAL {
                tracing::warn!(
                    "health check interval {:?} too short, using {:?}",
                    self.config.interval,
                    MIN_INTERVAL
                );
            }
            let mut ticker = tokio::time::interval(self.config.interval.max(MIN_INTERVAL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.stopped() => break,
                    _ = ticker.tick() => {
                        self.run_cycle().await;
                    }
                }
            }

            tracing::info!("health monitor stopped");
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::adapters::outbound::InMemoryDriver;
    use crate::domain::entities::NodeConfig;
    use crate::domain::topology::Topology;
    use crate::infrastructure::connection_manager::ConnectionManagerConfig;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingTrigger {
        calls: AtomicUsize,
        promote: AtomicBool,
    }

    #[async_trait]
    impl FailoverTrigger for CountingTrigger {
        async fn primary_failed(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.promote.load(Ordering::SeqCst)
        }
    }

    struct Fixture {
        driver: Arc<InMemoryDriver>,
        topology: Arc<TopologyStore>,
        monitor: HealthMonitor,
    }

    fn node_config(host: &str) -> NodeConfig {
        NodeConfig {
            host: host.to_string(),
            connect_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    fn monitor_config() -> HealthMonitorConfig {
        HealthMonitorConfig {
            interval: Duration::from_millis(50),
            max_response_time: Duration::from_millis(100),
            probe_timeout: Duration::from_millis(300),
        }
    }

    async fn fixture(replicas: usize) -> Fixture {
        let driver = Arc::new(InMemoryDriver::new());
        let connections = Arc::new(ConnectionManager::new(
            driver.clone(),
            ConnectionManagerConfig::default(),
        ));

        let primary = connections.register("primary", node_config("p")).await;
        let mut nodes = Vec::new();
        for i in 0..replicas {
            nodes.push(
                connections
                    .register(&format!("replica-{}", i), node_config(&format!("r{}", i)))
                    .await,
            );
        }

        let topology = Arc::new(TopologyStore::new(Topology::new(primary, nodes)));
        let monitor = HealthMonitor::new(monitor_config(), topology.clone(), connections);
        Fixture {
            driver,
            topology,
            monitor,
        }
    }

    #[test]
    fn test_config_default() {
        let config = HealthMonitorConfig::default();
        assert_eq!(config.interval, Duration::from_millis(30_000));
        assert_eq!(config.max_response_time, Duration::from_millis(5_000));
        assert_eq!(config.probe_timeout, Duration::from_millis(10_000));
    }

    #[test]
    fn test_probe_result_accessors() {
        let ok = ProbeResult::Healthy { latency_ms: 3 };
        assert!(ok.is_healthy());
        assert_eq!(ok.latency_ms(), 3);
        assert!(ok.error().is_none());

        let bad = ProbeResult::Unhealthy {
            error: ProbeError::NotConnected,
            latency_ms: 0,
        };
        assert!(!bad.is_healthy());
        assert_eq!(bad.error(), Some(&ProbeError::NotConnected));
    }

    #[test]
    fn test_probe_error_display() {
        let err = ProbeError::LatencyExceeded {
            latency_ms: 6000,
            threshold_ms: 5000,
        };
        assert_eq!(err.to_string(), "latency exceeded: 6000ms > 5000ms");
    }

    #[tokio::test]
    async fn test_probe_healthy() {
        let f = fixture(0).await;
        let primary = f.topology.load().primary().clone();
        assert!(f.monitor.probe(&primary).await.is_healthy());
    }

    #[tokio::test]
    async fn test_probe_unreachable() {
        let f = fixture(0).await;
        f.driver.endpoint("p:5432").set_reachable(false);
        let primary = f.topology.load().primary().clone();

        let result = f.monitor.probe(&primary).await;
        assert!(matches!(result.error(), Some(ProbeError::Failed(_))));
    }

    #[tokio::test]
    async fn test_probe_not_connected() {
        let f = fixture(0).await;
        let node = Node::new("orphan", node_config("x"), None);
        let result = f.monitor.probe(&node).await;
        assert_eq!(result.error(), Some(&ProbeError::NotConnected));
    }

    #[tokio::test]
    async fn test_probe_latency_exceeded() {
        let f = fixture(0).await;
        f.driver.endpoint("p:5432").set_ping_delay(Duration::from_millis(150));
        let primary = f.topology.load().primary().clone();

        let result = f.monitor.probe(&primary).await;
        assert!(matches!(
            result.error(),
            Some(ProbeError::LatencyExceeded { threshold_ms: 100, .. })
        ));
    }

    #[tokio::test]
    async fn test_probe_timeout() {
        let f = fixture(0).await;
        f.driver.endpoint("p:5432").set_ping_delay(Duration::from_secs(2));
        let primary = f.topology.load().primary().clone();

        let result = f.monitor.probe(&primary).await;
        assert_eq!(result.error(), Some(&ProbeError::Timeout { timeout_ms: 300 }));
    }

    #[tokio::test]
    async fn test_cycle_marks_replicas_healthy() {
        let f = fixture(3).await;
        assert_eq!(f.topology.load().healthy_count(), 0);

        let report = f.monitor.run_cycle().await;

        assert!(report.primary_healthy);
        assert_eq!(report.healthy_replicas, 3);
        assert_eq!(report.total_replicas, 3);
        assert!(f.topology.load().primary().is_healthy());
    }

    #[tokio::test]
    async fn test_cycle_removes_and_restores_replica() {
        let f = fixture(3).await;
        f.monitor.run_cycle().await;

        f.driver.endpoint("r1:5432").set_reachable(false);
        f.monitor.run_cycle().await;
        let ids: Vec<_> = f.topology.load().healthy_replica_ids().iter().copied().collect();
        assert_eq!(ids, vec![0, 2]);
        assert_eq!(
            f.topology.load().replicas()[1].health_state(),
            HealthState::Unhealthy
        );

        f.driver.endpoint("r1:5432").set_reachable(true);
        f.monitor.run_cycle().await;
        let ids: Vec<_> = f.topology.load().healthy_replica_ids().iter().copied().collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_cycle_reconnects_failed_replica() {
        let f = fixture(1).await;
        f.monitor.run_cycle().await;
        let endpoint = f.driver.endpoint("r0:5432");
        assert_eq!(endpoint.connect_count(), 1);

        // Ping fails, but the endpoint accepts new connections
        endpoint.set_ping_delay(Duration::from_millis(150));
        let report = f.monitor.run_cycle().await;

        assert_eq!(report.reconnected, 1);
        assert_eq!(endpoint.connect_count(), 2);
        assert_eq!(report.healthy_replicas, 0);
    }

    #[tokio::test]
    async fn test_cycle_invokes_failover_on_primary_failure() {
        let trigger = Arc::new(CountingTrigger {
            calls: AtomicUsize::new(0),
            promote: AtomicBool::new(true),
        });
        let mut f = fixture(1).await;
        f.monitor = f.monitor.with_failover(trigger.clone());

        f.monitor.run_cycle().await;
        assert_eq!(trigger.calls.load(Ordering::SeqCst), 0);

        f.driver.endpoint("p:5432").set_reachable(false);
        let report = f.monitor.run_cycle().await;

        assert!(!report.primary_healthy);
        assert!(report.promoted);
        assert_eq!(trigger.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_primary_reconnect_when_not_promoted() {
        let trigger = Arc::new(CountingTrigger {
            calls: AtomicUsize::new(0),
            promote: AtomicBool::new(false),
        });
        let mut f = fixture(0).await;
        f.monitor = f.monitor.with_failover(trigger.clone());

        // Probe fails on latency, reconnect still succeeds
        f.driver.endpoint("p:5432").set_ping_delay(Duration::from_millis(150));
        let report = f.monitor.run_cycle().await;

        assert!(!report.primary_healthy);
        assert!(!report.promoted);
        assert_eq!(report.reconnected, 1);
        assert_eq!(f.driver.endpoint("p:5432").connect_count(), 2);
    }

    #[tokio::test]
    async fn test_same_node_probes_never_overlap() {
        let f = fixture(0).await;
        let endpoint = f.driver.endpoint("p:5432");
        endpoint.set_ping_delay(Duration::from_millis(40));
        let primary = f.topology.load().primary().clone();

        let (a, b, c) = tokio::join!(
            f.monitor.probe(&primary),
            f.monitor.probe(&primary),
            f.monitor.run_cycle(),
        );

        assert!(a.is_healthy() && b.is_healthy() && c.primary_healthy);
        assert_eq!(endpoint.ping_count(), 3);
        assert_eq!(endpoint.max_concurrent_pings(), 1);
    }

    #[tokio::test]
    async fn test_distinct_nodes_probe_concurrently() {
        let f = fixture(3).await;
        for i in 0..3 {
            f.driver
                .endpoint(&format!("r{}:5432", i))
                .set_ping_delay(Duration::from_millis(80));
        }

        let start = Instant::now();
        let report = f.monitor.run_cycle().await;

        assert_eq!(report.healthy_replicas, 3);
        // Sequential probing would take at least 240ms
        assert!(start.elapsed() < Duration::from_millis(220));
    }

    #[tokio::test]
    async fn test_start_runs_eagerly_and_stops() {
        let f = fixture(1).await;
        let shutdown = ShutdownController::new();
        let monitor = Arc::new(f.monitor);

        let handle = monitor.clone().start(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.topology.load().healthy_count(), 1);

        shutdown.shutdown();
        let stopped = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(stopped.is_ok());
    }

    #[tokio::test]
    async fn test_start_with_zero_interval() {
        let mut f = fixture(1).await;
        f.monitor.config.interval = Duration::ZERO;
        let shutdown = ShutdownController::new();
        let monitor = Arc::new(f.monitor);

        let handle = monitor.clone().start(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.topology.load().healthy_count(), 1);
        assert!(f.topology.load().primary().is_healthy());

        shutdown.shutdown();
        let stopped = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap();
        assert!(stopped.is_ok());
    }
}
