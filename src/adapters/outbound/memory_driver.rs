//! In-Memory Database Driver
//!
//! Implements DatabaseDriver against simulated endpoints held in a DashMap.
//! Each endpoint can be made unreachable, slow, lagging or failing at
//! runtime, and counts what was done to it.

use crate::domain::entities::NodeConfig;
use crate::domain::ports::{ConnectError, DatabaseConnection, DatabaseDriver, DbConnection};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A simulated database endpoint.
#[derive(Debug, Default)]
pub struct SimulatedEndpoint {
    unreachable: AtomicBool,
    connect_delay_ms: AtomicU64,
    ping_delay_ms: AtomicU64,
    disconnect_delay_ms: AtomicU64,
    promote_delay_ms: AtomicU64,
    disconnect_fails: AtomicBool,
    promote_fails: AtomicBool,
    replication_lag: Mutex<Option<u64>>,
    connects: AtomicU64,
    disconnects: AtomicU64,
    pings: AtomicU64,
    promotions: AtomicU64,
    active_pings: AtomicUsize,
    max_concurrent_pings: AtomicUsize,
}

impl SimulatedEndpoint {
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        !self.unreachable.load(Ordering::SeqCst)
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.connect_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_ping_delay(&self, delay: Duration) {
        self.ping_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_disconnect_delay(&self, delay: Duration) {
        self.disconnect_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_promote_delay(&self, delay: Duration) {
        self.promote_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_disconnect_fails(&self, fails: bool) {
        self.disconnect_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_promote_fails(&self, fails: bool) {
        self.promote_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_replication_lag(&self, lag: Option<u64>) {
        *self.replication_lag.lock() = lag;
    }

    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> u64 {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn ping_count(&self) -> u64 {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn promote_count(&self) -> u64 {
        self.promotions.load(Ordering::SeqCst)
    }

    /// Highest number of pings that were ever in flight at once.
    pub fn max_concurrent_pings(&self) -> usize {
        self.max_concurrent_pings.load(Ordering::SeqCst)
    }

    async fn delay(millis: &AtomicU64) {
        let ms = millis.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

/// Decrements the in-flight ping counter on drop, including on cancellation.
struct PingGuard<'a>(&'a AtomicUsize);

impl Drop for PingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Driver over simulated endpoints.
///
/// Endpoints are created on first use (reachable, no delay, no lag).
#[derive(Debug, Default)]
pub struct InMemoryDriver {
    endpoints: DashMap<String, Arc<SimulatedEndpoint>>,
}

impl InMemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the endpoint for `host:port`.
    pub fn endpoint(&self, endpoint: &str) -> Arc<SimulatedEndpoint> {
        self.endpoints
            .entry(endpoint.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl DatabaseDriver for InMemoryDriver {
    async fn connect(&self, config: &NodeConfig) -> Result<DbConnection, ConnectError> {
        let endpoint = config.endpoint();
        let state = self.endpoint(&endpoint);

        SimulatedEndpoint::delay(&state.connect_delay_ms).await;
        if !state.is_reachable() {
            return Err(ConnectError::Unreachable {
                endpoint,
                reason: "connection refused".to_string(),
            });
        }

        state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemoryConnection {
            endpoint,
            state,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Handle to a simulated endpoint.
#[derive(Debug)]
pub struct InMemoryConnection {
    endpoint: String,
    state: Arc<SimulatedEndpoint>,
    closed: AtomicBool,
}

#[async_trait]
impl DatabaseConnection for InMemoryConnection {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn ping(&self) -> Result<(), String> {
        let active = self.state.active_pings.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = PingGuard(&self.state.active_pings);
        self.state.max_concurrent_pings.fetch_max(active, Ordering::SeqCst);
        self.state.pings.fetch_add(1, Ordering::SeqCst);

        SimulatedEndpoint::delay(&self.state.ping_delay_ms).await;

        if self.closed.load(Ordering::SeqCst) {
            return Err("connection closed".to_string());
        }
        if !self.state.is_reachable() {
            return Err("server closed the connection unexpectedly".to_string());
        }
        Ok(())
    }

    async fn replication_lag(&self) -> Option<u64> {
        *self.state.replication_lag.lock()
    }

    async fn promote(&self) -> Result<(), String> {
        SimulatedEndpoint::delay(&self.state.promote_delay_ms).await;
        if self.state.promote_fails.load(Ordering::SeqCst) {
            return Err("promotion rejected".to_string());
        }
        self.state.promotions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), String> {
        SimulatedEndpoint::delay(&self.state.disconnect_delay_ms).await;
        self.closed.store(true, Ordering::SeqCst);
        if self.state.disconnect_fails.load(Ordering::SeqCst) {
            return Err("disconnect failed".to_string());
        }
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
