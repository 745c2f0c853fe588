//! Connection Manager
//!
//! Owns the lifecycle of node connection handles: connect, reconnect and
//! disconnect. Every network call is bounded by a timeout; failures are
//! reported to the caller and never unwind further.

use crate::domain::entities::{Node, NodeConfig};
use crate::domain::ports::{ConnectError, DatabaseDriver, DbConnection};
use crate::domain::topology::Topology;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

/// Connection manager configuration.
#[derive(Debug, Clone)]
pub struct ConnectionManagerConfig {
    /// Upper bound for a single disconnect
    pub disconnect_timeout: Duration,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            disconnect_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of a shutdown-wide disconnect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisconnectReport {
    /// Nodes whose handle closed cleanly
    pub disconnected: Vec<String>,
    /// Nodes whose disconnect failed, with the error
    pub failed: Vec<(String, String)>,
    /// Nodes that had no handle to close
    pub skipped: Vec<String>,
}

/// Connection lifecycle manager.
pub struct ConnectionManager {
    driver: Arc<dyn DatabaseDriver>,
    config: ConnectionManagerConfig,
}

impl ConnectionManager {
    pub fn new(driver: Arc<dyn DatabaseDriver>, config: ConnectionManagerConfig) -> Self {
        Self { driver, config }
    }

    /// Open a handle, bounded by the node's connect timeout.
    pub async fn connect(&self, config: &NodeConfig) -> Result<DbConnection, ConnectError> {
        match tokio::time::timeout(config.connect_timeout, self.driver.connect(config)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout {
                endpoint: config.endpoint(),
                timeout_ms: config.connect_timeout.as_millis() as u64,
            }),
        }
    }

    /// Connect and wrap the result in a node.
    ///
    /// A failed connect still yields a node (unhealthy, without a handle) so
    /// later reconnects can bring it back.
    pub async fn register(&self, name: &str, config: NodeConfig) -> Arc<Node> {
        match self.connect(&config).await {
            Ok(conn) => {
                tracing::info!("{} connected to {}", name, config.endpoint());
                Arc::new(Node::new(name, config, Some(conn)))
            }
            Err(e) => {
                tracing::error!("{} initial connect failed: {}", name, e);
                let node = Node::new(name, config, None);
                node.record_connect_failure(e.to_string());
                Arc::new(node)
            }
        }
    }

    /// Replace a node's handle with a fresh one.
    ///
    /// The old handle is closed first (errors ignored). It stays stored if
    /// the new connect fails.
    pub async fn reconnect(&self, node: &Node) -> Result<(), ConnectError> {
        let _probe = node.probe_lock.lock().await;
        self.reconnect_locked(node).await
    }

    /// [`reconnect`](Self::reconnect) for callers already holding the node's probe lock.
    pub(crate) async fn reconnect_locked(&self, node: &Node) -> Result<(), ConnectError> {
        if let Some(old) = node.connection() {
            if let Err(e) = self.disconnect(old).await {
                tracing::debug!("{} ignoring disconnect error during reconnect: {}", node.name(), e);
            }
        }

        let conn = self.connect(node.config()).await?;
        node.replace_connection(Some(conn));
        tracing::info!("{} reconnected to {}", node.name(), node.endpoint());
        Ok(())
    }

    /// Close one handle, bounded by the disconnect timeout.
    pub async fn disconnect(&self, conn: DbConnection) -> Result<(), String> {
        match tokio::time::timeout(self.config.disconnect_timeout, conn.disconnect()).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "disconnect from {} timed out after {}ms",
                conn.endpoint(),
                self.config.disconnect_timeout.as_millis()
            )),
        }
    }

    /// Best-effort disconnect scheduled in the background.
    pub fn disconnect_later(self: &Arc<Self>, label: String, conn: DbConnection) {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.disconnect(conn).await {
                tracing::debug!("{} disconnect failed (ignored): {}", label, e);
            }
        });
    }

    /// Disconnect every node in the topology concurrently.
    ///
    /// Waits for every outcome; one failure never stops the others.
    pub async fn disconnect_all(&self, topology: &Topology) -> DisconnectReport {
        let nodes: Vec<Arc<Node>> = std::iter::once(topology.primary().clone())
            .chain(topology.replicas().iter().cloned())
            .collect();

        let outcomes = join_all(nodes.iter().map(|node| async move {
            let result = match node.replace_connection(None) {
                Some(conn) => Some(self.disconnect(conn).await),
                None => None,
            };
            (node.name().to_string(), result)
        }))
        .await;

        let mut report = DisconnectReport::default();
        for (name, result) in outcomes {
            match result {
                Some(Ok(())) => report.disconnected.push(name),
                Some(Err(e)) => {
                    tracing::warn!("{} disconnect failed during shutdown: {}", name, e);
                    report.failed.push((name, e));
                }
                None => report.skipped.push(name),
            }
        }

        tracing::info!(
            "disconnected {} nodes ({} failed, {} without handle)",
            report.disconnected.len(),
            report.failed.len(),
            report.skipped.len()
        );
        report
    }
}
