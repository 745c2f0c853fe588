//! Domain Entities - Core business objects
//!
//! These entities represent the nodes of a primary/replica database
//! deployment and the records emitted while routing to them.

use crate::domain::ports::DbConnection;
use crate::domain::value_objects::{HealthState, NodeRole, QueryType, SslMode};
use parking_lot::RwLock;
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Immutable connection parameters for one database endpoint.
#[derive(Clone, PartialEq)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    /// Database name
    pub database: String,
    pub user: String,
    pub password: String,
    pub ssl_mode: SslMode,
    /// Maximum number of connections the handle may hold open at once
    pub connection_limit: u32,
    /// Timeout for establishing a connection
    pub connect_timeout: Duration,
    /// How long the handle waits for a free connection slot
    pub pool_timeout: Duration,
}

impl NodeConfig {
    /// `host:port` of this endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Same credentials, database and limits against another endpoint.
    pub fn with_endpoint(&self, host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..self.clone()
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "app".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            ssl_mode: SslMode::Prefer,
            connection_limit: 10,
            connect_timeout: Duration::from_secs(5),
            pool_timeout: Duration::from_secs(10),
        }
    }
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("ssl_mode", &self.ssl_mode)
            .field("connection_limit", &self.connection_limit)
            .field("connect_timeout", &self.connect_timeout)
            .field("pool_timeout", &self.pool_timeout)
            .finish()
    }
}

/// Last known health of a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeHealth {
    pub state: HealthState,
    /// Latency of the last completed probe
    pub last_latency_ms: Option<u64>,
    /// Error of the last failed probe or connect
    pub last_error: Option<String>,
    /// When the node was last probed (ms since epoch)
    pub last_checked_at: Option<u64>,
}

/// A database endpoint with its connection handle and health.
///
/// Role and index are positional: they are whatever the current
/// [`Topology`](crate::domain::topology::Topology) snapshot says.
/// Health and connection are only written by the health monitor and the
/// connection manager.
pub struct Node {
    name: String,
    config: NodeConfig,
    connection: RwLock<Option<DbConnection>>,
    health: RwLock<NodeHealth>,
    /// Serializes probes and reconnects against this node
    pub(crate) probe_lock: tokio::sync::Mutex<()>,
}

impl Node {
    pub fn new(name: impl Into<String>, config: NodeConfig, connection: Option<DbConnection>) -> Self {
        Self {
            name: name.into(),
            config,
            connection: RwLock::new(connection),
            health: RwLock::new(NodeHealth::default()),
            probe_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Stable name used in logs ("primary", "replica-0", ...).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn endpoint(&self) -> String {
        self.config.endpoint()
    }

    /// Current connection handle, if any.
    pub fn connection(&self) -> Option<DbConnection> {
        self.connection.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.read().is_some()
    }

    /// Replace the connection handle, returning the previous one.
    pub(crate) fn replace_connection(&self, connection: Option<DbConnection>) -> Option<DbConnection> {
        std::mem::replace(&mut *self.connection.write(), connection)
    }

    pub fn health(&self) -> NodeHealth {
        self.health.read().clone()
    }

    pub fn health_state(&self) -> HealthState {
        self.health.read().state
    }

    pub fn is_healthy(&self) -> bool {
        self.health_state() == HealthState::Healthy
    }

    /// Record a probe outcome and return the previous state.
    pub(crate) fn record_health(
        &self,
        healthy: bool,
        latency_ms: Option<u64>,
        error: Option<String>,
    ) -> HealthState {
        let mut health = self.health.write();
        let previous = health.state;
        health.state = if healthy {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        };
        health.last_latency_ms = latency_ms;
        health.last_error = error;
        health.last_checked_at = Some(now_millis());
        previous
    }

    /// Record a connect failure without a probe.
    pub(crate) fn record_connect_failure(&self, error: String) {
        let mut health = self.health.write();
        health.state = HealthState::Unhealthy;
        health.last_error = Some(error);
        health.last_checked_at = Some(now_millis());
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint())
            .field("connected", &self.is_connected())
            .field("health", &*self.health.read())
            .finish()
    }
}

/// Log record for one routed operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryEvent {
    pub query_type: QueryType,
    /// Logical entity the operation touched ("user", "order", ...)
    pub entity: String,
    pub operation: String,
    /// ms since epoch
    pub timestamp: u64,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

/// Record of one promotion attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverEvent {
    pub id: uuid::Uuid,
    /// ms since epoch
    pub timestamp: u64,
    /// Index of the promoted replica in the topology it was promoted from
    pub promoted_replica: Option<usize>,
    pub previous_primary: String,
    pub new_primary: Option<String>,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

/// Point-in-time health of one node, as reported by `get_status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub role: NodeRole,
    /// Replica index; `None` for the primary
    pub index: Option<usize>,
    pub host: String,
    pub port: u16,
    pub state: HealthState,
    pub is_healthy: bool,
    pub latency_ms: Option<u64>,
    pub last_error: Option<String>,
    pub last_checked_at: Option<u64>,
    /// Whether the node is currently eligible for read routing
    pub in_pool: bool,
}

impl HealthSnapshot {
    pub fn of(node: &Node, role: NodeRole, index: Option<usize>, in_pool: bool) -> Self {
        let health = node.health();
        Self {
            role,
            index,
            host: node.config().host.clone(),
            port: node.config().port,
            state: health.state,
            is_healthy: health.state == HealthState::Healthy,
            latency_ms: health.last_latency_ms,
            last_error: health.last_error,
            last_checked_at: health.last_checked_at,
            in_pool,
        }
    }
}

/// Cluster-wide status report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    pub primary: HealthSnapshot,
    pub replicas: Vec<HealthSnapshot>,
    pub healthy_replica_count: usize,
    pub total_replica_count: usize,
    /// ms since epoch
    pub timestamp: u64,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_node_config_endpoint() {
        let config = NodeConfig {
            host: "db-1".to_string(),
            port: 6543,
            ..Default::default()
        };
        assert_eq!(config.endpoint(), "db-1:6543");
    }

    #[test]
    fn test_with_endpoint_inherits_credentials() {
        let primary = NodeConfig {
            user: "app".to_string(),
            password: "secret".to_string(),
            database: "orders".to_string(),
            connection_limit: 25,
            ..Default::default()
        };
        let replica = primary.with_endpoint("replica-1", 5433);

        assert_eq!(replica.host, "replica-1");
        assert_eq!(replica.port, 5433);
        assert_eq!(replica.user, "app");
        assert_eq!(replica.password, "secret");
        assert_eq!(replica.database, "orders");
        assert_eq!(replica.connection_limit, 25);
    }

    #[test]
    fn test_node_config_debug_redacts_password() {
        let config = NodeConfig {
            password: "hunter2".to_string(),
            ..Default::default()
        };
        let debug_str = format!("{:?}", config);
        assert!(!debug_str.contains("hunter2"));
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn test_new_node_is_unknown() {
        let node = Node::new("primary", NodeConfig::default(), None);
        assert_eq!(node.health_state(), HealthState::Unknown);
        assert!(!node.is_connected());
        assert!(node.health().last_checked_at.is_none());
    }

    #[test]
    fn test_record_health_transitions() {
        let node = Node::new("replica-0", NodeConfig::default(), None);

        let prev = node.record_health(true, Some(3), None);
        assert_eq!(prev, HealthState::Unknown);
        assert!(node.is_healthy());
        assert_eq!(node.health().last_latency_ms, Some(3));

        let prev = node.record_health(false, Some(9), Some("boom".to_string()));
        assert_eq!(prev, HealthState::Healthy);
        assert_eq!(node.health_state(), HealthState::Unhealthy);
        assert_eq!(node.health().last_error, Some("boom".to_string()));
        assert!(node.health().last_checked_at.is_some());
    }

    #[test]
    fn test_record_connect_failure() {
        let node = Node::new("replica-0", NodeConfig::default(), None);
        node.record_connect_failure("refused".to_string());
        assert_eq!(node.health_state(), HealthState::Unhealthy);
        assert_eq!(node.health().last_error, Some("refused".to_string()));
    }

    #[test]
    fn test_health_snapshot_of() {
        let node = Node::new(
            "replica-1",
            NodeConfig {
                host: "r1".to_string(),
                ..Default::default()
            },
            None,
        );
        node.record_health(true, Some(12), None);

        let snap = HealthSnapshot::of(&node, NodeRole::Replica, Some(1), true);
        assert_eq!(snap.host, "r1");
        assert_eq!(snap.index, Some(1));
        assert!(snap.is_healthy);
        assert!(snap.in_pool);
        assert_eq!(snap.latency_ms, Some(12));
    }

    #[test]
    fn test_failover_event_serializes_camel_case() {
        let event = FailoverEvent {
            id: uuid::Uuid::new_v4(),
            timestamp: 1,
            promoted_replica: Some(1),
            previous_primary: "p".to_string(),
            new_primary: Some("r1".to_string()),
            duration_ms: 4,
            success: true,
            error: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["promotedReplica"], 1);
        assert_eq!(json["previousPrimary"], "p");
        assert_eq!(json["durationMs"], 4);
    }
}
