//! Database Driver Port
//!
//! Defines the interface for opening and using connections to a single
//! database endpoint. The query layer that actually issues SQL lives on the
//! other side of this port.

use crate::domain::entities::NodeConfig;
use async_trait::async_trait;
use std::sync::Arc;

/// Shared handle to a live database connection.
pub type DbConnection = Arc<dyn DatabaseConnection>;

/// Opens connections to database endpoints.
///
/// This is an outbound port. Implementations decide what "connected" means
/// (a TCP session, a driver pool, a simulated endpoint); callers only rely on
/// the handle they get back.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Open a handle using the limits and timeouts in `config`.
    async fn connect(&self, config: &NodeConfig) -> Result<DbConnection, ConnectError>;
}

/// A connection handle to one database endpoint.
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// `host:port` of the endpoint this handle talks to.
    fn endpoint(&self) -> &str;

    /// Issue a trivial liveness query.
    async fn ping(&self) -> Result<(), String>;

    /// Current replication lag reported by the engine.
    ///
    /// Returns `None` when the engine exposes no lag signal.
    async fn replication_lag(&self) -> Option<u64>;

    /// Ask the engine to accept writes on this endpoint.
    ///
    /// Physical replication is handled by the engine; the default does nothing.
    async fn promote(&self) -> Result<(), String> {
        Ok(())
    }

    /// Close the handle.
    async fn disconnect(&self) -> Result<(), String>;
}

/// Connection errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectError {
    /// Endpoint refused or reset the connection
    #[error("connection to {endpoint} failed: {reason}")]
    Unreachable { endpoint: String, reason: String },
    /// Endpoint did not answer within the connect timeout
    #[error("connection to {endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },
}

impl ConnectError {
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Unreachable { endpoint, .. } | Self::Timeout { endpoint, .. } => endpoint,
        }
    }
}
