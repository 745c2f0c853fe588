//! Query Router
//!
//! Maps a query classification to a live connection handle using one
//! topology snapshot per decision.

use crate::domain::ports::DbConnection;
use crate::domain::services::ReadBalancer;
use crate::domain::topology::TopologyStore;
use crate::domain::value_objects::QueryType;
use std::sync::Arc;

/// Node a query was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    Primary,
    /// Replica index in the snapshot used for the decision
    Replica(usize),
}

/// Outcome of one routing decision.
#[derive(Clone)]
pub struct Route {
    pub target: RouteTarget,
    pub connection: DbConnection,
    /// A read fell back to the primary because no replica was healthy
    pub degraded: bool,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("target", &self.target)
            .field("endpoint", &self.connection.endpoint())
            .field("degraded", &self.degraded)
            .finish()
    }
}

/// Routing errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RouteError {
    /// The primary has no live handle (initial connect failed and nothing
    /// has reconnected it yet)
    #[error("primary {endpoint} has no connection")]
    PrimaryUnavailable { endpoint: String },
}

/// Read/write splitting router.
pub struct QueryRouter {
    topology: Arc<TopologyStore>,
    balancer: ReadBalancer,
}

impl QueryRouter {
    pub fn new(topology: Arc<TopologyStore>) -> Self {
        Self {
            topology,
            balancer: ReadBalancer::new(),
        }
    }

    /// Pick a connection for `query_type`.
    ///
    /// WRITE and TRANSACTION always go to the primary. READ round-robins over
    /// the healthy replicas and falls back to the primary when there are none.
    pub fn route(&self, query_type: QueryType) -> Result<Route, RouteError> {
        let topology = self.topology.load();

        if !query_type.requires_primary() {
            if let Some(id) = self.balancer.next(topology.healthy_replica_ids()) {
                // A healthy replica that lost its handle falls through to the primary
                if let Some(connection) = topology.replica(id).and_then(|r| r.connection()) {
                    return Ok(Route {
                        target: RouteTarget::Replica(id),
                        connection,
                        degraded: false,
                    });
                }
            }
            tracing::debug!("no healthy replica, routing read to primary");
        }

        let primary = topology.primary();
        let connection = primary
            .connection()
            .ok_or_else(|| RouteError::PrimaryUnavailable {
                endpoint: primary.endpoint(),
            })?;

        Ok(Route {
            target: RouteTarget::Primary,
            connection,
            degraded: !query_type.requires_primary(),
        })
    }
}
