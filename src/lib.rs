//! replica-router Library
//!
//! Client-side primary/replica query routing with health monitoring and
//! automatic failover.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{
    DatabaseRouter, FailoverOutcome, MetricsSnapshot, RouteError, RouterConfig,
};
pub use config::{load_config, resolve, Config, ConfigError};
pub use domain::entities::{ClusterStatus, FailoverEvent, HealthSnapshot, NodeConfig, QueryEvent};
pub use domain::ports::{
    ConnectError, DatabaseConnection, DatabaseDriver, DbConnection, FailoverNotifier,
    NotificationError,
};
pub use domain::value_objects::{HealthState, NodeRole, QueryType, RawStatement, SslMode};
