//! Application Layer
//!
//! Use cases built on the domain and infrastructure: routing, failover,
//! instrumentation and the [`DatabaseRouter`] facade.

pub mod database_router;
pub mod failover_coordinator;
pub mod instrumentation;
pub mod query_router;

pub use database_router::{DatabaseRouter, RouterConfig};
pub use failover_coordinator::{FailoverAbort, FailoverConfig, FailoverCoordinator, FailoverOutcome};
pub use instrumentation::{InstrumentationConfig, MetricsSnapshot, QueryBreakdown, QueryInstrumentation};
pub use query_router::{QueryRouter, Route, RouteError, RouteTarget};
