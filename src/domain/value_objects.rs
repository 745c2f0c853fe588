//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use serde::{Deserialize, Serialize};

/// Role a node plays in the current topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// The sole writable node
    Primary,
    /// A read-only node kept in sync by the database engine
    Replica,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Replica => "replica",
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Health classification of a node.
///
/// `Unknown` is only ever the initial state; the first completed probe moves
/// the node to `Healthy` or `Unhealthy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of a query for routing purposes.
///
/// The router only ever branches on this three-way split, never on the
/// entity a query touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Read-only query, eligible for a healthy replica
    Read,
    /// Mutating statement, always sent to the primary
    Write,
    /// Interactive or batched transaction, always sent to the primary
    Transaction,
}

impl QueryType {
    /// Whether this classification must be served by the primary.
    pub fn requires_primary(&self) -> bool {
        !matches!(self, Self::Read)
    }

    /// Classify a raw statement by the entry point it was issued through.
    ///
    /// The statement text is never inspected.
    pub fn from_raw(kind: RawStatement) -> Self {
        match kind {
            RawStatement::Execute => Self::Write,
            RawStatement::Query => Self::Read,
        }
    }

    /// Classify an ORM operation name.
    ///
    /// Known read operations go to replicas; everything else, including
    /// unrecognized names, is treated as a write.
    ///
    /// # Examples
    /// ```
    /// use replica_router::QueryType;
    ///
    /// assert_eq!(QueryType::for_operation("findMany"), QueryType::Read);
    /// assert_eq!(QueryType::for_operation("upsert"), QueryType::Write);
    /// assert_eq!(QueryType::for_operation("somethingNew"), QueryType::Write);
    /// ```
    pub fn for_operation(operation: &str) -> Self {
        match operation {
            "findUnique" | "findUniqueOrThrow" | "findFirst" | "findFirstOrThrow"
            | "findMany" | "count" | "aggregate" | "groupBy" => Self::Read,
            _ => Self::Write,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Transaction => "transaction",
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Entry point a raw SQL statement was issued through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawStatement {
    /// Statement executed for its side effects (row count only)
    Execute,
    /// Statement executed for its result set
    Query,
}

/// TLS negotiation mode for a database connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    /// Parse an SSL mode, falling back to `Prefer` for unknown values.
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "disable" | "false" | "0" => Self::Disable,
            "require" | "true" | "1" => Self::Require,
            "verify-ca" => Self::VerifyCa,
            "verify-full" => Self::VerifyFull,
            _ => Self::Prefer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Prefer => "prefer",
            Self::Require => "require",
            Self::VerifyCa => "verify-ca",
            Self::VerifyFull => "verify-full",
        }
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
