use crate::application::{FailoverConfig, InstrumentationConfig, RouterConfig};
use crate::domain::entities::NodeConfig;
use crate::domain::value_objects::SslMode;
use crate::infrastructure::{ConnectionManagerConfig, HealthMonitorConfig, RateLimitConfig};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // Database endpoints
    pub primary: NodeConfig,
    pub replicas: Vec<NodeConfig>,

    // Health monitoring
    pub health_check_interval_ms: u64,
    pub max_response_time_ms: u64,
    pub probe_timeout_ms: u64,
    pub slow_query_ms: u64,

    // Failover
    pub failover_enabled: bool,
    pub failover_webhook_url: Option<String>,

    // Status API
    pub status_enabled: bool,
    pub status_listen_addr: String,

    // Status API rate limiting
    pub rate_limit_max_requests: u64,
    pub rate_limit_window_ms: u64,
    pub rate_limit_burst: u64,
    pub rate_limit_max_clients: usize,

    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            primary: NodeConfig::default(),
            replicas: Vec::new(),
            health_check_interval_ms: 30_000,
            max_response_time_ms: 5_000,
            probe_timeout_ms: 10_000,
            slow_query_ms: 5_000,
            failover_enabled: true,
            failover_webhook_url: None,
            status_enabled: false,
            status_listen_addr: "0.0.0.0:9187".to_string(),
            rate_limit_max_requests: 100,
            rate_limit_window_ms: 1_000,
            rate_limit_burst: 20,
            rate_limit_max_clients: 10_000,
            debug: false,
        }
    }
}

impl Config {
    /// Settings for the routing core.
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            primary: self.primary.clone(),
            replicas: self.replicas.clone(),
            health: HealthMonitorConfig {
                interval: Duration::from_millis(self.health_check_interval_ms),
                max_response_time: Duration::from_millis(self.max_response_time_ms),
                probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            },
            failover: FailoverConfig {
                enabled: self.failover_enabled,
                ..Default::default()
            },
            instrumentation: InstrumentationConfig {
                slow_query_threshold: Duration::from_millis(self.slow_query_ms),
                ..Default::default()
            },
            connections: ConnectionManagerConfig::default(),
            drain_timeout: Duration::from_secs(10),
        }
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.rate_limit_max_requests,
            window: Duration::from_millis(self.rate_limit_window_ms),
            burst_size: self.rate_limit_burst,
            max_clients: self.rate_limit_max_clients,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid replica entry {entry:?}: {reason}")]
    InvalidReplica { entry: String, reason: String },
    #[error("{key} must be greater than zero")]
    ZeroInterval { key: &'static str },
}

fn string(env: &HashMap<String, String>, key: &str, default: &str) -> String {
    env.get(key).cloned().unwrap_or_else(|| default.to_string())
}

fn number<T: std::str::FromStr>(env: &HashMap<String, String>, key: &str, default: T) -> T {
    env.get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn flag(env: &HashMap<String, String>, key: &str, default: bool) -> bool {
    env.get(key)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(default)
}

/// Parse `host:port` (or bare `host`) into a replica config.
fn parse_replica(entry: &str, primary: &NodeConfig) -> Result<NodeConfig, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidReplica {
        entry: entry.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = match entry.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| invalid("port is not a number"))?;
            (host.trim_start_matches('[').trim_end_matches(']'), port)
        }
        None => (entry, primary.port),
    };

    if host.is_empty() {
        return Err(invalid("host is empty"));
    }
    Ok(primary.with_endpoint(host, port))
}

/// Build a [`Config`] from raw environment variables, applying defaults.
pub fn resolve(env: &HashMap<String, String>) -> Result<Config, ConfigError> {
    let defaults = Config::default();
    let node_defaults = NodeConfig::default();

    let primary = NodeConfig {
        host: string(env, "DATABASE_HOST", &node_defaults.host),
        port: number(env, "DATABASE_PORT", node_defaults.port),
        database: string(env, "DATABASE_NAME", &node_defaults.database),
        user: string(env, "DATABASE_USER", &node_defaults.user),
        password: string(env, "DATABASE_PASSWORD", ""),
        ssl_mode: env
            .get("DATABASE_SSL_MODE")
            .map(|v| SslMode::from_str(v))
            .unwrap_or_default(),
        connection_limit: number(env, "DATABASE_CONNECTION_LIMIT", node_defaults.connection_limit),
        connect_timeout: Duration::from_millis(number(env, "DATABASE_CONNECT_TIMEOUT_MS", 5_000)),
        pool_timeout: Duration::from_millis(number(env, "DATABASE_POOL_TIMEOUT_MS", 10_000)),
    };

    let replicas = env
        .get("DATABASE_REPLICAS")
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|entry| parse_replica(entry, &primary))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?
        .unwrap_or_default();

    let health_check_interval_ms = number(
        env,
        "ROUTER_HEALTH_CHECK_INTERVAL_MS",
        defaults.health_check_interval_ms,
    );
    if health_check_interval_ms == 0 {
        return Err(ConfigError::ZeroInterval {
            key: "ROUTER_HEALTH_CHECK_INTERVAL_MS",
        });
    }

    Ok(Config {
        primary,
        replicas,
        health_check_interval_ms,
        max_response_time_ms: number(env, "ROUTER_MAX_RESPONSE_TIME_MS", defaults.max_response_time_ms),
        probe_timeout_ms: number(env, "ROUTER_PROBE_TIMEOUT_MS", defaults.probe_timeout_ms),
        slow_query_ms: number(env, "ROUTER_SLOW_QUERY_MS", defaults.slow_query_ms),
        failover_enabled: flag(env, "ROUTER_FAILOVER_ENABLED", defaults.failover_enabled),
        failover_webhook_url: env
            .get("ROUTER_FAILOVER_WEBHOOK_URL")
            .filter(|v| !v.is_empty())
            .cloned(),
        status_enabled: flag(env, "ROUTER_STATUS_ENABLED", defaults.status_enabled),
        status_listen_addr: string(env, "ROUTER_STATUS_LISTEN_ADDR", &defaults.status_listen_addr),
        rate_limit_max_requests: number(
            env,
            "ROUTER_RATE_LIMIT_MAX_REQUESTS",
            defaults.rate_limit_max_requests,
        ),
        rate_limit_window_ms: number(env, "ROUTER_RATE_LIMIT_WINDOW_MS", defaults.rate_limit_window_ms),
        rate_limit_burst: number(env, "ROUTER_RATE_LIMIT_BURST", defaults.rate_limit_burst),
        rate_limit_max_clients: number(
            env,
            "ROUTER_RATE_LIMIT_MAX_CLIENTS",
            defaults.rate_limit_max_clients,
        ),
        debug: env.contains_key("DEBUG"),
    })
}

pub fn load_config() -> anyhow::Result<Config> {
    let env: HashMap<String, String> = std::env::vars().collect();
    Ok(resolve(&env)?)
}
