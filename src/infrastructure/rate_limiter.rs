//! Rate Limiter
//!
//! Token bucket rate limiting per caller identity, with a bounded number of
//! tracked callers and a periodic sweep of stale entries. One instance is
//! built at startup and handed by `Arc` to whatever needs it.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window
    pub max_requests: u64,
    /// Time window for rate limiting
    pub window: Duration,
    /// Maximum burst size (token bucket capacity)
    pub burst_size: u64,
    /// Maximum number of callers tracked at once
    pub max_clients: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(1),
            burst_size: 20,
            max_clients: 10_000,
        }
    }
}

/// Per-caller rate limit state.
struct ClientState {
    /// Available tokens
    tokens: AtomicU64,
    /// Last refill timestamp (ms since limiter start)
    last_refill_ms: AtomicU64,
    /// Last request timestamp (ms since limiter start)
    last_seen_ms: AtomicU64,
}

impl ClientState {
    fn new(burst_size: u64, now_ms: u64) -> Self {
        Self {
            tokens: AtomicU64::new(burst_size),
            last_refill_ms: AtomicU64::new(now_ms),
            last_seen_ms: AtomicU64::new(now_ms),
        }
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitResult {
    /// Request is allowed
    Allowed { remaining: u64 },
    /// Request is rate limited
    Limited { retry_after_ms: u64 },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }
}

/// Token bucket rate limiter keyed by caller identity.
pub struct RateLimiter {
    config: RateLimitConfig,
    clients: DashMap<String, ClientState>,
    /// Tokens added per millisecond
    refill_rate_per_ms: f64,
    started: Instant,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let window_ms = config.window.as_millis().max(1) as f64;
        let refill_rate_per_ms = config.max_requests as f64 / window_ms;
        Self {
            config,
            clients: DashMap::new(),
            refill_rate_per_ms,
            started: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Check whether one request from `caller` is allowed.
    pub fn check(&self, caller: &str) -> RateLimitResult {
        self.check_with_cost(caller, 1)
    }

    /// Check whether a request of the given cost is allowed.
    pub fn check_with_cost(&self, caller: &str, cost: u64) -> RateLimitResult {
        let now_ms = self.now_ms();
        if !self.clients.contains_key(caller) {
            self.make_room(now_ms);
        }

        let state = self
            .clients
            .entry(caller.to_string())
            .or_insert_with(|| ClientState::new(self.config.burst_size, now_ms));
        state.last_seen_ms.store(now_ms, Ordering::Relaxed);

        let last_refill = state.last_refill_ms.load(Ordering::Relaxed);
        let elapsed_ms = now_ms.saturating_sub(last_refill);
        let tokens_to_add = (elapsed_ms as f64 * self.refill_rate_per_ms) as u64;

        if tokens_to_add > 0 {
            let current = state.tokens.load(Ordering::Relaxed);
            let new_tokens = (current + tokens_to_add).min(self.config.burst_size);
            state.tokens.store(new_tokens, Ordering::Relaxed);
            state.last_refill_ms.store(now_ms, Ordering::Relaxed);
        }

        let mut current = state.tokens.load(Ordering::Relaxed);
        loop {
            if current < cost {
                return RateLimitResult::Limited {
                    retry_after_ms: self.retry_after_ms(cost - current),
                };
            }

            match state.tokens.compare_exchange_weak(
                current,
                current - cost,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return RateLimitResult::Allowed {
                        remaining: current - cost,
                    }
                }
                Err(c) => current = c,
            }
        }
    }

    fn retry_after_ms(&self, missing: u64) -> u64 {
        if self.refill_rate_per_ms <= 0.0 {
            return self.config.window.as_millis() as u64;
        }
        (missing as f64 / self.refill_rate_per_ms).ceil() as u64
    }

    /// Keep the map under `max_clients` before a new caller is inserted.
    fn make_room(&self, now_ms: u64) {
        if self.clients.len() < self.config.max_clients {
            return;
        }

        self.sweep_older_than(now_ms, self.config.window.as_millis() as u64);
        if self.clients.len() < self.config.max_clients {
            return;
        }

        let oldest = self
            .clients
            .iter()
            .min_by_key(|entry| entry.last_seen_ms.load(Ordering::Relaxed))
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.clients.remove(&key);
            tracing::debug!("rate limiter full, evicted caller {}", key);
        }
    }

    fn sweep_older_than(&self, now_ms: u64, max_age_ms: u64) -> usize {
        let before = self.clients.len();
        self.clients.retain(|_, state| {
            now_ms.saturating_sub(state.last_seen_ms.load(Ordering::Relaxed)) < max_age_ms
        });
        before.saturating_sub(self.clients.len())
    }

    /// Remaining tokens for a caller.
    pub fn remaining(&self, caller: &str) -> u64 {
        self.clients
            .get(caller)
            .map(|s| s.tokens.load(Ordering::Relaxed))
            .unwrap_or(self.config.burst_size)
    }

    /// Forget a caller.
    pub fn clear(&self, caller: &str) {
        self.clients.remove(caller);
    }

    /// Number of tracked callers.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Remove callers not seen for `max_age`. Returns how many were removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        self.sweep_older_than(self.now_ms(), max_age.as_millis() as u64)
    }

    /// Start the periodic TTL sweep.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub fn start_cleanup(limiter: Arc<Self>, interval: Duration, max_age: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                let removed = limiter.cleanup(max_age);
                if removed > 0 {
                    tracing::debug!("rate limiter cleanup: removed {} stale entries", removed);
                }
            }
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
