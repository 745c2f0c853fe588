//! Query Instrumentation
//!
//! Times every routed operation, keeps a bounded log of recent events and
//! derives aggregate metrics from it.

use crate::domain::entities::{now_millis, QueryEvent};
use crate::domain::value_objects::QueryType;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Instrumentation configuration.
#[derive(Debug, Clone)]
pub struct InstrumentationConfig {
    /// Operations slower than this are logged as slow
    pub slow_query_threshold: Duration,
    /// Ring buffer capacity
    pub capacity: usize,
    /// Events considered for the recent breakdown
    pub recent_window: usize,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold: Duration::from_millis(5_000),
            capacity: 1_000,
            recent_window: 100,
        }
    }
}

/// Read/write split and latency over the most recent events.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBreakdown {
    pub read: u64,
    /// Writes and transactions
    pub write: u64,
    #[serde(rename = "averageLatency")]
    pub average_latency_ms: f64,
}

/// Aggregate query metrics. Rates are percentages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_queries: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub success_rate: f64,
    pub recent_query_breakdown: QueryBreakdown,
}

pub struct QueryInstrumentation {
    config: InstrumentationConfig,
    events: Mutex<VecDeque<QueryEvent>>,
    total: AtomicU64,
    errors: AtomicU64,
}

impl QueryInstrumentation {
    pub fn new(config: InstrumentationConfig) -> Self {
        let events = VecDeque::with_capacity(config.capacity);
        Self {
            config,
            events: Mutex::new(events),
            total: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Run `operation`, record its outcome and hand its result back unchanged.
    pub async fn instrument<T, E, F>(
        &self,
        query_type: QueryType,
        entity: &str,
        operation: &str,
        fut: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let start = Instant::now();
        let result = fut.await;
        let elapsed = start.elapsed();

        self.record(QueryEvent {
            query_type,
            entity: entity.to_string(),
            operation: operation.to_string(),
            timestamp: now_millis(),
            duration_ms: elapsed.as_millis() as u64,
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
        });

        result
    }

    /// Append an event, evicting the oldest at capacity.
    pub fn record(&self, event: QueryEvent) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if !event.success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }

        if event.duration_ms > self.config.slow_query_threshold.as_millis() as u64 {
            tracing::warn!(
                "slow query: {}.{} ({}) took {}ms",
                event.entity,
                event.operation,
                event.query_type,
                event.duration_ms
            );
        }

        if self.config.capacity == 0 {
            return;
        }
        let mut events = self.events.lock();
        if events.len() >= self.config.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Up to `limit` most recent events, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<QueryEvent> {
        let events = self.events.lock();
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);

        let (error_rate, success_rate) = if total == 0 {
            (0.0, 100.0)
        } else {
            (
                errors as f64 * 100.0 / total as f64,
                (total - errors) as f64 * 100.0 / total as f64,
            )
        };

        let recent = self.recent_events(self.config.recent_window);
        let mut breakdown = QueryBreakdown::default();
        for event in &recent {
            if event.query_type == QueryType::Read {
                breakdown.read += 1;
            } else {
                breakdown.write += 1;
            }
        }
        if !recent.is_empty() {
            let sum: u64 = recent.iter().map(|e| e.duration_ms).sum();
            breakdown.average_latency_ms = sum as f64 / recent.len() as f64;
        }

        MetricsSnapshot {
            total_queries: total,
            total_errors: errors,
            error_rate,
            success_rate,
            recent_query_breakdown: breakdown,
        }
    }
}

impl Default for QueryInstrumentation {
    fn default() -> Self {
        Self::new(InstrumentationConfig::default())
    }
}
