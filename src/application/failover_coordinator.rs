//! Failover Coordinator
//!
//! Promotes the healthiest replica when the primary fails and publishes the
//! resulting topology in one swap. At most one promotion runs at a time.

use crate::domain::entities::{now_millis, FailoverEvent, Node};
use crate::domain::ports::{DbConnection, FailoverNotifier};
use crate::domain::services::{CandidateLag, PromotionPlanner};
use crate::domain::topology::{Topology, TopologyStore};
use crate::infrastructure::connection_manager::ConnectionManager;
use crate::infrastructure::health_monitor::FailoverTrigger;
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Failover configuration.
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    pub enabled: bool,
    /// Upper bound for reading one candidate's replication lag
    pub lag_timeout: Duration,
    /// Upper bound for the engine-side promotion hook
    pub promote_timeout: Duration,
    /// Number of failover events kept in memory
    pub history_limit: usize,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lag_timeout: Duration::from_secs(2),
            promote_timeout: Duration::from_secs(10),
            history_limit: 100,
        }
    }
}

/// Why a promotion attempt gave up.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FailoverAbort {
    #[error("no healthy replica available for promotion")]
    NoCandidate,
    #[error("promotion of replica {replica_id} failed: {reason}")]
    PromotionFailed { replica_id: usize, reason: String },
    #[error("topology changed during promotion")]
    TopologyChanged,
}

/// Result of one failover request.
#[derive(Debug, Clone, PartialEq)]
pub enum FailoverOutcome {
    Promoted(FailoverEvent),
    Aborted(FailoverAbort),
    /// Failover is switched off in configuration
    Disabled,
    /// Another promotion is in flight; the next health cycle re-evaluates
    Deferred,
}

impl FailoverOutcome {
    pub fn is_promoted(&self) -> bool {
        matches!(self, FailoverOutcome::Promoted(_))
    }
}

/// Orchestrates replica promotion.
pub struct FailoverCoordinator {
    config: FailoverConfig,
    topology: Arc<TopologyStore>,
    connections: Arc<ConnectionManager>,
    notifier: Option<Arc<dyn FailoverNotifier>>,
    in_progress: tokio::sync::Mutex<()>,
    history: Mutex<VecDeque<FailoverEvent>>,
}

impl FailoverCoordinator {
    pub fn new(
        config: FailoverConfig,
        topology: Arc<TopologyStore>,
        connections: Arc<ConnectionManager>,
        notifier: Option<Arc<dyn FailoverNotifier>>,
    ) -> Self {
        let history = VecDeque::with_capacity(config.history_limit.min(1024));
        Self {
            config,
            topology,
            connections,
            notifier,
            in_progress: tokio::sync::Mutex::new(()),
            history: Mutex::new(history),
        }
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    /// Recorded attempts, oldest first.
    pub fn history(&self) -> Vec<FailoverEvent> {
        self.history.lock().iter().cloned().collect()
    }

    /// Try to replace the current primary with the best healthy replica.
    pub async fn failover(&self) -> FailoverOutcome {
        if !self.config.enabled {
            tracing::warn!("primary is unhealthy but failover is disabled");
            return FailoverOutcome::Disabled;
        }

        let Ok(_running) = self.in_progress.try_lock() else {
            tracing::info!("failover already in progress, deferring to next cycle");
            return FailoverOutcome::Deferred;
        };

        let start = Instant::now();
        let snapshot = self.topology.load();
        let old_primary = snapshot.primary().clone();
        tracing::warn!("starting failover from primary {}", old_primary.endpoint());

        match self.promote_best(&snapshot).await {
            Ok((id, promoted)) => {
                let event = FailoverEvent {
                    id: uuid::Uuid::new_v4(),
                    timestamp: now_millis(),
                    promoted_replica: Some(id),
                    previous_primary: old_primary.endpoint(),
                    new_primary: Some(promoted.endpoint()),
                    duration_ms: start.elapsed().as_millis() as u64,
                    success: true,
                    error: None,
                };
                tracing::warn!(
                    "failover complete: replica {} ({}) promoted in {}ms",
                    id,
                    promoted.endpoint(),
                    event.duration_ms
                );

                if let Some(conn) = old_primary.replace_connection(None) {
                    self.connections
                        .disconnect_later(old_primary.name().to_string(), conn);
                }

                self.record(event.clone());
                self.notify(&event);
                FailoverOutcome::Promoted(event)
            }
            Err(abort) => {
                tracing::error!("failover aborted: {}", abort);
                self.record(FailoverEvent {
                    id: uuid::Uuid::new_v4(),
                    timestamp: now_millis(),
                    promoted_replica: None,
                    previous_primary: old_primary.endpoint(),
                    new_primary: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                    success: false,
                    error: Some(abort.to_string()),
                });
                FailoverOutcome::Aborted(abort)
            }
        }
    }

    /// Rank candidates, promote the winner and publish the new topology.
    async fn promote_best(&self, snapshot: &Topology) -> Result<(usize, Arc<Node>), FailoverAbort> {
        let candidates: Vec<(usize, Arc<Node>, DbConnection)> = snapshot
            .healthy_replica_ids()
            .iter()
            .filter_map(|&id| {
                let node = snapshot.replica(id)?.clone();
                let conn = node.connection()?;
                Some((id, node, conn))
            })
            .collect();

        let lags = join_all(candidates.iter().map(|(id, _, conn)| async move {
            let lag = tokio::time::timeout(self.config.lag_timeout, conn.replication_lag())
                .await
                .ok()
                .flatten();
            CandidateLag {
                replica_id: *id,
                lag,
            }
        }))
        .await;
        tracing::debug!("promotion candidates: {:?}", lags);

        let chosen = PromotionPlanner::select(&lags).ok_or(FailoverAbort::NoCandidate)?;
        let (id, node, conn) = candidates
            .into_iter()
            .find(|(id, _, _)| *id == chosen)
            .ok_or(FailoverAbort::NoCandidate)?;

        match tokio::time::timeout(self.config.promote_timeout, conn.promote()).await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                return Err(FailoverAbort::PromotionFailed {
                    replica_id: id,
                    reason,
                })
            }
            Err(_) => {
                return Err(FailoverAbort::PromotionFailed {
                    replica_id: id,
                    reason: format!(
                        "promotion timed out after {}ms",
                        self.config.promote_timeout.as_millis()
                    ),
                })
            }
        }

        let old_primary = snapshot.primary().clone();
        let published = self.topology.update(|current| {
            if !current.is_primary(&old_primary) {
                return None;
            }
            // Locate by identity; `id` indexes the older snapshot
            let index = current.replica_index(&node)?;
            current.promote(index)
        });

        if published {
            Ok((id, node))
        } else {
            Err(FailoverAbort::TopologyChanged)
        }
    }

    fn record(&self, event: FailoverEvent) {
        if self.config.history_limit == 0 {
            return;
        }
        let mut history = self.history.lock();
        if history.len() >= self.config.history_limit {
            history.pop_front();
        }
        history.push_back(event);
    }

    /// Fire-and-forget delivery; failures are only logged.
    fn notify(&self, event: &FailoverEvent) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let event = event.clone();
        tokio::spawn(async move {
            match notifier.notify(&event).await {
                Ok(()) => tracing::info!("failover notification delivered"),
                Err(e) => tracing::warn!("failover notification failed: {}", e),
            }
        });
    }
}

#[async_trait]
impl FailoverTrigger for FailoverCoordinator {
    async fn primary_failed(&self) -> bool {
        self.failover().await.is_promoted()
    }
}
