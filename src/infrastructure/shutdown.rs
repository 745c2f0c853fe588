//! Graceful Shutdown
//!
//! Stops the background monitor and lets in-flight routed queries finish
//! before connections are closed. Both the stop flag and the in-flight count
//! live in watch channels, so waiters see the current value on subscribe.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

struct State {
    stopped: watch::Sender<bool>,
    in_flight: watch::Sender<usize>,
}

/// Shared stop flag plus the count of queries still executing.
#[derive(Clone)]
pub struct ShutdownController {
    state: Arc<State>,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            state: Arc::new(State {
                stopped: watch::Sender::new(false),
                in_flight: watch::Sender::new(0),
            }),
        }
    }

    /// Flip the stop flag. Only the first call logs.
    pub fn shutdown(&self) {
        let flipped = self.state.stopped.send_if_modified(|stopped| {
            let was = *stopped;
            *stopped = true;
            !was
        });
        if flipped {
            tracing::info!("shutdown requested, in_flight={}", self.in_flight());
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.state.stopped.borrow()
    }

    /// Resolves once shutdown has been requested, immediately if it already was.
    pub async fn stopped(&self) {
        let mut rx = self.state.stopped.subscribe();
        // The sender lives as long as `self`, so this only returns on `true`
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    pub fn in_flight(&self) -> usize {
        *self.state.in_flight.borrow()
    }

    /// Count one query as in flight until the guard drops.
    pub fn query_guard(&self) -> QueryGuard {
        self.state.in_flight.send_modify(|n| *n += 1);
        QueryGuard {
            state: self.state.clone(),
        }
    }

    /// Wait up to `timeout` for the in-flight count to reach zero.
    ///
    /// Returns false if queries were still running when time ran out.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let mut rx = self.state.in_flight.subscribe();
        let drained = match tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0)).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(
                    "drain timed out after {}ms with {} queries in flight",
                    timeout.as_millis(),
                    self.in_flight()
                );
                false
            }
        };
        drained
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// One in-flight query.
pub struct QueryGuard {
    state: Arc<State>,
}

impl Drop for QueryGuard {
    fn drop(&mut self) {
        self.state.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Resolve on Ctrl+C or SIGTERM, then request shutdown on `controller`.
///
/// A signal source that cannot be installed is logged and ignored.
#[cfg_attr(coverage_nightly, coverage(off))]
pub async fn shutdown_signal(controller: ShutdownController) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let source = tokio::select! {
        _ = ctrl_c => "Ctrl+C",
        _ = terminate => "SIGTERM",
    };
    tracing::info!("received {}", source);

    controller.shutdown();
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_starts_running_and_idle() {
        let controller = ShutdownController::new();
        assert!(!controller.is_shutdown());
        assert_eq!(controller.in_flight(), 0);
    }

    #[test]
    fn test_shutdown_is_sticky() {
        let controller = ShutdownController::default();
        controller.shutdown();
        controller.shutdown();
        assert!(controller.is_shutdown());
    }

    #[test]
    fn test_guards_count_queries() {
        let controller = ShutdownController::new();
        let a = controller.query_guard();
        let b = controller.clone().query_guard();
        assert_eq!(controller.in_flight(), 2);

        drop(a);
        assert_eq!(controller.in_flight(), 1);
        drop(b);
        assert_eq!(controller.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_stopped_resolves_after_shutdown() {
        let controller = ShutdownController::new();
        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.stopped().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        controller.shutdown();
        let done = tokio::time::timeout(Duration::from_millis(200), waiter).await;
        assert!(done.is_ok());

        // Late callers return immediately
        let late = tokio::time::timeout(Duration::from_millis(50), controller.stopped()).await;
        assert!(late.is_ok());
    }

    #[tokio::test]
    async fn test_drain_when_idle() {
        let controller = ShutdownController::new();
        controller.shutdown();
        assert!(controller.wait_for_drain(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_drain_waits_for_guard() {
        let controller = ShutdownController::new();
        let guard = controller.query_guard();
        controller.shutdown();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(guard);
        });

        assert!(controller.wait_for_drain(Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn test_drain_times_out() {
        let controller = ShutdownController::new();
        let _guard = controller.query_guard();
        assert!(!controller.wait_for_drain(Duration::from_millis(30)).await);
        assert_eq!(controller.in_flight(), 1);
    }
}
