//! Status Server
//!
//! Read-only HTTP API exposing cluster health, query metrics and failover
//! history. Every request is rate limited per caller.

use crate::application::DatabaseRouter;
use crate::infrastructure::rate_limiter::{RateLimitResult, RateLimiter};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Header a caller may use to identify itself to the rate limiter.
pub const CALLER_ID_HEADER: &str = "x-caller-id";

/// Health response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub shutting_down: bool,
}

/// Error body for rejected requests.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub retry_after_ms: Option<u64>,
}

/// Status server state.
#[derive(Clone)]
pub struct StatusState {
    pub router: Arc<DatabaseRouter>,
    pub limiter: Arc<RateLimiter>,
}

impl StatusState {
    pub fn new(router: Arc<DatabaseRouter>, limiter: Arc<RateLimiter>) -> Self {
        Self { router, limiter }
    }
}

/// Build the router with all routes and layers.
pub fn app(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .route("/failovers", get(failovers_handler))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct StatusServer {
    listen_addr: String,
    state: StatusState,
}

impl StatusServer {
    pub fn new(listen_addr: String, state: StatusState) -> Self {
        Self { listen_addr, state }
    }

    /// Run the status server.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("status server listening on {}", self.listen_addr);

        axum::serve(
            listener,
            app(self.state.clone()).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }
}

/// Caller identity: explicit header first, then the peer address.
fn caller_id(req: &Request) -> String {
    if let Some(id) = req
        .headers()
        .get(CALLER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return id.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "anonymous".to_string())
}

async fn rate_limit(State(state): State<StatusState>, req: Request, next: Next) -> Response {
    let caller = caller_id(&req);

    match state.limiter.check(&caller) {
        RateLimitResult::Allowed { .. } => next.run(req).await,
        RateLimitResult::Limited { retry_after_ms } => {
            tracing::debug!("rate limited caller {}", caller);
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorResponse {
                    error: "rate limit exceeded".to_string(),
                    retry_after_ms: Some(retry_after_ms),
                }),
            )
                .into_response();
            let secs = retry_after_ms.div_ceil(1000).max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
    }
}

async fn health_handler(State(state): State<StatusState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        shutting_down: state.router.shutdown_controller().is_shutdown(),
    })
}

async fn status_handler(State(state): State<StatusState>) -> impl IntoResponse {
    let status = state.router.get_status();
    let code = if status.primary.is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

async fn metrics_handler(State(state): State<StatusState>) -> impl IntoResponse {
    Json(state.router.get_metrics())
}

async fn failovers_handler(State(state): State<StatusState>) -> impl IntoResponse {
    Json(state.router.failover_history())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::adapters::outbound::InMemoryDriver;
    use crate::application::RouterConfig;
    use crate::domain::entities::NodeConfig;
    use crate::infrastructure::rate_limiter::RateLimitConfig;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn state(burst: u64) -> (StatusState, Arc<InMemoryDriver>) {
        let driver = Arc::new(InMemoryDriver::new());
        let config = RouterConfig {
            primary: NodeConfig {
                host: "p".to_string(),
                ..Default::default()
            },
            replicas: vec![NodeConfig {
                host: "r0".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let router = Arc::new(DatabaseRouter::connect(config, driver.clone(), None).await);
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            burst_size: burst,
            max_requests: 1,
            window: Duration::from_secs(60),
            ..Default::default()
        }));
        (StatusState::new(router, limiter), driver)
    }

    fn get(uri: &str) -> Request {
        HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _) = state(10).await;
        let response = app(state).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_status_ok_after_probe() {
        let (state, _) = state(10).await;
        state.router.run_health_check().await;

        let response = app(state).oneshot(get("/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json(response).await;
        assert_eq!(body["primary"]["isHealthy"], true);
        assert_eq!(body["healthyReplicaCount"], 1);
        assert_eq!(body["replicas"][0]["inPool"], true);
    }

    #[tokio::test]
    async fn test_status_unavailable_when_primary_down() {
        let (state, driver) = state(10).await;
        // Sole replica leaves the pool first, so failover has no candidate
        driver.endpoint("r0:5432").set_reachable(false);
        state.router.run_health_check().await;
        driver.endpoint("p:5432").set_reachable(false);
        state.router.run_health_check().await;

        let response = app(state).oneshot(get("/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json(response).await["primary"]["isHealthy"], false);
    }

    #[tokio::test]
    async fn test_metrics() {
        let (state, _) = state(10).await;
        let response = app(state).oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json(response).await;
        assert_eq!(body["totalQueries"], 0);
        assert_eq!(body["successRate"], 100.0);
    }

    #[tokio::test]
    async fn test_failovers_empty() {
        let (state, _) = state(10).await;
        let response = app(state).oneshot(get("/failovers")).await.unwrap();
        assert_eq!(json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_rate_limited_per_caller() {
        let (state, _) = state(2).await;
        let app = app(state);

        let request = |caller: &str| {
            HttpRequest::builder()
                .uri("/health")
                .header(CALLER_ID_HEADER, caller)
                .body(Body::empty())
                .unwrap()
        };

        for _ in 0..2 {
            let response = app.clone().oneshot(request("svc-a")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(request("svc-a")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        assert_eq!(json(response).await["error"], "rate limit exceeded");

        let response = app.oneshot(request("svc-b")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_caller_id_sources() {
        let req = HttpRequest::builder()
            .header(CALLER_ID_HEADER, "billing")
            .body(Body::empty())
            .unwrap();
        assert_eq!(caller_id(&req), "billing");

        let mut req = get("/");
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 4242))));
        assert_eq!(caller_id(&req), "10.0.0.7");

        assert_eq!(caller_id(&get("/")), "anonymous");
    }
}
