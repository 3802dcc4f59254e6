//! REST API Handlers
//!
//! Read-only introspection of the cached graph, plus an on-demand refresh.

use crate::domain::ports::{MasterApiRef, PublishedTopic};
use crate::error::{Error, Result};
use crate::graph::{GraphCache, RefreshReport, RefreshStatsSnapshot};
use axum::{
    extract::{Json, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Cached graph as served by `GET /v1/graph`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphResponse {
    pub generation: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub publishers: BTreeMap<String, Vec<String>>,
    pub subscribers: BTreeMap<String, Vec<String>>,
    pub services: BTreeMap<String, Vec<String>>,
    /// Address -> participant
    pub nodes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveQuery {
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    pub address: String,
    pub participant: String,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiErrorResponse {
    fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    cache: Arc<GraphCache>,
    master: MasterApiRef,
}

impl RestRouter {
    pub fn new(cache: Arc<GraphCache>, master: MasterApiRef) -> Self {
        Self { cache, master }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            cache: self.cache,
            master: self.master,
        };

        Router::new()
            // Graph endpoints
            .route("/v1/graph", get(get_graph))
            .route("/v1/nodes/resolve", get(resolve_node))
            .route("/v1/refresh", post(refresh_graph))
            .route("/v1/topics", get(list_topics))
            // Operational endpoints
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    cache: Arc<GraphCache>,
    master: MasterApiRef,
}

// =============================================================================
// Handlers
// =============================================================================

async fn get_graph(State(state): State<AppState>) -> impl IntoResponse {
    let view = state.cache.view();

    let flatten = |roles: &crate::graph::RoleMap| {
        roles
            .iter()
            .map(|(name, ids)| (name.clone(), ids.iter().map(|id| id.to_string()).collect()))
            .collect::<BTreeMap<String, Vec<String>>>()
    };

    (
        StatusCode::OK,
        Json(GraphResponse {
            generation: view.generation,
            refreshed_at: view.refreshed_at,
            publishers: flatten(&view.snapshot.publishers),
            subscribers: flatten(&view.snapshot.subscribers),
            services: flatten(&view.snapshot.services),
            nodes: view
                .directory
                .entries()
                .into_iter()
                .map(|(address, id)| (address.to_string(), id.to_string()))
                .collect(),
        }),
    )
}

async fn resolve_node(
    State(state): State<AppState>,
    Query(query): Query<ResolveQuery>,
) -> Response {
    match state.cache.resolve_node_name(&query.address) {
        Some(participant) => (
            StatusCode::OK,
            Json(ResolveResponse {
                address: query.address,
                participant: participant.to_string(),
            }),
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiErrorResponse::new(
                "NotFound",
                format!("No participant at {}", query.address),
            )),
        )
            .into_response(),
    }
}

async fn refresh_graph(State(state): State<AppState>) -> Response {
    match state.cache.refresh().await {
        Ok(report) => {
            debug!(generation = report.generation, "Refresh requested over API");
            (StatusCode::OK, Json::<RefreshReport>(report)).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn list_topics(State(state): State<AppState>) -> Response {
    let timeout = state.cache.config().call_timeout;
    let topics = match tokio::time::timeout(timeout, state.master.published_topics()).await {
        Ok(result) => result,
        Err(_) => Err(Error::MasterUnavailable {
            reason: format!("getPublishedTopics timed out after {}ms", timeout.as_millis()),
        }),
    };

    match topics {
        Ok(topics) => (StatusCode::OK, Json::<Vec<PublishedTopic>>(topics)).into_response(),
        Err(e) => error_response(e.into_unavailable()),
    }
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Ready once a refresh has succeeded
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.cache.view().is_populated() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "graph not yet refreshed")
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    match render_metrics(&state.cache.stats(), state.cache.generation()) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(error: Error) -> Response {
    let status = match &error {
        Error::MasterUnavailable { .. } | Error::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
        Error::MasterRejected { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(error = %error, status = status.as_u16(), "API request failed");

    let mut body = ApiErrorResponse::new(error_kind(&error), error.to_string());
    if error.is_retryable() {
        body.details = Some("retry after the next refresh interval".to_string());
    }
    (status, Json(body)).into_response()
}

fn error_kind(error: &Error) -> &'static str {
    match error {
        Error::MasterUnavailable { .. } => "MasterUnavailable",
        Error::MasterRejected { .. } => "MasterRejected",
        Error::NotConnected => "NotConnected",
        _ => "Internal",
    }
}

// =============================================================================
// Prometheus Exposition
// =============================================================================

/// Render refresh counters in the Prometheus text format
pub fn render_metrics(stats: &RefreshStatsSnapshot, generation: u64) -> Result<String> {
    let registry = Registry::new();
    let metric_err = |e: prometheus::Error| Error::Internal(format!("metrics: {}", e));

    let counters = [
        ("rosgraph_refreshes_total", "Refreshes that published a new graph", stats.refreshes),
        ("rosgraph_refresh_failures_total", "Refreshes that failed", stats.failures),
        ("rosgraph_refresh_coalesced_total", "Refresh requests served by an in-flight refresh", stats.coalesced),
        ("rosgraph_lookups_total", "Participant address lookups issued", stats.lookups),
        ("rosgraph_lookup_failures_total", "Participant address lookups that failed", stats.lookup_failures),
    ];
    for (name, help, value) in counters {
        let counter = IntCounter::new(name, help).map_err(metric_err)?;
        counter.inc_by(value);
        registry.register(Box::new(counter)).map_err(metric_err)?;
    }

    let gauges = [
        ("rosgraph_generation", "Generation of the published graph", generation as i64),
        ("rosgraph_last_refresh_duration_us", "Duration of the last successful refresh", stats.last_duration_us as i64),
        (
            "rosgraph_staleness_seconds",
            "Seconds since the last successful refresh, -1 if none",
            stats.staleness_secs.map_or(-1, |secs| secs as i64),
        ),
    ];
    for (name, help, value) in gauges {
        let gauge = IntGauge::new(name, help).map_err(metric_err)?;
        gauge.set(value);
        registry.register(Box::new(gauge)).map_err(metric_err)?;
    }

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(metric_err)?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphCacheConfig;
    use crate::testing::FakeMaster;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn router(master: Arc<FakeMaster>) -> (Router, Arc<GraphCache>) {
        let cache = GraphCache::new(GraphCacheConfig::default(), master.clone()).unwrap();
        (RestRouter::new(cache.clone(), master).build(), cache)
    }

    async fn send(router: Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_graph_and_resolve() {
        let (router, cache) = router(FakeMaster::scan_graph()).await;
        cache.refresh().await.unwrap();

        let (status, body) = send(router.clone(), "GET", "/v1/graph").await;
        assert_eq!(status, StatusCode::OK);
        let graph: GraphResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(graph.generation, 1);
        assert_eq!(graph.publishers["/scan"], vec!["n1"]);
        assert_eq!(graph.nodes["10.0.0.2:9"], "n2");

        let (status, body) = send(router.clone(), "GET", "/v1/nodes/resolve?address=10.0.0.1:9").await;
        assert_eq!(status, StatusCode::OK);
        let resolved: ResolveResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resolved.participant, "n1");

        let (status, _) = send(router, "GET", "/v1/nodes/resolve?address=10.9.9.9:1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_refresh_and_readiness() {
        let master = FakeMaster::scan_graph();
        let (router, _cache) = router(master.clone()).await;

        let (status, _) = send(router.clone(), "GET", "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = send(router.clone(), "POST", "/v1/refresh").await;
        assert_eq!(status, StatusCode::OK);
        let report: RefreshReport = serde_json::from_slice(&body).unwrap();
        assert_eq!(report.resolved, 2);

        let (status, _) = send(router.clone(), "GET", "/ready").await;
        assert_eq!(status, StatusCode::OK);

        master.set_unavailable(true);
        let (status, body) = send(router, "POST", "/v1/refresh").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let error: ApiErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.error, "MasterUnavailable");
    }

    #[tokio::test]
    async fn test_topics_and_metrics() {
        let (router, cache) = router(FakeMaster::scan_graph()).await;
        cache.refresh().await.unwrap();

        let (status, body) = send(router.clone(), "GET", "/v1/topics").await;
        assert_eq!(status, StatusCode::OK);
        let topics: Vec<PublishedTopic> = serde_json::from_slice(&body).unwrap();
        assert_eq!(topics, vec![PublishedTopic::new("/scan", "sensor_msgs/LaserScan")]);

        let (status, body) = send(router, "GET", "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("rosgraph_refreshes_total 1"));
        assert!(text.contains("rosgraph_generation 1"));
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _cache) = router(FakeMaster::new()).await;
        let (status, body) = send(router, "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }
}
