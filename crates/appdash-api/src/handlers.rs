//! REST API handlers for the cached cluster view.
//!
//! Each handler reads via `StateStore` and returns JSON responses.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use appdash_refresh::{ClientError, RefreshReport};
use appdash_state::*;

use crate::ApiState;
use crate::gate::{CurrentUser, require};

/// Response wrapper for consistent API format.
#[derive(Serialize)]
pub(crate) struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// Map a cache store failure onto a status code.
pub(crate) fn store_error(e: StateError) -> Response {
    let status = match &e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::InvalidToken(_) | StateError::Malformed(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status).into_response()
}

/// Map an upstream failure onto a status code.
pub(crate) fn client_error(e: ClientError) -> Response {
    let status = match &e {
        ClientError::Rejected(_) => StatusCode::BAD_REQUEST,
        ClientError::Unavailable(_) | ClientError::Malformed(_) => StatusCode::BAD_GATEWAY,
    };
    error_response(&e.to_string(), status).into_response()
}

// ── Cluster ────────────────────────────────────────────────────

/// Query for the cluster views.
#[derive(Debug, Default, Deserialize)]
pub struct ClusterQuery {
    pub forcerefresh: Option<String>,
}

impl ClusterQuery {
    fn wants_refresh(&self) -> bool {
        matches!(self.forcerefresh.as_deref(), Some(v) if !v.is_empty() && v != "0")
    }
}

/// The cluster as shown to every visitor.
#[derive(Debug, Serialize)]
pub struct ClusterView {
    #[serde(flatten)]
    pub snapshot: ClusterSnapshot,
    pub monitoring_url: String,
    pub apis: BTreeMap<String, String>,
    pub nodes: Vec<NodeStatus>,
    pub apps: Vec<AppId>,
}

/// The cluster plus the apps the caller may see, with their URLs.
#[derive(Debug, Serialize)]
pub struct StatusView {
    #[serde(flatten)]
    pub snapshot: ClusterSnapshot,
    pub monitoring_url: String,
    pub apis: BTreeMap<String, String>,
    pub nodes: Vec<NodeStatus>,
    pub apps: BTreeMap<AppId, Option<String>>,
}

/// Run a synchronous refresh when `?forcerefresh` is set. Admins only.
async fn maybe_force_refresh(
    state: &ApiState,
    user: &CurrentUser,
    query: &ClusterQuery,
) -> Result<(), Response> {
    if query.wants_refresh() {
        require(state, user, Requirement::AnyAdmin)?;
        state.scheduler.controller().refresh_all().await;
    }
    Ok(())
}

fn cluster_parts(
    store: &StateStore,
) -> StateResult<(ClusterSnapshot, String, BTreeMap<String, String>, Vec<NodeStatus>)> {
    Ok((
        store.cluster_snapshot()?.unwrap_or_default(),
        store.monitoring_url()?,
        store.api_statuses()?,
        store.node_statuses()?,
    ))
}

/// GET /api/v1/cluster
pub async fn cluster(
    State(state): State<ApiState>,
    user: CurrentUser,
    Query(query): Query<ClusterQuery>,
) -> impl IntoResponse {
    if let Err(resp) = maybe_force_refresh(&state, &user, &query).await {
        return resp;
    }
    let view = cluster_parts(&state.store).and_then(|(snapshot, monitoring_url, apis, nodes)| {
        Ok(ClusterView {
            snapshot,
            monitoring_url,
            apis,
            nodes,
            apps: state.store.app_entries()?.into_keys().collect(),
        })
    });
    match view {
        Ok(view) => ApiResponse::ok(view).into_response(),
        Err(e) => store_error(e),
    }
}

/// GET /api/v1/status
pub async fn status(
    State(state): State<ApiState>,
    user: CurrentUser,
    Query(query): Query<ClusterQuery>,
) -> impl IntoResponse {
    let email = match require(&state, &user, Requirement::LoggedIn) {
        Ok(email) => email,
        Err(resp) => return resp,
    };
    if let Err(resp) = maybe_force_refresh(&state, &user, &query).await {
        return resp;
    }
    let view = cluster_parts(&state.store).and_then(|(snapshot, monitoring_url, apis, nodes)| {
        Ok(StatusView {
            snapshot,
            monitoring_url,
            apis,
            nodes,
            apps: visible_apps(&state.store, Some(email.as_str()))?,
        })
    });
    match view {
        Ok(view) => ApiResponse::ok(view).into_response(),
        Err(e) => store_error(e),
    }
}

/// GET /api/v1/apps
pub async fn list_apps(State(state): State<ApiState>, user: CurrentUser) -> impl IntoResponse {
    let email = match require(&state, &user, Requirement::LoggedIn) {
        Ok(email) => email,
        Err(resp) => return resp,
    };
    match visible_apps(&state.store, Some(email.as_str())) {
        Ok(apps) => ApiResponse::ok(apps).into_response(),
        Err(e) => store_error(e),
    }
}

// ── Refresh ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct RefreshSummary {
    pub succeeded: Vec<String>,
    pub failed: BTreeMap<String, String>,
}

impl From<RefreshReport> for RefreshSummary {
    fn from(report: RefreshReport) -> Self {
        Self {
            succeeded: report.succeeded.iter().map(|s| s.to_string()).collect(),
            failed: report
                .failed
                .iter()
                .map(|(step, e)| (step.to_string(), e.to_string()))
                .collect(),
        }
    }
}

/// POST /api/v1/refresh
pub async fn refresh(State(state): State<ApiState>, user: CurrentUser) -> impl IntoResponse {
    if let Err(resp) = require(&state, &user, Requirement::AnyAdmin) {
        return resp;
    }
    let report = state.scheduler.controller().refresh_all().await;
    info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        "manual refresh"
    );
    ApiResponse::ok(RefreshSummary::from(report)).into_response()
}

// ── Maintenance ────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct GatheredLogs {
    /// Id of the archive the control plane is assembling.
    pub uuid: String,
}

#[derive(Debug, Serialize)]
pub struct GroomerResult {
    pub result: String,
}

/// POST /api/v1/logs/gather
pub async fn gather_logs(State(state): State<ApiState>, user: CurrentUser) -> impl IntoResponse {
    if let Err(resp) = require(&state, &user, Requirement::AnyAdmin) {
        return resp;
    }
    match state.scheduler.controller().control_plane().gather_logs().await {
        Ok(uuid) => {
            info!(%uuid, "log gathering started");
            ApiResponse::ok(GatheredLogs { uuid }).into_response()
        }
        Err(e) => {
            warn!(error = %e, "log gathering failed");
            client_error(e)
        }
    }
}

/// POST /api/v1/groomer
pub async fn run_groomer(State(state): State<ApiState>, user: CurrentUser) -> impl IntoResponse {
    if let Err(resp) = require(&state, &user, Requirement::AnyAdmin) {
        return resp;
    }
    match state.scheduler.controller().control_plane().run_groomer().await {
        Ok(result) => ApiResponse::ok(GroomerResult { result }).into_response(),
        Err(e) => {
            warn!(error = %e, "groomer run failed");
            client_error(e)
        }
    }
}

// ── Request rates ──────────────────────────────────────────────

/// Sample posted by a per-app stats agent.
#[derive(Debug, Deserialize)]
pub struct RequestRateSample {
    /// Unix seconds; defaults to now.
    pub timestamp: Option<f64>,
    pub request_rate: f64,
}

#[derive(Debug, Deserialize)]
pub struct RateQuery {
    pub limit: Option<usize>,
}

/// Samples returned when no limit is given.
const DEFAULT_RATE_LIMIT: usize = 60;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// POST /api/v1/apps/{app_id}/requests
pub async fn record_request_rate(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
    Json(sample): Json<RequestRateSample>,
) -> impl IntoResponse {
    let timestamp = match sample.timestamp {
        None => now_secs(),
        Some(ts) if ts.is_finite() && ts >= 0.0 => ts.trunc() as u64,
        Some(ts) => {
            return error_response(&format!("invalid timestamp {ts}"), StatusCode::BAD_REQUEST)
                .into_response();
        }
    };
    let rate = RequestRate {
        app_id,
        timestamp,
        requests_per_second: sample.request_rate,
    };
    match state.store.record_request_rate(&rate) {
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(rate)).into_response(),
        Err(e) => {
            warn!(app_id = %rate.app_id, error = %e, "request rate rejected");
            store_error(e)
        }
    }
}

/// GET /api/v1/apps/{app_id}/requests
pub async fn list_request_rates(
    State(state): State<ApiState>,
    user: CurrentUser,
    Path(app_id): Path<String>,
    Query(query): Query<RateQuery>,
) -> impl IntoResponse {
    if let Err(resp) = require(&state, &user, Requirement::AppOwner(app_id.clone())) {
        return resp;
    }
    let limit = query.limit.unwrap_or(DEFAULT_RATE_LIMIT);
    match state.store.request_rates(&app_id, limit) {
        Ok(rates) => ApiResponse::ok(rates).into_response(),
        Err(e) => store_error(e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::test_support::{as_user, body_json, harness};

    fn no_refresh() -> Query<ClusterQuery> {
        Query(ClusterQuery::default())
    }

    fn force_refresh() -> Query<ClusterQuery> {
        Query(ClusterQuery {
            forcerefresh: Some("1".into()),
        })
    }

    #[tokio::test]
    async fn cluster_is_public() {
        let h = harness();
        let resp = cluster(State(h.state), CurrentUser(None), no_refresh())
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["apps"], serde_json::json!(["blog", "guestbook"]));
        // Head node not yet known.
        assert_eq!(body["data"]["monitoring_url"], "");
    }

    #[tokio::test]
    async fn force_refresh_needs_admin() {
        let h = harness();
        let resp = cluster(State(h.state.clone()), as_user("dev@example.com"), force_refresh())
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(h.control_plane.stats_calls.load(Ordering::SeqCst), 0);

        let resp = cluster(State(h.state.clone()), as_user("admin@example.com"), force_refresh())
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(h.control_plane.stats_calls.load(Ordering::SeqCst), 1);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["head_node"], "10.0.0.1");
        assert_eq!(body["data"]["monitoring_url"], "http://10.0.0.1:8050");
    }

    #[tokio::test]
    async fn status_requires_login() {
        let h = harness();
        let resp = status(State(h.state), CurrentUser(None), no_refresh())
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn apps_are_filtered_by_ownership() {
        let h = harness();

        let resp = list_apps(State(h.state.clone()), as_user("dev@example.com"))
            .await
            .into_response();
        let body = body_json(resp).await;
        assert_eq!(
            body["data"],
            serde_json::json!({ "guestbook": "http://apps.example.com:8080" })
        );

        let resp = list_apps(State(h.state.clone()), as_user("admin@example.com"))
            .await
            .into_response();
        let body = body_json(resp).await;
        assert_eq!(body["data"]["blog"], serde_json::Value::Null);
        assert_eq!(body["data"].as_object().unwrap().len(), 2);

        let resp = list_apps(State(h.state), as_user("viewer@example.com"))
            .await
            .into_response();
        let body = body_json(resp).await;
        assert_eq!(body["data"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn refresh_reports_failed_steps() {
        let h = harness();
        h.control_plane.fail_stats.store(true, Ordering::SeqCst);

        let resp = refresh(State(h.state), as_user("admin@example.com"))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["succeeded"].as_array().unwrap().len(), 5);
        assert!(body["data"]["failed"]["node_stats"].is_string());
    }

    #[tokio::test]
    async fn refresh_is_admin_only() {
        let h = harness();
        let resp = refresh(State(h.state), as_user("dev@example.com"))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn gather_logs_returns_archive_id() {
        let h = harness();
        let resp = gather_logs(State(h.state), as_user("admin@example.com"))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["uuid"], "3f2a9c1e-logs");
        assert_eq!(h.control_plane.recorded_calls(), vec!["gather logs"]);
    }

    #[tokio::test]
    async fn maintenance_is_admin_only() {
        let h = harness();
        let resp = gather_logs(State(h.state.clone()), as_user("dev@example.com"))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let resp = run_groomer(State(h.state), CurrentUser(None)).await.into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(h.control_plane.recorded_calls().is_empty());
    }

    #[tokio::test]
    async fn groomer_failure_is_bad_gateway() {
        let h = harness();
        h.control_plane.fail_everything.store(true, Ordering::SeqCst);
        let resp = run_groomer(State(h.state.clone()), as_user("admin@example.com"))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        h.control_plane.fail_everything.store(false, Ordering::SeqCst);
        let resp = run_groomer(State(h.state), as_user("admin@example.com"))
            .await
            .into_response();
        let body = body_json(resp).await;
        assert_eq!(body["data"]["result"], "groomer started");
    }

    #[tokio::test]
    async fn request_rates_round_trip_newest_first() {
        let h = harness();
        for (ts, rate) in [(100.0, 1.5), (300.0, 3.0), (200.0, 2.0)] {
            let resp = record_request_rate(
                State(h.state.clone()),
                Path("guestbook".to_string()),
                Json(RequestRateSample {
                    timestamp: Some(ts),
                    request_rate: rate,
                }),
            )
            .await
            .into_response();
            assert_eq!(resp.status(), StatusCode::CREATED);
        }

        let resp = list_request_rates(
            State(h.state.clone()),
            as_user("dev@example.com"),
            Path("guestbook".to_string()),
            Query(RateQuery { limit: Some(2) }),
        )
        .await
        .into_response();
        let body = body_json(resp).await;
        let stamps: Vec<u64> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["timestamp"].as_u64().unwrap())
            .collect();
        assert_eq!(stamps, vec![300, 200]);

        let resp = list_request_rates(
            State(h.state),
            as_user("viewer@example.com"),
            Path("guestbook".to_string()),
            Query(RateQuery { limit: None }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn negative_rate_timestamp_is_rejected() {
        let h = harness();
        let resp = record_request_rate(
            State(h.state),
            Path("guestbook".to_string()),
            Json(RequestRateSample {
                timestamp: Some(-5.0),
                request_rate: 1.0,
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
