//! App server instances reported by node agents.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::warn;

use appdash_state::{InstanceAddress, InstanceInfo, Requirement};

use crate::ApiState;
use crate::gate::{CurrentUser, require};
use crate::handlers::{ApiResponse, store_error};

/// One instance as posted by an agent; the app comes from the path.
#[derive(Debug, Deserialize)]
pub struct InstanceReport {
    pub host: String,
    pub port: u16,
    pub language: String,
}

#[derive(Debug, Serialize)]
pub struct InstancesRemoved {
    pub removed: usize,
}

/// POST /api/v1/apps/{app_id}/instances
pub async fn record_instances(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
    Json(reports): Json<Vec<InstanceReport>>,
) -> impl IntoResponse {
    let instances: Vec<InstanceInfo> = reports
        .into_iter()
        .map(|r| InstanceInfo {
            app_id: app_id.clone(),
            host: r.host,
            port: r.port,
            language: r.language,
        })
        .collect();
    match state.store.put_instances(&instances) {
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(instances)).into_response(),
        Err(e) => {
            warn!(%app_id, error = %e, "instances rejected");
            store_error(e)
        }
    }
}

/// DELETE /api/v1/apps/{app_id}/instances
pub async fn remove_instances(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
    Json(addresses): Json<Vec<InstanceAddress>>,
) -> impl IntoResponse {
    match state.store.delete_instances(&app_id, &addresses) {
        Ok(removed) => ApiResponse::ok(InstancesRemoved { removed }).into_response(),
        Err(e) => store_error(e),
    }
}

/// GET /api/v1/apps/{app_id}/instances
pub async fn list_instances(
    State(state): State<ApiState>,
    user: CurrentUser,
    Path(app_id): Path<String>,
) -> impl IntoResponse {
    if let Err(resp) = require(&state, &user, Requirement::AppOwner(app_id.clone())) {
        return resp;
    }
    match state.store.app_instances(&app_id) {
        Ok(instances) => ApiResponse::ok(instances).into_response(),
        Err(e) => store_error(e),
    }
}
