//! App management: upload, delete, relocate.
//!
//! Each action is forwarded to the control plane. On success the cache is
//! refreshed now and again after the propagation delay.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use appdash_state::Requirement;

use crate::ApiState;
use crate::gate::{CurrentUser, require};
use crate::handlers::{ApiResponse, client_error, error_response, store_error};

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub app_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RelocateRequest {
    pub app_id: String,
    pub http_port: u16,
    pub https_port: u16,
}

/// The control plane's answer to an app action.
#[derive(Debug, Serialize)]
pub struct ActionMessage {
    pub message: String,
}

/// POST /api/v1/apps/upload?filename=
pub async fn upload_app(
    State(state): State<ApiState>,
    user: CurrentUser,
    Query(query): Query<UploadQuery>,
    archive: Bytes,
) -> impl IntoResponse {
    let email = match require(&state, &user, Requirement::CanUpload) {
        Ok(email) => email,
        Err(resp) => return resp,
    };
    let filename = match query.filename.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() && !archive.is_empty() => name.to_string(),
        _ => {
            return error_response("You must specify a file to upload.", StatusCode::BAD_REQUEST)
                .into_response();
        }
    };

    let control_plane = state.scheduler.controller().control_plane();
    match control_plane.upload_app(&filename, archive).await {
        Ok(message) => {
            info!(user = %email, %filename, "app uploaded");
            state.scheduler.after_mutation();
            ApiResponse::ok(ActionMessage { message }).into_response()
        }
        Err(e) => {
            warn!(%filename, error = %e, "app upload failed");
            client_error(e)
        }
    }
}

/// POST /api/v1/apps/delete
pub async fn delete_app(
    State(state): State<ApiState>,
    user: CurrentUser,
    Json(req): Json<DeleteRequest>,
) -> impl IntoResponse {
    let email = match require(&state, &user, Requirement::AppOwner(req.app_id.clone())) {
        Ok(email) => email,
        Err(resp) => return resp,
    };

    let control_plane = state.scheduler.controller().control_plane();
    let message = match control_plane.delete_app(&req.app_id).await {
        Ok(message) => message,
        Err(e) => {
            warn!(app_id = %req.app_id, error = %e, "app delete failed");
            return client_error(e);
        }
    };

    if let Err(e) = state.store.delete_app_entry(&req.app_id, &email) {
        return store_error(e);
    }
    info!(user = %email, app_id = %req.app_id, "app deleted");
    state.scheduler.after_mutation();
    ApiResponse::ok(ActionMessage { message }).into_response()
}

/// POST /api/v1/apps/relocate
pub async fn relocate_app(
    State(state): State<ApiState>,
    user: CurrentUser,
    Json(req): Json<RelocateRequest>,
) -> impl IntoResponse {
    if let Err(resp) = require(&state, &user, Requirement::AppOwner(req.app_id.clone())) {
        return resp;
    }

    let control_plane = state.scheduler.controller().control_plane();
    match control_plane
        .relocate_app(&req.app_id, req.http_port, req.https_port)
        .await
    {
        Ok(message) => {
            info!(
                app_id = %req.app_id,
                http_port = req.http_port,
                https_port = req.https_port,
                "app relocated"
            );
            state.scheduler.after_mutation();
            ApiResponse::ok(ActionMessage { message }).into_response()
        }
        Err(e) => {
            warn!(app_id = %req.app_id, error = %e, "app relocate failed");
            client_error(e)
        }
    }
}
