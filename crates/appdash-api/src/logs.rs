//! Log shipping and the log viewer.
//!
//! Shippers post batches to `/logs/upload`; users browse services they
//! administer, one page of records at a time.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use appdash_state::{IngestBatch, PageToken, Requirement};

use crate::ApiState;
use crate::gate::{CurrentUser, INGEST_TOKEN_HEADER, require};
use crate::handlers::{ApiResponse, error_response, store_error};

/// Cursor value the viewer sends on the first page.
const EMPTY_CURSOR: &str = "None";

/// POST /logs/upload
pub async fn upload_logs(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(expected) = state.ingest_token.as_deref() {
        let presented = headers
            .get(INGEST_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());
        if presented != Some(expected) {
            return error_response("not authorized: bad ingest token", StatusCode::FORBIDDEN)
                .into_response();
        }
    }

    let batch: IngestBatch = match serde_json::from_slice(&body) {
        Ok(batch) => batch,
        Err(e) => {
            return error_response(&format!("malformed log batch: {e}"), StatusCode::BAD_REQUEST)
                .into_response();
        }
    };
    match state.store.ingest_logs(&batch) {
        Ok(summary) => ApiResponse::ok(summary).into_response(),
        Err(e) => {
            warn!(service = %batch.service_name, host = %batch.host, error = %e, "log batch rejected");
            store_error(e)
        }
    }
}

/// GET /logs
///
/// Services the caller may browse. Users owning no app are refused.
pub async fn list_services(State(state): State<ApiState>, user: CurrentUser) -> impl IntoResponse {
    let email = match require(&state, &user, Requirement::LoggedIn) {
        Ok(email) => email,
        Err(resp) => return resp,
    };
    let account = match state.store.user_account(&email) {
        Ok(account) => account,
        Err(e) => return store_error(e),
    };
    let Some(account) = account.filter(|a| a.is_cloud_admin || !a.user_app_list.is_empty())
    else {
        return error_response(
            "not authorized: you do not administer any app",
            StatusCode::FORBIDDEN,
        )
        .into_response();
    };

    match state.store.log_services() {
        Ok(services) => {
            let names: Vec<String> = services
                .into_iter()
                .map(|s| s.name)
                .filter(|name| account.is_cloud_admin || account.owns(name))
                .collect();
            ApiResponse::ok(names).into_response()
        }
        Err(e) => store_error(e),
    }
}

/// Hosts that have shipped logs for one service.
#[derive(Debug, Serialize)]
pub struct ServiceHosts {
    pub service_name: String,
    pub exists: bool,
    pub hosts: Vec<String>,
}

/// GET /logs/{service}
pub async fn service_hosts(
    State(state): State<ApiState>,
    user: CurrentUser,
    Path(service): Path<String>,
) -> impl IntoResponse {
    if let Err(resp) = require(&state, &user, Requirement::AppOwner(service.clone())) {
        return resp;
    }
    match state.store.log_service(&service) {
        Ok(found) => {
            let exists = found.is_some();
            ApiResponse::ok(ServiceHosts {
                service_name: service,
                exists,
                hosts: found.map(|s| s.hosts).unwrap_or_default(),
            })
            .into_response()
        }
        Err(e) => store_error(e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CursorQuery {
    pub next_cursor: Option<String>,
}

impl CursorQuery {
    fn token(&self) -> Option<PageToken> {
        self.next_cursor
            .as_deref()
            .filter(|c| !c.is_empty() && *c != EMPTY_CURSOR)
            .map(PageToken::new)
    }
}

/// GET /logs/{service}/{host}?next_cursor=
///
/// `host` may be `all` for every host of the service.
pub async fn host_logs(
    State(state): State<ApiState>,
    user: CurrentUser,
    Path((service, host)): Path<(String, String)>,
    Query(query): Query<CursorQuery>,
) -> impl IntoResponse {
    if let Err(resp) = require(&state, &user, Requirement::AppOwner(service.clone())) {
        return resp;
    }
    let token = query.token();
    match state
        .store
        .list_logs(&service, &host, state.page_size, token.as_ref())
    {
        Ok(page) => {
            debug!(%service, %host, records = page.records.len(), has_more = page.has_more, "log page served");
            ApiResponse::ok(page).into_response()
        }
        Err(e) => store_error(e),
    }
}
