//! User administration: sign-up, permissions, password changes.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use appdash_refresh::Permission;
use appdash_state::Requirement;

use crate::ApiState;
use crate::apps::ActionMessage;
use crate::gate::{CurrentUser, require};
use crate::handlers::{ApiResponse, client_error, error_response, store_error};

/// Accepted shape of a sign-up email.
const USER_EMAIL_PATTERN: &str = r"^\w[^@\s]*@[^@\s]{2,}$";

pub const MIN_PASSWORD_LENGTH: usize = 6;

// ── Permissions ────────────────────────────────────────────────

/// One row of the permission matrix.
#[derive(Debug, Serialize)]
pub struct UserPermissions {
    pub email: String,
    pub is_cloud_admin: bool,
    pub permissions: BTreeMap<&'static str, bool>,
}

#[derive(Debug, Deserialize)]
pub struct PermissionChange {
    pub email: String,
    pub permission: Permission,
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct PermissionUpdate {
    pub changes: Vec<PermissionChange>,
}

/// GET /api/v1/authorize
pub async fn list_permissions(
    State(state): State<ApiState>,
    user: CurrentUser,
) -> impl IntoResponse {
    if let Err(resp) = require(&state, &user, Requirement::AnyAdmin) {
        return resp;
    }
    match state.store.user_accounts() {
        Ok(accounts) => {
            let rows: Vec<UserPermissions> = accounts
                .into_iter()
                .map(|a| UserPermissions {
                    permissions: Permission::ALL
                        .iter()
                        .map(|p| match p {
                            Permission::UploadApp => (p.as_str(), a.can_upload_apps),
                        })
                        .collect(),
                    email: a.email,
                    is_cloud_admin: a.is_cloud_admin,
                })
                .collect();
            ApiResponse::ok(rows).into_response()
        }
        Err(e) => store_error(e),
    }
}

/// POST /api/v1/authorize
///
/// Applies each change independently; the message lists what happened to
/// every one of them.
pub async fn update_permissions(
    State(state): State<ApiState>,
    user: CurrentUser,
    Json(update): Json<PermissionUpdate>,
) -> impl IntoResponse {
    if let Err(resp) = require(&state, &user, Requirement::AnyAdmin) {
        return resp;
    }

    let roster = state.scheduler.controller().roster();
    let mut notes = Vec::with_capacity(update.changes.len());
    let mut applied = 0;
    for change in &update.changes {
        let verb = if change.enabled { "enabling" } else { "disabling" };
        let perm = change.permission.as_str();
        match roster
            .set_permission(&change.email, change.permission, change.enabled)
            .await
        {
            Ok(()) => {
                applied += 1;
                notes.push(format!("{} {perm} for {}.", capitalize(verb), change.email));
            }
            Err(e) => {
                warn!(email = %change.email, permission = perm, error = %e, "permission change failed");
                notes.push(format!("Error {verb} {perm} for {}.", change.email));
            }
        }
    }

    if applied > 0 {
        info!(applied, requested = update.changes.len(), "permissions updated");
        state.scheduler.after_mutation();
    }
    ApiResponse::ok(ActionMessage {
        message: notes.join(" "),
    })
    .into_response()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ── Sign-up ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

/// Per-field validation failures of a sign-up form.
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct SignupErrors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_confirmation: Option<String>,
}

impl SignupErrors {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.password.is_none() && self.password_confirmation.is_none()
    }

    fn summary(&self) -> String {
        [&self.email, &self.password, &self.password_confirmation]
            .into_iter()
            .flatten()
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Check a sign-up form without contacting the roster.
pub fn validate_new_user(form: &NewUser) -> Result<SignupErrors, regex::Error> {
    let email_re = Regex::new(USER_EMAIL_PATTERN)?;
    let mut errors = SignupErrors::default();
    if !email_re.is_match(&form.email) {
        errors.email = Some("Format must be foo@boo.goo.".to_string());
    }
    if form.password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.password = Some(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters long."
        ));
    }
    if form.password_confirmation != form.password {
        errors.password_confirmation = Some("Passwords do not match.".to_string());
    }
    Ok(errors)
}

/// POST /api/v1/users
pub async fn create_user(
    State(state): State<ApiState>,
    Json(form): Json<NewUser>,
) -> impl IntoResponse {
    let errors = match validate_new_user(&form) {
        Ok(errors) => errors,
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };
    if !errors.is_empty() {
        return error_response(&errors.summary(), StatusCode::BAD_REQUEST).into_response();
    }

    let roster = state.scheduler.controller().roster();
    match roster.create_user(&form.email, &form.password).await {
        Ok(()) => {
            info!(email = %form.email, "user created");
            state.scheduler.after_mutation();
            (
                StatusCode::CREATED,
                ApiResponse::ok(serde_json::json!({ "email": form.email })),
            )
                .into_response()
        }
        Err(e) => {
            warn!(email = %form.email, error = %e, "user creation failed");
            client_error(e)
        }
    }
}

// ── Passwords ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PasswordChange {
    pub email: String,
    pub password: String,
}

/// POST /api/v1/users/password
pub async fn change_password(
    State(state): State<ApiState>,
    user: CurrentUser,
    Json(req): Json<PasswordChange>,
) -> impl IntoResponse {
    if let Err(resp) = require(&state, &user, Requirement::AnyAdmin) {
        return resp;
    }
    let roster = state.scheduler.controller().roster();
    match roster.change_password(&req.email, &req.password).await {
        Ok(()) => {
            info!(email = %req.email, "password changed");
            state.scheduler.after_mutation();
            ApiResponse::ok(ActionMessage {
                message: format!("Password changed for {}.", req.email),
            })
            .into_response()
        }
        Err(e) => client_error(e),
    }
}
