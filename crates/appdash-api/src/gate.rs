//! Caller identity and the HTTP side of the access gate.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use appdash_state::{Requirement, authorize};

use crate::ApiState;
use crate::handlers::{error_response, store_error};

/// Header carrying the authenticated email, set by the login proxy.
pub const USER_HEADER: &str = "x-appdash-user";

/// Header carrying the shared secret of log shippers.
pub const INGEST_TOKEN_HEADER: &str = "x-appdash-ingest-token";

/// The caller's email, or `None` for anonymous requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentUser(pub Option<String>);

impl CurrentUser {
    pub fn email(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let email = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        Ok(CurrentUser(email))
    }
}

fn denial_message(requirement: &Requirement) -> String {
    match requirement {
        Requirement::LoggedIn => "not authorized: sign in first".to_string(),
        Requirement::AnyAdmin => {
            "not authorized: only the cloud administrator can do this".to_string()
        }
        Requirement::AppOwner(app_id) => {
            format!("not authorized: you do not administer {app_id}")
        }
        Requirement::CanUpload => "not authorized: you may not upload apps".to_string(),
    }
}

/// Check `user` against `requirement`, producing the 403 (or store error)
/// response on denial. On success returns the caller's email.
pub(crate) fn require(
    state: &ApiState,
    user: &CurrentUser,
    requirement: Requirement,
) -> Result<String, Response> {
    let deny = |requirement: &Requirement| {
        debug!(user = ?user.email(), ?requirement, "request denied");
        error_response(&denial_message(requirement), StatusCode::FORBIDDEN).into_response()
    };
    let Some(email) = user.email() else {
        return Err(deny(&requirement));
    };
    match authorize(&state.store, Some(email), &requirement) {
        Ok(true) => Ok(email.to_string()),
        Ok(false) => Err(deny(&requirement)),
        Err(e) => Err(store_error(e)),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;
    use crate::test_support::{as_user, harness};

    async fn extract(req: Request<()>) -> CurrentUser {
        let (mut parts, _) = req.into_parts();
        CurrentUser::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn header_identifies_the_caller() {
        let req = Request::builder()
            .header(USER_HEADER, " dev@example.com ")
            .body(())
            .unwrap();
        assert_eq!(extract(req).await.email(), Some("dev@example.com"));
    }

    #[tokio::test]
    async fn missing_or_blank_header_is_anonymous() {
        let req = Request::builder().body(()).unwrap();
        assert_eq!(extract(req).await, CurrentUser(None));

        let req = Request::builder().header(USER_HEADER, "  ").body(()).unwrap();
        assert_eq!(extract(req).await, CurrentUser(None));
    }

    #[test]
    fn denial_is_forbidden() {
        let h = harness();
        let err = require(&h.state, &as_user("viewer@example.com"), Requirement::AnyAdmin)
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        assert_eq!(
            require(&h.state, &as_user("admin@example.com"), Requirement::AnyAdmin).unwrap(),
            "admin@example.com"
        );
        assert!(
            require(
                &h.state,
                &as_user("dev@example.com"),
                Requirement::AppOwner("guestbook".into())
            )
            .is_ok()
        );
        let anon = require(&h.state, &CurrentUser(None), Requirement::LoggedIn).unwrap_err();
        assert_eq!(anon.status(), StatusCode::FORBIDDEN);
    }
}
