//! appdash-api: REST API for the dashboard.
//!
//! Serves the cached cluster view, app management, user administration and
//! the log viewer. Callers are identified by the `x-appdash-user` header set
//! by the fronting login proxy; every gated route checks the caller against
//! the cached user accounts.
//!
//! # API Routes
//!
//! | Method | Path | Gate |
//! |---|---|---|
//! | GET | `/api/v1/cluster` | none (`?forcerefresh=1` needs admin) |
//! | GET | `/api/v1/status` | logged in |
//! | GET | `/api/v1/apps` | logged in, filtered by ownership |
//! | POST | `/api/v1/refresh` | admin |
//! | POST | `/api/v1/apps/upload?filename=` | can upload |
//! | POST | `/api/v1/apps/delete` | admin or app owner |
//! | POST | `/api/v1/apps/relocate` | admin or app owner |
//! | POST | `/api/v1/apps/{app_id}/requests` | none (stats agent) |
//! | GET | `/api/v1/apps/{app_id}/requests` | admin or app owner |
//! | POST/DELETE | `/api/v1/apps/{app_id}/instances` | none (node agent) |
//! | GET | `/api/v1/apps/{app_id}/instances` | admin or app owner |
//! | POST | `/api/v1/logs/gather` | admin |
//! | POST | `/api/v1/groomer` | admin |
//! | GET/POST | `/api/v1/authorize` | admin |
//! | POST | `/api/v1/users` | none (sign-up) |
//! | POST | `/api/v1/users/password` | admin |
//! | POST | `/logs/upload` | ingest token, when configured |
//! | GET | `/logs` | admin or owner of a service |
//! | GET | `/logs/{service}` | admin or owner |
//! | GET | `/logs/{service}/{host}?next_cursor=` | admin or owner |

pub mod apps;
pub mod gate;
pub mod handlers;
pub mod instances;
pub mod logs;
pub mod users;

use axum::Router;
use axum::routing::{get, post};

use appdash_refresh::RefreshScheduler;
use appdash_state::{DEFAULT_PAGE_SIZE, StateStore};

pub use gate::{CurrentUser, INGEST_TOKEN_HEADER, USER_HEADER};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub scheduler: RefreshScheduler,
    /// Shared secret log shippers must present. `None` accepts any shipper.
    pub ingest_token: Option<String>,
    /// Records per log viewer page.
    pub page_size: usize,
}

impl ApiState {
    pub fn new(store: StateStore, scheduler: RefreshScheduler) -> Self {
        Self {
            store,
            scheduler,
            ingest_token: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_ingest_token(mut self, token: Option<String>) -> Self {
        self.ingest_token = token;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

/// Build the complete router (REST API + log viewer).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/cluster", get(handlers::cluster))
        .route("/status", get(handlers::status))
        .route("/apps", get(handlers::list_apps))
        .route("/refresh", post(handlers::refresh))
        .route("/apps/upload", post(apps::upload_app))
        .route("/apps/delete", post(apps::delete_app))
        .route("/apps/relocate", post(apps::relocate_app))
        .route(
            "/apps/{app_id}/requests",
            get(handlers::list_request_rates).post(handlers::record_request_rate),
        )
        .route(
            "/apps/{app_id}/instances",
            get(instances::list_instances)
                .post(instances::record_instances)
                .delete(instances::remove_instances),
        )
        .route("/logs/gather", post(handlers::gather_logs))
        .route("/groomer", post(handlers::run_groomer))
        .route(
            "/authorize",
            get(users::list_permissions).post(users::update_permissions),
        )
        .route("/users", post(users::create_user))
        .route("/users/password", post(users::change_password));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/logs", get(logs::list_services))
        .route("/logs/upload", post(logs::upload_logs))
        .route("/logs/{service}", get(logs::service_hosts))
        .route("/logs/{service}/{host}", get(logs::host_logs))
        .with_state(state)
}
