//! Collaborator interfaces: the control plane and the roster service.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use appdash_state::DatabaseInfo;

pub type ClientResult<T> = Result<T, ClientError>;

/// Failures talking to an upstream service.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection refused, reset, or timed out.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    /// The response could not be decoded.
    #[error("malformed upstream response: {0}")]
    Malformed(String),

    /// The upstream answered but refused the request.
    #[error("upstream rejected request: {0}")]
    Rejected(String),
}

/// One machine as reported by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeFact {
    pub ip: String,
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Grantable per-user permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    UploadApp,
}

impl Permission {
    pub const ALL: [Permission; 1] = [Permission::UploadApp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::UploadApp => "upload_app",
        }
    }
}

/// The cluster-management service that knows live topology and health.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn get_host_with_role(&self, role: &str) -> ClientResult<String>;

    async fn get_database_information(&self) -> ClientResult<DatabaseInfo>;

    /// API name → status string.
    async fn get_api_status(&self) -> ClientResult<BTreeMap<String, String>>;

    async fn get_stats(&self) -> ClientResult<Vec<NodeFact>>;

    /// App id → whether it is serving yet.
    async fn get_app_status(&self) -> ClientResult<BTreeMap<String, bool>>;

    /// Deploy an app archive; returns the control plane's message.
    async fn upload_app(&self, filename: &str, archive: Bytes) -> ClientResult<String>;

    async fn delete_app(&self, app_id: &str) -> ClientResult<String>;

    async fn relocate_app(&self, app_id: &str, http_port: u16, https_port: u16)
    -> ClientResult<String>;

    /// Collect logs from every machine into one archive; returns its id.
    async fn gather_logs(&self) -> ClientResult<String>;

    /// Ask the groomer to recompute datastore kind statistics.
    async fn run_groomer(&self) -> ClientResult<String>;
}

/// Authoritative store of user identities, roles, and app ownership.
#[async_trait]
pub trait Roster: Send + Sync {
    async fn list_all_users(&self) -> ClientResult<Vec<String>>;

    async fn is_user_admin(&self, email: &str) -> ClientResult<bool>;

    async fn can_upload(&self, email: &str) -> ClientResult<bool>;

    async fn get_user_app_list(&self, email: &str) -> ClientResult<Vec<String>>;

    async fn get_app_port(&self, app_id: &str) -> ClientResult<u16>;

    /// Public host name apps are served from.
    async fn get_login_host(&self) -> ClientResult<String>;

    async fn create_user(&self, email: &str, password: &str) -> ClientResult<()>;

    async fn change_password(&self, email: &str, password: &str) -> ClientResult<()>;

    async fn set_permission(
        &self,
        email: &str,
        permission: Permission,
        enabled: bool,
    ) -> ClientResult<()>;
}
