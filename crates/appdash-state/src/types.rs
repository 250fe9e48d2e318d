//! Record types for the dashboard cache store.
//!
//! These mirror what the control plane and roster service report about the
//! cluster, plus the log records shipped in by hosts. All types are
//! serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

/// Application id as registered with the control plane.
pub type AppId = String;

// ── Cluster ────────────────────────────────────────────────────────

/// Singleton record describing the cluster itself.
///
/// Rewritten field by field on each refresh; shown to every visitor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusterSnapshot {
    /// Address of the head node (the machine running the front proxy).
    pub head_node: Option<String>,
    /// Name of the datastore backend (e.g. "cassandra").
    pub table: Option<String>,
    /// Replication factor of the datastore backend.
    pub replication: Option<String>,
}

/// Datastore backend facts reported by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseInfo {
    pub table: String,
    pub replication: String,
}

// ── Cached kinds ───────────────────────────────────────────────────

/// Status of one named platform API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiStatusEntry {
    pub name: String,
    /// e.g. "running", "failed", "unknown".
    pub status: String,
}

/// Utilization and roles of one machine, keyed by host address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeStatus {
    pub host: String,
    /// Percentages, kept as reported.
    pub cpu: String,
    pub memory: String,
    pub disk: String,
    pub roles: Vec<String>,
}

/// Where an application is served. `url` is `None` while it is loading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppEntry {
    pub app_id: AppId,
    pub url: Option<String>,
}

/// A user known to the roster service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserAccount {
    pub email: String,
    pub is_cloud_admin: bool,
    pub can_upload_apps: bool,
    /// Apps this user administers.
    pub user_app_list: Vec<AppId>,
}

impl UserAccount {
    pub fn owns(&self, app_id: &str) -> bool {
        self.user_app_list.iter().any(|a| a == app_id)
    }
}

// ── Logs ───────────────────────────────────────────────────────────

/// A service that has shipped logs, with every host seen for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogService {
    pub name: String,
    /// Append-only, in first-seen order.
    pub hosts: Vec<String>,
}

/// One log line as submitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogLine {
    pub message: String,
    pub level: u32,
    /// Unix seconds.
    pub timestamp: u64,
}

/// All lines from one (service, host, second) bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    pub service: String,
    pub host: String,
    pub timestamp: u64,
    /// In submission order.
    pub lines: Vec<LogLine>,
}

// ── Request stats ──────────────────────────────────────────────────

/// Requests-per-second sample reported for one app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestRate {
    pub app_id: AppId,
    pub timestamp: u64,
    pub requests_per_second: f64,
}

/// One application server process, as reported by a node agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceInfo {
    pub app_id: AppId,
    pub host: String,
    pub port: u16,
    /// Runtime language, e.g. "python27".
    pub language: String,
}

/// Identifies an [`InstanceInfo`] within one app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceAddress {
    pub host: String,
    pub port: u16,
}
