//! Refresh controller: one reconciliation pass per cached kind.
//!
//! `refresh_all` runs six independent steps in a fixed order. A step that
//! fails (upstream unavailable, malformed response, store error) is logged
//! and recorded in the [`RefreshReport`]; the next step runs regardless.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use appdash_state::{
    ApiStatusEntry, AppEntry, NodeStatus, StateError, StateResult, StateStore, UserAccount,
};

use crate::client::{ClientError, ControlPlane, NodeFact, Roster};

/// Role whose host is the cluster's head node.
pub const HEAD_NODE_ROLE: &str = "shadow";

/// App id the control plane reports when no apps are deployed.
const NO_APPS_SENTINEL: &str = "none";

/// The six refresh steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStep {
    HeadNode,
    DatabaseInfo,
    ApiStatus,
    NodeStats,
    Apps,
    Users,
}

impl RefreshStep {
    pub const ALL: [RefreshStep; 6] = [
        RefreshStep::HeadNode,
        RefreshStep::DatabaseInfo,
        RefreshStep::ApiStatus,
        RefreshStep::NodeStats,
        RefreshStep::Apps,
        RefreshStep::Users,
    ];
}

impl fmt::Display for RefreshStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RefreshStep::HeadNode => "head_node",
            RefreshStep::DatabaseInfo => "database_info",
            RefreshStep::ApiStatus => "api_status",
            RefreshStep::NodeStats => "node_stats",
            RefreshStep::Apps => "apps",
            RefreshStep::Users => "users",
        };
        f.write_str(name)
    }
}

/// Why a single step failed.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Upstream(#[from] ClientError),

    #[error(transparent)]
    Store(#[from] StateError),
}

/// Outcome of one `refresh_all` pass.
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub succeeded: Vec<RefreshStep>,
    pub failed: Vec<(RefreshStep, StepError)>,
}

impl RefreshReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_steps(&self) -> Vec<RefreshStep> {
        self.failed.iter().map(|(step, _)| *step).collect()
    }
}

/// Pulls cluster state from upstream and reconciles it into the cache.
pub struct RefreshController {
    store: StateStore,
    control_plane: Arc<dyn ControlPlane>,
    roster: Arc<dyn Roster>,
}

impl RefreshController {
    pub fn new(
        store: StateStore,
        control_plane: Arc<dyn ControlPlane>,
        roster: Arc<dyn Roster>,
    ) -> Self {
        Self {
            store,
            control_plane,
            roster,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn control_plane(&self) -> &Arc<dyn ControlPlane> {
        &self.control_plane
    }

    pub fn roster(&self) -> &Arc<dyn Roster> {
        &self.roster
    }

    /// Refresh every cached kind. Never fails as a whole.
    pub async fn refresh_all(&self) -> RefreshReport {
        let mut report = RefreshReport::default();
        for step in RefreshStep::ALL {
            let result = match step {
                RefreshStep::HeadNode => self.refresh_head_node().await,
                RefreshStep::DatabaseInfo => self.refresh_database_info().await,
                RefreshStep::ApiStatus => self.refresh_api_status().await,
                RefreshStep::NodeStats => self.refresh_node_stats().await,
                RefreshStep::Apps => self.refresh_apps().await,
                RefreshStep::Users => self.refresh_users().await,
            };
            match result {
                Ok(()) => report.succeeded.push(step),
                Err(e) => {
                    warn!(%step, error = %e, "refresh step failed, keeping cached data");
                    report.failed.push((step, e));
                }
            }
        }
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "cache refresh finished"
        );
        report
    }

    /// Populate the cache on first-ever use. Returns true if a refresh ran.
    ///
    /// The empty snapshot is written before refreshing so concurrent
    /// first requests do not all trigger a refresh.
    pub async fn ensure_warm(&self) -> StateResult<bool> {
        if self.store.cluster_snapshot()?.is_some() {
            return Ok(false);
        }
        if !self.store.ensure_cluster_snapshot()? {
            return Ok(false);
        }
        info!("cold start, populating cache");
        self.refresh_all().await;
        Ok(true)
    }

    async fn refresh_head_node(&self) -> Result<(), StepError> {
        let host = self.control_plane.get_host_with_role(HEAD_NODE_ROLE).await?;
        debug!(%host, "head node refreshed");
        self.store
            .update_cluster_snapshot(|s| s.head_node = Some(host))?;
        Ok(())
    }

    async fn refresh_database_info(&self) -> Result<(), StepError> {
        let info = self.control_plane.get_database_information().await?;
        self.store.update_cluster_snapshot(|s| {
            s.table = Some(info.table);
            s.replication = Some(info.replication);
        })?;
        Ok(())
    }

    async fn refresh_api_status(&self) -> Result<(), StepError> {
        let statuses: Vec<ApiStatusEntry> = self
            .control_plane
            .get_api_status()
            .await?
            .into_iter()
            .map(|(name, status)| ApiStatusEntry { name, status })
            .collect();
        self.store.reconcile(&statuses)?;
        Ok(())
    }

    async fn refresh_node_stats(&self) -> Result<(), StepError> {
        let nodes: Vec<NodeStatus> = self
            .control_plane
            .get_stats()
            .await?
            .into_iter()
            .map(node_status)
            .collect();
        self.store.reconcile(&nodes)?;
        Ok(())
    }

    /// Build the complete app set before swapping it in.
    async fn refresh_apps(&self) -> Result<(), StepError> {
        let running = self.control_plane.get_app_status().await?;
        let mut login_host: Option<String> = None;
        let mut apps = Vec::with_capacity(running.len());

        for (app_id, serving) in running {
            if app_id == NO_APPS_SENTINEL {
                continue;
            }
            let url = if serving {
                if login_host.is_none() {
                    login_host = Some(self.roster.get_login_host().await?);
                }
                let host = login_host.as_deref().unwrap_or_default();
                match self.roster.get_app_port(&app_id).await {
                    Ok(port) => Some(format!("http://{host}:{port}")),
                    Err(e) => {
                        debug!(%app_id, error = %e, "no port for app, listing as loading");
                        None
                    }
                }
            } else {
                None
            };
            apps.push(AppEntry { app_id, url });
        }

        self.store.reconcile(&apps)?;
        Ok(())
    }

    async fn refresh_users(&self) -> Result<(), StepError> {
        let emails = self.roster.list_all_users().await?;
        let mut accounts = Vec::with_capacity(emails.len());
        for email in emails {
            let is_cloud_admin = self.roster.is_user_admin(&email).await?;
            let can_upload_apps = self.roster.can_upload(&email).await?;
            let user_app_list = self.roster.get_user_app_list(&email).await?;
            accounts.push(UserAccount {
                email,
                is_cloud_admin,
                can_upload_apps,
                user_app_list,
            });
        }
        self.store.reconcile(&accounts)?;
        Ok(())
    }
}

fn node_status(fact: NodeFact) -> NodeStatus {
    NodeStatus {
        host: fact.ip,
        cpu: fact.cpu.to_string(),
        memory: fact.memory.to_string(),
        disk: fact.disk.to_string(),
        roles: fact.roles,
    }
}
