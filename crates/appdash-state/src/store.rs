//! StateStore: redb-backed cache for the cluster dashboard.
//!
//! Provides typed access to the cluster snapshot, the refreshed kinds
//! (API status, nodes, apps, users), request-rate samples and app server
//! instances. Log records
//! live in [`crate::logs`]. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::StateResult;
use crate::keys;
use crate::tables::*;
use crate::types::*;

/// Port the monitoring service listens on at the head node.
pub const MONITOR_PORT: u16 = 8050;

/// Thread-safe cache store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    pub(crate) db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent cache store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "cache store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory cache store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory cache store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CLUSTER).map_err(map_err!(Table))?;
        txn.open_table(API_STATUS).map_err(map_err!(Table))?;
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(APPS).map_err(map_err!(Table))?;
        txn.open_table(USERS).map_err(map_err!(Table))?;
        txn.open_table(LOG_SERVICES).map_err(map_err!(Table))?;
        txn.open_table(LOG_RECORDS).map_err(map_err!(Table))?;
        txn.open_table(LOG_TIMELINE).map_err(map_err!(Table))?;
        txn.open_table(REQUEST_RATES).map_err(map_err!(Table))?;
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Cluster snapshot ───────────────────────────────────────────

    /// The cluster snapshot, or `None` before the first refresh ever ran.
    pub fn cluster_snapshot(&self) -> StateResult<Option<ClusterSnapshot>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTER).map_err(map_err!(Table))?;
        match table.get(CLUSTER_KEY).map_err(map_err!(Read))? {
            Some(guard) => {
                let snapshot: ClusterSnapshot =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    /// Create an empty snapshot if none exists. Returns true if it was created.
    pub fn ensure_cluster_snapshot(&self) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let created;
        {
            let mut table = txn.open_table(CLUSTER).map_err(map_err!(Table))?;
            created = table.get(CLUSTER_KEY).map_err(map_err!(Read))?.is_none();
            if created {
                let value = serde_json::to_vec(&ClusterSnapshot::default())
                    .map_err(map_err!(Serialize))?;
                table
                    .insert(CLUSTER_KEY, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if created {
            debug!("empty cluster snapshot created");
        }
        Ok(created)
    }

    /// Read-modify-write the cluster snapshot in one transaction.
    pub fn update_cluster_snapshot<F>(&self, f: F) -> StateResult<ClusterSnapshot>
    where
        F: FnOnce(&mut ClusterSnapshot),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let snapshot;
        {
            let mut table = txn.open_table(CLUSTER).map_err(map_err!(Table))?;
            let mut current = match table.get(CLUSTER_KEY).map_err(map_err!(Read))? {
                Some(guard) => serde_json::from_slice::<ClusterSnapshot>(guard.value())
                    .map_err(map_err!(Deserialize))?,
                None => ClusterSnapshot::default(),
            };
            f(&mut current);
            let value = serde_json::to_vec(&current).map_err(map_err!(Serialize))?;
            table
                .insert(CLUSTER_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
            snapshot = current;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(snapshot)
    }

    /// URL of the monitoring service on the head node, or an empty string
    /// while the head node is unknown.
    pub fn monitoring_url(&self) -> StateResult<String> {
        Ok(self
            .cluster_snapshot()?
            .and_then(|s| s.head_node)
            .filter(|h| !h.is_empty())
            .map(|h| format!("http://{h}:{MONITOR_PORT}"))
            .unwrap_or_default())
    }

    // ── Refreshed kinds ────────────────────────────────────────────

    /// API name → status.
    pub fn api_statuses(&self) -> StateResult<BTreeMap<String, String>> {
        Ok(self
            .list_records::<ApiStatusEntry>()?
            .into_iter()
            .map(|e| (e.name, e.status))
            .collect())
    }

    /// Every node ever reported, in host order.
    pub fn node_statuses(&self) -> StateResult<Vec<NodeStatus>> {
        self.list_records()
    }

    /// App id → serving URL (`None` while loading).
    pub fn app_entries(&self) -> StateResult<BTreeMap<AppId, Option<String>>> {
        Ok(self
            .list_records::<AppEntry>()?
            .into_iter()
            .map(|e| (e.app_id, e.url))
            .collect())
    }

    pub fn user_account(&self, email: &str) -> StateResult<Option<UserAccount>> {
        self.get_record(email)
    }

    pub fn user_accounts(&self) -> StateResult<Vec<UserAccount>> {
        self.list_records()
    }

    /// Drop a deleted app from the app list and from the given user's
    /// owned apps, in one transaction. Returns the user's updated account.
    pub fn delete_app_entry(&self, app_id: &str, email: &str) -> StateResult<Option<UserAccount>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let account;
        {
            let mut apps = txn.open_table(APPS).map_err(map_err!(Table))?;
            apps.remove(app_id).map_err(map_err!(Write))?;

            let mut users = txn.open_table(USERS).map_err(map_err!(Table))?;
            let found = match users.get(email).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice::<UserAccount>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            account = match found {
                Some(mut user) if user.owns(app_id) => {
                    user.user_app_list.retain(|a| a != app_id);
                    let value = serde_json::to_vec(&user).map_err(map_err!(Serialize))?;
                    users
                        .insert(email, value.as_slice())
                        .map_err(map_err!(Write))?;
                    Some(user)
                }
                other => other,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%app_id, %email, "app entry deleted");
        Ok(account)
    }

    // ── Request rates ──────────────────────────────────────────────

    /// Store one requests-per-second sample for an app.
    pub fn record_request_rate(&self, sample: &RequestRate) -> StateResult<()> {
        keys::validate_component("app id", &sample.app_id)?;
        let key = keys::request_rate_key(&sample.app_id, sample.timestamp)?;
        let value = serde_json::to_vec(sample).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(REQUEST_RATES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Most recent request-rate samples for an app, newest first.
    pub fn request_rates(&self, app_id: &str, limit: usize) -> StateResult<Vec<RequestRate>> {
        let prefix = keys::scan_prefix(&[app_id]);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REQUEST_RATES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            if results.len() >= limit {
                break;
            }
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let sample: RequestRate =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(sample);
        }
        Ok(results)
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Record app server instances, replacing any with the same address.
    ///
    /// Every key is built before the write starts, so one bad entry stores
    /// nothing.
    pub fn put_instances(&self, instances: &[InstanceInfo]) -> StateResult<()> {
        let mut entries = Vec::with_capacity(instances.len());
        for instance in instances {
            let key = keys::instance_key(&instance.app_id, &instance.host, instance.port)?;
            let value = serde_json::to_vec(instance).map_err(map_err!(Serialize))?;
            entries.push((key, value));
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            for (key, value) in &entries {
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count = entries.len(), "instances recorded");
        Ok(())
    }

    /// Forget instances of one app. Unknown addresses are skipped; returns
    /// how many were removed.
    pub fn delete_instances(
        &self,
        app_id: &str,
        addresses: &[InstanceAddress],
    ) -> StateResult<usize> {
        let keys = addresses
            .iter()
            .map(|a| keys::instance_key(app_id, &a.host, a.port))
            .collect::<StateResult<Vec<_>>>()?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut removed = 0;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            for key in &keys {
                if table.remove(key.as_str()).map_err(map_err!(Write))?.is_some() {
                    removed += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%app_id, removed, "instances deleted");
        Ok(removed)
    }

    /// Every recorded instance of an app, by host then port.
    pub fn app_instances(&self, app_id: &str) -> StateResult<Vec<InstanceInfo>> {
        let prefix = keys::scan_prefix(&[app_id]);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let instance: InstanceInfo =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(instance);
        }
        Ok(results)
    }
}
