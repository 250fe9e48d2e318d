//! Generic reconciliation of refreshed records into the cache.
//!
//! Each cached kind names its table, its key, and whether a refresh may
//! leave stale records behind. [`StateStore::reconcile`] is the single
//! routine that applies the policy.

use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::StateResult;
use crate::store::StateStore;
use crate::tables::{API_STATUS, APPS, NODES, USERS};
use crate::types::{ApiStatusEntry, AppEntry, NodeStatus, UserAccount};

/// How a refresh cycle treats records that the authoritative source no
/// longer reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePolicy {
    /// Write what was reported; absent records stay as they were.
    UpsertOnly,
    /// The reported set becomes the whole table, swapped in one transaction.
    FullReplace,
}

/// A record kind the refresh cycle mirrors from the control plane or roster.
pub trait CachedRecord: Serialize + DeserializeOwned {
    /// Table holding this kind.
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]>;
    /// Reconciliation policy for this kind.
    const POLICY: ReconcilePolicy;
    /// Short kind name for logs.
    const KIND: &'static str;

    fn cache_key(&self) -> &str;
}

impl CachedRecord for ApiStatusEntry {
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = API_STATUS;
    const POLICY: ReconcilePolicy = ReconcilePolicy::UpsertOnly;
    const KIND: &'static str = "api_status";

    fn cache_key(&self) -> &str {
        &self.name
    }
}

impl CachedRecord for NodeStatus {
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = NODES;
    const POLICY: ReconcilePolicy = ReconcilePolicy::UpsertOnly;
    const KIND: &'static str = "node";

    fn cache_key(&self) -> &str {
        &self.host
    }
}

impl CachedRecord for AppEntry {
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = APPS;
    const POLICY: ReconcilePolicy = ReconcilePolicy::FullReplace;
    const KIND: &'static str = "app";

    fn cache_key(&self) -> &str {
        &self.app_id
    }
}

impl CachedRecord for UserAccount {
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = USERS;
    const POLICY: ReconcilePolicy = ReconcilePolicy::UpsertOnly;
    const KIND: &'static str = "user";

    fn cache_key(&self) -> &str {
        &self.email
    }
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub written: usize,
    pub removed: usize,
}

impl StateStore {
    /// Reconcile a freshly fetched set of records of one kind.
    ///
    /// Runs in a single write transaction. Under
    /// [`ReconcilePolicy::FullReplace`] every prior key is removed before the
    /// new set is written, and readers observe either the old or the new set.
    pub fn reconcile<R: CachedRecord>(&self, records: &[R]) -> StateResult<ReconcileOutcome> {
        let encoded = records
            .iter()
            .map(|r| Ok((r.cache_key(), serde_json::to_vec(r).map_err(map_err!(Serialize))?)))
            .collect::<StateResult<Vec<_>>>()?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut outcome = ReconcileOutcome::default();
        {
            let mut table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;

            if R::POLICY == ReconcilePolicy::FullReplace {
                let stale: Vec<String> = {
                    let mut keys = Vec::new();
                    for entry in table.iter().map_err(map_err!(Read))? {
                        let (key, _) = entry.map_err(map_err!(Read))?;
                        keys.push(key.value().to_string());
                    }
                    keys
                };
                for key in &stale {
                    table.remove(key.as_str()).map_err(map_err!(Write))?;
                }
                outcome.removed = stale.len();
            }

            for (key, value) in &encoded {
                table
                    .insert(*key, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            outcome.written = encoded.len();
        }
        txn.commit().map_err(map_err!(Transaction))?;

        debug!(
            kind = R::KIND,
            policy = ?R::POLICY,
            written = outcome.written,
            removed = outcome.removed,
            "cache kind reconciled"
        );
        Ok(outcome)
    }

    /// Read every record of one kind, in key order.
    pub fn list_records<R: CachedRecord>(&self) -> StateResult<Vec<R>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: R =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Read one record of one kind by key.
    pub fn get_record<R: CachedRecord>(&self, key: &str) -> StateResult<Option<R>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: R =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}
