//! appdash-state: cache store for the cluster dashboard.
//!
//! Backed by [redb](https://docs.rs/redb), mirrors live cluster state
//! (head node, API status, node stats, applications, users) and holds
//! ingested log records for browsing.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{service}|{host}|{inverted}`) sort newest-first, so
//! log pages come straight out of an ordered range scan.
//!
//! Every cached kind declares a [`ReconcilePolicy`]; a single generic
//! [`StateStore::reconcile`] applies it:
//!
//! ```text
//! ApiStatusEntry  UpsertOnly   stale names persist
//! NodeStatus      UpsertOnly   decommissioned hosts persist
//! UserAccount     UpsertOnly   removed users persist
//! AppEntry        FullReplace  exact mirror of the control plane
//! ```
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| $crate::error::StateError::$variant(e.to_string())
    };
}

pub mod access;
pub mod error;
pub mod keys;
pub mod logs;
pub mod reconcile;
pub mod store;
pub mod tables;
pub mod types;

pub use access::{Requirement, authorize, visible_apps};
pub use error::{StateError, StateResult};
pub use logs::{IngestBatch, IngestSummary, LogPage, PageToken, ALL_HOSTS, DEFAULT_PAGE_SIZE};
pub use reconcile::{CachedRecord, ReconcileOutcome, ReconcilePolicy};
pub use store::StateStore;
pub use types::*;
