//! appdash-refresh: keeps the dashboard cache in step with the cluster.
//!
//! Pulls state from the control plane and the roster service and
//! reconciles it into the [`appdash_state::StateStore`].
//!
//! # Architecture
//!
//! ```text
//! RefreshScheduler
//!   ├── periodic loop (fixed interval, watch-channel shutdown)
//!   ├── trigger() / trigger_after(delay)   fire-and-forget tasks
//!   └── RefreshController::refresh_all()
//!         ├── head node      ControlPlane::get_host_with_role("shadow")
//!         ├── database info  ControlPlane::get_database_information
//!         ├── API status     ControlPlane::get_api_status      UpsertOnly
//!         ├── node stats     ControlPlane::get_stats           UpsertOnly
//!         ├── apps           ControlPlane::get_app_status      FullReplace
//!         └── users          Roster::*                         UpsertOnly
//! ```
//!
//! Each step is isolated: a failing upstream call is logged and the
//! remaining steps still run, leaving the previous (stale) data in place.

pub mod client;
pub mod controller;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod http;
pub mod scheduler;

pub use client::{ClientError, ClientResult, ControlPlane, NodeFact, Permission, Roster};
pub use controller::{RefreshController, RefreshReport, RefreshStep, StepError};
pub use http::{HttpControlPlane, HttpRoster};
pub use scheduler::{MUTATION_REFRESH_DELAY, RefreshScheduler};
