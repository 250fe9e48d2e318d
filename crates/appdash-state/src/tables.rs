//! redb table definitions for the dashboard cache store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).
//! Log keys are `|`-separated composites; see [`crate::keys`].

use redb::TableDefinition;

/// Singleton cluster snapshot under [`CLUSTER_KEY`].
pub const CLUSTER: TableDefinition<&str, &[u8]> = TableDefinition::new("cluster");

/// Key of the one record in [`CLUSTER`].
pub const CLUSTER_KEY: &str = "cluster";

/// API status keyed by API name.
pub const API_STATUS: TableDefinition<&str, &[u8]> = TableDefinition::new("api_status");

/// Node status keyed by host address.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Application entries keyed by app id.
pub const APPS: TableDefinition<&str, &[u8]> = TableDefinition::new("apps");

/// User accounts keyed by email.
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Logged services keyed by service name.
pub const LOG_SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("log_services");

/// Log records keyed by `{service}|{host}|{inverted}`.
pub const LOG_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("log_records");

/// Cross-host index keyed by `{service}|{inverted}|{host}`; value is the
/// primary key in [`LOG_RECORDS`].
pub const LOG_TIMELINE: TableDefinition<&str, &str> = TableDefinition::new("log_timeline");

/// Request-rate samples keyed by `{app_id}|{inverted}`.
pub const REQUEST_RATES: TableDefinition<&str, &[u8]> = TableDefinition::new("request_rates");

/// Application server instances keyed by `{app_id}|{host}|{port}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");
