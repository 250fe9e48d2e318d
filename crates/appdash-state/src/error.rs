//! Error types for the dashboard cache store.

use thiserror::Error;

/// Result type alias for cache store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during cache store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A pagination token that does not decode or belongs to another scan.
    #[error("invalid page token: {0}")]
    InvalidToken(String),

    /// Caller-supplied input that cannot be stored (e.g. a log batch with a
    /// bad host name).
    #[error("malformed input: {0}")]
    Malformed(String),
}
