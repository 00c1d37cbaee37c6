//! Error types for pool operations

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No active key exists. Retrying without outside intervention will not help.
    #[error("no active credential available: {0}")]
    NotFound(String),

    #[error("key store error: {0}")]
    Store(String),

    #[error("remote pool call failed: {0}")]
    Remote(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
