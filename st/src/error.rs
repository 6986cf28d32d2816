//! Store error types

use thiserror::Error;

/// Errors from the state stores
#[derive(Debug, Error)]
pub enum StoreError {
    /// A snapshot or branch id that does not exist. Hard failure: returning a
    /// wrong-but-plausible history would be worse than erroring.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl StoreError {
    /// Check whether this is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Result alias used throughout the store crate
pub type Result<T> = std::result::Result<T, StoreError>;
