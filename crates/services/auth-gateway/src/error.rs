//! Gateway error types

use thiserror::Error;

use crate::store::StoreError;

/// Top-level gateway error
#[derive(Debug, Error)]
pub enum Error {
    /// Backing store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, Error>;
