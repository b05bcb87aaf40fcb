//! Common error types for services

use thiserror::Error;

/// Storage collaborator errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Requested symbol has no stored data
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// Input rejected before it reached the store
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Backend-specific failure
    #[error("Storage backend error: {0}")]
    Backend(String),
}
