// Keyvault — Store error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage engine could not be reached: directory or file not
    /// creatable, database unreadable, or the collection schema is locked by
    /// another writer.
    #[error("Storage engine unavailable: {0}")]
    Unavailable(String),

    /// A write transaction was rolled back by the engine (disk full,
    /// read-only database, lock contention). Nothing was persisted.
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid store scope: {0}")]
    InvalidScope(String),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub(crate) fn unavailable(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Unavailable(format!("{context}: {err}"))
    }

    pub(crate) fn aborted(context: &str, err: impl std::fmt::Display) -> Self {
        Self::TransactionAborted(format!("{context}: {err}"))
    }
}
