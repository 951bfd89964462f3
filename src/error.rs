// Keyvault — Top-level error types
//
// Aggregates errors from the enclave and store modules into a single
// error enum for the vault boundary.

use thiserror::Error;

use crate::enclave::EnclaveError;
use crate::store::StoreError;
use crate::vault::EntryError;

/// Top-level error type for all vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(#[source] EnclaveError),

    #[error("Error storing key: {0}")]
    KeyStorageFailed(#[source] StoreError),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Stored entry '{name}' is corrupt: {source}")]
    CorruptEntry {
        name: String,
        #[source]
        source: EntryError,
    },

    #[error("Master key unavailable: {0}")]
    MasterKey(#[source] EnclaveError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Other(String),
}

impl VaultError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_storage_failure_keeps_store_cause() {
        let err = VaultError::KeyStorageFailed(StoreError::TransactionAborted("disk full".into()));
        assert!(err.to_string().starts_with("Error storing key"));
        assert!(err.source().is_some());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_generation_failure_keeps_enclave_cause() {
        let err = VaultError::KeyGenerationFailed(EnclaveError::Engine("no entropy".into()));
        assert!(err.to_string().contains("no entropy"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_master_key_failure_keeps_cause() {
        let err = VaultError::MasterKey(EnclaveError::Keyring("locked".into()));
        assert_eq!(err.to_string(), "Master key unavailable: Keyring error: locked");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_not_found_names_the_key() {
        let err = VaultError::KeyNotFound("session-key".into());
        assert_eq!(err.to_string(), "Key not found: session-key");
        assert!(err.is_not_found());
    }
}
