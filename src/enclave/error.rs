// Keyvault — Enclave error types

use thiserror::Error;

use super::KeyUsage;

#[derive(Debug, Error)]
pub enum EnclaveError {
    #[error("Invalid key usages for {algorithm}: {reason}")]
    InvalidUsages {
        algorithm: &'static str,
        reason: String,
    },

    #[error("Invalid algorithm parameters: {0}")]
    InvalidParameters(String),

    #[error("Key material is not extractable")]
    NotExtractable,

    #[error("Key usage '{0}' is not permitted for this key")]
    UsageNotPermitted(KeyUsage),

    #[error("Operation not supported: {0}")]
    UnsupportedOperation(String),

    #[error("Crypto engine error: {0}")]
    Engine(String),

    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("Key derivation error: {0}")]
    Derivation(String),

    #[error("Key wrapping error: {0}")]
    Wrapping(String),
}
