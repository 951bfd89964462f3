// Keyvault — Enclave Module
//
// Generates key material and models it so raw bytes stay inside the crate:
// non-extractable keys can be stored, fetched and used for signing, but their
// bytes are never handed to application code.

mod error;
mod master;
mod models;
mod provider;

pub use error::EnclaveError;
pub use master::{KeyringProvider, MasterKeyProvider, StaticSecretProvider, WrappingKey};
pub use models::{
    Algorithm, CryptoKey, CryptoKeyPair, HashAlgorithm, KeyGenParams, KeyMaterial, KeyType,
    KeyUsage, NamedCurve,
};
pub use provider::{KeyGenerator, SoftwareKeyGenerator};

#[cfg(test)]
pub use provider::mock;
