// Keyvault — Library root
//
// Re-exports the store, enclave, vault, config and CLI modules.

pub mod cli;
pub mod config;
pub mod enclave;
pub mod error;
pub mod store;
pub mod vault;

pub use config::{MasterSecret, VaultConfig};
pub use error::{Result, VaultError};
pub use vault::{CreateKeyOptions, KeyVault, RestoreReport};
