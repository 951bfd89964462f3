// Keyvault — Vault Module
//
// The public surface: create, fetch, delete and list named keys, with
// optional time-to-live.

mod entry;
mod expiry;
mod facade;

pub use entry::{EntryError, StoredEntry};
pub use facade::{CreateKeyOptions, KeyVault, RestoreReport};
