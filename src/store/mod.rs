// Keyvault — Store Module
//
// Durable, scoped key-value persistence for opaque payloads. SQLite is the
// durable engine; the in-memory store substitutes for it in tests.

mod db;
mod error;
mod memory;
mod repository;

pub use db::{Database, StoreLocation, DEFAULT_BUSY_TIMEOUT};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use repository::{DurableStore, SqliteStore};
