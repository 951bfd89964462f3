// Keyvault — In-memory Durable Store
//
// Substitute backend for tests and ephemeral vaults. Nothing survives the
// process. Each `MemoryStore::new()` is an independent scope; clones share it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::repository::DurableStore;
use super::StoreError;

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<u8>>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Other("memory store lock poisoned".to_string()))
    }
}

impl DurableStore for MemoryStore {
    async fn set(&self, name: &str, payload: Vec<u8>) -> Result<(), StoreError> {
        self.lock()?.insert(name.to_string(), payload);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock()?.get(name).cloned())
    }

    async fn remove(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock()?.remove(name))
    }

    async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}
