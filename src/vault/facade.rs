// Keyvault — Key Vault Facade
//
// Sequences key generation and persistence and owns TTL-driven expiry.
// Application code talks to `KeyVault`; the store, generator and wrapping
// key behind it are injectable so tests can substitute any of them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::config::{MasterSecret, VaultConfig};
use crate::enclave::{
    KeyGenParams, KeyGenerator, KeyMaterial, KeyringProvider, SoftwareKeyGenerator,
    StaticSecretProvider, WrappingKey,
};
use crate::error::{Result, VaultError};
use crate::store::{DurableStore, SqliteStore};

use super::entry::{deadline_after, EntryError, EntryHeader, StoredEntry};
use super::expiry::ExpiryRegistry;

/// Arguments to [`KeyVault::create_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateKeyOptions {
    pub name: String,
    /// `None` selects the default: a non-extractable ECDSA P-256 signing pair.
    pub params: Option<KeyGenParams>,
    /// `None` or zero means the key never expires. A TTL whose deadline
    /// falls outside the representable date range is rejected.
    pub ttl: Option<Duration>,
}

impl CreateKeyOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: None,
            ttl: None,
        }
    }

    pub fn params(mut self, params: KeyGenParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Outcome of [`KeyVault::restore_expiries`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Entries whose expiry timer was (re)armed.
    pub scheduled: usize,
    /// Entries already past their deadline, removed during the scan.
    pub purged: usize,
}

pub struct KeyVault<S = SqliteStore, G = SoftwareKeyGenerator> {
    store: Arc<S>,
    generator: G,
    wrapping: WrappingKey,
    expiry: ExpiryRegistry,
}

impl KeyVault {
    /// Build the SQLite-backed vault described by `config`. The container
    /// file is created lazily by the first operation; the master secret is
    /// resolved here, creating a keyring entry on first use.
    pub fn open(config: &VaultConfig) -> Result<Self> {
        let store = SqliteStore::from_location(config.location()?);

        let wrapping = match &config.master_secret {
            MasterSecret::Keyring => WrappingKey::from_provider(
                &KeyringProvider::for_container(&config.container),
                &config.container,
            ),
            MasterSecret::Provided(secret) => WrappingKey::from_provider(
                &StaticSecretProvider::new(secret.to_vec()),
                &config.container,
            ),
        }
        .map_err(|e| {
            tracing::error!(container = %config.container, error = %e, "Master key unavailable");
            VaultError::MasterKey(e)
        })?;

        tracing::debug!(
            path = %store.location().db_path().display(),
            collection = %config.collection,
            master_secret = ?config.master_secret,
            "Vault configured"
        );
        Ok(Self::with_backend(store, SoftwareKeyGenerator::new(), wrapping))
    }
}

impl<S: DurableStore, G: KeyGenerator> KeyVault<S, G> {
    pub fn with_backend(store: S, generator: G, wrapping: WrappingKey) -> Self {
        Self {
            store: Arc::new(store),
            generator,
            wrapping,
            expiry: ExpiryRegistry::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    /// Generate key material, persist it under `options.name` and, when a
    /// positive TTL is given, schedule its removal.
    ///
    /// Overwriting an existing name cancels that name's pending expiry.
    /// Material that failed to persist is dropped, never returned.
    pub async fn create_key(&self, options: CreateKeyOptions) -> Result<KeyMaterial> {
        let CreateKeyOptions { name, params, ttl } = options;
        let params = params.unwrap_or_default();
        let ttl = ttl.filter(|ttl| !ttl.is_zero());
        if let Some(ttl) = ttl {
            if deadline_after(Utc::now(), ttl).is_none() {
                return Err(VaultError::InvalidArgument(format!(
                    "TTL {ttl:?} for key '{name}' is out of range"
                )));
            }
        }

        let material = self
            .generator
            .generate_key_material(&params)
            .await
            .map_err(|e| {
                tracing::error!(key = %name, error = %e, "Key generation failed");
                VaultError::KeyGenerationFailed(e)
            })?;

        let entry = StoredEntry::new(material, ttl).ok_or_else(|| {
            VaultError::InvalidArgument(format!("TTL {ttl:?} for key '{name}' is out of range"))
        })?;
        let payload = entry
            .encode(&name, &self.wrapping)
            .map_err(|e| VaultError::Other(format!("Failed to encode key '{name}': {e}")))?;

        {
            let mut timers = self.expiry.lock().await;
            self.store.set(&name, payload).await.map_err(|e| {
                tracing::error!(key = %name, error = %e, "Key storage failed");
                VaultError::KeyStorageFailed(e)
            })?;

            ExpiryRegistry::cancel(&mut timers, &name);
            if let Some(ttl) = ttl {
                self.expiry
                    .schedule(&mut timers, &name, ttl, Arc::clone(&self.store));
            }
        }

        tracing::info!(
            key = %name,
            algorithm = %params.algorithm,
            extractable = params.extractable,
            ttl = ?ttl,
            "Key stored"
        );
        Ok(entry.material)
    }

    /// Return the material stored under `name`.
    ///
    /// An entry whose recorded deadline has passed is removed here and
    /// reported as missing, even if its timer never ran.
    pub async fn fetch_key(&self, name: &str) -> Result<KeyMaterial> {
        let entry = self
            .read_entry(name)
            .await?
            .ok_or_else(|| VaultError::KeyNotFound(name.to_string()))?;

        if !entry.is_expired_at(Utc::now()) {
            return Ok(entry.material);
        }
        if self.purge_if_expired(name).await? {
            return Err(VaultError::KeyNotFound(name.to_string()));
        }

        // Replaced by a fresh entry between the read and the purge.
        match self.read_entry(name).await? {
            Some(entry) if !entry.is_expired_at(Utc::now()) => Ok(entry.material),
            _ => Err(VaultError::KeyNotFound(name.to_string())),
        }
    }

    /// Remove `name`, cancelling its pending expiry first.
    pub async fn delete_key(&self, name: &str) -> Result<()> {
        let removed = {
            let mut timers = self.expiry.lock().await;
            ExpiryRegistry::cancel(&mut timers, name);
            self.store.remove(name).await?
        };

        match removed {
            Some(_) => {
                tracing::info!(key = %name, "Key deleted");
                Ok(())
            }
            None => Err(VaultError::KeyNotFound(name.to_string())),
        }
    }

    pub async fn list_key_names(&self) -> Result<Vec<String>> {
        Ok(self.store.list_keys().await?)
    }

    /// Re-arm expiry timers from the deadlines recorded in the store.
    ///
    /// Call once after opening a vault over existing data. Entries already
    /// past their deadline are removed; unreadable entries are skipped.
    /// Only the recorded timestamps are read, no key is unsealed.
    pub async fn restore_expiries(&self) -> Result<RestoreReport> {
        let mut report = RestoreReport::default();
        let mut timers = self.expiry.lock().await;

        for name in self.store.list_keys().await? {
            let Some(payload) = self.store.get(&name).await? else {
                continue;
            };
            let header = match EntryHeader::decode(&payload) {
                Ok(header) => header,
                Err(e) => {
                    tracing::warn!(key = %name, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            match header.remaining(Utc::now()) {
                None => {}
                Some(remaining) if remaining.is_zero() => {
                    ExpiryRegistry::cancel(&mut timers, &name);
                    self.store.remove(&name).await?;
                    report.purged += 1;
                }
                Some(remaining) => {
                    ExpiryRegistry::cancel(&mut timers, &name);
                    self.expiry
                        .schedule(&mut timers, &name, remaining, Arc::clone(&self.store));
                    report.scheduled += 1;
                }
            }
        }

        tracing::info!(
            scheduled = report.scheduled,
            purged = report.purged,
            "Expiries restored"
        );
        Ok(report)
    }

    /// Number of expiry timers currently pending.
    pub async fn pending_expiries(&self) -> usize {
        self.expiry.lock().await.len()
    }

    pub async fn is_expiry_scheduled(&self, name: &str) -> bool {
        self.expiry.lock().await.contains_key(name)
    }

    async fn read_entry(&self, name: &str) -> Result<Option<StoredEntry>> {
        match self.store.get(name).await? {
            Some(payload) => StoredEntry::decode(name, &payload, &self.wrapping)
                .map(Some)
                .map_err(|source| corrupt(name, source)),
            None => Ok(None),
        }
    }

    /// Under the registry lock, remove `name` if its stored entry is past its
    /// deadline. Returns whether it was removed.
    async fn purge_if_expired(&self, name: &str) -> Result<bool> {
        let mut timers = self.expiry.lock().await;

        let Some(payload) = self.store.get(name).await? else {
            return Ok(false);
        };
        let header = EntryHeader::decode(&payload).map_err(|source| corrupt(name, source))?;
        if !header.is_expired_at(Utc::now()) {
            return Ok(false);
        }

        ExpiryRegistry::cancel(&mut timers, name);
        self.store.remove(name).await?;
        tracing::info!(key = %name, "Expired key purged");
        Ok(true)
    }
}

impl<S, G> Drop for KeyVault<S, G> {
    fn drop(&mut self) {
        self.expiry.shutdown();
    }
}

fn corrupt(name: &str, source: EntryError) -> VaultError {
    VaultError::CorruptEntry {
        name: name.to_string(),
        source,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enclave::mock::MockKeyGenerator;
    use crate::enclave::{Algorithm, HashAlgorithm, KeyType, KeyUsage, NamedCurve};
    use crate::store::{MemoryStore, StoreError};

    fn vault() -> KeyVault<MemoryStore, MockKeyGenerator> {
        KeyVault::with_backend(MemoryStore::new(), MockKeyGenerator::new(), WrappingKey::generate())
    }

    /// Two vaults over one store, sealing with the same key.
    fn sharing(store: &MemoryStore, wrapping: &WrappingKey) -> KeyVault<MemoryStore, MockKeyGenerator> {
        KeyVault::with_backend(store.clone(), MockKeyGenerator::new(), wrapping.clone())
    }

    /// A store whose writes always abort.
    #[derive(Default)]
    struct FailingStore {
        inner: MemoryStore,
    }

    impl DurableStore for FailingStore {
        async fn set(&self, _name: &str, _payload: Vec<u8>) -> std::result::Result<(), StoreError> {
            Err(StoreError::TransactionAborted("quota exceeded".into()))
        }

        async fn get(&self, name: &str) -> std::result::Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(name).await
        }

        async fn remove(&self, name: &str) -> std::result::Result<Option<Vec<u8>>, StoreError> {
            self.inner.remove(name).await
        }

        async fn list_keys(&self) -> std::result::Result<Vec<String>, StoreError> {
            self.inner.list_keys().await
        }
    }

    #[tokio::test]
    async fn test_create_then_fetch_returns_same_material() {
        let vault = vault();
        let created = vault.create_key(CreateKeyOptions::new("k")).await.unwrap();
        let fetched = vault.fetch_key("k").await.unwrap();
        assert_eq!(created, fetched);
        assert_eq!(vault.pending_expiries().await, 0);
    }

    #[tokio::test]
    async fn test_session_key_defaults_to_non_extractable_p256_pair() {
        let vault = vault();
        vault
            .create_key(CreateKeyOptions::new("session-key"))
            .await
            .unwrap();

        let material = vault.fetch_key("session-key").await.unwrap();
        let pair = material.as_pair().expect("default key is a pair");
        assert_eq!(
            pair.private_key.algorithm(),
            Algorithm::Ecdsa {
                named_curve: NamedCurve::P256
            }
        );
        assert_eq!(pair.private_key.key_type(), KeyType::Private);
        assert!(!pair.private_key.is_extractable());
        assert_eq!(pair.private_key.usages(), &[KeyUsage::Sign]);
        assert_eq!(pair.public_key.usages(), &[KeyUsage::Verify]);

        let signature = pair.sign(b"dpop proof").unwrap();
        assert!(pair.verify(b"dpop proof", &signature).unwrap());
    }

    #[tokio::test]
    async fn test_custom_params_are_used() {
        let vault = vault();
        let params = KeyGenParams::new(
            Algorithm::Hmac {
                hash: HashAlgorithm::Sha256,
                length: None,
            },
            true,
            vec![KeyUsage::Sign, KeyUsage::Verify],
        );
        let material = vault
            .create_key(CreateKeyOptions::new("mac").params(params))
            .await
            .unwrap();
        let secret = material.as_secret().expect("HMAC yields a secret key");
        assert_eq!(secret.export_raw().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_fetch_absent_is_key_not_found() {
        let err = vault().fetch_key("missing").await.unwrap_err();
        assert!(matches!(err, VaultError::KeyNotFound(name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_delete_then_fetch_is_key_not_found() {
        let vault = vault();
        vault.create_key(CreateKeyOptions::new("k")).await.unwrap();
        vault.delete_key("k").await.unwrap();

        assert!(vault.fetch_key("k").await.unwrap_err().is_not_found());
        // A second delete reports the same absence, not a store failure.
        assert!(vault.delete_key("k").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_key_names_reflects_contents() {
        let vault = vault();
        for name in ["b", "a", "c"] {
            vault.create_key(CreateKeyOptions::new(name)).await.unwrap();
        }
        vault.delete_key("b").await.unwrap();

        let mut names = vault.list_key_names().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_generation_failure_stores_nothing() {
        let vault = KeyVault::with_backend(
            MemoryStore::new(),
            MockKeyGenerator::failing("no rng"),
            WrappingKey::generate(),
        );
        let err = vault
            .create_key(CreateKeyOptions::new("k").ttl(Duration::from_secs(5)))
            .await
            .unwrap_err();

        assert!(matches!(err, VaultError::KeyGenerationFailed(_)));
        assert!(vault.store().is_empty());
        assert_eq!(vault.pending_expiries().await, 0);
    }

    #[tokio::test]
    async fn test_storage_failure_wraps_store_error() {
        let vault = KeyVault::with_backend(
            FailingStore::default(),
            MockKeyGenerator::new(),
            WrappingKey::generate(),
        );
        let err = vault
            .create_key(CreateKeyOptions::new("k").ttl(Duration::from_secs(5)))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VaultError::KeyStorageFailed(StoreError::TransactionAborted(_))
        ));
        assert_eq!(vault.pending_expiries().await, 0);
        assert!(vault.fetch_key("k").await.unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_removes_key_after_deadline() {
        let vault = vault();
        vault
            .create_key(CreateKeyOptions::new("temp").ttl(Duration::from_millis(50)))
            .await
            .unwrap();

        assert_eq!(vault.list_key_names().await.unwrap(), vec!["temp"]);
        assert!(vault.is_expiry_scheduled("temp").await);

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(vault.list_key_names().await.unwrap().is_empty());
        assert!(vault.fetch_key("temp").await.unwrap_err().is_not_found());
        assert_eq!(vault.pending_expiries().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_cancels_expiry_and_spares_recreated_key() {
        let vault = vault();
        vault
            .create_key(CreateKeyOptions::new("k").ttl(Duration::from_secs(10)))
            .await
            .unwrap();
        vault.delete_key("k").await.unwrap();
        assert_eq!(vault.pending_expiries().await, 0);

        // Reuse the name without a TTL before the old deadline.
        let recreated = vault.create_key(CreateKeyOptions::new("k")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(vault.fetch_key("k").await.unwrap(), recreated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_replaces_previous_expiry() {
        let vault = vault();
        vault
            .create_key(CreateKeyOptions::new("k").ttl(Duration::from_secs(10)))
            .await
            .unwrap();
        vault
            .create_key(CreateKeyOptions::new("k").ttl(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(vault.pending_expiries().await, 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(vault.fetch_key("k").await.is_ok());

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert!(vault.fetch_key("k").await.unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_with_zero_ttl_clears_expiry() {
        let vault = vault();
        vault
            .create_key(CreateKeyOptions::new("k").ttl(Duration::from_secs(10)))
            .await
            .unwrap();
        vault
            .create_key(CreateKeyOptions::new("k").ttl(Duration::ZERO))
            .await
            .unwrap();
        assert!(!vault.is_expiry_scheduled("k").await);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(vault.fetch_key("k").await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_purges_entry_past_recorded_deadline() {
        let store = MemoryStore::new();
        let wrapping = WrappingKey::generate();

        // An entry written by an earlier process whose timer never ran.
        let writer = sharing(&store, &wrapping);
        writer
            .create_key(CreateKeyOptions::new("stale").ttl(Duration::from_millis(1)))
            .await
            .unwrap();
        drop(writer);
        std::thread::sleep(Duration::from_millis(5));

        let reader = sharing(&store, &wrapping);
        assert!(reader.fetch_key("stale").await.unwrap_err().is_not_found());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_restore_expiries_reschedules_and_purges() {
        let store = MemoryStore::new();
        let wrapping = WrappingKey::generate();
        let writer = sharing(&store, &wrapping);
        writer
            .create_key(CreateKeyOptions::new("past").ttl(Duration::from_millis(1)))
            .await
            .unwrap();
        writer
            .create_key(CreateKeyOptions::new("future").ttl(Duration::from_secs(3600)))
            .await
            .unwrap();
        writer
            .create_key(CreateKeyOptions::new("forever"))
            .await
            .unwrap();
        drop(writer);
        store.set("junk", b"not an entry".to_vec()).await.unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let reader = sharing(&store, &wrapping);
        let report = reader.restore_expiries().await.unwrap();

        assert_eq!(
            report,
            RestoreReport {
                scheduled: 1,
                purged: 1
            }
        );
        assert!(reader.is_expiry_scheduled("future").await);
        assert!(!reader.is_expiry_scheduled("forever").await);

        let mut names = reader.list_key_names().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["forever", "future", "junk"]);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_reported() {
        let vault = vault();
        vault.store().set("bad", b"{".to_vec()).await.unwrap();
        let err = vault.fetch_key("bad").await.unwrap_err();
        assert!(matches!(err, VaultError::CorruptEntry { name, .. } if name == "bad"));
    }

    #[tokio::test]
    async fn test_stored_payload_never_holds_private_scalar() {
        let vault = vault();
        let material = vault
            .create_key(CreateKeyOptions::new("session-key"))
            .await
            .unwrap();
        let scalar = material.as_pair().unwrap().private_key.material().to_vec();

        let payload = vault.store().get("session-key").await.unwrap().unwrap();
        assert!(!payload.windows(scalar.len()).any(|w| w == scalar.as_slice()));
        let scalar_json = serde_json::to_string(&scalar).unwrap();
        let scalar_json = scalar_json.trim_start_matches('[').trim_end_matches(']');
        assert!(!payload
            .windows(scalar_json.len())
            .any(|w| w == scalar_json.as_bytes()));
    }

    #[tokio::test]
    async fn test_entry_is_unreadable_under_another_wrapping_key() {
        let store = MemoryStore::new();
        let writer = sharing(&store, &WrappingKey::generate());
        writer.create_key(CreateKeyOptions::new("k")).await.unwrap();

        let reader = sharing(&store, &WrappingKey::generate());
        let err = reader.fetch_key("k").await.unwrap_err();
        assert!(matches!(
            err,
            VaultError::CorruptEntry {
                source: EntryError::Sealing(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_entry_copied_to_another_name_does_not_open() {
        let vault = vault();
        vault.create_key(CreateKeyOptions::new("a")).await.unwrap();
        let payload = vault.store().get("a").await.unwrap().unwrap();
        vault.store().set("b", payload).await.unwrap();

        assert!(matches!(
            vault.fetch_key("b").await,
            Err(VaultError::CorruptEntry { .. })
        ));
        assert!(vault.fetch_key("a").await.is_ok());
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_rejected_before_generation() {
        let vault = vault();
        let err = vault
            .create_key(CreateKeyOptions::new("k").ttl(Duration::MAX))
            .await
            .unwrap_err();

        assert!(matches!(err, VaultError::InvalidArgument(_)));
        assert_eq!(vault.generator.calls(), 0);
        assert!(vault.store().is_empty());
        assert_eq!(vault.pending_expiries().await, 0);
    }

    #[tokio::test]
    async fn test_vaults_keep_separate_expiry_bookkeeping() {
        let store = MemoryStore::new();
        let wrapping = WrappingKey::generate();
        let a = sharing(&store, &wrapping);
        let b = sharing(&store, &wrapping);

        a.create_key(CreateKeyOptions::new("k").ttl(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(a.pending_expiries().await, 1);
        assert_eq!(b.pending_expiries().await, 0);
    }
}
