// Keyvault — Configuration
//
// Where the vault keeps its container files, which (container, collection)
// it is scoped to, and where its master secret comes from. Values come from
// defaults, then the environment, then explicit overrides (the CLI flags).

use std::path::PathBuf;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::store::{StoreError, StoreLocation, DEFAULT_BUSY_TIMEOUT};

pub const DEFAULT_CONTAINER: &str = "oidc";
pub const DEFAULT_COLLECTION: &str = "dpop";

pub const ENV_DATA_DIR: &str = "KEYVAULT_DATA_DIR";
pub const ENV_CONTAINER: &str = "KEYVAULT_CONTAINER";
pub const ENV_COLLECTION: &str = "KEYVAULT_COLLECTION";
pub const ENV_MASTER_SECRET: &str = "KEYVAULT_MASTER_SECRET";

const APP_DIR: &str = "keyvault";

/// Where the master secret that seals stored keys comes from.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum MasterSecret {
    /// One secret per container in the platform keyring, created on first use.
    #[default]
    Keyring,
    Provided(Zeroizing<Vec<u8>>),
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Keyring => f.write_str("Keyring"),
            Self::Provided(_) => f.write_str("Provided([REDACTED])"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    pub data_dir: PathBuf,
    pub container: String,
    pub collection: String,
    pub busy_timeout: Duration,
    pub master_secret: MasterSecret,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            container: DEFAULT_CONTAINER.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            master_secret: MasterSecret::default(),
        }
    }
}

impl VaultConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source. Empty values are
    /// treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(dir) = var(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(container) = var(ENV_CONTAINER) {
            config.container = container;
        }
        if let Some(collection) = var(ENV_COLLECTION) {
            config.collection = collection;
        }
        if let Some(secret) = var(ENV_MASTER_SECRET) {
            config.master_secret = MasterSecret::Provided(Zeroizing::new(secret.into_bytes()));
        }
        config
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_scope(mut self, container: impl Into<String>, collection: impl Into<String>) -> Self {
        self.container = container.into();
        self.collection = collection.into();
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// Seal stored keys with a key derived from `secret` instead of the
    /// keyring's secret.
    pub fn with_master_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.master_secret = MasterSecret::Provided(Zeroizing::new(secret.into()));
        self
    }

    /// Validate the scope and resolve it to a store location.
    pub fn location(&self) -> Result<StoreLocation, StoreError> {
        Ok(
            StoreLocation::new(&self.data_dir, &self.container, &self.collection)?
                .with_busy_timeout(self.busy_timeout),
        )
    }
}

fn default_data_dir() -> PathBuf {
    dirs_next::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}
