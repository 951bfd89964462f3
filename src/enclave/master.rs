// Keyvault — Master Key Provider
//
// Private and secret key bytes are sealed before they reach the store. The
// sealing key is derived from a master secret that lives outside the store:
// in the platform keyring by default, or supplied by the caller.
//
// Flow:
//   1. `get_or_create_master_secret()` retrieves the secret, or generates and
//      stores a new one on first use
//   2. `WrappingKey::derive()` runs Argon2id over it with a salt bound to the
//      container name
//   3. The wrapping key seals each private/secret key with AES-256-GCM, using
//      the entry name as associated data

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Argon2, Params, Version};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::EnclaveError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Service name under which master secrets are kept in the platform keyring.
const KEYRING_SERVICE: &str = "keyvault";

/// Length of a generated master secret in bytes (256-bit entropy).
const MASTER_SECRET_LEN: usize = 32;

/// Length of the derived wrapping key (AES-256).
const WRAPPING_KEY_LEN: usize = 32;

/// AES-GCM nonce length.
pub(crate) const NONCE_LEN: usize = 12;

// Argon2id: m=65536 (64 MiB), t=3, p=4.
const ARGON2_M_COST: u32 = 65536;
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 4;

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Source of the master secret a vault's wrapping key is derived from.
pub trait MasterKeyProvider: Send + Sync {
    /// Retrieve the master secret, generating and storing one on first use.
    fn get_or_create_master_secret(&self) -> Result<Zeroizing<Vec<u8>>, EnclaveError>;
}

// ─── Platform keyring ────────────────────────────────────────────────────────

/// Keeps one master secret per container in the platform keyring:
///   - Linux: D-Bus Secret Service
///   - macOS: Keychain
///   - Windows: Credential Manager
pub struct KeyringProvider {
    service: String,
    user: String,
}

impl KeyringProvider {
    pub fn for_container(container: &str) -> Self {
        Self::with_names(KEYRING_SERVICE, container)
    }

    pub fn with_names(service: &str, user: &str) -> Self {
        Self {
            service: service.to_string(),
            user: user.to_string(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, EnclaveError> {
        keyring::Entry::new(&self.service, &self.user)
            .map_err(|e| EnclaveError::Keyring(format!("failed to open keyring entry: {e}")))
    }
}

impl MasterKeyProvider for KeyringProvider {
    fn get_or_create_master_secret(&self) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
        let entry = self.entry()?;

        match entry.get_secret() {
            Ok(secret) => {
                tracing::debug!(user = %self.user, "Retrieved master secret from keyring");
                Ok(Zeroizing::new(secret))
            }
            Err(keyring::Error::NoEntry) => {
                tracing::info!(user = %self.user, "No master secret found, generating one");
                let secret = random_secret();
                entry.set_secret(&secret).map_err(|e| {
                    EnclaveError::Keyring(format!("failed to store master secret: {e}"))
                })?;
                Ok(secret)
            }
            Err(e) => Err(EnclaveError::Keyring(format!(
                "failed to retrieve master secret: {e}"
            ))),
        }
    }
}

// ─── Caller-supplied secret ──────────────────────────────────────────────────

/// A master secret handed in by the caller (e.g. from `KEYVAULT_MASTER_SECRET`).
pub struct StaticSecretProvider {
    secret: Zeroizing<Vec<u8>>,
}

impl StaticSecretProvider {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
        }
    }
}

impl MasterKeyProvider for StaticSecretProvider {
    fn get_or_create_master_secret(&self) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
        if self.secret.is_empty() {
            return Err(EnclaveError::InvalidParameters(
                "master secret must not be empty".to_string(),
            ));
        }
        Ok(self.secret.clone())
    }
}

fn random_secret() -> Zeroizing<Vec<u8>> {
    let mut secret = Zeroizing::new(vec![0u8; MASTER_SECRET_LEN]);
    rand::rng().fill_bytes(&mut secret);
    secret
}

// ─── Wrapping key ────────────────────────────────────────────────────────────

/// The AES-256-GCM key that seals key bytes at rest.
#[derive(Clone)]
pub struct WrappingKey {
    key: Zeroizing<[u8; WRAPPING_KEY_LEN]>,
}

/// Custom Debug implementation that NEVER reveals key bytes.
impl std::fmt::Debug for WrappingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WrappingKey([REDACTED])")
    }
}

impl WrappingKey {
    /// Derive the wrapping key for `container` from a master secret.
    /// The same secret and container always yield the same key.
    pub fn derive(master_secret: &[u8], container: &str) -> Result<Self, EnclaveError> {
        let params = Params::new(
            ARGON2_M_COST,
            ARGON2_T_COST,
            ARGON2_P_COST,
            Some(WRAPPING_KEY_LEN),
        )
        .map_err(|e| EnclaveError::Derivation(format!("invalid Argon2 params: {e}")))?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; WRAPPING_KEY_LEN]);
        argon2
            .hash_password_into(master_secret, &salt(container), &mut key[..])
            .map_err(|e| EnclaveError::Derivation(format!("Argon2id hash failed: {e}")))?;

        Ok(Self { key })
    }

    /// Resolve the master secret from `provider` and derive from it.
    pub fn from_provider(
        provider: &dyn MasterKeyProvider,
        container: &str,
    ) -> Result<Self, EnclaveError> {
        let secret = provider.get_or_create_master_secret()?;
        Self::derive(&secret, container)
    }

    /// A fresh random key, for vaults whose contents need not outlive the
    /// process.
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; WRAPPING_KEY_LEN]);
        rand::rng().fill_bytes(&mut key[..]);
        Self { key }
    }

    fn cipher(&self) -> Result<Aes256Gcm, EnclaveError> {
        Aes256Gcm::new_from_slice(&self.key[..])
            .map_err(|e| EnclaveError::Engine(format!("invalid wrapping key: {e}")))
    }

    /// Seal `plaintext`, binding it to `aad`. Returns (nonce, ciphertext).
    pub(crate) fn seal(
        &self,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), EnclaveError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher()?
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| EnclaveError::Wrapping("sealing failed".to_string()))?;

        Ok((nonce.to_vec(), ciphertext))
    }

    /// Open a sealed blob. Fails on a wrong key, tampered data or mismatched `aad`.
    pub(crate) fn open(
        &self,
        nonce: &[u8],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
        if nonce.len() != NONCE_LEN {
            return Err(EnclaveError::Wrapping(format!(
                "nonce must be {NONCE_LEN} bytes, got {}",
                nonce.len()
            )));
        }

        self.cipher()?
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| EnclaveError::Wrapping("authentication failed".to_string()))
    }
}

/// Salt = SHA-256("keyvault::" || container).
fn salt(container: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(KEYRING_SERVICE.as_bytes());
    hasher.update(b"::");
    hasher.update(container.as_bytes());
    hasher.finalize().to_vec()
}

// ─── In-Memory Mock for Testing ──────────────────────────────────────────────


// ─── Tests ───────────────────────────────────────────────────────────────────
