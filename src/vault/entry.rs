// Keyvault — Persisted vault entries
//
// The store only sees opaque bytes. The vault wraps key material in an
// envelope that also records when it was stored and, for keys created with
// a TTL, when it expires, so expiry survives a restart of the process.
// Private and secret key bytes are sealed with the vault's wrapping key and
// bound to the entry name; only public keys are written in the clear.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use crate::enclave::{
    Algorithm, CryptoKey, CryptoKeyPair, EnclaveError, KeyMaterial, KeyType, KeyUsage, WrappingKey,
};

#[derive(Debug, Error)]
pub enum EntryError {
    #[error("malformed record: {0}")]
    Format(#[from] serde_json::Error),

    #[error("key material cannot be unsealed: {0}")]
    Sealing(#[from] EnclaveError),
}

/// One vault record as held in the durable store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub material: KeyMaterial,
    pub stored_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredEntry {
    /// Wrap freshly generated material. A zero or absent `ttl` means the
    /// entry never expires. Returns `None` when the deadline `ttl` from now
    /// cannot be represented.
    pub fn new(material: KeyMaterial, ttl: Option<Duration>) -> Option<Self> {
        let stored_at = Utc::now();
        let expires_at = match ttl.filter(|ttl| !ttl.is_zero()) {
            Some(ttl) => Some(deadline_after(stored_at, ttl)?),
            None => None,
        };

        Some(Self {
            material,
            stored_at,
            expires_at,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.expires_at, now)
    }

    /// Time left before expiry: `None` for entries without a TTL,
    /// `Some(Duration::ZERO)` once the deadline has passed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        remaining(self.expires_at, now)
    }

    pub(crate) fn encode(&self, name: &str, wrapping: &WrappingKey) -> Result<Vec<u8>, EntryError> {
        let record = Record {
            material: RecordMaterial::seal(&self.material, name, wrapping)?,
            stored_at: self.stored_at,
            expires_at: self.expires_at,
        };
        Ok(serde_json::to_vec(&record)?)
    }

    pub(crate) fn decode(
        name: &str,
        bytes: &[u8],
        wrapping: &WrappingKey,
    ) -> Result<Self, EntryError> {
        let record: Record = serde_json::from_slice(bytes)?;
        Ok(Self {
            material: record.material.unseal(name, wrapping)?,
            stored_at: record.stored_at,
            expires_at: record.expires_at,
        })
    }
}

/// The timestamps of a stored record, read without unsealing any key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub(crate) struct EntryHeader {
    pub stored_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl EntryHeader {
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, EntryError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub(crate) fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.expires_at, now)
    }

    pub(crate) fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        remaining(self.expires_at, now)
    }
}

/// The instant `ttl` after `from`, or `None` if it is out of range.
pub(crate) fn deadline_after(from: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| from.checked_add_signed(ttl))
}

fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_some_and(|expires_at| expires_at <= now)
}

fn remaining(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<Duration> {
    expires_at.map(|expires_at| (expires_at - now).to_std().unwrap_or(Duration::ZERO))
}

// ─── Wire records ────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct Record {
    material: RecordMaterial,
    stored_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum RecordMaterial {
    Pair {
        public_key: RecordKey,
        private_key: RecordKey,
    },
    Secret {
        key: RecordKey,
    },
}

#[derive(Serialize, Deserialize)]
struct RecordKey {
    key_type: KeyType,
    algorithm: Algorithm,
    extractable: bool,
    usages: Vec<KeyUsage>,
    bytes: RecordBytes,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RecordBytes {
    Plain(Vec<u8>),
    Sealed { nonce: Vec<u8>, ciphertext: Vec<u8> },
}

impl Drop for RecordKey {
    fn drop(&mut self) {
        if let RecordBytes::Plain(bytes) = &mut self.bytes {
            bytes.zeroize();
        }
    }
}

/// Associated data binding sealed bytes to one entry and key half.
fn aad(name: &str, key_type: KeyType) -> Vec<u8> {
    let half: &[u8] = match key_type {
        KeyType::Public => b"public",
        KeyType::Private => b"private",
        KeyType::Secret => b"secret",
    };
    [name.as_bytes(), b"\0", half].concat()
}

impl RecordKey {
    fn seal(key: &CryptoKey, name: &str, wrapping: &WrappingKey) -> Result<Self, EnclaveError> {
        let bytes = match key.key_type() {
            KeyType::Public => RecordBytes::Plain(key.material().to_vec()),
            key_type => {
                let (nonce, ciphertext) = wrapping.seal(key.material(), &aad(name, key_type))?;
                RecordBytes::Sealed { nonce, ciphertext }
            }
        };

        Ok(Self {
            key_type: key.key_type(),
            algorithm: key.algorithm(),
            extractable: key.is_extractable(),
            usages: key.usages().to_vec(),
            bytes,
        })
    }

    fn unseal(mut self, name: &str, wrapping: &WrappingKey) -> Result<CryptoKey, EnclaveError> {
        let material = match &mut self.bytes {
            RecordBytes::Plain(bytes) if self.key_type == KeyType::Public => {
                Zeroizing::new(std::mem::take(bytes))
            }
            RecordBytes::Plain(_) => {
                return Err(EnclaveError::Wrapping(
                    "private or secret key stored without sealing".to_string(),
                ))
            }
            RecordBytes::Sealed { nonce, ciphertext } => {
                wrapping.open(nonce, ciphertext, &aad(name, self.key_type))?
            }
        };

        Ok(CryptoKey::new(
            self.key_type,
            self.algorithm,
            self.extractable,
            std::mem::take(&mut self.usages),
            material,
        ))
    }
}

impl RecordMaterial {
    fn seal(material: &KeyMaterial, name: &str, wrapping: &WrappingKey) -> Result<Self, EnclaveError> {
        Ok(match material {
            KeyMaterial::Pair(pair) => Self::Pair {
                public_key: RecordKey::seal(&pair.public_key, name, wrapping)?,
                private_key: RecordKey::seal(&pair.private_key, name, wrapping)?,
            },
            KeyMaterial::Secret(key) => Self::Secret {
                key: RecordKey::seal(key, name, wrapping)?,
            },
        })
    }

    fn unseal(self, name: &str, wrapping: &WrappingKey) -> Result<KeyMaterial, EnclaveError> {
        Ok(match self {
            Self::Pair {
                public_key,
                private_key,
            } => KeyMaterial::Pair(CryptoKeyPair {
                public_key: public_key.unseal(name, wrapping)?,
                private_key: private_key.unseal(name, wrapping)?,
            }),
            Self::Secret { key } => KeyMaterial::Secret(key.unseal(name, wrapping)?),
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
