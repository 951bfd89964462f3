// Keyvault — Key material models
//
// SECURITY: raw key bytes are private to `CryptoKey`, held in zeroizing
// memory, and never included in Debug output. The only public way to reach
// them is `export_raw()`, which refuses non-extractable keys.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::EnclaveError;

/// What a key may be used for. Serialized with WebCrypto names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyUsage {
    Encrypt,
    Decrypt,
    Sign,
    Verify,
    DeriveKey,
    DeriveBits,
    WrapKey,
    UnwrapKey,
}

impl KeyUsage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
            Self::Sign => "sign",
            Self::Verify => "verify",
            Self::DeriveKey => "deriveKey",
            Self::DeriveBits => "deriveBits",
            Self::WrapKey => "wrapKey",
            Self::UnwrapKey => "unwrapKey",
        }
    }
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamedCurve {
    #[serde(rename = "P-256")]
    P256,
}

impl NamedCurve {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P256 => "P-256",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-384")]
    Sha384,
    #[serde(rename = "SHA-512")]
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }

    /// Block size in bits; the default HMAC key length for this hash.
    pub fn block_bits(&self) -> u32 {
        match self {
            Self::Sha256 => 512,
            Self::Sha384 | Self::Sha512 => 1024,
        }
    }
}

/// Key generation algorithm and its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum Algorithm {
    #[serde(rename = "ECDSA")]
    Ecdsa {
        #[serde(rename = "namedCurve")]
        named_curve: NamedCurve,
    },
    #[serde(rename = "ECDH")]
    Ecdh {
        #[serde(rename = "namedCurve")]
        named_curve: NamedCurve,
    },
    #[serde(rename = "HMAC")]
    Hmac {
        hash: HashAlgorithm,
        /// Key length in bits. Defaults to the hash block size.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        length: Option<u32>,
    },
    #[serde(rename = "AES-GCM")]
    AesGcm { length: u16 },
    #[serde(rename = "AES-CBC")]
    AesCbc { length: u16 },
    #[serde(rename = "AES-CTR")]
    AesCtr { length: u16 },
    #[serde(rename = "AES-KW")]
    AesKw { length: u16 },
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ecdsa { .. } => "ECDSA",
            Self::Ecdh { .. } => "ECDH",
            Self::Hmac { .. } => "HMAC",
            Self::AesGcm { .. } => "AES-GCM",
            Self::AesCbc { .. } => "AES-CBC",
            Self::AesCtr { .. } => "AES-CTR",
            Self::AesKw { .. } => "AES-KW",
        }
    }

    /// Whether generation yields a public/private pair rather than one secret key.
    pub fn is_asymmetric(&self) -> bool {
        matches!(self, Self::Ecdsa { .. } | Self::Ecdh { .. })
    }

    /// Every usage a key of this algorithm may carry.
    pub fn allowed_usages(&self) -> &'static [KeyUsage] {
        use KeyUsage::*;
        match self {
            Self::Ecdsa { .. } | Self::Hmac { .. } => &[Sign, Verify],
            Self::Ecdh { .. } => &[DeriveKey, DeriveBits],
            Self::AesGcm { .. } | Self::AesCbc { .. } | Self::AesCtr { .. } => {
                &[Encrypt, Decrypt, WrapKey, UnwrapKey]
            }
            Self::AesKw { .. } => &[WrapKey, UnwrapKey],
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ecdsa { named_curve } | Self::Ecdh { named_curve } => {
                write!(f, "{} ({})", self.name(), named_curve.as_str())
            }
            Self::Hmac { hash, length } => match length {
                Some(bits) => write!(f, "HMAC ({}, {} bits)", hash.as_str(), bits),
                None => write!(f, "HMAC ({})", hash.as_str()),
            },
            Self::AesGcm { length }
            | Self::AesCbc { length }
            | Self::AesCtr { length }
            | Self::AesKw { length } => write!(f, "{} ({} bits)", self.name(), length),
        }
    }
}

/// Parameters handed to the key generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyGenParams {
    pub algorithm: Algorithm,
    pub extractable: bool,
    pub usages: Vec<KeyUsage>,
}

impl KeyGenParams {
    pub fn new(algorithm: Algorithm, extractable: bool, usages: Vec<KeyUsage>) -> Self {
        Self {
            algorithm,
            extractable,
            usages,
        }
    }
}

/// ECDSA on P-256, non-extractable, usable for sign and verify.
impl Default for KeyGenParams {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Ecdsa {
                named_curve: NamedCurve::P256,
            },
            extractable: false,
            usages: vec![KeyUsage::Sign, KeyUsage::Verify],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Public,
    Private,
    Secret,
}

/// A single generated key.
#[derive(Clone, PartialEq, Eq)]
pub struct CryptoKey {
    key_type: KeyType,
    algorithm: Algorithm,
    extractable: bool,
    usages: Vec<KeyUsage>,
    /// Raw key bytes: P-256 scalar, SEC1 point, or symmetric secret.
    /// NEVER printed or logged.
    material: Zeroizing<Vec<u8>>,
}

impl CryptoKey {
    pub(crate) fn new(
        key_type: KeyType,
        algorithm: Algorithm,
        extractable: bool,
        usages: Vec<KeyUsage>,
        material: Zeroizing<Vec<u8>>,
    ) -> Self {
        Self {
            key_type,
            algorithm,
            extractable,
            usages,
            material,
        }
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn is_extractable(&self) -> bool {
        self.extractable
    }

    pub fn usages(&self) -> &[KeyUsage] {
        &self.usages
    }

    pub fn has_usage(&self, usage: KeyUsage) -> bool {
        self.usages.contains(&usage)
    }

    /// Export the raw key bytes. Fails for non-extractable keys.
    pub fn export_raw(&self) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
        if !self.extractable {
            return Err(EnclaveError::NotExtractable);
        }
        Ok(self.material.clone())
    }

    /// Raw bytes for persistence and in-crate key operations only.
    pub(crate) fn material(&self) -> &[u8] {
        &self.material
    }

    pub(crate) fn require_usage(&self, usage: KeyUsage) -> Result<(), EnclaveError> {
        if self.has_usage(usage) {
            Ok(())
        } else {
            Err(EnclaveError::UsageNotPermitted(usage))
        }
    }
}

/// Custom Debug implementation that NEVER reveals key bytes.
impl fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoKey")
            .field("key_type", &self.key_type)
            .field("algorithm", &self.algorithm)
            .field("extractable", &self.extractable)
            .field("usages", &self.usages)
            .field("material", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoKeyPair {
    pub public_key: CryptoKey,
    pub private_key: CryptoKey,
}

/// What the generator returns and the vault stores: a key pair for
/// asymmetric algorithms, a single secret key otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    Pair(CryptoKeyPair),
    Secret(CryptoKey),
}

impl KeyMaterial {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::Pair(pair) => pair.private_key.algorithm(),
            Self::Secret(key) => key.algorithm(),
        }
    }

    pub fn as_pair(&self) -> Option<&CryptoKeyPair> {
        match self {
            Self::Pair(pair) => Some(pair),
            Self::Secret(_) => None,
        }
    }

    pub fn as_secret(&self) -> Option<&CryptoKey> {
        match self {
            Self::Pair(_) => None,
            Self::Secret(key) => Some(key),
        }
    }

    pub fn into_pair(self) -> Option<CryptoKeyPair> {
        match self {
            Self::Pair(pair) => Some(pair),
            Self::Secret(_) => None,
        }
    }
}

impl fmt::Display for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pair(pair) => write!(
                f,
                "{} key pair (private: {}, usages: [{}])",
                pair.private_key.algorithm(),
                if pair.private_key.is_extractable() {
                    "extractable"
                } else {
                    "non-extractable"
                },
                join_usages(pair.private_key.usages().iter().chain(pair.public_key.usages()))
            ),
            Self::Secret(key) => write!(
                f,
                "{} secret key ({}, usages: [{}])",
                key.algorithm(),
                if key.is_extractable() {
                    "extractable"
                } else {
                    "non-extractable"
                },
                join_usages(key.usages().iter())
            ),
        }
    }
}

fn join_usages<'a>(usages: impl Iterator<Item = &'a KeyUsage>) -> String {
    usages.map(KeyUsage::as_str).collect::<Vec<_>>().join(", ")
}

// ─── Tests ───────────────────────────────────────────────────────────────────
