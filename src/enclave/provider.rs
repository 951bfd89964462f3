// Keyvault — Key Generation Provider
//
// Produces key material for the vault. The generator is a trait so the
// vault can be driven by a double in tests; the software implementation
// uses `p256` for elliptic-curve keys and the OS-seeded thread RNG for
// symmetric secrets.
//
// Usage rules mirror WebCrypto `generateKey`:
//   - requested usages must belong to the algorithm's allowed set
//   - for pairs, the private key takes sign/deriveKey/deriveBits and must end
//     up with at least one usage; the public key takes verify (ECDSA) or
//     nothing (ECDH) and is always extractable
//   - secret keys need at least one usage

use std::future::Future;

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;
use zeroize::Zeroizing;

use super::models::{
    Algorithm, CryptoKey, CryptoKeyPair, KeyGenParams, KeyMaterial, KeyType, KeyUsage, NamedCurve,
};
use super::EnclaveError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Length of a P-256 private scalar in bytes.
const P256_SCALAR_LEN: usize = 32;

/// Attempts at drawing a scalar in range before giving up. A 32-byte draw
/// falls outside [1, n) with probability below 2^-32.
const MAX_SCALAR_ATTEMPTS: usize = 8;

/// Largest HMAC key accepted, in bits. Longer keys are hashed down by HMAC
/// anyway, so this only bounds allocation.
const MAX_HMAC_KEY_BITS: u32 = 8192;

/// Usages carried by the private half of a pair.
const PRIVATE_USAGES: &[KeyUsage] = &[KeyUsage::Sign, KeyUsage::DeriveKey, KeyUsage::DeriveBits];

/// Usages carried by the public half of a pair.
const PUBLIC_USAGES: &[KeyUsage] = &[KeyUsage::Verify];

// ─── Trait ───────────────────────────────────────────────────────────────────

/// The cryptographic collaborator the vault generates keys with.
pub trait KeyGenerator: Send + Sync + 'static {
    fn generate_key_material(
        &self,
        params: &KeyGenParams,
    ) -> impl Future<Output = Result<KeyMaterial, EnclaveError>> + Send;
}

// ─── Software Implementation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareKeyGenerator;

impl SoftwareKeyGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Generate key material synchronously.
    pub fn generate(&self, params: &KeyGenParams) -> Result<KeyMaterial, EnclaveError> {
        let usages = normalize_usages(params)?;

        match params.algorithm {
            Algorithm::Ecdsa { named_curve } | Algorithm::Ecdh { named_curve } => {
                let private_usages = retain(&usages, PRIVATE_USAGES);
                if private_usages.is_empty() {
                    return Err(EnclaveError::InvalidUsages {
                        algorithm: params.algorithm.name(),
                        reason: "private key would have no usages".to_string(),
                    });
                }
                let public_usages = retain(&usages, PUBLIC_USAGES);

                let (scalar, point) = generate_ec_key(named_curve)?;
                Ok(KeyMaterial::Pair(CryptoKeyPair {
                    public_key: CryptoKey::new(
                        KeyType::Public,
                        params.algorithm,
                        true,
                        public_usages,
                        Zeroizing::new(point),
                    ),
                    private_key: CryptoKey::new(
                        KeyType::Private,
                        params.algorithm,
                        params.extractable,
                        private_usages,
                        scalar,
                    ),
                }))
            }
            Algorithm::Hmac { hash, length } => {
                let bits = length.unwrap_or_else(|| hash.block_bits());
                if bits == 0 || bits % 8 != 0 {
                    return Err(EnclaveError::InvalidParameters(format!(
                        "HMAC key length must be a positive multiple of 8 bits, got {bits}"
                    )));
                }
                if bits > MAX_HMAC_KEY_BITS {
                    return Err(EnclaveError::InvalidParameters(format!(
                        "HMAC key length must not exceed {MAX_HMAC_KEY_BITS} bits, got {bits}"
                    )));
                }
                let material = random_bytes((bits / 8) as usize);
                Ok(KeyMaterial::Secret(CryptoKey::new(
                    KeyType::Secret,
                    Algorithm::Hmac {
                        hash,
                        length: Some(bits),
                    },
                    params.extractable,
                    usages,
                    material,
                )))
            }
            Algorithm::AesGcm { length }
            | Algorithm::AesCbc { length }
            | Algorithm::AesCtr { length }
            | Algorithm::AesKw { length } => {
                if !matches!(length, 128 | 192 | 256) {
                    return Err(EnclaveError::InvalidParameters(format!(
                        "AES key length must be 128, 192 or 256 bits, got {length}"
                    )));
                }
                let material = random_bytes(usize::from(length / 8));
                Ok(KeyMaterial::Secret(CryptoKey::new(
                    KeyType::Secret,
                    params.algorithm,
                    params.extractable,
                    usages,
                    material,
                )))
            }
        }
    }
}

impl KeyGenerator for SoftwareKeyGenerator {
    async fn generate_key_material(&self, params: &KeyGenParams) -> Result<KeyMaterial, EnclaveError> {
        let material = self.generate(params)?;
        tracing::debug!(algorithm = %params.algorithm, "Key material generated");
        Ok(material)
    }
}

/// Validate requested usages against the algorithm and return them sorted
/// and de-duplicated.
fn normalize_usages(params: &KeyGenParams) -> Result<Vec<KeyUsage>, EnclaveError> {
    let allowed = params.algorithm.allowed_usages();

    if let Some(bad) = params.usages.iter().find(|u| !allowed.contains(u)) {
        return Err(EnclaveError::InvalidUsages {
            algorithm: params.algorithm.name(),
            reason: format!("'{bad}' is not allowed"),
        });
    }
    if params.usages.is_empty() {
        return Err(EnclaveError::InvalidUsages {
            algorithm: params.algorithm.name(),
            reason: "at least one usage is required".to_string(),
        });
    }

    let mut usages = params.usages.clone();
    usages.sort();
    usages.dedup();
    Ok(usages)
}

fn retain(usages: &[KeyUsage], subset: &[KeyUsage]) -> Vec<KeyUsage> {
    usages
        .iter()
        .copied()
        .filter(|u| subset.contains(u))
        .collect()
}

fn random_bytes(len: usize) -> Zeroizing<Vec<u8>> {
    let mut bytes = Zeroizing::new(vec![0u8; len]);
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

/// Draw a private scalar and derive its uncompressed SEC1 public point.
fn generate_ec_key(curve: NamedCurve) -> Result<(Zeroizing<Vec<u8>>, Vec<u8>), EnclaveError> {
    match curve {
        NamedCurve::P256 => {
            for _ in 0..MAX_SCALAR_ATTEMPTS {
                let candidate = random_bytes(P256_SCALAR_LEN);
                if let Ok(secret) = p256::SecretKey::from_slice(&candidate) {
                    let point = secret.public_key().to_encoded_point(false);
                    return Ok((candidate, point.as_bytes().to_vec()));
                }
            }
            Err(EnclaveError::Engine(
                "failed to draw a valid P-256 scalar".to_string(),
            ))
        }
    }
}

// ─── Key operations ──────────────────────────────────────────────────────────

impl CryptoKey {
    /// Sign `data` with a private ECDSA key. Returns the 64-byte `r || s`
    /// signature.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, EnclaveError> {
        self.require_usage(KeyUsage::Sign)?;
        match self.algorithm() {
            Algorithm::Ecdsa {
                named_curve: NamedCurve::P256,
            } => {
                let signing_key = SigningKey::from_slice(self.material())
                    .map_err(|e| EnclaveError::Engine(format!("invalid P-256 private key: {e}")))?;
                let signature: Signature = signing_key.sign(data);
                Ok(signature.to_bytes().to_vec())
            }
            other => Err(EnclaveError::UnsupportedOperation(format!(
                "sign with {}",
                other.name()
            ))),
        }
    }

    /// Verify an `r || s` signature with a public ECDSA key. A malformed
    /// signature verifies as `false`.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool, EnclaveError> {
        self.require_usage(KeyUsage::Verify)?;
        match self.algorithm() {
            Algorithm::Ecdsa {
                named_curve: NamedCurve::P256,
            } => {
                let verifying_key = VerifyingKey::from_sec1_bytes(self.material())
                    .map_err(|e| EnclaveError::Engine(format!("invalid P-256 public key: {e}")))?;
                let Ok(signature) = Signature::from_slice(signature) else {
                    return Ok(false);
                };
                Ok(verifying_key.verify(data, &signature).is_ok())
            }
            other => Err(EnclaveError::UnsupportedOperation(format!(
                "verify with {}",
                other.name()
            ))),
        }
    }
}

impl CryptoKeyPair {
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, EnclaveError> {
        self.private_key.sign(data)
    }

    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool, EnclaveError> {
        self.public_key.verify(data, signature)
    }
}

// ─── Test Double ─────────────────────────────────────────────────────────────


// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enclave::models::HashAlgorithm;

    fn generator() -> SoftwareKeyGenerator {
        SoftwareKeyGenerator::new()
    }

    #[test]
    fn test_default_params_produce_p256_signing_pair() {
        let material = generator().generate(&KeyGenParams::default()).unwrap();
        let pair = material.as_pair().expect("ECDSA must yield a key pair");

        assert_eq!(pair.private_key.key_type(), KeyType::Private);
        assert_eq!(pair.public_key.key_type(), KeyType::Public);
        assert!(!pair.private_key.is_extractable());
        assert!(pair.public_key.is_extractable(), "public keys are always extractable");
        assert_eq!(pair.private_key.usages(), &[KeyUsage::Sign]);
        assert_eq!(pair.public_key.usages(), &[KeyUsage::Verify]);
        assert_eq!(
            pair.private_key.algorithm(),
            Algorithm::Ecdsa {
                named_curve: NamedCurve::P256
            }
        );
    }

    #[test]
    fn test_public_point_is_uncompressed_sec1() {
        let material = generator().generate(&KeyGenParams::default()).unwrap();
        let public = material.as_pair().unwrap().public_key.export_raw().unwrap();
        assert_eq!(public.len(), 65);
        assert_eq!(public[0], 0x04);
    }

    #[test]
    fn test_two_generations_differ() {
        let a = generator().generate(&KeyGenParams::default()).unwrap();
        let b = generator().generate(&KeyGenParams::default()).unwrap();
        assert_ne!(a, b, "independent generations must not collide");
    }

    #[test]
    fn test_sign_verify_with_non_extractable_pair() {
        let pair = generator()
            .generate(&KeyGenParams::default())
            .unwrap()
            .into_pair()
            .unwrap();

        let signature = pair.sign(b"dpop proof").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(pair.verify(b"dpop proof", &signature).unwrap());
        assert!(!pair.verify(b"tampered", &signature).unwrap());
        assert!(!pair.verify(b"dpop proof", b"short").unwrap());
    }

    #[test]
    fn test_sign_requires_sign_usage() {
        let params = KeyGenParams::new(
            Algorithm::Ecdh {
                named_curve: NamedCurve::P256,
            },
            false,
            vec![KeyUsage::DeriveBits],
        );
        let pair = generator().generate(&params).unwrap().into_pair().unwrap();
        assert!(matches!(
            pair.sign(b"data"),
            Err(EnclaveError::UsageNotPermitted(KeyUsage::Sign))
        ));
    }

    #[test]
    fn test_ecdh_public_key_has_no_usages() {
        let params = KeyGenParams::new(
            Algorithm::Ecdh {
                named_curve: NamedCurve::P256,
            },
            true,
            vec![KeyUsage::DeriveKey, KeyUsage::DeriveBits],
        );
        let pair = generator().generate(&params).unwrap().into_pair().unwrap();
        assert!(pair.public_key.usages().is_empty());
        assert_eq!(
            pair.private_key.usages(),
            &[KeyUsage::DeriveKey, KeyUsage::DeriveBits]
        );
        assert_eq!(pair.private_key.export_raw().unwrap().len(), 32);
    }

    #[test]
    fn test_ecdsa_verify_only_is_rejected() {
        let params = KeyGenParams::new(
            Algorithm::Ecdsa {
                named_curve: NamedCurve::P256,
            },
            false,
            vec![KeyUsage::Verify],
        );
        let err = generator().generate(&params).unwrap_err();
        assert!(matches!(err, EnclaveError::InvalidUsages { .. }));
    }

    #[test]
    fn test_disallowed_usage_is_rejected() {
        let params = KeyGenParams::new(
            Algorithm::Ecdsa {
                named_curve: NamedCurve::P256,
            },
            false,
            vec![KeyUsage::Sign, KeyUsage::Encrypt],
        );
        let err = generator().generate(&params).unwrap_err();
        assert!(err.to_string().contains("'encrypt' is not allowed"), "{err}");
    }

    #[test]
    fn test_empty_usages_are_rejected() {
        let params = KeyGenParams::new(Algorithm::AesGcm { length: 256 }, false, vec![]);
        assert!(matches!(
            generator().generate(&params),
            Err(EnclaveError::InvalidUsages { .. })
        ));
    }

    #[test]
    fn test_usages_are_sorted_and_deduplicated() {
        let params = KeyGenParams::new(
            Algorithm::AesGcm { length: 128 },
            false,
            vec![KeyUsage::Decrypt, KeyUsage::Encrypt, KeyUsage::Decrypt],
        );
        let material = generator().generate(&params).unwrap();
        assert_eq!(
            material.as_secret().unwrap().usages(),
            &[KeyUsage::Encrypt, KeyUsage::Decrypt]
        );
    }

    #[test]
    fn test_aes_key_lengths() {
        for length in [128u16, 192, 256] {
            let params = KeyGenParams::new(
                Algorithm::AesCbc { length },
                true,
                vec![KeyUsage::Encrypt],
            );
            let key = generator().generate(&params).unwrap();
            let raw = key.as_secret().unwrap().export_raw().unwrap();
            assert_eq!(raw.len(), usize::from(length / 8));
        }

        let params = KeyGenParams::new(Algorithm::AesKw { length: 512 }, true, vec![KeyUsage::WrapKey]);
        assert!(matches!(
            generator().generate(&params),
            Err(EnclaveError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_hmac_defaults_to_block_size() {
        let params = KeyGenParams::new(
            Algorithm::Hmac {
                hash: HashAlgorithm::Sha256,
                length: None,
            },
            true,
            vec![KeyUsage::Sign, KeyUsage::Verify],
        );
        let key = generator().generate(&params).unwrap();
        let secret = key.as_secret().unwrap();
        assert_eq!(
            secret.algorithm(),
            Algorithm::Hmac {
                hash: HashAlgorithm::Sha256,
                length: Some(512)
            }
        );
        assert_eq!(secret.export_raw().unwrap().len(), 64);
    }

    #[test]
    fn test_hmac_length_is_bounded() {
        let params = |length| {
            KeyGenParams::new(
                Algorithm::Hmac {
                    hash: HashAlgorithm::Sha256,
                    length: Some(length),
                },
                false,
                vec![KeyUsage::Sign],
            )
        };

        assert!(generator().generate(&params(MAX_HMAC_KEY_BITS)).is_ok());
        for length in [MAX_HMAC_KEY_BITS + 8, u32::MAX & !7] {
            assert!(matches!(
                generator().generate(&params(length)),
                Err(EnclaveError::InvalidParameters(_))
            ));
        }
    }

    #[test]
    fn test_hmac_sign_is_unsupported() {
        let params = KeyGenParams::new(
            Algorithm::Hmac {
                hash: HashAlgorithm::Sha512,
                length: Some(256),
            },
            false,
            vec![KeyUsage::Sign],
        );
        let key = generator().generate(&params).unwrap();
        assert!(matches!(
            key.as_secret().unwrap().sign(b"x"),
            Err(EnclaveError::UnsupportedOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_trait_generation_matches_sync_path() {
        let material = generator()
            .generate_key_material(&KeyGenParams::default())
            .await
            .unwrap();
        assert!(material.as_pair().is_some());
    }

    #[tokio::test]
    async fn test_mock_generator_can_fail() {
        let mock = mock::MockKeyGenerator::failing("engine offline");
        let err = mock
            .generate_key_material(&KeyGenParams::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("engine offline"));
        assert_eq!(mock.calls(), 1);
    }
}
