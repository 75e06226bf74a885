//! Instance Keys Module
//!
//! Each instance owns a single 32-byte seed. The Ed25519 signing key and the
//! X25519 sealing secret are both derived from it, so one private key file
//! is all that has to be persisted.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fs;
use std::path::Path;
use tracing::info;
use x25519_dalek::{PublicKey as SealingPublicKey, StaticSecret};

use crate::CryptoError;

const PRIVATE_LABEL: &str = "RSSX PRIVATE KEY";
const PUBLIC_LABEL: &str = "RSSX PUBLIC KEY";
const SEALING_KEY_CONTEXT: &str = "RSSX v1 instance sealing key";

/// Public half of an instance identity, as served on `/public_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicIdentity {
    verifying_key: VerifyingKey,
    sealing_key: SealingPublicKey,
}

impl PublicIdentity {
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    pub fn sealing_key(&self) -> &SealingPublicKey {
        &self.sealing_key
    }

    /// Raw bytes: `ed25519_pk || x25519_pk`.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(self.verifying_key.as_bytes());
        out[32..].copy_from_slice(self.sealing_key.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 64 {
            return Err(CryptoError::InvalidKey {
                reason: format!("public key must be 64 bytes, got {}", bytes.len()),
            });
        }

        let mut verifying = [0u8; 32];
        verifying.copy_from_slice(&bytes[..32]);
        let mut sealing = [0u8; 32];
        sealing.copy_from_slice(&bytes[32..]);

        let verifying_key =
            VerifyingKey::from_bytes(&verifying).map_err(|e| CryptoError::InvalidKey {
                reason: format!("invalid Ed25519 public key: {}", e),
            })?;

        Ok(Self {
            verifying_key,
            sealing_key: SealingPublicKey::from(sealing),
        })
    }

    pub fn to_pem(&self) -> String {
        armor(PUBLIC_LABEL, &self.to_bytes())
    }

    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let bytes = dearmor(PUBLIC_LABEL, pem)?;
        Self::from_bytes(&bytes)
    }

    /// Short hex fingerprint for logs.
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.to_bytes());
        hex::encode(&hash.as_bytes()[..8])
    }
}

/// Private keys of this instance.
pub struct InstanceKeys {
    signing_key: SigningKey,
    sealing_secret: StaticSecret,
    public: PublicIdentity,
}

impl InstanceKeys {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    /// Derive both keypairs from a seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let sealing_secret = StaticSecret::from(blake3::derive_key(SEALING_KEY_CONTEXT, &seed));
        let public = PublicIdentity {
            verifying_key: signing_key.verifying_key(),
            sealing_key: SealingPublicKey::from(&sealing_secret),
        };

        Self {
            signing_key,
            sealing_secret,
            public,
        }
    }

    /// Load the identity from `private_path`, or create it on first start.
    ///
    /// A present but unreadable key file is an error, never a reason to
    /// generate a replacement.
    pub fn load_or_generate<P: AsRef<Path>, Q: AsRef<Path>>(
        private_path: P,
        public_path: Q,
    ) -> Result<Self, CryptoError> {
        let private_path = private_path.as_ref();
        let public_path = public_path.as_ref();

        if private_path.exists() {
            let pem = fs::read_to_string(private_path).map_err(|e| CryptoError::KeyFile {
                path: private_path.display().to_string(),
                reason: e.to_string(),
            })?;
            let seed_bytes = dearmor(PRIVATE_LABEL, &pem).map_err(|e| CryptoError::KeyFile {
                path: private_path.display().to_string(),
                reason: e.to_string(),
            })?;
            let seed: [u8; 32] =
                seed_bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| CryptoError::KeyFile {
                        path: private_path.display().to_string(),
                        reason: format!("seed must be 32 bytes, got {}", seed_bytes.len()),
                    })?;

            let keys = Self::from_seed(seed);
            if !public_path.exists() {
                write_key_file(public_path, &keys.public.to_pem(), false)?;
            }
            info!(fingerprint = %keys.public.fingerprint(), "Instance keys loaded");
            return Ok(keys);
        }

        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let keys = Self::from_seed(seed);

        write_key_file(private_path, &armor(PRIVATE_LABEL, &seed), true)?;
        write_key_file(public_path, &keys.public.to_pem(), false)?;

        info!(fingerprint = %keys.public.fingerprint(), "Instance keys generated");
        Ok(keys)
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub(crate) fn sealing_secret(&self) -> &StaticSecret {
        &self.sealing_secret
    }

    pub fn public_identity(&self) -> &PublicIdentity {
        &self.public
    }
}

fn write_key_file(path: &Path, contents: &str, private: bool) -> Result<(), CryptoError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| CryptoError::KeyFile {
                path: parent.display().to_string(),
                reason: e.to_string(),
            })?;
        }
    }

    fs::write(path, contents).map_err(|e| CryptoError::KeyFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    if private {
        restrict_permissions(path)?;
    }

    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), CryptoError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| {
        CryptoError::KeyFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), CryptoError> {
    Ok(())
}

/// Wrap bytes in a PEM-style block.
pub fn armor(label: &str, bytes: &[u8]) -> String {
    let encoded = BASE64.encode(bytes);
    let mut out = format!("-----BEGIN {}-----\n", label);
    for chunk in encoded.as_bytes().chunks(64) {
        // base64 output is ASCII
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out.push_str(&format!("-----END {}-----\n", label));
    out
}

/// Unwrap a PEM-style block with the given label.
pub fn dearmor(label: &str, text: &str) -> Result<Vec<u8>, CryptoError> {
    let begin = format!("-----BEGIN {}-----", label);
    let end = format!("-----END {}-----", label);

    let start = text.find(&begin).ok_or_else(|| CryptoError::Armor {
        reason: format!("missing '{}' header", begin),
    })?;
    let body_start = start + begin.len();
    let body_len = text[body_start..].find(&end).ok_or_else(|| CryptoError::Armor {
        reason: format!("missing '{}' footer", end),
    })?;

    let body: String = text[body_start..body_start + body_len]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    BASE64.decode(body).map_err(|e| CryptoError::Armor {
        reason: format!("invalid base64 body: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_seed_derivation_is_stable() {
        let a = InstanceKeys::from_seed([7u8; 32]);
        let b = InstanceKeys::from_seed([7u8; 32]);
        let c = InstanceKeys::from_seed([8u8; 32]);

        assert_eq!(a.public_identity(), b.public_identity());
        assert_ne!(a.public_identity(), c.public_identity());
    }

    #[test]
    fn test_public_pem_round_trip() {
        let keys = InstanceKeys::generate();
        let pem = keys.public_identity().to_pem();

        assert!(pem.starts_with("-----BEGIN RSSX PUBLIC KEY-----\n"));
        assert!(pem.trim_end().ends_with("-----END RSSX PUBLIC KEY-----"));

        let parsed = PublicIdentity::from_pem(&pem).unwrap();
        assert_eq!(&parsed, keys.public_identity());
    }

    #[test]
    fn test_dearmor_rejects_wrong_label() {
        let pem = armor(PRIVATE_LABEL, &[1u8; 32]);
        assert!(PublicIdentity::from_pem(&pem).is_err());
        assert!(dearmor(PUBLIC_LABEL, "not pem at all").is_err());
    }

    #[test]
    fn test_load_or_generate_persists_identity() {
        let temp_dir = TempDir::new().unwrap();
        let private_path = temp_dir.path().join("keys/private.pem");
        let public_path = temp_dir.path().join("keys/public.pem");

        let first = InstanceKeys::load_or_generate(&private_path, &public_path).unwrap();
        assert!(private_path.exists());
        assert!(public_path.exists());

        let second = InstanceKeys::load_or_generate(&private_path, &public_path).unwrap();
        assert_eq!(first.public_identity(), second.public_identity());

        let public_pem = fs::read_to_string(&public_path).unwrap();
        assert_eq!(
            &PublicIdentity::from_pem(&public_pem).unwrap(),
            first.public_identity()
        );
    }

    #[test]
    fn test_corrupt_private_key_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let private_path = temp_dir.path().join("private.pem");
        let public_path = temp_dir.path().join("public.pem");
        fs::write(&private_path, armor(PRIVATE_LABEL, &[1u8; 5])).unwrap();

        let result = InstanceKeys::load_or_generate(&private_path, &public_path);
        assert!(matches!(result, Err(CryptoError::KeyFile { .. })));
        assert!(!public_path.exists());
    }
}
