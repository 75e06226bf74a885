//! Signature Engine
//!
//! Signs and verifies content on behalf of this instance and seals content
//! for peers. Signatures are detached Ed25519 signatures over the canonical
//! string, hex encoded. Sealed payloads are base64 encoded.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, Verifier};
use std::path::Path;
use tracing::debug;

use crate::keys::{InstanceKeys, PublicIdentity};
use crate::{sealing, CryptoError};

/// Holds the instance identity and performs all signing and sealing.
pub struct SignatureEngine {
    keys: InstanceKeys,
}

impl SignatureEngine {
    pub fn new(keys: InstanceKeys) -> Self {
        Self { keys }
    }

    /// Load persisted keys, generating them on first start.
    pub fn load_or_generate<P: AsRef<Path>, Q: AsRef<Path>>(
        private_path: P,
        public_path: Q,
    ) -> Result<Self, CryptoError> {
        Ok(Self::new(InstanceKeys::load_or_generate(
            private_path,
            public_path,
        )?))
    }

    /// Sign a canonical string. Fails closed: no signature is produced on error.
    pub fn sign(&self, canonical: &str) -> Result<String, CryptoError> {
        let signature = self
            .keys
            .signing_key()
            .try_sign(canonical.as_bytes())
            .map_err(|e| CryptoError::Signing {
                reason: e.to_string(),
            })?;
        Ok(hex::encode(signature.to_bytes()))
    }

    /// Verify a hex signature. Malformed input yields `false`.
    pub fn verify(canonical: &str, signature_hex: &str, public: &PublicIdentity) -> bool {
        let bytes = match hex::decode(signature_hex) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Rejecting malformed signature hex: {}", e);
                return false;
            }
        };

        let bytes: [u8; 64] = match bytes.as_slice().try_into() {
            Ok(bytes) => bytes,
            Err(_) => {
                debug!("Rejecting signature of length {}", bytes.len());
                return false;
            }
        };

        let signature = Signature::from_bytes(&bytes);
        public
            .verifying_key()
            .verify(canonical.as_bytes(), &signature)
            .is_ok()
    }

    /// Verify against this instance's own key.
    pub fn verify_local(&self, canonical: &str, signature_hex: &str) -> bool {
        Self::verify(canonical, signature_hex, self.keys.public_identity())
    }

    /// Seal plaintext for a peer; only that peer's instance can open it.
    pub fn encrypt_for_peer(
        &self,
        plaintext: &str,
        peer: &PublicIdentity,
    ) -> Result<String, CryptoError> {
        let sealed = sealing::seal(peer.sealing_key(), plaintext.as_bytes())?;
        Ok(BASE64.encode(sealed))
    }

    /// Open a payload sealed for this instance.
    pub fn decrypt_local(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let sealed = BASE64
            .decode(ciphertext.trim())
            .map_err(|e| CryptoError::Opening {
                reason: format!("invalid base64: {}", e),
            })?;
        let plaintext = sealing::open(self.keys.sealing_secret(), &sealed)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Opening {
            reason: "plaintext is not valid UTF-8".to_string(),
        })
    }

    /// PEM-armoured public key, as served to peers.
    pub fn public_key_pem(&self) -> String {
        self.keys.public_identity().to_pem()
    }

    pub fn public_identity(&self) -> &PublicIdentity {
        self.keys.public_identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(seed: u8) -> SignatureEngine {
        SignatureEngine::new(InstanceKeys::from_seed([seed; 32]))
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let engine = engine(1);
        let canonical = "1700000000alicehello";
        let signature = engine.sign(canonical).unwrap();

        assert_eq!(signature.len(), 128);
        assert!(SignatureEngine::verify(
            canonical,
            &signature,
            engine.public_identity()
        ));
        assert!(engine.verify_local(canonical, &signature));
    }

    #[test]
    fn test_mutated_data_fails() {
        let engine = engine(1);
        let signature = engine.sign("1700000000alicehello").unwrap();

        assert!(!engine.verify_local("1700000000alicehellp", &signature));
        assert!(!engine.verify_local("1700000001alicehello", &signature));
    }

    #[test]
    fn test_mutated_signature_fails() {
        let engine = engine(1);
        let canonical = "1700000000alicehello";
        let mut bytes = hex::decode(engine.sign(canonical).unwrap()).unwrap();
        bytes[10] ^= 0x01;

        assert!(!engine.verify_local(canonical, &hex::encode(bytes)));
    }

    #[test]
    fn test_malformed_signature_is_false() {
        let engine = engine(1);
        assert!(!engine.verify_local("x", "not-hex"));
        assert!(!engine.verify_local("x", "abcd"));
        assert!(!engine.verify_local("x", ""));
    }

    #[test]
    fn test_other_instance_key_fails() {
        let a = engine(1);
        let b = engine(2);
        let signature = a.sign("payload").unwrap();
        assert!(!SignatureEngine::verify(
            "payload",
            &signature,
            b.public_identity()
        ));
    }

    #[test]
    fn test_encrypt_for_peer_roundtrip() {
        let a = engine(1);
        let b = engine(2);

        let sealed = a.encrypt_for_peer("hi there", b.public_identity()).unwrap();
        assert_eq!(b.decrypt_local(&sealed).unwrap(), "hi there");
        assert!(a.decrypt_local(&sealed).is_err());
    }

    #[test]
    fn test_decrypt_rejects_garbage() {
        let engine = engine(1);
        assert!(matches!(
            engine.decrypt_local("%%% not base64"),
            Err(CryptoError::Opening { .. })
        ));
        assert!(engine.decrypt_local("aGVsbG8=").is_err());
    }

    #[test]
    fn test_public_key_pem_parses() {
        let engine = engine(3);
        let parsed = PublicIdentity::from_pem(&engine.public_key_pem()).unwrap();
        assert_eq!(&parsed, engine.public_identity());
    }
}
