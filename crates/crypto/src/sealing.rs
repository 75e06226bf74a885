//! Sealed payloads for federation envelopes.
//!
//! ```text
//! seal(recipient_pk, plaintext):
//!   eph_sk, eph_pk  = fresh X25519 keypair
//!   shared          = X25519(eph_sk, recipient_pk)
//!   key             = BLAKE3::derive_key("RSSX v1 sealed content key", shared || eph_pk || recipient_pk)
//!   nonce           = BLAKE3::derive_key("RSSX v1 sealed content nonce", shared || eph_pk)[..12]
//!   return eph_pk || ChaCha20-Poly1305(key, nonce, plaintext, aad = eph_pk)
//! ```

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret, StaticSecret};

use crate::CryptoError;

const KEY_CONTEXT: &str = "RSSX v1 sealed content key";
const NONCE_CONTEXT: &str = "RSSX v1 sealed content nonce";
const TAG_SIZE: usize = 16;

/// Ephemeral public key length prefixed to every sealed payload.
pub const EPHEMERAL_KEY_SIZE: usize = 32;

fn derive_cipher(
    shared: &SharedSecret,
    eph_pk: &[u8; 32],
    recipient_pk: &PublicKey,
) -> (ChaCha20Poly1305, [u8; 12]) {
    let mut key_material = Vec::with_capacity(96);
    key_material.extend_from_slice(shared.as_bytes());
    key_material.extend_from_slice(eph_pk);
    key_material.extend_from_slice(recipient_pk.as_bytes());
    let key = blake3::derive_key(KEY_CONTEXT, &key_material);

    let mut nonce_material = Vec::with_capacity(64);
    nonce_material.extend_from_slice(shared.as_bytes());
    nonce_material.extend_from_slice(eph_pk);
    let nonce_full = blake3::derive_key(NONCE_CONTEXT, &nonce_material);
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&nonce_full[..12]);

    (ChaCha20Poly1305::new(Key::from_slice(&key)), nonce)
}

/// Seal `plaintext` so only the holder of `recipient_pk`'s secret can open it.
pub fn seal(recipient_pk: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let eph_secret = EphemeralSecret::random_from_rng(OsRng);
    let eph_pk = PublicKey::from(&eph_secret).to_bytes();

    let shared = eph_secret.diffie_hellman(recipient_pk);
    if !shared.was_contributory() {
        return Err(CryptoError::Sealing {
            reason: "recipient key is a low-order point".to_string(),
        });
    }

    let (cipher, nonce) = derive_cipher(&shared, &eph_pk, recipient_pk);
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &eph_pk,
            },
        )
        .map_err(|_| CryptoError::Sealing {
            reason: "AEAD encryption failed".to_string(),
        })?;

    let mut out = Vec::with_capacity(EPHEMERAL_KEY_SIZE + ciphertext.len());
    out.extend_from_slice(&eph_pk);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a payload produced by [`seal`] with the recipient's secret.
pub fn open(recipient_sk: &StaticSecret, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < EPHEMERAL_KEY_SIZE + TAG_SIZE {
        return Err(CryptoError::Opening {
            reason: format!("sealed payload too short ({} bytes)", sealed.len()),
        });
    }

    let mut eph_pk = [0u8; 32];
    eph_pk.copy_from_slice(&sealed[..EPHEMERAL_KEY_SIZE]);
    let recipient_pk = PublicKey::from(recipient_sk);

    let shared = recipient_sk.diffie_hellman(&PublicKey::from(eph_pk));
    if !shared.was_contributory() {
        return Err(CryptoError::Opening {
            reason: "ephemeral key is a low-order point".to_string(),
        });
    }

    let (cipher, nonce) = derive_cipher(&shared, &eph_pk, &recipient_pk);
    cipher
        .decrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &sealed[EPHEMERAL_KEY_SIZE..],
                aad: &eph_pk,
            },
        )
        .map_err(|_| CryptoError::Opening {
            reason: "authentication failed, wrong key or tampered payload".to_string(),
        })
}
