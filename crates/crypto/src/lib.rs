//! RSSX instance cryptography
//!
//! Instance identity (one persisted seed yielding an Ed25519 signing key and
//! an X25519 sealing key), detached content signatures, and sealed payloads
//! for peer-to-peer content transfer.

pub mod engine;
pub mod keys;
pub mod sealing;

pub use engine::SignatureEngine;
pub use keys::{InstanceKeys, PublicIdentity};

use thiserror::Error;

/// Cryptographic errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key file {path}: {reason}")]
    KeyFile { path: String, reason: String },

    #[error("Invalid key: {reason}")]
    InvalidKey { reason: String },

    #[error("Invalid armour: {reason}")]
    Armor { reason: String },

    #[error("Signing failed: {reason}")]
    Signing { reason: String },

    #[error("Sealing failed: {reason}")]
    Sealing { reason: String },

    #[error("Cannot open sealed payload: {reason}")]
    Opening { reason: String },
}

impl CryptoError {
    /// True when the failure came from a peer-supplied ciphertext.
    pub fn is_decryption(&self) -> bool {
        matches!(self, CryptoError::Opening { .. })
    }
}
