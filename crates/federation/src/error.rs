//! Federation errors and their HTTP status classes.

use rssx_crypto::CryptoError;
use rssx_protocol::ProtocolError;
use thiserror::Error;

use crate::abuse::AbuseRejection;
use crate::ledger::LedgerError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum FederationError {
    #[error("Validation error: {reason}")]
    Validation { reason: String },

    #[error("{source}")]
    Protocol { source: ProtocolError },

    /// The origin could not be reached, or refused the forwarded action
    #[error("Relay to {origin} failed: {message}")]
    AuthorityRelay {
        origin: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Cryptographic error: {source}")]
    Crypto { source: CryptoError },

    #[error("Decryption failed: {reason}")]
    Decryption { reason: String },

    #[error("Signature of {author}'s content from {origin} does not verify")]
    InvalidSignature { author: String, origin: String },

    #[error("{source}")]
    Abuse { source: AbuseRejection },

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("{reason}")]
    Conflict { reason: String },

    #[error("{source}")]
    Vote { source: LedgerError },

    #[error("Storage error: {source}")]
    Storage { source: StorageError },
}

impl FederationError {
    /// HTTP status class of this error
    pub fn status_code(&self) -> u16 {
        match self {
            FederationError::Validation { .. }
            | FederationError::Protocol { .. }
            | FederationError::Decryption { .. }
            | FederationError::InvalidSignature { .. }
            | FederationError::Vote { .. } => 400,
            FederationError::Abuse { source } => match source {
                AbuseRejection::RateLimited { .. } => 429,
                _ => 400,
            },
            FederationError::NotFound { .. } => 404,
            FederationError::Conflict { .. } => 409,
            FederationError::AuthorityRelay { .. } => 502,
            FederationError::Crypto { .. } | FederationError::Storage { .. } => 500,
        }
    }
}

impl From<ProtocolError> for FederationError {
    fn from(source: ProtocolError) -> Self {
        FederationError::Protocol { source }
    }
}

impl From<CryptoError> for FederationError {
    fn from(source: CryptoError) -> Self {
        FederationError::Crypto { source }
    }
}

impl From<AbuseRejection> for FederationError {
    fn from(source: AbuseRejection) -> Self {
        FederationError::Abuse { source }
    }
}

impl From<LedgerError> for FederationError {
    fn from(source: LedgerError) -> Self {
        FederationError::Vote { source }
    }
}

impl From<StorageError> for FederationError {
    fn from(source: StorageError) -> Self {
        match source {
            StorageError::NotFound { what, id } => FederationError::NotFound { what, id },
            StorageError::InvalidKey { what, id } => FederationError::Validation {
                reason: format!("Invalid {} id: {:?}", what, id),
            },
            source => FederationError::Storage { source },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abuse::ActionKind;

    #[test]
    fn test_status_codes() {
        let rate: FederationError = AbuseRejection::RateLimited {
            kind: ActionKind::Post,
        }
        .into();
        assert_eq!(rate.status_code(), 429);

        let dup: FederationError = AbuseRejection::Duplicate {
            kind: ActionKind::Post,
        }
        .into();
        assert_eq!(dup.status_code(), 400);

        let missing: FederationError = StorageError::NotFound {
            what: "Post",
            id: "p1".to_string(),
        }
        .into();
        assert_eq!(missing.status_code(), 404);

        let relay = FederationError::AuthorityRelay {
            origin: "a.example".to_string(),
            status: None,
            message: "connection refused".to_string(),
        };
        assert_eq!(relay.status_code(), 502);
    }
}
