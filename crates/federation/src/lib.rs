//! RSSX federation
//!
//! Storage, vote ledger, abuse gate, authority resolution and the peer
//! relay for one RSSX instance, tied together by [`RssxNode`].

pub mod abuse;
pub mod authority;
pub mod error;
pub mod feed;
pub mod ledger;
pub mod node;
pub mod relay;
pub mod storage;

// Re-export key types
pub use abuse::{AbuseConfig, AbuseGate, AbuseRejection, ActionKind};
pub use authority::{resolve, Resolution};
pub use error::FederationError;
pub use ledger::{LedgerError, VoteOutcome};
pub use node::{Delivery, NodeConfig, RssxNode, Stored};
pub use relay::{FederationRelay, RelayConfig, RelayResponse, RelayStats};
pub use storage::{ContentStore, StorageError};
