//! RSSX protocol types
//!
//! This crate defines the content model (users, posts, comments, votes,
//! peers) and the JSON bodies exchanged between federated instances.

pub mod content;
pub mod envelope;
pub mod errors;

pub use content::{
    canonical_string, derive_content_id, split_voter, Comment, FeedPost, Peer, Post, User,
    UserProfile, Vote, VoteType,
};
pub use envelope::{
    Envelope, FeedResponse, PublicKeyResponse, ValidEnvelope, ValidVote, VoteEnvelope,
};
pub use errors::ProtocolError;

/// Version of the RSSX federation protocol
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Header carrying the number of relay hops a forwarded request has taken
pub const RELAY_HOPS_HEADER: &str = "x-rssx-relay-hops";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version() {
        assert!(!PROTOCOL_VERSION.is_empty());
    }
}
