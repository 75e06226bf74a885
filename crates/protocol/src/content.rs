//! Shared content definitions.
//!
//! These types are persisted by the credential store and exchanged between
//! instances. Every instance uses the same canonical signing string, so the
//! formatting in [`canonical_string`] is a wire contract.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ProtocolError;

/// Build the string that is signed for a post or comment.
///
/// Concatenation of timestamp, author and content with no separators.
pub fn canonical_string(timestamp: i64, author: &str, content: &str) -> String {
    format!("{}{}{}", timestamp, author, content)
}

/// Derive the origin-assigned id for a piece of content.
pub fn derive_content_id(origin_host: &str, canonical: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"RSSX_CONTENT_V1\n");
    hasher.update(origin_host.as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Split a federated voter id (`user@host`) into its parts.
pub fn split_voter(voter: &str) -> Option<(&str, &str)> {
    match voter.rsplit_once('@') {
        Some((user, host)) if !user.is_empty() && !host.is_empty() => Some((user, host)),
        _ => None,
    }
}

/// A locally registered user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub password_hash: String,
    /// Unix seconds
    pub created_at: i64,
    pub last_login: Option<i64>,
    /// Reputation, adjusted only by the vote ledger
    pub popularity: i64,
}

/// Public view of a [`User`], without the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub username: String,
    pub popularity: i64,
    pub created_at: i64,
    pub last_login: Option<i64>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            popularity: user.popularity,
            created_at: user.created_at,
            last_login: user.last_login,
        }
    }
}

/// A post, either authored here or held as a federated copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    /// Origin-assigned id, never reused
    pub id: String,
    /// Username on the origin instance
    pub author: String,
    pub content: String,
    /// Author-instance clock, Unix seconds
    pub timestamp: i64,
    /// Hex detached signature over [`canonical_string`]
    pub signature: String,
    #[serde(default)]
    pub upvotes: u64,
    #[serde(default)]
    pub downvotes: u64,
    /// More downvotes than upvotes
    #[serde(default)]
    pub spam: bool,
    /// Instance that handed us this copy; `None` on the origin's own copy
    #[serde(default)]
    pub federated_from: Option<String>,
}

impl Post {
    pub fn canonical_string(&self) -> String {
        canonical_string(self.timestamp, &self.author, &self.content)
    }

    /// True when this instance is the origin of the post.
    pub fn is_origin_copy(&self) -> bool {
        self.federated_from.is_none()
    }
}

/// A comment attached to a post.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author: String,
    pub content: String,
    pub timestamp: i64,
    pub signature: String,
    #[serde(default)]
    pub upvotes: u64,
    #[serde(default)]
    pub federated_from: Option<String>,
}

impl Comment {
    pub fn canonical_string(&self) -> String {
        canonical_string(self.timestamp, &self.author, &self.content)
    }
}

/// Direction of a vote.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Upvote,
    Downvote,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::Upvote => "upvote",
            VoteType::Downvote => "downvote",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            VoteType::Upvote => VoteType::Downvote,
            VoteType::Downvote => VoteType::Upvote,
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upvote" => Ok(VoteType::Upvote),
            "downvote" => Ok(VoteType::Downvote),
            other => Err(ProtocolError::InvalidField {
                field: "vote_type",
                reason: format!("expected 'upvote' or 'downvote', got '{}'", other),
            }),
        }
    }
}

/// One row of the vote ledger. Identity is `(content_id, voter)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vote {
    pub content_id: String,
    /// Local username, or `user@host` for federated voters
    pub voter: String,
    pub vote_type: VoteType,
}

/// A federation peer, added explicitly by an operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    pub url: String,
    pub last_sync: Option<i64>,
}

/// A post together with its comments, oldest comment first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedPost {
    #[serde(flatten)]
    pub post: Post,
    #[serde(default)]
    pub comments: Vec<Comment>,
}
