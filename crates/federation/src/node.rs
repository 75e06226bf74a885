//! Node Module
//!
//! `RssxNode` is one federated instance: its store, keys, abuse gate and
//! relay client. Local writes arrive with an already authenticated
//! username; inbound federation arrives as envelopes from peers.

use anyhow::{Context, Result};
use rssx_crypto::SignatureEngine;
use rssx_protocol::{
    canonical_string, derive_content_id, Comment, Envelope, FeedPost, Peer, Post, User,
    UserProfile, ValidEnvelope, VoteEnvelope, VoteType,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::abuse::{AbuseConfig, AbuseGate, ActionKind};
use crate::authority::{self, Resolution};
use crate::error::FederationError;
use crate::feed;
use crate::ledger::VoteOutcome;
use crate::relay::{
    ciphertext_prefix, FederationRelay, RelayConfig, RelayResponse, RelayStats,
    RECEIVE_COMMENT_PATH, RECEIVE_POST_PATH,
};
use crate::storage::{ContentStore, StorageError};

/// Configuration for an RSSX node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Database path for local storage
    pub db_path: String,
    /// Host this instance is reachable at by peers; used in
    /// `federated_from` and in `user@host` voter ids
    pub public_host: String,
    /// PEM file holding the instance seed
    pub private_key_file: String,
    /// PEM file holding the instance public key
    pub public_key_file: String,
    pub abuse: AbuseConfig,
    pub relay: RelayConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            db_path: "rssx_data".to_string(),
            public_host: "127.0.0.1:5000".to_string(),
            private_key_file: "rssx_private.pem".to_string(),
            public_key_file: "rssx_public.pem".to_string(),
            abuse: AbuseConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

/// Where an action ended up
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery<T> {
    /// Applied to the local store
    Applied(T),
    /// Handed to the origin; its answer is ours
    Forwarded(RelayResponse),
}

/// Result of storing inbound content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored {
    pub id: String,
    /// False when the content was already held
    pub created: bool,
}

fn comment_id(origin_host: &str, post_id: &str, canonical: &str) -> String {
    derive_content_id(origin_host, &format!("{}\n{}", post_id, canonical))
}

fn require_content(content: &str) -> Result<(), FederationError> {
    if content.trim().is_empty() {
        return Err(FederationError::Validation {
            reason: "Content cannot be empty".to_string(),
        });
    }
    Ok(())
}

/// A federated RSSX instance
pub struct RssxNode {
    config: NodeConfig,
    store: ContentStore,
    engine: SignatureEngine,
    gate: AbuseGate,
    relay: FederationRelay,
    start_time: chrono::DateTime<chrono::Utc>,
}

impl RssxNode {
    /// Open the store and load (or create) the instance keys
    pub fn new(config: NodeConfig) -> Result<Self> {
        let store = ContentStore::open(&config.db_path)
            .with_context(|| format!("Failed to open store at {}", config.db_path))?;
        let engine =
            SignatureEngine::load_or_generate(&config.private_key_file, &config.public_key_file)
                .context("Failed to load instance keys")?;
        let gate = AbuseGate::new(config.abuse.clone());
        let relay = FederationRelay::new(config.relay.clone())?;

        info!(
            public_host = %config.public_host,
            fingerprint = %engine.public_identity().fingerprint(),
            "RSSX node ready"
        );

        Ok(RssxNode {
            config,
            store,
            engine,
            gate,
            relay,
            start_time: chrono::Utc::now(),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn public_host(&self) -> &str {
        &self.config.public_host
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn engine(&self) -> &SignatureEngine {
        &self.engine
    }

    /// PEM public key served to peers
    pub fn public_key_pem(&self) -> String {
        self.engine.public_key_pem()
    }

    pub fn relay_stats(&self) -> RelayStats {
        self.relay.stats()
    }

    pub fn uptime_secs(&self) -> i64 {
        (chrono::Utc::now() - self.start_time).num_seconds()
    }

    // ----- users -----

    /// Register a user with an already hashed password
    pub fn register(&self, username: &str, password_hash: &str) -> Result<User, FederationError> {
        if username.trim().is_empty() || username.contains('@') || username.contains('\0') {
            return Err(FederationError::Validation {
                reason: "Username must be non-empty and may not contain '@'".to_string(),
            });
        }

        match self.store.save_user(username, password_hash) {
            Ok(user) => {
                info!(user = %username, "User registered");
                Ok(user)
            }
            Err(StorageError::AlreadyExists { .. }) => Err(FederationError::Conflict {
                reason: "Username already exists".to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_user(&self, username: &str) -> Result<Option<User>, FederationError> {
        Ok(self.store.get_user(username)?)
    }

    pub fn record_login(&self, username: &str) -> Result<(), FederationError> {
        Ok(self.store.update_login_time(username)?)
    }

    pub fn profile(&self, username: &str) -> Result<UserProfile, FederationError> {
        self.store
            .get_user(username)?
            .map(|user| UserProfile::from(&user))
            .ok_or_else(|| FederationError::NotFound {
                what: "User",
                id: username.to_string(),
            })
    }

    // ----- local writes -----

    /// Publish a post authored by a local user
    pub async fn create_post(&self, username: &str, content: &str) -> Result<Post, FederationError> {
        require_content(content)?;
        self.gate.check(username, ActionKind::Post, content)?;

        let timestamp = chrono::Utc::now().timestamp();
        let canonical = canonical_string(timestamp, username, content);
        let signature = self.engine.sign(&canonical)?;

        let post = Post {
            id: derive_content_id(&self.config.public_host, &canonical),
            author: username.to_string(),
            content: content.to_string(),
            timestamp,
            signature,
            upvotes: 0,
            downvotes: 0,
            spam: false,
            federated_from: None,
        };

        match self.store.save_post(&post) {
            Ok(_) => {}
            Err(StorageError::AlreadyExists { .. }) => {
                return Err(FederationError::Conflict {
                    reason: "An identical post already exists".to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        }
        info!(post_id = %post.id, author = %username, "Post created");

        if self.config.relay.push_posts_to_peers {
            self.push_post(&post).await;
        }
        Ok(post)
    }

    /// Comment on a post. Comments on relayed copies go to the origin.
    pub async fn create_comment(
        &self,
        username: &str,
        post_id: &str,
        content: &str,
    ) -> Result<Delivery<Comment>, FederationError> {
        require_content(content)?;

        let origin = match authority::resolve(&self.store, post_id, None)? {
            Resolution::LocalNew => {
                return Err(FederationError::NotFound {
                    what: "Post",
                    id: post_id.to_string(),
                })
            }
            Resolution::LocalOrigin => None,
            Resolution::Relay { origin } => Some(origin),
        };
        self.gate.check(username, ActionKind::Comment, content)?;

        let timestamp = chrono::Utc::now().timestamp();
        let canonical = canonical_string(timestamp, username, content);
        let comment = Comment {
            id: comment_id(&self.config.public_host, post_id, &canonical),
            post_id: post_id.to_string(),
            author: username.to_string(),
            content: content.to_string(),
            timestamp,
            signature: self.engine.sign(&canonical)?,
            upvotes: 0,
            federated_from: None,
        };

        let origin = match origin {
            None => {
                self.store.save_comment(&comment)?;
                info!(comment_id = %comment.id, post_id = %post_id, "Comment created");
                return Ok(Delivery::Applied(comment));
            }
            Some(origin) => origin,
        };

        let identity = self.relay.fetch_public_key(&origin).await?;
        let envelope = Envelope {
            id: Some(comment.id.clone()),
            author: Some(comment.author.clone()),
            timestamp: Some(comment.timestamp),
            content: Some(self.engine.encrypt_for_peer(&comment.content, &identity)?),
            signature: Some(comment.signature.clone()),
            federated_from: Some(self.config.public_host.clone()),
            post_id: Some(comment.post_id.clone()),
        };

        info!(post_id = %post_id, origin = %origin, "Sending comment to origin");
        let response = self
            .relay
            .send_envelope(&origin, RECEIVE_COMMENT_PATH, &envelope, 0)
            .await?;
        Ok(Delivery::Forwarded(response))
    }

    /// Vote on a post. Votes on relayed copies go to the origin.
    pub async fn vote(
        &self,
        username: &str,
        post_id: &str,
        vote_type: VoteType,
    ) -> Result<Delivery<VoteOutcome>, FederationError> {
        match authority::resolve(&self.store, post_id, None)? {
            Resolution::LocalNew => Err(FederationError::NotFound {
                what: "Post",
                id: post_id.to_string(),
            }),
            Resolution::LocalOrigin => Ok(Delivery::Applied(
                self.apply_vote(post_id, username, vote_type)?,
            )),
            Resolution::Relay { origin } => {
                let vote = VoteEnvelope::new(
                    post_id,
                    vote_type,
                    format!("{}@{}", username, self.config.public_host),
                );
                info!(post_id = %post_id, origin = %origin, %vote_type, "Sending vote to origin");
                let response = self.relay.send_vote(&origin, &vote, 0).await?;
                Ok(Delivery::Forwarded(response))
            }
        }
    }

    fn apply_vote(
        &self,
        post_id: &str,
        voter: &str,
        vote_type: VoteType,
    ) -> Result<VoteOutcome, FederationError> {
        let outcome = self.store.apply_vote(post_id, voter, vote_type)??;
        info!(
            post_id = %post_id,
            voter = %voter,
            %vote_type,
            upvotes = outcome.upvotes,
            downvotes = outcome.downvotes,
            "Vote recorded"
        );
        Ok(outcome)
    }

    async fn push_post(&self, post: &Post) {
        let peers = match self.store.get_all_servers() {
            Ok(peers) => peers,
            Err(e) => {
                warn!("Cannot list peers for push: {}", e);
                return;
            }
        };

        for peer in peers {
            let result = async {
                let identity = self.relay.fetch_public_key(&peer.url).await?;
                let envelope = Envelope {
                    id: Some(post.id.clone()),
                    author: Some(post.author.clone()),
                    timestamp: Some(post.timestamp),
                    content: Some(self.engine.encrypt_for_peer(&post.content, &identity)?),
                    signature: Some(post.signature.clone()),
                    federated_from: Some(self.config.public_host.clone()),
                    post_id: None,
                };
                self.relay
                    .send_envelope(&peer.url, RECEIVE_POST_PATH, &envelope, 0)
                    .await
            }
            .await;

            if let Err(e) = result {
                warn!(peer = %peer.url, post_id = %post.id, "Could not push post: {}", e);
            }
        }
    }

    // ----- inbound federation -----

    fn open_envelope(&self, envelope: &ValidEnvelope) -> Result<String, FederationError> {
        self.engine
            .decrypt_local(&envelope.sealed_content)
            .map_err(|e| {
                warn!(
                    sender = %envelope.federated_from,
                    ciphertext = ciphertext_prefix(&envelope.sealed_content),
                    "Could not decrypt envelope: {}",
                    e
                );
                FederationError::Decryption {
                    reason: e.to_string(),
                }
            })
    }

    async fn verify_inbound(
        &self,
        envelope: &ValidEnvelope,
        plaintext: &str,
    ) -> Result<(), FederationError> {
        if !self.config.relay.verify_federated_signatures {
            return Ok(());
        }

        let identity = self.relay.fetch_public_key(&envelope.federated_from).await?;
        let canonical = canonical_string(envelope.timestamp, &envelope.author, plaintext);
        if SignatureEngine::verify(&canonical, &envelope.signature, &identity) {
            Ok(())
        } else {
            warn!(
                sender = %envelope.federated_from,
                author = %envelope.author,
                "Rejecting envelope with invalid signature"
            );
            Err(FederationError::InvalidSignature {
                author: envelope.author.clone(),
                origin: envelope.federated_from.clone(),
            })
        }
    }

    /// Accept a post pushed by a peer. Already held posts are acknowledged
    /// without change.
    pub async fn receive_post(&self, envelope: &Envelope) -> Result<Stored, FederationError> {
        let envelope = envelope.validate_post()?;

        if let Some(id) = &envelope.id {
            let resolution =
                authority::resolve(&self.store, id, Some(envelope.federated_from.as_str()))?;
            if resolution != Resolution::LocalNew {
                return Ok(Stored {
                    id: id.clone(),
                    created: false,
                });
            }
        }

        let content = self.open_envelope(&envelope)?;
        self.verify_inbound(&envelope, &content).await?;

        let canonical = canonical_string(envelope.timestamp, &envelope.author, &content);
        let post = Post {
            id: envelope
                .id
                .clone()
                .unwrap_or_else(|| derive_content_id(&envelope.federated_from, &canonical)),
            author: envelope.author.clone(),
            content,
            timestamp: envelope.timestamp,
            signature: envelope.signature.clone(),
            upvotes: 0,
            downvotes: 0,
            spam: false,
            federated_from: Some(envelope.federated_from.clone()),
        };

        match self.store.save_post(&post) {
            Ok(id) => {
                info!(post_id = %id, sender = %envelope.federated_from, "Federated post stored");
                Ok(Stored { id, created: true })
            }
            Err(StorageError::AlreadyExists { id, .. }) => Ok(Stored { id, created: false }),
            Err(e) => Err(e.into()),
        }
    }

    /// Accept a comment from a peer, storing it or forwarding it to the
    /// origin of its post.
    pub async fn receive_comment(
        &self,
        envelope: &Envelope,
        hops: u32,
    ) -> Result<Delivery<Stored>, FederationError> {
        let envelope = envelope.validate_comment()?;
        let post_id = envelope
            .post_id
            .clone()
            .ok_or_else(|| FederationError::Validation {
                reason: "Missing required fields: post_id".to_string(),
            })?;

        let sender = envelope.federated_from.as_str();
        match authority::resolve(&self.store, &post_id, Some(sender))? {
            Resolution::Relay { origin } => {
                let next = self.relay.next_hop(hops, &origin)?;
                let content = self.open_envelope(&envelope)?;
                let identity = self.relay.fetch_public_key(&origin).await?;
                let resealed = self.engine.encrypt_for_peer(&content, &identity)?;

                info!(post_id = %post_id, origin = %origin, hops = next, "Forwarding comment to origin");
                let response = self
                    .relay
                    .send_envelope(&origin, RECEIVE_COMMENT_PATH, &envelope.to_wire(resealed), next)
                    .await?;
                Ok(Delivery::Forwarded(response))
            }
            Resolution::LocalNew | Resolution::LocalOrigin => {
                let content = self.open_envelope(&envelope)?;
                self.verify_inbound(&envelope, &content).await?;

                let canonical = canonical_string(envelope.timestamp, &envelope.author, &content);
                let comment = Comment {
                    id: envelope.id.clone().unwrap_or_else(|| {
                        comment_id(&envelope.federated_from, &post_id, &canonical)
                    }),
                    post_id,
                    author: envelope.author.clone(),
                    content,
                    timestamp: envelope.timestamp,
                    signature: envelope.signature.clone(),
                    upvotes: 0,
                    federated_from: Some(envelope.federated_from.clone()),
                };

                match self.store.save_comment(&comment) {
                    Ok(id) => {
                        info!(
                            comment_id = %id,
                            post_id = %comment.post_id,
                            sender = %envelope.federated_from,
                            "Federated comment stored"
                        );
                        Ok(Delivery::Applied(Stored { id, created: true }))
                    }
                    Err(StorageError::AlreadyExists { id, .. }) => {
                        Ok(Delivery::Applied(Stored { id, created: false }))
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    /// Accept a vote from a peer, applying it here if this instance is the
    /// origin of the post, or forwarding it otherwise.
    pub async fn receive_vote(
        &self,
        vote: &VoteEnvelope,
        hops: u32,
    ) -> Result<Delivery<VoteOutcome>, FederationError> {
        let valid = vote.validate()?;

        let sender = valid.voter_host.as_str();
        match authority::resolve(&self.store, &valid.post_id, Some(sender))? {
            Resolution::LocalNew => Err(FederationError::NotFound {
                what: "Post",
                id: valid.post_id,
            }),
            Resolution::LocalOrigin => Ok(Delivery::Applied(self.apply_vote(
                &valid.post_id,
                &valid.voter,
                valid.vote_type,
            )?)),
            Resolution::Relay { origin } => {
                let next = self.relay.next_hop(hops, &origin)?;
                info!(post_id = %valid.post_id, origin = %origin, hops = next, "Forwarding vote to origin");
                let response = self.relay.send_vote(&origin, vote, next).await?;
                Ok(Delivery::Forwarded(response))
            }
        }
    }

    // ----- reads -----

    /// Ranked local feed
    pub fn feed(&self) -> Result<Vec<FeedPost>, FederationError> {
        Ok(feed::local_feed(&self.store)?)
    }

    /// Local feed plus every reachable peer's local feed
    pub async fn federated_feed(&self) -> Result<Vec<FeedPost>, FederationError> {
        Ok(feed::federated_feed(&self.store, &self.relay).await?)
    }

    pub fn get_post(&self, post_id: &str) -> Result<FeedPost, FederationError> {
        let post = self
            .store
            .get_post_by_id(post_id)?
            .ok_or_else(|| FederationError::NotFound {
                what: "Post",
                id: post_id.to_string(),
            })?;
        let comments = self.store.get_comments_for_post(post_id)?;
        Ok(FeedPost { post, comments })
    }

    // ----- peers -----

    pub fn add_peer(&self, url: &str) -> Result<(), FederationError> {
        let url = url.trim().trim_end_matches('/');
        if url.is_empty() {
            return Err(FederationError::Validation {
                reason: "Server URL is required".to_string(),
            });
        }

        if self.store.add_server(url)? {
            info!(peer = %url, "Peer added");
            Ok(())
        } else {
            Err(FederationError::Validation {
                reason: format!("Server {} already exists", url),
            })
        }
    }

    pub fn list_peers(&self) -> Result<Vec<Peer>, FederationError> {
        Ok(self.store.get_all_servers()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerError;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir, public_host: &str) -> NodeConfig {
        let path = |name: &str| temp_dir.path().join(name).to_string_lossy().to_string();
        NodeConfig {
            db_path: path("db"),
            public_host: public_host.to_string(),
            private_key_file: path("private.pem"),
            public_key_file: path("public.pem"),
            abuse: AbuseConfig {
                burst_limit: 3,
                ..Default::default()
            },
            relay: RelayConfig {
                peer_timeout_ms: 500,
                max_relay_hops: 2,
                ..Default::default()
            },
        }
    }

    fn test_node(temp_dir: &TempDir, public_host: &str) -> RssxNode {
        RssxNode::new(test_config(temp_dir, public_host)).unwrap()
    }

    /// Envelope for `post`, sealed for `recipient`.
    fn envelope_for(sender: &RssxNode, recipient: &RssxNode, post: &Post) -> Envelope {
        Envelope {
            id: Some(post.id.clone()),
            author: Some(post.author.clone()),
            timestamp: Some(post.timestamp),
            content: Some(
                sender
                    .engine()
                    .encrypt_for_peer(&post.content, recipient.engine().public_identity())
                    .unwrap(),
            ),
            signature: Some(post.signature.clone()),
            federated_from: Some(sender.public_host().to_string()),
            post_id: None,
        }
    }

    #[test]
    fn test_node_config() {
        let config = NodeConfig::default();
        assert_eq!(config.db_path, "rssx_data");
        assert_eq!(config.public_host, "127.0.0.1:5000");
        assert_eq!(config.abuse.burst_limit, 5);
    }

    #[tokio::test]
    async fn test_create_post_is_signed() {
        let temp_dir = TempDir::new().unwrap();
        let node = test_node(&temp_dir, "a.example");
        node.register("alice", "hash").unwrap();

        let post = node.create_post("alice", "hello").await.unwrap();
        assert!(post.is_origin_copy());
        assert!(node
            .engine()
            .verify_local(&post.canonical_string(), &post.signature));
        assert_eq!(node.get_post(&post.id).unwrap().post, post);
    }

    #[tokio::test]
    async fn test_create_post_validation_and_abuse() {
        let temp_dir = TempDir::new().unwrap();
        let node = test_node(&temp_dir, "a.example");

        assert_eq!(
            node.create_post("alice", "   ").await.unwrap_err().status_code(),
            400
        );

        node.create_post("alice", "one").await.unwrap();
        assert_eq!(
            node.create_post("alice", "one").await.unwrap_err().status_code(),
            400
        );
        node.create_post("alice", "two").await.unwrap();

        let limited = node.create_post("alice", "three").await.unwrap_err();
        assert_eq!(limited.status_code(), 429);
    }

    #[tokio::test]
    async fn test_register_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let node = test_node(&temp_dir, "a.example");

        node.register("alice", "hash").unwrap();
        assert!(matches!(
            node.register("alice", "hash"),
            Err(FederationError::Conflict { .. })
        ));
        assert!(matches!(
            node.register("bob@b.example", "hash"),
            Err(FederationError::Validation { .. })
        ));
        assert_eq!(node.profile("alice").unwrap().popularity, 0);
        assert!(node.profile("nobody").is_err());
    }

    #[tokio::test]
    async fn test_local_votes() {
        let temp_dir = TempDir::new().unwrap();
        let node = test_node(&temp_dir, "a.example");
        node.register("alice", "hash").unwrap();
        let post = node.create_post("alice", "hello").await.unwrap();

        match node.vote("bob", &post.id, VoteType::Upvote).await.unwrap() {
            Delivery::Applied(outcome) => assert_eq!(outcome.upvotes, 1),
            other => panic!("Expected local vote, got {:?}", other),
        }
        assert_eq!(node.profile("alice").unwrap().popularity, 1);

        let again = node.vote("bob", &post.id, VoteType::Upvote).await;
        assert!(matches!(
            again,
            Err(FederationError::Vote {
                source: LedgerError::AlreadyVoted { .. }
            })
        ));

        assert!(matches!(
            node.vote("bob", "missing", VoteType::Upvote).await,
            Err(FederationError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_comment_on_unknown_post_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let node = test_node(&temp_dir, "a.example");

        let result = node.create_comment("alice", "missing", "hi").await;
        assert_eq!(result.unwrap_err().status_code(), 404);
    }

    #[tokio::test]
    async fn test_comment_retry_after_wrong_post_id() {
        let temp_dir = TempDir::new().unwrap();
        let node = test_node(&temp_dir, "a.example");
        let post = node.create_post("alice", "hello").await.unwrap();

        for _ in 0..3 {
            let result = node.create_comment("bob", "typo-id", "nice").await;
            assert_eq!(result.unwrap_err().status_code(), 404);
        }

        // Neither the duplicate memory nor the rate window saw the misses
        match node.create_comment("bob", &post.id, "nice").await.unwrap() {
            Delivery::Applied(comment) => assert_eq!(comment.content, "nice"),
            other => panic!("Expected local comment, got {:?}", other),
        }
        assert_eq!(node.get_post(&post.id).unwrap().comments.len(), 1);
    }

    #[tokio::test]
    async fn test_local_comment_on_own_post() {
        let temp_dir = TempDir::new().unwrap();
        let node = test_node(&temp_dir, "a.example");
        let post = node.create_post("alice", "hello").await.unwrap();

        match node.create_comment("bob", &post.id, "nice").await.unwrap() {
            Delivery::Applied(comment) => {
                assert_eq!(comment.post_id, post.id);
                assert!(comment.federated_from.is_none());
            }
            other => panic!("Expected local comment, got {:?}", other),
        }
        assert_eq!(node.get_post(&post.id).unwrap().comments.len(), 1);
    }

    #[tokio::test]
    async fn test_receive_post_stores_copy_once() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let a = test_node(&dir_a, "a.example");
        let b = test_node(&dir_b, "b.example");

        let post = a.create_post("alice", "hello").await.unwrap();
        let envelope = envelope_for(&a, &b, &post);

        let stored = b.receive_post(&envelope).await.unwrap();
        assert_eq!(stored, Stored { id: post.id.clone(), created: true });

        let copy = b.get_post(&post.id).unwrap().post;
        assert_eq!(copy.content, "hello");
        assert_eq!(copy.federated_from.as_deref(), Some("a.example"));
        assert_eq!(copy.signature, post.signature);

        let again = b.receive_post(&envelope).await.unwrap();
        assert!(!again.created);
        assert_eq!(b.feed().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_receive_post_rejects_bad_envelopes() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let a = test_node(&dir_a, "a.example");
        let b = test_node(&dir_b, "b.example");
        let post = a.create_post("alice", "hello").await.unwrap();

        let missing = Envelope {
            signature: None,
            ..envelope_for(&a, &b, &post)
        };
        assert_eq!(b.receive_post(&missing).await.unwrap_err().status_code(), 400);

        // Sealed for A, not for B
        let misaddressed = envelope_for(&a, &a, &post);
        assert!(matches!(
            b.receive_post(&misaddressed).await,
            Err(FederationError::Decryption { .. })
        ));
        assert!(b.feed().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_origin_applies_federated_downvote() {
        let temp_dir = TempDir::new().unwrap();
        let node = test_node(&temp_dir, "a.example");
        node.register("alice", "hash").unwrap();
        let post = node.create_post("alice", "hello").await.unwrap();

        let vote = VoteEnvelope::new(&post.id, VoteType::Downvote, "bob@b.example".to_string());
        match node.receive_vote(&vote, 0).await.unwrap() {
            Delivery::Applied(outcome) => {
                assert_eq!((outcome.upvotes, outcome.downvotes), (0, 1));
                assert!(outcome.spam);
            }
            other => panic!("Expected local vote, got {:?}", other),
        }
        assert_eq!(node.profile("alice").unwrap().popularity, 0);
    }

    #[tokio::test]
    async fn test_receive_vote_validation() {
        let temp_dir = TempDir::new().unwrap();
        let node = test_node(&temp_dir, "a.example");

        let unknown = VoteEnvelope::new("missing", VoteType::Upvote, "bob@b.example".to_string());
        assert_eq!(node.receive_vote(&unknown, 0).await.unwrap_err().status_code(), 404);

        let incomplete = VoteEnvelope::default();
        assert_eq!(
            node.receive_vote(&incomplete, 0).await.unwrap_err().status_code(),
            400
        );
    }

    #[tokio::test]
    async fn test_receive_comment_on_unknown_post_is_stored() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let a = test_node(&dir_a, "a.example");
        let b = test_node(&dir_b, "b.example");

        let post = a.create_post("alice", "a comment").await.unwrap();
        let envelope = Envelope {
            id: Some("c1".to_string()),
            post_id: Some("elsewhere".to_string()),
            ..envelope_for(&a, &b, &post)
        };

        match b.receive_comment(&envelope, 0).await.unwrap() {
            Delivery::Applied(stored) => assert_eq!(stored.id, "c1"),
            other => panic!("Expected stored comment, got {:?}", other),
        }
        let comment = b.store().get_comment("c1").unwrap().unwrap();
        assert_eq!(comment.federated_from.as_deref(), Some("a.example"));
        assert_eq!(comment.content, "a comment");
    }

    #[tokio::test]
    async fn test_receive_comment_with_separator_in_id_is_refused() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let a = test_node(&dir_a, "a.example");
        let b = test_node(&dir_b, "b.example");

        let post = b.create_post("bob", "hello").await.unwrap();
        let note = a.create_post("alice", "a comment").await.unwrap();
        let envelope = Envelope {
            id: Some("evil\u{0}x".to_string()),
            post_id: Some(post.id.clone()),
            ..envelope_for(&a, &b, &note)
        };

        let result = b.receive_comment(&envelope, 0).await;
        assert!(matches!(result, Err(FederationError::Protocol { .. })));
        assert_eq!(result.unwrap_err().status_code(), 400);

        assert!(b.get_post(&post.id).unwrap().comments.is_empty());
        assert_eq!(b.feed().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_relay_failure_leaves_store_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let node = test_node(&temp_dir, "b.example");

        let copy = Post {
            id: "p1".to_string(),
            author: "alice".to_string(),
            content: "hello".to_string(),
            timestamp: 100,
            signature: String::new(),
            upvotes: 0,
            downvotes: 0,
            spam: false,
            federated_from: Some("127.0.0.1:1".to_string()),
        };
        node.store().save_post(&copy).unwrap();

        let result = node.vote("bob", "p1", VoteType::Upvote).await;
        assert!(matches!(result, Err(FederationError::AuthorityRelay { .. })));

        let comment = node.create_comment("bob", "p1", "hi").await;
        assert_eq!(comment.unwrap_err().status_code(), 502);

        assert_eq!(node.get_post("p1").unwrap().post, copy);
        assert!(node.get_post("p1").unwrap().comments.is_empty());
        assert!(node.store().get_vote("p1", "bob").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_forward_refused_at_hop_limit() {
        let temp_dir = TempDir::new().unwrap();
        let node = test_node(&temp_dir, "b.example");
        let copy = Post {
            id: "p1".to_string(),
            author: "alice".to_string(),
            content: "hello".to_string(),
            timestamp: 100,
            signature: String::new(),
            upvotes: 0,
            downvotes: 0,
            spam: false,
            federated_from: Some("a.example".to_string()),
        };
        node.store().save_post(&copy).unwrap();

        let vote = VoteEnvelope::new("p1", VoteType::Upvote, "carol@c.example".to_string());
        match node.receive_vote(&vote, 2).await {
            Err(FederationError::AuthorityRelay { origin, message, .. }) => {
                assert_eq!(origin, "a.example");
                assert!(message.contains("hop limit"));
            }
            other => panic!("Expected hop limit error, got {:?}", other),
        }
        assert_eq!(node.relay_stats().delivery_failures, 0);
    }

    #[tokio::test]
    async fn test_add_peer() {
        let temp_dir = TempDir::new().unwrap();
        let node = test_node(&temp_dir, "a.example");

        node.add_peer("http://b.example/").unwrap();
        assert!(node.add_peer("http://b.example").is_err());
        assert!(node.add_peer("  ").is_err());

        let peers = node.list_peers().unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].url, "http://b.example");
    }
}
