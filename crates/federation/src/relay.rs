//! Federation Relay Module
//!
//! HTTP client side of the peer wire protocol: fetching and caching peer
//! public keys, delivering envelopes to origins, forwarding actions with a
//! hop count, and fetching peers' local feeds. Nothing here is retried.

use anyhow::{Context, Result};
use reqwest::Client;
use rssx_crypto::PublicIdentity;
use rssx_protocol::{
    Envelope, FeedPost, FeedResponse, PublicKeyResponse, VoteEnvelope, RELAY_HOPS_HEADER,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::FederationError;

pub const PUBLIC_KEY_PATH: &str = "/api/public_key";
pub const RECEIVE_POST_PATH: &str = "/api/receive_post";
pub const RECEIVE_COMMENT_PATH: &str = "/api/receive_comment";
pub const RECEIVE_VOTE_PATH: &str = "/api/receive_vote";
pub const FEED_PATH: &str = "/api/feed";

/// Configuration for peer traffic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Timeout for every peer request (milliseconds)
    pub peer_timeout_ms: u64,
    /// Forwarded requests are refused once they carry this many hops
    pub max_relay_hops: u32,
    /// Verify inbound signatures against the sending instance's key
    pub verify_federated_signatures: bool,
    /// Deliver new local posts to every known peer
    pub push_posts_to_peers: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            peer_timeout_ms: 5000, // 5 seconds
            max_relay_hops: 8,
            verify_federated_signatures: false,
            push_posts_to_peers: false,
        }
    }
}

/// A successful (2xx) answer from a peer, passed back to our caller as is.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

/// Counters for monitoring peer traffic
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayStats {
    /// Envelopes and votes delivered or forwarded to an origin
    pub deliveries: u64,
    /// Deliveries that failed or were refused
    pub delivery_failures: u64,
    /// Peer feeds fetched successfully
    pub feeds_fetched: u64,
    /// Peer feeds that could not be fetched
    pub feed_failures: u64,
    /// Public keys fetched (cache misses)
    pub key_fetches: u64,
}

#[derive(Debug, Default)]
struct RelayCounters {
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
    feeds_fetched: AtomicU64,
    feed_failures: AtomicU64,
    key_fetches: AtomicU64,
}

/// Normalise a peer address into a base URL.
pub fn peer_base_url(peer: &str) -> String {
    let trimmed = peer.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

/// Truncate a ciphertext for logging.
pub fn ciphertext_prefix(ciphertext: &str) -> &str {
    match ciphertext.char_indices().nth(40) {
        Some((idx, _)) => &ciphertext[..idx],
        None => ciphertext,
    }
}

/// Peer-facing HTTP client
pub struct FederationRelay {
    config: RelayConfig,
    client: Client,
    keys: RwLock<HashMap<String, PublicIdentity>>,
    counters: RelayCounters,
}

impl FederationRelay {
    pub fn new(config: RelayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.peer_timeout_ms))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            client,
            keys: RwLock::new(HashMap::new()),
            counters: RelayCounters::default(),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Hop count to send with a forward of a request that arrived with
    /// `hops`, or a relay error once the limit is reached.
    pub fn next_hop(&self, hops: u32, origin: &str) -> Result<u32, FederationError> {
        if hops >= self.config.max_relay_hops {
            warn!(origin = %origin, hops, "Relay hop limit reached");
            return Err(FederationError::AuthorityRelay {
                origin: origin.to_string(),
                status: None,
                message: format!(
                    "relay hop limit of {} reached",
                    self.config.max_relay_hops
                ),
            });
        }
        Ok(hops + 1)
    }

    /// Public key of a peer, fetched once and then served from the cache.
    pub async fn fetch_public_key(&self, peer: &str) -> Result<PublicIdentity, FederationError> {
        let cache_key = peer_base_url(peer);
        if let Some(identity) = self
            .keys
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&cache_key)
        {
            return Ok(identity.clone());
        }

        let url = format!("{}{}", cache_key, PUBLIC_KEY_PATH);
        let unavailable = |message: String| FederationError::AuthorityRelay {
            origin: peer.to_string(),
            status: None,
            message: format!("public key unavailable: {}", message),
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| unavailable(e.to_string()))?;
        let body: PublicKeyResponse = response
            .json()
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let identity =
            PublicIdentity::from_pem(&body.public_key).map_err(|e| unavailable(e.to_string()))?;

        self.counters.key_fetches.fetch_add(1, Ordering::Relaxed);
        debug!(peer = %peer, fingerprint = %identity.fingerprint(), "Cached peer public key");

        self.keys
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(cache_key, identity.clone());
        Ok(identity)
    }

    /// Deliver a post or comment envelope to `target` at `path`.
    pub async fn send_envelope(
        &self,
        target: &str,
        path: &str,
        envelope: &Envelope,
        hops: u32,
    ) -> Result<RelayResponse, FederationError> {
        self.post_json(target, path, envelope, hops).await
    }

    /// Deliver a vote to `target`.
    pub async fn send_vote(
        &self,
        target: &str,
        vote: &VoteEnvelope,
        hops: u32,
    ) -> Result<RelayResponse, FederationError> {
        self.post_json(target, RECEIVE_VOTE_PATH, vote, hops).await
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        target: &str,
        path: &str,
        body: &T,
        hops: u32,
    ) -> Result<RelayResponse, FederationError> {
        let url = format!("{}{}", peer_base_url(target), path);
        debug!(url = %url, hops, "Sending to peer");

        let result = self.exchange(&url, target, body, hops).await;
        match &result {
            Ok(response) => {
                self.counters.deliveries.fetch_add(1, Ordering::Relaxed);
                info!(peer = %target, path, status = response.status, "Peer accepted delivery");
            }
            Err(e) => {
                self.counters.delivery_failures.fetch_add(1, Ordering::Relaxed);
                warn!(peer = %target, path, "Peer delivery failed: {}", e);
            }
        }
        result
    }

    async fn exchange<T: Serialize + ?Sized>(
        &self,
        url: &str,
        target: &str,
        body: &T,
        hops: u32,
    ) -> Result<RelayResponse, FederationError> {
        let response = self
            .client
            .post(url)
            .header(RELAY_HOPS_HEADER, hops.to_string())
            .json(body)
            .send()
            .await
            .map_err(|e| FederationError::AuthorityRelay {
                origin: target.to_string(),
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| FederationError::AuthorityRelay {
                origin: target.to_string(),
                status: Some(status),
                message: e.to_string(),
            })?;
        let body: serde_json::Value = serde_json::from_str(&text)
            .unwrap_or_else(|_| serde_json::json!({ "message": text }));

        if (200..300).contains(&status) {
            return Ok(RelayResponse { status, body });
        }

        let message = body
            .get("error")
            .and_then(|e| e.as_str())
            .map(str::to_string)
            .unwrap_or(text);
        Err(FederationError::AuthorityRelay {
            origin: target.to_string(),
            status: Some(status),
            message,
        })
    }

    /// Fetch a peer's local feed.
    pub async fn fetch_feed(&self, peer: &str) -> Result<Vec<FeedPost>, FederationError> {
        let url = format!("{}{}", peer_base_url(peer), FEED_PATH);

        let result = async {
            let response = self.client.get(&url).send().await?.error_for_status()?;
            response.json::<FeedResponse>().await
        }
        .await;

        match result {
            Ok(feed) => {
                self.counters.feeds_fetched.fetch_add(1, Ordering::Relaxed);
                debug!(peer = %peer, posts = feed.posts.len(), "Fetched peer feed");
                Ok(feed.posts)
            }
            Err(e) => {
                self.counters.feed_failures.fetch_add(1, Ordering::Relaxed);
                Err(FederationError::AuthorityRelay {
                    origin: peer.to_string(),
                    status: e.status().map(|s| s.as_u16()),
                    message: e.to_string(),
                })
            }
        }
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            deliveries: self.counters.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.counters.delivery_failures.load(Ordering::Relaxed),
            feeds_fetched: self.counters.feeds_fetched.load(Ordering::Relaxed),
            feed_failures: self.counters.feed_failures.load(Ordering::Relaxed),
            key_fetches: self.counters.key_fetches.load(Ordering::Relaxed),
        }
    }
}
