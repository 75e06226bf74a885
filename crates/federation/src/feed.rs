//! Feed Ranking Engine
//!
//! Local posts are ordered by author popularity, then upvotes, then recency.
//! Authors without a local account rank with popularity 0. The federated
//! feed appends each reachable peer's local feed in peer order, without
//! removing duplicates.

use rssx_protocol::{Comment, FeedPost, Post};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::warn;

use crate::relay::FederationRelay;
use crate::storage::{ContentStore, StorageError};

/// Sort posts for display.
pub fn rank_posts(mut posts: Vec<Post>, popularity: &HashMap<String, i64>) -> Vec<Post> {
    let score = |post: &Post| popularity.get(&post.author).copied().unwrap_or(0);

    posts.sort_by(|a, b| {
        score(b)
            .cmp(&score(a))
            .then_with(|| b.upvotes.cmp(&a.upvotes))
            .then_with(|| b.timestamp.cmp(&a.timestamp))
            .then_with(|| a.id.cmp(&b.id))
    });
    posts
}

/// Compare two comments for display, oldest first.
fn comment_order(a: &Comment, b: &Comment) -> Ordering {
    a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id))
}

/// The ranked local feed with comments attached.
pub fn local_feed(store: &ContentStore) -> Result<Vec<FeedPost>, StorageError> {
    let posts = store.get_all_posts()?;

    let mut popularity = HashMap::new();
    for post in &posts {
        if popularity.contains_key(&post.author) {
            continue;
        }
        let score = store
            .get_user(&post.author)?
            .map(|user| user.popularity)
            .unwrap_or(0);
        popularity.insert(post.author.clone(), score);
    }

    let mut feed = Vec::with_capacity(posts.len());
    for post in rank_posts(posts, &popularity) {
        let mut comments = store.get_comments_for_post(&post.id)?;
        comments.sort_by(comment_order);
        feed.push(FeedPost { post, comments });
    }
    Ok(feed)
}

/// Local feed followed by every reachable peer's local feed.
///
/// Peers are queried one after another; an unreachable peer is left out
/// and logged. A successful fetch records the peer's sync time.
pub async fn federated_feed(
    store: &ContentStore,
    relay: &FederationRelay,
) -> Result<Vec<FeedPost>, StorageError> {
    let mut feed = local_feed(store)?;

    for peer in store.get_all_servers()? {
        match relay.fetch_feed(&peer.url).await {
            Ok(posts) => {
                feed.extend(posts);
                store.touch_server(&peer.url, chrono::Utc::now().timestamp())?;
            }
            Err(e) => warn!(peer = %peer.url, "Skipping peer feed: {}", e),
        }
    }

    Ok(feed)
}
