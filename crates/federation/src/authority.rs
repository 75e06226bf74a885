//! Authority Resolver
//!
//! Decides, for an action on existing content, whether this instance owns
//! the content or must hand the action to the instance its copy came from.

use tracing::debug;

use crate::storage::{ContentStore, StorageError};

/// Where an action on a piece of content has to be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Unknown here: the inbound item is new federated content
    LocalNew,
    /// This instance is the origin: apply locally
    LocalOrigin,
    /// This instance holds a relayed copy: forward to `origin`
    Relay { origin: String },
}

impl Resolution {
    pub fn label(&self) -> &'static str {
        match self {
            Resolution::LocalNew => "local-new",
            Resolution::LocalOrigin => "local-origin",
            Resolution::Relay { .. } => "relay",
        }
    }
}

/// Resolve authority for `post_id`.
///
/// `sender` is the instance that delivered the action, or `None` for a
/// local user. Any stored copy tagged with `federated_from` is forwarded to
/// that instance, including when it is the sender itself; the hop limit on
/// forwarded requests bounds the resulting ping-pong.
pub fn resolve(
    store: &ContentStore,
    post_id: &str,
    sender: Option<&str>,
) -> Result<Resolution, StorageError> {
    let resolution = match store.get_post_by_id(post_id)? {
        None => Resolution::LocalNew,
        Some(post) => match post.federated_from {
            None => Resolution::LocalOrigin,
            Some(origin) => Resolution::Relay { origin },
        },
    };

    debug!(
        post_id = %post_id,
        sender = sender.unwrap_or("local"),
        resolution = resolution.label(),
        "Resolved content authority"
    );
    Ok(resolution)
}
