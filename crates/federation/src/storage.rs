//! Content Store Module
//!
//! Persistent storage for users, posts, comments, the vote ledger and the
//! peer list, backed by sled. Records are stored as JSON.
//!
//! Trees:
//! - `users`: username -> User
//! - `posts`: post id -> Post
//! - `comments`: comment id -> Comment
//! - `comment_index`: post id, 0, sortable timestamp, comment id -> comment id
//! - `votes`: content id, 0, voter -> Vote
//! - `servers`: insertion id -> Peer
//! - `server_urls`: url -> insertion id

use rssx_protocol::{Comment, Peer, Post, User, Vote, VoteType};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::ledger::{self, LedgerError, VoteOutcome};

/// Storage-related errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {source}")]
    DatabaseError { source: sled::Error },

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("{what} already exists: {id}")]
    AlreadyExists { what: &'static str, id: String },

    #[error("Serialization error: {source}")]
    SerializationError { source: serde_json::Error },

    #[error("Invalid {what} id: {id:?}")]
    InvalidKey { what: &'static str, id: String },

    #[error("Corrupt record: {reason}")]
    CorruptRecord { reason: String },
}

impl From<sled::Error> for StorageError {
    fn from(source: sled::Error) -> Self {
        StorageError::DatabaseError { source }
    }
}

impl From<TransactionError<StorageError>> for StorageError {
    fn from(err: TransactionError<StorageError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(source) => StorageError::DatabaseError { source },
        }
    }
}

#[derive(Debug)]
enum VoteAbort {
    Ledger(LedgerError),
    Store(StorageError),
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|e| StorageError::SerializationError { source: e })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::SerializationError { source: e })
}

/// Ids are joined with NUL separators in index keys.
fn check_key(what: &'static str, id: &str) -> Result<(), StorageError> {
    if id.is_empty() || id.contains('\0') {
        return Err(StorageError::InvalidKey {
            what,
            id: id.to_string(),
        });
    }
    Ok(())
}

fn vote_key(content_id: &str, voter: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(content_id.len() + voter.len() + 1);
    key.extend_from_slice(content_id.as_bytes());
    key.push(0);
    key.extend_from_slice(voter.as_bytes());
    key
}

fn comment_index_prefix(post_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(post_id.len() + 1);
    key.extend_from_slice(post_id.as_bytes());
    key.push(0);
    key
}

fn comment_index_key(comment: &Comment) -> Vec<u8> {
    let mut key = comment_index_prefix(&comment.post_id);
    // Flip the sign bit so negative timestamps still sort first
    let sortable = (comment.timestamp as u64) ^ (1u64 << 63);
    key.extend_from_slice(&sortable.to_be_bytes());
    key.push(0);
    key.extend_from_slice(comment.id.as_bytes());
    key
}

/// Persistent store for one instance
#[derive(Clone)]
pub struct ContentStore {
    db: Db,
    users: Tree,
    posts: Tree,
    comments: Tree,
    comment_index: Tree,
    votes: Tree,
    servers: Tree,
    server_urls: Tree,
}

impl ContentStore {
    /// Create or open a store at the given path
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        let db = sled::open(db_path)?;

        Ok(ContentStore {
            users: db.open_tree("users")?,
            posts: db.open_tree("posts")?,
            comments: db.open_tree("comments")?,
            comment_index: db.open_tree("comment_index")?,
            votes: db.open_tree("votes")?,
            servers: db.open_tree("servers")?,
            server_urls: db.open_tree("server_urls")?,
            db,
        })
    }

    // ----- users -----

    pub fn get_user(&self, username: &str) -> Result<Option<User>, StorageError> {
        match self.users.get(username)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Register a user. Fails with `AlreadyExists` if the name is taken.
    pub fn save_user(&self, username: &str, password_hash: &str) -> Result<User, StorageError> {
        let user = User {
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: chrono::Utc::now().timestamp(),
            last_login: None,
            popularity: 0,
        };

        self.users
            .compare_and_swap(username, None as Option<&[u8]>, Some(encode(&user)?))?
            .map_err(|_| StorageError::AlreadyExists {
                what: "User",
                id: username.to_string(),
            })?;
        self.db.flush()?;

        Ok(user)
    }

    pub fn update_login_time(&self, username: &str) -> Result<(), StorageError> {
        let now = chrono::Utc::now().timestamp();

        let result: Result<(), TransactionError<StorageError>> = self.users.transaction(|tx| {
            let bytes = tx.get(username)?.ok_or_else(|| {
                ConflictableTransactionError::Abort(StorageError::NotFound {
                    what: "User",
                    id: username.to_string(),
                })
            })?;
            let mut user: User = decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
            user.last_login = Some(now);
            tx.insert(username, encode(&user).map_err(ConflictableTransactionError::Abort)?)?;
            Ok(())
        });

        result.map_err(StorageError::from)
    }

    // ----- posts -----

    /// Persist a post under its id. Never overwrites an existing post.
    pub fn save_post(&self, post: &Post) -> Result<String, StorageError> {
        check_key("Post", &post.id)?;
        self.posts
            .compare_and_swap(&post.id, None as Option<&[u8]>, Some(encode(post)?))?
            .map_err(|_| StorageError::AlreadyExists {
                what: "Post",
                id: post.id.clone(),
            })?;
        self.db.flush()?;

        debug!(post_id = %post.id, "Post stored");
        Ok(post.id.clone())
    }

    pub fn get_post_by_id(&self, post_id: &str) -> Result<Option<Post>, StorageError> {
        match self.posts.get(post_id)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All posts, unranked
    pub fn get_all_posts(&self) -> Result<Vec<Post>, StorageError> {
        let mut posts = Vec::new();
        for result in self.posts.iter() {
            let (_, bytes) = result?;
            posts.push(decode(&bytes)?);
        }
        Ok(posts)
    }

    /// Replace the content of an existing post.
    pub fn update_post(&self, post_id: &str, content: &str) -> Result<(), StorageError> {
        let result: Result<(), TransactionError<StorageError>> = self.posts.transaction(|tx| {
            let bytes = tx.get(post_id)?.ok_or_else(|| {
                ConflictableTransactionError::Abort(StorageError::NotFound {
                    what: "Post",
                    id: post_id.to_string(),
                })
            })?;
            let mut post: Post = decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
            post.content = content.to_string();
            tx.insert(post_id, encode(&post).map_err(ConflictableTransactionError::Abort)?)?;
            Ok(())
        });

        result.map_err(StorageError::from)
    }

    // ----- comments -----

    /// Persist a comment under its id. Never overwrites an existing comment.
    pub fn save_comment(&self, comment: &Comment) -> Result<String, StorageError> {
        check_key("Comment", &comment.id)?;
        check_key("Post", &comment.post_id)?;
        let record = encode(comment)?;
        let index_key = comment_index_key(comment);

        let result: Result<(), TransactionError<StorageError>> =
            (&self.comments, &self.comment_index).transaction(|(comments, index)| {
                if comments.get(comment.id.as_bytes())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(
                        StorageError::AlreadyExists {
                            what: "Comment",
                            id: comment.id.clone(),
                        },
                    ));
                }
                comments.insert(comment.id.as_bytes(), record.clone())?;
                index.insert(index_key.clone(), comment.id.as_bytes())?;
                Ok(())
            });
        result.map_err(StorageError::from)?;
        self.db.flush()?;

        debug!(comment_id = %comment.id, post_id = %comment.post_id, "Comment stored");
        Ok(comment.id.clone())
    }

    pub fn get_comment(&self, comment_id: &str) -> Result<Option<Comment>, StorageError> {
        match self.comments.get(comment_id)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Comments of a post, oldest first
    pub fn get_comments_for_post(&self, post_id: &str) -> Result<Vec<Comment>, StorageError> {
        let mut comments = Vec::new();

        for result in self.comment_index.scan_prefix(comment_index_prefix(post_id)) {
            let (_, value) = result?;
            let comment_id =
                std::str::from_utf8(&value).map_err(|_| StorageError::CorruptRecord {
                    reason: "Invalid comment index entry".to_string(),
                })?;

            match self.get_comment(comment_id)? {
                Some(comment) => comments.push(comment),
                None => {
                    return Err(StorageError::CorruptRecord {
                        reason: format!("Index entry for missing comment {}", comment_id),
                    })
                }
            }
        }

        Ok(comments)
    }

    // ----- votes -----

    pub fn get_vote(&self, content_id: &str, voter: &str) -> Result<Option<Vote>, StorageError> {
        match self.votes.get(vote_key(content_id, voter))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Apply a vote to a post in one transaction: the vote row, the post
    /// counters and spam flag, and the author's popularity.
    ///
    /// The outer result carries storage failures, the inner one a vote the
    /// ledger refused.
    pub fn apply_vote(
        &self,
        post_id: &str,
        voter: &str,
        requested: VoteType,
    ) -> Result<Result<VoteOutcome, LedgerError>, StorageError> {
        check_key("Post", post_id)?;
        check_key("Voter", voter)?;
        let key = vote_key(post_id, voter);
        let store_abort = |e: StorageError| ConflictableTransactionError::Abort(VoteAbort::Store(e));

        let result: Result<VoteOutcome, TransactionError<VoteAbort>> =
            (&self.posts, &self.votes, &self.users).transaction(|(posts, votes, users)| {
                let post_bytes = posts.get(post_id)?.ok_or_else(|| {
                    store_abort(StorageError::NotFound {
                        what: "Post",
                        id: post_id.to_string(),
                    })
                })?;
                let mut post: Post = decode(&post_bytes).map_err(store_abort)?;

                let current = match votes.get(key.as_slice())? {
                    Some(bytes) => Some(decode::<Vote>(&bytes).map_err(store_abort)?.vote_type),
                    None => None,
                };

                let transition = ledger::transition(current, requested)
                    .map_err(|e| ConflictableTransactionError::Abort(VoteAbort::Ledger(e)))?;

                transition.apply_counters(&mut post.upvotes, &mut post.downvotes);
                post.spam = post.downvotes > post.upvotes;

                let vote = Vote {
                    content_id: post_id.to_string(),
                    voter: voter.to_string(),
                    vote_type: requested,
                };
                votes.insert(key.as_slice(), encode(&vote).map_err(store_abort)?)?;
                posts.insert(post_id, encode(&post).map_err(store_abort)?)?;

                if transition.popularity_delta != 0 {
                    // Authors of federated copies are not local users
                    if let Some(bytes) = users.get(post.author.as_bytes())? {
                        let mut author: User = decode(&bytes).map_err(store_abort)?;
                        author.popularity += transition.popularity_delta;
                        users.insert(post.author.as_bytes(), encode(&author).map_err(store_abort)?)?;
                    }
                }

                Ok(VoteOutcome {
                    post_id: post.id.clone(),
                    vote_type: requested,
                    toggled: transition.superseded.is_some(),
                    upvotes: post.upvotes,
                    downvotes: post.downvotes,
                    spam: post.spam,
                })
            });

        match result {
            Ok(outcome) => {
                self.db.flush()?;
                Ok(Ok(outcome))
            }
            Err(TransactionError::Abort(VoteAbort::Ledger(e))) => Ok(Err(e)),
            Err(TransactionError::Abort(VoteAbort::Store(e))) => Err(e),
            Err(TransactionError::Storage(source)) => Err(StorageError::DatabaseError { source }),
        }
    }

    // ----- servers -----

    /// Known peers in the order they were added
    pub fn get_all_servers(&self) -> Result<Vec<Peer>, StorageError> {
        let mut peers = Vec::new();
        for result in self.servers.iter() {
            let (_, bytes) = result?;
            peers.push(decode(&bytes)?);
        }
        Ok(peers)
    }

    /// Add a peer. Returns `false` if the url is already known.
    pub fn add_server(&self, url: &str) -> Result<bool, StorageError> {
        let id = self.db.generate_id()?.to_be_bytes();
        let record = encode(&Peer {
            url: url.to_string(),
            last_sync: None,
        })?;

        let added: Result<bool, TransactionError<StorageError>> =
            (&self.servers, &self.server_urls).transaction(|(servers, urls)| {
                if urls.get(url.as_bytes())?.is_some() {
                    return Ok(false);
                }
                urls.insert(url.as_bytes(), &id[..])?;
                servers.insert(&id[..], record.clone())?;
                Ok(true)
            });
        let added = added.map_err(StorageError::from)?;

        if added {
            self.db.flush()?;
        }
        Ok(added)
    }

    /// Record a successful sync with a peer.
    pub fn touch_server(&self, url: &str, timestamp: i64) -> Result<(), StorageError> {
        let result: Result<(), TransactionError<StorageError>> =
            (&self.servers, &self.server_urls).transaction(|(servers, urls)| {
                let id = urls.get(url.as_bytes())?.ok_or_else(|| {
                    ConflictableTransactionError::Abort(StorageError::NotFound {
                        what: "Server",
                        id: url.to_string(),
                    })
                })?;
                let bytes = servers.get(&id)?.ok_or_else(|| {
                    ConflictableTransactionError::Abort(StorageError::CorruptRecord {
                        reason: format!("Missing server record for {}", url),
                    })
                })?;
                let mut peer: Peer = decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
                peer.last_sync = Some(timestamp);
                servers.insert(id.clone(), encode(&peer).map_err(ConflictableTransactionError::Abort)?)?;
                Ok(())
            });

        result.map_err(StorageError::from)
    }
}
