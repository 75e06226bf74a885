//! Peer wire types.
//!
//! Inbound bodies are deserialized with every field optional so that all
//! missing fields can be reported at once, before any decryption happens.
//! An empty string counts as missing.

use serde::{Deserialize, Serialize};

use crate::content::{split_voter, FeedPost, VoteType};
use crate::errors::ProtocolError;

/// Body of `POST /receive_post` and `POST /receive_comment`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    /// Origin-assigned id of the carried post or comment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Base64 ciphertext sealed for the receiving instance
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub federated_from: Option<String>,
    /// Parent post, comments only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
}

/// An envelope whose required fields are all present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidEnvelope {
    pub id: Option<String>,
    pub author: String,
    pub timestamp: i64,
    pub sealed_content: String,
    pub signature: String,
    pub federated_from: String,
    pub post_id: Option<String>,
}

impl ValidEnvelope {
    /// Rebuild the wire form, with a replacement sealed content.
    pub fn to_wire(&self, sealed_content: String) -> Envelope {
        Envelope {
            id: self.id.clone(),
            author: Some(self.author.clone()),
            timestamp: Some(self.timestamp),
            content: Some(sealed_content),
            signature: Some(self.signature.clone()),
            federated_from: Some(self.federated_from.clone()),
            post_id: self.post_id.clone(),
        }
    }
}

fn present(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

/// Ids and voters become store keys; control characters are not allowed.
fn check_key_field(field: &'static str, value: Option<&str>) -> Result<(), ProtocolError> {
    match value {
        Some(v) if v.chars().any(char::is_control) => Err(ProtocolError::InvalidField {
            field,
            reason: "must not contain control characters".to_string(),
        }),
        _ => Ok(()),
    }
}

impl Envelope {
    /// Validate as a post envelope.
    pub fn validate_post(&self) -> Result<ValidEnvelope, ProtocolError> {
        self.validate(false)
    }

    /// Validate as a comment envelope (`post_id` required).
    pub fn validate_comment(&self) -> Result<ValidEnvelope, ProtocolError> {
        self.validate(true)
    }

    fn validate(&self, needs_post_id: bool) -> Result<ValidEnvelope, ProtocolError> {
        let author = present(&self.author);
        let content = present(&self.content);
        let signature = present(&self.signature);
        let federated_from = present(&self.federated_from);
        let post_id = present(&self.post_id);

        let mut missing = Vec::new();
        if author.is_none() {
            missing.push("author");
        }
        if self.timestamp.is_none() {
            missing.push("timestamp");
        }
        if content.is_none() {
            missing.push("content");
        }
        if signature.is_none() {
            missing.push("signature");
        }
        if federated_from.is_none() {
            missing.push("federated_from");
        }
        if needs_post_id && post_id.is_none() {
            missing.push("post_id");
        }

        if !missing.is_empty() {
            return Err(ProtocolError::MissingFields { fields: missing });
        }

        let id = present(&self.id);
        check_key_field("id", id.as_deref())?;
        check_key_field("post_id", post_id.as_deref())?;

        match (author, self.timestamp, content, signature, federated_from) {
            (Some(author), Some(timestamp), Some(sealed_content), Some(signature), Some(federated_from)) => {
                Ok(ValidEnvelope {
                    id,
                    author,
                    timestamp,
                    sealed_content,
                    signature,
                    federated_from,
                    post_id: if needs_post_id { post_id } else { None },
                })
            }
            _ => Err(ProtocolError::MissingFields { fields: missing }),
        }
    }
}

/// Body of `POST /receive_vote`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteEnvelope {
    #[serde(default)]
    pub post_id: Option<String>,
    #[serde(default)]
    pub vote_type: Option<String>,
    /// `user@origin-host`
    #[serde(default)]
    pub voter: Option<String>,
}

/// A vote envelope with all fields present and well formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidVote {
    pub post_id: String,
    pub vote_type: VoteType,
    pub voter: String,
    /// Host part of `voter`, i.e. the sending instance
    pub voter_host: String,
}

impl VoteEnvelope {
    pub fn new(post_id: &str, vote_type: VoteType, voter: String) -> Self {
        Self {
            post_id: Some(post_id.to_string()),
            vote_type: Some(vote_type.as_str().to_string()),
            voter: Some(voter),
        }
    }

    pub fn validate(&self) -> Result<ValidVote, ProtocolError> {
        let post_id = present(&self.post_id);
        let vote_type = present(&self.vote_type);
        let voter = present(&self.voter);

        let (post_id, vote_type, voter) = match (post_id, vote_type, voter) {
            (Some(p), Some(t), Some(v)) => (p, t, v),
            (p, t, v) => {
                let mut fields = Vec::new();
                if p.is_none() {
                    fields.push("post_id");
                }
                if t.is_none() {
                    fields.push("vote_type");
                }
                if v.is_none() {
                    fields.push("voter");
                }
                return Err(ProtocolError::MissingFields { fields });
            }
        };

        check_key_field("post_id", Some(&post_id))?;
        check_key_field("voter", Some(&voter))?;

        let vote_type: VoteType = vote_type.parse()?;
        let voter_host = split_voter(&voter)
            .map(|(_, host)| host.to_string())
            .ok_or_else(|| ProtocolError::InvalidField {
                field: "voter",
                reason: format!("expected user@host, got '{}'", voter),
            })?;

        Ok(ValidVote {
            post_id,
            vote_type,
            voter,
            voter_host,
        })
    }
}

/// Response of `GET /public_key`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicKeyResponse {
    /// PEM-armoured instance public key
    pub public_key: String,
}

/// Response of `GET /feed`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedResponse {
    pub posts: Vec<FeedPost>,
}
