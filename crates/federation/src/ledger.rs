//! Vote Ledger
//!
//! At most one vote row exists per `(content, voter)`. The transition table:
//!
//! | current    | requested | result                      | popularity |
//! |------------|-----------|-----------------------------|------------|
//! | none       | upvote    | upvoted, `upvotes + 1`      | +1         |
//! | none       | downvote  | downvoted, `downvotes + 1`  | 0          |
//! | upvoted    | downvote  | toggle, `-1 up / +1 down`   | -1         |
//! | downvoted  | upvote    | toggle, `-1 down / +1 up`   | +1         |
//! | upvoted    | upvote    | rejected                    |            |
//! | downvoted  | downvote  | rejected                    |            |
//!
//! The table is pure; [`crate::storage::ContentStore::apply_vote`] applies it
//! to the vote row, the counters and the author in one transaction.

use rssx_protocol::VoteType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Already {vote_type}d this content")]
    AlreadyVoted { vote_type: VoteType },
}

/// An accepted state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub vote_type: VoteType,
    /// The vote this one replaces, when toggling
    pub superseded: Option<VoteType>,
    /// Change to the content author's popularity
    pub popularity_delta: i64,
}

pub fn transition(
    current: Option<VoteType>,
    requested: VoteType,
) -> Result<Transition, LedgerError> {
    if current == Some(requested) {
        return Err(LedgerError::AlreadyVoted {
            vote_type: requested,
        });
    }

    let popularity_delta = match (current, requested) {
        (_, VoteType::Upvote) => 1,
        (Some(VoteType::Upvote), VoteType::Downvote) => -1,
        (_, VoteType::Downvote) => 0,
    };

    Ok(Transition {
        vote_type: requested,
        superseded: current,
        popularity_delta,
    })
}

/// Post counters after a vote was applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteOutcome {
    pub post_id: String,
    pub vote_type: VoteType,
    pub toggled: bool,
    pub upvotes: u64,
    pub downvotes: u64,
    pub spam: bool,
}

impl Transition {
    /// Apply to a pair of counters.
    pub fn apply_counters(&self, upvotes: &mut u64, downvotes: &mut u64) {
        match self.superseded {
            Some(VoteType::Upvote) => *upvotes = upvotes.saturating_sub(1),
            Some(VoteType::Downvote) => *downvotes = downvotes.saturating_sub(1),
            None => {}
        }
        match self.vote_type {
            VoteType::Upvote => *upvotes += 1,
            VoteType::Downvote => *downvotes += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_votes() {
        let up = transition(None, VoteType::Upvote).unwrap();
        assert_eq!(up.superseded, None);
        assert_eq!(up.popularity_delta, 1);

        let down = transition(None, VoteType::Downvote).unwrap();
        assert_eq!(down.popularity_delta, 0);
    }

    #[test]
    fn test_reentry_is_rejected() {
        assert_eq!(
            transition(Some(VoteType::Upvote), VoteType::Upvote),
            Err(LedgerError::AlreadyVoted {
                vote_type: VoteType::Upvote
            })
        );
        assert!(transition(Some(VoteType::Downvote), VoteType::Downvote).is_err());
    }

    #[test]
    fn test_toggle_round_trip_nets_to_zero() {
        let (mut up, mut down) = (0u64, 0u64);
        let mut popularity = 0i64;
        let mut state = None;

        for requested in [VoteType::Upvote, VoteType::Downvote, VoteType::Upvote] {
            let t = transition(state, requested).unwrap();
            t.apply_counters(&mut up, &mut down);
            popularity += t.popularity_delta;
            state = Some(requested);
        }

        // Back to the state after the first upvote
        assert_eq!((up, down), (1, 0));
        assert_eq!(popularity, 1);
    }

    #[test]
    fn test_counters_saturate() {
        let t = transition(Some(VoteType::Upvote), VoteType::Downvote).unwrap();
        let (mut up, mut down) = (0u64, 0u64);
        t.apply_counters(&mut up, &mut down);
        assert_eq!((up, down), (0, 1));
    }
}
