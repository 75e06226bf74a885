//! Abuse Gate
//!
//! Per-user sliding window rate limiting, duplicate suppression and a term
//! blocklist for locally authored posts and comments. State is per process
//! and starts empty on every restart.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Abuse gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AbuseConfig {
    /// Actions allowed per user and kind within one window
    pub burst_limit: usize,
    /// Window length in seconds
    pub window_secs: u64,
    /// Case-insensitive terms that reject content containing them
    pub blocked_terms: Vec<String>,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            burst_limit: 5,
            window_secs: 60,
            blocked_terms: Vec::new(),
        }
    }
}

/// What a user is trying to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Post,
    Comment,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Post => f.write_str("post"),
            ActionKind::Comment => f.write_str("comment"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AbuseRejection {
    #[error("Too many {kind}s, slow down")]
    RateLimited { kind: ActionKind },

    #[error("Duplicate {kind} rejected")]
    Duplicate { kind: ActionKind },

    #[error("Content contains a blocked term")]
    Blocked { term: String },
}

#[derive(Debug, Default)]
struct UserWindow {
    recent: VecDeque<Instant>,
    last_content: Option<String>,
}

/// Process-wide gate shared by all request handlers
#[derive(Debug)]
pub struct AbuseGate {
    config: AbuseConfig,
    blocked_lower: Vec<String>,
    windows: Mutex<HashMap<(String, ActionKind), UserWindow>>,
}

impl AbuseGate {
    pub fn new(config: AbuseConfig) -> Self {
        let blocked_lower = config
            .blocked_terms
            .iter()
            .map(|t| t.to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        Self {
            config,
            blocked_lower,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(
        &self,
        username: &str,
        kind: ActionKind,
        content: &str,
    ) -> Result<(), AbuseRejection> {
        self.check_at(username, kind, content, Instant::now())
    }

    /// Run all checks as of `now`. Every attempt counts against the rate
    /// window; only accepted content becomes the new duplicate reference.
    pub fn check_at(
        &self,
        username: &str,
        kind: ActionKind,
        content: &str,
        now: Instant,
    ) -> Result<(), AbuseRejection> {
        let window = Duration::from_secs(self.config.window_secs);
        let capacity = self.config.burst_limit.max(1);

        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = windows.entry((username.to_string(), kind)).or_default();

        let limited = entry.recent.len() >= capacity
            && entry
                .recent
                .front()
                .map_or(false, |oldest| now.saturating_duration_since(*oldest) < window);

        entry.recent.push_back(now);
        while entry.recent.len() > capacity {
            entry.recent.pop_front();
        }

        if limited {
            warn!(user = %username, %kind, "Rate limit exceeded");
            return Err(AbuseRejection::RateLimited { kind });
        }

        if entry.last_content.as_deref() == Some(content) {
            debug!(user = %username, %kind, "Duplicate content rejected");
            return Err(AbuseRejection::Duplicate { kind });
        }

        let lowered = content.to_lowercase();
        if let Some(term) = self.blocked_lower.iter().find(|t| lowered.contains(t.as_str())) {
            warn!(user = %username, %kind, "Blocked term in content");
            return Err(AbuseRejection::Blocked { term: term.clone() });
        }

        entry.last_content = Some(content.to_string());
        Ok(())
    }
}
